//! Line-oriented operator console.
//!
//! Built only on the [`Station`] operator API. Reads commands from any
//! `BufRead` so it can run on stdin or be driven from tests.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `ls` | list sessions |
//! | `stats` | exploration progress |
//! | `info <robot>` | session details |
//! | `auto <robot> [on\|off]` | set or toggle autonomy |
//! | `move\|scan\|mvscan\|getpos <robot>` | manual command |
//! | `rotate <robot> left\|right` | manual rotation |
//! | `charge <robot> [seconds]` | manual charge |
//! | `land <robot> <x> <y> <direction>` | manual landing |
//! | `send <robot> <json>` | raw station command |
//! | `exit` | stop the station |

use crate::error::Result;
use crate::protocol::{Direction, Outbound, Position, Rotation};
use crate::station::Station;
use std::io::{BufRead, Write};

const HELP: &str = "commands: ls | stats | info <robot> | auto <robot> [on|off] | \
move|scan|mvscan|getpos <robot> | rotate <robot> left|right | charge <robot> [secs] | \
land <robot> <x> <y> <dir> | send <robot> <json> | exit";

#[derive(Clone, Debug, PartialEq)]
pub enum ConsoleCommand {
    List,
    Stats,
    Help,
    Exit,
    Info(String),
    /// `None` toggles
    Autonomy { name: String, enabled: Option<bool> },
    Send { name: String, command: Outbound },
    Raw { name: String, json: String },
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse_console_command(
    line: &str,
    default_charge_secs: u32,
) -> std::result::Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();
    let robot = || {
        args.first()
            .map(|s| s.to_string())
            .ok_or_else(|| format!("'{}' needs a robot name", verb))
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "ls" | "list" => ConsoleCommand::List,
        "stats" => ConsoleCommand::Stats,
        "help" | "?" => ConsoleCommand::Help,
        "exit" | "quit" => ConsoleCommand::Exit,
        "info" => ConsoleCommand::Info(robot()?),
        "auto" => {
            let enabled = match args.get(1).map(|s| s.to_ascii_lowercase()) {
                None => None,
                Some(v) if v == "on" => Some(true),
                Some(v) if v == "off" => Some(false),
                Some(v) => return Err(format!("expected on or off, got '{}'", v)),
            };
            ConsoleCommand::Autonomy {
                name: robot()?,
                enabled,
            }
        }
        "move" | "scan" | "mvscan" | "getpos" => {
            let command = match verb.to_ascii_lowercase().as_str() {
                "move" => Outbound::Move,
                "scan" => Outbound::Scan,
                "mvscan" => Outbound::Mvscan,
                _ => Outbound::Getpos,
            };
            ConsoleCommand::Send {
                name: robot()?,
                command,
            }
        }
        "rotate" => {
            let rotation = match args.get(1).map(|s| s.to_ascii_lowercase()).as_deref() {
                Some("left") => Rotation::Left,
                Some("right") => Rotation::Right,
                _ => return Err("rotate needs left or right".to_string()),
            };
            ConsoleCommand::Send {
                name: robot()?,
                command: Outbound::rotate(rotation),
            }
        }
        "charge" => {
            let secs = match args.get(1) {
                Some(s) => s
                    .parse::<u32>()
                    .map_err(|_| format!("bad duration '{}'", s))?,
                None => default_charge_secs,
            };
            ConsoleCommand::Send {
                name: robot()?,
                command: Outbound::charge(secs),
            }
        }
        "land" => {
            if args.len() != 4 {
                return Err("usage: land <robot> <x> <y> <direction>".to_string());
            }
            let x = args[1].parse::<i32>().map_err(|_| format!("bad x '{}'", args[1]))?;
            let y = args[2].parse::<i32>().map_err(|_| format!("bad y '{}'", args[2]))?;
            let direction: Direction = args[3].parse()?;
            ConsoleCommand::Send {
                name: robot()?,
                command: Outbound::land(Position::new(x, y, direction)),
            }
        }
        "send" => {
            let name = robot()?;
            let json = rest[name.len()..].trim();
            if json.is_empty() {
                return Err("send needs a JSON command".to_string());
            }
            ConsoleCommand::Raw {
                name,
                json: json.to_string(),
            }
        }
        other => return Err(format!("unknown command '{}'", other)),
    };
    Ok(Some(command))
}

/// Execute one command. Returns false when the console should stop.
pub fn execute(station: &Station, command: ConsoleCommand, out: &mut impl Write) -> Result<bool> {
    match command {
        ConsoleCommand::List => {
            let sessions = station.list_sessions();
            if sessions.is_empty() {
                writeln!(out, "no robots connected")?;
            }
            for info in sessions {
                let position = info
                    .position
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string());
                writeln!(
                    out,
                    "{:<16} {:<16} auto={:<5} energy={:>3}% pos={}",
                    info.name, info.lifecycle, info.autonomous, info.energy, position
                )?;
            }
        }
        ConsoleCommand::Stats => writeln!(out, "{}", station.exploration_stats())?,
        ConsoleCommand::Help => writeln!(out, "{}", HELP)?,
        ConsoleCommand::Exit => return Ok(false),
        ConsoleCommand::Info(name) => {
            let info = station.get_session(&name)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?;
        }
        ConsoleCommand::Autonomy { name, enabled } => {
            let enabled = match enabled {
                Some(enabled) => enabled,
                None => !station.get_session(&name)?.autonomous,
            };
            station.set_autonomous(&name, enabled)?;
            writeln!(
                out,
                "{} autonomy {}",
                name,
                if enabled { "on" } else { "off" }
            )?;
        }
        ConsoleCommand::Send { name, command } => {
            station.send_manual_command(&name, &command.encode()?)?;
            writeln!(out, "sent {} to {}", command, name)?;
        }
        ConsoleCommand::Raw { name, json } => {
            station.send_manual_command(&name, &json)?;
            writeln!(out, "sent to {}", name)?;
        }
    }
    Ok(true)
}

/// Run until `exit`, end of input, or the station stops.
pub fn run_console(station: &Station, input: impl BufRead, mut out: impl Write) -> Result<()> {
    let default_charge = station.config().planner.charge_duration_secs;
    writeln!(out, "{}", HELP)?;

    for line in input.lines() {
        if !station.is_running() {
            break;
        }
        let line = line?;
        match parse_console_command(&line, default_charge) {
            Ok(None) => {}
            Ok(Some(command)) => match execute(station, command, &mut out) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => writeln!(out, "error: {}", e)?,
            },
            Err(e) => writeln!(out, "error: {}", e)?,
        }
        out.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StationConfig;
    use std::io::Cursor;

    fn parse(line: &str) -> ConsoleCommand {
        parse_console_command(line, 5).unwrap().unwrap()
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse("ls"), ConsoleCommand::List);
        assert_eq!(parse("  STATS "), ConsoleCommand::Stats);
        assert_eq!(parse("quit"), ConsoleCommand::Exit);
        assert_eq!(parse_console_command("   ", 5), Ok(None));
    }

    #[test]
    fn test_parse_autonomy() {
        assert_eq!(
            parse("auto Robot-1 on"),
            ConsoleCommand::Autonomy {
                name: "Robot-1".to_string(),
                enabled: Some(true)
            }
        );
        assert_eq!(
            parse("auto Robot-1"),
            ConsoleCommand::Autonomy {
                name: "Robot-1".to_string(),
                enabled: None
            }
        );
        assert!(parse_console_command("auto Robot-1 maybe", 5).is_err());
        assert!(parse_console_command("auto", 5).is_err());
    }

    #[test]
    fn test_parse_manual_commands() {
        assert_eq!(
            parse("charge Robot-1"),
            ConsoleCommand::Send {
                name: "Robot-1".to_string(),
                command: Outbound::charge(5)
            }
        );
        assert_eq!(
            parse("rotate Robot-1 LEFT"),
            ConsoleCommand::Send {
                name: "Robot-1".to_string(),
                command: Outbound::rotate(Rotation::Left)
            }
        );
        assert_eq!(
            parse("land Robot-1 2 3 south"),
            ConsoleCommand::Send {
                name: "Robot-1".to_string(),
                command: Outbound::land(Position::new(2, 3, Direction::South))
            }
        );
        assert!(parse_console_command("land Robot-1 2 x south", 5).is_err());
        assert!(parse_console_command("rotate Robot-1 up", 5).is_err());
        assert!(parse_console_command("dance Robot-1", 5).is_err());
    }

    #[test]
    fn test_parse_raw_send() {
        assert_eq!(
            parse(r#"send Robot-1 {"CMD": "scan"}"#),
            ConsoleCommand::Raw {
                name: "Robot-1".to_string(),
                json: r#"{"CMD": "scan"}"#.to_string()
            }
        );
        assert!(parse_console_command("send Robot-1", 5).is_err());
    }

    #[test]
    fn test_console_session() {
        let mut config = StationConfig::default();
        config.network.bind_address = "127.0.0.1:0".to_string();
        let station = Station::start(config).unwrap();
        station.store().set_world_size(2, 2);

        let input = Cursor::new("ls\nstats\nscan Robot-nobody\nbogus\nexit\nls\n");
        let mut output = Vec::new();
        run_console(&station, input, &mut output).unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("no robots connected"));
        assert!(text.contains("0/4 fields explored"));
        assert!(text.contains("error: No session named Robot-nobody"));
        assert!(text.contains("error: unknown command 'bogus'"));
        // Nothing after exit is executed.
        assert_eq!(text.matches("no robots connected").count(), 1);
        station.shutdown().unwrap();
    }
}
