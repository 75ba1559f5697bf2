//! Line codec for the robot protocol
//!
//! Every frame is one UTF-8 JSON object terminated by `\n`, carrying a `CMD`
//! field plus a kind-specific payload:
//!
//! ```text
//! {"CMD":"init","SIZE":{"WIDTH":4,"HEIGHT":1}}
//! {"CMD":"land","POSITION":{"X":0,"Y":0,"DIRECTION":"EAST"}}
//! {"CMD":"mvscaned","MEASURE":{"GROUND":"SAND","TEMP":12.5},"POSITION":{...}}
//! ```
//!
//! Decoding never fails across this boundary: malformed JSON, an unknown `CMD`
//! or a payload of the wrong shape all end up as [`CommandKind::Unknown`] or
//! [`Event::Unknown`], which callers log and ignore.

use super::types::{Direction, Measure, Position, RobotStatus, Rotation, WorldSize};
use crate::error::{Result, StationError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;

/// Closed command vocabulary, both directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Orbit,
    Init,
    Land,
    Landed,
    Scan,
    Scaned,
    Move,
    Moved,
    Mvscan,
    Mvscaned,
    Rotate,
    Rotated,
    Crashed,
    Exit,
    Error,
    Getpos,
    Pos,
    Charge,
    Charged,
    Status,
    Unknown,
}

impl CommandKind {
    /// Case-insensitive lookup of a `CMD` value.
    pub fn from_wire(cmd: &str) -> Self {
        match cmd.trim().to_ascii_lowercase().as_str() {
            "orbit" => CommandKind::Orbit,
            "init" => CommandKind::Init,
            "land" => CommandKind::Land,
            "landed" => CommandKind::Landed,
            "scan" => CommandKind::Scan,
            "scaned" => CommandKind::Scaned,
            "move" => CommandKind::Move,
            "moved" => CommandKind::Moved,
            "mvscan" => CommandKind::Mvscan,
            "mvscaned" => CommandKind::Mvscaned,
            "rotate" => CommandKind::Rotate,
            "rotated" => CommandKind::Rotated,
            "crashed" => CommandKind::Crashed,
            "exit" => CommandKind::Exit,
            "error" => CommandKind::Error,
            "getpos" => CommandKind::Getpos,
            "pos" => CommandKind::Pos,
            "charge" => CommandKind::Charge,
            "charged" => CommandKind::Charged,
            "status" => CommandKind::Status,
            _ => CommandKind::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Orbit => "orbit",
            CommandKind::Init => "init",
            CommandKind::Land => "land",
            CommandKind::Landed => "landed",
            CommandKind::Scan => "scan",
            CommandKind::Scaned => "scaned",
            CommandKind::Move => "move",
            CommandKind::Moved => "moved",
            CommandKind::Mvscan => "mvscan",
            CommandKind::Mvscaned => "mvscaned",
            CommandKind::Rotate => "rotate",
            CommandKind::Rotated => "rotated",
            CommandKind::Crashed => "crashed",
            CommandKind::Exit => "exit",
            CommandKind::Error => "error",
            CommandKind::Getpos => "getpos",
            CommandKind::Pos => "pos",
            CommandKind::Charge => "charge",
            CommandKind::Charged => "charged",
            CommandKind::Status => "status",
            CommandKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded line. `fields` is `None` when the line was not a JSON object.
#[derive(Clone, Debug)]
pub struct Message {
    pub raw: String,
    pub fields: Option<Map<String, Value>>,
    pub parse_error: Option<String>,
}

impl Message {
    fn field<T: DeserializeOwned>(&self, name: &str) -> std::result::Result<T, String> {
        let fields = self
            .fields
            .as_ref()
            .ok_or_else(|| "not a JSON object".to_string())?;
        let value = fields
            .get(name)
            .ok_or_else(|| format!("missing {}", name))?;
        serde_json::from_value(value.clone()).map_err(|e| format!("bad {}: {}", name, e))
    }

    fn optional_string(&self, name: &str) -> Option<String> {
        self.fields
            .as_ref()
            .and_then(|f| f.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Decode a line into a [`Message`]. Returns `None` for blank input.
pub fn decode(line: &str) -> Option<Message> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (fields, parse_error) = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => (Some(map), None),
        Ok(other) => (None, Some(format!("expected object, got {}", other))),
        Err(e) => (None, Some(e.to_string())),
    };
    Some(Message {
        raw: trimmed.to_string(),
        fields,
        parse_error,
    })
}

/// Map a message to its command kind.
pub fn classify(message: &Message) -> CommandKind {
    message
        .fields
        .as_ref()
        .and_then(|f| f.get("CMD"))
        .and_then(Value::as_str)
        .map(CommandKind::from_wire)
        .unwrap_or(CommandKind::Unknown)
}

/// Robot to station event with its payload extracted.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Init(WorldSize),
    Landed(Measure),
    Scaned(Measure),
    Moved(Position),
    Mvscaned { position: Position, measure: Measure },
    Rotated(Direction),
    Pos(Position),
    Charged(RobotStatus),
    Status(RobotStatus),
    Crashed,
    Exit,
    Error(Option<String>),
    Unknown { raw: String, reason: String },
}

impl Event {
    pub fn kind(&self) -> CommandKind {
        match self {
            Event::Init(_) => CommandKind::Init,
            Event::Landed(_) => CommandKind::Landed,
            Event::Scaned(_) => CommandKind::Scaned,
            Event::Moved(_) => CommandKind::Moved,
            Event::Mvscaned { .. } => CommandKind::Mvscaned,
            Event::Rotated(_) => CommandKind::Rotated,
            Event::Pos(_) => CommandKind::Pos,
            Event::Charged(_) => CommandKind::Charged,
            Event::Status(_) => CommandKind::Status,
            Event::Crashed => CommandKind::Crashed,
            Event::Exit => CommandKind::Exit,
            Event::Error(_) => CommandKind::Error,
            Event::Unknown { .. } => CommandKind::Unknown,
        }
    }
}

/// Decode, classify and extract the payload of an inbound line.
pub fn parse_event(line: &str) -> Option<Event> {
    let message = decode(line)?;
    let unknown = |reason: String| Event::Unknown {
        raw: message.raw.clone(),
        reason,
    };

    if let Some(err) = &message.parse_error {
        return Some(unknown(err.clone()));
    }

    let kind = classify(&message);
    let event = match kind {
        CommandKind::Init => message.field("SIZE").map(Event::Init),
        CommandKind::Landed => message.field("MEASURE").map(Event::Landed),
        CommandKind::Scaned => message.field("MEASURE").map(Event::Scaned),
        CommandKind::Moved => message.field("POSITION").map(Event::Moved),
        CommandKind::Mvscaned => message.field("POSITION").and_then(|position| {
            message
                .field("MEASURE")
                .map(|measure| Event::Mvscaned { position, measure })
        }),
        CommandKind::Rotated => message
            .field::<String>("DIRECTION")
            .and_then(|d| d.parse::<Direction>())
            .map(Event::Rotated),
        // A getpos reply may echo the request kind.
        CommandKind::Pos | CommandKind::Getpos => message.field("POSITION").map(Event::Pos),
        CommandKind::Charged => Ok(Event::Charged(
            message.field("STATUS").unwrap_or_default(),
        )),
        CommandKind::Status => message.field("STATUS").map(Event::Status),
        CommandKind::Crashed => Ok(Event::Crashed),
        CommandKind::Exit => Ok(Event::Exit),
        CommandKind::Error => Ok(Event::Error(message.optional_string("MESSAGE"))),
        CommandKind::Unknown => Err("unknown CMD".to_string()),
        other => Err(format!("unexpected inbound {}", other)),
    };

    Some(event.unwrap_or_else(unknown))
}

/// Station to robot command.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "CMD", rename_all = "lowercase")]
pub enum Outbound {
    Orbit {
        #[serde(rename = "NAME")]
        name: String,
    },
    Land {
        #[serde(rename = "POSITION")]
        position: Position,
    },
    Move,
    Scan,
    Mvscan,
    Rotate {
        #[serde(rename = "ROTATION")]
        rotation: Rotation,
    },
    Charge {
        #[serde(rename = "DURATION")]
        duration: u32,
    },
    Getpos,
    Exit,
}

impl Outbound {
    pub fn orbit(name: impl Into<String>) -> Self {
        Outbound::Orbit { name: name.into() }
    }

    pub fn land(position: Position) -> Self {
        Outbound::Land { position }
    }

    pub fn rotate(rotation: Rotation) -> Self {
        Outbound::Rotate { rotation }
    }

    pub fn charge(duration: u32) -> Self {
        Outbound::Charge { duration }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Outbound::Orbit { .. } => CommandKind::Orbit,
            Outbound::Land { .. } => CommandKind::Land,
            Outbound::Move => CommandKind::Move,
            Outbound::Scan => CommandKind::Scan,
            Outbound::Mvscan => CommandKind::Mvscan,
            Outbound::Rotate { .. } => CommandKind::Rotate,
            Outbound::Charge { .. } => CommandKind::Charge,
            Outbound::Getpos => CommandKind::Getpos,
            Outbound::Exit => CommandKind::Exit,
        }
    }

    /// Encode as a single JSON line without the trailing newline.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an operator-supplied command, rejecting anything that is not a
    /// well-formed station-to-robot command.
    pub fn parse(line: &str) -> Result<Self> {
        let message =
            decode(line).ok_or_else(|| StationError::InvalidCommand("empty command".into()))?;
        if let Some(err) = &message.parse_error {
            return Err(StationError::InvalidCommand(err.clone()));
        }
        let invalid = |reason: String| StationError::InvalidCommand(reason);

        match classify(&message) {
            CommandKind::Orbit => Ok(Outbound::orbit(
                message.field::<String>("NAME").map_err(invalid)?,
            )),
            CommandKind::Land => Ok(Outbound::land(message.field("POSITION").map_err(invalid)?)),
            CommandKind::Move => Ok(Outbound::Move),
            CommandKind::Scan => Ok(Outbound::Scan),
            CommandKind::Mvscan => Ok(Outbound::Mvscan),
            CommandKind::Getpos => Ok(Outbound::Getpos),
            CommandKind::Exit => Ok(Outbound::Exit),
            CommandKind::Rotate => {
                let raw: String = message.field("ROTATION").map_err(invalid)?;
                match raw.trim().to_ascii_uppercase().as_str() {
                    "LEFT" => Ok(Outbound::rotate(Rotation::Left)),
                    "RIGHT" => Ok(Outbound::rotate(Rotation::Right)),
                    other => Err(invalid(format!("unknown rotation '{}'", other))),
                }
            }
            CommandKind::Charge => {
                let duration: f64 = message.field("DURATION").map_err(invalid)?;
                if duration < 0.0 || duration.fract() != 0.0 || duration > f64::from(u32::MAX) {
                    return Err(invalid(format!("bad DURATION {}", duration)));
                }
                Ok(Outbound::charge(duration as u32))
            }
            other => Err(invalid(format!("'{}' is not a station command", other))),
        }
    }
}

impl fmt::Display for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outbound::Orbit { name } => write!(f, "orbit {}", name),
            Outbound::Land { position } => write!(f, "land {}", position),
            Outbound::Rotate { rotation } => write!(f, "rotate {}", rotation),
            Outbound::Charge { duration } => write!(f, "charge {}s", duration),
            other => f.write_str(other.kind().as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{Ground, StatusEvent, StatusMessage};

    #[test]
    fn test_decode_blank_is_none() {
        assert!(decode("").is_none());
        assert!(decode("   \r\n").is_none());
        assert!(parse_event("\n").is_none());
    }

    #[test]
    fn test_malformed_input_is_unknown() {
        let msg = decode("{not json").unwrap();
        assert_eq!(classify(&msg), CommandKind::Unknown);

        let msg = decode(r#"{"CMD":"frobnicate"}"#).unwrap();
        assert_eq!(classify(&msg), CommandKind::Unknown);

        let msg = decode(r#"[1,2,3]"#).unwrap();
        assert_eq!(classify(&msg), CommandKind::Unknown);

        let msg = decode(r#"{"CMD":42}"#).unwrap();
        assert_eq!(classify(&msg), CommandKind::Unknown);

        assert!(matches!(parse_event("{not json"), Some(Event::Unknown { .. })));
        assert!(matches!(
            parse_event(r#"{"CMD":"frobnicate"}"#),
            Some(Event::Unknown { .. })
        ));
    }

    #[test]
    fn test_cmd_is_case_insensitive() {
        let msg = decode(r#"{"CMD":"MvScaned"}"#).unwrap();
        assert_eq!(classify(&msg), CommandKind::Mvscaned);
    }

    #[test]
    fn test_parse_init_with_float_numbers() {
        let event = parse_event(r#"{"CMD":"init","SIZE":{"WIDTH":4.0,"HEIGHT":1.0}}"#).unwrap();
        assert_eq!(event, Event::Init(WorldSize::new(4, 1)));
    }

    #[test]
    fn test_missing_payload_is_unknown() {
        match parse_event(r#"{"CMD":"moved"}"#).unwrap() {
            Event::Unknown { reason, .. } => assert!(reason.contains("POSITION")),
            other => panic!("expected Unknown, got {:?}", other),
        }
        assert!(matches!(
            parse_event(r#"{"CMD":"scaned","MEASURE":{"GROUND":"MOON","TEMP":1}}"#),
            Some(Event::Unknown { .. })
        ));
    }

    #[test]
    fn test_parse_mvscaned() {
        let line = r#"{"CMD":"mvscaned","MEASURE":{"GROUND":"sand","TEMP":12.5},"POSITION":{"X":1,"Y":0,"DIRECTION":"EAST"}}"#;
        let event = parse_event(line).unwrap();
        assert_eq!(
            event,
            Event::Mvscaned {
                position: Position::new(1, 0, Direction::East),
                measure: Measure::new(Ground::Sand, 12.5),
            }
        );
    }

    #[test]
    fn test_parse_rotated_and_pos() {
        assert_eq!(
            parse_event(r#"{"CMD":"rotated","DIRECTION":"west"}"#).unwrap(),
            Event::Rotated(Direction::West)
        );
        let pos = parse_event(r#"{"CMD":"pos","POSITION":{"X":2,"Y":3,"DIRECTION":"NORTH"}}"#);
        assert_eq!(pos.unwrap(), Event::Pos(Position::new(2, 3, Direction::North)));
    }

    #[test]
    fn test_parse_status_message() {
        let line = r#"{"CMD":"status","STATUS":{"TEMP":21.5,"ENERGY":18.0,"MESSAGE":"WARN_LOW_ENERGY|MOTOR=OK"}}"#;
        let Some(Event::Status(status)) = parse_event(line) else {
            panic!("expected status event");
        };
        assert_eq!(status.energy, Some(18));
        assert_eq!(status.temperature, Some(21.5));
        let parsed = StatusMessage::parse(&status.message);
        assert_eq!(parsed.events, vec![StatusEvent::WarnLowEnergy]);
        assert_eq!(parsed.readings.len(), 1);
    }

    #[test]
    fn test_charged_without_status_still_acknowledges() {
        assert_eq!(
            parse_event(r#"{"CMD":"charged"}"#).unwrap(),
            Event::Charged(RobotStatus::default())
        );
    }

    #[test]
    fn test_station_commands_are_unexpected_inbound() {
        assert!(matches!(
            parse_event(r#"{"CMD":"orbit","NAME":"x"}"#),
            Some(Event::Unknown { .. })
        ));
    }

    #[test]
    fn test_encode_outbound() {
        assert_eq!(Outbound::Move.encode().unwrap(), r#"{"CMD":"move"}"#);
        assert_eq!(
            Outbound::orbit("Robot-1a2b3c4d").encode().unwrap(),
            r#"{"CMD":"orbit","NAME":"Robot-1a2b3c4d"}"#
        );
        assert_eq!(
            Outbound::land(Position::new(0, 0, Direction::East)).encode().unwrap(),
            r#"{"CMD":"land","POSITION":{"X":0,"Y":0,"DIRECTION":"EAST"}}"#
        );
        assert_eq!(
            Outbound::rotate(Rotation::Left).encode().unwrap(),
            r#"{"CMD":"rotate","ROTATION":"LEFT"}"#
        );
        assert_eq!(
            Outbound::charge(5).encode().unwrap(),
            r#"{"CMD":"charge","DURATION":5}"#
        );
    }

    #[test]
    fn test_parse_manual_command() {
        assert_eq!(Outbound::parse(r#"{"CMD":"SCAN"}"#).unwrap(), Outbound::Scan);
        assert_eq!(
            Outbound::parse(r#"{"CMD":"rotate","ROTATION":"right"}"#).unwrap(),
            Outbound::rotate(Rotation::Right)
        );
        assert_eq!(
            Outbound::parse(r#"{"CMD":"charge","DURATION":5.0}"#).unwrap(),
            Outbound::charge(5)
        );
        assert!(Outbound::parse(r#"{"CMD":"moved"}"#).is_err());
        assert!(Outbound::parse(r#"{"CMD":"rotate","ROTATION":"UP"}"#).is_err());
        assert!(Outbound::parse("{oops").is_err());
        assert!(Outbound::parse("").is_err());
    }
}
