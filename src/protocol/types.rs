//! Domain types shared by the wire protocol, the world store and the planner.
//!
//! Serde attributes follow the robot's wire spelling (`X`, `GROUND`, `NORTH`, ...)
//! so the same types are used for decoding, encoding and snapshots.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Grid coordinate. `y` grows towards SOUTH.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Neighbouring cell one step in `direction`.
    pub fn step(self, direction: Direction) -> Coord {
        let (dx, dy) = direction.delta();
        Coord::new(self.x + dx, self.y + dy)
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Compass facing of a robot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// Clockwise order, used for turn arithmetic.
    pub const CLOCKWISE: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    fn index(self) -> usize {
        match self {
            Direction::North => 0,
            Direction::East => 1,
            Direction::South => 2,
            Direction::West => 3,
        }
    }

    /// Grid delta of one step forward.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }

    /// Facing after a 90° turn.
    pub fn turned(self, rotation: Rotation) -> Direction {
        let offset = match rotation {
            Rotation::Right => 1,
            Rotation::Left => 3,
        };
        Self::CLOCKWISE[(self.index() + offset) % 4]
    }

    /// Turn that brings `self` closer to `target`, `None` if already facing it.
    ///
    /// A half turn is approached with RIGHT and re-evaluated afterwards.
    pub fn turn_towards(self, target: Direction) -> Option<Rotation> {
        match (target.index() + 4 - self.index()) % 4 {
            0 => None,
            3 => Some(Rotation::Left),
            _ => Some(Rotation::Right),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "NORTH",
            Direction::East => "EAST",
            Direction::South => "SOUTH",
            Direction::West => "WEST",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NORTH" => Ok(Direction::North),
            "EAST" => Ok(Direction::East),
            "SOUTH" => Ok(Direction::South),
            "WEST" => Ok(Direction::West),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// 90° turn requested from a robot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Rotation {
    Left,
    Right,
}

impl Rotation {
    pub fn opposite(self) -> Rotation {
        match self {
            Rotation::Left => Rotation::Right,
            Rotation::Right => Rotation::Left,
        }
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rotation::Left => f.write_str("LEFT"),
            Rotation::Right => f.write_str("RIGHT"),
        }
    }
}

/// Ground type reported by a scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Ground {
    /// Void. A robot entering it is lost.
    Nichts,
    Sand,
    Geroell,
    Fels,
    Wasser,
    Pflanzen,
    Morast,
    Lava,
}

impl Ground {
    pub fn is_passable(self) -> bool {
        self != Ground::Nichts
    }
}

impl FromStr for Ground {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NICHTS" => Ok(Ground::Nichts),
            "SAND" => Ok(Ground::Sand),
            "GEROELL" => Ok(Ground::Geroell),
            "FELS" => Ok(Ground::Fels),
            "WASSER" => Ok(Ground::Wasser),
            "PFLANZEN" => Ok(Ground::Pflanzen),
            "MORAST" => Ok(Ground::Morast),
            "LAVA" => Ok(Ground::Lava),
            other => Err(format!("unknown ground '{}'", other)),
        }
    }
}

/// Temperature reported when a cell was never scanned (crash-derived facts).
pub const TEMP_UNKNOWN: f32 = -999.9;

/// Measurement of a single cell.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    #[serde(rename = "GROUND", deserialize_with = "lenient_ground")]
    pub ground: Ground,
    #[serde(rename = "TEMP")]
    pub temperature: f32,
}

impl Measure {
    pub fn new(ground: Ground, temperature: f32) -> Self {
        Self {
            ground,
            temperature,
        }
    }

    /// Impassable cell learned without scanning it.
    pub fn impassable() -> Self {
        Self::new(Ground::Nichts, TEMP_UNKNOWN)
    }
}

/// Robot pose on the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "X", deserialize_with = "lenient_i32")]
    pub x: i32,
    #[serde(rename = "Y", deserialize_with = "lenient_i32")]
    pub y: i32,
    #[serde(rename = "DIRECTION", deserialize_with = "lenient_direction")]
    pub direction: Direction,
}

impl Position {
    pub fn new(x: i32, y: i32, direction: Direction) -> Self {
        Self { x, y, direction }
    }

    pub fn coord(&self) -> Coord {
        Coord::new(self.x, self.y)
    }

    /// Cell directly in front of the robot.
    pub fn ahead(&self) -> Coord {
        self.coord().step(self.direction)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.direction)
    }
}

/// World dimensions announced by `INIT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSize {
    #[serde(rename = "WIDTH", deserialize_with = "lenient_i32")]
    pub width: i32,
    #[serde(rename = "HEIGHT", deserialize_with = "lenient_i32")]
    pub height: i32,
}

impl WorldSize {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Both dimensions positive.
    pub fn is_known(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn cell_count(&self) -> usize {
        if self.is_known() {
            self.width as usize * self.height as usize
        } else {
            0
        }
    }

    pub fn contains(&self, coord: Coord) -> bool {
        coord.x >= 0 && coord.y >= 0 && coord.x < self.width && coord.y < self.height
    }

    /// Every cell, row by row.
    pub fn row_major(&self) -> impl Iterator<Item = Coord> + '_ {
        let width = self.width.max(0);
        (0..self.height.max(0)).flat_map(move |y| (0..width).map(move |x| Coord::new(x, y)))
    }
}

/// Robot health block carried by `STATUS` and `CHARGED`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotStatus {
    #[serde(rename = "TEMP", default, deserialize_with = "lenient_opt_f32")]
    pub temperature: Option<f32>,
    #[serde(rename = "ENERGY", default, deserialize_with = "lenient_opt_i32")]
    pub energy: Option<i32>,
    #[serde(rename = "MESSAGE", default)]
    pub message: String,
}

/// Named event carried in a status message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusEvent {
    WarnLowEnergy,
    StuckInMud,
    MoveStop,
    MoveDirectionChanged,
    HeaterOn,
    HeaterOff,
    CoolerOn,
    CoolerOff,
    WarnMinTemp,
    WarnMaxTemp,
    EmergencyCall,
    ChargeEnd,
    ScanStop,
    RotateStop,
    Other(String),
}

impl StatusEvent {
    fn parse(token: &str) -> StatusEvent {
        match token.to_ascii_uppercase().as_str() {
            "WARN_LOW_ENERGY" => StatusEvent::WarnLowEnergy,
            "STUCK_IN_MUD" => StatusEvent::StuckInMud,
            "MOVE_STOP" => StatusEvent::MoveStop,
            "MOVE_DIRECTION_CHANGED" => StatusEvent::MoveDirectionChanged,
            "HEATER_ON" => StatusEvent::HeaterOn,
            "HEATER_OFF" => StatusEvent::HeaterOff,
            "COOLER_ON" => StatusEvent::CoolerOn,
            "COOLER_OFF" => StatusEvent::CoolerOff,
            "WARN_MIN_TEMP" => StatusEvent::WarnMinTemp,
            "WARN_MAX_TEMP" => StatusEvent::WarnMaxTemp,
            "EMERGENCY_CALL" => StatusEvent::EmergencyCall,
            "CHARGE_END" => StatusEvent::ChargeEnd,
            "SCAN_STOP" => StatusEvent::ScanStop,
            "ROTATE_STOP" => StatusEvent::RotateStop,
            _ => StatusEvent::Other(token.to_string()),
        }
    }
}

/// Split status message: named events and `NAME=value` component readings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusMessage {
    pub events: Vec<StatusEvent>,
    pub readings: Vec<(String, String)>,
}

impl StatusMessage {
    /// Parse a `|`-delimited message like `WARN_LOW_ENERGY|MOTOR=80`.
    pub fn parse(message: &str) -> Self {
        let mut parsed = StatusMessage::default();
        for token in message.split('|').map(str::trim).filter(|t| !t.is_empty()) {
            match token.split_once('=') {
                Some((name, value)) => parsed
                    .readings
                    .push((name.trim().to_string(), value.trim().to_string())),
                None => parsed.events.push(StatusEvent::parse(token)),
            }
        }
        parsed
    }
}

// Peers may serialize every JSON number as a double.
fn lenient_i32<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value.fract() != 0.0 || value < f64::from(i32::MIN) || value > f64::from(i32::MAX) {
        return Err(serde::de::Error::custom(format!("{} is not an integer", value)));
    }
    Ok(value as i32)
}

fn lenient_opt_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.map(|v| v.round() as i32))
}

fn lenient_opt_f32<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.map(|v| v as f32))
}

fn lenient_direction<'de, D>(deserializer: D) -> Result<Direction, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

fn lenient_ground<'de, D>(deserializer: D) -> Result<Ground, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}
