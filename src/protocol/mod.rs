//! Robot wire protocol: domain types and the JSON line codec.

pub mod codec;
pub mod types;

pub use codec::{CommandKind, Event, Message, Outbound, classify, decode, parse_event};
pub use types::{
    Coord, Direction, Ground, Measure, Position, RobotStatus, Rotation, StatusEvent,
    StatusMessage, TEMP_UNKNOWN, WorldSize,
};
