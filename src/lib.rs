//! Bhumi Station - ground control for grid-exploration robots
//!
//! Robots connect over TCP and speak a newline-delimited JSON protocol. The
//! station lands them, tracks what every robot has measured in a shared world
//! store, keeps robots from entering the same cell through reservations, and
//! can drive each robot autonomously until the whole grid is explored.
//!
//! # Modules
//!
//! - [`protocol`]: wire types and the JSON line codec
//! - [`world`]: shared world state, event sinks, snapshots
//! - [`station`]: listener, sessions, operator API
//! - [`planner`]: autonomous exploration per robot
//! - [`console`]: line-oriented operator console

pub mod config;
pub mod console;
pub mod error;
pub mod planner;
pub mod protocol;
pub mod station;
pub mod world;

pub use config::StationConfig;
pub use error::{Result, StationError};
pub use station::{SessionInfo, Station};
