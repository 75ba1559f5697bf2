//! Shared world state: explored fields, robot positions and cell reservations.

pub mod sink;
pub mod snapshot;
pub mod store;

pub use sink::{EventSink, JsonLinesSink, LogSink, WorldEvent};
pub use snapshot::{ExplorationStats, WorldSnapshot};
pub use store::WorldStore;
