//! Observers of world-state changes.
//!
//! Sinks are passive: the store fans every change out to them after its own
//! locks are released, and a failing sink never affects the store.

use crate::error::Result;
use crate::protocol::{Coord, Measure, Position};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// A single change to the shared world state.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorldEvent {
    Measurement { coord: Coord, measure: Measure },
    Position { agent: String, position: Position },
    AgentRemoved { agent: String },
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: &WorldEvent);
}

/// Logs every event at debug level.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, event: &WorldEvent) {
        match event {
            WorldEvent::Measurement { coord, measure } => {
                tracing::debug!(
                    "Field {} -> {:?} ({:.1}°)",
                    coord,
                    measure.ground,
                    measure.temperature
                );
            }
            WorldEvent::Position { agent, position } => {
                tracing::debug!("[{}] at {}", agent, position);
            }
            WorldEvent::AgentRemoved { agent } => {
                tracing::debug!("[{}] removed from world", agent);
            }
        }
    }
}

/// Appends each event as one JSON object per line.
pub struct JsonLinesSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn write_event(&self, event: &WorldEvent) -> Result<()> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, event)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl EventSink for JsonLinesSink {
    fn record(&self, event: &WorldEvent) {
        if let Err(e) = self.write_event(event) {
            tracing::warn!("Event log write failed: {}", e);
        }
    }
}
