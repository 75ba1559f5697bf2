//! Serializable view of the world, written on shutdown.

use crate::error::Result;
use crate::protocol::{Measure, Position, WorldSize};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Explored cell count against the world area.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorationStats {
    pub explored: usize,
    pub total: usize,
}

impl ExplorationStats {
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.explored as f32 * 100.0 / self.total as f32
        }
    }
}

impl fmt::Display for ExplorationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} fields explored ({:.1}%)",
            self.explored,
            self.total,
            self.percent()
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub x: i32,
    pub y: i32,
    pub measure: Measure,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub name: String,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub world: Option<WorldSize>,
    pub stats: ExplorationStats,
    pub fields: Vec<FieldEntry>,
    pub agents: Vec<AgentEntry>,
}

impl WorldSnapshot {
    /// Write as pretty JSON, creating parent directories as needed.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
