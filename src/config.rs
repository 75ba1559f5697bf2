//! Configuration loading for Bhumi Station

use crate::error::{Result, StationError};
use crate::protocol::Direction;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct StationConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Listener settings
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Address robots connect to (default: 0.0.0.0:9000)
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Sleep between accept polls in milliseconds (default: 50)
    #[serde(default = "default_accept_poll_ms")]
    pub accept_poll_ms: u64,

    /// Socket read timeout in milliseconds (default: 500)
    ///
    /// Bounds how long a session takes to notice cancellation.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Autonomous exploration settings
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PlannerConfig {
    /// Enable autonomy for every robot as soon as it connects
    #[serde(default)]
    pub autonomous_on_connect: bool,

    /// How long to wait for an acknowledgement before re-attempting (ms)
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Energy percentage below which the planner charges first
    #[serde(default = "default_low_energy_threshold")]
    pub low_energy_threshold: i32,

    /// Charge duration requested from the robot (seconds)
    #[serde(default = "default_charge_duration_secs")]
    pub charge_duration_secs: u32,

    /// Extra wait on top of the charge duration (ms)
    #[serde(default = "default_charge_grace_ms")]
    pub charge_grace_ms: u64,

    /// Facing requested when landing
    #[serde(default = "default_landing_direction")]
    pub landing_direction: Direction,

    /// Landing attempts before the planner gives up
    #[serde(default = "default_max_landing_attempts")]
    pub max_landing_attempts: u32,

    /// Scan unknown cells before entering them instead of using mvscan
    #[serde(default)]
    pub scan_before_entering: bool,

    /// Granularity of cancellable waits (ms)
    #[serde(default = "default_wait_slice_ms")]
    pub wait_slice_ms: u64,
}

/// Local energy model used only before the robot reports any status
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub local_energy_fallback: bool,

    /// Energy deducted per confirmed move while the fallback is active
    #[serde(default = "default_move_energy_cost")]
    pub move_energy_cost: i32,
}

/// Output configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Where to write the world snapshot on shutdown
    #[serde(default)]
    pub snapshot_path: Option<String>,

    /// Append every measurement/position event as a JSON line
    #[serde(default)]
    pub event_log_path: Option<String>,
}

fn default_bind_address() -> String {
    "0.0.0.0:9000".to_string()
}
fn default_accept_poll_ms() -> u64 {
    50
}
fn default_read_timeout_ms() -> u64 {
    500
}
fn default_ack_timeout_ms() -> u64 {
    2000
}
fn default_low_energy_threshold() -> i32 {
    20
}
fn default_charge_duration_secs() -> u32 {
    5
}
fn default_charge_grace_ms() -> u64 {
    1000
}
fn default_landing_direction() -> Direction {
    Direction::East
}
fn default_max_landing_attempts() -> u32 {
    3
}
fn default_wait_slice_ms() -> u64 {
    50
}
fn default_move_energy_cost() -> i32 {
    2
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            accept_poll_ms: default_accept_poll_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            autonomous_on_connect: false,
            ack_timeout_ms: default_ack_timeout_ms(),
            low_energy_threshold: default_low_energy_threshold(),
            charge_duration_secs: default_charge_duration_secs(),
            charge_grace_ms: default_charge_grace_ms(),
            landing_direction: default_landing_direction(),
            max_landing_attempts: default_max_landing_attempts(),
            scan_before_entering: false,
            wait_slice_ms: default_wait_slice_ms(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            local_energy_fallback: false,
            move_energy_cost: default_move_energy_cost(),
        }
    }
}

impl PlannerConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Total wait for a CHARGED acknowledgement.
    pub fn charge_wait(&self) -> Duration {
        Duration::from_secs(u64::from(self.charge_duration_secs))
            + Duration::from_millis(self.charge_grace_ms)
    }

    pub fn wait_slice(&self) -> Duration {
        Duration::from_millis(self.wait_slice_ms.max(1))
    }
}

impl NetworkConfig {
    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

impl StationConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StationError::Config(format!("Failed to read config file: {}", e)))?;
        let config: StationConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
