//! Per-robot record shared by a session and its planner.

use crate::protocol::{Coord, Measure, Rotation};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Session protocol state. `Terminated` is absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Connected,
    AwaitingOrbitAck,
    Orbiting,
    AwaitingLandingAck,
    Landed,
    Exploring,
    Charging,
    Terminated,
}

impl Lifecycle {
    /// On the ground with a committed position.
    pub fn is_landed(self) -> bool {
        matches!(
            self,
            Lifecycle::Landed | Lifecycle::Exploring | Lifecycle::Charging
        )
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Connected => "connected",
            Lifecycle::AwaitingOrbitAck => "awaiting-orbit",
            Lifecycle::Orbiting => "orbiting",
            Lifecycle::AwaitingLandingAck => "awaiting-landing",
            Lifecycle::Landed => "landed",
            Lifecycle::Exploring => "exploring",
            Lifecycle::Charging => "charging",
            Lifecycle::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Energy reported before the first status arrives.
pub const FULL_ENERGY: i32 = 100;

#[derive(Debug)]
pub struct AgentState {
    pub lifecycle: Lifecycle,
    /// Percent, 0..=100
    pub energy: i32,
    pub work_temp: f32,
    /// Whether any STATUS or CHARGED was received
    pub status_seen: bool,
    pub last_message: String,
    /// Latest `NAME=value` readings from status messages
    pub component_readings: BTreeMap<String, String>,
    /// Remaining exploration goals, row-major
    pub frontier: VecDeque<Coord>,
    /// Landing measurement waiting for the position reply
    pub pending_landing: Option<Measure>,
    /// Cell of the last move or land not yet confirmed
    pub last_move_target: Option<Coord>,
    pub needs_reattempt: bool,
    /// Next rotation used to free the robot from mud
    pub stuck_rotation: Rotation,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::Connected,
            energy: FULL_ENERGY,
            work_temp: 0.0,
            status_seen: false,
            last_message: String::new(),
            component_readings: BTreeMap::new(),
            frontier: VecDeque::new(),
            pending_landing: None,
            last_move_target: None,
            needs_reattempt: false,
            stuck_rotation: Rotation::Left,
        }
    }
}

impl AgentState {
    pub fn set_energy(&mut self, energy: i32) {
        self.energy = energy.clamp(0, FULL_ENERGY);
    }

    /// Rotation to try next when stuck; alternates LEFT, RIGHT, LEFT...
    pub fn next_stuck_rotation(&mut self) -> Rotation {
        let rotation = self.stuck_rotation;
        self.stuck_rotation = rotation.opposite();
        rotation
    }
}

#[derive(Debug)]
pub struct Agent {
    name: String,
    autonomous: AtomicBool,
    state: Mutex<AgentState>,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            autonomous: AtomicBool::new(false),
            state: Mutex::new(AgentState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_autonomous(&self) -> bool {
        self.autonomous.load(Ordering::SeqCst)
    }

    pub fn set_autonomous(&self, enabled: bool) {
        self.autonomous.store(enabled, Ordering::SeqCst);
    }

    pub fn state(&self) -> parking_lot::MutexGuard<'_, AgentState> {
        self.state.lock()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }

    /// Move to `next` unless already terminated.
    pub fn transition(&self, next: Lifecycle) -> Lifecycle {
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Terminated {
            state.lifecycle = next;
        }
        state.lifecycle
    }

    pub fn is_terminated(&self) -> bool {
        self.lifecycle() == Lifecycle::Terminated
    }
}
