//! One robot connection: read loop, protocol state machine and planner owner.
//!
//! # Connection Lifecycle
//!
//! ```text
//! 1. Acceptor registers the session and sends `orbit`
//! 2. Read loop turns each inbound line into store updates and transitions
//! 3. Acknowledgements complete the pending-request slot the planner waits on
//! 4. On EXIT/ERROR/CRASHED, disconnect or station shutdown the session tears
//!    down: planner stopped, agent removed from the store, socket closed
//! ```
//!
//! The read loop uses a socket read timeout so it re-checks the station's
//! running flag and the session's closing flag at least every timeout period.

use super::ack::{Ack, AckKind, AckSlot};
use super::agent::{Agent, FULL_ENERGY, Lifecycle};
use super::link::RobotLink;
use crate::config::StationConfig;
use crate::error::{Result, StationError};
use crate::planner::PlannerHandle;
use crate::protocol::{
    Event, Measure, Outbound, Position, RobotStatus, StatusEvent, StatusMessage, parse_event,
};
use crate::world::WorldStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Lines longer than this are discarded.
const MAX_LINE_BYTES: usize = 1024 * 1024;

const READ_CHUNK: usize = 4096;

/// Operator-facing view of a session.
#[derive(Clone, Debug, Serialize)]
pub struct SessionInfo {
    pub name: String,
    pub autonomous: bool,
    pub lifecycle: Lifecycle,
    pub energy: i32,
    pub work_temp: f32,
    pub position: Option<Position>,
    pub component_readings: BTreeMap<String, String>,
    pub last_message: String,
}

pub struct Session {
    agent: Arc<Agent>,
    store: Arc<WorldStore>,
    config: Arc<StationConfig>,
    link: Box<dyn RobotLink>,
    acks: AckSlot,
    /// Global running flag (station shutdown)
    running: Arc<AtomicBool>,
    /// Per-session close request
    closing: AtomicBool,
    planner: Mutex<Option<PlannerHandle>>,
}

impl Session {
    pub fn new(
        name: impl Into<String>,
        link: Box<dyn RobotLink>,
        store: Arc<WorldStore>,
        config: Arc<StationConfig>,
        running: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            agent: Arc::new(Agent::new(name)),
            store,
            config,
            link,
            acks: AckSlot::new(),
            running,
            closing: AtomicBool::new(false),
            planner: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        self.agent.name()
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn store(&self) -> &Arc<WorldStore> {
        &self.store
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn acks(&self) -> &AckSlot {
        &self.acks
    }

    /// Neither closing, terminated nor shut down.
    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::Relaxed)
            && !self.closing.load(Ordering::Relaxed)
            && !self.agent.is_terminated()
    }

    pub fn info(&self) -> SessionInfo {
        let position = self.store.agent_position(self.name());
        let state = self.agent.state();
        SessionInfo {
            name: self.name().to_string(),
            autonomous: self.agent.is_autonomous(),
            lifecycle: state.lifecycle,
            energy: state.energy,
            work_temp: state.work_temp,
            position,
            component_readings: state.component_readings.clone(),
            last_message: state.last_message.clone(),
        }
    }

    /// Register with the store and greet the robot.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.store.register_agent(self.name());
        self.agent.transition(Lifecycle::AwaitingOrbitAck);
        self.send(&Outbound::orbit(self.name()))?;
        if self.config.planner.autonomous_on_connect {
            self.set_autonomous(true);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    pub fn send(&self, command: &Outbound) -> Result<()> {
        if self.agent.is_terminated() {
            return Err(StationError::SessionTerminated(self.name().to_string()));
        }
        let line = command.encode()?;
        debug!("[{}] -> {}", self.name(), line);
        self.link.send_line(&line).map_err(|e| {
            warn!("[{}] Send failed: {}", self.name(), e);
            self.closing.store(true, Ordering::Relaxed);
            StationError::Io(e)
        })
    }

    /// Send an operator command, applying its local bookkeeping first.
    pub fn send_manual(&self, command: Outbound) -> Result<()> {
        if self.agent.is_terminated() {
            return Err(StationError::SessionTerminated(self.name().to_string()));
        }
        let ahead = self.store.agent_position(self.name()).map(|p| p.ahead());
        {
            let mut state = self.agent.state();
            match &command {
                Outbound::Orbit { .. } => state.lifecycle = Lifecycle::AwaitingOrbitAck,
                Outbound::Land { position } => {
                    state.lifecycle = Lifecycle::AwaitingLandingAck;
                    state.last_move_target = Some(position.coord());
                }
                Outbound::Move | Outbound::Mvscan => {
                    if ahead.is_some() {
                        state.last_move_target = ahead;
                    }
                }
                Outbound::Charge { .. } if state.lifecycle.is_landed() => {
                    state.lifecycle = Lifecycle::Charging;
                }
                _ => {}
            }
        }
        info!("[{}] Manual command: {}", self.name(), command);
        self.send(&command)
    }

    // ------------------------------------------------------------------
    // Autonomy
    // ------------------------------------------------------------------

    pub fn set_autonomous(self: &Arc<Self>, enabled: bool) {
        self.agent.set_autonomous(enabled);
        if enabled {
            info!("[{}] Autonomy enabled", self.name());
            self.ensure_planner();
        } else {
            info!("[{}] Autonomy disabled", self.name());
            self.stop_planner();
            let mut state = self.agent.state();
            if state.lifecycle == Lifecycle::Exploring {
                state.lifecycle = Lifecycle::Landed;
            }
        }
    }

    /// Start the planner if autonomy is on and none is running.
    pub fn ensure_planner(self: &Arc<Self>) {
        if !self.agent.is_autonomous() || !self.is_active() {
            return;
        }
        let mut slot = self.planner.lock();
        if let Some(handle) = slot.as_ref()
            && !handle.is_finished()
        {
            return;
        }
        if let Some(finished) = slot.take() {
            finished.stop();
        }
        match PlannerHandle::spawn(Arc::clone(self)) {
            Ok(handle) => *slot = Some(handle),
            Err(e) => warn!("[{}] Failed to start planner: {}", self.name(), e),
        }
    }

    /// Cancel and join the planner, if any.
    pub fn stop_planner(&self) {
        let handle = self.planner.lock().take();
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    pub fn planner_active(&self) -> bool {
        self.planner
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    pub fn handle_line(self: &Arc<Self>, line: &str) {
        if let Some(event) = parse_event(line) {
            self.handle_event(event);
        }
    }

    pub fn handle_event(self: &Arc<Self>, event: Event) {
        if self.agent.is_terminated() {
            debug!("[{}] Ignoring {} after termination", self.name(), event.kind());
            return;
        }
        let name = self.name();

        match event {
            Event::Init(size) => {
                if !size.is_known() {
                    warn!("[{}] Invalid world size {}x{}", name, size.width, size.height);
                }
                self.store.set_world_size(size.width, size.height);
                {
                    let mut state = self.agent.state();
                    if matches!(
                        state.lifecycle,
                        Lifecycle::Connected | Lifecycle::AwaitingOrbitAck
                    ) {
                        state.lifecycle = Lifecycle::Orbiting;
                    }
                }
                info!("[{}] In orbit over {}x{} world", name, size.width, size.height);
                self.ensure_planner();
            }
            Event::Landed(measure) => {
                self.agent.state().pending_landing = Some(measure);
                if let Err(e) = self.send(&Outbound::Getpos) {
                    warn!("[{}] Could not request landing position: {}", name, e);
                }
            }
            Event::Pos(position) => self.commit_position(position),
            Event::Scaned(measure) => {
                match self.store.agent_position(name) {
                    Some(position) => {
                        self.store.record_measurement(position.ahead(), measure);
                    }
                    None => warn!("[{}] Scan result without a known position", name),
                }
                self.acks.complete(AckKind::Scanned, Ack::Done);
            }
            Event::Moved(position) => self.commit_move(position, None),
            Event::Mvscaned { position, measure } => self.commit_move(position, Some(measure)),
            Event::Rotated(direction) => {
                if !self.store.set_agent_direction(name, direction) {
                    warn!("[{}] Rotated to {} before landing", name, direction);
                }
                self.acks.complete(AckKind::Rotated, Ack::Done);
            }
            Event::Charged(status) => {
                self.apply_status(&status);
                let exploring = self.planner_active();
                {
                    let mut state = self.agent.state();
                    if status.energy.is_none() && self.config.simulation.local_energy_fallback {
                        state.set_energy(FULL_ENERGY);
                    }
                    if state.lifecycle == Lifecycle::Charging {
                        state.lifecycle = if exploring {
                            Lifecycle::Exploring
                        } else {
                            Lifecycle::Landed
                        };
                    }
                }
                info!("[{}] Charged, energy {}%", name, self.agent.state().energy);
                self.acks.complete(AckKind::Charged, Ack::Done);
            }
            Event::Status(status) => self.apply_status(&status),
            Event::Crashed => {
                let target = self.agent.state().last_move_target.take();
                if let Some(target) = target {
                    self.store.record_measurement(target, Measure::impassable());
                    self.store.release_held(name, target);
                    warn!("[{}] Crashed entering {}, marked impassable", name, target);
                } else {
                    warn!("[{}] Crashed", name);
                }
                self.terminate();
            }
            Event::Exit => {
                info!("[{}] Robot exited", name);
                self.terminate();
            }
            Event::Error(message) => {
                warn!(
                    "[{}] Robot reported error: {}",
                    name,
                    message.as_deref().unwrap_or("(no message)")
                );
                self.terminate();
            }
            Event::Unknown { raw, reason } => {
                warn!("[{}] Ignoring message ({}): {}", name, reason, raw);
            }
        }
    }

    fn commit_position(self: &Arc<Self>, position: Position) {
        let name = self.name();
        self.store.set_agent_position(name, position);

        let landing = {
            let mut state = self.agent.state();
            state.pending_landing.take().map(|measure| {
                if !state.lifecycle.is_landed() {
                    state.lifecycle = Lifecycle::Landed;
                }
                (measure, state.last_move_target.take())
            })
        };

        if let Some((measure, requested)) = landing {
            let here = position.coord();
            self.store.record_measurement(here, measure);
            self.store.release_held(name, here);
            if let Some(requested) = requested
                && requested != here
            {
                self.store.release_held(name, requested);
            }
            info!("[{}] Landed at {}", name, position);
            self.acks.complete(AckKind::Landed, Ack::Done);
            self.ensure_planner();
        }
        self.acks.complete(AckKind::Position, Ack::Done);
    }

    fn commit_move(&self, position: Position, measure: Option<Measure>) {
        let name = self.name();
        let here = position.coord();
        self.store.set_agent_position(name, position);

        let target = {
            let mut state = self.agent.state();
            state.needs_reattempt = false;
            if self.config.simulation.local_energy_fallback && !state.status_seen {
                let remaining = state.energy - self.config.simulation.move_energy_cost;
                state.set_energy(remaining);
            }
            state.last_move_target.take()
        };

        if let Some(target) = target {
            self.store.release_held(name, target);
            if target != here {
                debug!("[{}] Moved to {} instead of {}", name, here, target);
            }
        }
        self.store.release_held(name, here);

        if let Some(measure) = measure {
            self.store.record_measurement(here, measure);
        }
        self.acks.complete(AckKind::Moved, Ack::Done);
    }

    fn apply_status(&self, status: &RobotStatus) {
        let parsed = StatusMessage::parse(&status.message);
        {
            let mut state = self.agent.state();
            if let Some(energy) = status.energy {
                state.set_energy(energy);
            }
            if let Some(temp) = status.temperature {
                state.work_temp = temp;
            }
            state.status_seen = true;
            state.last_message = status.message.clone();
            for (component, value) in &parsed.readings {
                state
                    .component_readings
                    .insert(component.clone(), value.clone());
            }
        }
        for (component, value) in &parsed.readings {
            debug!("[{}] {} = {}", self.name(), component, value);
        }
        for event in parsed.events {
            self.handle_status_event(event);
        }
    }

    fn handle_status_event(&self, event: StatusEvent) {
        let name = self.name();
        let autonomous = self.agent.is_autonomous();

        match event {
            StatusEvent::WarnLowEnergy => {
                warn!("[{}] Low energy ({}%)", name, self.agent.state().energy);
                if autonomous {
                    self.begin_charge();
                }
            }
            StatusEvent::StuckInMud => {
                warn!("[{}] Stuck in mud", name);
                let rotation = {
                    let mut state = self.agent.state();
                    state.needs_reattempt = true;
                    state.next_stuck_rotation()
                };
                self.acks.complete(AckKind::Moved, Ack::Interrupted);
                if autonomous && let Err(e) = self.send(&Outbound::rotate(rotation)) {
                    warn!("[{}] Could not rotate out of mud: {}", name, e);
                }
            }
            StatusEvent::MoveStop => {
                info!("[{}] Move stopped", name);
                self.agent.state().needs_reattempt = true;
                self.acks.complete(AckKind::Moved, Ack::Interrupted);
            }
            StatusEvent::MoveDirectionChanged => {
                info!("[{}] Move direction changed", name);
                if autonomous && let Err(e) = self.send(&Outbound::Getpos) {
                    warn!("[{}] Could not resync position: {}", name, e);
                }
            }
            StatusEvent::WarnMinTemp | StatusEvent::WarnMaxTemp | StatusEvent::EmergencyCall => {
                warn!("[{}] Status: {:?}", name, event);
            }
            StatusEvent::Other(token) => debug!("[{}] Unrecognised status token {}", name, token),
            other => info!("[{}] Status: {:?}", name, other),
        }
    }

    /// Charge now unless already charging or not on the ground.
    fn begin_charge(&self) {
        {
            let mut state = self.agent.state();
            if state.lifecycle == Lifecycle::Charging || !state.lifecycle.is_landed() {
                return;
            }
            state.lifecycle = Lifecycle::Charging;
        }
        let duration = self.config.planner.charge_duration_secs;
        if let Err(e) = self.send(&Outbound::charge(duration)) {
            warn!("[{}] Could not start charging: {}", self.name(), e);
        }
    }

    /// Enter the absorbing state and release any waiter.
    fn terminate(&self) {
        self.agent.transition(Lifecycle::Terminated);
        self.acks.fail_any(Ack::Terminated);
    }

    // ------------------------------------------------------------------
    // Read loop and teardown
    // ------------------------------------------------------------------

    /// Process inbound lines until the robot leaves or the session is closed.
    pub fn run<R: Read>(self: &Arc<Self>, mut reader: R) {
        info!("[{}] Session started", self.name());
        let mut pending: Vec<u8> = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];

        while self.is_active() {
            match reader.read(&mut chunk) {
                Ok(0) => {
                    if !pending.is_empty() {
                        let line = String::from_utf8_lossy(&pending).into_owned();
                        pending.clear();
                        self.handle_line(&line);
                    }
                    info!("[{}] Robot disconnected", self.name());
                    break;
                }
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    while let Some(end) = pending.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = pending.drain(..=end).collect();
                        let line = String::from_utf8_lossy(&raw);
                        self.handle_line(&line);
                        if !self.is_active() {
                            break;
                        }
                    }
                    if pending.len() > MAX_LINE_BYTES {
                        warn!("[{}] Discarding oversized line", self.name());
                        pending.clear();
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    if self.closing.load(Ordering::Relaxed) {
                        debug!("[{}] Read ended during close: {}", self.name(), e);
                    } else {
                        warn!("[{}] Read failed: {}", self.name(), e);
                    }
                    break;
                }
            }
        }

        self.teardown();
    }

    /// Ask the read loop to stop and close the socket.
    pub fn close(&self) {
        self.closing.store(true, Ordering::Relaxed);
        self.stop_planner();
        self.link.shutdown();
    }

    fn teardown(&self) {
        self.agent.transition(Lifecycle::Terminated);
        self.acks.fail_any(Ack::Terminated);
        self.stop_planner();
        self.store.unregister_agent(self.name());
        self.link.shutdown();
        info!("[{}] Session closed", self.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Coord, Direction, Ground};
    use crate::station::link::MockLink;
    use std::io::Cursor;

    fn session_with(config: StationConfig) -> (Arc<Session>, MockLink, Arc<WorldStore>) {
        let link = MockLink::new();
        let store = Arc::new(WorldStore::new());
        let session = Session::new(
            "Robot-test0001",
            Box::new(link.clone()),
            Arc::clone(&store),
            Arc::new(config),
            Arc::new(AtomicBool::new(true)),
        );
        (session, link, store)
    }

    fn session() -> (Arc<Session>, MockLink, Arc<WorldStore>) {
        session_with(StationConfig::default())
    }

    #[test]
    fn test_start_sends_orbit() {
        let (session, link, _store) = session();
        session.start().unwrap();
        assert_eq!(link.sent(), vec![r#"{"CMD":"orbit","NAME":"Robot-test0001"}"#]);
        assert_eq!(session.agent().lifecycle(), Lifecycle::AwaitingOrbitAck);

        session.handle_line(r#"{"CMD":"init","SIZE":{"WIDTH":5,"HEIGHT":3}}"#);
        assert_eq!(session.agent().lifecycle(), Lifecycle::Orbiting);
        assert_eq!(session.store().world_size().unwrap().width, 5);
    }

    #[test]
    fn test_landing_commit() {
        let (session, link, store) = session();
        store.set_world_size(4, 4);
        session
            .send_manual(Outbound::land(Position::new(1, 1, Direction::North)))
            .unwrap();
        store.try_reserve(session.name(), Coord::new(1, 1));
        assert_eq!(session.agent().lifecycle(), Lifecycle::AwaitingLandingAck);

        session.handle_line(r#"{"CMD":"landed","MEASURE":{"GROUND":"SAND","TEMP":20}}"#);
        assert_eq!(link.sent_commands().last().unwrap(), "getpos");
        assert!(!store.is_explored(Coord::new(1, 1)));

        session.handle_line(r#"{"CMD":"pos","POSITION":{"X":1,"Y":1,"DIRECTION":"NORTH"}}"#);
        assert_eq!(session.agent().lifecycle(), Lifecycle::Landed);
        assert_eq!(store.measurement(Coord::new(1, 1)).unwrap().ground, Ground::Sand);
        assert!(!store.is_reserved(Coord::new(1, 1)));
        assert!(session.agent().state().last_move_target.is_none());
    }

    #[test]
    fn test_scan_commits_cell_ahead() {
        let (session, _link, store) = session();
        store.set_world_size(4, 4);
        store.set_agent_position(session.name(), Position::new(1, 1, Direction::South));
        session.handle_line(r#"{"CMD":"scaned","MEASURE":{"GROUND":"WASSER","TEMP":4.5}}"#);
        assert_eq!(store.measurement(Coord::new(1, 2)).unwrap().ground, Ground::Wasser);
    }

    #[test]
    fn test_mvscaned_commits_new_position() {
        let (session, _link, store) = session();
        store.set_world_size(4, 1);
        store.set_agent_position(session.name(), Position::new(0, 0, Direction::East));
        assert!(store.try_reserve(session.name(), Coord::new(1, 0)));
        session.agent().state().last_move_target = Some(Coord::new(1, 0));

        session.handle_line(
            r#"{"CMD":"mvscaned","MEASURE":{"GROUND":"FELS","TEMP":1},"POSITION":{"X":1,"Y":0,"DIRECTION":"EAST"}}"#,
        );
        assert_eq!(
            store.agent_position(session.name()),
            Some(Position::new(1, 0, Direction::East))
        );
        assert_eq!(store.measurement(Coord::new(1, 0)).unwrap().ground, Ground::Fels);
        assert!(!store.is_reserved(Coord::new(1, 0)));
        assert!(session.agent().state().last_move_target.is_none());
    }

    #[test]
    fn test_crash_marks_target_impassable() {
        let (session, link, store) = session();
        store.set_world_size(10, 10);
        let target = Coord::new(3, 4);
        assert!(store.try_reserve(session.name(), target));
        session.agent().state().last_move_target = Some(target);
        link.clear();

        session.handle_line(r#"{"CMD":"crashed"}"#);
        assert_eq!(store.measurement(target).unwrap().ground, Ground::Nichts);
        assert!(!store.is_reserved(target));
        assert!(session.agent().is_terminated());

        assert!(session.send(&Outbound::Scan).is_err());
        assert!(link.sent().is_empty());
    }

    #[test]
    fn test_exit_and_error_terminate() {
        let (exited, _link, _store) = session();
        exited.handle_line(r#"{"CMD":"exit"}"#);
        assert!(exited.agent().is_terminated());

        let (failed, _link, _store) = session();
        failed.handle_line(r#"{"CMD":"error","MESSAGE":"boom"}"#);
        assert!(failed.agent().is_terminated());
    }

    #[test]
    fn test_unknown_is_ignored() {
        let (session, link, _store) = session();
        session.handle_line("{not json");
        session.handle_line(r#"{"CMD":"frobnicate"}"#);
        assert_eq!(session.agent().lifecycle(), Lifecycle::Connected);
        assert!(link.sent().is_empty());
    }

    #[test]
    fn test_status_updates_agent() {
        let (session, _link, _store) = session();
        session.handle_line(
            r#"{"CMD":"status","STATUS":{"TEMP":33.5,"ENERGY":64.0,"MESSAGE":"HEATER_ON|MOTOR=OK|WHEEL=worn"}}"#,
        );
        let info = session.info();
        assert_eq!(info.energy, 64);
        assert_eq!(info.work_temp, 33.5);
        assert_eq!(info.component_readings.get("WHEEL").map(String::as_str), Some("worn"));
        assert!(session.agent().state().status_seen);
    }

    #[test]
    fn test_low_energy_charges_when_autonomous() {
        let (session, link, _store) = session();
        session.agent().transition(Lifecycle::Exploring);
        let low = r#"{"CMD":"status","STATUS":{"TEMP":20,"ENERGY":10,"MESSAGE":"WARN_LOW_ENERGY"}}"#;

        session.handle_line(low);
        assert!(link.sent().is_empty());

        session.agent().set_autonomous(true);
        session.handle_line(low);
        assert_eq!(link.sent_commands(), vec!["charge"]);
        assert_eq!(session.agent().lifecycle(), Lifecycle::Charging);

        // Already charging: no second request.
        session.handle_line(low);
        assert_eq!(link.sent_commands().len(), 1);

        session.handle_line(r#"{"CMD":"charged","STATUS":{"TEMP":20,"ENERGY":100,"MESSAGE":"CHARGE_END"}}"#);
        assert_eq!(session.agent().lifecycle(), Lifecycle::Landed);
        assert_eq!(session.agent().state().energy, 100);
    }

    #[test]
    fn test_stuck_in_mud_alternates_rotation() {
        let (session, link, _store) = session();
        session.agent().set_autonomous(true);
        let rx = session.acks().arm(AckKind::Moved);
        let stuck = r#"{"CMD":"status","STATUS":{"MESSAGE":"STUCK_IN_MUD"}}"#;

        session.handle_line(stuck);
        assert_eq!(rx.try_recv(), Ok(Ack::Interrupted));
        session.handle_line(stuck);

        let sent = link.sent();
        assert_eq!(sent[0], r#"{"CMD":"rotate","ROTATION":"LEFT"}"#);
        assert_eq!(sent[1], r#"{"CMD":"rotate","ROTATION":"RIGHT"}"#);
        assert!(session.agent().state().needs_reattempt);
    }

    #[test]
    fn test_move_stop_interrupts_pending_move() {
        let (session, _link, _store) = session();
        let rx = session.acks().arm(AckKind::Moved);
        session.handle_line(r#"{"CMD":"status","STATUS":{"MESSAGE":"MOVE_STOP"}}"#);
        assert_eq!(rx.try_recv(), Ok(Ack::Interrupted));
        assert!(session.agent().state().needs_reattempt);
    }

    #[test]
    fn test_energy_fallback_only_without_status() {
        let mut config = StationConfig::default();
        config.simulation.local_energy_fallback = true;
        let (session, _link, store) = session_with(config);
        store.set_world_size(3, 1);

        let moved = r#"{"CMD":"moved","POSITION":{"X":1,"Y":0,"DIRECTION":"EAST"}}"#;
        session.handle_line(moved);
        assert_eq!(session.agent().state().energy, 98);

        session.handle_line(r#"{"CMD":"status","STATUS":{"ENERGY":50}}"#);
        session.handle_line(moved);
        assert_eq!(session.agent().state().energy, 50);
    }

    #[test]
    fn test_read_loop_handles_split_lines_and_tears_down() {
        let (session, _link, store) = session();
        session.start().unwrap();
        let input = concat!(
            "{\"CMD\":\"init\",\"SIZE\":{\"WIDTH\":2,",
            "\"HEIGHT\":2}}\n\n{\"CMD\":\"status\",\"STATUS\":{\"ENERGY\":77}}\n",
            "{\"CMD\":\"exit\"}"
        );
        session.run(Cursor::new(input.as_bytes().to_vec()));

        assert_eq!(store.world_size().unwrap().height, 2);
        assert_eq!(session.agent().state().energy, 77);
        assert!(session.agent().is_terminated());
    }

    #[test]
    fn test_teardown_unregisters_agent() {
        let (session, link, store) = session();
        session.start().unwrap();
        store.set_agent_position(session.name(), Position::new(0, 0, Direction::East));
        store.try_reserve(session.name(), Coord::new(1, 0));

        session.run(Cursor::new(Vec::new()));
        assert!(store.agent_position(session.name()).is_none());
        assert!(!store.is_reserved(Coord::new(1, 0)));
        assert!(link.is_closed());
    }

    #[test]
    fn test_manual_move_tracks_target() {
        let (session, link, store) = session();
        store.set_agent_position(session.name(), Position::new(2, 2, Direction::West));
        session.send_manual(Outbound::Move).unwrap();
        assert_eq!(session.agent().state().last_move_target, Some(Coord::new(1, 2)));
        assert_eq!(link.sent_commands(), vec!["move"]);
    }

    #[test]
    fn test_rotated_updates_facing_only() {
        let (session, link, store) = session();
        store.set_world_size(3, 3);
        session.agent().transition(Lifecycle::Exploring);
        store.set_agent_position(session.name(), Position::new(1, 1, Direction::North));
        let rx = session.acks().arm(AckKind::Rotated);

        session.handle_line(r#"{"CMD":"rotated","DIRECTION":"EAST"}"#);
        assert_eq!(rx.try_recv(), Ok(Ack::Done));
        assert_eq!(
            store.agent_position(session.name()),
            Some(Position::new(1, 1, Direction::East))
        );
        assert_eq!(store.exploration_stats().explored, 0);
        assert_eq!(session.agent().lifecycle(), Lifecycle::Exploring);
        assert!(link.sent().is_empty());
    }

    #[test]
    fn test_rotated_before_landing_sets_no_position() {
        let (session, _link, store) = session();
        session.handle_line(r#"{"CMD":"rotated","DIRECTION":"south"}"#);
        assert!(store.agent_position(session.name()).is_none());
    }

    #[test]
    fn test_move_direction_changed_resyncs_when_autonomous() {
        let (session, link, _store) = session();
        let changed = r#"{"CMD":"status","STATUS":{"MESSAGE":"MOVE_DIRECTION_CHANGED"}}"#;

        session.handle_line(changed);
        assert!(link.sent().is_empty());

        session.agent().set_autonomous(true);
        session.handle_line(changed);
        assert_eq!(link.sent_commands(), vec!["getpos"]);
    }
}
