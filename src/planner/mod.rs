//! Autonomous exploration bound to one session.
//!
//! The planner runs on its own thread. It lands the robot if needed, then
//! repeatedly picks the next unexplored cell (row-major) and drives towards
//! it one action at a time. Every action is correlated with its
//! acknowledgement through the session's pending-request slot; waits are
//! sliced so that revoking autonomy or closing the session is seen promptly.
//!
//! ```text
//! wait for world size → land (retry) → loop {
//!     decide: Exit | Charge | Reattempt(target) | Goal(target)
//!     navigate: rotate / move / mvscan until arrived or budget spent
//! }
//! ```

pub mod navigation;

use crate::config::PlannerConfig;
use crate::protocol::{Coord, Direction, Outbound, Position, Rotation, WorldSize};
use crate::station::ack::{Ack, AckKind, WaitOutcome, sleep_cancellable, wait_for_ack};
use crate::station::agent::{AgentState, Lifecycle};
use crate::station::session::Session;
use crate::world::WorldStore;
use navigation::{Step, plan_step, step_budget};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Wait slices to back off when every direction is blocked.
const BOXED_BACKOFF_SLICES: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// Every cell of the world is measured
    Complete,
    /// Nothing left this planner can reach
    FrontierExhausted,
}

/// Next action of the exploration loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Exit(ExitReason),
    Charge,
    Reattempt(Coord),
    Goal(Coord),
}

/// Pick the next action. Prunes explored cells from the frontier.
pub fn decide(store: &WorldStore, state: &mut AgentState, low_energy_threshold: i32) -> Decision {
    state.frontier.retain(|c| !store.is_explored(*c));

    if store.is_fully_explored() {
        return Decision::Exit(ExitReason::Complete);
    }
    if state.frontier.is_empty() {
        return Decision::Exit(ExitReason::FrontierExhausted);
    }
    if state.energy < low_energy_threshold {
        return Decision::Charge;
    }
    if state.needs_reattempt {
        if let Some(target) = state.last_move_target {
            return Decision::Reattempt(target);
        }
        state.needs_reattempt = false;
    }
    match state.frontier.front() {
        Some(goal) => Decision::Goal(*goal),
        None => Decision::Exit(ExitReason::FrontierExhausted),
    }
}

/// First row-major cell that is free, not known void and reservable.
///
/// The returned cell is reserved for `agent`, except for the origin fallback.
pub fn select_landing_spot(store: &WorldStore, agent: &str, size: WorldSize) -> Coord {
    for cell in size.row_major() {
        if store.is_impassable(cell) || store.is_occupied_by_other(agent, cell) {
            continue;
        }
        if store.try_reserve(agent, cell) {
            return cell;
        }
    }
    Coord::new(0, 0)
}

/// Why a planner stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlannerExit {
    Finished(ExitReason),
    LandingFailed,
    Cancelled,
}

impl fmt::Display for PlannerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerExit::Finished(ExitReason::Complete) => f.write_str("world fully explored"),
            PlannerExit::Finished(ExitReason::FrontierExhausted) => f.write_str("frontier exhausted"),
            PlannerExit::LandingFailed => f.write_str("landing failed"),
            PlannerExit::Cancelled => f.write_str("cancelled"),
        }
    }
}

enum NavOutcome {
    Reached,
    Interrupted,
    Abandoned,
    Stopped,
}

enum Advance {
    Moved,
    Blocked,
    Interrupted,
    Stopped,
}

pub struct Planner {
    session: Arc<Session>,
    cancel: Arc<AtomicBool>,
    config: PlannerConfig,
    /// Directions found blocked at `blocked_at`
    blocked: HashSet<Direction>,
    blocked_at: Option<Coord>,
}

impl Planner {
    pub fn new(session: Arc<Session>, cancel: Arc<AtomicBool>) -> Self {
        let config = session.config().planner.clone();
        Self {
            session,
            cancel,
            config,
            blocked: HashSet::new(),
            blocked_at: None,
        }
    }

    fn name(&self) -> &str {
        self.session.name()
    }

    fn store(&self) -> &WorldStore {
        self.session.store()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
            || !self.session.agent().is_autonomous()
            || !self.session.is_active()
    }

    pub fn run(mut self) {
        info!("[{}] Planner started", self.name());
        let exit = self.explore();
        if matches!(exit, PlannerExit::Finished(_) | PlannerExit::LandingFailed) {
            self.session.agent().set_autonomous(false);
            let mut state = self.session.agent().state();
            if state.lifecycle == Lifecycle::Exploring {
                state.lifecycle = Lifecycle::Landed;
            }
        }
        self.release_unconfirmed();
        info!("[{}] Planner stopped: {}", self.name(), exit);
    }

    fn explore(&mut self) -> PlannerExit {
        let Some(size) = self.wait_for_world() else {
            return PlannerExit::Cancelled;
        };

        if !self.session.agent().lifecycle().is_landed() {
            match self.land(size) {
                Some(true) => {}
                Some(false) => return PlannerExit::LandingFailed,
                None => return PlannerExit::Cancelled,
            }
        }
        self.begin_exploring(size);

        loop {
            if self.cancelled() {
                return PlannerExit::Cancelled;
            }
            if !self.wait_out_charge() {
                return PlannerExit::Cancelled;
            }

            let decision = {
                let mut state = self.session.agent().state();
                decide(self.store(), &mut state, self.config.low_energy_threshold)
            };
            debug!("[{}] Decision: {:?}", self.name(), decision);

            match decision {
                Decision::Exit(reason) => {
                    info!("[{}] {}, sending exit", self.name(), self.store().exploration_stats());
                    if let Err(e) = self.session.send(&Outbound::Exit) {
                        warn!("[{}] Could not send exit: {}", self.name(), e);
                    }
                    return PlannerExit::Finished(reason);
                }
                Decision::Charge => {
                    if !self.charge() {
                        return PlannerExit::Cancelled;
                    }
                }
                Decision::Reattempt(target) => {
                    info!("[{}] Re-attempting move to {}", self.name(), target);
                    self.session.agent().state().needs_reattempt = false;
                    if !self.resync_after_loss(target) {
                        continue;
                    }
                    match self.navigate_to(target, size) {
                        NavOutcome::Stopped => return PlannerExit::Cancelled,
                        NavOutcome::Interrupted => {}
                        NavOutcome::Reached | NavOutcome::Abandoned => self.release_stale_target(),
                    }
                }
                Decision::Goal(target) => match self.navigate_to(target, size) {
                    NavOutcome::Reached => self.drop_goal(target),
                    NavOutcome::Abandoned => {
                        warn!("[{}] Giving up on {}", self.name(), target);
                        self.release_stale_target();
                        self.drop_goal(target);
                    }
                    NavOutcome::Interrupted => {}
                    NavOutcome::Stopped => return PlannerExit::Cancelled,
                },
            }
        }
    }

    fn wait_for_world(&self) -> Option<WorldSize> {
        loop {
            if self.cancelled() {
                return None;
            }
            if let Some(size) = self.store().world_size() {
                return Some(size);
            }
            thread::sleep(self.config.wait_slice());
        }
    }

    /// `Some(true)` once landed, `Some(false)` after the last failed attempt.
    fn land(&mut self, size: WorldSize) -> Option<bool> {
        for attempt in 1..=self.config.max_landing_attempts.max(1) {
            if self.cancelled() {
                return None;
            }
            let spot = select_landing_spot(self.store(), self.name(), size);
            let position = Position::new(spot.x, spot.y, self.config.landing_direction);
            {
                let mut state = self.session.agent().state();
                state.last_move_target = Some(spot);
                if state.lifecycle != Lifecycle::Terminated {
                    state.lifecycle = Lifecycle::AwaitingLandingAck;
                }
            }
            info!(
                "[{}] Landing at {} (attempt {}/{})",
                self.name(),
                position,
                attempt,
                self.config.max_landing_attempts
            );

            match self.request(AckKind::Landed, Outbound::land(position), self.config.ack_timeout()) {
                WaitOutcome::Ack(Ack::Done) => return Some(true),
                WaitOutcome::TimedOut | WaitOutcome::Ack(Ack::Interrupted) => {
                    warn!("[{}] No landing confirmation", self.name());
                    if self.landed_late() {
                        return Some(true);
                    }
                    self.release_stale_target();
                }
                WaitOutcome::Ack(Ack::Terminated) | WaitOutcome::Cancelled => return None,
            }
        }
        Some(false)
    }

    /// Ask for the position once more; a late LANDED is committed by the reply.
    fn landed_late(&self) -> bool {
        if self.cancelled() {
            return false;
        }
        self.resync();
        let landed = self.session.agent().lifecycle().is_landed();
        if landed {
            info!("[{}] Landing confirmed after timeout", self.name());
        }
        landed
    }

    fn begin_exploring(&mut self, size: WorldSize) {
        let store = Arc::clone(self.session.store());
        let mut state = self.session.agent().state();
        if state.lifecycle == Lifecycle::Landed {
            state.lifecycle = Lifecycle::Exploring;
        }
        if state.frontier.is_empty() {
            state.frontier = size.row_major().filter(|c| !store.is_explored(*c)).collect();
        }
        info!(
            "[{}] Exploring, {} cells on the frontier",
            self.session.name(),
            state.frontier.len()
        );
    }

    fn drop_goal(&self, target: Coord) {
        self.session
            .agent()
            .state()
            .frontier
            .retain(|c| *c != target);
    }

    /// Drop a reservation kept for a re-attempt that will no longer happen.
    ///
    /// A move or landing still awaiting its acknowledgement keeps the cell;
    /// the commit or crash releases it, and teardown releases everything.
    fn release_unconfirmed(&self) {
        if matches!(
            self.session.acks().pending_kind(),
            Some(AckKind::Moved | AckKind::Landed)
        ) {
            return;
        }
        self.session.agent().state().needs_reattempt = false;
        self.release_stale_target();
    }

    /// Forget an unconfirmed target and its reservation.
    fn release_stale_target(&self) {
        let target = self.session.agent().state().last_move_target.take();
        if let Some(target) = target {
            self.store().release_held(self.name(), target);
        }
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Arm the slot, send, and wait for the acknowledgement.
    fn request(&self, kind: AckKind, command: Outbound, timeout: Duration) -> WaitOutcome {
        let rx = self.session.acks().arm(kind);
        if let Err(e) = self.session.send(&command) {
            debug!("[{}] {} not sent: {}", self.name(), command, e);
            self.session.acks().clear();
            return WaitOutcome::Ack(Ack::Terminated);
        }
        let outcome = wait_for_ack(&rx, timeout, self.config.wait_slice(), || self.cancelled());
        if outcome == WaitOutcome::TimedOut {
            // Late replies still update the store but complete nothing.
            self.session.acks().clear();
        }
        outcome
    }

    fn resync(&self) -> bool {
        matches!(
            self.request(AckKind::Position, Outbound::Getpos, self.config.ack_timeout()),
            WaitOutcome::Ack(Ack::Done)
        )
    }

    /// Re-read the position after a lost or interrupted move. Returns false if
    /// the move turned out to have completed.
    fn resync_after_loss(&self, target: Coord) -> bool {
        if !self.resync() {
            return true;
        }
        let arrived = self
            .store()
            .agent_position(self.name())
            .is_some_and(|p| p.coord() == target);
        if arrived {
            self.release_stale_target();
            return false;
        }
        true
    }

    fn rotate(&self, rotation: Rotation) -> bool {
        match self.request(AckKind::Rotated, Outbound::rotate(rotation), self.config.ack_timeout()) {
            WaitOutcome::Ack(Ack::Done) | WaitOutcome::Ack(Ack::Interrupted) => true,
            WaitOutcome::TimedOut => {
                warn!("[{}] Rotation not confirmed, resyncing", self.name());
                self.resync();
                true
            }
            WaitOutcome::Ack(Ack::Terminated) | WaitOutcome::Cancelled => false,
        }
    }

    /// Returns false if cancelled.
    fn charge(&self) -> bool {
        let duration = self.config.charge_duration_secs;
        info!("[{}] Charging for {}s", self.name(), duration);
        self.session.agent().transition(Lifecycle::Charging);

        let outcome = self.request(AckKind::Charged, Outbound::charge(duration), self.config.charge_wait());
        match outcome {
            WaitOutcome::Ack(Ack::Done) | WaitOutcome::Ack(Ack::Interrupted) => {}
            WaitOutcome::TimedOut => warn!("[{}] Charge not confirmed", self.name()),
            WaitOutcome::Ack(Ack::Terminated) | WaitOutcome::Cancelled => return false,
        }
        self.finish_charging();
        true
    }

    /// Wait for a charge the session started on a low-energy warning.
    fn wait_out_charge(&self) -> bool {
        if self.session.agent().lifecycle() != Lifecycle::Charging {
            return true;
        }
        info!("[{}] Waiting for charge to finish", self.name());
        let deadline = Instant::now() + self.config.charge_wait();
        while self.session.agent().lifecycle() == Lifecycle::Charging && Instant::now() < deadline {
            if self.cancelled() {
                return false;
            }
            thread::sleep(self.config.wait_slice());
        }
        self.finish_charging();
        true
    }

    fn finish_charging(&self) {
        let mut state = self.session.agent().state();
        if matches!(state.lifecycle, Lifecycle::Charging | Lifecycle::Landed) {
            state.lifecycle = Lifecycle::Exploring;
        }
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    fn navigate_to(&mut self, target: Coord, size: WorldSize) -> NavOutcome {
        let budget = step_budget(size);
        let mut steps = 0;

        loop {
            if self.cancelled() {
                return NavOutcome::Stopped;
            }
            let Some(position) = self.store().agent_position(self.name()) else {
                if !self.resync() {
                    return NavOutcome::Interrupted;
                }
                continue;
            };
            if position.coord() == target || self.store().is_explored(target) {
                return NavOutcome::Reached;
            }
            if steps >= budget {
                return NavOutcome::Abandoned;
            }
            steps += 1;

            self.refresh_blocked(position.coord());
            match plan_step(position, target, size, &self.blocked) {
                Step::Arrived => return NavOutcome::Reached,
                Step::Boxed => {
                    debug!("[{}] Boxed in at {}, waiting", self.name(), position);
                    self.blocked.clear();
                    let backoff = self.config.wait_slice() * BOXED_BACKOFF_SLICES;
                    if !sleep_cancellable(backoff, self.config.wait_slice(), || self.cancelled()) {
                        return NavOutcome::Stopped;
                    }
                }
                Step::Turn(rotation) => {
                    if !self.rotate(rotation) {
                        return NavOutcome::Stopped;
                    }
                }
                Step::Forward(ahead) => match self.advance(position, ahead, size) {
                    Advance::Moved => {}
                    Advance::Blocked => {
                        debug!("[{}] {} blocked towards {}", self.name(), ahead, position.direction);
                        self.blocked.insert(position.direction);
                        if !self.rotate(Rotation::Right) {
                            return NavOutcome::Stopped;
                        }
                    }
                    Advance::Interrupted => return NavOutcome::Interrupted,
                    Advance::Stopped => return NavOutcome::Stopped,
                },
            }
        }
    }

    fn refresh_blocked(&mut self, here: Coord) {
        if self.blocked_at != Some(here) {
            self.blocked.clear();
            self.blocked_at = Some(here);
        }
    }

    /// Try to enter `ahead`.
    fn advance(&self, position: Position, ahead: Coord, size: WorldSize) -> Advance {
        let name = self.name();
        let store = self.store();

        if !size.contains(ahead) || store.is_impassable(ahead) {
            return Advance::Blocked;
        }
        if !store.try_reserve(name, ahead) {
            return Advance::Blocked;
        }

        if self.config.scan_before_entering && !store.is_explored(ahead) {
            match self.request(AckKind::Scanned, Outbound::Scan, self.config.ack_timeout()) {
                WaitOutcome::Ack(Ack::Done) => {}
                WaitOutcome::TimedOut | WaitOutcome::Ack(Ack::Interrupted) => {
                    store.release_held(name, ahead);
                    return Advance::Interrupted;
                }
                WaitOutcome::Ack(Ack::Terminated) | WaitOutcome::Cancelled => {
                    store.release_held(name, ahead);
                    return Advance::Stopped;
                }
            }
            if store.is_impassable(ahead) {
                store.release_held(name, ahead);
                return Advance::Blocked;
            }
        }

        let command = if store.is_explored(ahead) {
            Outbound::Move
        } else {
            Outbound::Mvscan
        };
        self.session.agent().state().last_move_target = Some(ahead);
        debug!("[{}] {} from {} into {}", name, command, position, ahead);

        match self.request(AckKind::Moved, command, self.config.ack_timeout()) {
            WaitOutcome::Ack(Ack::Done) => Advance::Moved,
            WaitOutcome::Ack(Ack::Interrupted) => Advance::Interrupted,
            WaitOutcome::TimedOut => {
                warn!("[{}] Move to {} not confirmed", name, ahead);
                self.session.agent().state().needs_reattempt = true;
                Advance::Interrupted
            }
            WaitOutcome::Ack(Ack::Terminated) | WaitOutcome::Cancelled => Advance::Stopped,
        }
    }
}

/// Running planner thread.
pub struct PlannerHandle {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl PlannerHandle {
    pub fn spawn(session: Arc<Session>) -> std::io::Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let name = format!("planner-{}", session.name());
        let planner = Planner::new(session, Arc::clone(&cancel));
        let thread = thread::Builder::new().name(name).spawn(move || planner.run())?;
        Ok(Self { cancel, thread })
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Cancel and join. Never joins from the planner's own thread.
    pub fn stop(self) {
        self.cancel.store(true, Ordering::Relaxed);
        if self.thread.thread().id() == thread::current().id() {
            return;
        }
        if self.thread.join().is_err() {
            warn!("Planner thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StationConfig;
    use crate::protocol::{Ground, Measure};
    use crate::station::link::MockLink;

    fn sand() -> Measure {
        Measure::new(Ground::Sand, 10.0)
    }

    fn state_with_frontier(size: WorldSize) -> AgentState {
        AgentState {
            frontier: size.row_major().collect(),
            ..AgentState::default()
        }
    }

    #[test]
    fn test_decide_exit_when_complete() {
        let store = WorldStore::new();
        let size = WorldSize::new(4, 1);
        store.set_world_size(4, 1);
        let mut state = state_with_frontier(size);

        store.record_measurement(Coord::new(0, 0), sand());
        assert_eq!(decide(&store, &mut state, 20), Decision::Goal(Coord::new(1, 0)));

        for x in 1..4 {
            store.record_measurement(Coord::new(x, 0), sand());
        }
        assert_eq!(
            decide(&store, &mut state, 20),
            Decision::Exit(ExitReason::Complete)
        );
        assert!(state.frontier.is_empty());
    }

    #[test]
    fn test_decide_exhausted_frontier() {
        let store = WorldStore::new();
        store.set_world_size(2, 2);
        let mut state = AgentState::default();
        assert_eq!(
            decide(&store, &mut state, 20),
            Decision::Exit(ExitReason::FrontierExhausted)
        );
    }

    #[test]
    fn test_decide_charge_below_threshold() {
        let store = WorldStore::new();
        let size = WorldSize::new(2, 2);
        store.set_world_size(2, 2);
        let mut state = state_with_frontier(size);
        state.set_energy(19);
        assert_eq!(decide(&store, &mut state, 20), Decision::Charge);
        state.set_energy(20);
        assert_eq!(decide(&store, &mut state, 20), Decision::Goal(Coord::new(0, 0)));
    }

    #[test]
    fn test_decide_reattempt_first() {
        let store = WorldStore::new();
        let size = WorldSize::new(3, 3);
        store.set_world_size(3, 3);
        let mut state = state_with_frontier(size);
        state.needs_reattempt = true;
        state.last_move_target = Some(Coord::new(2, 1));
        assert_eq!(
            decide(&store, &mut state, 20),
            Decision::Reattempt(Coord::new(2, 1))
        );

        state.last_move_target = None;
        assert_eq!(decide(&store, &mut state, 20), Decision::Goal(Coord::new(0, 0)));
        assert!(!state.needs_reattempt);
    }

    #[test]
    fn test_landing_spot_skips_occupied_and_void() {
        let store = WorldStore::new();
        let size = WorldSize::new(3, 2);
        store.set_world_size(3, 2);
        store.set_agent_position("other", Position::new(0, 0, Direction::East));
        store.record_measurement(Coord::new(1, 0), Measure::impassable());

        let spot = select_landing_spot(&store, "me", size);
        assert_eq!(spot, Coord::new(2, 0));
        assert_eq!(store.reservation_holder(spot).as_deref(), Some("me"));

        // Next agent skips the reserved cell.
        assert_eq!(select_landing_spot(&store, "third", size), Coord::new(0, 1));
    }

    #[test]
    fn test_landing_spot_fallback_origin() {
        let store = WorldStore::new();
        let size = WorldSize::new(1, 1);
        store.set_world_size(1, 1);
        store.set_agent_position("other", Position::new(0, 0, Direction::North));
        assert_eq!(select_landing_spot(&store, "me", size), Coord::new(0, 0));
    }

    #[test]
    fn test_planner_stops_when_autonomy_revoked() {
        let link = MockLink::new();
        let session = Session::new(
            "Robot-plan0001",
            Box::new(link.clone()),
            Arc::new(WorldStore::new()),
            Arc::new(StationConfig::default()),
            Arc::new(AtomicBool::new(true)),
        );
        session.set_autonomous(true);
        assert!(session.planner_active());

        // No world size yet: the planner idles until stopped.
        session.set_autonomous(false);
        assert!(!session.planner_active());
        assert!(link.sent().is_empty());
    }

    fn planner_session(config: StationConfig) -> (Arc<Session>, MockLink, Arc<WorldStore>) {
        let link = MockLink::new();
        let store = Arc::new(WorldStore::new());
        let session = Session::new(
            "Robot-plan0002",
            Box::new(link.clone()),
            Arc::clone(&store),
            Arc::new(config),
            Arc::new(AtomicBool::new(true)),
        );
        (session, link, store)
    }

    fn fast_config(ack_timeout_ms: u64) -> StationConfig {
        let mut config = StationConfig::default();
        config.planner.ack_timeout_ms = ack_timeout_ms;
        config.planner.wait_slice_ms = 5;
        config
    }

    /// Robot standing on a measured (0,0) facing east.
    fn land_at_origin(session: &Session, store: &WorldStore, width: i32) {
        store.set_world_size(width, 1);
        store.register_agent(session.name());
        store.set_agent_position(session.name(), Position::new(0, 0, Direction::East));
        store.record_measurement(Coord::new(0, 0), sand());
        session.agent().transition(Lifecycle::Landed);
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn count(link: &MockLink, command: &str) -> usize {
        link.sent_commands().iter().filter(|c| *c == command).count()
    }

    #[test]
    fn test_revoking_autonomy_releases_reattempt_reservation() {
        let (session, link, store) = planner_session(fast_config(300));
        land_at_origin(&session, &store, 3);
        let target = Coord::new(1, 0);

        session.set_autonomous(true);
        // The mvscan is never answered: timeout, then a position resync.
        assert!(wait_until(Duration::from_secs(5), || count(&link, "getpos") > 0));
        assert_eq!(store.reservation_holder(target).as_deref(), Some(session.name()));

        session.set_autonomous(false);
        assert_eq!(link.sent_commands()[0], "mvscan");
        assert_eq!(store.reservation_holder(target), None);
        assert!(!session.agent().state().needs_reattempt);
        assert!(session.agent().state().last_move_target.is_none());
        assert_eq!(session.agent().lifecycle(), Lifecycle::Landed);
    }

    #[test]
    fn test_revoking_autonomy_keeps_in_flight_move_reserved() {
        let (session, link, store) = planner_session(fast_config(5000));
        land_at_origin(&session, &store, 3);
        let target = Coord::new(1, 0);

        session.set_autonomous(true);
        assert!(wait_until(Duration::from_secs(5), || count(&link, "mvscan") > 0));
        session.set_autonomous(false);
        assert_eq!(store.reservation_holder(target).as_deref(), Some(session.name()));

        // The late reply still commits and frees the cell.
        session.handle_line(
            r#"{"CMD":"mvscaned","MEASURE":{"GROUND":"SAND","TEMP":9},"POSITION":{"X":1,"Y":0,"DIRECTION":"EAST"}}"#,
        );
        assert_eq!(store.reservation_holder(target), None);
        assert!(store.is_explored(target));
    }

    #[test]
    fn test_finished_planner_returns_robot_to_landed() {
        let (session, link, store) = planner_session(fast_config(300));
        land_at_origin(&session, &store, 2);
        store.record_measurement(Coord::new(1, 0), sand());

        session.set_autonomous(true);
        assert!(wait_until(Duration::from_secs(5), || !session.planner_active()));
        assert_eq!(link.sent_commands(), vec!["exit"]);
        assert!(!session.agent().is_autonomous());
        assert_eq!(session.agent().lifecycle(), Lifecycle::Landed);
    }

    #[test]
    fn test_late_landing_is_not_repeated() {
        let (session, link, store) = planner_session(fast_config(400));
        session.start().unwrap();
        session.handle_line(r#"{"CMD":"init","SIZE":{"WIDTH":3,"HEIGHT":1}}"#);
        session.set_autonomous(true);
        assert!(wait_until(Duration::from_secs(5), || count(&link, "land") > 0));

        // Confirmation arrives after the landing timeout.
        thread::sleep(Duration::from_millis(600));
        session.handle_line(r#"{"CMD":"landed","MEASURE":{"GROUND":"SAND","TEMP":9}}"#);
        session.handle_line(r#"{"CMD":"pos","POSITION":{"X":0,"Y":0,"DIRECTION":"EAST"}}"#);

        assert!(wait_until(Duration::from_secs(5), || count(&link, "mvscan") > 0));
        session.set_autonomous(false);
        assert_eq!(count(&link, "land"), 1);
        assert!(store.is_explored(Coord::new(0, 0)));
    }
}
