//! Ground station: listener, robot sessions and the operator API.
//!
//! # Thread Layout
//!
//! ```text
//! main ──── Station::start ──► acceptor thread ──► session-<name> (read loop)
//!                                                   └─► planner-<name>
//! ```
//!
//! Sessions share the [`WorldStore`]; each planner only talks to its own
//! session. Shutdown runs in order: stop accepting, close every session
//! (planner first, then socket), join the threads, write the snapshot.

pub mod acceptor;
pub mod ack;
pub mod agent;
pub mod link;
pub mod registry;
pub mod session;

pub use agent::Lifecycle;
pub use session::{Session, SessionInfo};

use crate::config::StationConfig;
use crate::error::{Result, StationError};
use crate::protocol::{Coord, Measure, Outbound, Position};
use crate::world::{ExplorationStats, JsonLinesSink, LogSink, WorldSnapshot, WorldStore};
use acceptor::Acceptor;
use parking_lot::Mutex;
use registry::SessionRegistry;
use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

pub struct Station {
    config: Arc<StationConfig>,
    store: Arc<WorldStore>,
    registry: Arc<SessionRegistry>,
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl Station {
    /// Bind the listener and start accepting robots.
    pub fn start(config: StationConfig) -> Result<Self> {
        let addr = config.network.bind_address.clone();
        let listener = TcpListener::bind(&addr).map_err(|source| StationError::Bind {
            addr: addr.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let store = Arc::new(WorldStore::new());
        store.add_sink(Arc::new(LogSink));
        if let Some(path) = &config.output.event_log_path {
            store.add_sink(Arc::new(JsonLinesSink::open(Path::new(path))?));
            info!("Logging world events to {}", path);
        }

        let config = Arc::new(config);
        let registry = Arc::new(SessionRegistry::new());
        let running = Arc::new(AtomicBool::new(true));

        let acceptor = Acceptor::new(
            listener,
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&config),
            Arc::clone(&running),
        );
        let handle = thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || acceptor.run())?;

        info!("Station listening on {}", local_addr);

        Ok(Self {
            config,
            store,
            registry,
            running,
            local_addr,
            acceptor: Mutex::new(Some(handle)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<WorldStore> {
        &self.store
    }

    /// Flag cleared on shutdown; signal handlers may clear it too.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Operator API
    // ------------------------------------------------------------------

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.registry.list()
    }

    pub fn get_session(&self, name: &str) -> Result<SessionInfo> {
        self.session(name).map(|s| s.info())
    }

    pub fn set_autonomous(&self, name: &str, enabled: bool) -> Result<()> {
        let session = self.session(name)?;
        if session.agent().is_terminated() {
            return Err(StationError::SessionTerminated(name.to_string()));
        }
        session.set_autonomous(enabled);
        Ok(())
    }

    /// Validate and forward an encoded station command.
    pub fn send_manual_command(&self, name: &str, encoded: &str) -> Result<()> {
        let command = Outbound::parse(encoded)?;
        self.session(name)?.send_manual(command)
    }

    pub fn exploration_stats(&self) -> ExplorationStats {
        self.store.exploration_stats()
    }

    pub fn explored_fields(&self) -> BTreeMap<Coord, Measure> {
        self.store.explored_fields()
    }

    pub fn agent_positions(&self) -> BTreeMap<String, Position> {
        self.store.agent_positions()
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        self.store.snapshot()
    }

    fn session(&self, name: &str) -> Result<Arc<Session>> {
        self.registry
            .get(name)
            .ok_or_else(|| StationError::SessionNotFound(name.to_string()))
    }

    /// Stop accepting, close every session, join, write the snapshot.
    ///
    /// Safe to call more than once; only the first call does the work.
    pub fn shutdown(&self) -> Result<()> {
        self.running.store(false, Ordering::Relaxed);
        let Some(handle) = self.acceptor.lock().take() else {
            return Ok(());
        };
        info!("Station shutting down");
        if handle.join().is_err() {
            warn!("Acceptor thread panicked");
        }

        let stats = self.store.exploration_stats();
        info!("Final state: {}", stats);

        if let Some(path) = &self.config.output.snapshot_path {
            self.store.snapshot().write_to(Path::new(path))?;
            info!("Snapshot written to {}", path);
        }
        Ok(())
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Shutdown failed: {}", e);
        }
    }
}
