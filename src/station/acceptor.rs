//! TCP accept loop.
//!
//! The listener is non-blocking and polled so the loop can observe the
//! running flag. Each accepted connection gets its own session thread.

use super::link::TcpLink;
use super::registry::{SessionRegistry, unique_name};
use super::session::Session;
use crate::config::StationConfig;
use crate::error::Result;
use crate::world::WorldStore;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

pub struct Acceptor {
    listener: TcpListener,
    store: Arc<WorldStore>,
    registry: Arc<SessionRegistry>,
    config: Arc<StationConfig>,
    running: Arc<AtomicBool>,
    session_threads: Vec<JoinHandle<()>>,
}

impl Acceptor {
    pub fn new(
        listener: TcpListener,
        store: Arc<WorldStore>,
        registry: Arc<SessionRegistry>,
        config: Arc<StationConfig>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            listener,
            store,
            registry,
            config,
            running,
            session_threads: Vec::new(),
        }
    }

    /// Accept until the running flag clears, then close every session.
    pub fn run(mut self) {
        let poll = self.config.network.accept_poll();

        while self.running.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = self.spawn_session(stream, addr) {
                        error!("Failed to start session for {}: {}", addr, e);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(poll);
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    thread::sleep(poll);
                }
            }
            self.session_threads.retain(|h| !h.is_finished());
        }

        info!("Acceptor stopping, closing {} session(s)", self.registry.len());
        for session in self.registry.all() {
            session.close();
        }
        for handle in self.session_threads.drain(..) {
            if handle.join().is_err() {
                warn!("Session thread panicked");
            }
        }
        debug!("Acceptor stopped");
    }

    fn spawn_session(&mut self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        // Accepted sockets may inherit the listener's non-blocking mode.
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.config.network.read_timeout()))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }
        let reader = stream.try_clone()?;

        let name = unique_name(&self.registry);
        info!("[{}] Robot connected from {}", name, addr);

        let session = Session::new(
            name.clone(),
            Box::new(TcpLink::new(stream)),
            Arc::clone(&self.store),
            Arc::clone(&self.config),
            Arc::clone(&self.running),
        );
        self.registry.insert(Arc::clone(&session));

        if let Err(e) = session.start() {
            self.registry.remove(&name);
            self.store.unregister_agent(&name);
            return Err(e);
        }

        let registry = Arc::clone(&self.registry);
        let handle = thread::Builder::new()
            .name(format!("session-{}", name))
            .spawn(move || {
                session.run(reader);
                registry.remove(session.name());
            })?;
        self.session_threads.push(handle);
        Ok(())
    }
}
