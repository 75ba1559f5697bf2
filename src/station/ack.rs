//! Pending-request slot correlating a command with its acknowledgement.
//!
//! The planner arms the slot *before* sending a command, the session read
//! loop completes it when the matching event arrives. At most one request is
//! pending per session; arming again drops the previous waiter.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Which inbound event completes a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckKind {
    /// Landing measurement committed at the reported position
    Landed,
    Position,
    Scanned,
    /// `moved` or `mvscaned`
    Moved,
    Rotated,
    Charged,
}

/// How a pending request ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ack {
    Done,
    /// The robot stopped before completing (mud, move stop)
    Interrupted,
    /// The session ended (crash, exit, error, disconnect)
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Ack(Ack),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Default)]
pub struct AckSlot {
    pending: Mutex<Option<(AckKind, Sender<Ack>)>>,
}

impl AckSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the next `kind` acknowledgement.
    pub fn arm(&self, kind: AckKind) -> Receiver<Ack> {
        let (tx, rx) = bounded(1);
        *self.pending.lock() = Some((kind, tx));
        rx
    }

    /// Complete the pending request if it is waiting for `kind`.
    pub fn complete(&self, kind: AckKind, ack: Ack) -> bool {
        let mut pending = self.pending.lock();
        match pending.as_ref() {
            Some((expected, _)) if *expected == kind => {
                if let Some((_, tx)) = pending.take() {
                    // Receiver may already have given up.
                    let _ = tx.try_send(ack);
                }
                true
            }
            _ => false,
        }
    }

    /// Complete whatever is pending.
    pub fn fail_any(&self, ack: Ack) {
        if let Some((kind, tx)) = self.pending.lock().take() {
            tracing::debug!("Completing pending {:?} request with {:?}", kind, ack);
            let _ = tx.try_send(ack);
        }
    }

    /// Drop the pending request without completing it.
    pub fn clear(&self) {
        self.pending.lock().take();
    }

    pub fn pending_kind(&self) -> Option<AckKind> {
        self.pending.lock().as_ref().map(|(kind, _)| *kind)
    }
}

/// Wait on an armed receiver in `slice` steps so `cancelled` is observed.
pub fn wait_for_ack(
    rx: &Receiver<Ack>,
    timeout: Duration,
    slice: Duration,
    cancelled: impl Fn() -> bool,
) -> WaitOutcome {
    let deadline = Instant::now() + timeout;
    loop {
        if cancelled() {
            return WaitOutcome::Cancelled;
        }
        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        match rx.recv_timeout(slice.min(deadline - now)) {
            Ok(ack) => return WaitOutcome::Ack(ack),
            Err(RecvTimeoutError::Timeout) => continue,
            // Slot re-armed or dropped by teardown.
            Err(RecvTimeoutError::Disconnected) => return WaitOutcome::Ack(Ack::Terminated),
        }
    }
}

/// Sleep up to `duration` in `slice` steps, returning false if cancelled.
pub fn sleep_cancellable(duration: Duration, slice: Duration, cancelled: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(slice.min(deadline - now));
    }
}
