//! Graceful shutdown gate.
//!
//! Every reconciliation pass enters the gate and holds a guard until it
//! returns. Closing the gate refuses new passes; [`ShutdownGate::drained`]
//! resolves once the in-flight counter reaches zero.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct GateState {
    closed: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Admission gate shared by every controller of the process.
#[derive(Debug, Clone, Default)]
pub struct ShutdownGate {
    state: Arc<GateState>,
}

/// Marks one in-flight pass. Dropping it leaves the gate.
#[derive(Debug)]
pub struct PassGuard {
    state: Arc<GateState>,
}

impl ShutdownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters the gate, or returns `None` once shutdown started.
    pub fn enter(&self) -> Option<PassGuard> {
        self.state.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.state.closed.load(Ordering::SeqCst) {
            // raced with close(): back out
            drop(PassGuard {
                state: Arc::clone(&self.state),
            });
            return None;
        }
        Some(PassGuard {
            state: Arc::clone(&self.state),
        })
    }

    /// Stops admitting new passes.
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.idle.notify_waiters();
    }

    pub fn is_accepting(&self) -> bool {
        !self.state.closed.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Waits until no pass is in flight.
    pub async fn drained(&self) {
        loop {
            let notified = self.state.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        if self.state.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.state.idle.notify_waiters();
        }
    }
}
