//! Quorum gate that holds the benchmark until enough members have joined.
//!
//! The gate is a single-notification rendezvous: one [`GateWaiter`] waits,
//! and the [`MembershipGate`] releases it at most once. Member counts are
//! owned by the consensus layer; the join path feeds each new count to
//! [`MembershipGate::observe`].

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};

/// Release side of the gate, shared with the join handler.
#[derive(Debug)]
pub struct MembershipGate {
    target: usize,
    release: Mutex<Option<oneshot::Sender<()>>>,
    released: AtomicBool,
}

/// Wait side of the gate, owned by the benchmark driver.
#[derive(Debug)]
pub struct GateWaiter {
    target: usize,
    rx: oneshot::Receiver<()>,
}

impl MembershipGate {
    /// Creates a gate waiting for `target` members.
    ///
    /// A target of one (the bootstrapping node alone) or zero starts released.
    pub fn new(target: usize) -> (Self, GateWaiter) {
        let (tx, rx) = oneshot::channel();
        let gate = Self {
            target,
            release: Mutex::new(Some(tx)),
            released: AtomicBool::new(false),
        };

        if target <= 1 {
            gate.fire();
        }

        (gate, GateWaiter { target, rx })
    }

    /// Feeds the current member count; returns `true` if this call released
    /// the gate.
    pub fn observe(&self, member_count: usize) -> bool {
        if member_count < self.target {
            debug!(
                members = member_count,
                quorum = self.target,
                "Waiting for more members"
            );
            return false;
        }
        self.fire()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn target(&self) -> usize {
        self.target
    }

    fn fire(&self) -> bool {
        let Some(tx) = self.release.lock().take() else {
            return false;
        };
        self.released.store(true, Ordering::Release);

        if tx.send(()).is_err() {
            debug!("Membership gate released with no waiter attached");
        }
        info!(quorum = self.target, "Membership gate released");
        true
    }
}

impl GateWaiter {
    /// Blocks until the gate releases.
    ///
    /// There is no timeout: a cluster that never reaches its target keeps the
    /// caller waiting. Errors only if the gate is dropped unreleased.
    pub async fn wait(self) -> CoreResult<()> {
        let target = self.target;
        self.rx.await.map_err(|_| CoreError::GateClosed { target })
    }
}
