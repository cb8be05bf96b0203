//! LifecycleController - Stopped → Starting → Ready → Stopping → Stopped

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Engine session lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Ready,
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Ready => "ready",
            LifecycleState::Stopping => "stopping",
        };
        write!(f, "{}", s)
    }
}

/// Why a start cycle never reached Ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapFailure {
    pub cycle: u64,
    pub reason: String,
}

struct Inner {
    state: LifecycleState,
    cycle: u64,
    observers: Vec<mpsc::UnboundedSender<LifecycleState>>,
    last_failure: Option<BootstrapFailure>,
}

impl Inner {
    fn set_state(&mut self, to: LifecycleState) {
        info!(from = %self.state, %to, cycle = self.cycle, "Lifecycle transition");
        self.state = to;
        self.observers.retain(|tx| tx.send(to).is_ok());
    }
}

/// Gatekeeper for engine access
///
/// Every start cycle gets a number; transitions that name a stale cycle are
/// refused, so a late bootstrap can never revive a cycle that was abandoned.
pub struct LifecycleController {
    inner: Mutex<Inner>,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: LifecycleState::Stopped,
                cycle: 0,
                observers: Vec::new(),
                last_failure: None,
            }),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    /// Number of the current (or most recent) start cycle
    pub fn cycle(&self) -> u64 {
        self.inner.lock().cycle
    }

    /// Observe the current state followed by every later transition
    pub fn observe(&self) -> LifecycleObserver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        // Receiver is alive, send cannot fail
        let _ = tx.send(inner.state);
        inner.observers.push(tx);
        LifecycleObserver { rx }
    }

    /// Stopped → Starting; returns the new cycle number
    pub fn begin_start(&self) -> Option<u64> {
        let mut inner = self.inner.lock();
        if inner.state != LifecycleState::Stopped {
            warn!(state = %inner.state, "start() ignored: lifecycle is not stopped");
            return None;
        }
        inner.cycle += 1;
        inner.last_failure = None;
        inner.set_state(LifecycleState::Starting);
        Some(inner.cycle)
    }

    /// Ready → Stopping; returns the cycle being stopped
    pub fn begin_stop(&self) -> Option<u64> {
        let mut inner = self.inner.lock();
        if inner.state != LifecycleState::Ready {
            warn!(state = %inner.state, "stop() ignored: lifecycle is not ready");
            return None;
        }
        inner.set_state(LifecycleState::Stopping);
        Some(inner.cycle)
    }

    /// Move `from` → `to` if `cycle` is still current and the state matches
    pub fn transition(&self, cycle: u64, from: LifecycleState, to: LifecycleState) -> bool {
        let mut inner = self.inner.lock();
        if inner.cycle != cycle || inner.state != from {
            debug!(cycle, current_cycle = inner.cycle, state = %inner.state, %from, %to, "transition refused");
            return false;
        }
        inner.set_state(to);
        true
    }

    /// True while `cycle` is the current cycle and in `state`
    pub fn is_current(&self, cycle: u64, state: LifecycleState) -> bool {
        let inner = self.inner.lock();
        inner.cycle == cycle && inner.state == state
    }

    /// Starting → Stopped with a recorded failure
    pub fn fail_start(&self, cycle: u64, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let mut inner = self.inner.lock();
        if inner.cycle != cycle || inner.state != LifecycleState::Starting {
            debug!(cycle, state = %inner.state, %reason, "fail_start ignored for stale cycle");
            return false;
        }
        error!(cycle, %reason, "Engine bootstrap failed");
        inner.last_failure = Some(BootstrapFailure { cycle, reason });
        inner.set_state(LifecycleState::Stopped);
        true
    }

    /// The failure that ended the most recent start cycle, if any
    pub fn last_failure(&self) -> Option<BootstrapFailure> {
        self.inner.lock().last_failure.clone()
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream of lifecycle states, starting with the state at subscription
pub struct LifecycleObserver {
    rx: mpsc::UnboundedReceiver<LifecycleState>,
}

impl LifecycleObserver {
    pub async fn next(&mut self) -> Option<LifecycleState> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<LifecycleState> {
        self.rx.try_recv().ok()
    }

    /// Wait until `target` is observed; false if the controller went away
    pub async fn wait_for(&mut self, target: LifecycleState) -> bool {
        while let Some(state) = self.rx.recv().await {
            if state == target {
                return true;
            }
        }
        false
    }

    /// All states observed so far without waiting
    pub fn drain(&mut self) -> Vec<LifecycleState> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}
