/// Shared lifecycle state for the supervised emulator.
///
/// One `Lifecycle` cell lives for the whole supervisor. Each launch claims a
/// new session number and hands out a `SessionLifecycle`; every transition made
/// through it is ignored once a newer session has started, so tasks that
/// outlive their session can never touch the current one.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Lifecycle of the supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotRunning,
    Running,
    Stopping,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::NotRunning => "not running",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Value published on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Monotonic session number; 0 before the first launch.
    pub session: u64,
    pub state: LifecycleState,
}

#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<Snapshot>,
    heartbeats: AtomicU64,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot {
            session: 0,
            state: LifecycleState::NotRunning,
        });
        Self {
            tx,
            heartbeats: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        *self.tx.borrow()
    }

    pub fn state(&self) -> LifecycleState {
        self.snapshot().state
    }

    /// Heartbeats acknowledged during the current session.
    pub fn heartbeats(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    /// Subscribe to transition events.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// Claim a new session: NotRunning -> Running.
    ///
    /// Returns `None` if a session is already running or stopping.
    pub fn launch(self: &Arc<Self>) -> Option<SessionLifecycle> {
        let mut claimed = None;
        self.tx.send_if_modified(|snap| {
            if snap.state != LifecycleState::NotRunning {
                return false;
            }
            snap.session += 1;
            snap.state = LifecycleState::Running;
            claimed = Some(snap.session);
            true
        });

        let session = claimed?;
        self.heartbeats.store(0, Ordering::Relaxed);
        tracing::debug!(session, "lifecycle: session claimed");
        Some(SessionLifecycle {
            cell: Arc::clone(self),
            session,
        })
    }
}

/// Handle onto the lifecycle scoped to one session.
#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    cell: Arc<Lifecycle>,
    session: u64,
}

impl SessionLifecycle {
    pub fn session(&self) -> u64 {
        self.session
    }

    /// State of this session; `NotRunning` once superseded.
    pub fn state(&self) -> LifecycleState {
        let snap = self.cell.snapshot();
        if snap.session == self.session {
            snap.state
        } else {
            LifecycleState::NotRunning
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    fn transition(&self, next: impl FnOnce(LifecycleState) -> Option<LifecycleState>) -> bool {
        self.cell.tx.send_if_modified(|snap| {
            if snap.session != self.session {
                return false;
            }
            match next(snap.state) {
                Some(state) if state != snap.state => {
                    snap.state = state;
                    true
                }
                _ => false,
            }
        })
    }

    /// Running -> Stopping.
    pub fn begin_stop(&self) -> bool {
        self.transition(|state| (state == LifecycleState::Running).then_some(LifecycleState::Stopping))
    }

    /// Any state -> NotRunning. Returns `true` if this call made the change.
    pub fn mark_exited(&self, reason: &str) -> bool {
        let changed = self.transition(|_| Some(LifecycleState::NotRunning));
        if changed {
            tracing::info!(session = self.session, reason, "emulator no longer running");
        }
        changed
    }

    /// Record a successful heartbeat. Never resurrects a finished session.
    pub fn confirm_alive(&self) {
        if self.is_running() {
            self.cell.heartbeats.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Wait until this session is no longer running or stopping.
    ///
    /// Returns `false` if `limit` elapsed first.
    pub async fn wait_for_exit(&self, limit: Duration) -> bool {
        let mut rx = self.cell.subscribe();
        let session = self.session;
        let waited = tokio::time::timeout(
            limit,
            rx.wait_for(|snap| snap.session != session || snap.state == LifecycleState::NotRunning),
        )
        .await;
        matches!(waited, Ok(Ok(_)))
    }
}
