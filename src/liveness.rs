/// Liveness detection for the supervised emulator.
///
/// RetroArch gives no exit notification on its command channel, so the only
/// signal is whether a write to its stdin still succeeds. The `LivenessMonitor`
/// trait keeps that heuristic swappable for something better (an exit-status
/// watcher, say) without touching the supervisor.
use crate::lifecycle::{LifecycleState, SessionLifecycle};
use crate::protocol::{write_command, Command};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Watches one session and marks it exited when the child is gone.
pub trait LivenessMonitor: Send {
    /// Human-readable monitor name (e.g., "heartbeat").
    fn name(&self) -> &str;

    /// Start watching. The task must end once the session stops running.
    fn spawn(self: Box<Self>, lifecycle: SessionLifecycle) -> JoinHandle<()>;
}

/// Writes the heartbeat token to the child's stdin at a fixed interval.
///
/// A failed write, or one that does not complete within `stall`, means the
/// child has exited or stopped reading: the session is marked NotRunning.
pub struct HeartbeatMonitor<W> {
    stdin: Arc<Mutex<W>>,
    interval: Duration,
    stall: Duration,
}

impl<W> HeartbeatMonitor<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stdin: Arc<Mutex<W>>, interval: Duration, stall: Duration) -> Self {
        Self {
            stdin,
            interval,
            stall,
        }
    }

    async fn run(self, lifecycle: SessionLifecycle) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(
            session = lifecycle.session(),
            interval_ms = self.interval.as_millis() as u64,
            "heartbeat monitor started"
        );

        loop {
            ticker.tick().await;
            if lifecycle.state() == LifecycleState::NotRunning {
                break;
            }

            match tokio::time::timeout(self.stall, write_command(&self.stdin, Command::Heartbeat))
                .await
            {
                Ok(Ok(())) => lifecycle.confirm_alive(),
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "heartbeat write failed");
                    lifecycle.mark_exited("heartbeat write failed");
                    break;
                }
                Err(_) => {
                    tracing::warn!(
                        stall_ms = self.stall.as_millis() as u64,
                        "heartbeat write stalled, emulator unresponsive"
                    );
                    lifecycle.mark_exited("heartbeat write stalled");
                    break;
                }
            }
        }
    }
}

impl<W> LivenessMonitor for HeartbeatMonitor<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn name(&self) -> &str {
        "heartbeat"
    }

    fn spawn(self: Box<Self>, lifecycle: SessionLifecycle) -> JoinHandle<()> {
        tokio::spawn((*self).run(lifecycle))
    }
}
