/// Output collector: moves the child's stderr into the response queue.
///
/// Lines are decoded lossily (RetroArch happily logs non-UTF-8 file names),
/// heartbeat echoes are dropped, everything else is queued in arrival order.
/// End of stream or a read error marks the session as exited and closes the
/// queue so blocked readers wake up.
use crate::lifecycle::SessionLifecycle;
use crate::protocol::is_heartbeat_echo;
use crate::queue::ResponseQueue;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

pub fn spawn_collector<R>(
    stderr: R,
    queue: Arc<ResponseQueue>,
    lifecycle: SessionLifecycle,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    lifecycle.mark_exited("stderr closed");
                    break;
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    if is_heartbeat_echo(&line) {
                        continue;
                    }
                    tracing::debug!(session = lifecycle.session(), "{line}");
                    queue.push(line);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read emulator stderr");
                    lifecycle.mark_exited("stderr read failed");
                    break;
                }
            }
        }
        queue.close();
    })
}

/// Consume stdout so the child never blocks on a full pipe.
pub fn spawn_drain<R>(stdout: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    tracing::trace!(stream = "stdout", "{}", line.trim_end());
                }
                Err(e) => {
                    tracing::debug!(error = %e, "failed to read emulator stdout");
                    break;
                }
            }
        }
    })
}
