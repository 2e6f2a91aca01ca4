/// Signal handling for graceful shutdown.
///
/// SIGINT (Ctrl-C) and SIGTERM both request a clean stop: the console loop
/// exits and the emulator is sent QUIT before the harness returns.
use tokio::signal::unix::{signal, Signal, SignalKind};

pub struct SignalHandler {
    sigint: Signal,
    sigterm: Signal,
}

impl SignalHandler {
    pub fn install() -> std::io::Result<SignalHandler> {
        Ok(SignalHandler {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next shutdown signal and return its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigterm.recv() => "SIGTERM",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_install_and_no_spurious_signal() {
        let mut handler = SignalHandler::install().unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(50), handler.recv()).await;
        assert!(waited.is_err());
    }
}
