use crate::protocol::Command;
use std::path::PathBuf;
use std::time::Duration;

/// Errors reported by the supervisor and its command channel.
#[derive(Debug)]
pub enum SupervisorError {
    /// The content file passed to `start` does not exist.
    AssetNotFound { path: PathBuf },
    /// The libretro core passed to `start` does not exist.
    PluginNotFound { path: PathBuf },
    /// `start` while a session is running or stopping.
    AlreadyRunning,
    /// An interactive command while no session is running.
    NotRunning,
    /// Failed to spawn the emulator.
    Spawn { source: std::io::Error },
    /// The emulator exited during the launch settling interval.
    LaunchFailed,
    /// Failed to write a command to the emulator's stdin.
    Write {
        command: Command,
        source: std::io::Error,
    },
    /// Failed to read, write or delete a save-state file.
    StateFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The reply line did not match what the command expects.
    Protocol { command: Command, line: String },
    /// The emulator answered with an explicit failure.
    Rejected { command: Command, line: String },
    /// No reply line arrived in time.
    ResponseTimeout { command: Command, waited: Duration },
    /// The emulator's output ended while a reply was pending.
    Unresponsive { command: Command },
    /// The emulator did not exit after QUIT and was killed.
    ShutdownTimeout { waited: Duration },
}

impl SupervisorError {
    /// Rejected synchronously without touching the child.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SupervisorError::AssetNotFound { .. }
                | SupervisorError::PluginNotFound { .. }
                | SupervisorError::AlreadyRunning
                | SupervisorError::NotRunning
        )
    }
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::AssetNotFound { path } => {
                write!(f, "content file not found: {}", path.display())
            }
            SupervisorError::PluginNotFound { path } => {
                write!(f, "libretro core not found: {}", path.display())
            }
            SupervisorError::AlreadyRunning => write!(f, "emulator is already running"),
            SupervisorError::NotRunning => write!(f, "emulator is not running"),
            SupervisorError::Spawn { source } => {
                write!(f, "failed to spawn emulator: {}", source)
            }
            SupervisorError::LaunchFailed => {
                write!(f, "emulator exited while starting")
            }
            SupervisorError::Write { command, source } => {
                write!(f, "failed to send {command}: {source}")
            }
            SupervisorError::StateFile { path, source } => {
                write!(f, "save state file {}: {}", path.display(), source)
            }
            SupervisorError::Protocol { command, line } => {
                write!(f, "unexpected reply to {command}: {line:?}")
            }
            SupervisorError::Rejected { command, line } => {
                write!(f, "emulator rejected {command}: {line:?}")
            }
            SupervisorError::ResponseTimeout { command, waited } => {
                write!(f, "no reply to {command} within {}ms", waited.as_millis())
            }
            SupervisorError::Unresponsive { command } => {
                write!(f, "emulator output ended while waiting for reply to {command}")
            }
            SupervisorError::ShutdownTimeout { waited } => {
                write!(
                    f,
                    "emulator did not exit within {}ms and was killed",
                    waited.as_millis()
                )
            }
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::Spawn { source } => Some(source),
            SupervisorError::Write { source, .. } => Some(source),
            SupervisorError::StateFile { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_precondition_classification() {
        assert!(SupervisorError::NotRunning.is_precondition());
        assert!(SupervisorError::AlreadyRunning.is_precondition());
        assert!(SupervisorError::AssetNotFound {
            path: PathBuf::from("/roms/missing.smc")
        }
        .is_precondition());
        assert!(!SupervisorError::LaunchFailed.is_precondition());
        assert!(!SupervisorError::Protocol {
            command: Command::Reset,
            line: "noise".to_string()
        }
        .is_precondition());
    }

    #[test]
    fn test_display_messages() {
        let err = SupervisorError::Protocol {
            command: Command::PauseToggle,
            line: "[INFO] noise".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected reply to PAUSE_TOGGLE: \"[INFO] noise\""
        );

        let err = SupervisorError::ShutdownTimeout {
            waited: Duration::from_millis(1500),
        };
        assert_eq!(
            err.to_string(),
            "emulator did not exit within 1500ms and was killed"
        );
    }

    #[test]
    fn test_source_chain() {
        let err = SupervisorError::Write {
            command: Command::Quit,
            source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("failed to send QUIT"));
        assert!(SupervisorError::NotRunning.source().is_none());
    }
}
