//! Supervise a RetroArch process and drive it over its stdin command channel.
//!
//! Commands are written to the child's stdin; replies are read back from its
//! untagged stderr log, one line at a time, by position.

pub mod collector;
pub mod config;
pub mod console;
pub mod correlator;
pub mod error;
pub mod lifecycle;
pub mod liveness;
pub mod protocol;
pub mod queue;
pub mod settings_dir;
pub mod signals;
pub mod supervisor;

pub use config::{ConfigError, HarnessConfig, Settings, Timing};
pub use correlator::SaveState;
pub use error::SupervisorError;
pub use lifecycle::LifecycleState;
pub use protocol::{DisplayMode, PauseState};
pub use supervisor::{SessionStatus, Supervisor};
