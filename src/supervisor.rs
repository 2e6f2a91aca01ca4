/// Emulator lifecycle: spawn RetroArch with piped stdio, run the background
/// collector and liveness monitor, and expose the command surface.
///
/// The session mutex is held for the whole of every operation, so at most one
/// command/response exchange is ever in flight. `is_running()` reads the
/// lifecycle cell directly and never waits on that lock.
use crate::collector::{spawn_collector, spawn_drain};
use crate::config::Settings;
use crate::correlator::{CommandChannel, SaveState};
use crate::error::SupervisorError;
use crate::lifecycle::{Lifecycle, LifecycleState, SessionLifecycle, Snapshot};
use crate::liveness::{HeartbeatMonitor, LivenessMonitor};
use crate::protocol::{Command, DisplayMode, PauseState};
use crate::queue::ResponseQueue;
use chrono::{DateTime, Utc};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Grace period between SIGTERM and SIGKILL when forcing a shutdown.
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Pause between resuming and quitting, so RetroArch processes the unpause.
const RESUME_BEFORE_QUIT: Duration = Duration::from_millis(200);

/// Point-in-time view of the supervised session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: LifecycleState,
    pub pause: Option<PauseState>,
    pub display: Option<DisplayMode>,
    pub asset: Option<PathBuf>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub heartbeats: u64,
}

/// One launched emulator and the tasks serving it.
struct Session {
    child: Child,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    lifecycle: SessionLifecycle,
    channel: CommandChannel,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Session {
    /// SIGTERM the process group, then kill outright if it lingers.
    async fn terminate(&mut self) {
        if let Some(pid) = self.pid {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::debug!(pid, error = %e, "SIGTERM to process group failed");
            }
        }
        if tokio::time::timeout(KILL_GRACE, self.child.wait()).await.is_err() {
            tracing::warn!(pid = ?self.pid, "emulator ignored SIGTERM, killing");
            if let Err(e) = self.child.kill().await {
                tracing::warn!(error = %e, "failed to kill emulator");
            }
        }
        self.lifecycle.mark_exited("terminated");
    }

    /// Collect the exit status so the child does not linger as a zombie.
    async fn reap(&mut self) {
        match tokio::time::timeout(KILL_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(code = ?status.code(), "emulator exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to reap emulator"),
            Err(_) => self.terminate().await,
        }
    }
}

/// Build the RetroArch argument list:
/// `[launcher args] --config <cfg> --libretro <core> <content> --size <WxH> --verbose [--fullscreen]`
pub fn launch_args(settings: &Settings, plugin: &Path, asset: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = settings.launcher_args.iter().map(OsString::from).collect();
    args.push("--config".into());
    args.push(settings.paths.config_file().into_os_string());
    args.push("--libretro".into());
    args.push(plugin.as_os_str().to_owned());
    args.push(asset.as_os_str().to_owned());
    args.push("--size".into());
    args.push(settings.resolution.clone().into());
    args.push("--verbose".into());
    if settings.fullscreen {
        args.push("--fullscreen".into());
    }
    args
}

/// Expand a leading `~/` against `$HOME`.
fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

pub struct Supervisor {
    settings: Settings,
    lifecycle: Arc<Lifecycle>,
    session: Mutex<Option<Session>>,
}

impl Supervisor {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            lifecycle: Arc::new(Lifecycle::new()),
            session: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.state() == LifecycleState::Running
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Lifecycle transition events.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.lifecycle.subscribe()
    }

    /// Launch `asset` with the libretro core at `plugin`.
    ///
    /// Fails without spawning if either file is missing or a session is
    /// already running. Succeeds only if the emulator is still alive after the
    /// launch settling interval.
    pub async fn start(
        &self,
        asset: impl AsRef<Path>,
        plugin: impl AsRef<Path>,
    ) -> Result<(), SupervisorError> {
        let asset = expand_home(asset.as_ref());
        let plugin = plugin.as_ref().to_path_buf();

        if !asset.is_file() {
            tracing::error!(path = %asset.display(), "cannot start, content file does not exist");
            return Err(SupervisorError::AssetNotFound { path: asset });
        }
        if !plugin.is_file() {
            tracing::error!(path = %plugin.display(), "cannot start, core file does not exist");
            return Err(SupervisorError::PluginNotFound { path: plugin });
        }

        let mut guard = self.session.lock().await;
        let Some(lifecycle) = self.lifecycle.launch() else {
            tracing::warn!("cannot start, content already running");
            return Err(SupervisorError::AlreadyRunning);
        };

        let args = launch_args(&self.settings, &plugin, &asset);
        tracing::info!(
            content = %asset.display(),
            core = %plugin.display(),
            session = lifecycle.session(),
            "starting content"
        );
        tracing::debug!(executable = %self.settings.executable.display(), ?args, "spawning emulator");

        let session = match self.spawn_session(&args, asset, lifecycle.clone()) {
            Ok(session) => session,
            Err(e) => {
                lifecycle.mark_exited("spawn failed");
                return Err(e);
            }
        };
        tracing::info!(pid = ?session.pid, "emulator started");
        *guard = Some(session);

        tokio::time::sleep(self.settings.timing.launch_settle).await;

        if lifecycle.is_running() {
            tracing::info!("content running");
            Ok(())
        } else {
            tracing::error!("emulator exited during startup");
            Err(SupervisorError::LaunchFailed)
        }
    }

    fn spawn_session(
        &self,
        args: &[OsString],
        asset: PathBuf,
        lifecycle: SessionLifecycle,
    ) -> Result<Session, SupervisorError> {
        let mut child = ProcessCommand::new(&self.settings.executable)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0) // New process group for clean kill
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn { source })?;

        let missing = |stream: &str| SupervisorError::Spawn {
            source: std::io::Error::other(format!("emulator {stream} unavailable")),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let timing = self.settings.timing;
        let stdin = Arc::new(Mutex::new(stdin));
        let queue = Arc::new(ResponseQueue::new());

        let monitor: Box<dyn LivenessMonitor> = Box::new(HeartbeatMonitor::new(
            Arc::clone(&stdin),
            timing.heartbeat_interval,
            timing.heartbeat_stall,
        ));
        tracing::debug!(monitor = monitor.name(), "starting liveness monitor");
        let tasks = vec![
            spawn_collector(stderr, Arc::clone(&queue), lifecycle.clone()),
            spawn_drain(stdout),
            monitor.spawn(lifecycle.clone()),
        ];

        let display = if self.settings.fullscreen {
            DisplayMode::Fullscreen
        } else {
            DisplayMode::Windowed
        };
        let channel = CommandChannel::new(stdin, queue, asset, display, timing.response_timeout);

        Ok(Session {
            pid: child.id(),
            child,
            started_at: Utc::now(),
            lifecycle,
            channel,
            tasks,
        })
    }

    /// Quit the emulator and wait for it to exit.
    ///
    /// Exit is observed through the liveness signals only. If it does not
    /// happen within the shutdown timeout the process group is killed and
    /// `ShutdownTimeout` is returned.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let mut guard = self.session.lock().await;
        let session = running_session(&mut guard)?;
        tracing::info!("sending quit");

        if session.channel.pause_state() == PauseState::Paused {
            if let Err(e) = session.channel.toggle_pause().await {
                tracing::warn!(error = %e, "failed to unpause before quit");
            }
            tokio::time::sleep(RESUME_BEFORE_QUIT).await;
        }

        session.lifecycle.begin_stop();
        if let Err(e) = session.channel.send(Command::Quit).await {
            tracing::debug!(error = %e, "quit write failed, emulator already gone");
        }

        let waited = self.settings.timing.shutdown_timeout;
        if !session.lifecycle.wait_for_exit(waited).await {
            tracing::error!(
                timeout_ms = waited.as_millis() as u64,
                "emulator did not exit after quit, terminating"
            );
            session.terminate().await;
            *guard = None;
            return Err(SupervisorError::ShutdownTimeout { waited });
        }

        session.reap().await;
        *guard = None;
        tracing::info!("content exited");
        Ok(())
    }

    pub async fn toggle_pause(&self) -> Result<PauseState, SupervisorError> {
        let mut guard = self.session.lock().await;
        running_session(&mut guard)?.channel.toggle_pause().await
    }

    pub async fn toggle_fullscreen(&self) -> Result<DisplayMode, SupervisorError> {
        let mut guard = self.session.lock().await;
        running_session(&mut guard)?
            .channel
            .toggle_fullscreen()
            .await
    }

    pub async fn save(&self) -> Result<SaveState, SupervisorError> {
        let mut guard = self.session.lock().await;
        running_session(&mut guard)?.channel.save().await
    }

    pub async fn load(&self, state: &SaveState) -> Result<(), SupervisorError> {
        let mut guard = self.session.lock().await;
        running_session(&mut guard)?.channel.load(state).await
    }

    pub async fn reset(&self) -> Result<(), SupervisorError> {
        let mut guard = self.session.lock().await;
        running_session(&mut guard)?.channel.reset().await
    }

    pub async fn status(&self) -> SessionStatus {
        let guard = self.session.lock().await;
        let state = self.lifecycle.state();
        let heartbeats = self.lifecycle.heartbeats();
        match guard.as_ref() {
            Some(session) => SessionStatus {
                state,
                pause: Some(session.channel.pause_state()),
                display: Some(session.channel.display_mode()),
                asset: Some(session.channel.asset().to_path_buf()),
                pid: session.pid,
                started_at: Some(session.started_at),
                heartbeats,
            },
            None => SessionStatus {
                state,
                pause: None,
                display: None,
                asset: None,
                pid: None,
                started_at: None,
                heartbeats,
            },
        }
    }
}

/// The current session, if it is running. Commands are refused in every
/// other state, including Stopping.
fn running_session(guard: &mut Option<Session>) -> Result<&mut Session, SupervisorError> {
    match guard.as_mut() {
        Some(session) if session.lifecycle.is_running() => Ok(session),
        _ => {
            tracing::error!("content is not running");
            Err(SupervisorError::NotRunning)
        }
    }
}
