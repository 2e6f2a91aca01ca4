/// Command/response correlation over RetroArch's untagged stderr log.
///
/// Every operation drains stale lines, writes one command, waits its settle
/// interval, then reads the lines its `ResponseShape` names. Callers must hold
/// exclusive access (`&mut self`) for the whole exchange; the supervisor
/// guarantees that with its session lock.
use crate::error::SupervisorError;
use crate::protocol::{
    self, classify_load, classify_pause, classify_video_mode, extract_state_path, write_command,
    Command, DisplayMode, LineRole, LoadOutcome, PauseState, ResponseShape, Window,
};
use crate::queue::ResponseQueue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::process::ChildStdin;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Raw save-state bytes, opaque to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveState(Vec<u8>);

impl SaveState {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for SaveState {
    fn from(bytes: Vec<u8>) -> Self {
        SaveState(bytes)
    }
}

/// Where RetroArch looks for the state of `asset`: same base name, `.state`.
pub fn state_path_for(asset: &Path) -> PathBuf {
    asset.with_extension("state")
}

pub struct CommandChannel<W = ChildStdin> {
    stdin: Arc<Mutex<W>>,
    queue: Arc<ResponseQueue>,
    asset: PathBuf,
    pause: PauseState,
    display: DisplayMode,
    response_timeout: Duration,
}

impl<W> CommandChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        stdin: Arc<Mutex<W>>,
        queue: Arc<ResponseQueue>,
        asset: PathBuf,
        display: DisplayMode,
        response_timeout: Duration,
    ) -> Self {
        Self {
            stdin,
            queue,
            asset,
            pause: PauseState::Playing,
            display,
            response_timeout,
        }
    }

    pub fn pause_state(&self) -> PauseState {
        self.pause
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.display
    }

    pub fn asset(&self) -> &Path {
        &self.asset
    }

    /// Write a command without reading any reply.
    pub async fn send(&self, command: Command) -> Result<(), SupervisorError> {
        tracing::debug!(%command, "sending command");
        write_command(&self.stdin, command)
            .await
            .map_err(|source| SupervisorError::Write { command, source })
    }

    async fn pop(&self, command: Command, deadline: Instant) -> Result<String, SupervisorError> {
        match tokio::time::timeout_at(deadline, self.queue.pop()).await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(SupervisorError::Unresponsive { command }),
            Err(_) => Err(SupervisorError::ResponseTimeout {
                command,
                waited: self.response_timeout,
            }),
        }
    }

    /// Run one command/response exchange and return the kept lines.
    async fn exchange(&self, shape: &ResponseShape) -> Result<Vec<String>, SupervisorError> {
        let command = shape.command;
        if !shape.lead_in.is_zero() {
            tokio::time::sleep(shape.lead_in).await;
        }
        let stale = self.queue.clear();
        if stale > 0 {
            tracing::debug!(%command, stale, "dropped stale output");
        }

        self.send(command).await?;
        tokio::time::sleep(shape.settle).await;

        let deadline = Instant::now() + self.response_timeout;
        match shape.window {
            Window::Fixed(roles) => {
                let mut kept = Vec::new();
                for role in roles {
                    match role {
                        LineRole::Discard => {
                            let line = self.pop(command, deadline).await?;
                            tracing::trace!(%command, %line, "discarding reply line");
                        }
                        LineRole::Expect(accept) => {
                            let line = self.pop(command, deadline).await?;
                            if !accept(&line) {
                                return Err(SupervisorError::Protocol { command, line });
                            }
                            kept.push(line);
                        }
                        LineRole::Seek { accept, max_lines } => {
                            kept.push(self.seek(command, deadline, *accept, *max_lines).await?);
                        }
                    }
                }
                Ok(kept)
            }
            Window::Scan { accept, max_lines } => {
                Ok(vec![self.seek(command, deadline, accept, max_lines).await?])
            }
        }
    }

    /// Pop up to `max_lines` lines and return the first that passes `accept`.
    /// Running out of lines or time is a protocol error naming the last line seen.
    async fn seek(
        &self,
        command: Command,
        deadline: Instant,
        accept: fn(&str) -> bool,
        max_lines: usize,
    ) -> Result<String, SupervisorError> {
        let mut last = String::new();
        for _ in 0..max_lines {
            match self.pop(command, deadline).await {
                Ok(line) if accept(&line) => return Ok(line),
                Ok(line) => {
                    tracing::trace!(%command, %line, "skipping reply line");
                    last = line;
                }
                Err(SupervisorError::ResponseTimeout { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        Err(SupervisorError::Protocol {
            command,
            line: last,
        })
    }

    fn protocol_error(command: Command, lines: &[String]) -> SupervisorError {
        SupervisorError::Protocol {
            command,
            line: lines.last().cloned().unwrap_or_default(),
        }
    }

    /// Toggle pause and return the state the emulator reports.
    pub async fn toggle_pause(&mut self) -> Result<PauseState, SupervisorError> {
        let lines = self.exchange(&protocol::PAUSE_TOGGLE).await?;
        let state = lines
            .first()
            .and_then(|line| classify_pause(line))
            .ok_or_else(|| Self::protocol_error(Command::PauseToggle, &lines))?;
        self.pause = state;
        tracing::info!(%state, "pause toggled");
        Ok(state)
    }

    /// Toggle between fullscreen and windowed video.
    pub async fn toggle_fullscreen(&mut self) -> Result<DisplayMode, SupervisorError> {
        let lines = self.exchange(&protocol::FULLSCREEN_TOGGLE).await?;
        let mode = lines
            .first()
            .and_then(|line| classify_video_mode(line))
            .ok_or_else(|| Self::protocol_error(Command::FullscreenToggle, &lines))?;
        self.display = mode;
        tracing::info!(%mode, "display mode toggled");
        Ok(mode)
    }

    /// Unpause if paused. Returns whether a toggle happened.
    async fn resume_if_paused(&mut self) -> Result<bool, SupervisorError> {
        if self.pause != PauseState::Paused {
            return Ok(false);
        }
        match self.toggle_pause().await? {
            PauseState::Playing => Ok(true),
            PauseState::Paused => Err(SupervisorError::Protocol {
                command: Command::PauseToggle,
                line: "still paused after toggle".to_string(),
            }),
        }
    }

    async fn restore_pause(&mut self) {
        if let Err(e) = self.toggle_pause().await {
            tracing::warn!(error = %e, "failed to restore pause state");
        }
    }

    /// Save the running state and return its bytes. The file RetroArch wrote
    /// is deleted after reading; a failed delete is only logged.
    pub async fn save(&mut self) -> Result<SaveState, SupervisorError> {
        let resumed = self.resume_if_paused().await?;
        let result = self.save_state_file().await;
        if resumed {
            self.restore_pause().await;
        }
        result
    }

    async fn save_state_file(&mut self) -> Result<SaveState, SupervisorError> {
        let lines = self.exchange(&protocol::SAVE_STATE).await?;
        let path = lines
            .first()
            .and_then(|line| extract_state_path(line))
            .ok_or_else(|| Self::protocol_error(Command::SaveState, &lines))?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| SupervisorError::StateFile {
                path: path.clone(),
                source,
            })?;
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete state file");
        }

        tracing::info!(path = %path.display(), bytes = bytes.len(), "state saved");
        Ok(SaveState::from(bytes))
    }

    /// Write `state` where RetroArch expects it and ask it to load.
    pub async fn load(&mut self, state: &SaveState) -> Result<(), SupervisorError> {
        let path = state_path_for(&self.asset);
        tokio::fs::write(&path, state.as_bytes())
            .await
            .map_err(|source| SupervisorError::StateFile {
                path: path.clone(),
                source,
            })?;

        let resumed = self.resume_if_paused().await?;
        let result = self.load_state_file().await;
        if resumed {
            self.restore_pause().await;
        }
        result
    }

    async fn load_state_file(&mut self) -> Result<(), SupervisorError> {
        let mut lines = self.exchange(&protocol::LOAD_STATE).await?;
        let line = lines.pop().unwrap_or_default();
        match classify_load(&line) {
            Some(LoadOutcome::Loaded) => {
                tracing::info!("state loaded");
                Ok(())
            }
            Some(LoadOutcome::Failed) => {
                tracing::warn!(%line, "emulator failed to load state");
                Err(SupervisorError::Rejected {
                    command: Command::LoadState,
                    line,
                })
            }
            None => Err(SupervisorError::Protocol {
                command: Command::LoadState,
                line,
            }),
        }
    }

    /// Restart the content from the beginning. Leaves the emulator unpaused.
    pub async fn reset(&mut self) -> Result<(), SupervisorError> {
        self.resume_if_paused().await?;
        self.exchange(&protocol::RESET).await?;
        tracing::info!("content reset");
        Ok(())
    }
}
