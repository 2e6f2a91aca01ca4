/// RetroArch stdin command vocabulary and the shapes of its stderr replies.
///
/// Replies are untagged log lines, so each command is paired with a
/// `ResponseShape` describing where its answer sits in the stream after the
/// command is written. Classification of the answer lines lives here too and
/// is pure, so shapes can be checked without a process or timing.
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Token written by the liveness monitor. RetroArch echoes it on stderr.
pub const HEARTBEAT_TOKEN: &str = "checkalive";

/// Commands understood by RetroArch with `stdin_cmd_enable = "true"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Heartbeat,
    Quit,
    PauseToggle,
    FullscreenToggle,
    SaveState,
    LoadState,
    Reset,
}

impl Command {
    pub fn token(self) -> &'static str {
        match self {
            Command::Heartbeat => HEARTBEAT_TOKEN,
            Command::Quit => "QUIT",
            Command::PauseToggle => "PAUSE_TOGGLE",
            Command::FullscreenToggle => "FULLSCREEN_TOGGLE",
            Command::SaveState => "SAVE_STATE",
            Command::LoadState => "LOAD_STATE",
            Command::Reset => "RESET",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Write one newline-terminated command. The lock keeps heartbeat and
/// command writes from interleaving.
pub async fn write_command<W>(stdin: &Mutex<W>, command: Command) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut stdin = stdin.lock().await;
    let line = format!("{}\n", command.token());
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

/// Heartbeat echoes are dropped by the collector before they reach the queue.
pub fn is_heartbeat_echo(line: &str) -> bool {
    line.contains(HEARTBEAT_TOKEN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseState {
    Playing,
    Paused,
}

impl std::fmt::Display for PauseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PauseState::Playing => f.write_str("playing"),
            PauseState::Paused => f.write_str("paused"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    Fullscreen,
    Windowed,
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayMode::Fullscreen => f.write_str("fullscreen"),
            DisplayMode::Windowed => f.write_str("windowed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Failed,
}

/// What to do with each line popped after a command.
#[derive(Clone, Copy)]
pub enum LineRole {
    /// Pop and throw away.
    Discard,
    /// Pop and keep; a line failing the check is a protocol error.
    Expect(fn(&str) -> bool),
    /// Pop until a line passes `accept` and keep it, giving up after
    /// `max_lines`. Skipped lines are log noise.
    Seek {
        accept: fn(&str) -> bool,
        max_lines: usize,
    },
}

#[derive(Clone, Copy)]
pub enum Window {
    /// Exactly these lines, in order.
    Fixed(&'static [LineRole]),
    /// Pop until a line passes `accept`, giving up after `max_lines`.
    Scan {
        accept: fn(&str) -> bool,
        max_lines: usize,
    },
}

/// Where a command's answer sits in the stderr stream.
#[derive(Clone, Copy)]
pub struct ResponseShape {
    pub command: Command,
    /// Pause before draining stale lines.
    pub lead_in: Duration,
    /// Pause between writing the command and reading the answer.
    pub settle: Duration,
    pub window: Window,
}

/// Upper bound on lines examined while looking for the video-mode line.
pub const VIDEO_SCAN_LINES: usize = 32;

/// Upper bound on lines examined while looking for the saved-state path.
pub const SAVE_PATH_SEEK_LINES: usize = 4;

pub const PAUSE_TOGGLE: ResponseShape = ResponseShape {
    command: Command::PauseToggle,
    lead_in: Duration::ZERO,
    settle: Duration::from_millis(100),
    window: Window::Fixed(&[LineRole::Expect(is_pause_reply)]),
};

pub const FULLSCREEN_TOGGLE: ResponseShape = ResponseShape {
    command: Command::FullscreenToggle,
    lead_in: Duration::ZERO,
    settle: Duration::from_millis(500),
    window: Window::Scan {
        accept: is_video_mode_line,
        max_lines: VIDEO_SCAN_LINES,
    },
};

pub const SAVE_STATE: ResponseShape = ResponseShape {
    command: Command::SaveState,
    lead_in: Duration::ZERO,
    settle: Duration::from_millis(100),
    window: Window::Fixed(&[
        LineRole::Seek {
            accept: has_state_path,
            max_lines: SAVE_PATH_SEEK_LINES,
        },
        LineRole::Discard,
        LineRole::Expect(is_state_saved),
    ]),
};

pub const LOAD_STATE: ResponseShape = ResponseShape {
    command: Command::LoadState,
    lead_in: Duration::ZERO,
    settle: Duration::ZERO,
    window: Window::Fixed(&[
        LineRole::Discard,
        LineRole::Discard,
        LineRole::Expect(is_load_reply),
    ]),
};

pub const RESET: ResponseShape = ResponseShape {
    command: Command::Reset,
    lead_in: Duration::from_millis(300),
    settle: Duration::ZERO,
    window: Window::Fixed(&[LineRole::Expect(is_resetting)]),
};

static UNPAUSED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bunpaused\b").unwrap());
static PAUSED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bpaused\b").unwrap());
static VIDEO_MODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)video @").unwrap());
static VIDEO_FULLSCREEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)video @ fullscreen").unwrap());
static QUOTED_PATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]+)""#).unwrap());
static STATE_SAVED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)saved state to slot").unwrap());
static LOAD_FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)failed to load state").unwrap());
static STATE_LOADED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)loaded state from slot").unwrap());
static RESETTING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)resetting").unwrap());

/// "Unpaused." wins over "Paused." since both mention pausing.
pub fn classify_pause(line: &str) -> Option<PauseState> {
    if UNPAUSED.is_match(line) {
        Some(PauseState::Playing)
    } else if PAUSED.is_match(line) {
        Some(PauseState::Paused)
    } else {
        None
    }
}

pub fn is_pause_reply(line: &str) -> bool {
    classify_pause(line).is_some()
}

pub fn is_video_mode_line(line: &str) -> bool {
    VIDEO_MODE.is_match(line)
}

pub fn classify_video_mode(line: &str) -> Option<DisplayMode> {
    if !is_video_mode_line(line) {
        None
    } else if VIDEO_FULLSCREEN.is_match(line) {
        Some(DisplayMode::Fullscreen)
    } else {
        Some(DisplayMode::Windowed)
    }
}

/// First double-quoted substring, e.g. `Saving state: "/roms/acme.state".`
pub fn extract_state_path(line: &str) -> Option<PathBuf> {
    QUOTED_PATH
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| PathBuf::from(m.as_str()))
}

pub fn has_state_path(line: &str) -> bool {
    extract_state_path(line).is_some()
}

pub fn is_state_saved(line: &str) -> bool {
    STATE_SAVED.is_match(line)
}

pub fn classify_load(line: &str) -> Option<LoadOutcome> {
    if LOAD_FAILED.is_match(line) {
        Some(LoadOutcome::Failed)
    } else if STATE_LOADED.is_match(line) {
        Some(LoadOutcome::Loaded)
    } else {
        None
    }
}

pub fn is_load_reply(line: &str) -> bool {
    classify_load(line).is_some()
}

pub fn is_resetting(line: &str) -> bool {
    RESETTING.is_match(line)
}
