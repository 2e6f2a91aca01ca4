/// Line-oriented console for driving a running emulator from a terminal.
use crate::correlator::SaveState;
use crate::error::SupervisorError;
use crate::lifecycle::LifecycleState;
use crate::signals::SignalHandler;
use crate::supervisor::Supervisor;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub const HELP: &str = "\
commands:
  pause          toggle pause
  fullscreen     toggle fullscreen
  save [FILE]    write a save state to FILE (default: <rom>-<timestamp>.state)
  load FILE      restore a save state from FILE
  reset          reset the running game
  status         print session status as JSON
  help           show this message
  quit           stop the emulator and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Pause,
    Fullscreen,
    Save(Option<PathBuf>),
    Load(PathBuf),
    Reset,
    Status,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let name = words.next().ok_or_else(|| "empty command".to_string())?;
        let arg = words.next().map(PathBuf::from);
        if words.next().is_some() {
            return Err(format!("too many arguments to {name:?}"));
        }

        let command = match (name.to_ascii_lowercase().as_str(), arg) {
            ("pause", None) => ConsoleCommand::Pause,
            ("fullscreen", None) => ConsoleCommand::Fullscreen,
            ("save", file) => ConsoleCommand::Save(file),
            ("load", Some(file)) => ConsoleCommand::Load(file),
            ("load", None) => return Err("load needs a FILE".to_string()),
            ("reset", None) => ConsoleCommand::Reset,
            ("status", None) => ConsoleCommand::Status,
            ("help" | "?", None) => ConsoleCommand::Help,
            ("quit" | "exit", None) => ConsoleCommand::Quit,
            (
                "pause" | "fullscreen" | "reset" | "status" | "help" | "?" | "quit" | "exit",
                Some(_),
            ) => return Err(format!("{name} takes no arguments")),
            _ => return Err(format!("unknown command {name:?}, try \"help\"")),
        };
        Ok(command)
    }
}

#[derive(Debug)]
pub enum ConsoleError {
    Supervisor(SupervisorError),
    File {
        path: PathBuf,
        source: std::io::Error,
    },
    Json(serde_json::Error),
}

impl std::fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsoleError::Supervisor(e) => write!(f, "{e}"),
            ConsoleError::File { path, source } => write!(f, "{}: {}", path.display(), source),
            ConsoleError::Json(e) => write!(f, "failed to encode status: {e}"),
        }
    }
}

impl std::error::Error for ConsoleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConsoleError::Supervisor(e) => Some(e),
            ConsoleError::File { source, .. } => Some(source),
            ConsoleError::Json(e) => Some(e),
        }
    }
}

impl From<SupervisorError> for ConsoleError {
    fn from(e: SupervisorError) -> Self {
        ConsoleError::Supervisor(e)
    }
}

/// `<rom-stem>-<YYYYmmdd-HHMMSS>.state` in the working directory.
pub fn default_save_name(rom: &Path, now: DateTime<Local>) -> PathBuf {
    let stem = rom
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "retrosmith".to_string());
    PathBuf::from(format!("{stem}-{}.state", now.format("%Y%m%d-%H%M%S")))
}

/// Run one command and return the text to show the user.
pub async fn execute(
    supervisor: &Supervisor,
    rom: &Path,
    command: ConsoleCommand,
) -> Result<String, ConsoleError> {
    match command {
        ConsoleCommand::Pause => Ok(supervisor.toggle_pause().await?.to_string()),
        ConsoleCommand::Fullscreen => Ok(supervisor.toggle_fullscreen().await?.to_string()),
        ConsoleCommand::Save(file) => {
            let path = file.unwrap_or_else(|| default_save_name(rom, Local::now()));
            let state = supervisor.save().await?;
            std::fs::write(&path, state.as_bytes())
                .map_err(|source| ConsoleError::File {
                    path: path.clone(),
                    source,
                })?;
            Ok(format!("saved {} bytes to {}", state.len(), path.display()))
        }
        ConsoleCommand::Load(path) => {
            let bytes = std::fs::read(&path).map_err(|source| ConsoleError::File {
                path: path.clone(),
                source,
            })?;
            supervisor.load(&SaveState::from(bytes)).await?;
            Ok(format!("loaded {}", path.display()))
        }
        ConsoleCommand::Reset => {
            supervisor.reset().await?;
            Ok("reset".to_string())
        }
        ConsoleCommand::Status => {
            serde_json::to_string_pretty(&supervisor.status().await).map_err(ConsoleError::Json)
        }
        ConsoleCommand::Help => Ok(HELP.to_string()),
        ConsoleCommand::Quit => Ok("quitting".to_string()),
    }
}

/// Why the console loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    Quit,
    EndOfInput,
    Signal(&'static str),
    EmulatorExited,
}

/// Read commands from `input` until quit, end of input, a shutdown signal, or
/// the emulator going away.
pub async fn run<R>(
    supervisor: &Supervisor,
    rom: &Path,
    input: R,
    signals: &mut SignalHandler,
) -> std::io::Result<ConsoleExit>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut events = supervisor.subscribe();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            name = signals.recv() => {
                tracing::info!(signal = name, "received shutdown signal");
                return Ok(ConsoleExit::Signal(name));
            }
            _ = events.wait_for(|snap| snap.state == LifecycleState::NotRunning) => {
                tracing::warn!("emulator exited");
                return Ok(ConsoleExit::EmulatorExited);
            }
        };

        let Some(line) = line else {
            return Ok(ConsoleExit::EndOfInput);
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };
        let quit = command == ConsoleCommand::Quit;

        match execute(supervisor, rom, command).await {
            Ok(reply) => println!("{reply}"),
            Err(e) => eprintln!("error: {e}"),
        }
        if quit {
            return Ok(ConsoleExit::Quit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, Timing};
    use crate::settings_dir::SettingsDir;
    use chrono::TimeZone;

    fn idle_supervisor(root: &Path) -> Supervisor {
        Supervisor::new(Settings {
            executable: PathBuf::from("/bin/sh"),
            launcher_args: vec!["-c".to_string(), "exit 0".to_string()],
            resolution: "800x600".to_string(),
            fullscreen: false,
            paths: SettingsDir::new(root.join("settings")),
            timing: Timing::default(),
        })
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("pause".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Pause));
        assert_eq!("  FULLSCREEN ".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Fullscreen));
        assert_eq!("save".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Save(None)));
        assert_eq!(
            "save slot1.state".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Save(Some(PathBuf::from("slot1.state"))))
        );
        assert_eq!(
            "load slot1.state".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Load(PathBuf::from("slot1.state")))
        );
        assert_eq!("reset".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Reset));
        assert_eq!("status".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Status));
        assert_eq!("?".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Help));
        assert_eq!("exit".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Quit));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("".parse::<ConsoleCommand>().is_err());
        assert!("load".parse::<ConsoleCommand>().is_err());
        assert!("pause now".parse::<ConsoleCommand>().is_err());
        assert!("save a b".parse::<ConsoleCommand>().is_err());
        let err = "jump".parse::<ConsoleCommand>().unwrap_err();
        assert!(err.contains("unknown command"));
    }

    #[test]
    fn test_default_save_name() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            default_save_name(Path::new("/roms/Super Acme.smc"), now),
            PathBuf::from("Super Acme-20240309-140507.state")
        );
    }

    #[tokio::test]
    async fn test_execute_without_session() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor = idle_supervisor(tmp.path());
        let rom = tmp.path().join("acme.smc");

        let err = execute(&supervisor, &rom, ConsoleCommand::Pause)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConsoleError::Supervisor(SupervisorError::NotRunning)
        ));

        let status = execute(&supervisor, &rom, ConsoleCommand::Status)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&status).unwrap();
        assert_eq!(json["state"], "not_running");
        assert!(json["pid"].is_null());

        assert_eq!(
            execute(&supervisor, &rom, ConsoleCommand::Help).await.unwrap(),
            HELP
        );
    }

    #[tokio::test]
    async fn test_load_missing_file_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor = idle_supervisor(tmp.path());
        let missing = tmp.path().join("missing.state");

        let err = execute(
            &supervisor,
            Path::new("acme.smc"),
            ConsoleCommand::Load(missing.clone()),
        )
        .await
        .unwrap_err();
        match err {
            ConsoleError::File { path, .. } => assert_eq!(path, missing),
            other => panic!("{other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_ends_when_emulator_not_running() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor = idle_supervisor(tmp.path());
        let rom = tmp.path().join("acme.smc");
        let mut signals = SignalHandler::install().unwrap();

        // Keep the writer alive so the console never sees end of input.
        let (_keyboard, input) = tokio::io::duplex(64);
        let exit = run(
            &supervisor,
            &rom,
            tokio::io::BufReader::new(input),
            &mut signals,
        )
        .await
        .unwrap();
        assert_eq!(exit, ConsoleExit::EmulatorExited);
    }
}
