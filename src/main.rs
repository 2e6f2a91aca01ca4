use clap::Parser;
use retrosmith::console::{self, ConsoleExit};
use retrosmith::signals::SignalHandler;
use retrosmith::{HarnessConfig, Settings, Supervisor};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Launch a game in RetroArch and control it from the terminal:
/// pause, fullscreen, save and load states, reset, quit.
#[derive(Parser, Debug)]
#[command(name = "retrosmith", version, about)]
pub struct Cli {
    /// Content file to run
    #[arg(value_name = "ROM")]
    rom: PathBuf,

    /// libretro core to run it with
    #[arg(value_name = "CORE")]
    core: PathBuf,

    /// Config file path
    #[arg(short, long, default_value = "retrosmith.toml")]
    config: PathBuf,

    /// RetroArch executable (overrides config)
    #[arg(long)]
    retroarch: Option<PathBuf>,

    /// Window size as WIDTHxHEIGHT (overrides config)
    #[arg(long)]
    resolution: Option<String>,

    /// Start fullscreen (overrides config)
    #[arg(long, conflicts_with = "windowed")]
    fullscreen: bool,

    /// Start windowed (overrides config)
    #[arg(long)]
    windowed: bool,

    /// Settings directory (overrides config)
    #[arg(long)]
    settings_dir: Option<PathBuf>,

    /// Validate config and print resolved settings, don't launch
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (emulator stderr, command exchanges)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut HarnessConfig) {
        if let Some(ref executable) = self.retroarch {
            config.retroarch.executable = executable.clone();
        }
        if let Some(ref resolution) = self.resolution {
            config.display.resolution = resolution.clone();
        }
        if self.fullscreen {
            config.display.fullscreen = true;
        }
        if self.windowed {
            config.display.fullscreen = false;
        }
        if let Some(ref dir) = self.settings_dir {
            config.storage.settings_dir = dir.clone();
        }
    }

    fn default_log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.default_log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match HarnessConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };
    cli.apply_overrides(&mut config);

    let settings = match Settings::resolve(&config) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    if cli.dry_run {
        println!("retrosmith v{}", env!("CARGO_PKG_VERSION"));
        println!("executable:   {}", settings.executable.display());
        if !settings.launcher_args.is_empty() {
            println!("launcher:     {}", settings.launcher_args.join(" "));
        }
        println!("resolution:   {}", settings.resolution);
        println!("fullscreen:   {}", settings.fullscreen);
        println!("settings dir: {}", settings.paths.root().display());
        println!("config file:  {}", settings.paths.config_file().display());
        println!("content:      {}", cli.rom.display());
        println!("core:         {}", cli.core.display());
        return ExitCode::SUCCESS;
    }

    match settings.paths.init() {
        Ok(true) => tracing::info!(
            path = %settings.paths.config_file().display(),
            "wrote default RetroArch config"
        ),
        Ok(false) => {}
        Err(e) => {
            tracing::error!(
                path = %settings.paths.root().display(),
                error = %e,
                "failed to initialise settings directory"
            );
            return ExitCode::FAILURE;
        }
    }

    let mut signals = match SignalHandler::install() {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    let supervisor = Supervisor::new(settings);
    if let Err(e) = supervisor.start(&cli.rom, &cli.core).await {
        tracing::error!(error = %e, "failed to start emulator");
        return ExitCode::FAILURE;
    }
    println!("{}", console::HELP);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let exit = match console::run(&supervisor, &cli.rom, stdin, &mut signals).await {
        Ok(exit) => exit,
        Err(e) => {
            tracing::error!(error = %e, "failed to read console input");
            ConsoleExit::EndOfInput
        }
    };
    tracing::debug!(?exit, "console closed");

    if supervisor.is_running() {
        if let Err(e) = supervisor.stop().await {
            tracing::error!(error = %e, "failed to stop emulator cleanly");
            return ExitCode::FAILURE;
        }
    }

    match exit {
        ConsoleExit::EmulatorExited => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_applied() {
        let cli = Cli::parse_from([
            "retrosmith",
            "--retroarch",
            "/opt/retroarch",
            "--resolution",
            "1280x720",
            "--windowed",
            "--settings-dir",
            "/tmp/ra",
            "acme.smc",
            "snes9x_libretro.so",
        ]);
        let mut config = HarnessConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.retroarch.executable, PathBuf::from("/opt/retroarch"));
        assert_eq!(config.display.resolution, "1280x720");
        assert!(!config.display.fullscreen);
        assert_eq!(config.storage.settings_dir, PathBuf::from("/tmp/ra"));
        assert_eq!(cli.rom, PathBuf::from("acme.smc"));
        assert_eq!(cli.default_log_level(), "info");
    }

    #[test]
    fn test_fullscreen_and_windowed_conflict() {
        let parsed = Cli::try_parse_from([
            "retrosmith",
            "--fullscreen",
            "--windowed",
            "acme.smc",
            "core.so",
        ]);
        assert!(parsed.is_err());
    }
}
