use crate::settings_dir::SettingsDir;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Top-level configuration loaded from retrosmith.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct HarnessConfig {
    pub retroarch: RetroArchConfig,
    pub display: DisplayConfig,
    pub storage: StorageConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetroArchConfig {
    pub executable: PathBuf,
    /// Arguments placed before the RetroArch ones, for wrapped launchers
    /// (e.g. `flatpak run org.libretro.RetroArch`).
    pub launcher_args: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub resolution: String,
    pub fullscreen: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub settings_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_stall_ms: u64,
    pub launch_settle_ms: u64,
    pub response_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
}

// --- Default implementations ---

impl Default for RetroArchConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("/usr/bin/retroarch"),
            launcher_args: Vec::new(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            resolution: "800x600".to_string(),
            fullscreen: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            settings_dir: PathBuf::from("settings"),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 100,
            heartbeat_stall_ms: 2000,
            launch_settle_ms: 500,
            response_timeout_ms: 5000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

/// Errors from loading or resolving configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    ExecutableNotFound {
        path: PathBuf,
    },
    Resolution {
        value: String,
    },
    ZeroInterval {
        field: &'static str,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::ExecutableNotFound { path } => {
                write!(f, "RetroArch executable not found: {}", path.display())
            }
            ConfigError::Resolution { value } => {
                write!(f, "invalid resolution {value:?}, expected WIDTHxHEIGHT")
            }
            ConfigError::ZeroInterval { field } => {
                write!(f, "timing.{field} must be greater than zero")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl HarnessConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

static RESOLUTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[1-9]\d*x[1-9]\d*$").unwrap());

/// Resolved timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub heartbeat_interval: Duration,
    pub heartbeat_stall: Duration,
    pub launch_settle: Duration,
    pub response_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing::from_config(&TimingConfig::default())
    }
}

impl Timing {
    fn from_config(config: &TimingConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            heartbeat_stall: Duration::from_millis(config.heartbeat_stall_ms),
            launch_settle: Duration::from_millis(config.launch_settle_ms),
            response_timeout: Duration::from_millis(config.response_timeout_ms),
            shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
        }
    }
}

/// Immutable per-supervisor settings, resolved from `HarnessConfig`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub executable: PathBuf,
    pub launcher_args: Vec<String>,
    pub resolution: String,
    pub fullscreen: bool,
    pub paths: SettingsDir,
    pub timing: Timing,
}

impl Settings {
    /// Validate and resolve config values. Relative paths are made absolute
    /// against the current directory; the executable must exist.
    pub fn resolve(config: &HarnessConfig) -> Result<Self, ConfigError> {
        let executable = absolute(&config.retroarch.executable);
        if !executable.is_file() {
            return Err(ConfigError::ExecutableNotFound { path: executable });
        }

        if !RESOLUTION.is_match(&config.display.resolution) {
            return Err(ConfigError::Resolution {
                value: config.display.resolution.clone(),
            });
        }

        let timing = &config.timing;
        for (field, value) in [
            ("heartbeat_interval_ms", timing.heartbeat_interval_ms),
            ("heartbeat_stall_ms", timing.heartbeat_stall_ms),
            ("response_timeout_ms", timing.response_timeout_ms),
            ("shutdown_timeout_ms", timing.shutdown_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval { field });
            }
        }

        let settings = Self {
            executable,
            launcher_args: config.retroarch.launcher_args.clone(),
            resolution: config.display.resolution.clone(),
            fullscreen: config.display.fullscreen,
            paths: SettingsDir::new(absolute(&config.storage.settings_dir)),
            timing: Timing::from_config(&config.timing),
        };

        tracing::debug!(
            executable = %settings.executable.display(),
            resolution = %settings.resolution,
            fullscreen = settings.fullscreen,
            settings_dir = %settings.paths.root().display(),
            "resolved settings"
        );
        Ok(settings)
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_executable(executable: &str) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.retroarch.executable = PathBuf::from(executable);
        config
    }

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(
            config.retroarch.executable,
            PathBuf::from("/usr/bin/retroarch")
        );
        assert!(config.retroarch.launcher_args.is_empty());
        assert_eq!(config.display.resolution, "800x600");
        assert!(config.display.fullscreen);
        assert_eq!(config.storage.settings_dir, PathBuf::from("settings"));
        assert_eq!(config.timing.heartbeat_interval_ms, 100);
        assert_eq!(config.timing.launch_settle_ms, 500);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
[retroarch]
executable = "/opt/retroarch/bin/retroarch"

[display]
fullscreen = false

[timing]
shutdown_timeout_ms = 3000
"#;
        let config: HarnessConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.retroarch.executable,
            PathBuf::from("/opt/retroarch/bin/retroarch")
        );
        assert!(!config.display.fullscreen);
        assert_eq!(config.display.resolution, "800x600");
        assert_eq!(config.timing.shutdown_timeout_ms, 3000);
        assert_eq!(config.timing.heartbeat_interval_ms, 100);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = HarnessConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.display.resolution, "800x600");
    }

    #[test]
    fn test_load_malformed_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("retrosmith.toml");
        std::fs::write(&path, "[display\nresolution = ").unwrap();
        let err = HarnessConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_resolve_valid_settings() {
        let mut config = config_with_executable("/bin/sh");
        config.retroarch.launcher_args = vec!["-c".to_string()];
        config.display.resolution = "1920x1080".to_string();
        config.timing.heartbeat_interval_ms = 20;

        let settings = Settings::resolve(&config).unwrap();
        assert_eq!(settings.executable, PathBuf::from("/bin/sh"));
        assert_eq!(settings.launcher_args, vec!["-c"]);
        assert_eq!(settings.resolution, "1920x1080");
        assert!(settings.paths.root().is_absolute());
        assert_eq!(settings.timing.heartbeat_interval, Duration::from_millis(20));
    }

    #[test]
    fn test_resolve_missing_executable() {
        let config = config_with_executable("/nonexistent/retroarch-xyz");
        let err = Settings::resolve(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ExecutableNotFound { .. }));
    }

    #[test]
    fn test_resolve_rejects_bad_resolution() {
        for bad in ["800", "800x", "x600", "0x600", "800X600", "800x600 "] {
            let mut config = config_with_executable("/bin/sh");
            config.display.resolution = bad.to_string();
            let err = Settings::resolve(&config).unwrap_err();
            assert!(
                matches!(err, ConfigError::Resolution { .. }),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_rejects_zero_timing_values() {
        let zeroed: [(&str, fn(&mut TimingConfig)); 4] = [
            ("heartbeat_interval_ms", |t| t.heartbeat_interval_ms = 0),
            ("heartbeat_stall_ms", |t| t.heartbeat_stall_ms = 0),
            ("response_timeout_ms", |t| t.response_timeout_ms = 0),
            ("shutdown_timeout_ms", |t| t.shutdown_timeout_ms = 0),
        ];
        for (name, zero) in zeroed {
            let mut config = config_with_executable("/bin/sh");
            zero(&mut config.timing);
            match Settings::resolve(&config).unwrap_err() {
                ConfigError::ZeroInterval { field } => assert_eq!(field, name),
                other => panic!("{name}: unexpected {other:?}"),
            }
        }

        // Settling after launch may legitimately be skipped.
        let mut config = config_with_executable("/bin/sh");
        config.timing.launch_settle_ms = 0;
        assert!(Settings::resolve(&config).is_ok());
    }
}
