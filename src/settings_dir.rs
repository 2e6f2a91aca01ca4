use std::path::{Path, PathBuf};

/// Manages the emulator settings directory layout.
///
/// RetroArch is launched with a config file that lives here, next to the BIOS
/// and controller autoconfig directories it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsDir {
    root: PathBuf,
}

impl SettingsDir {
    /// Create a new SettingsDir referencing the given root path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory (e.g. `settings/`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory RetroArch searches for BIOS images.
    pub fn bios(&self) -> PathBuf {
        self.root.join("bios")
    }

    /// Directory for joypad autoconfig profiles.
    pub fn controller(&self) -> PathBuf {
        self.root.join("controller")
    }

    /// Path to the RetroArch config file passed via `--config`.
    pub fn config_file(&self) -> PathBuf {
        self.root.join("retroarch.cfg")
    }

    /// Config content written when none exists yet. Enables the stdin command
    /// channel the supervisor depends on.
    pub fn default_config(&self) -> String {
        format!(
            "stdin_cmd_enable = \"true\"

# Configuration
system_directory = \"{bios}\"
config_save_on_exit = false

# Controllers
joypad_autoconfig_dir = \"{controller}\"
input_autodetect_enable = true

# Toggles eject for disks. Used for multiple-disk games.
# input_disk_eject_toggle =

# Cycles through disk images. Use after ejecting.
# Complete by toggling eject again.
# input_disk_next =
",
            bios = self.bios().display(),
            controller = self.controller().display(),
        )
    }

    /// Create root, bios/ and controller/, and write `retroarch.cfg` if missing.
    /// An existing config file is never overwritten.
    /// Returns Ok(true) if the config file was written, Ok(false) if it already existed.
    pub fn init(&self) -> std::io::Result<bool> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.bios())?;
        std::fs::create_dir_all(self.controller())?;

        let config_path = self.config_file();
        if config_path.exists() {
            tracing::info!(path = %config_path.display(), "config file exists, not overwriting");
            return Ok(false);
        }

        let content = self.default_config();
        tracing::debug!(path = %config_path.display(), "writing config file");
        std::fs::write(&config_path, content)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_dir_paths() {
        let dir = SettingsDir::new("/tmp/settings");
        assert_eq!(dir.root(), Path::new("/tmp/settings"));
        assert_eq!(dir.bios(), PathBuf::from("/tmp/settings/bios"));
        assert_eq!(dir.controller(), PathBuf::from("/tmp/settings/controller"));
        assert_eq!(
            dir.config_file(),
            PathBuf::from("/tmp/settings/retroarch.cfg")
        );
    }

    #[test]
    fn test_init_creates_directories_and_config() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = SettingsDir::new(tmp.path().join("settings"));

        assert!(dir.init().unwrap());
        assert!(dir.bios().is_dir());
        assert!(dir.controller().is_dir());

        let contents = std::fs::read_to_string(dir.config_file()).unwrap();
        assert!(contents.starts_with("stdin_cmd_enable = \"true\""));
        assert!(contents.contains(&format!(
            "system_directory = \"{}\"",
            dir.bios().display()
        )));
        assert!(contents.contains(&format!(
            "joypad_autoconfig_dir = \"{}\"",
            dir.controller().display()
        )));
        assert!(contents.contains("config_save_on_exit = false"));
    }

    #[test]
    fn test_init_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = SettingsDir::new(tmp.path().join("settings"));
        assert!(dir.init().unwrap());
        assert!(!dir.init().unwrap());
        assert!(dir.config_file().exists());
    }

    #[test]
    fn test_init_does_not_overwrite_existing_config() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = SettingsDir::new(tmp.path().join("settings"));
        std::fs::create_dir_all(dir.root()).unwrap();
        std::fs::write(dir.config_file(), "video_vsync = true\n").unwrap();

        assert!(!dir.init().unwrap());
        assert!(dir.bios().is_dir());
        let contents = std::fs::read_to_string(dir.config_file()).unwrap();
        assert_eq!(contents, "video_vsync = true\n");
    }
}
