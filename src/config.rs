//! Configuration management for the kiosk input pipeline
//!
//! Configuration is read from a platform-specific TOML file. Every section
//! and field has a default, so a missing file or a partial file is fine.
//!
//! ## Config File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/kiosk-input/config.toml` |
//! | macOS | `~/Library/Application Support/kiosk-input/config.toml` |
//! | Windows | `%APPDATA%\kiosk-input\config.toml` |
//!
//! ## Example
//!
//! ```no_run
//! use kiosk_input::Config;
//!
//! let mut config = Config::load().unwrap_or_default();
//! config.timing.long_press_ms = 1500;
//! config.save().expect("Failed to save config");
//! ```

use crate::calibration::{self, default_prompts};
use crate::keyboard::{GestureTimings, GrabRetry, KeyCode};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to determine config directory
    NoConfigDir,
    /// IO error reading or writing config file
    Io(io::Error),
    /// Failed to parse config file
    Parse(toml::de::Error),
    /// Failed to serialize config
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NoConfigDir => write!(f, "Could not determine config directory"),
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Serialize(e) => write!(f, "Serialize error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::NoConfigDir => None,
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Serialize(e) => Some(e),
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Serialize(e)
    }
}

/// Returns the application directory, creating it if needed.
pub fn app_dir() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    let app_dir = config_dir.join("kiosk-input");

    if !app_dir.exists() {
        fs::create_dir_all(&app_dir)?;
    }

    Ok(app_dir)
}

/// Returns the path to the config file.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_dir()?.join("config.toml"))
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Keyboard device selection and grabbing
    #[serde(default)]
    pub device: DeviceConfig,
    /// Gesture thresholds
    #[serde(default)]
    pub timing: TimingConfig,
    /// Special keys
    #[serde(default)]
    pub keys: KeysConfig,
    /// Calibration file and prompts
    #[serde(default)]
    pub calibration: CalibrationConfig,
    /// Parent/administration mode
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Keyboard device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device node, e.g. `/dev/input/by-path/...-event-kbd`; auto-detected if unset
    pub path: Option<PathBuf>,
    /// Take exclusive ownership of the keyboard
    pub grab: bool,
    /// Attempts before giving up on a grab held by another process
    pub grab_retries: u32,
    /// Wait after the first failed grab attempt, grows linearly
    pub grab_backoff_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: None,
            grab: true,
            grab_retries: 5,
            grab_backoff_ms: 200,
        }
    }
}

impl DeviceConfig {
    pub fn grab_retry(&self) -> GrabRetry {
        GrabRetry {
            attempts: self.grab_retries,
            backoff: Duration::from_millis(self.grab_backoff_ms),
        }
    }
}

/// Gesture timing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Hold time that turns the long-press key into a long-press
    pub long_press_ms: u64,
    /// Shift presses shorter than this arm sticky-shift
    pub sticky_tap_ms: u64,
    /// How long sticky-shift waits for a character
    pub sticky_expiry_ms: u64,
    /// Max gap between release and re-press for a double-tap
    pub double_tap_window_ms: u64,
    /// Synthetic release delay in the terminal fallback
    pub fallback_release_ms: u64,
    /// How often the gesture clock advances while no key event arrives
    pub idle_tick_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            long_press_ms: 1000,
            sticky_tap_ms: 300,
            sticky_expiry_ms: 5000,
            double_tap_window_ms: 400,
            fallback_release_ms: 120,
            idle_tick_ms: 50,
        }
    }
}

impl TimingConfig {
    pub fn gesture_timings(&self) -> GestureTimings {
        GestureTimings {
            long_press: Duration::from_millis(self.long_press_ms),
            sticky_tap: Duration::from_millis(self.sticky_tap_ms),
            sticky_expiry: Duration::from_millis(self.sticky_expiry_ms),
            double_tap_window: Duration::from_millis(self.double_tap_window_ms),
        }
    }

    pub fn fallback_release(&self) -> Duration {
        Duration::from_millis(self.fallback_release_ms)
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms.max(1))
    }
}

/// Special key configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeysConfig {
    /// Label of the key whose long-press opens administration mode
    pub long_press_key: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            long_press_key: "Escape".to_string(),
        }
    }
}

impl KeysConfig {
    /// The long-press key, falling back to Escape for unknown labels
    pub fn long_press_keycode(&self) -> KeyCode {
        KeyCode::from_label(&self.long_press_key).unwrap_or_else(|| {
            warn!(
                "unknown long_press_key {:?}, using Escape",
                self.long_press_key
            );
            KeyCode::ESCAPE
        })
    }
}

/// Calibration configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Calibration file; defaults to `calibration.json` next to the config file
    pub path: Option<PathBuf>,
    /// Labels asked for, in order, by `--calibrate`
    pub prompts: Vec<String>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            path: None,
            prompts: default_prompts(),
        }
    }
}

impl CalibrationConfig {
    pub fn resolved_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => calibration::calibration_path(),
        }
    }
}

/// Administration mode configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Program run on the real terminal after the long-press
    pub shell: String,
    /// Arguments passed to `shell` as-is, no shell quoting applies
    pub args: Vec<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            args: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file.
    ///
    /// Returns the default configuration if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default config file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_config_path() -> PathBuf {
        env::temp_dir().join(format!("kiosk-input-test-{}.toml", std::process::id()))
    }

    #[test]
    fn config_default_values() {
        let config = Config::default();
        assert_eq!(config.device.path, None);
        assert!(config.device.grab);
        assert_eq!(config.device.grab_retries, 5);
        assert_eq!(config.timing.long_press_ms, 1000);
        assert_eq!(config.timing.sticky_tap_ms, 300);
        assert_eq!(config.timing.double_tap_window_ms, 400);
        assert_eq!(config.keys.long_press_key, "Escape");
        assert_eq!(config.calibration.prompts.len(), 12);
        assert_eq!(config.admin.shell, "/bin/sh");
    }

    #[test]
    fn timing_converts_to_gesture_timings() {
        let config = Config::default();
        assert_eq!(config.timing.gesture_timings(), GestureTimings::default());
        assert_eq!(config.timing.fallback_release(), Duration::from_millis(120));
    }

    #[test]
    fn idle_tick_never_zero() {
        let mut config = Config::default();
        config.timing.idle_tick_ms = 0;
        assert_eq!(config.timing.idle_tick(), Duration::from_millis(1));
    }

    #[test]
    fn grab_retry_from_device_config() {
        let device = DeviceConfig {
            grab_retries: 3,
            grab_backoff_ms: 50,
            ..Default::default()
        };
        assert_eq!(
            device.grab_retry(),
            GrabRetry {
                attempts: 3,
                backoff: Duration::from_millis(50)
            }
        );
    }

    #[test]
    fn long_press_key_resolution() {
        let mut keys = KeysConfig::default();
        assert_eq!(keys.long_press_keycode(), KeyCode::ESCAPE);
        keys.long_press_key = "F13".to_string();
        assert_eq!(keys.long_press_keycode(), KeyCode(183));
        keys.long_press_key = "Rainbow".to_string();
        assert_eq!(keys.long_press_keycode(), KeyCode::ESCAPE);
    }

    #[test]
    fn config_save_and_load_roundtrip() {
        let path = temp_config_path();

        let mut config = Config::default();
        config.device.path = Some(PathBuf::from("/dev/input/event7"));
        config.timing.long_press_ms = 1500;
        config.calibration.prompts = vec!["F13".to_string(), "F14".to_string()];

        config.save_to(&path).expect("Failed to save config");
        let loaded = Config::load_from(&path).expect("Failed to load config");
        assert_eq!(loaded, config);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn config_load_missing_file_is_error() {
        let path = PathBuf::from("/nonexistent/path/config.toml");
        let result = Config::load_from(&path);
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn partial_config_uses_defaults() {
        let toml_str = r#"
[timing]
long_press_ms = 2000

[keys]
long_press_key = "F12"
"#;
        let config: Config = toml::from_str(toml_str).expect("Failed to deserialize");
        assert_eq!(config.timing.long_press_ms, 2000);
        assert_eq!(config.timing.sticky_tap_ms, 300);
        assert_eq!(config.keys.long_press_keycode(), KeyCode(88));
        assert!(config.device.grab);
        assert_eq!(config.admin.shell, "/bin/sh");
        assert!(config.admin.args.is_empty());
    }

    #[test]
    fn admin_args_keep_spaces() {
        let toml_str = r#"
[admin]
shell = "/bin/sh"
args = ["-c", "exec login -f kiosk"]
"#;
        let config: Config = toml::from_str(toml_str).expect("Failed to deserialize");
        assert_eq!(config.admin.shell, "/bin/sh");
        assert_eq!(config.admin.args, vec!["-c", "exec login -f kiosk"]);
    }

    #[test]
    fn config_serializes_to_toml() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).expect("Failed to serialize");

        assert!(toml_str.contains("[device]"));
        assert!(toml_str.contains("[timing]"));
        assert!(toml_str.contains("[keys]"));
        assert!(toml_str.contains("long_press_ms = 1000"));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::NoConfigDir;
        assert_eq!(err.to_string(), "Could not determine config directory");

        let io_err = ConfigError::Io(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        assert!(io_err.to_string().contains("IO error"));
    }
}
