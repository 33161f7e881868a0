use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_false")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_true(),
            show_target: default_true(),
            ansi_colors: default_false(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "acs_ble_reader".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// "ACR1255U-J1 Auth" in text
pub const DEFAULT_MASTER_KEY: [u8; 16] = *b"ACR1255U-J1 Auth";

/// Idle time after which the reader goes to sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepMode {
    Sec60,
    Sec90,
    Sec120,
    Sec180,
    #[default]
    Never,
}

impl SleepMode {
    /// Parameter byte of the sleep-mode escape command.
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Sec60 => 0x00,
            Self::Sec90 => 0x01,
            Self::Sec120 => 0x02,
            Self::Sec180 => 0x03,
            Self::Never => 0x04,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Reader Settings
    /// Hex encoded 16 byte master key used to authenticate the reader
    #[serde(default = "default_auth_key")]
    pub auth_key: String,
    #[serde(default)]
    pub sleep_mode: SleepMode,

    // Lifecycle Settings
    #[serde(default = "default_true")]
    pub reconnect_on_resume: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            auth_key: default_auth_key(),
            sleep_mode: SleepMode::default(),
            reconnect_on_resume: default_true(),
        }
    }
}

fn default_auth_key() -> String {
    hex::encode_upper(DEFAULT_MASTER_KEY)
}

/// Reader parameters read when a session is set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    pub auth_key: [u8; 16],
    pub sleep_mode: SleepMode,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            auth_key: DEFAULT_MASTER_KEY,
            sleep_mode: SleepMode::default(),
        }
    }
}

impl Settings {
    pub fn reader_config(&self) -> ReaderConfig {
        let auth_key = match hex::decode(self.auth_key.trim()) {
            Ok(bytes) => match <[u8; 16]>::try_from(bytes.as_slice()) {
                Ok(key) => key,
                Err(_) => {
                    warn!(
                        "Auth key must be 16 bytes, got {}. Using the default key.",
                        bytes.len()
                    );
                    DEFAULT_MASTER_KEY
                }
            },
            Err(e) => {
                warn!("Auth key is not valid hex: {}. Using the default key.", e);
                DEFAULT_MASTER_KEY
            }
        };

        ReaderConfig {
            auth_key,
            sleep_mode: self.sleep_mode,
        }
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load settings from `path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("AcsBleReader");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
