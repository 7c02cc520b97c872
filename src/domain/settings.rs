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
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
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
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
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
    "scooter_ble".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Address of the last manually connected scooter
    #[serde(default)]
    pub last_device_address: Option<String>,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    // Scan Settings
    #[serde(default = "default_scan_duration_ms")]
    pub scan_duration_ms: u64,
    #[serde(default = "default_false")]
    pub scan_include_unnamed: bool,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            last_device_address: None,
            auto_reconnect: default_true(),
            scan_duration_ms: default_scan_duration_ms(),
            scan_include_unnamed: default_false(),
            log_settings: LogSettings::default(),
        }
    }
}

fn default_scan_duration_ms() -> u64 {
    12_000
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from the per-user config directory
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Self::with_path(settings_path)
    }

    /// Load settings from an explicit file; missing or unreadable files yield defaults
    pub fn with_path(settings_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let settings_path = settings_path.into();
        if let Some(parent) = settings_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                if settings_path.exists() {
                    warn!(
                        "Ignoring unreadable settings file {}: {}",
                        settings_path.display(),
                        e
                    );
                }
                Settings::default()
            }
        };

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("ScooterBle");
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

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    /// Remember the scooter for reconnection at next startup
    pub fn set_last_device_address(&mut self, address: &str) -> anyhow::Result<()> {
        if self.settings.last_device_address.as_deref() != Some(address) {
            self.settings.last_device_address = Some(address.to_string());
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let service = SettingsService::with_path(dir.path().join("settings.json")).unwrap();
        assert_eq!(service.get().last_device_address, None);
        assert_eq!(service.get().scan_duration_ms, 12_000);
        assert!(service.get().auto_reconnect);
    }

    #[test]
    fn test_last_device_address_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut service = SettingsService::with_path(&path).unwrap();
        service
            .set_last_device_address("AA:BB:CC:DD:EE:FF")
            .unwrap();

        let reloaded = SettingsService::with_path(&path).unwrap();
        assert_eq!(
            reloaded.get().last_device_address.as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "scan_duration_ms": 0 }"#).unwrap();

        let service = SettingsService::with_path(&path).unwrap();
        assert_eq!(service.get().scan_duration_ms, 0);
        assert_eq!(service.get().log_settings.level, "info");
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let service = SettingsService::with_path(&path).unwrap();
        assert!(service.get().last_device_address.is_none());
    }
}
