//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use switchbot_core::{DeviceConfig, DeviceIdentity, SwitchbotModel};
use tracing::warn;

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection tunables applied to every device
    #[serde(default)]
    pub connection: DeviceConfig,

    /// Known devices
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// A device listed in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// MAC address (or platform UUID on macOS)
    pub address: String,

    /// Device model
    pub model: SwitchbotModel,

    /// Friendly name used on the command line
    #[serde(default)]
    pub alias: Option<String>,

    /// Device password, if one was set in the app
    #[serde(default)]
    pub password: Option<String>,

    /// Key id for encrypted models
    #[serde(default)]
    pub key_id: Option<String>,

    /// Encryption key for encrypted models
    #[serde(default)]
    pub encryption_key: Option<String>,
}

impl DeviceEntry {
    pub fn identity(&self) -> DeviceIdentity {
        match &self.alias {
            Some(alias) => DeviceIdentity::with_name(self.address.clone(), alias.clone()),
            None => DeviceIdentity::new(self.address.clone()),
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("switchbot")
            .join("config.toml")
    }

    /// Load config from the default path, or return default if not found
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`.
    ///
    /// A missing file yields the defaults; an unreadable or invalid one
    /// does too, with a warning.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read config");
                return Self::default();
            }
        };
        match Self::parse(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse config");
                Self::default()
            }
        }
    }

    fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.connection.validate()?;
        Ok(config)
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Find a device by alias or address.
    pub fn find(&self, device: &str) -> Option<&DeviceEntry> {
        self.devices
            .iter()
            .find(|d| d.alias.as_deref() == Some(device))
            .or_else(|| {
                self.devices
                    .iter()
                    .find(|d| d.address.eq_ignore_ascii_case(device))
            })
    }

    /// Resolve a device argument.
    ///
    /// Unknown devices are accepted as raw addresses when `model` is given.
    pub fn resolve(&self, device: &str, model: Option<SwitchbotModel>) -> Result<DeviceEntry> {
        if let Some(entry) = self.find(device) {
            let mut entry = entry.clone();
            if let Some(model) = model {
                entry.model = model;
            }
            return Ok(entry);
        }
        let model = model.ok_or_else(|| {
            anyhow!(
                "Unknown device '{device}'. Add it to {} or pass --model.",
                Self::path().display()
            )
        })?;
        Ok(DeviceEntry {
            address: device.to_string(),
            model,
            alias: None,
            password: None,
            key_id: None,
            encryption_key: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SAMPLE: &str = r#"
[connection]
retry_count = 4
disconnect_delay = 20.0

[[devices]]
alias = "front-door"
address = "AA:BB:CC:DD:EE:FF"
model = "lock_pro"
key_id = "ff"
encryption_key = "2b7e151628aed2a6abf7158809cf4f3c"

[[devices]]
address = "11:22:33:44:55:66"
model = "bot"
password = "hunter2"
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.connection.retry_count, 4);
        assert_eq!(config.connection.disconnect_delay, Duration::from_secs(20));
        assert_eq!(
            config.connection.command_timeout,
            DeviceConfig::default().command_timeout
        );
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].model, SwitchbotModel::LockPro);
        assert_eq!(config.devices[1].password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_find_by_alias_or_address() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(
            config.find("front-door").map(|d| d.address.as_str()),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(
            config.find("11:22:33:44:55:66").map(|d| d.model),
            Some(SwitchbotModel::Bot)
        );
        assert!(config.find("nope").is_none());
    }

    #[test]
    fn test_resolve_unknown_device() {
        let config = Config::default();
        assert!(config.resolve("AA:BB:CC:DD:EE:FF", None).is_err());
        let entry = config
            .resolve("AA:BB:CC:DD:EE:FF", Some(SwitchbotModel::PlugMini))
            .unwrap();
        assert_eq!(entry.model, SwitchbotModel::PlugMini);
        assert_eq!(entry.identity().name, None);
    }

    #[test]
    fn test_invalid_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "connection = 5").unwrap();
        let config = Config::load_from(&path);
        assert!(config.devices.is_empty());

        fs::write(&path, "[connection]\ncommand_timeout = 0.0\n").unwrap();
        assert_eq!(Config::load_from(&path).connection, DeviceConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::parse(SAMPLE).unwrap();
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path);
        assert_eq!(reloaded.devices, config.devices);
        assert_eq!(reloaded.connection, config.connection);
    }
}
