use crate::types::{Drive, VmPowerState};
use crate::{Result, VmediaError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub defaults: DefaultConfig,
    #[serde(default)]
    pub vms: Vec<VmConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultConfig {
    pub device_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    /// Where bindings of removable drives are persisted. Defaults to
    /// `~/.vmedia/state`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmConfig {
    pub name: String,
    #[serde(default)]
    pub power: VmPowerState,
    #[serde(default)]
    pub backend: BackendConfig,
    pub drives: Vec<Drive>,
}

/// How to reach the emulated devices of a running VM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Qmp {
        socket: PathBuf,
    },
    Firecracker {
        socket: PathBuf,
    },
    #[default]
    None,
}

/// Tunables of a drive media manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerSettings {
    pub device_timeout: Duration,
    pub probe_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            device_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl ManagerSettings {
    /// Both deadlines must be non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.device_timeout.is_zero() {
            return Err(VmediaError::ConfigError(
                "device timeout must be greater than zero".to_string(),
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(VmediaError::ConfigError(
                "probe timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl DefaultConfig {
    pub fn settings(&self) -> ManagerSettings {
        ManagerSettings {
            device_timeout: Duration::from_secs(self.device_timeout_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
        }
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(vmedia_home()?.join("state")),
        }
    }
}

impl VmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(VmediaError::ConfigError("VM name cannot be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for drive in &self.drives {
            if drive.id.is_empty() {
                return Err(VmediaError::ConfigError(format!(
                    "VM '{}' has a drive without an id",
                    self.name
                )));
            }
            if !seen.insert(drive.id.as_str()) {
                return Err(VmediaError::ConfigError(format!(
                    "VM '{}' declares drive '{}' more than once",
                    self.name, drive.id
                )));
            }
        }

        Ok(())
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| VmediaError::ConfigError(e.to_string()))?;
        config.defaults.settings().validate()?;
        for vm in &config.vms {
            vm.validate()?;
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(config_dir) = config_path.parent() {
            std::fs::create_dir_all(config_dir)?;
        }

        let content =
            serde_yaml::to_string(self).map_err(|e| VmediaError::ConfigError(e.to_string()))?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(vmedia_home()?.join("config.yaml"))
    }

    pub fn vm(&self, name: &str) -> Result<&VmConfig> {
        self.vms
            .iter()
            .find(|vm| vm.name == name)
            .ok_or_else(|| VmediaError::UnknownVm(name.to_string()))
    }
}

impl Default for Config {
    fn default() -> Self {
        let settings = ManagerSettings::default();
        Self {
            version: "1.0".to_string(),
            defaults: DefaultConfig {
                device_timeout_secs: settings.device_timeout.as_secs(),
                probe_timeout_secs: settings.probe_timeout.as_secs(),
                state_dir: None,
            },
            vms: vec![],
        }
    }
}

fn vmedia_home() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| {
        VmediaError::ConfigError("Cannot determine home directory".to_string())
    })?;
    Ok(home.join(".vmedia"))
}
