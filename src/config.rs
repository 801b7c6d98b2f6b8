//! Configuration loading.
//!
//! Settings come from a TOML file merged with `ASTROGATE_`-prefixed
//! environment variables, the environment taking precedence:
//!
//! ```text
//! ASTROGATE_SERVER_LISTEN=0.0.0.0:8600
//! ASTROGATE_POLL_HOST=10.0.0.5
//! ASTROGATE_EXPOSURE_MARGIN=30s
//! ```
//!
//! Every field has a default so the server starts with no file present.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::backend::{Address, BackendFlavor, DeviceKind};
use crate::error::{GateError, GateResult};

/// Top-level service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub poll: PollSettings,
    pub push: PushSettings,
    pub exposure: ExposureSettings,
    pub storage: StorageSettings,
    /// Declared drivers by name, used by the driver side endpoints.
    #[serde(default)]
    pub drivers: Vec<DriverEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Listen address for the websocket and HTTP surface.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Defaults for the poll protocol backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(default = "default_poll_host")]
    pub host: String,
    #[serde(default = "default_poll_port")]
    pub port: u16,
    #[serde(default)]
    pub device_number: u32,
    /// Sleep between samples in the status polling loop.
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub interval: Duration,
}

/// Defaults for the push protocol backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSettings {
    #[serde(default = "default_push_host")]
    pub host: String,
    #[serde(default = "default_push_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureSettings {
    /// Extra wait allowed past the requested exposure time before the
    /// completion wait is declared timed out.
    #[serde(with = "humantime_serde", default = "default_exposure_margin")]
    pub margin: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory for saved device configuration snapshots.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    /// Directory for persisted frames.
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
}

/// One declared driver for the side driver-control endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverEntry {
    pub name: String,
    pub kind: DeviceKind,
    pub flavor: BackendFlavor,
}

fn default_listen() -> String {
    "127.0.0.1:8600".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_host() -> String {
    "127.0.0.1".to_string()
}

fn default_poll_port() -> u16 {
    11111
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_push_host() -> String {
    "127.0.0.1".to_string()
}

fn default_push_port() -> u16 {
    7624
}

fn default_exposure_margin() -> Duration {
    Duration::from_secs(10)
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("astrogate")
}

fn default_image_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("astrogate")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                listen: default_listen(),
                log_level: default_log_level(),
            },
            poll: PollSettings {
                host: default_poll_host(),
                port: default_poll_port(),
                device_number: 0,
                interval: default_poll_interval(),
            },
            push: PushSettings {
                host: default_push_host(),
                port: default_push_port(),
            },
            exposure: ExposureSettings {
                margin: default_exposure_margin(),
            },
            storage: StorageSettings {
                config_dir: default_config_dir(),
                image_dir: default_image_dir(),
            },
            drivers: Vec::new(),
        }
    }
}

impl Settings {
    /// Load from a TOML file plus environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> GateResult<Self> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ASTROGATE_").split("_"))
            .extract()
            .map_err(|e| GateError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> GateResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(GateError::Config(format!(
                "invalid log_level '{}', expected one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            )));
        }
        if self.poll.interval.is_zero() {
            return Err(GateError::Config(
                "poll interval must be non-zero".to_string(),
            ));
        }
        let mut names = std::collections::HashSet::new();
        for driver in &self.drivers {
            if !names.insert(&driver.name) {
                return Err(GateError::Config(format!(
                    "duplicate driver name '{}'",
                    driver.name
                )));
            }
        }
        Ok(())
    }

    /// Default backend address for `kind`, honoring per-request overrides.
    ///
    /// Requests may carry host/port/device fields; anything omitted falls
    /// back to the configured backend defaults.
    pub fn address_for(
        &self,
        flavor: BackendFlavor,
        overrides: &AddressOverrides,
    ) -> Address {
        match flavor {
            BackendFlavor::Poll => Address {
                flavor,
                host: overrides
                    .host
                    .clone()
                    .unwrap_or_else(|| self.poll.host.clone()),
                port: overrides.port.unwrap_or(self.poll.port),
                device_number: Some(
                    overrides.device_number.unwrap_or(self.poll.device_number),
                ),
                device_name: None,
            },
            BackendFlavor::Push => Address {
                flavor,
                host: overrides
                    .host
                    .clone()
                    .unwrap_or_else(|| self.push.host.clone()),
                port: overrides.port.unwrap_or(self.push.port),
                device_number: None,
                device_name: overrides.device_name.clone(),
            },
        }
    }

}

/// Connect-time address fields a request may override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub device_number: Option<u32>,
    pub device_name: Option<String>,
}
