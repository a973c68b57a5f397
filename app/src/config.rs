//! Daemon settings, loaded from and saved to a TOML file.
//!
//! ```toml
//! motion_timeout_secs = 60
//!
//! [bus]
//! address = "192.168.1.40:502"
//!
//! [switches]
//! polarity = "active_low"
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bus::{CoilAddresses, SwitchAddresses};
use crate::error::ConfigError;
use crate::panel::{Polarity, SwitchInterpreter};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/rolloff-roof.toml";
pub const MAX_MOTION_TIMEOUT_SECS: u32 = 150;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seconds a full open or close may take. Zero means unset, and motion
    /// is refused until it is configured.
    pub motion_timeout_secs: u32,
    pub bus: BusSettings,
    pub switches: SwitchSettings,
    pub coils: CoilAddresses,
    pub polling: Polling,
    pub http: HttpSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Modbus-TCP endpoint of the roof controller, `host:port`.
    pub address: String,
    pub unit_id: u8,
    /// Upper bound on any single bus transaction.
    pub io_timeout_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        BusSettings {
            address: String::from("127.0.0.1:502"),
            unit_id: 1,
            io_timeout_ms: 2000,
        }
    }
}

impl BusSettings {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchSettings {
    pub polarity: Polarity,
    #[serde(flatten)]
    pub addresses: SwitchAddresses,
}

impl SwitchSettings {
    pub fn interpreter(&self) -> Result<SwitchInterpreter, ConfigError> {
        SwitchInterpreter::new(self.addresses, self.polarity)
    }
}

/// Tick intervals: slow while the roof is idle, fast while it moves.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Polling {
    pub idle_secs: u64,
    pub moving_secs: u64,
}

impl Default for Polling {
    fn default() -> Self {
        Polling {
            idle_secs: 300,
            moving_secs: 1,
        }
    }
}

impl Polling {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn moving(&self) -> Duration {
        Duration::from_secs(self.moving_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub address: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            address: String::from("0.0.0.0:8888"),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Settings, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Writes the settings via a temporary file so a crash never leaves a
    /// truncated config behind.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let text = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("toml.tmp");
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        fs::write(&tmp, text).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.motion_timeout_secs > MAX_MOTION_TIMEOUT_SECS {
            return Err(invalid(format!(
                "motion_timeout_secs must be 0-{}, got {}",
                MAX_MOTION_TIMEOUT_SECS, self.motion_timeout_secs
            )));
        }
        if self.bus.address.is_empty() {
            return Err(invalid("bus.address cannot be empty".to_string()));
        }
        if self.bus.io_timeout_ms == 0 {
            return Err(invalid("bus.io_timeout_ms must be greater than 0".to_string()));
        }
        if self.coils.open == self.coils.close {
            return Err(invalid(format!(
                "coils.open and coils.close must differ, both are {}",
                self.coils.open
            )));
        }
        if self.polling.idle_secs == 0 || self.polling.moving_secs == 0 {
            return Err(invalid("polling intervals must be greater than 0".to_string()));
        }
        self.switches.interpreter()?;
        Ok(())
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Validation(message)
}
