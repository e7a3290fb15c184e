//! Config model and persistence helpers.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::{completion::CompletionSettings, models::GeoPoint};

/// Top-level configuration stored in `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Backend connection.
    pub api: ApiCfg,
    /// Delivery completion timing.
    pub delivery: DeliveryCfg,
    /// Location tracking.
    pub location: LocationCfg,
    /// Where the session is persisted.
    pub storage: StorageCfg,
    /// Log output.
    pub logging: LoggingCfg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCfg {
    /// Base URL of the order backend, without a trailing `/api`.
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryCfg {
    /// Units to wait before the OTP may be resent.
    pub resend_cooldown_units: u32,
    /// Length of one cooldown unit.
    pub cooldown_unit_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationCfg {
    /// Updates closer than this to the last one are dropped.
    pub min_distance_m: f64,
    /// Coordinate served by the console's static provider.
    pub latitude: f64,
    pub longitude: f64,
    /// Whether the static provider grants location permission.
    pub permission_granted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageCfg {
    /// JSON file holding `authToken` and `userData`.
    pub session_file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingCfg {
    /// Log file, written in the working directory.
    pub file: String,
    /// One of trace, debug, info, warn, error.
    pub level: String,
}

impl Config {
    /// Load from disk or create defaults when missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let s = fs::read_to_string(path)?;
            Ok(toml::from_str(&s)?)
        } else {
            let cfg = Self::default();
            cfg.save(path)?;
            Ok(cfg)
        }
    }

    /// Persist the config as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let s = toml::to_string_pretty(self)?;
        fs::write(path, s)?;
        Ok(())
    }

    /// HTTP timeout for every backend call.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    /// Cooldown length and tick for delivery completion.
    pub fn completion_settings(&self) -> CompletionSettings {
        CompletionSettings {
            cooldown_units: self.delivery.resend_cooldown_units,
            cooldown_unit: Duration::from_millis(self.delivery.cooldown_unit_ms),
        }
    }

    /// Coordinate served when no GPS is attached.
    pub fn fallback_position(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.location.latitude,
            longitude: self.location.longitude,
        }
    }

    /// Parsed log level; unknown names fall back to `info`.
    pub fn log_level(&self) -> tracing::Level {
        self.logging
            .level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiCfg {
                base_url: "http://localhost:5000".into(),
                request_timeout_secs: 30,
            },
            delivery: DeliveryCfg {
                resend_cooldown_units: 30,
                cooldown_unit_ms: 1_000,
            },
            location: LocationCfg {
                min_distance_m: 10.0,
                latitude: 5.6037,
                longitude: -0.1870,
                permission_granted: true,
            },
            storage: StorageCfg {
                session_file: "session.json".into(),
            },
            logging: LoggingCfg {
                file: "gas_courier.log".into(),
                level: "info".into(),
            },
        }
    }
}
