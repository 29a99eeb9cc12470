//! Application configuration loading from config.toml
//!
//! The `[engine]` table tunes pricing and lifecycle constants; `[[restaurants]]`
//! entries describe a catalog to seed on startup. Every field is optional, and an
//! absent file yields the built-in defaults.

use super::catalog::RestaurantSeed;
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Default config path, overridable with `TABLEFARE_CONFIG`.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub restaurants: Vec<RestaurantSeed>,
}

/// Constants of the order engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Currency units per awarded loyalty point
    pub currency_per_point: f64,
    /// Currency value of one redeemed loyalty point
    pub point_value: f64,
    /// Minutes added on top of the slowest item's preparation time
    pub preparation_buffer_minutes: i64,
    /// Preparation time assumed for new menu items and empty orders
    pub default_preparation_minutes: i32,
    /// How long a cached restaurant rating stays fresh
    pub rating_cache_ttl_seconds: i64,
    /// Maximum outbox events delivered per drain
    pub outbox_batch_size: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            currency_per_point: 10.0,
            point_value: 1.0,
            preparation_buffer_minutes: 15,
            default_preparation_minutes: 15,
            rating_cache_ttl_seconds: 300,
            outbox_batch_size: 100,
        }
    }
}

impl EngineSettings {
    /// Rejects settings that would break point or time arithmetic.
    pub fn validate(&self) -> Result<()> {
        if !self.currency_per_point.is_finite() || self.currency_per_point <= 0.0 {
            return Err(Error::Config {
                message: format!(
                    "currency_per_point must be positive, got {}",
                    self.currency_per_point
                ),
            });
        }
        if !self.point_value.is_finite() || self.point_value <= 0.0 {
            return Err(Error::Config {
                message: format!("point_value must be positive, got {}", self.point_value),
            });
        }
        if self.preparation_buffer_minutes < 0 || self.default_preparation_minutes < 1 {
            return Err(Error::Config {
                message: "preparation times must be non-negative (default at least 1)"
                    .to_string(),
            });
        }
        if self.outbox_batch_size == 0 {
            return Err(Error::Config {
                message: "outbox_batch_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Rating cache lifetime as a `chrono` duration.
    #[must_use]
    pub fn rating_cache_ttl(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::seconds(self.rating_cache_ttl_seconds)
    }
}

/// Parses configuration from TOML text.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;
    config.engine.validate()?;
    Ok(config)
}

/// Loads configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - The engine settings are out of range
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;
    parse_config(&contents)
}

/// Loads configuration from `TABLEFARE_CONFIG` (or ./config.toml), falling back to
/// defaults when the file does not exist.
pub fn load_default_config() -> Result<AppConfig> {
    let path = std::env::var("TABLEFARE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    if Path::new(&path).exists() {
        load_config(&path)
    } else {
        tracing::info!("No config file at {}, using defaults", path);
        Ok(AppConfig::default())
    }
}
