//! File-backed pool settings
//!
//! The `[pool]` table of a host service's TOML config. Times are seconds as
//! floats so sub-second lifetimes stay expressible.

use std::time::Duration;

use serde::Deserialize;

use crate::config::{DEFAULT_CLEANUP_INTERVAL, DEFAULT_LIFETIME, FactoryBuilder};
use crate::entry::Handler;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_lifetime_secs")]
    pub lifetime_secs: f64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: f64,
    #[serde(default = "default_keep_cookie_store")]
    pub keep_cookie_store: bool,
}

fn default_lifetime_secs() -> f64 {
    DEFAULT_LIFETIME.as_secs_f64()
}

fn default_cleanup_interval_secs() -> f64 {
    DEFAULT_CLEANUP_INTERVAL.as_secs_f64()
}

fn default_keep_cookie_store() -> bool {
    true
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            lifetime_secs: default_lifetime_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            keep_cookie_store: default_keep_cookie_store(),
        }
    }
}

impl PoolSettings {
    pub fn lifetime(&self) -> Result<Duration> {
        positive_secs("lifetime_secs", self.lifetime_secs)
    }

    pub fn cleanup_interval(&self) -> Result<Duration> {
        positive_secs("cleanup_interval_secs", self.cleanup_interval_secs)
    }

    /// Apply these settings to a builder, validating every value.
    pub fn apply<H: Handler>(&self, builder: FactoryBuilder<H>) -> Result<FactoryBuilder<H>> {
        Ok(builder
            .set_lifetime(self.lifetime()?)?
            .set_cleanup_interval(self.cleanup_interval()?)?
            .set_keep_cookie_store(self.keep_cookie_store))
    }
}

fn positive_secs(field: &str, secs: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(Error::Configuration(format!(
            "{field} must be a positive number of seconds, got {secs}"
        ))),
    }
}
