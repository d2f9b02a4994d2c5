// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::{LockError, Result};
use crate::locking::acquisition::PollingBackoff;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "distlock.toml";
pub const ENV_PREFIX: &str = "DISTLOCK";

const DEFAULT_KEY_PREFIX: &str = "locks:";
const DEFAULT_CACHE_CAPACITY: usize = 100;
const DEFAULT_WAIT_MS: u64 = 3_000;
const DEFAULT_LEASE_MS: u64 = 30_000;
const DEFAULT_EXPIRE_AFTER_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Namespace prepended to every key handed to the store.
    pub key_prefix: String,
    pub cache_capacity: usize,
    pub default_wait_ms: u64,
    pub default_lease_ms: u64,
    /// Ceiling on any lease; longer requests are clamped.
    pub expire_after_ms: u64,
    pub watchdog: WatchdogConfig,
    pub store: StoreConfig,
    pub backoff: BackoffConfig,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            default_wait_ms: DEFAULT_WAIT_MS,
            default_lease_ms: DEFAULT_LEASE_MS,
            expire_after_ms: DEFAULT_EXPIRE_AFTER_MS,
            watchdog: WatchdogConfig::default(),
            store: StoreConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,
    /// Renewal period. Defaults to a third of the lease.
    pub interval_ms: Option<u64>,
}

impl WatchdogConfig {
    pub fn interval_for(&self, lease: Duration) -> Duration {
        let interval = match self.interval_ms {
            Some(ms) => Duration::from_millis(ms),
            None => lease / 3,
        };
        interval.max(Duration::from_millis(1))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub factor: u32,
    pub cap_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 10,
            factor: 2,
            cap_ms: 200,
        }
    }
}

impl LockConfig {
    /// Loads defaults, then `path` (or `distlock.toml` in the working
    /// directory when present), then `DISTLOCK_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = toml::to_string(&LockConfig::default())
            .map_err(|e| LockError::ConfigError(format!("Failed to serialize defaults: {e}")))?;
        let mut builder =
            Config::builder().add_source(File::from_str(&defaults, FileFormat::Toml));

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(LockError::ConfigError(format!(
                        "Config file {} does not exist",
                        path.display()
                    )));
                }
                log::debug!("Loading lock config from {}", path.display());
                builder = builder.add_source(File::from(path));
            }
            None => {
                let default_path = PathBuf::from(CONFIG_FILE_NAME);
                if default_path.exists() {
                    log::debug!("Loading lock config from {}", default_path.display());
                    builder = builder.add_source(File::from(default_path.as_path()));
                } else {
                    log::debug!("No {CONFIG_FILE_NAME} found, using defaults");
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: LockConfig = builder
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(|e| LockError::ConfigError(format!("Failed to load lock config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(LockError::InvalidConfig(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.default_lease_ms == 0 {
            return Err(LockError::InvalidConfig(
                "default_lease_ms must be greater than zero".to_string(),
            ));
        }
        if self.expire_after_ms == 0 {
            return Err(LockError::InvalidConfig(
                "expire_after_ms must be greater than zero".to_string(),
            ));
        }
        if self.backoff.initial_ms == 0 || self.backoff.cap_ms < self.backoff.initial_ms {
            return Err(LockError::InvalidConfig(format!(
                "backoff must satisfy 0 < initial_ms <= cap_ms (got {} / {})",
                self.backoff.initial_ms, self.backoff.cap_ms
            )));
        }
        if self.watchdog.interval_ms == Some(0) {
            return Err(LockError::InvalidConfig(
                "watchdog.interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::File && self.store.directory.is_none() {
            return Err(LockError::InvalidConfig(
                "store.directory is required when store.backend = \"file\"".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_wait(&self) -> Duration {
        Duration::from_millis(self.default_wait_ms)
    }

    pub fn default_lease(&self) -> Duration {
        Duration::from_millis(self.default_lease_ms)
    }

    pub fn expire_after(&self) -> Duration {
        Duration::from_millis(self.expire_after_ms)
    }

    pub fn polling_backoff(&self) -> PollingBackoff {
        PollingBackoff::new(
            Duration::from_millis(self.backoff.initial_ms),
            self.backoff.factor,
            Duration::from_millis(self.backoff.cap_ms),
        )
    }
}
