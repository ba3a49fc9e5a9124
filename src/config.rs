//! Configuration types.

use std::time::Duration;

use crate::driver::DriverKind;
use crate::error::ConfigError;

/// Settings for the local backend's worker threads.
#[derive(Debug, Clone)]
pub struct LocalDriverConfig {
    /// Worker threads are named `<prefix>-<n>`.
    pub thread_name_prefix: String,
    /// Worker stack size in bytes (platform default when unset).
    pub stack_size: Option<usize>,
    /// How often a worker checks its child for exit or cancellation.
    pub poll_interval: Duration,
}

impl Default for LocalDriverConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "local-job".to_string(),
            stack_size: None,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Driver selection plus per-backend settings.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Backend to allocate.
    pub kind: DriverKind,
    pub local: LocalDriverConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            kind: DriverKind::Local,
            local: LocalDriverConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Build from `QUEUE_DRIVER`, `QUEUE_DRIVER_POLL_MS` and
    /// `QUEUE_DRIVER_STACK_SIZE`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(kind) = lookup("QUEUE_DRIVER") {
            config.kind = kind.parse()?;
        }

        if let Some(ms) = lookup("QUEUE_DRIVER_POLL_MS") {
            let ms: u64 = ms.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "QUEUE_DRIVER_POLL_MS".to_string(),
                message: format!("expected milliseconds, got {ms:?}"),
            })?;
            if ms == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "QUEUE_DRIVER_POLL_MS".to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
            config.local.poll_interval = Duration::from_millis(ms);
        }

        if let Some(size) = lookup("QUEUE_DRIVER_STACK_SIZE") {
            let size = size.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "QUEUE_DRIVER_STACK_SIZE".to_string(),
                message: format!("expected a byte count, got {size:?}"),
            })?;
            config.local.stack_size = Some(size);
        }

        Ok(config)
    }
}
