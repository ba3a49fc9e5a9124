//! String-keyed option table shared by all backends.
//!
//! Each backend declares the keys it recognises together with a default
//! value and a validator. Anything outside that namespace is rejected.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::OptionError;

/// Upper bound on concurrently running jobs, advisory for the queue manager.
/// `"0"` means unlimited.
pub const MAX_RUNNING: &str = "MAX_RUNNING";

/// One recognised option key.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub key: &'static str,
    pub default: &'static str,
    validate: fn(&str) -> Result<(), String>,
}

impl OptionSpec {
    pub fn new(
        key: &'static str,
        default: &'static str,
        validate: fn(&str) -> Result<(), String>,
    ) -> Self {
        Self {
            key,
            default,
            validate,
        }
    }

    /// The `MAX_RUNNING` key every backend supports.
    pub fn max_running() -> Self {
        Self::new(MAX_RUNNING, "0", validate_non_negative_int)
    }
}

/// Accepts base-10 integers `>= 0`.
pub fn validate_non_negative_int(value: &str) -> Result<(), String> {
    value
        .trim()
        .parse::<usize>()
        .map(|_| ())
        .map_err(|_| "expected a non-negative integer".to_string())
}

/// Option values for one driver instance.
pub struct DriverOptions {
    driver: String,
    specs: Vec<OptionSpec>,
    values: RwLock<HashMap<&'static str, String>>,
}

impl DriverOptions {
    pub fn new(driver: impl Into<String>, specs: Vec<OptionSpec>) -> Self {
        Self {
            driver: driver.into(),
            specs,
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Options table holding only the keys common to every backend.
    pub fn generic(driver: impl Into<String>) -> Self {
        Self::new(driver, vec![OptionSpec::max_running()])
    }

    fn spec(&self, key: &str) -> Result<&OptionSpec, OptionError> {
        self.specs
            .iter()
            .find(|s| s.key == key)
            .ok_or_else(|| OptionError::UnknownKey {
                driver: self.driver.clone(),
                key: key.to_string(),
            })
    }

    /// Validate and store a value.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), OptionError> {
        let spec = self.spec(key)?;
        (spec.validate)(value).map_err(|reason| OptionError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason,
        })?;
        self.values
            .write()
            .await
            .insert(spec.key, value.to_string());
        tracing::debug!(driver = %self.driver, key, value, "Option set");
        Ok(())
    }

    /// Current value, falling back to the default. `None` for unknown keys.
    pub async fn get(&self, key: &str) -> Option<String> {
        let spec = self.spec(key).ok()?;
        let values = self.values.read().await;
        Some(
            values
                .get(spec.key)
                .cloned()
                .unwrap_or_else(|| spec.default.to_string()),
        )
    }

    /// Restore a key to its default.
    pub async fn unset(&self, key: &str) -> Result<(), OptionError> {
        let spec = self.spec(key)?;
        self.values.write().await.remove(spec.key);
        tracing::debug!(driver = %self.driver, key, "Option reset to default");
        Ok(())
    }

    /// All recognised keys, in declaration order.
    pub fn keys(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.key.to_string()).collect()
    }

    /// Parsed `MAX_RUNNING`; 0 when unset or not recognised.
    pub async fn max_running(&self) -> usize {
        self.get(MAX_RUNNING)
            .await
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for DriverOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverOptions")
            .field("driver", &self.driver)
            .field("keys", &self.keys())
            .finish()
    }
}
