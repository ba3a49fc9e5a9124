//! Driver construction and per-kind caching.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::DriverConfig;
use crate::driver::{Driver, DriverKind, LocalDriver, NullDriver};
use crate::error::DriverError;

/// Construct a driver of the given kind.
///
/// Remote scheduler backends (LSF, Torque, Slurm) are not built into this
/// crate and report [`DriverError::Unsupported`].
pub fn alloc(kind: DriverKind, config: &DriverConfig) -> Result<Arc<dyn Driver>, DriverError> {
    let driver: Arc<dyn Driver> = match kind {
        DriverKind::Null => Arc::new(NullDriver::new()),
        DriverKind::Local => Arc::new(LocalDriver::new(config.local.clone())),
        DriverKind::Lsf | DriverKind::Torque | DriverKind::Slurm => {
            return Err(DriverError::Unsupported { kind });
        }
    };
    tracing::info!(driver = driver.name(), "Allocated driver");
    Ok(driver)
}

/// One driver instance per backend kind in use.
pub struct DriverRegistry {
    config: DriverConfig,
    drivers: RwLock<HashMap<DriverKind, Arc<dyn Driver>>>,
}

impl DriverRegistry {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            drivers: RwLock::new(HashMap::new()),
        }
    }

    /// The driver for the configured default kind.
    pub async fn default_driver(&self) -> Result<Arc<dyn Driver>, DriverError> {
        self.get_or_alloc(self.config.kind).await
    }

    /// Return the cached driver for `kind`, allocating it on first use.
    pub async fn get_or_alloc(&self, kind: DriverKind) -> Result<Arc<dyn Driver>, DriverError> {
        if let Some(driver) = self.drivers.read().await.get(&kind) {
            return Ok(Arc::clone(driver));
        }

        let mut drivers = self.drivers.write().await;
        // Another caller may have allocated it while we waited for the lock.
        if let Some(driver) = drivers.get(&kind) {
            return Ok(Arc::clone(driver));
        }
        let driver = alloc(kind, &self.config)?;
        drivers.insert(kind, Arc::clone(&driver));
        Ok(driver)
    }

    /// Get an already allocated driver.
    pub async fn get(&self, kind: DriverKind) -> Option<Arc<dyn Driver>> {
        self.drivers.read().await.get(&kind).cloned()
    }

    /// Kinds with an allocated driver.
    pub async fn list(&self) -> Vec<DriverKind> {
        self.drivers.read().await.keys().copied().collect()
    }

    /// Free every driver and forget it. Callers must have freed all jobs.
    pub async fn free_all(&self) {
        let drivers: Vec<_> = self.drivers.write().await.drain().collect();
        for (kind, driver) in drivers {
            driver.free_driver().await;
            tracing::debug!(%kind, "Freed driver");
        }
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new(DriverConfig::default())
    }
}
