use std::time::Duration;

use crate::error::SyncError;

/// Tick intervals of the reconciliation loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Period of every per-federation namespace sync loop.
    pub namespace_sync_interval: Duration,
    /// Period of the controller manager loop.
    pub manager_interval: Duration,
    /// Recorded as creator of dispatched sync tasks.
    pub instance: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            namespace_sync_interval: Duration::from_secs(5 * 60),
            manager_interval: Duration::from_secs(3 * 60),
            instance: "fedplane-sync".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.namespace_sync_interval.is_zero() {
            return Err(SyncError::Config(
                "namespace sync interval must be positive".into(),
            ));
        }
        if self.manager_interval.is_zero() {
            return Err(SyncError::Config("manager interval must be positive".into()));
        }
        if self.instance.trim().is_empty() {
            return Err(SyncError::Config("instance name is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_is_rejected() {
        assert!(SyncConfig::default().validate().is_ok());
        let cfg = SyncConfig {
            manager_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(SyncError::Config(_))));
    }
}
