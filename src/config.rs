use crate::error::{Error, Result};
use envconfig::Envconfig;
use std::time::Duration;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    /// Watch a single namespace. Unset watches all namespaces.
    #[envconfig(from = "JSONSERVER_NAMESPACE")]
    pub namespace: Option<String>,
    #[envconfig(from = "JSONSERVER_WORKERS", default = "4")]
    pub workers: usize,
    #[envconfig(from = "JSONSERVER_REQUEUE_SOON_MS", default = "1000")]
    pub requeue_soon_ms: u64,
    #[envconfig(from = "JSONSERVER_BACKOFF_BASE_MS", default = "5")]
    pub backoff_base_ms: u64,
    #[envconfig(from = "JSONSERVER_BACKOFF_MAX_SECS", default = "1000")]
    pub backoff_max_secs: u64,
    #[envconfig(from = "JSONSERVER_FIELD_MANAGER", default = "jsonserver-operator")]
    pub field_manager: String,
    #[envconfig(from = "JSONSERVER_SHUTDOWN_GRACE_SECS", default = "10")]
    pub shutdown_grace_secs: u64,
}

impl OperatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig(
                "JSONSERVER_WORKERS must be at least 1".into(),
            ));
        }
        if self.backoff_base() > self.backoff_max() {
            return Err(Error::InvalidConfig(format!(
                "backoff base {:?} exceeds backoff max {:?}",
                self.backoff_base(),
                self.backoff_max()
            )));
        }
        if self.field_manager.is_empty() {
            return Err(Error::InvalidConfig(
                "JSONSERVER_FIELD_MANAGER must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn requeue_soon(&self) -> Duration {
        Duration::from_millis(self.requeue_soon_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            workers: 4,
            requeue_soon_ms: 1000,
            backoff_base_ms: 5,
            backoff_max_secs: 1000,
            field_manager: "jsonserver-operator".into(),
            shutdown_grace_secs: 10,
        }
    }
}
