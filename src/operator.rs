use crate::config::OperatorConfig;
use crate::error::{Error, Result};
use crate::reconciler::Reconciler;
use crate::scheduler::{Scheduler, WorkQueue};
use crate::shutdown::GracefulShutdown;
use crate::store::{KubeStore, ObjectStore};
use crate::types::JsonServer;
use envconfig::Envconfig;
use kube::{Client, Resource};
use std::sync::Arc;
use tracing::{info, warn};

/// Wires configuration, the object store, the reconciler and the scheduler,
/// and runs them until SIGINT/SIGTERM.
pub struct Operator {
    config: OperatorConfig,
    client: Option<Client>,
    shutdown: Option<GracefulShutdown>,
}

impl Default for Operator {
    fn default() -> Self {
        Self::new(OperatorConfig::default())
    }
}

impl Operator {
    pub fn new(config: OperatorConfig) -> Self {
        Self {
            config,
            client: None,
            shutdown: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        let config = OperatorConfig::init_from_env()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Uses `client` instead of inferring one from the environment.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Uses an externally owned shutdown handle instead of OS signals.
    pub fn with_shutdown(mut self, shutdown: GracefulShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub async fn run(mut self) -> Result<()> {
        self.config.validate()?;
        let client = match self.client.take() {
            Some(client) => client,
            None => Client::try_default().await.map_err(Error::Kube)?,
        };

        let mut store = KubeStore::new(client, self.config.field_manager.clone());
        if let Some(ns) = &self.config.namespace {
            store = store.namespace(ns.clone());
        }
        self.run_with_store(Arc::new(store)).await
    }

    /// Runs against any object store. Returns once shutdown has been
    /// initiated and the scheduler has drained or the grace period elapsed.
    pub async fn run_with_store<S: ObjectStore>(self, store: S) -> Result<()> {
        self.config.validate()?;
        info!(
            namespace = self.config.namespace.as_deref().unwrap_or("*"),
            "Starting operator for {}/{}",
            JsonServer::group(&()),
            JsonServer::kind(&())
        );

        let shutdown = match self.shutdown {
            Some(shutdown) => shutdown,
            None => {
                let shutdown = GracefulShutdown::new(self.config.shutdown_grace());
                shutdown.start_signal_handler();
                shutdown
            }
        };

        let changes = store.changes();
        let reconciler = Reconciler::new(store).requeue_soon(self.config.requeue_soon());
        let queue = WorkQueue::new(self.config.backoff_base(), self.config.backoff_max());
        let scheduler = Scheduler::new(reconciler, queue).workers(self.config.workers);

        let mut task = tokio::spawn(scheduler.run(changes, shutdown.token()));
        match shutdown.drain(&mut task).await {
            Some(Ok(())) => {
                info!("Operator stopped");
                Ok(())
            }
            Some(Err(e)) => Err(Error::Other(format!("scheduler task failed: {e}"))),
            None => {
                warn!("Aborting scheduler");
                task.abort();
                Ok(())
            }
        }
    }
}
