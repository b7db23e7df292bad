pub mod config;
pub mod dependents;
pub mod error;
pub mod operator;
pub mod ownership;
pub mod reconciler;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod types;

pub use config::OperatorConfig;
pub use dependents::{DependentKind, DependentObject};
pub use error::{Error, Result};
pub use operator::Operator;
pub use reconciler::{Action, Attempt, Outcome, Reconciler, Step};
pub use scheduler::{Scheduler, WorkQueue};
pub use shutdown::GracefulShutdown;
pub use store::{KubeStore, MemoryStore, ObjectStore};
pub use types::*;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default` (e.g. `"info"` or `"jsonserver_operator=debug"`).
pub fn init_tracing(default: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
}

pub mod prelude {
    pub use crate::config::OperatorConfig;
    pub use crate::dependents::{DependentKind, DependentObject};
    pub use crate::error::{Error, Result};
    pub use crate::operator::Operator;
    pub use crate::reconciler::{Action, Reconciler};
    pub use crate::store::{KubeStore, MemoryStore, ObjectStore};
    pub use crate::types::{
        JsonServer, JsonServerSpec, JsonServerState, JsonServerStatus, Labels, ObjectKey,
    };

    pub use kube::CustomResourceExt;
    pub use tokio_util::sync::CancellationToken;

    pub use std::sync::Arc;
    pub use std::time::Duration;
}
