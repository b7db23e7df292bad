use crate::dependents::DependentKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict writing {0}: the object has been modified")]
    Conflict(String),

    #[error("{kind} {name} already exists and is not owned by JsonServer {name}")]
    Foreign { kind: DependentKind, name: String },

    #[error("Object store unavailable: {0}")]
    Transient(String),

    #[error("Reconciliation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors worth retrying with backoff. Ownership conflicts still get
    /// requeued, but only an operator can clear them.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(resp)) => resp.code == 429 || resp.code >= 500,
            Error::Kube(_) | Error::Transient(_) | Error::Conflict(_) => true,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
