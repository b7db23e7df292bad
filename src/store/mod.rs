//! The object store boundary: reads, idempotent creates, status writes and
//! change notifications.

mod cluster;
mod memory;

pub use cluster::KubeStore;
pub use memory::{MemoryStore, RecordedEvent, StoreOp};

use crate::dependents::{DependentKind, DependentObject};
use crate::error::Result;
use crate::types::{JsonServer, JsonServerStatus, ObjectKey};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum CreateOutcome {
    /// The object as persisted, with server-assigned fields filled in.
    Created(DependentObject),
    /// Something already holds the name. Usually a concurrent attempt for the
    /// same key won the race.
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// `Ok(None)` means the parent does not exist.
    async fn get_parent(&self, key: &ObjectKey) -> Result<Option<JsonServer>>;

    async fn get_dependent(
        &self,
        kind: DependentKind,
        key: &ObjectKey,
    ) -> Result<Option<DependentObject>>;

    async fn create_dependent(&self, object: DependentObject) -> Result<CreateOutcome>;

    /// Writes `status` to the status subresource of `parent`. A write based on
    /// a stale `resourceVersion` fails with [`crate::Error::Conflict`].
    async fn update_status(&self, parent: &JsonServer, status: &JsonServerStatus) -> Result<()>;

    async fn record_event(
        &self,
        parent: &JsonServer,
        type_: EventType,
        reason: &str,
        note: &str,
    ) -> Result<()>;

    /// At-least-once, possibly duplicated notifications of parent keys whose
    /// parent or dependents changed.
    fn changes(&self) -> BoxStream<'static, ObjectKey>;
}

#[async_trait]
impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    async fn get_parent(&self, key: &ObjectKey) -> Result<Option<JsonServer>> {
        (**self).get_parent(key).await
    }

    async fn get_dependent(
        &self,
        kind: DependentKind,
        key: &ObjectKey,
    ) -> Result<Option<DependentObject>> {
        (**self).get_dependent(kind, key).await
    }

    async fn create_dependent(&self, object: DependentObject) -> Result<CreateOutcome> {
        (**self).create_dependent(object).await
    }

    async fn update_status(&self, parent: &JsonServer, status: &JsonServerStatus) -> Result<()> {
        (**self).update_status(parent, status).await
    }

    async fn record_event(
        &self,
        parent: &JsonServer,
        type_: EventType,
        reason: &str,
        note: &str,
    ) -> Result<()> {
        (**self).record_event(parent, type_, reason, note).await
    }

    fn changes(&self) -> BoxStream<'static, ObjectKey> {
        (**self).changes()
    }
}
