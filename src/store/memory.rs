use super::{CreateOutcome, EventType, ObjectStore};
use crate::dependents::{DependentKind, DependentObject};
use crate::error::{Error, Result};
use crate::types::{JsonServer, JsonServerStatus, ObjectKey};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{future, StreamExt};
use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

/// Store operations that can be made to fail on demand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetParent,
    GetDependent(DependentKind),
    Create(DependentKind),
    UpdateStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub key: ObjectKey,
    pub type_: EventType,
    pub reason: String,
    pub note: String,
}

/// In-process object store with API-server semantics that matter to the
/// controller: server-assigned uid and resourceVersion, `AlreadyExists` on
/// duplicate creates, conditional status writes, change notifications and
/// owner-reference garbage collection.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<ObjectKey>,
}

#[derive(Default)]
struct Inner {
    parents: BTreeMap<ObjectKey, JsonServer>,
    dependents: BTreeMap<(DependentKind, ObjectKey), DependentObject>,
    next_uid: u64,
    next_version: u64,
    create_calls: HashMap<DependentKind, usize>,
    status_writes: usize,
    events: Vec<RecordedEvent>,
    failures: HashMap<StoreOp, usize>,
    hidden: HashMap<(DependentKind, ObjectKey), usize>,
}

impl Inner {
    fn uid(&mut self) -> String {
        self.next_uid += 1;
        format!("00000000-0000-0000-0000-{:012}", self.next_uid)
    }

    fn version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn take_failure(&mut self, op: StoreOp) -> Result<()> {
        match self.failures.get_mut(&op) {
            Some(n) if *n > 0 => {
                *n -= 1;
                Err(Error::Transient(format!("injected failure on {op:?}")))
            }
            _ => Ok(()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            inner: Mutex::new(Inner::default()),
            changes,
        }
    }

    fn notify(&self, key: ObjectKey) {
        trace!(%key, "change notification");
        let _ = self.changes.send(key);
    }

    /// Creates or updates a parent the way its author would. Spec changes bump
    /// the generation; status is left alone.
    pub fn apply_parent(&self, mut parent: JsonServer) -> JsonServer {
        let key = parent.key();
        let stored = {
            let mut inner = self.inner.lock();
            match inner.parents.get(&key).cloned() {
                Some(existing) => {
                    parent.metadata = existing.metadata.clone();
                    parent.status = existing.status.clone();
                    if parent.spec != existing.spec {
                        parent.metadata.generation = existing.metadata.generation.map(|g| g + 1);
                    }
                }
                None => {
                    parent.metadata.uid = Some(inner.uid());
                    parent.metadata.generation = Some(1);
                    parent.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
                    parent.status = None;
                }
            }
            parent.metadata.resource_version = Some(inner.version());
            inner.parents.insert(key.clone(), parent.clone());
            parent
        };
        self.notify(key);
        stored
    }

    /// Deletes a parent and garbage-collects every dependent whose owner
    /// references all pointed at it. Dependents without a back-reference to
    /// the parent are left alone.
    pub fn delete_parent(&self, key: &ObjectKey) -> Option<JsonServer> {
        let removed = {
            let mut inner = self.inner.lock();
            let removed = inner.parents.remove(key)?;
            let live: HashSet<String> = inner.parents.values().filter_map(|p| p.uid()).collect();
            inner.dependents.retain(|_, obj| match &obj.meta().owner_references {
                Some(refs) if !refs.is_empty() => refs.iter().any(|r| live.contains(&r.uid)),
                _ => true,
            });
            removed
        };
        self.notify(key.clone());
        Some(removed)
    }

    /// Puts a dependent in place without going through the controller, e.g.
    /// an object someone else created under the parent's name.
    pub fn insert_dependent(&self, mut object: DependentObject) -> DependentObject {
        let key = ObjectKey::new(
            object.meta().namespace.clone().unwrap_or_default(),
            object.name(),
        );
        {
            let mut inner = self.inner.lock();
            let uid = inner.uid();
            let version = inner.version();
            let meta = object.meta_mut();
            meta.uid = Some(uid);
            meta.resource_version = Some(version);
            inner
                .dependents
                .insert((object.kind(), key.clone()), object.clone());
        }
        self.notify(key);
        object
    }

    /// Plays the deployment controller: reports `replicas` running pods.
    pub fn set_workload_replicas(&self, key: &ObjectKey, replicas: i32) {
        let changed = {
            let mut inner = self.inner.lock();
            let version = inner.version();
            match inner.dependents.get_mut(&(DependentKind::Workload, key.clone())) {
                Some(DependentObject::Workload(d)) => {
                    d.status = Some(DeploymentStatus {
                        replicas: Some(replicas),
                        ..Default::default()
                    });
                    d.metadata.resource_version = Some(version);
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.notify(key.clone());
        }
    }

    /// Makes the next `times` calls of `op` fail with a transient error.
    pub fn fail_next(&self, op: StoreOp, times: usize) {
        *self.inner.lock().failures.entry(op).or_default() += times;
    }

    /// Makes the next read of this dependent report it absent even if it
    /// exists, as if a concurrent attempt created it right after the read.
    /// Calls accumulate: hiding twice hides the next two reads.
    pub fn hide_next_read(&self, kind: DependentKind, key: &ObjectKey) {
        *self.inner.lock().hidden.entry((kind, key.clone())).or_default() += 1;
    }

    pub fn parent(&self, key: &ObjectKey) -> Option<JsonServer> {
        self.inner.lock().parents.get(key).cloned()
    }

    pub fn status(&self, key: &ObjectKey) -> Option<JsonServerStatus> {
        self.parent(key).and_then(|p| p.status)
    }

    pub fn dependent(&self, kind: DependentKind, key: &ObjectKey) -> Option<DependentObject> {
        self.inner.lock().dependents.get(&(kind, key.clone())).cloned()
    }

    pub fn dependent_count(&self) -> usize {
        self.inner.lock().dependents.len()
    }

    /// Create calls issued for `kind`, including ones that hit `AlreadyExists`.
    pub fn create_calls(&self, kind: DependentKind) -> usize {
        self.inner
            .lock()
            .create_calls
            .get(&kind)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_create_calls(&self) -> usize {
        self.inner.lock().create_calls.values().sum()
    }

    pub fn status_writes(&self) -> usize {
        self.inner.lock().status_writes
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.inner.lock().events.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_parent(&self, key: &ObjectKey) -> Result<Option<JsonServer>> {
        let mut inner = self.inner.lock();
        inner.take_failure(StoreOp::GetParent)?;
        Ok(inner.parents.get(key).cloned())
    }

    async fn get_dependent(
        &self,
        kind: DependentKind,
        key: &ObjectKey,
    ) -> Result<Option<DependentObject>> {
        let mut inner = self.inner.lock();
        inner.take_failure(StoreOp::GetDependent(kind))?;
        let slot = (kind, key.clone());
        if let Some(n) = inner.hidden.get_mut(&slot).filter(|n| **n > 0) {
            *n -= 1;
            return Ok(None);
        }
        Ok(inner.dependents.get(&slot).cloned())
    }

    async fn create_dependent(&self, mut object: DependentObject) -> Result<CreateOutcome> {
        let kind = object.kind();
        let key = ObjectKey::new(
            object.meta().namespace.clone().unwrap_or_default(),
            object.name(),
        );
        let created = {
            let mut inner = self.inner.lock();
            *inner.create_calls.entry(kind).or_default() += 1;
            inner.take_failure(StoreOp::Create(kind))?;

            let slot = (kind, key.clone());
            if inner.dependents.contains_key(&slot) {
                return Ok(CreateOutcome::AlreadyExists);
            }

            let uid = inner.uid();
            let version = inner.version();
            let meta = object.meta_mut();
            meta.uid = Some(uid);
            meta.resource_version = Some(version);
            meta.creation_timestamp = Some(Time(chrono::Utc::now()));
            if let DependentObject::Workload(d) = &mut object {
                d.status = Some(DeploymentStatus::default());
            }
            inner.dependents.insert(slot, object.clone());
            object
        };
        self.notify(key);
        Ok(CreateOutcome::Created(created))
    }

    async fn update_status(&self, parent: &JsonServer, status: &JsonServerStatus) -> Result<()> {
        let key = parent.key();
        let changed = {
            let mut inner = self.inner.lock();
            inner.take_failure(StoreOp::UpdateStatus)?;
            let version = inner.version();
            inner.status_writes += 1;

            let stored = inner
                .parents
                .get_mut(&key)
                .ok_or_else(|| Error::NotFound(format!("JsonServer {key}")))?;
            if stored.resource_version() != parent.resource_version() {
                return Err(Error::Conflict(format!("status of JsonServer {key}")));
            }
            if stored.status.as_ref() == Some(status) {
                false
            } else {
                stored.status = Some(status.clone());
                stored.metadata.resource_version = Some(version);
                true
            }
        };
        if changed {
            self.notify(key);
        }
        Ok(())
    }

    async fn record_event(
        &self,
        parent: &JsonServer,
        type_: EventType,
        reason: &str,
        note: &str,
    ) -> Result<()> {
        self.inner.lock().events.push(RecordedEvent {
            key: parent.key(),
            type_,
            reason: reason.to_string(),
            note: note.to_string(),
        });
        Ok(())
    }

    fn changes(&self) -> BoxStream<'static, ObjectKey> {
        BroadcastStream::new(self.changes.subscribe())
            .filter_map(|res| future::ready(res.ok()))
            .boxed()
    }
}
