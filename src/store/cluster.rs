use super::{CreateOutcome, EventType, ObjectStore};
use crate::dependents::{DependentKind, DependentObject};
use crate::error::{Error, Result};
use crate::types::{JsonServer, JsonServerStatus, ObjectKey};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{future, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Event, ObjectReference, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, warn};

/// Object store backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
    namespace: Option<String>,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            namespace: None,
        }
    }

    /// Restricts change notifications to one namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn watched<K>(&self) -> Api<K>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(self.field_manager.clone()),
        }
    }

    async fn get<K>(&self, key: &ObjectKey) -> Result<Option<K>>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + DeserializeOwned,
    {
        self.api::<K>(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(Error::Kube)
    }

    async fn create<K>(&self, object: &K) -> Result<Option<K>>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
    {
        let namespace = object.namespace().unwrap_or_default();
        match self
            .api::<K>(&namespace)
            .create(&self.post_params(), object)
            .await
        {
            Ok(created) => Ok(Some(created)),
            Err(kube::Error::Api(e)) if e.code == 409 && e.reason == "AlreadyExists" => Ok(None),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    /// Keys of `JsonServer`s that control objects of kind `K`.
    fn owner_changes<K>(&self) -> BoxStream<'static, ObjectKey>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + DeserializeOwned
            + Send
            + 'static,
    {
        watcher(self.watched::<K>(), watcher::Config::default())
            .default_backoff()
            .touched_objects()
            .filter_map(|res| {
                future::ready(match res {
                    Ok(obj) => controller_key(&obj),
                    Err(e) => {
                        warn!(kind = %K::kind(&()), error = %e, "watch error");
                        None
                    }
                })
            })
            .boxed()
    }
}

fn controller_key<K: Resource>(obj: &K) -> Option<ObjectKey> {
    let owner = obj.meta().owner_references.as_ref()?.iter().find(|r| {
        r.controller == Some(true)
            && r.kind == JsonServer::kind(&())
            && r.api_version.starts_with(&format!("{}/", JsonServer::group(&())))
    })?;
    Some(ObjectKey::new(
        obj.meta().namespace.clone().unwrap_or_default(),
        owner.name.clone(),
    ))
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_parent(&self, key: &ObjectKey) -> Result<Option<JsonServer>> {
        self.get::<JsonServer>(key).await
    }

    async fn get_dependent(
        &self,
        kind: DependentKind,
        key: &ObjectKey,
    ) -> Result<Option<DependentObject>> {
        Ok(match kind {
            DependentKind::Config => self.get::<ConfigMap>(key).await?.map(DependentObject::Config),
            DependentKind::Workload => {
                self.get::<Deployment>(key).await?.map(DependentObject::Workload)
            }
            DependentKind::Endpoint => {
                self.get::<Service>(key).await?.map(DependentObject::Endpoint)
            }
        })
    }

    async fn create_dependent(&self, object: DependentObject) -> Result<CreateOutcome> {
        let created = match &object {
            DependentObject::Config(cm) => self.create(cm).await?.map(DependentObject::Config),
            DependentObject::Workload(d) => self.create(d).await?.map(DependentObject::Workload),
            DependentObject::Endpoint(s) => self.create(s).await?.map(DependentObject::Endpoint),
        };
        Ok(match created {
            Some(obj) => CreateOutcome::Created(obj),
            None => CreateOutcome::AlreadyExists,
        })
    }

    async fn update_status(&self, parent: &JsonServer, status: &JsonServerStatus) -> Result<()> {
        let key = parent.key();
        let api = self.api::<JsonServer>(&key.namespace);

        // resourceVersion turns the merge patch into a conditional write.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": parent.resource_version() },
            "status": status,
        });
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };

        match api.patch_status(&key.name, &params, &Patch::Merge(&patch)).await {
            Ok(_) => {
                debug!(%key, state = %status.state, "updated status");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                Err(Error::Conflict(format!("status of JsonServer {key}")))
            }
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn record_event(
        &self,
        parent: &JsonServer,
        type_: EventType,
        reason: &str,
        note: &str,
    ) -> Result<()> {
        let key = parent.key();
        let now = chrono::Utc::now();

        let event = Event {
            metadata: ObjectMeta {
                name: Some(format!(
                    "{}.{:x}",
                    key.name,
                    now.timestamp_nanos_opt().unwrap_or_default()
                )),
                namespace: Some(key.namespace.clone()),
                ..Default::default()
            },
            type_: Some(type_.as_str().to_string()),
            reason: Some(reason.to_string()),
            message: Some(note.to_string()),
            involved_object: ObjectReference {
                api_version: Some(JsonServer::api_version(&()).to_string()),
                kind: Some(JsonServer::kind(&()).to_string()),
                name: Some(key.name.clone()),
                namespace: Some(key.namespace.clone()),
                uid: parent.uid(),
                resource_version: parent.resource_version(),
                ..Default::default()
            },
            first_timestamp: Some(Time(now)),
            last_timestamp: Some(Time(now)),
            count: Some(1),
            reporting_component: Some(self.field_manager.clone()),
            reporting_instance: Some(
                std::env::var("POD_NAME").unwrap_or_else(|_| self.field_manager.clone()),
            ),
            ..Default::default()
        };

        self.api::<Event>(&key.namespace)
            .create(&PostParams::default(), &event)
            .await
            .map_err(Error::Kube)?;
        Ok(())
    }

    fn changes(&self) -> BoxStream<'static, ObjectKey> {
        let parents = watcher(self.watched::<JsonServer>(), watcher::Config::default())
            .default_backoff()
            .touched_objects()
            .filter_map(|res| {
                future::ready(match res {
                    Ok(obj) => Some(obj.key()),
                    Err(e) => {
                        warn!(kind = "JsonServer", error = %e, "watch error");
                        None
                    }
                })
            })
            .boxed();

        stream::select_all([
            parents,
            self.owner_changes::<ConfigMap>(),
            self.owner_changes::<Deployment>(),
            self.owner_changes::<Service>(),
        ])
        .boxed()
    }
}
