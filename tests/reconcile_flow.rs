use async_trait::async_trait;
use futures::stream::BoxStream;
use jsonserver_operator::prelude::*;
use jsonserver_operator::reconciler::{Attempt, Outcome, Step};
use jsonserver_operator::store::{CreateOutcome, EventType, StoreOp};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

fn json_server(name: &str, replicas: i32, json: &str) -> JsonServer {
    let mut js = JsonServer::new(
        name,
        JsonServerSpec {
            replicas: Some(replicas),
            json_config: json.to_string(),
        },
    );
    js.metadata.namespace = Some("default".into());
    js
}

fn setup() -> (Arc<MemoryStore>, Reconciler<Arc<MemoryStore>>) {
    let store = Arc::new(MemoryStore::new());
    let reconciler = Reconciler::new(store.clone()).requeue_soon(Duration::from_millis(10));
    (store, reconciler)
}

async fn attempt(reconciler: &Reconciler<Arc<MemoryStore>>, key: &ObjectKey) -> Attempt {
    reconciler.reconcile(key, &CancellationToken::new()).await
}

/// Runs attempts until one does not ask to be requeued soon.
async fn converge(reconciler: &Reconciler<Arc<MemoryStore>>, key: &ObjectKey) -> Vec<Attempt> {
    let mut attempts = Vec::new();
    for _ in 0..10 {
        let a = attempt(reconciler, key).await;
        let again = matches!(a.action, Action::Requeue(_));
        attempts.push(a);
        if !again {
            break;
        }
    }
    attempts
}

fn config_map(store: &MemoryStore, key: &ObjectKey) -> Option<ConfigMap> {
    match store.dependent(DependentKind::Config, key)? {
        DependentObject::Config(cm) => Some(cm),
        _ => None,
    }
}

fn deployment(store: &MemoryStore, key: &ObjectKey) -> Option<Deployment> {
    match store.dependent(DependentKind::Workload, key)? {
        DependentObject::Workload(d) => Some(d),
        _ => None,
    }
}

fn service(store: &MemoryStore, key: &ObjectKey) -> Option<Service> {
    match store.dependent(DependentKind::Endpoint, key)? {
        DependentObject::Endpoint(s) => Some(s),
        _ => None,
    }
}

#[test_log::test(tokio::test)]
async fn app_foo_converges_one_dependent_per_attempt() {
    let (store, reconciler) = setup();
    let parent = store.apply_parent(json_server("app-foo", 2, r#"{"a":1}"#));
    let key = parent.key();

    // First attempt: only the config map.
    let first = attempt(&reconciler, &key).await;
    assert!(matches!(first.outcome, Outcome::Progressed(DependentKind::Config)));
    assert_eq!(first.action, Action::Requeue(Duration::from_millis(10)));
    let cm = config_map(&store, &key).unwrap();
    assert_eq!(
        cm.data.unwrap().get("db.json").map(String::as_str),
        Some(r#"{"a":1}"#)
    );
    assert!(deployment(&store, &key).is_none());
    let status = store.status(&key).unwrap();
    assert_eq!(status.state, JsonServerState::Synced);

    // Second attempt: the deployment.
    let second = attempt(&reconciler, &key).await;
    assert!(matches!(second.outcome, Outcome::Progressed(DependentKind::Workload)));
    let d = deployment(&store, &key).unwrap();
    let spec = d.spec.unwrap();
    assert_eq!(spec.replicas, Some(2));
    let pod = spec.template.spec.unwrap();
    let container = &pod.containers[0];
    assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 3000);
    let mount = &container.volume_mounts.as_ref().unwrap()[0];
    assert_eq!(mount.mount_path, "/data");
    assert_eq!(mount.read_only, Some(true));
    let volume = &pod.volumes.as_ref().unwrap()[0];
    assert_eq!(volume.name, mount.name);
    assert_eq!(volume.config_map.as_ref().unwrap().name, "app-foo");
    assert!(service(&store, &key).is_none());

    // The deployment controller reports its pods.
    store.set_workload_replicas(&key, 2);

    // Third attempt: the service.
    let third = attempt(&reconciler, &key).await;
    assert!(matches!(third.outcome, Outcome::Progressed(DependentKind::Endpoint)));
    let svc = service(&store, &key).unwrap().spec.unwrap();
    let port = &svc.ports.as_ref().unwrap()[0];
    assert_eq!(port.port, 3000);
    assert_eq!(port.target_port, Some(IntOrString::Int(3000)));
    assert_eq!(
        svc.selector.unwrap().get("app").map(String::as_str),
        Some("app-foo")
    );

    let status = store.status(&key).unwrap();
    assert_eq!(status.state, JsonServerState::Synced);
    assert_eq!(status.message, "Synced successfully");
    assert_eq!(status.replicas, 2);
    assert_eq!(status.selector, "app=app-foo");

    // Fourth attempt finds everything in place.
    let fourth = attempt(&reconciler, &key).await;
    assert!(matches!(fourth.outcome, Outcome::Synced));
    assert_eq!(fourth.action, Action::Done);
    assert_eq!(
        fourth.steps,
        vec![
            Step::Start,
            Step::FetchParent,
            Step::Sync(DependentKind::Config),
            Step::Sync(DependentKind::Workload),
            Step::Sync(DependentKind::Endpoint),
            Step::Terminal,
        ]
    );
}

#[test_log::test(tokio::test)]
async fn first_attempt_touches_only_the_config_map() {
    let (store, reconciler) = setup();
    let key = store.apply_parent(json_server("app-foo", 1, "{}")).key();

    attempt(&reconciler, &key).await;

    assert_eq!(store.create_calls(DependentKind::Config), 1);
    assert_eq!(store.create_calls(DependentKind::Workload), 0);
    assert_eq!(store.create_calls(DependentKind::Endpoint), 0);
    assert_eq!(store.dependent_count(), 1);
}

#[test_log::test(tokio::test)]
async fn converged_parent_needs_no_further_creates() {
    let (store, reconciler) = setup();
    let key = store.apply_parent(json_server("app-foo", 2, "{}")).key();

    let attempts = converge(&reconciler, &key).await;
    assert_eq!(attempts.len(), 4);
    let creates = store.total_create_calls();
    assert_eq!(creates, 3);

    let again = attempt(&reconciler, &key).await;
    assert_eq!(again.action, Action::Done);
    assert_eq!(store.total_create_calls(), creates);
}

#[test_log::test(tokio::test)]
async fn foreign_deployment_is_never_touched() {
    let (store, reconciler) = setup();
    let parent = store.apply_parent(json_server("app-foo", 2, "{}"));
    let key = parent.key();
    let foreign = store.insert_dependent(DependentKind::Workload.build(&parent));

    let attempts = converge(&reconciler, &key).await;
    let last = attempts.last().unwrap();

    assert!(matches!(
        last.outcome,
        Outcome::Failed(Error::Foreign {
            kind: DependentKind::Workload,
            ..
        })
    ));
    assert_eq!(last.action, Action::Stalled);
    assert_eq!(store.dependent(DependentKind::Workload, &key), Some(foreign));
    assert_eq!(store.create_calls(DependentKind::Workload), 0);
    assert_eq!(store.create_calls(DependentKind::Endpoint), 0);

    let status = store.status(&key).unwrap();
    assert_eq!(status.state, JsonServerState::Error);
    assert!(status.message.contains("Deployment"), "{}", status.message);

    let warnings: Vec<_> = store
        .events()
        .into_iter()
        .filter(|e| e.type_ == EventType::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].reason, "OwnershipConflict");
}

#[test_log::test(tokio::test)]
async fn dependent_controlled_by_another_parent_is_foreign() {
    let (store, reconciler) = setup();
    let parent = store.apply_parent(json_server("app-foo", 2, "{}"));
    let key = parent.key();

    let mut other = DependentKind::Config.build(&parent);
    other.meta_mut().owner_references = Some(vec![OwnerReference {
        api_version: "example.com/v1".into(),
        kind: "JsonServer".into(),
        name: "app-foo".into(),
        uid: "some-older-incarnation".into(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }]);
    store.insert_dependent(other);

    let a = attempt(&reconciler, &key).await;
    assert!(matches!(
        a.outcome,
        Outcome::Failed(Error::Foreign {
            kind: DependentKind::Config,
            ..
        })
    ));
    assert_eq!(a.action, Action::Stalled);
    assert_eq!(store.total_create_calls(), 0);
    assert_eq!(store.status(&key).unwrap().state, JsonServerState::Error);
}

#[test_log::test(tokio::test)]
async fn status_tracks_the_latest_outcome() {
    let (store, reconciler) = setup();
    let key = store.apply_parent(json_server("app-foo", 2, "{}")).key();
    store.fail_next(StoreOp::GetDependent(DependentKind::Config), 1);

    let failed = attempt(&reconciler, &key).await;
    assert_eq!(failed.action, Action::Backoff);
    let status = store.status(&key).unwrap();
    assert_eq!(status.state, JsonServerState::Error);
    assert!(status.message.starts_with("Object store unavailable"));

    let recovered = attempt(&reconciler, &key).await;
    assert!(matches!(recovered.outcome, Outcome::Progressed(DependentKind::Config)));
    let status = store.status(&key).unwrap();
    assert_eq!(status.state, JsonServerState::Synced);
    assert_eq!(status.message, "Synced successfully");
}

#[test_log::test(tokio::test)]
async fn unreadable_parent_backs_off_without_status() {
    let (store, reconciler) = setup();
    let key = store.apply_parent(json_server("app-foo", 2, "{}")).key();
    store.fail_next(StoreOp::GetParent, 1);

    let a = attempt(&reconciler, &key).await;
    assert!(matches!(a.outcome, Outcome::Failed(_)));
    assert_eq!(a.action, Action::Backoff);
    assert!(a.status.is_none());
    assert_eq!(store.status_writes(), 0);
}

#[test_log::test(tokio::test)]
async fn lost_create_race_moves_on_to_the_next_kind() {
    let (store, reconciler) = setup();
    let key = store.apply_parent(json_server("app-foo", 2, "{}")).key();
    converge(&reconciler, &key).await;

    store.hide_next_read(DependentKind::Workload, &key);
    let a = attempt(&reconciler, &key).await;

    assert!(matches!(a.outcome, Outcome::Synced));
    assert_eq!(store.create_calls(DependentKind::Workload), 2);
    assert_eq!(store.dependent_count(), 3);
}

#[test_log::test(tokio::test)]
async fn foreign_winner_of_a_create_race_blocks_the_parent() {
    let (store, reconciler) = setup();
    let parent = store.apply_parent(json_server("app-foo", 2, "{}"));
    let key = parent.key();

    // Someone else creates the config map between our read and our create.
    let foreign = store.insert_dependent(DependentKind::Config.build(&parent));
    store.hide_next_read(DependentKind::Config, &key);
    let a = attempt(&reconciler, &key).await;

    assert!(matches!(
        a.outcome,
        Outcome::Failed(Error::Foreign {
            kind: DependentKind::Config,
            ..
        })
    ));
    assert_eq!(a.action, Action::Stalled);
    assert_eq!(store.create_calls(DependentKind::Config), 1);
    assert_eq!(store.dependent(DependentKind::Config, &key), Some(foreign));
    assert_eq!(store.create_calls(DependentKind::Workload), 0);
    let status = store.status(&key).unwrap();
    assert_eq!(status.state, JsonServerState::Error);
    assert!(status.message.contains("ConfigMap"), "{}", status.message);
}

#[test_log::test(tokio::test)]
async fn unreadable_create_race_winner_is_retried_soon() {
    let (store, reconciler) = setup();
    let key = store.apply_parent(json_server("app-foo", 2, "{}")).key();
    converge(&reconciler, &key).await;

    store.hide_next_read(DependentKind::Endpoint, &key);
    store.hide_next_read(DependentKind::Endpoint, &key);
    let a = attempt(&reconciler, &key).await;

    assert!(matches!(a.outcome, Outcome::Contended(DependentKind::Endpoint)));
    assert_eq!(a.action, Action::Requeue(Duration::from_millis(10)));
    assert_eq!(store.status(&key).unwrap().state, JsonServerState::Synced);

    let next = attempt(&reconciler, &key).await;
    assert!(matches!(next.outcome, Outcome::Synced));
    assert_eq!(store.dependent_count(), 3);
}

/// Applies `edit` to the parent right after every dependent create, as if a
/// user edited the JsonServer while the attempt was running.
struct EditDuringCreate {
    inner: Arc<MemoryStore>,
    edit: JsonServer,
}

#[async_trait]
impl ObjectStore for EditDuringCreate {
    async fn get_parent(&self, key: &ObjectKey) -> Result<Option<JsonServer>> {
        self.inner.get_parent(key).await
    }

    async fn get_dependent(
        &self,
        kind: DependentKind,
        key: &ObjectKey,
    ) -> Result<Option<DependentObject>> {
        self.inner.get_dependent(kind, key).await
    }

    async fn create_dependent(&self, object: DependentObject) -> Result<CreateOutcome> {
        let created = self.inner.create_dependent(object).await;
        self.inner.apply_parent(self.edit.clone());
        created
    }

    async fn update_status(&self, parent: &JsonServer, status: &JsonServerStatus) -> Result<()> {
        self.inner.update_status(parent, status).await
    }

    async fn record_event(
        &self,
        parent: &JsonServer,
        type_: EventType,
        reason: &str,
        note: &str,
    ) -> Result<()> {
        self.inner.record_event(parent, type_, reason, note).await
    }

    fn changes(&self) -> BoxStream<'static, ObjectKey> {
        self.inner.changes()
    }
}

#[test_log::test(tokio::test)]
async fn stale_status_write_backs_off_and_keeps_the_create() {
    let store = Arc::new(MemoryStore::new());
    let key = store.apply_parent(json_server("app-foo", 2, "{}")).key();
    let editing = Reconciler::new(EditDuringCreate {
        inner: store.clone(),
        edit: json_server("app-foo", 5, "{}"),
    });

    let a = editing.reconcile(&key, &CancellationToken::new()).await;

    assert!(matches!(a.outcome, Outcome::Progressed(DependentKind::Config)));
    assert_eq!(a.action, Action::Backoff);
    assert!(a.status.is_some());
    assert!(store.status(&key).is_none());
    assert!(config_map(&store, &key).is_some());

    // A fresh attempt reads the new resourceVersion and writes status.
    let reconciler = Reconciler::new(store.clone());
    let next = attempt(&reconciler, &key).await;
    assert!(matches!(next.outcome, Outcome::Progressed(DependentKind::Workload)));
    assert_eq!(store.status(&key).unwrap().state, JsonServerState::Synced);
    assert_eq!(store.create_calls(DependentKind::Config), 1);
}

#[test_log::test(tokio::test)]
async fn deleting_the_parent_collects_only_owned_dependents() {
    let (store, reconciler) = setup();
    let parent = store.apply_parent(json_server("app-foo", 2, "{}"));
    let key = parent.key();
    let foreign = store.insert_dependent(DependentKind::Endpoint.build(&parent));

    converge(&reconciler, &key).await;
    assert!(config_map(&store, &key).is_some());
    assert!(deployment(&store, &key).is_some());

    store.delete_parent(&key);

    assert!(config_map(&store, &key).is_none());
    assert!(deployment(&store, &key).is_none());
    assert_eq!(store.dependent(DependentKind::Endpoint, &key), Some(foreign));

    let a = attempt(&reconciler, &key).await;
    assert!(matches!(a.outcome, Outcome::ParentGone));
    assert_eq!(a.action, Action::Done);
}

#[test_log::test(tokio::test)]
async fn parent_being_deleted_is_left_to_the_garbage_collector() {
    let (store, reconciler) = setup();
    let mut terminating = json_server("app-foo", 2, "{}");
    terminating.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    let key = store.apply_parent(terminating).key();

    let a = attempt(&reconciler, &key).await;
    assert!(matches!(a.outcome, Outcome::ParentGone));
    assert_eq!(store.total_create_calls(), 0);
    assert_eq!(store.status_writes(), 0);
}

#[test_log::test(tokio::test)]
async fn replica_change_is_not_propagated_to_existing_deployment() {
    let (store, reconciler) = setup();
    let key = store.apply_parent(json_server("app-foo", 2, "{}")).key();
    converge(&reconciler, &key).await;

    store.apply_parent(json_server("app-foo", 5, "{}"));
    let a = attempt(&reconciler, &key).await;

    assert!(matches!(a.outcome, Outcome::Synced));
    assert_eq!(store.total_create_calls(), 3);
    let replicas = deployment(&store, &key).unwrap().spec.unwrap().replicas;
    assert_eq!(replicas, Some(2));
}

#[test_log::test(tokio::test)]
async fn distinct_parents_get_disjoint_dependents() {
    let (store, reconciler) = setup();
    let foo = store.apply_parent(json_server("app-foo", 1, r#"{"foo":true}"#)).key();
    let bar = store.apply_parent(json_server("app-bar", 3, r#"{"bar":true}"#)).key();

    converge(&reconciler, &foo).await;
    converge(&reconciler, &bar).await;

    assert_eq!(store.dependent_count(), 6);
    assert_eq!(
        deployment(&store, &bar).unwrap().spec.unwrap().replicas,
        Some(3)
    );
    assert_eq!(
        config_map(&store, &foo).unwrap().data.unwrap()["db.json"],
        r#"{"foo":true}"#
    );
}
