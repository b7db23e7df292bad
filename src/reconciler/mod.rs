//! One reconciliation attempt for one `JsonServer` key.
//!
//! An attempt walks `Start -> FetchParent -> Sync(ConfigMap) ->
//! Sync(Deployment) -> Sync(Service)` and stops at the first step that
//! creates something, finds a foreign object or fails. Every stop that still
//! has a parent in hand is projected onto its status.

pub mod reader;
pub mod status;
pub mod sync;

pub use reader::fetch_parent;
pub use status::{project, SYNCED_MESSAGE};
pub use sync::{ensure, EnsureOutcome};

use crate::dependents::{DependentKind, DependentObject};
use crate::error::{Error, Result};
use crate::store::{EventType, ObjectStore};
use crate::types::{JsonServer, JsonServerStatus, ObjectKey};
use k8s_openapi::api::apps::v1::Deployment;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// What the scheduler should do with a key after an attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Converged or nothing to do. Wait for the next change.
    Done,
    /// Progress was made; run again after the delay.
    Requeue(Duration),
    /// A transient failure; run again after the key's backoff delay.
    Backoff,
    /// A failure retrying will not fix by itself (a foreign dependent, a
    /// rejected request). Run again after the maximum backoff delay.
    Stalled,
    /// The attempt was interrupted by shutdown and did not finish.
    Abandon,
}

/// How an attempt ended.
#[derive(Debug)]
pub enum Outcome {
    /// The parent does not exist (or is being deleted).
    ParentGone,
    /// `kind` was created; later kinds were not looked at.
    Progressed(DependentKind),
    /// Creating `kind` collided with an object that could not be read back.
    Contended(DependentKind),
    /// All dependents exist and are owned.
    Synced,
    /// A store error, or a foreign dependent.
    Failed(Error),
    Cancelled,
}

impl Outcome {
    pub fn error(&self) -> Option<&Error> {
        match self {
            Outcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// States of one attempt, in visiting order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Start,
    FetchParent,
    Sync(DependentKind),
    Terminal,
}

enum State {
    Start,
    FetchParent,
    Sync(DependentKind, Box<JsonServer>),
    Terminal(Outcome, Option<Box<JsonServer>>),
}

impl State {
    fn step(&self) -> Step {
        match self {
            State::Start => Step::Start,
            State::FetchParent => Step::FetchParent,
            State::Sync(kind, _) => Step::Sync(*kind),
            State::Terminal(..) => Step::Terminal,
        }
    }
}

/// Result of [`Reconciler::reconcile`].
#[derive(Debug)]
pub struct Attempt {
    pub outcome: Outcome,
    /// The status written for the parent, if the write was attempted.
    pub status: Option<JsonServerStatus>,
    pub action: Action,
    pub steps: Vec<Step>,
}

#[derive(Clone)]
pub struct Reconciler<S> {
    store: S,
    requeue_soon: Duration,
}

impl<S: ObjectStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            requeue_soon: Duration::from_secs(1),
        }
    }

    /// Delay before the next attempt after an attempt that made progress.
    pub fn requeue_soon(mut self, delay: Duration) -> Self {
        self.requeue_soon = delay;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs one attempt for `key`. Every store call is abandoned as soon as
    /// `cancel` fires, and an abandoned attempt writes no status.
    #[instrument(skip(self, key, cancel), fields(jsonserver = %key))]
    pub async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken) -> Attempt {
        let mut workload: Option<Deployment> = None;
        let mut steps = Vec::with_capacity(5);
        let mut state = State::Start;

        let (outcome, parent) = loop {
            steps.push(state.step());
            state = match state {
                State::Start => State::FetchParent,
                State::FetchParent => match guarded(cancel, fetch_parent(&self.store, key)).await {
                    Ok(Some(parent)) => State::Sync(DependentKind::Config, Box::new(parent)),
                    Ok(None) => State::Terminal(Outcome::ParentGone, None),
                    Err(e) => State::Terminal(failed(e), None),
                },
                State::Sync(kind, parent) => {
                    match guarded(cancel, ensure(&self.store, &parent, kind)).await {
                        Ok(EnsureOutcome::Created(created)) => {
                            observe(&mut workload, &created);
                            let note = format!("Created {} {}", kind, created.name());
                            self.event(&parent, EventType::Normal, "Created", &note, cancel)
                                .await;
                            State::Terminal(Outcome::Progressed(kind), Some(parent))
                        }
                        Ok(EnsureOutcome::AlreadyPresentOwned(existing)) => {
                            observe(&mut workload, &existing);
                            match kind.next() {
                                Some(next) => State::Sync(next, parent),
                                None => State::Terminal(Outcome::Synced, Some(parent)),
                            }
                        }
                        Ok(EnsureOutcome::Foreign) => {
                            let err = Error::Foreign {
                                kind,
                                name: parent.key().name,
                            };
                            let note = err.to_string();
                            self.event(
                                &parent,
                                EventType::Warning,
                                "OwnershipConflict",
                                &note,
                                cancel,
                            )
                            .await;
                            State::Terminal(Outcome::Failed(err), Some(parent))
                        }
                        Ok(EnsureOutcome::Contended) => {
                            State::Terminal(Outcome::Contended(kind), Some(parent))
                        }
                        Err(e) => State::Terminal(failed(e), Some(parent)),
                    }
                }
                State::Terminal(outcome, parent) => break (outcome, parent),
            };
        };

        let mut action = match &outcome {
            Outcome::ParentGone | Outcome::Synced => Action::Done,
            Outcome::Progressed(_) | Outcome::Contended(_) => Action::Requeue(self.requeue_soon),
            Outcome::Failed(e) => retry_for(e),
            Outcome::Cancelled => Action::Abandon,
        };

        let status = match (&outcome, parent) {
            (Outcome::ParentGone | Outcome::Cancelled, _) | (_, None) => None,
            (_, Some(parent)) => {
                let status = project(outcome.error(), workload.as_ref());
                match guarded(cancel, self.store.update_status(&parent, &status)).await {
                    Ok(()) => debug!(state = %status.state, "status written"),
                    Err(Error::Cancelled) => action = Action::Abandon,
                    Err(e) => {
                        warn!(error = %e, "failed to write status");
                        action = match action {
                            Action::Stalled => Action::Stalled,
                            _ => retry_for(&e),
                        };
                    }
                }
                Some(status)
            }
        };

        match &outcome {
            Outcome::Failed(e) => error!(error = %e, ?action, "reconcile failed"),
            Outcome::Cancelled => info!("reconcile cancelled"),
            outcome => info!(?outcome, ?action, "reconciled"),
        }

        Attempt {
            outcome,
            status,
            action,
            steps,
        }
    }

    async fn event(
        &self,
        parent: &JsonServer,
        type_: EventType,
        reason: &str,
        note: &str,
        cancel: &CancellationToken,
    ) {
        match guarded(cancel, self.store.record_event(parent, type_, reason, note)).await {
            Ok(()) => {}
            Err(Error::Cancelled) => debug!(reason, "event dropped on shutdown"),
            Err(e) => warn!(reason, error = %e, "failed to record event"),
        }
    }
}

fn failed(e: Error) -> Outcome {
    if e.is_cancelled() {
        Outcome::Cancelled
    } else {
        Outcome::Failed(e)
    }
}

fn retry_for(e: &Error) -> Action {
    if e.is_transient() {
        Action::Backoff
    } else {
        Action::Stalled
    }
}

fn observe(workload: &mut Option<Deployment>, object: &DependentObject) {
    if let Some(d) = object.as_workload() {
        *workload = Some(d.clone());
    }
}

async fn guarded<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}
