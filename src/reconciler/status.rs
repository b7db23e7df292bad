use crate::error::Error;
use crate::types::{format_label_selector, JsonServerState, JsonServerStatus};
use k8s_openapi::api::apps::v1::Deployment;

pub const SYNCED_MESSAGE: &str = "Synced successfully";

/// Projects the outcome of one attempt onto the parent's status.
///
/// `workload` is whatever deployment the attempt observed. The replica count
/// and selector are copied from it whether or not the attempt failed, and
/// fall back to `0` and `""` when nothing was observed.
pub fn project(error: Option<&Error>, workload: Option<&Deployment>) -> JsonServerStatus {
    let (state, message) = match error {
        Some(e) => (JsonServerState::Error, e.to_string()),
        None => (JsonServerState::Synced, SYNCED_MESSAGE.to_string()),
    };

    let replicas = workload
        .and_then(|d| d.status.as_ref())
        .and_then(|s| s.replicas)
        .unwrap_or(0);
    let selector = workload
        .and_then(|d| d.spec.as_ref())
        .map(|spec| format_label_selector(&spec.selector))
        .unwrap_or_default();

    JsonServerStatus {
        state,
        message,
        replicas,
        selector,
    }
}
