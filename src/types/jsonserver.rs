use super::ObjectKey;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Desired state of a json-server instance.
///
/// `replicas` is defaulted to 1 and `json_config` is checked to be a JSON
/// object by the admission webhook before the controller ever sees the
/// object, so neither is re-validated here.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "example.com",
    version = "v1",
    kind = "JsonServer",
    plural = "jsonservers",
    namespaced,
    status = "JsonServerStatus",
    scale = r#"{"specReplicasPath":".spec.replicas","statusReplicasPath":".status.replicas","labelSelectorPath":".status.selector"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct JsonServerSpec {
    /// Number of desired pods. Unset and zero are distinct.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Contents served by json-server, mounted as `db.json`.
    #[serde(default)]
    pub json_config: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum JsonServerState {
    Synced,
    Error,
}

impl fmt::Display for JsonServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonServerState::Synced => f.write_str("Synced"),
            JsonServerState::Error => f.write_str("Error"),
        }
    }
}

/// Observed state, written only by the status projector.
///
/// Every field is always serialized so a merge patch resets values left over
/// from an earlier attempt.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JsonServerStatus {
    pub state: JsonServerState,

    #[serde(default)]
    pub message: String,

    /// Non-terminated pods targeted by the workload.
    #[serde(default)]
    pub replicas: i32,

    /// Selector of the pods receiving traffic, in label-selector string form.
    #[serde(default)]
    pub selector: String,
}

impl JsonServer {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace().unwrap_or_default(), self.name_any())
    }
}
