use super::{dependent_meta, JSON_CONFIG_KEY};
use crate::types::JsonServer;
use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::BTreeMap;

/// Holds the parent's `jsonConfig` under `db.json`.
pub fn config_map(parent: &JsonServer) -> ConfigMap {
    ConfigMap {
        metadata: dependent_meta(parent),
        data: Some(BTreeMap::from([(
            JSON_CONFIG_KEY.to_string(),
            parent.spec.json_config.clone(),
        )])),
        ..Default::default()
    }
}
