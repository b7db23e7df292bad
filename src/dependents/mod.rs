//! Dependent objects rendered from a `JsonServer` spec.
//!
//! Every builder here is a pure function of the parent: the same spec always
//! renders the same object. Owner references are attached separately by
//! [`crate::ownership::attach`] just before creation.

mod config_map;
mod deployment;
mod service;

pub use config_map::config_map;
pub use deployment::deployment;
pub use service::service;

use crate::types::JsonServer;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::fmt;

pub const JSON_CONFIG_KEY: &str = "db.json";
pub const JSON_CONFIG_MOUNT_PATH: &str = "/data";
pub const MATCH_LABELS_KEY: &str = "app";
pub const JSON_SERVER_IMAGE: &str = "backplane/json-server";
pub const CONTAINER_NAME: &str = "json-server";
pub const VOLUME_NAME: &str = "json-config";
pub const CONTAINER_PORT: i32 = 3000;
pub const CONTAINER_PORT_NAME: &str = "http";
pub const CONTAINER_PORT_PROTOCOL: &str = "TCP";

pub fn json_config_path() -> String {
    format!("{JSON_CONFIG_MOUNT_PATH}/{JSON_CONFIG_KEY}")
}

/// The three dependent kinds, in the order they are synchronized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependentKind {
    Config,
    Workload,
    Endpoint,
}

impl DependentKind {
    /// Sync order. The workload mounts the config map by name, so the config
    /// map goes first.
    pub const ORDER: [DependentKind; 3] = [
        DependentKind::Config,
        DependentKind::Workload,
        DependentKind::Endpoint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DependentKind::Config => "ConfigMap",
            DependentKind::Workload => "Deployment",
            DependentKind::Endpoint => "Service",
        }
    }

    /// The kind synchronized after this one, if any.
    pub fn next(&self) -> Option<DependentKind> {
        match self {
            DependentKind::Config => Some(DependentKind::Workload),
            DependentKind::Workload => Some(DependentKind::Endpoint),
            DependentKind::Endpoint => None,
        }
    }

    /// Renders this kind's object for `parent`.
    pub fn build(&self, parent: &JsonServer) -> DependentObject {
        match self {
            DependentKind::Config => DependentObject::Config(config_map(parent)),
            DependentKind::Workload => DependentObject::Workload(deployment(parent)),
            DependentKind::Endpoint => DependentObject::Endpoint(service(parent)),
        }
    }
}

impl fmt::Display for DependentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dependent object of any kind, as read from or written to the store.
#[derive(Clone, Debug, PartialEq)]
pub enum DependentObject {
    Config(ConfigMap),
    Workload(Deployment),
    Endpoint(Service),
}

impl DependentObject {
    pub fn kind(&self) -> DependentKind {
        match self {
            DependentObject::Config(_) => DependentKind::Config,
            DependentObject::Workload(_) => DependentKind::Workload,
            DependentObject::Endpoint(_) => DependentKind::Endpoint,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            DependentObject::Config(o) => &o.metadata,
            DependentObject::Workload(o) => &o.metadata,
            DependentObject::Endpoint(o) => &o.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            DependentObject::Config(o) => &mut o.metadata,
            DependentObject::Workload(o) => &mut o.metadata,
            DependentObject::Endpoint(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    pub fn as_workload(&self) -> Option<&Deployment> {
        match self {
            DependentObject::Workload(d) => Some(d),
            _ => None,
        }
    }
}

/// Metadata shared by all dependents: same name and namespace as the parent.
fn dependent_meta(parent: &JsonServer) -> ObjectMeta {
    ObjectMeta {
        name: parent.metadata.name.clone(),
        namespace: parent.metadata.namespace.clone(),
        ..Default::default()
    }
}

#[cfg(test)]
pub(crate) fn test_parent(name: &str, replicas: Option<i32>, json: &str) -> JsonServer {
    use crate::types::JsonServerSpec;

    let mut parent = JsonServer::new(
        name,
        JsonServerSpec {
            replicas,
            json_config: json.to_string(),
        },
    );
    parent.metadata.namespace = Some("default".into());
    parent.metadata.uid = Some(format!("uid-{name}"));
    parent
}
