use super::{dependent_meta, CONTAINER_PORT, CONTAINER_PORT_PROTOCOL, MATCH_LABELS_KEY};
use crate::types::{JsonServer, Labels};
use k8s_openapi::api::core::v1 as core;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

/// Routes the container port to pods labelled `app=<parent name>`.
pub fn service(parent: &JsonServer) -> core::Service {
    core::Service {
        metadata: dependent_meta(parent),
        spec: Some(core::ServiceSpec {
            selector: Some(
                Labels::new()
                    .insert(MATCH_LABELS_KEY, parent.name_any())
                    .into_inner(),
            ),
            ports: Some(vec![core::ServicePort {
                protocol: Some(CONTAINER_PORT_PROTOCOL.to_string()),
                port: CONTAINER_PORT,
                target_port: Some(IntOrString::Int(CONTAINER_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
