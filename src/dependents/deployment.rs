use super::{
    dependent_meta, json_config_path, CONTAINER_NAME, CONTAINER_PORT, CONTAINER_PORT_NAME,
    CONTAINER_PORT_PROTOCOL, JSON_CONFIG_MOUNT_PATH, JSON_SERVER_IMAGE, MATCH_LABELS_KEY,
    VOLUME_NAME,
};
use crate::types::{JsonServer, Labels};
use k8s_openapi::api::apps::v1 as apps;
use k8s_openapi::api::core::v1 as core;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

/// Runs `replicas` json-server pods serving the parent's config map.
///
/// `replicas` is passed through untouched; an unset value lets the API
/// server apply its own default.
pub fn deployment(parent: &JsonServer) -> apps::Deployment {
    let match_labels = Labels::new().insert(MATCH_LABELS_KEY, parent.name_any());

    apps::Deployment {
        metadata: dependent_meta(parent),
        spec: Some(apps::DeploymentSpec {
            replicas: parent.spec.replicas,
            selector: match_labels.clone().selector(),
            template: core::PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(match_labels.into_inner()),
                    ..Default::default()
                }),
                spec: Some(core::PodSpec {
                    containers: vec![core::Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(JSON_SERVER_IMAGE.to_string()),
                        args: Some(vec![json_config_path()]),
                        ports: Some(vec![core::ContainerPort {
                            container_port: CONTAINER_PORT,
                            name: Some(CONTAINER_PORT_NAME.to_string()),
                            protocol: Some(CONTAINER_PORT_PROTOCOL.to_string()),
                            ..Default::default()
                        }]),
                        volume_mounts: Some(vec![core::VolumeMount {
                            name: VOLUME_NAME.to_string(),
                            mount_path: JSON_CONFIG_MOUNT_PATH.to_string(),
                            read_only: Some(true),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![core::Volume {
                        name: VOLUME_NAME.to_string(),
                        config_map: Some(core::ConfigMapVolumeSource {
                            name: parent.name_any(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
