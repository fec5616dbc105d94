//! Pod object builder.
//!
//! Translates a [`PodSpec`] into the minimal Kubernetes pod object the
//! controller persists: one container named after the pod, the configured
//! image, an optional entrypoint override, and an optional single port.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, ContainerPort, Pod, PodSpec as K8sPodSpec};
use kube::api::ObjectMeta;

use crate::types::PodSpec;

/// Build the Kubernetes pod object for a spec.
#[must_use]
pub fn build_pod(spec: &PodSpec) -> Pod {
    Pod {
        metadata: build_metadata(spec),
        spec: Some(K8sPodSpec {
            containers: vec![build_container(spec)],
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_metadata(spec: &PodSpec) -> ObjectMeta {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), spec.name.clone());

    ObjectMeta {
        name: Some(spec.name.clone()),
        namespace: Some(spec.namespace.clone()),
        labels: Some(labels),
        ..Default::default()
    }
}

fn build_container(spec: &PodSpec) -> Container {
    Container {
        name: spec.name.clone(),
        image: Some(spec.image.clone()),
        command: if spec.command.is_empty() {
            None
        } else {
            Some(spec.command.clone())
        },
        ports: spec.container_port.map(|port| {
            vec![ContainerPort {
                container_port: port,
                ..Default::default()
            }]
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_spec() -> PodSpec {
        PodSpec::new("default", "curl", "curlimages/curl:8.4.0")
            .with_command(vec!["sleep".to_string(), "infinity".to_string()])
    }

    #[test]
    fn build_pod_has_required_fields() {
        let pod = build_pod(&test_spec());

        let meta = &pod.metadata;
        assert_eq!(meta.name.as_deref(), Some("curl"));
        assert_eq!(meta.namespace.as_deref(), Some("default"));

        let labels = meta.labels.as_ref().unwrap();
        assert_eq!(labels.get("app"), Some(&"curl".to_string()));

        let containers = &pod.spec.as_ref().unwrap().containers;
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "curl");
        assert_eq!(containers[0].image.as_deref(), Some("curlimages/curl:8.4.0"));
    }

    #[test]
    fn build_pod_includes_command_override() {
        let pod = build_pod(&test_spec());
        let container = &pod.spec.as_ref().unwrap().containers[0];
        assert_eq!(
            container.command.as_deref(),
            Some(["sleep".to_string(), "infinity".to_string()].as_slice())
        );
    }

    #[test]
    fn build_pod_omits_empty_command() {
        let spec = PodSpec::new("default", "httpbin", "kennethreitz/httpbin");
        let pod = build_pod(&spec);
        let container = &pod.spec.as_ref().unwrap().containers[0];
        assert!(container.command.is_none());
    }

    #[test]
    fn build_pod_declares_single_port_when_set() {
        let spec = PodSpec::new("default", "httpbin", "kennethreitz/httpbin").with_port(80);
        let pod = build_pod(&spec);
        let container = &pod.spec.as_ref().unwrap().containers[0];

        let ports = container.ports.as_ref().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].container_port, 80);

        let without_port = build_pod(&test_spec());
        assert!(without_port.spec.as_ref().unwrap().containers[0]
            .ports
            .is_none());
    }
}
