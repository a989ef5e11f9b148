// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `nodepool.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{AwsVolume, NodePoolAutoScaling, NodePoolPlatform, NodePoolSpec};

    fn node_pool(instance_type: &str) -> NodePool {
        NodePool {
            metadata: ObjectMeta {
                name: Some("workers".to_string()),
                namespace: Some("clusters".to_string()),
                ..Default::default()
            },
            spec: NodePoolSpec {
                cluster_name: "example".to_string(),
                replicas: Some(3),
                platform: NodePoolPlatform {
                    r#type: PlatformType::AWS,
                    aws: Some(AwsNodePoolPlatform {
                        instance_type: instance_type.to_string(),
                        ami: "ami-0123".to_string(),
                        subnet_id: Some("subnet-1".to_string()),
                        security_group_ids: vec!["sg-1".to_string()],
                        root_volume: Some(AwsVolume {
                            size: 120,
                            r#type: "gp3".to_string(),
                        }),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            },
            status: None,
        }
    }

    #[test]
    fn test_control_plane_namespace() {
        assert_eq!(control_plane_namespace("clusters", "example"), "clusters-example");
        assert_eq!(control_plane_namespace("clusters", "a.b"), "clusters-a-b");
    }

    #[test]
    fn test_node_pool_key() {
        assert_eq!(node_pool_key(&node_pool("m5.large")), "clusters/workers");
    }

    #[test]
    fn test_aws_machine_template() {
        let template = aws_machine_template(&node_pool("m5.large"), "clusters-example").unwrap();
        let spec = &template.spec.template.spec;

        assert_eq!(spec.instance_type, "m5.large");
        assert_eq!(spec.ami.id.as_deref(), Some("ami-0123"));
        assert_eq!(spec.subnet.as_ref().and_then(|s| s.id.as_deref()), Some("subnet-1"));
        assert_eq!(spec.additional_security_groups.len(), 1);
        assert_eq!(spec.root_volume.as_ref().map(|v| v.size), Some(120));
        assert_eq!(template.metadata.namespace.as_deref(), Some("clusters-example"));
        assert_eq!(
            template.annotations().get(NODE_POOL_ANNOTATION).map(String::as_str),
            Some("clusters/workers")
        );

        let name = template.name_any();
        let hash = name.strip_prefix("workers-").unwrap();
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_template_name_changes_with_spec() {
        let small = aws_machine_template(&node_pool("m5.large"), "ns").unwrap();
        let again = aws_machine_template(&node_pool("m5.large"), "ns").unwrap();
        let large = aws_machine_template(&node_pool("m5.2xlarge"), "ns").unwrap();

        assert_eq!(small.name_any(), again.name_any());
        assert_ne!(small.name_any(), large.name_any());
    }

    #[test]
    fn test_aws_machine_template_requires_aws_section() {
        let mut pool = node_pool("m5.large");
        pool.spec.platform.aws = None;
        assert!(matches!(
            aws_machine_template(&pool, "ns"),
            Err(ReconcileError::Config(_))
        ));
    }

    #[test]
    fn test_machine_deployment_fixed_replicas() {
        let md = machine_deployment(&node_pool("m5.large"), "clusters-example", "example-x7k2p", "workers-abcd1234");

        assert_eq!(md.name_any(), "workers");
        assert_eq!(md.spec.replicas, Some(3));
        assert_eq!(md.spec.cluster_name, "example-x7k2p");
        assert_eq!(
            md.spec.selector.match_labels.get(MACHINE_DEPLOYMENT_NAME_LABEL).map(String::as_str),
            Some("workers")
        );
        assert_eq!(md.spec.selector.match_labels, md.spec.template.metadata.labels);

        let infra = &md.spec.template.spec.infrastructure_ref;
        assert_eq!(infra.kind, "AWSMachineTemplate");
        assert_eq!(infra.name, "workers-abcd1234");
        assert_eq!(
            md.spec.template.spec.bootstrap.data_secret_name.as_deref(),
            Some("example-user-data")
        );
        assert_eq!(
            md.annotations().get(NODE_POOL_ANNOTATION).map(String::as_str),
            Some("clusters/workers")
        );
        assert!(!md.annotations().contains_key(AUTOSCALER_MIN_SIZE_ANNOTATION));
    }

    #[test]
    fn test_machine_deployment_autoscaled() {
        let mut pool = node_pool("m5.large");
        pool.spec.auto_scaling = Some(NodePoolAutoScaling { min: 1, max: 5 });

        let md = machine_deployment(&pool, "ns", "infra", "tpl");
        assert_eq!(md.spec.replicas, None);
        assert_eq!(md.annotations()[AUTOSCALER_MIN_SIZE_ANNOTATION], "1");
        assert_eq!(md.annotations()[AUTOSCALER_MAX_SIZE_ANNOTATION], "5");
    }

    #[test]
    fn test_machine_deployment_serializes_type_meta() {
        let md = machine_deployment(&node_pool("m5.large"), "ns", "infra", "tpl");
        let value = serde_json::to_value(&md).unwrap();
        assert_eq!(value["apiVersion"], "cluster.x-k8s.io/v1beta1");
        assert_eq!(value["kind"], "MachineDeployment");
    }
}
