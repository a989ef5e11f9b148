// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `machinedeployment.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::capi::{MachineDeploymentSpec, MachineSpec, MachineTemplateSpec, ObjectReference};
    use crate::crd::NodePoolSpec;
    use kube::api::ObjectMeta;
    use serde_json::json;

    fn amd64(vcpu: i32, memory_mib: i64, gpu: i32) -> InstanceTypeInfo {
        InstanceTypeInfo {
            instance_type: "m6i.xlarge".to_string(),
            vcpu,
            memory_mib,
            gpu,
            arch: "amd64".to_string(),
        }
    }

    fn taint(key: &str, value: &str, effect: &str) -> Taint {
        Taint {
            key: key.to_string(),
            value: value.to_string(),
            effect: effect.to_string(),
        }
    }

    fn node_pool(labels: &[(&str, &str)], taints: Vec<Taint>) -> NodePool {
        NodePool {
            metadata: ObjectMeta {
                name: Some("workers".to_string()),
                namespace: Some("clusters".to_string()),
                ..Default::default()
            },
            spec: NodePoolSpec {
                cluster_name: "example".to_string(),
                node_labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                taints,
                ..Default::default()
            },
            status: None,
        }
    }

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn machine_deployment(kind: &str, name: &str, annotations: BTreeMap<String, String>) -> MachineDeployment {
        MachineDeployment {
            metadata: ObjectMeta {
                name: Some("workers".to_string()),
                namespace: Some("clusters-example".to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: MachineDeploymentSpec {
                cluster_name: "example".to_string(),
                template: MachineTemplateSpec {
                    spec: MachineSpec {
                        cluster_name: "example".to_string(),
                        infrastructure_ref: ObjectReference {
                            kind: kind.to_string(),
                            name: name.to_string(),
                            ..Default::default()
                        },
                        ..Default::default()
                    },
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_parse_labels() {
        let labels = parse_labels(" a=1, b=x=y ,broken,c=");
        assert_eq!(labels.get("a").map(String::as_str), Some("1"));
        assert_eq!(labels.get("b").map(String::as_str), Some("x=y"));
        assert_eq!(labels.get("c").map(String::as_str), Some(""));
        assert!(!labels.contains_key("broken"));
        assert!(parse_labels("").is_empty());
    }

    #[test]
    fn test_taints_annotation_sorted() {
        let taints = vec![
            taint("zone", "b", "NoSchedule"),
            taint("gpu", "true", "NoExecute"),
        ];
        assert_eq!(
            taints_annotation(&taints),
            "gpu=true:NoExecute,zone=b:NoSchedule"
        );
        assert_eq!(taints_annotation(&[]), "");
    }

    #[test]
    fn test_compute_annotations_without_node_pool() {
        let existing = annotations(&[
            ("other", "kept"),
            (LABELS_ANNOTATION, "custom=yes,kubernetes.io/arch=arm64"),
            (TAINTS_ANNOTATION, "stale=x:NoSchedule"),
        ]);
        let result = compute_annotations(&existing, &amd64(4, 16384, 1), None);

        assert_eq!(result[CPU_ANNOTATION], "4");
        assert_eq!(result[MEMORY_ANNOTATION], "16384");
        assert_eq!(result[GPU_ANNOTATION], "1");
        assert_eq!(result[LABELS_ANNOTATION], "custom=yes,kubernetes.io/arch=amd64");
        assert_eq!(result["other"], "kept");
        assert!(!result.contains_key(TAINTS_ANNOTATION));
    }

    #[test]
    fn test_compute_annotations_merges_node_pool() {
        let existing = annotations(&[(LABELS_ANNOTATION, "custom=yes,role=old")]);
        let pool = node_pool(
            &[("role", "worker")],
            vec![taint("dedicated", "gpu", "NoSchedule")],
        );
        let result = compute_annotations(&existing, &amd64(8, 32768, 0), Some(&pool));

        assert_eq!(
            result[LABELS_ANNOTATION],
            "custom=yes,kubernetes.io/arch=amd64,role=worker"
        );
        assert_eq!(result[TAINTS_ANNOTATION], "dedicated=gpu:NoSchedule");
        assert_eq!(result[GPU_ANNOTATION], "0");
    }

    #[test]
    fn test_compute_annotations_node_pool_without_taints_removes_key() {
        let existing = annotations(&[(TAINTS_ANNOTATION, "old=x:NoSchedule")]);
        let pool = node_pool(&[], vec![]);
        let result = compute_annotations(&existing, &amd64(2, 8192, 0), Some(&pool));
        assert!(!result.contains_key(TAINTS_ANNOTATION));
    }

    #[test]
    fn test_remove_capacity_annotations() {
        let mut existing = annotations(&[
            (CPU_ANNOTATION, "4"),
            (MEMORY_ANNOTATION, "16384"),
            (GPU_ANNOTATION, "0"),
            (LABELS_ANNOTATION, "kubernetes.io/arch=amd64"),
            (TAINTS_ANNOTATION, "a=b:NoSchedule"),
            (NODE_POOL_ANNOTATION, "clusters/workers"),
        ]);
        remove_capacity_annotations(&mut existing);
        assert_eq!(existing, annotations(&[(NODE_POOL_ANNOTATION, "clusters/workers")]));
    }

    #[test]
    fn test_parse_node_pool_annotation() {
        assert_eq!(parse_node_pool_annotation("clusters/workers"), Some(("clusters", "workers")));
        assert_eq!(parse_node_pool_annotation("workers"), None);
        assert_eq!(parse_node_pool_annotation("/workers"), None);
        assert_eq!(parse_node_pool_annotation("clusters/"), None);
        assert_eq!(parse_node_pool_annotation("a/b/c"), None);
    }

    #[test]
    fn test_machine_deployment_gates() {
        let md = machine_deployment(
            "AWSMachineTemplate",
            "workers-1a2b3c4d",
            annotations(&[(NODE_POOL_ANNOTATION, "clusters/workers")]),
        );
        assert_eq!(aws_machine_template_name(&md), Some("workers-1a2b3c4d"));
        assert!(has_node_pool_annotation(&md));

        let other = machine_deployment("KubevirtMachineTemplate", "workers", BTreeMap::new());
        assert_eq!(aws_machine_template_name(&other), None);
        assert!(!has_node_pool_annotation(&other));

        let unnamed = machine_deployment("AWSMachineTemplate", "", BTreeMap::new());
        assert_eq!(aws_machine_template_name(&unnamed), None);
    }

    #[test]
    fn test_annotations_patch_sets_and_removes() {
        let current = annotations(&[("keep", "1"), ("change", "old"), (TAINTS_ANNOTATION, "x=y:NoSchedule")]);
        let desired = annotations(&[("keep", "1"), ("change", "new"), (CPU_ANNOTATION, "4")]);

        assert_eq!(
            annotations_patch(&current, &desired),
            json!({
                "metadata": {
                    "annotations": {
                        "change": "new",
                        CPU_ANNOTATION: "4",
                        TAINTS_ANNOTATION: null,
                    }
                }
            })
        );
    }
}
