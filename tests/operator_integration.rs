// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Integration tests for the hosted control plane operator
//!
//! These tests need a cluster with the CRDs from deploy/crds/, the Cluster
//! API CRDs, and a running operator with its admission webhook registered.
//! Without a reachable cluster they print a message and pass.
//!
//! Run with: cargo test --test operator_integration -- --ignored

mod common;

use common::{
    cleanup_test_namespace, crds_installed, create_test_namespace, get_kube_client_or_skip, wait_for,
};
use hostedcp::{
    capi::{AWSMachineTemplate, MachineDeployment},
    constants::{CONTROL_PLANE_NAMESPACE_LABEL, NODE_POOL_ANNOTATION},
    crd::{AuditLogPersistenceConfig, HostedCluster, NodePool},
    reconcilers::nodepool::control_plane_namespace,
};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, PostParams};
use kube::ResourceExt;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

const OPERATOR_CRDS: &[&str] = &[
    "hostedclusters.hypershift.openshift.io",
    "nodepools.hypershift.openshift.io",
    "hostedcontrolplanes.hypershift.openshift.io",
    "clustersizingconfigurations.scheduling.hypershift.openshift.io",
    "auditlogpersistenceconfigs.auditlogpersistence.hypershift.openshift.io",
];

#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn test_crds_installed() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };
    assert!(crds_installed(&client, OPERATOR_CRDS).await);
}

#[tokio::test]
#[ignore = "requires a Kubernetes cluster with the operator running"]
async fn test_nodepool_creates_machine_deployment() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };
    if !crds_installed(&client, OPERATOR_CRDS).await {
        return;
    }

    let namespace = "hostedcp-it-nodepool";
    let control_plane = control_plane_namespace(namespace, "example");
    create_test_namespace(&client, namespace, &[]).await.unwrap();
    create_test_namespace(&client, &control_plane, &[]).await.unwrap();

    let cluster: HostedCluster = serde_json::from_value(json!({
        "apiVersion": "hypershift.openshift.io/v1beta1",
        "kind": "HostedCluster",
        "metadata": {"name": "example", "namespace": namespace},
        "spec": {
            "release": {"image": "quay.io/openshift-release-dev/ocp-release:4.17.0-x86_64"},
            "infraID": "example-x7k2p",
            "platform": {"type": "AWS", "aws": {"region": "us-east-1"}},
            "dns": {"baseDomain": "example.com"},
            "pullSecret": {"name": "pull-secret"},
            "sshKey": {"name": "ssh-key"}
        }
    }))
    .unwrap();
    let pool: NodePool = serde_json::from_value(json!({
        "apiVersion": "hypershift.openshift.io/v1beta1",
        "kind": "NodePool",
        "metadata": {"name": "workers", "namespace": namespace},
        "spec": {
            "clusterName": "example",
            "replicas": 2,
            "platform": {"type": "AWS", "aws": {"instanceType": "m5.large", "ami": "ami-0123"}}
        }
    }))
    .unwrap();

    Api::<HostedCluster>::namespaced(client.clone(), namespace)
        .create(&PostParams::default(), &cluster)
        .await
        .unwrap();
    Api::<NodePool>::namespaced(client.clone(), namespace)
        .create(&PostParams::default(), &pool)
        .await
        .unwrap();

    let deployments: Api<MachineDeployment> = Api::namespaced(client.clone(), &control_plane);
    let md = wait_for(Duration::from_secs(60), || {
        let deployments = deployments.clone();
        async move { deployments.get_opt("workers").await.ok().flatten() }
    })
    .await
    .expect("MachineDeployment was not created");

    assert_eq!(md.spec.replicas, Some(2));
    assert_eq!(md.spec.cluster_name, "example-x7k2p");
    assert_eq!(
        md.annotations().get(NODE_POOL_ANNOTATION).map(String::as_str),
        Some("hostedcp-it-nodepool/workers")
    );

    let templates: Api<AWSMachineTemplate> = Api::namespaced(client.clone(), &control_plane);
    let template = templates
        .get(&md.spec.template.spec.infrastructure_ref.name)
        .await
        .unwrap();
    assert_eq!(template.spec.template.spec.instance_type, "m5.large");

    cleanup_test_namespace(&client, namespace).await;
    cleanup_test_namespace(&client, &control_plane).await;
}

#[tokio::test]
#[ignore = "requires a Kubernetes cluster with the admission webhook registered"]
async fn test_kas_config_receives_audit_log_rotation() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };
    if !crds_installed(&client, OPERATOR_CRDS).await {
        return;
    }

    let namespace = "hostedcp-it-kas";
    create_test_namespace(&client, namespace, &[(CONTROL_PLANE_NAMESPACE_LABEL, "true")])
        .await
        .unwrap();

    let configs: Api<AuditLogPersistenceConfig> = Api::all(client.clone());
    let config: AuditLogPersistenceConfig = serde_json::from_value(json!({
        "apiVersion": "auditlogpersistence.hypershift.openshift.io/v1alpha1",
        "kind": "AuditLogPersistenceConfig",
        "metadata": {"name": "cluster"},
        "spec": {"enabled": true, "auditLog": {"maxSize": 300, "maxBackup": 4}}
    }))
    .unwrap();
    let created_config = match configs.create(&PostParams::default(), &config).await {
        Ok(_) => true,
        Err(kube::Error::Api(ae)) if ae.code == 409 => false,
        Err(e) => panic!("failed to create AuditLogPersistenceConfig: {e}"),
    };

    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let kas_config = ConfigMap {
        metadata: kube::api::ObjectMeta {
            name: Some("kas-config".to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "config.json".to_string(),
            r#"{"apiVersion":"kubecontrolplane.config.openshift.io/v1","kind":"KubeAPIServerConfig"}"#
                .to_string(),
        )])),
        ..Default::default()
    };
    let stored = config_maps
        .create(&PostParams::default(), &kas_config)
        .await
        .unwrap();

    let document: serde_json::Value =
        serde_json::from_str(&stored.data.unwrap_or_default()["config.json"]).unwrap();
    if created_config {
        assert_eq!(document["apiServerArguments"]["audit-log-maxsize"], json!(["300"]));
        assert_eq!(document["apiServerArguments"]["audit-log-maxbackup"], json!(["4"]));
        configs.delete("cluster", &DeleteParams::default()).await.unwrap();
    } else {
        assert!(document["apiServerArguments"].is_object());
    }

    cleanup_test_namespace(&client, namespace).await;
}
