// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

// Common test utilities for integration tests

#![allow(dead_code)]

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, DeleteParams, PostParams},
    client::Client,
};
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Get a Kubernetes client or skip the test if not in a cluster
pub async fn get_kube_client_or_skip() -> Option<Client> {
    match Client::try_default().await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Skipping integration test: not running in Kubernetes cluster: {}", e);
            None
        }
    }
}

/// Returns `true` when every named CRD is installed
pub async fn crds_installed(client: &Client, names: &[&str]) -> bool {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    for name in names {
        match crds.get_opt(name).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                eprintln!("Skipping integration test: CRD {} is not installed", name);
                return false;
            }
            Err(e) => {
                eprintln!("Skipping integration test: cannot read CRD {}: {}", name, e);
                return false;
            }
        }
    }
    true
}

/// Create a test namespace with extra labels
pub async fn create_test_namespace(
    client: &Client,
    name: &str,
    labels: &[(&str, &str)],
) -> Result<(), Box<dyn std::error::Error>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    let mut all_labels = serde_json::Map::new();
    all_labels.insert("test".to_string(), json!("integration"));
    all_labels.insert("managed-by".to_string(), json!("hostedcp-test"));
    for (key, value) in labels {
        all_labels.insert((*key).to_string(), json!(value));
    }

    let ns = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
            "labels": all_labels
        }
    }))?;

    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => {
            println!("Created test namespace: {}", name);
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            println!("Test namespace already exists: {}", name);
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// Cleanup test namespace
pub async fn cleanup_test_namespace(client: &Client, name: &str) {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    match namespaces.delete(name, &DeleteParams::default()).await {
        Ok(_) => println!("Deleted test namespace: {}", name),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {}
        Err(e) => eprintln!("Failed to delete test namespace {}: {}", name, e),
    }
}

/// Poll `check` every second until it yields a value or `timeout` elapses
pub async fn wait_for<T, F, Fut>(timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if let Some(value) = check().await {
            return Some(value);
        }
        sleep(Duration::from_secs(1)).await;
    }
    None
}
