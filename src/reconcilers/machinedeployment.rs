// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Scale-from-zero capacity annotations on `MachineDeployment`s.
//!
//! The cluster autoscaler cannot inspect a node that does not exist yet, so
//! machine deployments scaled to zero advertise the capacity of their
//! instance type through annotations:
//!
//! | Annotation | Value |
//! |------------|-------|
//! | `machine.openshift.io/vCPU` | vCPU count |
//! | `machine.openshift.io/memoryMb` | memory in MiB |
//! | `machine.openshift.io/GPU` | GPU count |
//! | `capacity.cluster-autoscaler.kubernetes.io/labels` | `k=v,...` node labels |
//! | `capacity.cluster-autoscaler.kubernetes.io/taints` | `k=v:effect,...` taints |
//!
//! Once CAPA publishes `status.capacity` on the `AWSMachineTemplate`, the
//! annotations are removed again.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde_json::json;
use tracing::{debug, info, warn};

use super::instance_types::{is_unknown_instance_type, InstanceTypeInfo};
use crate::capi::{AWSCluster, AWSMachineTemplate, MachineDeployment};
use crate::constants::{
    ARCH_LABEL, AWS_REGION_ANNOTATION, CAPACITY_ANNOTATIONS, CONTROL_PLANE_NAMESPACE_LABEL,
    CPU_ANNOTATION, GPU_ANNOTATION, KIND_AWS_MACHINE_TEMPLATE, LABELS_ANNOTATION,
    MEMORY_ANNOTATION, NODE_POOL_ANNOTATION, TAINTS_ANNOTATION,
};
use crate::context::Context;
use crate::crd::{NodePool, Taint};
use crate::errors::ReconcileError;
use crate::metrics::ObjectWrite;

/// Parse a `k=v,k2=v2` labels annotation. Entries without `=` are dropped.
#[must_use]
pub fn parse_labels(value: &str) -> BTreeMap<String, String> {
    value
        .split(',')
        .filter_map(|entry| {
            let (key, value) = entry.trim().split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Serialize labels as sorted `k=v` pairs joined by `,`.
#[must_use]
pub fn labels_annotation(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Serialize taints as sorted `key=value:effect` entries joined by `,`.
#[must_use]
pub fn taints_annotation(taints: &[Taint]) -> String {
    let mut parts: Vec<String> = taints
        .iter()
        .map(|t| format!("{}={}:{}", t.key, t.value, t.effect))
        .collect();
    parts.sort();
    parts.join(",")
}

/// Drop all five capacity annotations.
pub fn remove_capacity_annotations(annotations: &mut BTreeMap<String, String>) {
    for key in CAPACITY_ANNOTATIONS {
        annotations.remove(key);
    }
}

/// Capacity annotations for `info`, merged into the existing annotations.
///
/// Labels already present on the deployment are kept, the architecture label
/// is overwritten and the node pool's `nodeLabels` win over both. Without a
/// node pool, or with a node pool that has no taints, the taints annotation
/// is removed.
#[must_use]
pub fn compute_annotations(
    existing: &BTreeMap<String, String>,
    info: &InstanceTypeInfo,
    node_pool: Option<&NodePool>,
) -> BTreeMap<String, String> {
    let mut annotations = existing.clone();
    annotations.insert(CPU_ANNOTATION.to_string(), info.vcpu.to_string());
    annotations.insert(MEMORY_ANNOTATION.to_string(), info.memory_mib.to_string());
    annotations.insert(GPU_ANNOTATION.to_string(), info.gpu.to_string());

    let mut labels = existing
        .get(LABELS_ANNOTATION)
        .map(|v| parse_labels(v))
        .unwrap_or_default();
    labels.insert(ARCH_LABEL.to_string(), info.arch.clone());
    if let Some(node_labels) = node_pool.and_then(|np| np.spec.node_labels.as_ref()) {
        labels.extend(node_labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    annotations.insert(LABELS_ANNOTATION.to_string(), labels_annotation(&labels));

    let taints = node_pool.map(|np| taints_annotation(&np.spec.taints)).unwrap_or_default();
    if taints.is_empty() {
        annotations.remove(TAINTS_ANNOTATION);
    } else {
        annotations.insert(TAINTS_ANNOTATION.to_string(), taints);
    }

    annotations
}

/// Split a `<namespace>/<name>` node pool annotation.
#[must_use]
pub fn parse_node_pool_annotation(value: &str) -> Option<(&str, &str)> {
    match value.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Some((ns, name))
        }
        _ => None,
    }
}

/// True when `md` carries a well-formed node pool annotation.
#[must_use]
pub fn has_node_pool_annotation(md: &MachineDeployment) -> bool {
    md.annotations()
        .get(NODE_POOL_ANNOTATION)
        .is_some_and(|v| parse_node_pool_annotation(v).is_some())
}

/// Name of the `AWSMachineTemplate` backing `md`, if that is its infra kind.
#[must_use]
pub fn aws_machine_template_name(md: &MachineDeployment) -> Option<&str> {
    let infra = &md.spec.template.spec.infrastructure_ref;
    (infra.kind == KIND_AWS_MACHINE_TEMPLATE && !infra.name.is_empty()).then_some(infra.name.as_str())
}

fn resolve_node_pool(ctx: &Context, md: &MachineDeployment) -> Option<Arc<NodePool>> {
    let value = md.annotations().get(NODE_POOL_ANNOTATION)?;
    let Some((namespace, name)) = parse_node_pool_annotation(value) else {
        debug!(annotation = %value, "Malformed node pool annotation, skipping labels and taints");
        return None;
    };
    ctx.stores.get_node_pool(namespace, name)
}

async fn resolve_region(
    ctx: &Context,
    md: &MachineDeployment,
    namespace: &str,
) -> Result<Option<String>, ReconcileError> {
    if let Some(region) = md.annotations().get(AWS_REGION_ANNOTATION).filter(|r| !r.is_empty()) {
        return Ok(Some(region.clone()));
    }
    let clusters: Api<AWSCluster> = Api::namespaced(ctx.client.clone(), namespace);
    let list = clusters.list(&Default::default()).await?;
    Ok(list
        .items
        .into_iter()
        .map(|c| c.spec.region)
        .find(|r| !r.is_empty()))
}

/// Merge patch turning `current` annotations into `desired`. Removed keys
/// are set to `null`.
#[must_use]
pub fn annotations_patch(
    current: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> serde_json::Value {
    let mut patch = serde_json::Map::new();
    for key in current.keys().filter(|k| !desired.contains_key(*k)) {
        patch.insert(key.clone(), serde_json::Value::Null);
    }
    for (key, value) in desired {
        if current.get(key) != Some(value) {
            patch.insert(key.clone(), json!(value));
        }
    }
    json!({ "metadata": { "annotations": patch } })
}

async fn desired_annotations(
    ctx: &Context,
    md: &MachineDeployment,
    namespace: &str,
    template_name: &str,
) -> Result<BTreeMap<String, String>, ReconcileError> {
    let mut annotations = md.annotations().clone();

    let templates: Api<AWSMachineTemplate> = Api::namespaced(ctx.client.clone(), namespace);
    let Some(template) = templates.get_opt(template_name).await? else {
        debug!(namespace = %namespace, template = %template_name, "AWSMachineTemplate not found");
        return Ok(annotations);
    };

    if template.status.as_ref().is_some_and(|s| !s.capacity.is_empty()) {
        remove_capacity_annotations(&mut annotations);
        return Ok(annotations);
    }

    let instance_type = template.spec.template.spec.instance_type.as_str();
    if instance_type.is_empty() {
        return Err(ReconcileError::Config(format!(
            "AWSMachineTemplate {namespace}/{template_name} has no instance type"
        )));
    }

    let Some(region) = resolve_region(ctx, md, namespace).await? else {
        return Err(ReconcileError::Config(format!(
            "no AWS region for MachineDeployment {namespace}/{}",
            md.name_any()
        )));
    };

    let info = match ctx.instance_types.get(&region, instance_type).await {
        Ok(info) => info,
        Err(e) if is_unknown_instance_type(&e) => {
            warn!(namespace = %namespace, region = %region, instance_type = %instance_type,
                "Unknown instance type, skipping capacity annotations");
            return Ok(annotations);
        }
        Err(e) => return Err(e),
    };

    let node_pool = resolve_node_pool(ctx, md);
    annotations = compute_annotations(&annotations, &info, node_pool.as_deref());
    Ok(annotations)
}

/// Reconcile the capacity annotations of a `MachineDeployment`.
///
/// # Errors
///
/// Returns API failures and instance-type catalog failures. An unknown
/// instance type is a permanent outcome and is not an error.
pub async fn reconcile_machinedeployment(
    ctx: Arc<Context>,
    md: Arc<MachineDeployment>,
) -> Result<(), ReconcileError> {
    let name = md.name_any();
    let Some(namespace) = md.namespace() else {
        return Ok(());
    };

    let Some(template_name) = aws_machine_template_name(&md) else {
        debug!(namespace = %namespace, name = %name, "Not backed by an AWSMachineTemplate, skipping");
        return Ok(());
    };

    let namespaces: Api<Namespace> = Api::all(ctx.client.clone());
    let Some(ns) = namespaces.get_opt(&namespace).await? else {
        return Ok(());
    };
    if ns.labels().get(CONTROL_PLANE_NAMESPACE_LABEL).map(String::as_str) != Some("true") {
        debug!(namespace = %namespace, "Not a control plane namespace, skipping");
        return Ok(());
    }

    if md.metadata.deletion_timestamp.is_some() {
        return Ok(());
    }

    let annotations = desired_annotations(&ctx, &md, &namespace, template_name).await?;
    if &annotations == md.annotations() {
        return Ok(());
    }

    let api: Api<MachineDeployment> = Api::namespaced(ctx.client.clone(), &namespace);
    api.patch(
        &name,
        &PatchParams::default(),
        &Patch::Merge(annotations_patch(md.annotations(), &annotations)),
    )
    .await?;
    crate::metrics::record_object_write("MachineDeployment", ObjectWrite::Patched);
    info!(namespace = %namespace, name = %name, "Updated capacity annotations");
    Ok(())
}

#[cfg(test)]
#[path = "machinedeployment_tests.rs"]
mod machinedeployment_tests;
