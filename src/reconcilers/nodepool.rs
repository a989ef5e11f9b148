// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `NodePool` to Cluster API translation.
//!
//! Each AWS node pool owns two objects in the control plane namespace
//! `<namespace>-<clusterName>`:
//!
//! - an `AWSMachineTemplate` named `<nodepool>-<hash>`, where the hash covers
//!   the rendered template spec so any change rolls out a new template
//! - a `MachineDeployment` named `<nodepool>` pointing at that template
//!
//! Both carry the `hypershift.openshift.io/nodePool=<namespace>/<name>`
//! annotation the machine deployment enricher keys on.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::api::ObjectMeta;
use kube::{Api, ResourceExt};
use tracing::{debug, info};

use super::controlplane::{fnv_hash, get_name};
use super::resources::apply;
use crate::capi::{
    AWSMachineTemplate, AWSMachineTemplateSpec, AwsMachineSpec, AwsMachineTemplateResource,
    AwsResourceReference, AwsRootVolume, Bootstrap, LabelSelector, MachineDeployment,
    MachineDeploymentSpec, MachineMetadata, MachineSpec, MachineTemplateSpec, ObjectReference,
    AUTOSCALER_MAX_SIZE_ANNOTATION, AUTOSCALER_MIN_SIZE_ANNOTATION, CAPA_API_VERSION,
    CLUSTER_NAME_LABEL, MACHINE_DEPLOYMENT_NAME_LABEL,
};
use crate::constants::{KIND_AWS_MACHINE_TEMPLATE, NODEPOOL_FIELD_MANAGER, NODE_POOL_ANNOTATION};
use crate::context::Context;
use crate::crd::{AwsNodePoolPlatform, HostedCluster, NodePool, PlatformType};
use crate::errors::ReconcileError;
use crate::metrics::ObjectWrite;

/// Longest valid DNS-1123 subdomain
const DNS1123_SUBDOMAIN_MAX_LENGTH: usize = 253;

/// Namespace holding the control plane of hosted cluster `name` in `namespace`.
#[must_use]
pub fn control_plane_namespace(namespace: &str, name: &str) -> String {
    format!("{namespace}-{name}").replace('.', "-")
}

/// `<namespace>/<name>` value of the node pool annotation.
#[must_use]
pub fn node_pool_key(node_pool: &NodePool) -> String {
    format!(
        "{}/{}",
        node_pool.namespace().unwrap_or_default(),
        node_pool.name_any()
    )
}

fn machine_spec(aws: &AwsNodePoolPlatform) -> AwsMachineSpec {
    AwsMachineSpec {
        instance_type: aws.instance_type.clone(),
        ami: AwsResourceReference {
            id: (!aws.ami.is_empty()).then(|| aws.ami.clone()),
        },
        iam_instance_profile: aws.instance_profile.clone(),
        subnet: aws.subnet_id.as_ref().map(|id| AwsResourceReference { id: Some(id.clone()) }),
        additional_security_groups: aws
            .security_group_ids
            .iter()
            .map(|id| AwsResourceReference { id: Some(id.clone()) })
            .collect(),
        root_volume: aws.root_volume.as_ref().map(|v| AwsRootVolume {
            size: v.size,
            r#type: Some(v.r#type.clone()),
        }),
    }
}

/// Name of the machine template rendering `spec` for `node_pool_name`.
///
/// # Errors
///
/// Returns a serialization error if the spec cannot be encoded.
pub fn machine_template_name(
    node_pool_name: &str,
    spec: &AWSMachineTemplateSpec,
) -> Result<String, ReconcileError> {
    let encoded = serde_json::to_string(spec)?;
    Ok(get_name(
        node_pool_name,
        &fnv_hash(&encoded),
        DNS1123_SUBDOMAIN_MAX_LENGTH,
    ))
}

/// `AWSMachineTemplate` for an AWS node pool.
///
/// # Errors
///
/// Returns [`ReconcileError::Config`] when the node pool has no AWS section.
pub fn aws_machine_template(
    node_pool: &NodePool,
    namespace: &str,
) -> Result<AWSMachineTemplate, ReconcileError> {
    let aws = node_pool.spec.platform.aws.as_ref().ok_or_else(|| {
        ReconcileError::Config(format!("NodePool {} has no AWS platform", node_pool_key(node_pool)))
    })?;
    let spec = AWSMachineTemplateSpec {
        template: AwsMachineTemplateResource {
            spec: machine_spec(aws),
        },
    };
    let name = machine_template_name(&node_pool.name_any(), &spec)?;

    let mut template = AWSMachineTemplate::new(&name, spec);
    template.metadata.namespace = Some(namespace.to_string());
    template.metadata.annotations = Some(BTreeMap::from([(
        NODE_POOL_ANNOTATION.to_string(),
        node_pool_key(node_pool),
    )]));
    Ok(template)
}

/// `MachineDeployment` of a node pool, running machines from `template_name`.
///
/// Autoscaled pools leave `replicas` to the cluster autoscaler and publish
/// their bounds as autoscaler annotations instead.
#[must_use]
pub fn machine_deployment(
    node_pool: &NodePool,
    namespace: &str,
    capi_cluster: &str,
    template_name: &str,
) -> MachineDeployment {
    let name = node_pool.name_any();
    let cluster = &node_pool.spec.cluster_name;

    let labels = BTreeMap::from([
        (CLUSTER_NAME_LABEL.to_string(), capi_cluster.to_string()),
        (MACHINE_DEPLOYMENT_NAME_LABEL.to_string(), name.clone()),
    ]);

    let mut annotations = BTreeMap::from([(NODE_POOL_ANNOTATION.to_string(), node_pool_key(node_pool))]);
    let replicas = match &node_pool.spec.auto_scaling {
        Some(bounds) => {
            annotations.insert(AUTOSCALER_MIN_SIZE_ANNOTATION.to_string(), bounds.min.to_string());
            annotations.insert(AUTOSCALER_MAX_SIZE_ANNOTATION.to_string(), bounds.max.to_string());
            None
        }
        None => Some(node_pool.spec.replicas.unwrap_or(0)),
    };

    MachineDeployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                CLUSTER_NAME_LABEL.to_string(),
                capi_cluster.to_string(),
            )])),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: MachineDeploymentSpec {
            cluster_name: capi_cluster.to_string(),
            replicas,
            selector: LabelSelector {
                match_labels: labels.clone(),
            },
            template: MachineTemplateSpec {
                metadata: MachineMetadata {
                    labels,
                    annotations: BTreeMap::from([(
                        NODE_POOL_ANNOTATION.to_string(),
                        node_pool_key(node_pool),
                    )]),
                },
                spec: MachineSpec {
                    cluster_name: capi_cluster.to_string(),
                    bootstrap: Bootstrap {
                        data_secret_name: Some(format!("{cluster}-user-data")),
                    },
                    infrastructure_ref: ObjectReference {
                        api_version: CAPA_API_VERSION.to_string(),
                        kind: KIND_AWS_MACHINE_TEMPLATE.to_string(),
                        name: template_name.to_string(),
                        namespace: Some(namespace.to_string()),
                    },
                    version: None,
                },
            },
        },
    }
}

/// Reconcile the CAPI objects of a `NodePool`.
///
/// Node pools of other platforms, or whose hosted cluster does not exist
/// yet, are skipped.
///
/// # Errors
///
/// Returns API failures and invalid node pool platforms.
pub async fn reconcile_nodepool(
    ctx: Arc<Context>,
    node_pool: Arc<NodePool>,
) -> Result<(), ReconcileError> {
    let client = &ctx.client;
    let name = node_pool.name_any();
    let namespace = node_pool
        .namespace()
        .ok_or_else(|| ReconcileError::Config("NodePool must be namespaced".to_string()))?;

    if node_pool.metadata.deletion_timestamp.is_some() {
        return Ok(());
    }
    if node_pool.spec.platform.r#type != PlatformType::AWS {
        debug!(namespace = %namespace, name = %name, "Not an AWS node pool, skipping");
        return Ok(());
    }

    let clusters: Api<HostedCluster> = Api::namespaced(client.clone(), &namespace);
    let Some(cluster) = clusters.get_opt(&node_pool.spec.cluster_name).await? else {
        info!(namespace = %namespace, name = %name, cluster = %node_pool.spec.cluster_name,
            "Waiting for HostedCluster");
        return Ok(());
    };

    let target_namespace = control_plane_namespace(&namespace, &cluster.name_any());
    let template = aws_machine_template(&node_pool, &target_namespace)?;
    let template_name = template.name_any();
    apply(client, &target_namespace, &template, NODEPOOL_FIELD_MANAGER).await?;

    let deployment = machine_deployment(
        &node_pool,
        &target_namespace,
        &cluster.spec.infra_id,
        &template_name,
    );
    apply(client, &target_namespace, &deployment, NODEPOOL_FIELD_MANAGER).await?;
    crate::metrics::record_object_write("MachineDeployment", ObjectWrite::Patched);

    info!(
        namespace = %namespace,
        name = %name,
        template = %template_name,
        "Applied machine template and deployment"
    );
    Ok(())
}

#[cfg(test)]
#[path = "nodepool_tests.rs"]
mod nodepool_tests;
