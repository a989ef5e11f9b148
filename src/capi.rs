// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster API types consumed and generated by the node pool controllers.
//!
//! Only the fields the operator reads or writes are modelled; everything else
//! round-trips through server-side apply untouched because the controllers
//! never replace these objects wholesale.
//!
//! - [`MachineDeployment`] and [`MachineSet`] (`cluster.x-k8s.io/v1beta1`)
//! - [`AWSMachineTemplate`] and [`AWSCluster`] (`infrastructure.cluster.x-k8s.io/v1beta2`)

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// API version of CAPI core objects
pub const CAPI_API_VERSION: &str = "cluster.x-k8s.io/v1beta1";

/// API version of CAPA infrastructure objects
pub const CAPA_API_VERSION: &str = "infrastructure.cluster.x-k8s.io/v1beta2";

/// Label selecting the machines of a machine deployment or set
pub const MACHINE_DEPLOYMENT_NAME_LABEL: &str = "cluster.x-k8s.io/deployment-name";

/// Label selecting the machines of a machine set
pub const MACHINE_SET_NAME_LABEL: &str = "cluster.x-k8s.io/set-name";

/// Label naming the CAPI cluster a machine belongs to
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Minimum size of an autoscaled machine deployment
pub const AUTOSCALER_MIN_SIZE_ANNOTATION: &str =
    "cluster.x-k8s.io/cluster-api-autoscaler-node-group-min-size";

/// Maximum size of an autoscaled machine deployment
pub const AUTOSCALER_MAX_SIZE_ANNOTATION: &str =
    "cluster.x-k8s.io/cluster-api-autoscaler-node-group-max-size";

/// Reference to another object, possibly of another kind.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Label selector restricted to `matchLabels`.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Labels and annotations stamped onto created machines.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub struct MachineMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Bootstrap data of a machine.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Secret holding the machine's user data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    pub cluster_name: String,
    #[serde(default)]
    pub bootstrap: Bootstrap,
    pub infrastructure_ref: ObjectReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub struct MachineTemplateSpec {
    #[serde(default)]
    pub metadata: MachineMetadata,
    pub spec: MachineSpec,
}

/// CAPI `MachineDeployment`; autoscaler capacity annotations live on its metadata.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MachineDeployment",
    namespaced,
    doc = "MachineDeployment manages a replicated set of machines through machine sets."
)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentSpec {
    pub cluster_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub selector: LabelSelector,
    pub template: MachineTemplateSpec,
}

/// CAPI `MachineSet`.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MachineSet",
    namespaced,
    doc = "MachineSet keeps a fixed number of machines running."
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    pub cluster_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub selector: LabelSelector,
    pub template: MachineTemplateSpec,
}

/// Resource id reference used by CAPA (`{id: ...}`).
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub struct AwsResourceReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsRootVolume {
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsMachineSpec {
    #[serde(default)]
    pub instance_type: String,
    #[serde(default)]
    pub ami: AwsResourceReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<AwsResourceReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_security_groups: Vec<AwsResourceReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<AwsRootVolume>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub struct AwsMachineTemplateResource {
    pub spec: AwsMachineSpec,
}

/// CAPA `AWSMachineTemplate`.
///
/// Newer CAPA releases publish the instance capacity in `status.capacity`,
/// which makes the capacity annotation workaround unnecessary.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "AWSMachineTemplate",
    namespaced,
    doc = "AWSMachineTemplate describes the EC2 instances created for a machine deployment."
)]
#[kube(status = "AwsMachineTemplateStatus")]
#[serde(rename_all = "camelCase")]
pub struct AWSMachineTemplateSpec {
    pub template: AwsMachineTemplateResource,
}

/// `AWSMachineTemplate` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub struct AwsMachineTemplateStatus {
    /// Resource name to quantity, e.g. `cpu: "4"`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capacity: BTreeMap<String, String>,
}

/// CAPA `AWSCluster`; only the region is read.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "AWSCluster",
    namespaced,
    doc = "AWSCluster describes the AWS infrastructure of a CAPI cluster."
)]
#[serde(rename_all = "camelCase")]
pub struct AWSClusterSpec {
    #[serde(default)]
    pub region: String,
}

#[cfg(test)]
#[path = "capi_tests.rs"]
mod capi_tests;
