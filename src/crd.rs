// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for hosted control planes.
//!
//! This module defines the Kubernetes Custom Resource Definitions reconciled by
//! the hostedcp operator.
//!
//! # Resource Types
//!
//! ## Clusters
//!
//! - [`HostedCluster`] - A tenant cluster whose control plane runs on the management cluster
//! - [`HostedControlPlane`] - The control plane of a hosted cluster, living in its own namespace
//! - [`NodePool`] - A group of worker machines attached to a hosted cluster
//!
//! ## Cluster-scoped configuration
//!
//! - [`ClusterSizingConfiguration`] - Size classes and the effects applied per class
//! - [`AuditLogPersistenceConfig`] - Audit log rotation settings injected into kube-apiserver
//!
//! # Example: Creating a NodePool
//!
//! ```rust,no_run
//! use hostedcp::crd::{AwsNodePoolPlatform, NodePoolPlatform, NodePoolSpec, PlatformType};
//!
//! let spec = NodePoolSpec {
//!     cluster_name: "example".to_string(),
//!     replicas: Some(2),
//!     platform: NodePoolPlatform {
//!         r#type: PlatformType::AWS,
//!         aws: Some(AwsNodePoolPlatform {
//!             instance_type: "m5.large".to_string(),
//!             ami: "ami-0123456789".to_string(),
//!             ..Default::default()
//!         }),
//!     },
//!     ..Default::default()
//! };
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, e.g. Available, `ClusterSizeComputed`.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    /// Returns `true` when the condition status is `True`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Find a condition by type.
#[must_use]
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Insert or replace a condition, keeping `last_transition_time` when the
/// status did not change.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.r#type == condition.r#type)
    {
        Some(existing) => {
            if existing.status == condition.status {
                condition
                    .last_transition_time
                    .clone_from(&existing.last_transition_time);
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Reference to an object by name in the same namespace.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub struct LocalObjectReference {
    pub name: String,
}

/// Reference to a key of a secret in the same namespace.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub struct SecretKeyReference {
    pub name: String,
    pub key: String,
}

/// Infrastructure provider hosting the cluster's machines.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub enum PlatformType {
    AWS,
    IBMCloud,
    #[default]
    None,
}

impl PlatformType {
    /// Platform name as written into the rendered cluster configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AWS => "AWS",
            Self::IBMCloud => "IBMCloud",
            Self::None => "None",
        }
    }

    /// Cloud provider name passed to kubelet and the controller manager.
    #[must_use]
    pub fn cloud_provider(self) -> &'static str {
        match self {
            Self::AWS => "aws",
            Self::IBMCloud => "external",
            Self::None => "",
        }
    }
}

/// AWS settings shared by the cluster and its control plane.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsPlatformSpec {
    /// AWS region hosting the cluster, e.g. `us-east-1`.
    pub region: String,
}

/// Platform of a hosted cluster.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    pub r#type: PlatformType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsPlatformSpec>,
}

/// Address ranges of the hosted cluster.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworking {
    /// CIDR of cluster services. The first usable address is the kubernetes service IP.
    #[serde(default = "default_service_cidr")]
    pub service_cidr: String,

    /// CIDR pods are allocated from.
    #[serde(default = "default_pod_cidr")]
    pub pod_cidr: String,

    /// CIDR of the machine network.
    #[serde(default = "default_machine_cidr")]
    pub machine_cidr: String,
}

fn default_service_cidr() -> String {
    "172.31.0.0/16".to_string()
}

fn default_pod_cidr() -> String {
    "10.132.0.0/14".to_string()
}

fn default_machine_cidr() -> String {
    "10.0.0.0/16".to_string()
}

impl Default for ClusterNetworking {
    fn default() -> Self {
        Self {
            service_cidr: default_service_cidr(),
            pod_cidr: default_pod_cidr(),
            machine_cidr: default_machine_cidr(),
        }
    }
}

/// DNS settings of a hosted cluster.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DnsSpec {
    /// Base domain; cluster endpoints live under `<name>.<baseDomain>`.
    pub base_domain: String,
}

/// Release payload reference.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub struct Release {
    /// Release image pullspec.
    pub image: String,
}

/// Host and port of an exposed endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub struct ApiEndpoint {
    pub host: String,
    pub port: i32,
}

/// `HostedControlPlane` holds everything needed to run a tenant control plane.
///
/// It is created by the `HostedCluster` controller in the control plane
/// namespace; the control-plane reconciler renders and applies the control
/// plane components from it.
///
/// # Example
///
/// ```yaml
/// apiVersion: hypershift.openshift.io/v1beta1
/// kind: HostedControlPlane
/// metadata:
///   name: example
///   namespace: clusters-example
/// spec:
///   releaseImage: quay.io/openshift-release-dev/ocp-release:4.7.0-x86_64
///   pullSecret:
///     name: pull-secret
///   sshKey:
///     name: ssh-key
///   infraID: example-x7k2p
///   platform:
///     type: AWS
///     aws:
///       region: us-east-1
///   dns:
///     baseDomain: example.com
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "hypershift.openshift.io",
    version = "v1beta1",
    kind = "HostedControlPlane",
    namespaced,
    shortname = "hcp",
    doc = "HostedControlPlane defines the control plane of a hosted cluster. The operator generates PKI, renders the control plane manifests for the release and applies them to the namespace."
)]
#[kube(status = "HostedControlPlaneStatus")]
#[serde(rename_all = "camelCase")]
pub struct HostedControlPlaneSpec {
    /// Release image the control plane components are taken from.
    pub release_image: String,

    /// Secret with the `.dockerconfigjson` used to pull release images.
    pub pull_secret: LocalObjectReference,

    /// Secret with the `id_rsa.pub` key installed on machines.
    pub ssh_key: LocalObjectReference,

    /// Unique id used to tag and name cloud resources.
    #[serde(rename = "infraID")]
    pub infra_id: String,

    #[serde(default)]
    pub platform: PlatformSpec,

    #[serde(default)]
    pub networking: ClusterNetworking,

    pub dns: DnsSpec,

    /// Where the admin kubeconfig is published. Defaults to `<name>-kubeconfig`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_config: Option<SecretKeyReference>,
}

/// `HostedControlPlane` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostedControlPlaneStatus {
    /// True once the control plane is available.
    #[serde(default)]
    pub ready: bool,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Release version the control plane runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_image: Option<String>,

    /// Secret holding the admin kubeconfig.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_config: Option<SecretKeyReference>,

    /// Secret holding the generated kubeadmin password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeadmin_password: Option<LocalObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// `HostedCluster` is the user-facing representation of a tenant cluster.
///
/// The sizing scheduler assigns it a size class through the
/// `hypershift.openshift.io/hosted-cluster-size` label and applies the
/// class's effects as annotations.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "hypershift.openshift.io",
    version = "v1beta1",
    kind = "HostedCluster",
    namespaced,
    shortname = "hc",
    doc = "HostedCluster is a tenant cluster whose control plane is hosted on the management cluster."
)]
#[kube(status = "HostedClusterStatus")]
#[serde(rename_all = "camelCase")]
pub struct HostedClusterSpec {
    pub release: Release,

    #[serde(rename = "infraID")]
    pub infra_id: String,

    #[serde(default)]
    pub platform: PlatformSpec,

    #[serde(default)]
    pub networking: ClusterNetworking,

    pub dns: DnsSpec,

    pub pull_secret: LocalObjectReference,

    pub ssh_key: LocalObjectReference,

    /// Pauses reconciliation. Either `"true"` or an RFC3339 timestamp until
    /// which the cluster stays paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<String>,
}

/// `HostedCluster` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostedClusterStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<LocalObjectReference>,
}

/// Autoscaling bounds of a node pool.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub struct NodePoolAutoScaling {
    pub min: i32,
    pub max: i32,
}

/// Root volume of AWS machines.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsVolume {
    /// Size in GiB.
    pub size: i64,
    #[serde(default = "default_volume_type")]
    pub r#type: String,
}

fn default_volume_type() -> String {
    "gp3".to_string()
}

/// AWS machine settings of a node pool.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsNodePoolPlatform {
    /// EC2 instance type, e.g. `m5.large`.
    pub instance_type: String,

    /// AMI booted by the machines.
    #[serde(default)]
    pub ami: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_profile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_group_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<AwsVolume>,
}

/// Platform of a node pool.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolPlatform {
    pub r#type: PlatformType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsNodePoolPlatform>,
}

/// Taint applied to the nodes of a node pool.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    /// `NoSchedule`, `PreferNoSchedule` or `NoExecute`.
    pub effect: String,
}

/// `NodePool` is a scalable set of worker machines for a hosted cluster.
///
/// # Example
///
/// ```yaml
/// apiVersion: hypershift.openshift.io/v1beta1
/// kind: NodePool
/// metadata:
///   name: example-workers
///   namespace: clusters
/// spec:
///   clusterName: example
///   replicas: 2
///   nodeLabels:
///     role: worker
///   platform:
///     type: AWS
///     aws:
///       instanceType: m5.large
///       ami: ami-0123456789
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "hypershift.openshift.io",
    version = "v1beta1",
    kind = "NodePool",
    namespaced,
    shortname = "np",
    doc = "NodePool is a scalable set of worker machines attached to a HostedCluster in the same namespace."
)]
#[kube(status = "NodePoolStatus")]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    /// Name of the `HostedCluster` this pool belongs to.
    pub cluster_name: String,

    /// Fixed machine count. Ignored when autoscaling is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_scaling: Option<NodePoolAutoScaling>,

    pub platform: NodePoolPlatform,

    /// Labels propagated to the nodes and advertised to the autoscaler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,
}

/// `NodePool` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolStatus {
    /// Machines currently available in the pool.
    #[serde(default)]
    pub replicas: i32,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Node count range selecting a size class. `to` is inclusive; a missing
/// `to` leaves the range open-ended.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub struct NodeCountCriteria {
    pub from: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<u32>,
}

impl NodeCountCriteria {
    /// Returns `true` when `nodes` falls inside the range.
    #[must_use]
    pub fn contains(&self, nodes: u32) -> bool {
        self.from <= nodes && self.to.is_none_or(|to| to >= nodes)
    }
}

/// Resource requests overridden for a container of a control plane deployment.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    pub deployment_name: String,
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
}

/// Settings applied to hosted clusters of a size class.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Effects {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kas_go_mem_limit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_priority_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_priority_class_name: Option<String>,

    #[serde(
        default,
        rename = "APICriticalPriorityClassName",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_critical_priority_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_requests: Vec<ResourceRequest>,

    /// Go-style duration, e.g. `8m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_health_check_timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_requests_inflight: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_mutating_requests_inflight: Option<i32>,
}

/// One size class.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub struct SizeConfiguration {
    pub name: String,
    pub criteria: NodeCountCriteria,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects: Option<Effects>,
}

/// Minimum time a cluster must stay eligible for a new size before moving.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub struct TransitionDelayConfiguration {
    /// Go-style duration applied when moving to a larger class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increase: Option<String>,
    /// Go-style duration applied when moving to a smaller class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decrease: Option<String>,
}

/// `ClusterSizingConfiguration` is the cluster-scoped singleton `cluster`
/// listing the size classes available to hosted clusters.
///
/// # Example
///
/// ```yaml
/// apiVersion: scheduling.hypershift.openshift.io/v1alpha1
/// kind: ClusterSizingConfiguration
/// metadata:
///   name: cluster
/// spec:
///   sizes:
///   - name: small
///     criteria: {from: 0, to: 10}
///     effects:
///       kasGoMemLimit: 4GiB
///   - name: large
///     criteria: {from: 11}
///   transitionDelay:
///     increase: 30s
///     decrease: 10m
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "scheduling.hypershift.openshift.io",
    version = "v1alpha1",
    kind = "ClusterSizingConfiguration",
    doc = "ClusterSizingConfiguration defines the size classes hosted clusters are sorted into by node count, and the effects applied to each class."
)]
#[kube(status = "ClusterSizingConfigurationStatus")]
#[serde(rename_all = "camelCase")]
pub struct ClusterSizingConfigurationSpec {
    /// Size classes ordered by node count.
    #[serde(default)]
    pub sizes: Vec<SizeConfiguration>,

    #[serde(default)]
    pub transition_delay: TransitionDelayConfiguration,
}

impl ClusterSizingConfigurationSpec {
    /// Size class with the given name.
    #[must_use]
    pub fn size(&self, name: &str) -> Option<&SizeConfiguration> {
        self.sizes.iter().find(|s| s.name == name)
    }

    /// First size class whose criteria contain `nodes`.
    #[must_use]
    pub fn size_for(&self, nodes: u32) -> Option<&SizeConfiguration> {
        self.sizes.iter().find(|s| s.criteria.contains(nodes))
    }
}

/// `ClusterSizingConfiguration` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSizingConfigurationStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Audit log rotation of the kube-apiserver.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogConfig {
    /// Maximum size in megabytes of an audit log file before rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i32>,

    /// Number of rotated audit log files kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backup: Option<i32>,
}

/// Default `maxSize` when the audit log section is omitted
pub const DEFAULT_AUDIT_LOG_MAX_SIZE: i32 = 200;

/// Default `maxBackup` when the audit log section is omitted
pub const DEFAULT_AUDIT_LOG_MAX_BACKUP: i32 = 10;

/// `AuditLogPersistenceConfig` is the cluster-scoped singleton `cluster`
/// controlling kube-apiserver audit log persistence for every hosted control plane.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "auditlogpersistence.hypershift.openshift.io",
    version = "v1alpha1",
    kind = "AuditLogPersistenceConfig",
    doc = "AuditLogPersistenceConfig configures audit log rotation for hosted kube-apiservers."
)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogPersistenceConfigSpec {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<AuditLogConfig>,
}

impl AuditLogPersistenceConfigSpec {
    /// Fill in the audit log section when it was omitted entirely. A section
    /// that is present is kept as written, so an unset field stays unset.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        if self.audit_log.is_none() {
            self.audit_log = Some(AuditLogConfig {
                max_size: Some(DEFAULT_AUDIT_LOG_MAX_SIZE),
                max_backup: Some(DEFAULT_AUDIT_LOG_MAX_BACKUP),
            });
        }
        self
    }
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
