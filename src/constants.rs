// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the hostedcp operator and infrastructure tooling.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

use std::time::Duration;

// ============================================================================
// API Constants
// ============================================================================

/// API group for the hosted control plane CRDs
pub const API_GROUP: &str = "hypershift.openshift.io";

/// API version for the hosted control plane CRDs
pub const API_VERSION: &str = "v1beta1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "hypershift.openshift.io/v1beta1";

/// Kind name for `HostedControlPlane` resource
pub const KIND_HOSTED_CONTROL_PLANE: &str = "HostedControlPlane";

/// Kind name for `HostedCluster` resource
pub const KIND_HOSTED_CLUSTER: &str = "HostedCluster";

/// Kind name for `NodePool` resource
pub const KIND_NODE_POOL: &str = "NodePool";

/// Kind name for CAPI `MachineDeployment` resource
pub const KIND_MACHINE_DEPLOYMENT: &str = "MachineDeployment";

/// Kind name for CAPI `AWSMachineTemplate` resource
pub const KIND_AWS_MACHINE_TEMPLATE: &str = "AWSMachineTemplate";

/// Kind name for `ClusterSizingConfiguration` resource
pub const KIND_CLUSTER_SIZING_CONFIGURATION: &str = "ClusterSizingConfiguration";

/// Field manager used for server-side apply by the control-plane reconciler
pub const CONTROL_PLANE_FIELD_MANAGER: &str = "hostedcp-operator";

/// Field manager used for server-side apply by the sizing scheduler
pub const SIZING_FIELD_MANAGER: &str = "hostedcluster-sizing";

/// Field manager used for NodePool to CAPI generation
pub const NODEPOOL_FIELD_MANAGER: &str = "hostedcp-nodepool";

// ============================================================================
// PowerVS Naming Constants
// ============================================================================

/// Suffix of the cloud instance created for a cluster
pub const CLOUD_INSTANCE_NAME_SUFFIX: &str = "nodepool";

/// Suffix of the VPC created for a cluster
pub const VPC_NAME_SUFFIX: &str = "vpc";

/// Suffix of the VPC subnet created for a cluster
pub const VPC_SUBNET_NAME_SUFFIX: &str = "vpc-sn";

/// Suffix of the cloud connection created for a cluster
pub const CLOUD_CONNECTION_NAME_SUFFIX: &str = "cc";

/// Prefix of load balancers provisioned by the cloud controller manager
pub const VPC_LB_NAME_PREFIX: &str = "kube";

/// Default cloud connection speed in Mbps
pub const DEFAULT_CLOUD_CONNECTION_SPEED: u32 = 5000;

/// DNS server configured on created DHCP servers
pub const DHCP_DNS_SERVER: &str = "1.1.1.1";

/// Maximum number of cloud connections allowed per PowerVS zone
pub const MAX_CLOUD_CONNECTIONS_PER_ZONE: usize = 2;

/// Ports the default VPC security group must admit for ingress
pub const INGRESS_PORTS: [u16; 2] = [80, 443];

/// Zones where infrastructure creation is not supported
pub const UNSUPPORTED_POWERVS_ZONES: &[&str] = &["wdc06"];

// ============================================================================
// IBM Cloud Service Constants
// ============================================================================

/// Global catalog name of the CIS service
pub const CIS_SERVICE: &str = "internet-svcs";

/// Global catalog name of the PowerVS service
pub const POWERVS_SERVICE: &str = "power-iaas";

/// Global catalog plan used for PowerVS cloud instances
pub const POWERVS_SERVICE_PLAN: &str = "power-virtual-server-group";

/// Environment variable holding the IBM Cloud API key
pub const ENV_API_KEY: &str = "IBMCLOUD_API_KEY";

/// Environment variable naming a file that holds the IBM Cloud API key
pub const ENV_CREDENTIALS_FILE: &str = "IBMCLOUD_CREDENTIALS";

/// Endpoint override for PowerVS APIs
pub const ENV_POWER_API_ENDPOINT: &str = "IBMCLOUD_POWER_API_ENDPOINT";

/// Endpoint override for VPC APIs
pub const ENV_VPC_API_ENDPOINT: &str = "IBMCLOUD_VPC_API_ENDPOINT";

/// Endpoint override for platform APIs (IAM, resource controller, catalog)
pub const ENV_PLATFORM_API_ENDPOINT: &str = "IBMCLOUD_PLATFORM_API_ENDPOINT";

/// Environment variable pointing at a pre-generated DH params file
pub const ENV_DH_PARAMS: &str = "DH_PARAMS";

/// VPC API version date sent with every VPC request
pub const VPC_API_VERSION: &str = "2023-12-19";

/// Page size requested from paginated IBM Cloud list APIs
pub const CLOUD_LIST_PAGE_SIZE: u32 = 50;

/// Timeout applied to every IBM Cloud HTTP request
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Resource States
// ============================================================================

/// VPC and subnet ready state
pub const VPC_AVAILABLE_STATE: &str = "available";

/// Cloud instance ready state
pub const CLOUD_INSTANCE_ACTIVE_STATE: &str = "active";

/// Cloud instance state after deletion
pub const CLOUD_INSTANCE_REMOVED_STATE: &str = "removed";

/// DHCP server ready state
pub const DHCP_ACTIVE_STATE: &str = "ACTIVE";

/// DHCP server error state
pub const DHCP_ERROR_STATE: &str = "ERROR";

/// DHCP backing instance state once deletion has progressed
pub const DHCP_SHUTOFF_STATE: &str = "SHUTOFF";

/// Cloud connection link state once established
pub const CLOUD_CONNECTION_ESTABLISHED_STATE: &str = "established";

/// PowerVS job completed state
pub const JOB_COMPLETED_STATE: &str = "completed";

/// PowerVS job failed state
pub const JOB_FAILED_STATE: &str = "failed";

/// States accepted as healthy when validating an existing resource by id
pub const HEALTHY_STATES: &[&str] = &["active", "available", "ACTIVE", "established"];

// ============================================================================
// Polling Intervals and Timeouts
// ============================================================================

/// Default polling interval for cloud resources
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Polling interval for DHCP server readiness
pub const DHCP_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// VPC and subnet creation timeout
pub const VPC_CREATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Cloud instance creation timeout
pub const CLOUD_INSTANCE_CREATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Cloud connection established state timeout
pub const CLOUD_CONNECTION_ESTABLISHED_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Number of attempts made waiting for the cloud connection to establish
pub const CLOUD_CONNECTION_ESTABLISH_ATTEMPTS: usize = 2;

/// DHCP server creation timeout
pub const DHCP_CREATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Cloud connection update job timeout
pub const CLOUD_CONNECTION_UPDATE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Cloud instance deletion timeout
pub const CLOUD_INSTANCE_DELETION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// PowerVS job-based deletion timeout
pub const POWERVS_RESOURCE_DELETION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// VPC resource deletion timeout
pub const VPC_RESOURCE_DELETION_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// DHCP server deletion timeout
pub const DHCP_DELETION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Attempts made deleting cloud instances and load balancers
pub const DELETE_RETRY_ATTEMPTS: usize = 5;

/// Error substrings that mark a cloud error as transient while polling
pub const TRANSIENT_ERROR_KEYWORDS: &[&str] = &["status 522", "status 524"];

// ============================================================================
// Controller Constants
// ============================================================================

/// Requeue interval once a resource is fully reconciled
pub const REQUEUE_WHEN_READY_SECS: u64 = 300;

/// Requeue interval while waiting for a dependency
pub const REQUEUE_WHEN_NOT_READY_SECS: u64 = 30;

/// Initial per-key error backoff
pub const ERROR_BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Maximum per-key error backoff
pub const ERROR_BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Page size for Kubernetes list operations
pub const KUBE_LIST_PAGE_SIZE: u32 = 100;

// ============================================================================
// Control Plane Constants
// ============================================================================

/// Name of the secret holding the generated PKI bundle
pub const PKI_SECRET_NAME: &str = "pki";

/// Name of the kubeadmin password secret
pub const KUBEADMIN_PASSWORD_SECRET_NAME: &str = "kubeadmin-password";

/// Key of the kubeadmin password in its secret
pub const KUBEADMIN_PASSWORD_KEY: &str = "password";

/// Length of generated kubeadmin passwords
pub const KUBEADMIN_PASSWORD_LENGTH: usize = 23;

/// Positions replaced with `-` in generated kubeadmin passwords
pub const KUBEADMIN_PASSWORD_DASHES: [usize; 3] = [5, 11, 17];

/// Number of random bytes in the image-registry HTTP secret
pub const IMAGE_REGISTRY_SECRET_BYTES: usize = 64;

/// Name of the secret persisting the image-registry HTTP secret
pub const IMAGE_REGISTRY_SECRET_NAME: &str = "image-registry-http-secret";

/// Key of the image-registry HTTP secret
pub const IMAGE_REGISTRY_SECRET_KEY: &str = "secret";

/// Pull secret key holding the docker config
pub const PULL_SECRET_KEY: &str = ".dockerconfigjson";

/// SSH key secret key holding the public key
pub const SSH_PUBLIC_KEY: &str = "id_rsa.pub";

/// Port of the hosted kube-apiserver, internal and external
pub const API_SERVER_PORT: u16 = 6443;

/// Port of the hosted OpenVPN server
pub const OPENVPN_PORT: u16 = 1194;

/// Port of the hosted OAuth server
pub const OAUTH_PORT: u16 = 8443;

/// Service exposing the hosted kube-apiserver
pub const KUBE_APISERVER_SERVICE: &str = "kube-apiserver";

/// Service exposing the hosted OAuth server
pub const OAUTH_SERVICE: &str = "oauth-openshift";

/// Service exposing the OpenVPN server
pub const OPENVPN_SERVICE: &str = "openvpn-server";

/// Service fronting openshift-apiserver
pub const OPENSHIFT_APISERVER_SERVICE: &str = "openshift-apiserver";

/// Service fronting openshift-oauth-apiserver
pub const OPENSHIFT_OAUTH_APISERVER_SERVICE: &str = "openshift-oauth-apiserver";

/// Service serving ignition to new machines
pub const MACHINE_CONFIG_SERVER_SERVICE: &str = "machine-config-server";

/// Condition reporting the control plane is available
pub const CONDITION_AVAILABLE: &str = "Available";

/// User manifest carrying the hashed kubeadmin secret for the hosted cluster
pub const KUBEADMIN_TARGET_CONFIGMAP_NAME: &str = "user-manifest-kubeadmin-password";

/// User manifest carrying the pull secret for the hosted cluster
pub const PULL_SECRET_CONFIGMAP_NAME: &str = "user-manifest-pullsecret";

/// Key of the payload in user manifest configmaps
pub const USER_MANIFEST_DATA_KEY: &str = "data";

/// Key of published kubeconfigs and user data in their secrets
pub const SECRET_VALUE_KEY: &str = "value";

/// Manifests excluded from server-side apply
pub const EXCLUDED_MANIFESTS: &[&str] = &[
    "openshift-apiserver-service.yaml",
    "oauth-server-service.yaml",
    "kube-apiserver-service.yaml",
];

/// OAuth branding manifest created eagerly before the apply phase
pub const OAUTH_BRANDING_MANIFEST: &str = "v4-0-config-system-branding.yaml";

/// Maximum length of generated machine-set names
pub const MACHINE_SET_NAME_MAX_LENGTH: usize = 43;

/// Label marking a namespace as a hosted control plane namespace
pub const CONTROL_PLANE_NAMESPACE_LABEL: &str = "hypershift.openshift.io/hosted-control-plane";

/// Audit log persistence configmap name intercepted by the webhook
pub const KAS_CONFIG_CONFIGMAP_NAME: &str = "kas-config";

/// Key within the kas-config configmap holding the apiserver config
pub const KAS_CONFIG_KEY: &str = "config.json";

/// Singleton name shared by cluster-scoped configuration resources
pub const SINGLETON_NAME: &str = "cluster";

// ============================================================================
// NodePool / MachineDeployment Annotations
// ============================================================================

/// Annotation carrying the vCPU count of the instance type
pub const CPU_ANNOTATION: &str = "machine.openshift.io/vCPU";

/// Annotation carrying the memory in MiB of the instance type
pub const MEMORY_ANNOTATION: &str = "machine.openshift.io/memoryMb";

/// Annotation carrying the GPU count of the instance type
pub const GPU_ANNOTATION: &str = "machine.openshift.io/GPU";

/// Annotation carrying node labels for scale-from-zero
pub const LABELS_ANNOTATION: &str = "capacity.cluster-autoscaler.kubernetes.io/labels";

/// Annotation carrying node taints for scale-from-zero
pub const TAINTS_ANNOTATION: &str = "capacity.cluster-autoscaler.kubernetes.io/taints";

/// All capacity annotations managed on machine deployments
pub const CAPACITY_ANNOTATIONS: [&str; 5] = [
    CPU_ANNOTATION,
    MEMORY_ANNOTATION,
    GPU_ANNOTATION,
    LABELS_ANNOTATION,
    TAINTS_ANNOTATION,
];

/// Well-known node architecture label
pub const ARCH_LABEL: &str = "kubernetes.io/arch";

/// Annotation linking CAPI objects to their NodePool (`<namespace>/<name>`)
pub const NODE_POOL_ANNOTATION: &str = "hypershift.openshift.io/nodePool";

/// Annotation overriding the AWS region for instance-type lookups
pub const AWS_REGION_ANNOTATION: &str = "hypershift.openshift.io/aws-region";

/// Instance-type cache refresh interval
pub const INSTANCE_TYPE_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Page size for EC2 `DescribeInstanceTypes`
pub const INSTANCE_TYPE_PAGE_SIZE: i32 = 100;

/// Upper bound on `DescribeInstanceTypes` pages fetched per region
pub const INSTANCE_TYPE_MAX_PAGES: usize = 100;

// ============================================================================
// Cluster Sizing Constants
// ============================================================================

/// Label carrying the computed size class of a hosted cluster
pub const HOSTED_CLUSTER_SIZE_LABEL: &str = "hypershift.openshift.io/hosted-cluster-size";

/// Annotation forcing a size class regardless of node count
pub const CLUSTER_SIZE_OVERRIDE_ANNOTATION: &str = "hypershift.openshift.io/cluster-size-override";

/// Annotation carrying the kube-apiserver Go memory limit
pub const KAS_GOMEMLIMIT_ANNOTATION: &str = "hypershift.openshift.io/kube-apiserver-gomemlimit";

/// Annotation carrying the control plane priority class
pub const CONTROL_PLANE_PRIORITY_CLASS_ANNOTATION: &str =
    "hypershift.openshift.io/control-plane-priority-class";

/// Annotation carrying the etcd priority class
pub const ETCD_PRIORITY_CLASS_ANNOTATION: &str = "hypershift.openshift.io/etcd-priority-class";

/// Annotation carrying the API critical priority class
pub const API_CRITICAL_PRIORITY_CLASS_ANNOTATION: &str =
    "hypershift.openshift.io/api-critical-priority-class";

/// Annotation carrying kube-apiserver max requests inflight
pub const MAX_REQUESTS_INFLIGHT_ANNOTATION: &str =
    "hypershift.openshift.io/kube-apiserver-max-requests-inflight";

/// Annotation carrying kube-apiserver max mutating requests inflight
pub const MAX_MUTATING_REQUESTS_INFLIGHT_ANNOTATION: &str =
    "hypershift.openshift.io/kube-apiserver-max-mutating-requests-inflight";

/// Annotation carrying the machine health check timeout
pub const MACHINE_HEALTH_CHECK_TIMEOUT_ANNOTATION: &str =
    "hypershift.openshift.io/machine-health-check-timeout";

/// Prefix of per-container resource request override annotations
pub const RESOURCE_REQUEST_OVERRIDE_PREFIX: &str = "resource-request-override.hypershift.openshift.io";

/// Condition set when the size class has been computed
pub const CONDITION_CLUSTER_SIZE_COMPUTED: &str = "ClusterSizeComputed";

/// Condition set while a size transition waits for its delay
pub const CONDITION_CLUSTER_SIZE_TRANSITION_PENDING: &str = "ClusterSizeTransitionPending";

/// Condition set when a size transition is required
pub const CONDITION_CLUSTER_SIZE_TRANSITION_REQUIRED: &str = "ClusterSizeTransitionRequired";

/// HostedCluster condition reporting a reachable kube-apiserver
pub const CONDITION_KUBE_APISERVER_AVAILABLE: &str = "KubeAPIServerAvailable";

/// Condition on the sizing configuration reporting validity
pub const CONDITION_SIZING_CONFIGURATION_VALID: &str = "ClusterSizingConfigurationValid";

/// Reason used when the size class changed
pub const REASON_CLUSTER_SIZE_TRANSITIONED: &str = "ClusterSizeTransitioned";

/// Reason used while the transition delay has not elapsed
pub const REASON_TRANSITION_DELAY_NOT_ELAPSED: &str = "TransitionDelayNotElapsed";

/// Reason used when everything is as expected
pub const REASON_AS_EXPECTED: &str = "AsExpected";

// ============================================================================
// Retry Constants
// ============================================================================

/// Maximum attempts for optimistic-concurrency retries
pub const CONFLICT_RETRY_ATTEMPTS: usize = 5;

// ============================================================================
// Server Constants
// ============================================================================

/// Default webhook listen address
pub const DEFAULT_WEBHOOK_ADDR: &str = "0.0.0.0:9443";

/// Default metrics listen address
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Path of the kas-config mutating webhook
pub const KAS_CONFIG_WEBHOOK_PATH: &str = "/mutate-kas-config";

/// Number of Tokio worker threads for the operator runtime
pub const TOKIO_WORKER_THREADS: usize = 4;
