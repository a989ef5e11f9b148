// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! IBM Cloud data models.
//!
//! Field names follow the wire formats: the platform, VPC, Direct Link and
//! Transit Gateway APIs use `snake_case`, PowerVS uses `camelCase`.

use serde::{Deserialize, Serialize};

/// One page of a listing together with the `next` href, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items of this page
    pub items: Vec<T>,
    /// Absolute URL of the next page, carrying a `start` query parameter
    pub next: Option<String>,
}

impl<T> Page<T> {
    /// A page with no successor.
    #[must_use]
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// `{ "href": ... }` link used by VPC and Transit Gateway listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Href {
    pub href: String,
}

/// Reference to another VPC resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub crn: String,
}

impl ResourceRef {
    /// Reference by id only.
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Zone reference, `{ "name": "us-south-1" }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ZoneRef {
    pub name: String,
}

// ============================================================================
// IAM
// ============================================================================

/// An IAM ServiceID.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceId {
    pub id: String,
    pub iam_id: String,
    pub name: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub description: String,
}

/// A freshly created API key. The secret value is only returned once.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub apikey: String,
}

/// Attribute of a policy subject or resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PolicyAttribute {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

/// Access policy bound to a ServiceID.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PolicyRequest {
    /// IAM id of the subject (the ServiceID)
    pub subject_iam_id: String,
    /// Role CRNs, e.g. `crn:v1:bluemix:public:iam::::role:Viewer`
    pub roles: Vec<String>,
    /// Resource attributes that scope the policy
    pub resource_attributes: Vec<PolicyAttribute>,
}

// ============================================================================
// Resource controller / manager / global catalog
// ============================================================================

/// A resource-controller instance, e.g. a PowerVS workspace or a CIS instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceInstance {
    pub id: String,
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub crn: String,
    pub name: String,
    #[serde(default)]
    pub state: String,
    /// Zone or region the instance was created in
    #[serde(default)]
    pub region_id: String,
    #[serde(default)]
    pub resource_group_id: String,
    #[serde(default)]
    pub resource_id: String,
    #[serde(default)]
    pub resource_plan_id: String,
}

/// Filters for listing resource instances.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceInstanceQuery {
    pub name: Option<String>,
    pub resource_group_id: Option<String>,
    /// Catalog service id
    pub resource_id: Option<String>,
    pub resource_plan_id: Option<String>,
}

/// Request to create a resource instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CreateResourceInstance {
    pub name: String,
    /// Deployment target (zone for PowerVS)
    pub target: String,
    pub resource_group: String,
    pub resource_plan_id: String,
}

/// Catalog service id and, when requested, plan id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogIds {
    pub service_id: String,
    pub plan_id: Option<String>,
}

/// A resource group.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
}

// ============================================================================
// CIS DNS
// ============================================================================

/// A DNS zone of a CIS instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DnsZone {
    pub id: String,
    pub name: String,
}

/// A DNS record inside a CIS zone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DnsRecord {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub record_type: String,
    #[serde(default)]
    pub content: String,
}

// ============================================================================
// VPC
// ============================================================================

/// A VPC.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Vpc {
    pub id: String,
    pub crn: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub default_security_group: Option<ResourceRef>,
    #[serde(default)]
    pub default_routing_table: Option<ResourceRef>,
    #[serde(default)]
    pub resource_group: Option<ResourceRef>,
}

/// Request to create a VPC.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CreateVpc {
    pub name: String,
    pub resource_group: ResourceRef,
    pub address_prefix_management: String,
}

/// A security group with its rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SecurityGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rules: Vec<SecurityGroupRule>,
}

/// A security-group rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SecurityGroupRule {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// `inbound` or `outbound`
    pub direction: String,
    /// `tcp`, `udp`, `icmp` or `all`
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_min: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_max: Option<u16>,
}

impl SecurityGroupRule {
    /// Inbound TCP rule for a single port.
    #[must_use]
    pub fn inbound_tcp(port: u16) -> Self {
        Self {
            id: String::new(),
            direction: "inbound".to_string(),
            protocol: "tcp".to_string(),
            port_min: Some(port),
            port_max: Some(port),
        }
    }

    /// Returns `true` when this is an inbound TCP rule admitting `port`.
    #[must_use]
    pub fn admits_inbound_tcp(&self, port: u16) -> bool {
        if self.direction != "inbound" {
            return false;
        }
        match self.protocol.as_str() {
            "all" => true,
            "tcp" => match (self.port_min, self.port_max) {
                (Some(min), Some(max)) => min <= port && port <= max,
                (None, None) => true,
                _ => false,
            },
            _ => false,
        }
    }
}

/// Address prefix of a VPC.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AddressPrefix {
    pub id: String,
    pub cidr: String,
    pub zone: ZoneRef,
}

/// A VPC subnet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Subnet {
    pub id: String,
    #[serde(default)]
    pub crn: String,
    pub name: String,
    pub status: String,
    pub vpc: ResourceRef,
    pub zone: ZoneRef,
    #[serde(default)]
    pub ipv4_cidr_block: String,
}

/// Filters for listing subnets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubnetQuery {
    pub resource_group_id: Option<String>,
    pub routing_table_id: Option<String>,
}

/// Request to create a subnet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CreateSubnet {
    pub name: String,
    pub vpc: ResourceRef,
    pub zone: ZoneRef,
    pub ipv4_cidr_block: String,
    pub resource_group: ResourceRef,
}

/// A VPC load balancer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoadBalancer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub provisioning_status: String,
    #[serde(default)]
    pub subnets: Vec<ResourceRef>,
}

// ============================================================================
// PowerVS
// ============================================================================

/// VPC attachment block of a cloud connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CloudConnectionVpcs {
    pub enabled: bool,
    #[serde(default)]
    pub vpcs: Vec<CloudConnectionVpc>,
}

/// A VPC attached to a cloud connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CloudConnectionVpc {
    /// VPC CRN
    #[serde(rename = "vpcID")]
    pub vpc_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// A network attached to a cloud connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CloudConnectionNetwork {
    #[serde(rename = "networkID")]
    pub network_id: String,
    #[serde(default)]
    pub name: String,
}

/// A PowerVS cloud connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudConnection {
    #[serde(rename = "cloudConnectionID")]
    pub cloud_connection_id: String,
    pub name: String,
    #[serde(default)]
    pub link_status: String,
    #[serde(default)]
    pub global_routing: bool,
    #[serde(default)]
    pub speed: u32,
    #[serde(default)]
    pub vpc: Option<CloudConnectionVpcs>,
    #[serde(default)]
    pub networks: Vec<CloudConnectionNetwork>,
}

impl CloudConnection {
    /// Returns `true` if the VPC with the given CRN is attached.
    #[must_use]
    pub fn has_vpc(&self, vpc_crn: &str) -> bool {
        self.vpc
            .as_ref()
            .is_some_and(|v| v.vpcs.iter().any(|vpc| vpc.vpc_id == vpc_crn))
    }

    /// Returns `true` if the network with the given id is attached.
    #[must_use]
    pub fn has_network(&self, network_id: &str) -> bool {
        self.networks.iter().any(|n| n.network_id == network_id)
    }
}

/// Request to create a cloud connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateCloudConnection {
    pub name: String,
    pub global_routing: bool,
    pub speed: u32,
    pub vpc: CloudConnectionVpcs,
}

/// Request to update a cloud connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCloudConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_routing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc: Option<CloudConnectionVpcs>,
}

/// Reference to an asynchronous PowerVS job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobRef {
    pub id: String,
}

/// State of an asynchronous PowerVS job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobStatus {
    pub state: String,
    #[serde(default)]
    pub message: String,
}

/// An asynchronous PowerVS job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
}

/// Private network issued by a DHCP server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DhcpNetwork {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// A PowerVS DHCP server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DhcpServer {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub network: Option<DhcpNetwork>,
}

/// Request to create a DHCP server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateDhcpServer {
    #[serde(rename = "cloudConnectionID")]
    pub cloud_connection_id: String,
    pub dns_server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A PowerVS network.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    #[serde(rename = "networkID")]
    pub network_id: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub network_type: String,
}

/// A PowerVS virtual machine. DHCP servers are backed by one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PvmInstance {
    #[serde(rename = "pvmInstanceID")]
    pub pvm_instance_id: String,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub status: String,
}

// ============================================================================
// Direct Link / Transit Gateway
// ============================================================================

/// A Direct Link gateway. Cloud connections surface as one of these.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DirectLinkGateway {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub crn: String,
    #[serde(default)]
    pub bgp_status: String,
    #[serde(default)]
    pub link_status: String,
    #[serde(default)]
    pub operational_status: String,
}

/// A Transit Gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransitGateway {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub crn: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub location: String,
}
