// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! IBM Cloud service clients.
//!
//! Every IBM Cloud service used by the PowerVS orchestrator sits behind an
//! async trait so the orchestrator can run against the HTTP implementation
//! ([`IbmCloud`]) or the in-memory [`mock::MockCloud`] in tests.
//!
//! Listings that the cloud paginates return a [`Page`]; callers drive them
//! with [`crate::paging::page_items`].
//!
//! # Example
//!
//! ```no_run
//! use hostedcp::ibmcloud::{CloudProvider, IbmCloud};
//!
//! # async fn example() -> Result<(), hostedcp::ibmcloud::CloudError> {
//! let cloud = IbmCloud::new("my-api-key")?;
//! let account = cloud.iam().account_id().await?;
//! let rg = cloud.resource_manager().resource_group_id("default", &account).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

mod auth;
mod client;
mod error;
pub mod mock;
mod models;

pub use auth::Authenticator;
pub use client::{Endpoints, IbmCloud};
pub use error::{is_not_found_message, CloudError};
pub use models::*;

/// IAM identity: account details, ServiceIDs, API keys and policies.
#[async_trait]
pub trait IamService: Send + Sync {
    /// Account owning the API key the client authenticates with.
    async fn account_id(&self) -> Result<String, CloudError>;

    async fn list_service_ids(
        &self,
        account_id: &str,
        name: &str,
        start: Option<&str>,
    ) -> Result<Page<ServiceId>, CloudError>;

    async fn create_service_id(
        &self,
        account_id: &str,
        name: &str,
        description: &str,
    ) -> Result<ServiceId, CloudError>;

    async fn delete_service_id(&self, id: &str) -> Result<(), CloudError>;

    /// Create an access policy and return its id.
    async fn create_policy(&self, policy: &PolicyRequest) -> Result<String, CloudError>;

    async fn create_api_key(
        &self,
        account_id: &str,
        iam_id: &str,
        name: &str,
    ) -> Result<ApiKey, CloudError>;
}

/// Resource manager, resource controller and global catalog.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Id of the resource group with the given name, if it exists.
    async fn resource_group_id(
        &self,
        name: &str,
        account_id: &str,
    ) -> Result<Option<String>, CloudError>;

    /// Catalog ids of a service and optionally one of its plans.
    async fn catalog_ids(&self, service: &str, plan: Option<&str>)
        -> Result<CatalogIds, CloudError>;

    async fn list_resource_instances(
        &self,
        query: &ResourceInstanceQuery,
        start: Option<&str>,
    ) -> Result<Page<ResourceInstance>, CloudError>;

    /// Fetch an instance by id or GUID.
    async fn get_resource_instance(&self, id: &str) -> Result<ResourceInstance, CloudError>;

    async fn create_resource_instance(
        &self,
        request: &CreateResourceInstance,
    ) -> Result<ResourceInstance, CloudError>;

    async fn delete_resource_instance(&self, id: &str) -> Result<(), CloudError>;
}

/// CIS DNS zones and records.
#[async_trait]
pub trait DnsService: Send + Sync {
    async fn list_zones(&self, cis_crn: &str, start: Option<&str>)
        -> Result<Page<DnsZone>, CloudError>;

    async fn list_dns_records(
        &self,
        cis_crn: &str,
        zone_id: &str,
        name: Option<&str>,
        start: Option<&str>,
    ) -> Result<Page<DnsRecord>, CloudError>;

    async fn delete_dns_record(
        &self,
        cis_crn: &str,
        zone_id: &str,
        record_id: &str,
    ) -> Result<(), CloudError>;
}

/// Regional VPC infrastructure.
#[async_trait]
pub trait VpcService: Send + Sync {
    async fn list_vpcs(&self, start: Option<&str>) -> Result<Page<Vpc>, CloudError>;
    async fn get_vpc(&self, id: &str) -> Result<Vpc, CloudError>;
    async fn create_vpc(&self, request: &CreateVpc) -> Result<Vpc, CloudError>;
    async fn delete_vpc(&self, id: &str) -> Result<(), CloudError>;

    async fn get_security_group(&self, id: &str) -> Result<SecurityGroup, CloudError>;
    async fn create_security_group_rule(
        &self,
        security_group_id: &str,
        rule: &SecurityGroupRule,
    ) -> Result<SecurityGroupRule, CloudError>;

    async fn list_address_prefixes(
        &self,
        vpc_id: &str,
        start: Option<&str>,
    ) -> Result<Page<AddressPrefix>, CloudError>;

    /// Zone names of a region.
    async fn list_region_zones(&self, region: &str) -> Result<Vec<String>, CloudError>;

    async fn list_subnets(
        &self,
        query: &SubnetQuery,
        start: Option<&str>,
    ) -> Result<Page<Subnet>, CloudError>;
    async fn get_subnet(&self, id: &str) -> Result<Subnet, CloudError>;
    async fn create_subnet(&self, request: &CreateSubnet) -> Result<Subnet, CloudError>;
    async fn delete_subnet(&self, id: &str) -> Result<(), CloudError>;

    async fn list_load_balancers(&self, start: Option<&str>)
        -> Result<Page<LoadBalancer>, CloudError>;
    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer, CloudError>;
    async fn delete_load_balancer(&self, id: &str) -> Result<(), CloudError>;
}

/// PowerVS workspace scoped to one cloud instance.
#[async_trait]
pub trait PowerVsService: Send + Sync {
    async fn list_cloud_connections(&self) -> Result<Vec<CloudConnection>, CloudError>;
    async fn get_cloud_connection(&self, id: &str) -> Result<CloudConnection, CloudError>;
    async fn create_cloud_connection(
        &self,
        request: &CreateCloudConnection,
    ) -> Result<CloudConnection, CloudError>;
    /// Returns a job when the update is applied asynchronously.
    async fn update_cloud_connection(
        &self,
        id: &str,
        request: &UpdateCloudConnection,
    ) -> Result<Option<JobRef>, CloudError>;
    async fn add_network(&self, cloud_connection_id: &str, network_id: &str)
        -> Result<JobRef, CloudError>;
    async fn remove_network(
        &self,
        cloud_connection_id: &str,
        network_id: &str,
    ) -> Result<JobRef, CloudError>;
    async fn delete_cloud_connection(&self, id: &str) -> Result<JobRef, CloudError>;

    async fn get_job(&self, id: &str) -> Result<Job, CloudError>;

    async fn list_dhcp_servers(&self) -> Result<Vec<DhcpServer>, CloudError>;
    async fn get_dhcp_server(&self, id: &str) -> Result<DhcpServer, CloudError>;
    async fn create_dhcp_server(&self, request: &CreateDhcpServer)
        -> Result<DhcpServer, CloudError>;
    async fn delete_dhcp_server(&self, id: &str) -> Result<(), CloudError>;

    async fn get_network(&self, id: &str) -> Result<Network, CloudError>;
    async fn get_pvm_instance(&self, id: &str) -> Result<PvmInstance, CloudError>;
}

/// Direct Link gateways.
#[async_trait]
pub trait DirectLinkService: Send + Sync {
    async fn list_gateways(&self) -> Result<Vec<DirectLinkGateway>, CloudError>;
    async fn get_gateway(&self, id: &str) -> Result<DirectLinkGateway, CloudError>;
}

/// Transit Gateways.
#[async_trait]
pub trait TransitGatewayService: Send + Sync {
    async fn list_transit_gateways(&self, start: Option<&str>)
        -> Result<Page<TransitGateway>, CloudError>;
    async fn get_transit_gateway(&self, id: &str) -> Result<TransitGateway, CloudError>;
}

/// Global tagging.
#[async_trait]
pub trait TaggingService: Send + Sync {
    /// Attach user tags to the resources identified by CRN.
    async fn attach_tags(&self, crns: &[String], tags: &[String]) -> Result<(), CloudError>;
}

/// Hands out service clients bound to one credential.
///
/// Regional and workspace-scoped services are constructed on demand.
pub trait CloudProvider: Send + Sync {
    fn iam(&self) -> Arc<dyn IamService>;
    fn resource_manager(&self) -> Arc<dyn ResourceManager>;
    fn dns(&self) -> Arc<dyn DnsService>;
    fn vpc(&self, region: &str) -> Arc<dyn VpcService>;
    fn powervs(
        &self,
        region: &str,
        zone: &str,
        cloud_instance_id: &str,
        account_id: &str,
    ) -> Arc<dyn PowerVsService>;
    fn direct_link(&self) -> Arc<dyn DirectLinkService>;
    fn transit_gateway(&self) -> Arc<dyn TransitGatewayService>;
    fn tagging(&self) -> Arc<dyn TaggingService>;
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod client_tests;
