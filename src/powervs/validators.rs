// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Lookup and validation of existing cloud resources.
//!
//! Each resource kind implements [`CloudResource`], which is enough for the
//! generic [`find_by_id`] and [`find_by_name`] to validate it. The remaining
//! functions check policies that are specific to one kind.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants::{HEALTHY_STATES, INGRESS_PORTS, MAX_CLOUD_CONNECTIONS_PER_ZONE};
use crate::errors::InfraError;
use crate::ibmcloud::{
    CloudConnection, CloudError, Page, PowerVsService, ResourceInstance, ResourceInstanceQuery,
    ResourceManager, Subnet, SubnetQuery, TransitGateway, TransitGatewayService, Vpc, VpcService,
};
use crate::paging::page_items;

/// A kind of cloud resource that can be looked up by id or name.
#[async_trait]
pub trait CloudResource: Send + Sync {
    /// The resource representation returned by the cloud
    type Item: Send;

    /// Kind used in error messages
    const KIND: &'static str;

    /// Fetch one resource by id.
    async fn fetch(&self, id: &str) -> Result<Self::Item, CloudError>;

    /// One page of the listing, filtered server-side by `name` where the API
    /// supports it.
    async fn list_page(&self, name: &str, start: Option<&str>)
        -> Result<Page<Self::Item>, CloudError>;

    fn name(item: &Self::Item) -> &str;

    fn state(item: &Self::Item) -> &str;

    /// Whether a listed item belongs to the region or zone being searched.
    fn in_scope(&self, _item: &Self::Item) -> bool {
        true
    }
}

/// Fetch a resource by id and require a healthy state.
///
/// # Errors
///
/// - [`InfraError::NotFound`] when the cloud has no resource with that id
/// - [`InfraError::State`] when the resource is not active or available
/// - [`InfraError::Cloud`] for any other API failure
pub async fn find_by_id<R: CloudResource>(resource: &R, id: &str) -> Result<R::Item, InfraError> {
    let item = match resource.fetch(id).await {
        Ok(item) => item,
        Err(e) if e.is_not_found() => return Err(InfraError::not_found(R::KIND, id)),
        Err(e) => return Err(e.into()),
    };

    let state = R::state(&item);
    if !HEALTHY_STATES.contains(&state) {
        return Err(InfraError::State {
            kind: R::KIND,
            name: id.to_string(),
            state: state.to_string(),
        });
    }
    Ok(item)
}

/// Page through the listing and return the first in-scope resource whose
/// name matches exactly.
///
/// # Errors
///
/// - [`InfraError::NotFound`] when the listing is exhausted without a match
/// - Paging and API errors
pub async fn find_by_name<R: CloudResource>(
    resource: &R,
    cancel: &CancellationToken,
    name: &str,
) -> Result<R::Item, InfraError> {
    let mut found = None;
    page_items(
        cancel,
        |start| async move { resource.list_page(name, start.as_deref()).await },
        |items| {
            found = items
                .into_iter()
                .find(|item| R::name(item) == name && resource.in_scope(item));
            Ok(found.is_some())
        },
    )
    .await?;

    debug!(kind = R::KIND, name = %name, found = found.is_some(), "Looked up resource by name");
    found.ok_or_else(|| InfraError::not_found(R::KIND, name))
}

/// PowerVS workspaces of one service plan, searched in one zone.
pub struct CloudInstances<'a> {
    api: &'a dyn ResourceManager,
    query: ResourceInstanceQuery,
    zone: String,
}

impl<'a> CloudInstances<'a> {
    /// `query` carries the resource group and catalog ids to filter on.
    pub fn new(api: &'a dyn ResourceManager, query: ResourceInstanceQuery, zone: &str) -> Self {
        Self {
            api,
            query,
            zone: zone.to_string(),
        }
    }
}

#[async_trait]
impl CloudResource for CloudInstances<'_> {
    type Item = ResourceInstance;
    const KIND: &'static str = "cloud instance";

    async fn fetch(&self, id: &str) -> Result<ResourceInstance, CloudError> {
        self.api.get_resource_instance(id).await
    }

    async fn list_page(
        &self,
        name: &str,
        start: Option<&str>,
    ) -> Result<Page<ResourceInstance>, CloudError> {
        let query = ResourceInstanceQuery {
            name: Some(name.to_string()),
            ..self.query.clone()
        };
        self.api.list_resource_instances(&query, start).await
    }

    fn name(item: &ResourceInstance) -> &str {
        &item.name
    }

    fn state(item: &ResourceInstance) -> &str {
        &item.state
    }

    fn in_scope(&self, item: &ResourceInstance) -> bool {
        item.region_id == self.zone
    }
}

/// VPCs of one region, optionally restricted to a resource group.
pub struct Vpcs<'a> {
    api: &'a dyn VpcService,
    region: String,
    resource_group_id: Option<String>,
}

impl<'a> Vpcs<'a> {
    pub fn new(api: &'a dyn VpcService, region: &str, resource_group_id: Option<&str>) -> Self {
        Self {
            api,
            region: region.to_string(),
            resource_group_id: resource_group_id.map(str::to_string),
        }
    }
}

#[async_trait]
impl CloudResource for Vpcs<'_> {
    type Item = Vpc;
    const KIND: &'static str = "vpc";

    async fn fetch(&self, id: &str) -> Result<Vpc, CloudError> {
        self.api.get_vpc(id).await
    }

    async fn list_page(&self, _name: &str, start: Option<&str>) -> Result<Page<Vpc>, CloudError> {
        self.api.list_vpcs(start).await
    }

    fn name(item: &Vpc) -> &str {
        &item.name
    }

    fn state(item: &Vpc) -> &str {
        &item.status
    }

    fn in_scope(&self, item: &Vpc) -> bool {
        let group_ok = match (&self.resource_group_id, &item.resource_group) {
            (Some(wanted), Some(group)) => &group.id == wanted,
            _ => true,
        };
        group_ok && item.crn.contains(&self.region)
    }
}

/// VPC subnets matching a listing filter, searched in one region.
pub struct VpcSubnets<'a> {
    api: &'a dyn VpcService,
    query: SubnetQuery,
    region: String,
}

impl<'a> VpcSubnets<'a> {
    pub fn new(api: &'a dyn VpcService, query: SubnetQuery, region: &str) -> Self {
        Self {
            api,
            query,
            region: region.to_string(),
        }
    }
}

#[async_trait]
impl CloudResource for VpcSubnets<'_> {
    type Item = Subnet;
    const KIND: &'static str = "vpc subnet";

    async fn fetch(&self, id: &str) -> Result<Subnet, CloudError> {
        self.api.get_subnet(id).await
    }

    async fn list_page(&self, _name: &str, start: Option<&str>) -> Result<Page<Subnet>, CloudError> {
        self.api.list_subnets(&self.query, start).await
    }

    fn name(item: &Subnet) -> &str {
        &item.name
    }

    fn state(item: &Subnet) -> &str {
        &item.status
    }

    fn in_scope(&self, item: &Subnet) -> bool {
        item.zone.name.starts_with(&self.region)
    }
}

/// Cloud connections visible from one PowerVS workspace.
pub struct CloudConnections<'a> {
    api: &'a dyn PowerVsService,
}

impl<'a> CloudConnections<'a> {
    pub fn new(api: &'a dyn PowerVsService) -> Self {
        Self { api }
    }
}

#[async_trait]
impl CloudResource for CloudConnections<'_> {
    type Item = CloudConnection;
    const KIND: &'static str = "cloud connection";

    async fn fetch(&self, id: &str) -> Result<CloudConnection, CloudError> {
        self.api.get_cloud_connection(id).await
    }

    async fn list_page(
        &self,
        _name: &str,
        _start: Option<&str>,
    ) -> Result<Page<CloudConnection>, CloudError> {
        Ok(Page::last(self.api.list_cloud_connections().await?))
    }

    fn name(item: &CloudConnection) -> &str {
        &item.name
    }

    fn state(item: &CloudConnection) -> &str {
        &item.link_status
    }
}

/// Transit gateways, optionally restricted to one location.
pub struct TransitGateways<'a> {
    api: &'a dyn TransitGatewayService,
    location: Option<String>,
}

impl<'a> TransitGateways<'a> {
    pub fn new(api: &'a dyn TransitGatewayService, location: Option<&str>) -> Self {
        Self {
            api,
            location: location.map(str::to_string),
        }
    }
}

#[async_trait]
impl CloudResource for TransitGateways<'_> {
    type Item = TransitGateway;
    const KIND: &'static str = "transit gateway";

    async fn fetch(&self, id: &str) -> Result<TransitGateway, CloudError> {
        self.api.get_transit_gateway(id).await
    }

    async fn list_page(
        &self,
        _name: &str,
        start: Option<&str>,
    ) -> Result<Page<TransitGateway>, CloudError> {
        self.api.list_transit_gateways(start).await
    }

    fn name(item: &TransitGateway) -> &str {
        &item.name
    }

    fn state(item: &TransitGateway) -> &str {
        &item.status
    }

    fn in_scope(&self, item: &TransitGateway) -> bool {
        self.location.as_deref().is_none_or(|l| item.location == l)
    }
}

/// Require the VPC's default security group to admit inbound TCP on the
/// ingress ports.
///
/// # Errors
///
/// Returns [`InfraError::Policy`] listing the ports without a matching rule.
pub async fn check_ingress_rules(api: &dyn VpcService, vpc: &Vpc) -> Result<(), InfraError> {
    let Some(group_ref) = vpc.default_security_group.as_ref() else {
        return Err(InfraError::Policy(format!(
            "vpc {} has no default security group",
            vpc.name
        )));
    };

    let group = api.get_security_group(&group_ref.id).await?;
    let missing: Vec<String> = INGRESS_PORTS
        .iter()
        .filter(|port| !group.rules.iter().any(|rule| rule.admits_inbound_tcp(**port)))
        .map(u16::to_string)
        .collect();

    if !missing.is_empty() {
        return Err(InfraError::Policy(format!(
            "default security group of vpc {} does not allow inbound tcp traffic on port(s) {}, add the rules and retry",
            vpc.name,
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Number of connections named `name` and total connections in the zone.
#[must_use]
pub fn count_cloud_connections(connections: &[CloudConnection], name: &str) -> (usize, usize) {
    let matched = connections.iter().filter(|c| c.name == name).count();
    (matched, connections.len())
}

/// Refuse a zone that is over the limit, or at the limit without a
/// connection this run can reuse.
///
/// # Errors
///
/// Returns [`InfraError::TooManyCloudConnections`] when no connection can be
/// created or reused.
pub fn check_cloud_connection_capacity(matched: usize, count: usize) -> Result<(), InfraError> {
    if count > MAX_CLOUD_CONNECTIONS_PER_ZONE || (count == MAX_CLOUD_CONNECTIONS_PER_ZONE && matched == 0) {
        return Err(InfraError::TooManyCloudConnections {
            count,
            max: MAX_CLOUD_CONNECTIONS_PER_ZONE,
        });
    }
    Ok(())
}

/// Id of the existing connection named `name`, after checking the zone can
/// hold the cluster's connection.
///
/// # Errors
///
/// - [`InfraError::TooManyCloudConnections`] from the capacity check
/// - API errors
pub async fn validate_cloud_connection_in_zone(
    api: &dyn PowerVsService,
    name: &str,
) -> Result<Option<String>, InfraError> {
    let connections = api.list_cloud_connections().await?;
    let (matched, count) = count_cloud_connections(&connections, name);
    check_cloud_connection_capacity(matched, count)?;
    Ok(connections
        .into_iter()
        .find(|c| c.name == name)
        .map(|c| c.cloud_connection_id))
}

#[cfg(test)]
#[path = "validators_tests.rs"]
mod validators_tests;
