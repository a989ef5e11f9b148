// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory IBM Cloud for unit tests.
//!
//! [`MockCloud`] implements every service trait over one shared
//! [`MockState`]. Resources become ready as soon as they are created, so poll
//! loops finish on their first check. Every call is recorded in
//! [`MockState::calls`] and individual operations can be made to fail with
//! [`MockCloud::fail`].
//!
//! ```
//! use hostedcp::ibmcloud::mock::MockCloud;
//! use hostedcp::ibmcloud::CloudProvider;
//!
//! # async fn example() {
//! let cloud = MockCloud::new().with_cis_domain("bd.example");
//! let account = cloud.iam().account_id().await.unwrap();
//! assert_eq!(account, "acct-1");
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::models::*;
use super::{
    CloudError, CloudProvider, DirectLinkService, DnsService, IamService, PowerVsService,
    ResourceManager, TaggingService, TransitGatewayService, VpcService,
};
use crate::constants::{
    CIS_SERVICE, CLOUD_CONNECTION_ESTABLISHED_STATE, CLOUD_INSTANCE_ACTIVE_STATE,
    CLOUD_INSTANCE_REMOVED_STATE, DHCP_ACTIVE_STATE, JOB_COMPLETED_STATE, POWERVS_SERVICE,
    POWERVS_SERVICE_PLAN, VPC_AVAILABLE_STATE,
};

/// Base of the synthetic `next` hrefs handed out by paged listings.
const MOCK_BASE_URL: &str = "https://mock.cloud.ibm.com";

/// Account id reported by [`MockCloud::new`].
pub const MOCK_ACCOUNT_ID: &str = "acct-1";

/// Resource group seeded by [`MockCloud::new`].
pub const MOCK_RESOURCE_GROUP: (&str, &str) = ("rg", "rg-id");

/// Per-workspace PowerVS resources.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    pub cloud_connections: Vec<CloudConnection>,
    pub dhcp_servers: Vec<DhcpServer>,
    pub networks: Vec<Network>,
    pub pvm_instances: Vec<PvmInstance>,
}

/// Everything the mock cloud knows about.
#[derive(Debug, Default)]
pub struct MockState {
    pub account_id: String,
    /// Resource group name to id
    pub resource_groups: HashMap<String, String>,
    /// Service name to catalog id
    pub catalog_services: HashMap<String, String>,
    /// `(service id, plan name)` to plan id
    pub catalog_plans: HashMap<(String, String), String>,
    pub service_ids: Vec<ServiceId>,
    pub api_keys: Vec<ApiKey>,
    pub policies: Vec<PolicyRequest>,
    pub resource_instances: Vec<ResourceInstance>,
    /// CIS instance CRN to zones
    pub dns_zones: HashMap<String, Vec<DnsZone>>,
    /// Zone id to records
    pub dns_records: HashMap<String, Vec<DnsRecord>>,
    pub vpcs: Vec<Vpc>,
    pub security_groups: HashMap<String, SecurityGroup>,
    /// VPC id to address prefixes
    pub address_prefixes: HashMap<String, Vec<AddressPrefix>>,
    pub region_zones: Vec<String>,
    pub subnets: Vec<Subnet>,
    pub load_balancers: Vec<LoadBalancer>,
    /// Cloud instance GUID to workspace contents
    pub workspaces: HashMap<String, Workspace>,
    pub jobs: HashMap<String, Job>,
    pub direct_link_gateways: Vec<DirectLinkGateway>,
    pub transit_gateways: Vec<TransitGateway>,
    /// CRN to attached tags
    pub tags: HashMap<String, Vec<String>>,
    /// Operation log, e.g. `create_vpc:ex-1-vpc`
    pub calls: Vec<String>,
    /// Operation name to injected `(status, message)` failure
    pub failures: HashMap<String, (u16, String)>,
    /// Items per page for paged listings
    pub page_size: usize,
    next_id: u64,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    /// Record a call and return the injected failure for `op`, if any.
    fn call(&mut self, op: &str, subject: &str) -> Result<(), CloudError> {
        self.calls.push(format!("{op}:{subject}"));
        match self.failures.get(op) {
            Some((status, message)) => Err(CloudError::http(*status, message.clone())),
            None => Ok(()),
        }
    }

    fn workspace(&mut self, guid: &str) -> Result<&mut Workspace, CloudError> {
        self.workspaces
            .get_mut(guid)
            .ok_or_else(|| CloudError::http(404, format!("cloud instance {guid} not found")))
    }

    fn completed_job(&mut self) -> JobRef {
        let id = self.next_id("job");
        self.jobs.insert(
            id.clone(),
            Job {
                id: id.clone(),
                status: JobStatus {
                    state: JOB_COMPLETED_STATE.to_string(),
                    message: String::new(),
                },
            },
        );
        JobRef { id }
    }

    /// Slice `items` into the page starting at `start`.
    fn paginate<T: Clone>(&self, items: Vec<T>, start: Option<&str>, collection: &str) -> Page<T> {
        let size = self.page_size.max(1);
        let offset = start.and_then(|s| s.parse::<usize>().ok()).unwrap_or(0);
        let end = (offset + size).min(items.len());
        let page = items.get(offset..end).map(<[T]>::to_vec).unwrap_or_default();
        let next = (end < items.len()).then(|| format!("{MOCK_BASE_URL}/{collection}?start={end}"));
        Page { items: page, next }
    }
}

fn not_found(kind: &str, id: &str) -> CloudError {
    CloudError::http(404, format!("{kind} {id} not found"))
}

/// In-memory cloud. Clones share state.
#[derive(Clone)]
pub struct MockCloud {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCloud {
    /// Mock with an account, the `rg` resource group, catalog entries for
    /// PowerVS and CIS, and three zones in the region.
    #[must_use]
    pub fn new() -> Self {
        let mut state = MockState {
            account_id: MOCK_ACCOUNT_ID.to_string(),
            page_size: 50,
            region_zones: vec![
                "us-south-1".to_string(),
                "us-south-2".to_string(),
                "us-south-3".to_string(),
            ],
            ..MockState::default()
        };
        state
            .resource_groups
            .insert(MOCK_RESOURCE_GROUP.0.to_string(), MOCK_RESOURCE_GROUP.1.to_string());
        state
            .catalog_services
            .insert(POWERVS_SERVICE.to_string(), "power-iaas-id".to_string());
        state
            .catalog_services
            .insert(CIS_SERVICE.to_string(), "cis-id".to_string());
        state.catalog_plans.insert(
            ("power-iaas-id".to_string(), POWERVS_SERVICE_PLAN.to_string()),
            "power-plan-id".to_string(),
        );
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.lock())
    }

    /// Recorded calls in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Recorded calls whose operation name equals `op`.
    #[must_use]
    pub fn calls_for(&self, op: &str) -> Vec<String> {
        let prefix = format!("{op}:");
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// Make every call to `op` fail with the given status and message.
    pub fn fail(&self, op: &str, status: u16, message: &str) {
        self.lock()
            .failures
            .insert(op.to_string(), (status, message.to_string()));
    }

    /// Seed a CIS instance serving `domain`.
    #[must_use]
    pub fn with_cis_domain(self, domain: &str) -> Self {
        {
            let mut state = self.lock();
            let crn = format!("crn:v1:bluemix:public:internet-svcs:global:a/{MOCK_ACCOUNT_ID}:cis-1::");
            state.resource_instances.push(ResourceInstance {
                id: crn.clone(),
                guid: "cis-1".to_string(),
                crn: crn.clone(),
                name: "cis".to_string(),
                state: CLOUD_INSTANCE_ACTIVE_STATE.to_string(),
                region_id: "global".to_string(),
                resource_group_id: MOCK_RESOURCE_GROUP.1.to_string(),
                resource_id: "cis-id".to_string(),
                resource_plan_id: "cis-plan".to_string(),
            });
            state.dns_zones.insert(
                crn,
                vec![DnsZone {
                    id: "zone-1".to_string(),
                    name: domain.to_string(),
                }],
            );
        }
        self
    }

    /// Add a DNS record to a seeded zone.
    pub fn add_dns_record(&self, zone_id: &str, name: &str) {
        let mut state = self.lock();
        let id = state.next_id("record");
        state
            .dns_records
            .entry(zone_id.to_string())
            .or_default()
            .push(DnsRecord {
                id,
                name: name.to_string(),
                record_type: "CNAME".to_string(),
                content: "lb.example".to_string(),
            });
    }

    /// Add an available VPC whose default security group admits `ports`.
    pub fn add_vpc(&self, name: &str, ports: &[u16]) -> Vpc {
        let mut state = self.lock();
        let vpc = new_vpc(&mut state, name, MOCK_RESOURCE_GROUP.1);
        if let Some(sg) = vpc
            .default_security_group
            .as_ref()
            .and_then(|r| state.security_groups.get_mut(&r.id))
        {
            sg.rules = ports.iter().map(|p| SecurityGroupRule::inbound_tcp(*p)).collect();
        }
        vpc
    }

    /// Add an available subnet to the VPC `vpc_id` in `zone`.
    pub fn add_subnet(&self, name: &str, vpc_id: &str, zone: &str) -> Subnet {
        let mut state = self.lock();
        let id = state.next_id("subnet");
        let vpc = state
            .vpcs
            .iter()
            .find(|v| v.id == vpc_id)
            .map(|v| ResourceRef {
                id: v.id.clone(),
                name: v.name.clone(),
                crn: v.crn.clone(),
            })
            .unwrap_or_else(|| ResourceRef::id(vpc_id));
        let subnet = Subnet {
            crn: format!("crn:v1:bluemix:public:is:{zone}:a/{MOCK_ACCOUNT_ID}::subnet:{id}"),
            id,
            name: name.to_string(),
            status: VPC_AVAILABLE_STATE.to_string(),
            vpc,
            zone: ZoneRef {
                name: zone.to_string(),
            },
            ipv4_cidr_block: "10.240.0.0/24".to_string(),
        };
        state.subnets.push(subnet.clone());
        subnet
    }

    /// Add a load balancer attached to `subnet_id`.
    pub fn add_load_balancer(&self, name: &str, subnet_id: &str) -> LoadBalancer {
        let mut state = self.lock();
        let lb = LoadBalancer {
            id: state.next_id("lb"),
            name: name.to_string(),
            provisioning_status: CLOUD_INSTANCE_ACTIVE_STATE.to_string(),
            subnets: vec![ResourceRef::id(subnet_id)],
        };
        state.load_balancers.push(lb.clone());
        lb
    }

    /// Add a DHCP server with its private network to a workspace.
    ///
    /// # Errors
    ///
    /// Fails when the workspace does not exist.
    pub fn add_dhcp_server(&self, cloud_instance_guid: &str) -> Result<DhcpServer, CloudError> {
        let mut state = self.lock();
        new_dhcp_server(&mut state, cloud_instance_guid)
    }

    /// Add an active PowerVS workspace.
    pub fn add_cloud_instance(&self, name: &str, zone: &str) -> ResourceInstance {
        let mut state = self.lock();
        new_cloud_instance(&mut state, name, zone, MOCK_RESOURCE_GROUP.1, "power-plan-id")
    }

    /// Add a cloud connection to a workspace.
    ///
    /// # Errors
    ///
    /// Fails when the workspace does not exist.
    pub fn add_cloud_connection(
        &self,
        cloud_instance_guid: &str,
        name: &str,
    ) -> Result<CloudConnection, CloudError> {
        let mut state = self.lock();
        new_cloud_connection(
            &mut state,
            cloud_instance_guid,
            &CreateCloudConnection {
                name: name.to_string(),
                global_routing: true,
                speed: 5000,
                vpc: CloudConnectionVpcs::default(),
            },
        )
    }

    /// Add a transit gateway.
    pub fn add_transit_gateway(&self, name: &str, location: &str) -> TransitGateway {
        let mut state = self.lock();
        let id = state.next_id("tg");
        let tg = TransitGateway {
            crn: format!("crn:v1:transit:{id}"),
            id,
            name: name.to_string(),
            status: VPC_AVAILABLE_STATE.to_string(),
            location: location.to_string(),
        };
        state.transit_gateways.push(tg.clone());
        tg
    }
}

fn new_vpc(state: &mut MockState, name: &str, resource_group_id: &str) -> Vpc {
    let id = state.next_id("vpc");
    let sg_id = state.next_id("sg");
    let rt_id = state.next_id("rt");
    state.security_groups.insert(
        sg_id.clone(),
        SecurityGroup {
            id: sg_id.clone(),
            name: format!("{name}-default-sg"),
            rules: Vec::new(),
        },
    );
    let prefixes = state
        .region_zones
        .iter()
        .enumerate()
        .map(|(i, zone)| AddressPrefix {
            id: format!("{id}-prefix-{i}"),
            cidr: format!("10.{}.0.0/18", 240 + i),
            zone: ZoneRef { name: zone.clone() },
        })
        .collect();
    state.address_prefixes.insert(id.clone(), prefixes);
    let vpc = Vpc {
        crn: format!("crn:v1:bluemix:public:is:us-south:a/{MOCK_ACCOUNT_ID}::vpc:{id}"),
        id,
        name: name.to_string(),
        status: VPC_AVAILABLE_STATE.to_string(),
        default_security_group: Some(ResourceRef::id(sg_id)),
        default_routing_table: Some(ResourceRef::id(rt_id)),
        resource_group: Some(ResourceRef::id(resource_group_id)),
    };
    state.vpcs.push(vpc.clone());
    vpc
}

fn new_cloud_instance(
    state: &mut MockState,
    name: &str,
    zone: &str,
    resource_group_id: &str,
    plan_id: &str,
) -> ResourceInstance {
    let guid = state.next_id("guid");
    let crn = format!("crn:v1:bluemix:public:power-iaas:{zone}:a/{MOCK_ACCOUNT_ID}:{guid}::");
    let instance = ResourceInstance {
        id: crn.clone(),
        guid: guid.clone(),
        crn,
        name: name.to_string(),
        state: CLOUD_INSTANCE_ACTIVE_STATE.to_string(),
        region_id: zone.to_string(),
        resource_group_id: resource_group_id.to_string(),
        resource_id: "power-iaas-id".to_string(),
        resource_plan_id: plan_id.to_string(),
    };
    state.workspaces.insert(guid, Workspace::default());
    state.resource_instances.push(instance.clone());
    instance
}

fn new_cloud_connection(
    state: &mut MockState,
    guid: &str,
    request: &CreateCloudConnection,
) -> Result<CloudConnection, CloudError> {
    let id = state.next_id("cc");
    let connection = CloudConnection {
        cloud_connection_id: id.clone(),
        name: request.name.clone(),
        link_status: CLOUD_CONNECTION_ESTABLISHED_STATE.to_string(),
        global_routing: request.global_routing,
        speed: request.speed,
        vpc: Some(request.vpc.clone()),
        networks: Vec::new(),
    };
    state.workspace(guid)?.cloud_connections.push(connection.clone());
    state.direct_link_gateways.push(DirectLinkGateway {
        id: format!("dl-{id}"),
        name: request.name.clone(),
        crn: format!("crn:v1:bluemix:public:directlink::a/{MOCK_ACCOUNT_ID}::dedicated:dl-{id}"),
        bgp_status: CLOUD_CONNECTION_ESTABLISHED_STATE.to_string(),
        link_status: "up".to_string(),
        operational_status: "provisioned".to_string(),
    });
    Ok(connection)
}

fn new_dhcp_server(state: &mut MockState, guid: &str) -> Result<DhcpServer, CloudError> {
    let id = state.next_id("dhcp");
    let network_id = state.next_id("net");
    let network_name = format!("DHCPSERVER{id}_Private");
    let server = DhcpServer {
        id: id.clone(),
        status: DHCP_ACTIVE_STATE.to_string(),
        network: Some(DhcpNetwork {
            id: network_id.clone(),
            name: network_name.clone(),
        }),
    };
    let workspace = state.workspace(guid)?;
    workspace.dhcp_servers.push(server.clone());
    workspace.networks.push(Network {
        network_id,
        name: network_name,
        network_type: "dhcp-vlan".to_string(),
    });
    workspace.pvm_instances.push(PvmInstance {
        pvm_instance_id: id,
        server_name: "dhcp-server".to_string(),
        status: DHCP_ACTIVE_STATE.to_string(),
    });
    Ok(server)
}

impl CloudProvider for MockCloud {
    fn iam(&self) -> Arc<dyn IamService> {
        Arc::new(self.clone())
    }

    fn resource_manager(&self) -> Arc<dyn ResourceManager> {
        Arc::new(self.clone())
    }

    fn dns(&self) -> Arc<dyn DnsService> {
        Arc::new(self.clone())
    }

    fn vpc(&self, _region: &str) -> Arc<dyn VpcService> {
        Arc::new(self.clone())
    }

    fn powervs(
        &self,
        _region: &str,
        _zone: &str,
        cloud_instance_id: &str,
        _account_id: &str,
    ) -> Arc<dyn PowerVsService> {
        Arc::new(MockPowerVs {
            cloud: self.clone(),
            guid: cloud_instance_id.to_string(),
        })
    }

    fn direct_link(&self) -> Arc<dyn DirectLinkService> {
        Arc::new(self.clone())
    }

    fn transit_gateway(&self) -> Arc<dyn TransitGatewayService> {
        Arc::new(self.clone())
    }

    fn tagging(&self) -> Arc<dyn TaggingService> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl IamService for MockCloud {
    async fn account_id(&self) -> Result<String, CloudError> {
        let mut state = self.lock();
        state.call("account_id", "")?;
        Ok(state.account_id.clone())
    }

    async fn list_service_ids(
        &self,
        account_id: &str,
        name: &str,
        start: Option<&str>,
    ) -> Result<Page<ServiceId>, CloudError> {
        let mut state = self.lock();
        state.call("list_service_ids", name)?;
        let items: Vec<ServiceId> = state
            .service_ids
            .iter()
            .filter(|s| s.name == name && s.account_id == account_id)
            .cloned()
            .collect();
        Ok(state.paginate(items, start, "serviceids"))
    }

    async fn create_service_id(
        &self,
        account_id: &str,
        name: &str,
        description: &str,
    ) -> Result<ServiceId, CloudError> {
        let mut state = self.lock();
        state.call("create_service_id", name)?;
        let id = state.next_id("ServiceId");
        let service_id = ServiceId {
            iam_id: format!("iam-{id}"),
            id,
            name: name.to_string(),
            account_id: account_id.to_string(),
            description: description.to_string(),
        };
        state.service_ids.push(service_id.clone());
        Ok(service_id)
    }

    async fn delete_service_id(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.lock();
        state.call("delete_service_id", id)?;
        let before = state.service_ids.len();
        state.service_ids.retain(|s| s.id != id);
        if state.service_ids.len() == before {
            return Err(not_found("service id", id));
        }
        Ok(())
    }

    async fn create_policy(&self, policy: &PolicyRequest) -> Result<String, CloudError> {
        let mut state = self.lock();
        state.call("create_policy", &policy.subject_iam_id)?;
        state.policies.push(policy.clone());
        Ok(state.next_id("policy"))
    }

    async fn create_api_key(
        &self,
        _account_id: &str,
        iam_id: &str,
        name: &str,
    ) -> Result<ApiKey, CloudError> {
        let mut state = self.lock();
        state.call("create_api_key", iam_id)?;
        let id = state.next_id("ApiKey");
        let key = ApiKey {
            apikey: format!("secret-{id}"),
            id,
            name: name.to_string(),
        };
        state.api_keys.push(key.clone());
        Ok(key)
    }
}

#[async_trait]
impl ResourceManager for MockCloud {
    async fn resource_group_id(
        &self,
        name: &str,
        _account_id: &str,
    ) -> Result<Option<String>, CloudError> {
        let mut state = self.lock();
        state.call("resource_group_id", name)?;
        Ok(state.resource_groups.get(name).cloned())
    }

    async fn catalog_ids(
        &self,
        service: &str,
        plan: Option<&str>,
    ) -> Result<CatalogIds, CloudError> {
        let mut state = self.lock();
        state.call("catalog_ids", service)?;
        let service_id = state
            .catalog_services
            .get(service)
            .cloned()
            .ok_or_else(|| not_found("service", service))?;
        let plan_id = match plan {
            Some(plan) => Some(
                state
                    .catalog_plans
                    .get(&(service_id.clone(), plan.to_string()))
                    .cloned()
                    .ok_or_else(|| not_found("plan", plan))?,
            ),
            None => None,
        };
        Ok(CatalogIds { service_id, plan_id })
    }

    async fn list_resource_instances(
        &self,
        query: &ResourceInstanceQuery,
        start: Option<&str>,
    ) -> Result<Page<ResourceInstance>, CloudError> {
        let mut state = self.lock();
        state.call("list_resource_instances", query.name.as_deref().unwrap_or(""))?;
        let matches = |filter: &Option<String>, value: &str| filter.as_deref().is_none_or(|f| f == value);
        let items: Vec<ResourceInstance> = state
            .resource_instances
            .iter()
            .filter(|r| r.state != CLOUD_INSTANCE_REMOVED_STATE)
            .filter(|r| matches(&query.name, &r.name))
            .filter(|r| matches(&query.resource_group_id, &r.resource_group_id))
            .filter(|r| matches(&query.resource_id, &r.resource_id))
            .filter(|r| matches(&query.resource_plan_id, &r.resource_plan_id))
            .cloned()
            .collect();
        Ok(state.paginate(items, start, "resource_instances"))
    }

    async fn get_resource_instance(&self, id: &str) -> Result<ResourceInstance, CloudError> {
        let mut state = self.lock();
        state.call("get_resource_instance", id)?;
        state
            .resource_instances
            .iter()
            .find(|r| r.id == id || r.guid == id)
            .cloned()
            .ok_or_else(|| not_found("resource instance", id))
    }

    async fn create_resource_instance(
        &self,
        request: &CreateResourceInstance,
    ) -> Result<ResourceInstance, CloudError> {
        let mut state = self.lock();
        state.call("create_resource_instance", &request.name)?;
        Ok(new_cloud_instance(
            &mut state,
            &request.name,
            &request.target,
            &request.resource_group,
            &request.resource_plan_id,
        ))
    }

    async fn delete_resource_instance(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.lock();
        state.call("delete_resource_instance", id)?;
        let instance = state
            .resource_instances
            .iter_mut()
            .find(|r| (r.id == id || r.guid == id) && r.state != CLOUD_INSTANCE_REMOVED_STATE)
            .ok_or_else(|| not_found("resource instance", id))?;
        instance.state = CLOUD_INSTANCE_REMOVED_STATE.to_string();
        let guid = instance.guid.clone();
        state.workspaces.remove(&guid);
        Ok(())
    }
}

#[async_trait]
impl DnsService for MockCloud {
    async fn list_zones(
        &self,
        cis_crn: &str,
        start: Option<&str>,
    ) -> Result<Page<DnsZone>, CloudError> {
        let mut state = self.lock();
        state.call("list_zones", cis_crn)?;
        let zones = state.dns_zones.get(cis_crn).cloned().unwrap_or_default();
        Ok(state.paginate(zones, start, "zones"))
    }

    async fn list_dns_records(
        &self,
        _cis_crn: &str,
        zone_id: &str,
        name: Option<&str>,
        start: Option<&str>,
    ) -> Result<Page<DnsRecord>, CloudError> {
        let mut state = self.lock();
        state.call("list_dns_records", zone_id)?;
        let records: Vec<DnsRecord> = state
            .dns_records
            .get(zone_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| name.is_none_or(|n| r.name == n))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(state.paginate(records, start, "dns_records"))
    }

    async fn delete_dns_record(
        &self,
        _cis_crn: &str,
        zone_id: &str,
        record_id: &str,
    ) -> Result<(), CloudError> {
        let mut state = self.lock();
        state.call("delete_dns_record", record_id)?;
        let records = state
            .dns_records
            .get_mut(zone_id)
            .ok_or_else(|| not_found("zone", zone_id))?;
        let before = records.len();
        records.retain(|r| r.id != record_id);
        if records.len() == before {
            return Err(not_found("dns record", record_id));
        }
        Ok(())
    }
}

#[async_trait]
impl VpcService for MockCloud {
    async fn list_vpcs(&self, start: Option<&str>) -> Result<Page<Vpc>, CloudError> {
        let mut state = self.lock();
        state.call("list_vpcs", "")?;
        let vpcs = state.vpcs.clone();
        Ok(state.paginate(vpcs, start, "vpcs"))
    }

    async fn get_vpc(&self, id: &str) -> Result<Vpc, CloudError> {
        let mut state = self.lock();
        state.call("get_vpc", id)?;
        state
            .vpcs
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or_else(|| not_found("VPC", id))
    }

    async fn create_vpc(&self, request: &CreateVpc) -> Result<Vpc, CloudError> {
        let mut state = self.lock();
        state.call("create_vpc", &request.name)?;
        Ok(new_vpc(&mut state, &request.name, &request.resource_group.id))
    }

    async fn delete_vpc(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.lock();
        state.call("delete_vpc", id)?;
        let before = state.vpcs.len();
        state.vpcs.retain(|v| v.id != id);
        if state.vpcs.len() == before {
            return Err(not_found("VPC", id));
        }
        Ok(())
    }

    async fn get_security_group(&self, id: &str) -> Result<SecurityGroup, CloudError> {
        let mut state = self.lock();
        state.call("get_security_group", id)?;
        state
            .security_groups
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("security group", id))
    }

    async fn create_security_group_rule(
        &self,
        security_group_id: &str,
        rule: &SecurityGroupRule,
    ) -> Result<SecurityGroupRule, CloudError> {
        let mut state = self.lock();
        state.call("create_security_group_rule", security_group_id)?;
        let id = state.next_id("rule");
        let group = state
            .security_groups
            .get_mut(security_group_id)
            .ok_or_else(|| not_found("security group", security_group_id))?;
        let created = SecurityGroupRule {
            id,
            ..rule.clone()
        };
        group.rules.push(created.clone());
        Ok(created)
    }

    async fn list_address_prefixes(
        &self,
        vpc_id: &str,
        start: Option<&str>,
    ) -> Result<Page<AddressPrefix>, CloudError> {
        let mut state = self.lock();
        state.call("list_address_prefixes", vpc_id)?;
        let prefixes = state.address_prefixes.get(vpc_id).cloned().unwrap_or_default();
        Ok(state.paginate(prefixes, start, "address_prefixes"))
    }

    async fn list_region_zones(&self, region: &str) -> Result<Vec<String>, CloudError> {
        let mut state = self.lock();
        state.call("list_region_zones", region)?;
        Ok(state.region_zones.clone())
    }

    async fn list_subnets(
        &self,
        query: &SubnetQuery,
        start: Option<&str>,
    ) -> Result<Page<Subnet>, CloudError> {
        let mut state = self.lock();
        state.call("list_subnets", "")?;
        // Subnets inherit the resource group and routing table of their VPC.
        let items: Vec<Subnet> = state
            .subnets
            .iter()
            .filter(|s| {
                let Some(vpc) = state.vpcs.iter().find(|v| v.id == s.vpc.id) else {
                    return query.resource_group_id.is_none() && query.routing_table_id.is_none();
                };
                let rg_ok = query.resource_group_id.as_deref().is_none_or(|rg| {
                    vpc.resource_group.as_ref().is_some_and(|r| r.id == rg)
                });
                let rt_ok = query.routing_table_id.as_deref().is_none_or(|rt| {
                    vpc.default_routing_table.as_ref().is_some_and(|r| r.id == rt)
                });
                rg_ok && rt_ok
            })
            .cloned()
            .collect();
        Ok(state.paginate(items, start, "subnets"))
    }

    async fn get_subnet(&self, id: &str) -> Result<Subnet, CloudError> {
        let mut state = self.lock();
        state.call("get_subnet", id)?;
        state
            .subnets
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| not_found("subnet", id))
    }

    async fn create_subnet(&self, request: &CreateSubnet) -> Result<Subnet, CloudError> {
        let mut state = self.lock();
        state.call("create_subnet", &request.name)?;
        let id = state.next_id("subnet");
        let vpc = state
            .vpcs
            .iter()
            .find(|v| v.id == request.vpc.id)
            .map(|v| ResourceRef {
                id: v.id.clone(),
                name: v.name.clone(),
                crn: v.crn.clone(),
            })
            .unwrap_or_else(|| request.vpc.clone());
        let subnet = Subnet {
            crn: format!("crn:v1:bluemix:public:is:{}:a/{MOCK_ACCOUNT_ID}::subnet:{id}", request.zone.name),
            id,
            name: request.name.clone(),
            status: VPC_AVAILABLE_STATE.to_string(),
            vpc,
            zone: request.zone.clone(),
            ipv4_cidr_block: request.ipv4_cidr_block.clone(),
        };
        state.subnets.push(subnet.clone());
        Ok(subnet)
    }

    async fn delete_subnet(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.lock();
        state.call("delete_subnet", id)?;
        let before = state.subnets.len();
        state.subnets.retain(|s| s.id != id);
        if state.subnets.len() == before {
            return Err(not_found("subnet", id));
        }
        Ok(())
    }

    async fn list_load_balancers(
        &self,
        start: Option<&str>,
    ) -> Result<Page<LoadBalancer>, CloudError> {
        let mut state = self.lock();
        state.call("list_load_balancers", "")?;
        let lbs = state.load_balancers.clone();
        Ok(state.paginate(lbs, start, "load_balancers"))
    }

    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer, CloudError> {
        let mut state = self.lock();
        state.call("get_load_balancer", id)?;
        state
            .load_balancers
            .iter()
            .find(|lb| lb.id == id)
            .cloned()
            .ok_or_else(|| CloudError::http(404, format!("load balancer {id} cannot be found")))
    }

    async fn delete_load_balancer(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.lock();
        state.call("delete_load_balancer", id)?;
        let before = state.load_balancers.len();
        state.load_balancers.retain(|lb| lb.id != id);
        if state.load_balancers.len() == before {
            return Err(not_found("load balancer", id));
        }
        Ok(())
    }
}

/// PowerVS view of one workspace.
struct MockPowerVs {
    cloud: MockCloud,
    guid: String,
}

#[async_trait]
impl PowerVsService for MockPowerVs {
    async fn list_cloud_connections(&self) -> Result<Vec<CloudConnection>, CloudError> {
        let mut state = self.cloud.lock();
        state.call("list_cloud_connections", &self.guid)?;
        Ok(state.workspace(&self.guid)?.cloud_connections.clone())
    }

    async fn get_cloud_connection(&self, id: &str) -> Result<CloudConnection, CloudError> {
        let mut state = self.cloud.lock();
        state.call("get_cloud_connection", id)?;
        state
            .workspace(&self.guid)?
            .cloud_connections
            .iter()
            .find(|c| c.cloud_connection_id == id)
            .cloned()
            .ok_or_else(|| not_found("cloud connection", id))
    }

    async fn create_cloud_connection(
        &self,
        request: &CreateCloudConnection,
    ) -> Result<CloudConnection, CloudError> {
        let mut state = self.cloud.lock();
        state.call("create_cloud_connection", &request.name)?;
        new_cloud_connection(&mut state, &self.guid, request)
    }

    async fn update_cloud_connection(
        &self,
        id: &str,
        request: &UpdateCloudConnection,
    ) -> Result<Option<JobRef>, CloudError> {
        let mut state = self.cloud.lock();
        state.call("update_cloud_connection", id)?;
        let connection = state
            .workspace(&self.guid)?
            .cloud_connections
            .iter_mut()
            .find(|c| c.cloud_connection_id == id)
            .ok_or_else(|| not_found("cloud connection", id))?;
        if let Some(routing) = request.global_routing {
            connection.global_routing = routing;
        }
        if let Some(vpc) = &request.vpc {
            connection.vpc = Some(vpc.clone());
        }
        Ok(Some(state.completed_job()))
    }

    async fn add_network(
        &self,
        cloud_connection_id: &str,
        network_id: &str,
    ) -> Result<JobRef, CloudError> {
        let mut state = self.cloud.lock();
        state.call("add_network", network_id)?;
        let workspace = state.workspace(&self.guid)?;
        let name = workspace
            .networks
            .iter()
            .find(|n| n.network_id == network_id)
            .map(|n| n.name.clone())
            .ok_or_else(|| not_found("network", network_id))?;
        let connection = workspace
            .cloud_connections
            .iter_mut()
            .find(|c| c.cloud_connection_id == cloud_connection_id)
            .ok_or_else(|| not_found("cloud connection", cloud_connection_id))?;
        connection.networks.push(CloudConnectionNetwork {
            network_id: network_id.to_string(),
            name,
        });
        Ok(state.completed_job())
    }

    async fn remove_network(
        &self,
        cloud_connection_id: &str,
        network_id: &str,
    ) -> Result<JobRef, CloudError> {
        let mut state = self.cloud.lock();
        state.call("remove_network", network_id)?;
        let connection = state
            .workspace(&self.guid)?
            .cloud_connections
            .iter_mut()
            .find(|c| c.cloud_connection_id == cloud_connection_id)
            .ok_or_else(|| not_found("cloud connection", cloud_connection_id))?;
        connection.networks.retain(|n| n.network_id != network_id);
        Ok(state.completed_job())
    }

    async fn delete_cloud_connection(&self, id: &str) -> Result<JobRef, CloudError> {
        let mut state = self.cloud.lock();
        state.call("delete_cloud_connection", id)?;
        let workspace = state.workspace(&self.guid)?;
        let before = workspace.cloud_connections.len();
        workspace.cloud_connections.retain(|c| c.cloud_connection_id != id);
        if workspace.cloud_connections.len() == before {
            return Err(not_found("cloud connection", id));
        }
        Ok(state.completed_job())
    }

    async fn get_job(&self, id: &str) -> Result<Job, CloudError> {
        let mut state = self.cloud.lock();
        state.call("get_job", id)?;
        state.jobs.get(id).cloned().ok_or_else(|| not_found("job", id))
    }

    async fn list_dhcp_servers(&self) -> Result<Vec<DhcpServer>, CloudError> {
        let mut state = self.cloud.lock();
        state.call("list_dhcp_servers", &self.guid)?;
        Ok(state.workspace(&self.guid)?.dhcp_servers.clone())
    }

    async fn get_dhcp_server(&self, id: &str) -> Result<DhcpServer, CloudError> {
        let mut state = self.cloud.lock();
        state.call("get_dhcp_server", id)?;
        state
            .workspace(&self.guid)?
            .dhcp_servers
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| not_found("dhcp server", id))
    }

    async fn create_dhcp_server(
        &self,
        request: &CreateDhcpServer,
    ) -> Result<DhcpServer, CloudError> {
        let mut state = self.cloud.lock();
        state.call("create_dhcp_server", &request.cloud_connection_id)?;
        new_dhcp_server(&mut state, &self.guid)
    }

    async fn delete_dhcp_server(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.cloud.lock();
        state.call("delete_dhcp_server", id)?;
        let workspace = state.workspace(&self.guid)?;
        let before = workspace.dhcp_servers.len();
        workspace.dhcp_servers.retain(|d| d.id != id);
        if workspace.dhcp_servers.len() == before {
            return Err(not_found("dhcp server", id));
        }
        workspace.pvm_instances.retain(|p| p.pvm_instance_id != id);
        Ok(())
    }

    async fn get_network(&self, id: &str) -> Result<Network, CloudError> {
        let mut state = self.cloud.lock();
        state.call("get_network", id)?;
        state
            .workspace(&self.guid)?
            .networks
            .iter()
            .find(|n| n.network_id == id)
            .cloned()
            .ok_or_else(|| not_found("network", id))
    }

    async fn get_pvm_instance(&self, id: &str) -> Result<PvmInstance, CloudError> {
        let mut state = self.cloud.lock();
        state.call("get_pvm_instance", id)?;
        state
            .workspace(&self.guid)?
            .pvm_instances
            .iter()
            .find(|p| p.pvm_instance_id == id)
            .cloned()
            .ok_or_else(|| CloudError::http(404, format!("pvm-instance {id} does not exist")))
    }
}

#[async_trait]
impl DirectLinkService for MockCloud {
    async fn list_gateways(&self) -> Result<Vec<DirectLinkGateway>, CloudError> {
        let mut state = self.lock();
        state.call("list_gateways", "")?;
        Ok(state.direct_link_gateways.clone())
    }

    async fn get_gateway(&self, id: &str) -> Result<DirectLinkGateway, CloudError> {
        let mut state = self.lock();
        state.call("get_gateway", id)?;
        state
            .direct_link_gateways
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| not_found("gateway", id))
    }
}

#[async_trait]
impl TransitGatewayService for MockCloud {
    async fn list_transit_gateways(
        &self,
        start: Option<&str>,
    ) -> Result<Page<TransitGateway>, CloudError> {
        let mut state = self.lock();
        state.call("list_transit_gateways", "")?;
        let gateways = state.transit_gateways.clone();
        Ok(state.paginate(gateways, start, "transit_gateways"))
    }

    async fn get_transit_gateway(&self, id: &str) -> Result<TransitGateway, CloudError> {
        let mut state = self.lock();
        state.call("get_transit_gateway", id)?;
        state
            .transit_gateways
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| not_found("transit gateway", id))
    }
}

#[async_trait]
impl TaggingService for MockCloud {
    async fn attach_tags(&self, crns: &[String], tags: &[String]) -> Result<(), CloudError> {
        let mut state = self.lock();
        state.call("attach_tags", &crns.join(","))?;
        for crn in crns {
            state
                .tags
                .entry(crn.clone())
                .or_default()
                .extend(tags.iter().cloned());
        }
        Ok(())
    }
}
