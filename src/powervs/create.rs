// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Provisioning of PowerVS infrastructure for a hosted cluster.
//!
//! [`setup_infra`] runs the steps below in order and stops at the first
//! failure. Each step looks for the resource it needs (a user override or the
//! canonical `<infraId>-<suffix>` name) before creating one.
//!
//! 1. Account and resource group
//! 2. CIS instance and DNS zone serving the base domain
//! 3. VPC, with inbound rules for the ingress ports
//! 4. VPC subnet
//! 5. PowerVS cloud instance
//! 6. Component credentials
//! 7. Cloud connection
//! 8. DHCP server
//! 9. Cloud connection attached to the VPC and the DHCP network, and established

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::credentials::{setup_credentials, CredentialParams, ServiceIdIssuer};
use super::infra::{Infra, Stat};
use super::options::CreateOptions;
use super::validators::{
    check_ingress_rules, find_by_id, find_by_name, validate_cloud_connection_in_zone,
    CloudConnections, CloudInstances, VpcSubnets, Vpcs,
};
use super::{api_key_from_env, check_supported_zone, cloud_from_env, resource_name, resource_tags};
use crate::constants::{
    CIS_SERVICE, CLOUD_CONNECTION_ESTABLISHED_STATE, CLOUD_CONNECTION_ESTABLISHED_TIMEOUT,
    CLOUD_CONNECTION_ESTABLISH_ATTEMPTS, CLOUD_CONNECTION_NAME_SUFFIX,
    CLOUD_CONNECTION_UPDATE_TIMEOUT, CLOUD_INSTANCE_ACTIVE_STATE, CLOUD_INSTANCE_CREATION_TIMEOUT,
    CLOUD_INSTANCE_NAME_SUFFIX, DEFAULT_CLOUD_CONNECTION_SPEED, DHCP_ACTIVE_STATE,
    DHCP_CREATION_TIMEOUT, DHCP_DNS_SERVER, DHCP_ERROR_STATE, DHCP_POLL_INTERVAL, INGRESS_PORTS,
    JOB_COMPLETED_STATE, JOB_FAILED_STATE, POLL_INTERVAL, POWERVS_SERVICE, POWERVS_SERVICE_PLAN,
    TRANSIENT_ERROR_KEYWORDS, VPC_AVAILABLE_STATE, VPC_CREATION_TIMEOUT, VPC_NAME_SUFFIX,
    VPC_SUBNET_NAME_SUFFIX,
};
use crate::errors::InfraError;
use crate::ibmcloud::{
    CloudConnection, CloudConnectionVpc, CloudConnectionVpcs, CloudProvider, CreateCloudConnection,
    CreateDhcpServer, CreateResourceInstance, CreateSubnet, CreateVpc, DhcpServer, DnsRecord,
    DnsService, Job, PowerVsService, ResourceInstance, ResourceInstanceQuery, ResourceManager, ResourceRef,
    SecurityGroupRule, Subnet, SubnetQuery, UpdateCloudConnection, Vpc, VpcService, ZoneRef,
};
use crate::metrics::{self, InfraPhase};
use crate::paging::collect_all;
use crate::retry::wait_for;

/// Create (or resume creating) the infrastructure described by `options`.
///
/// The record is returned even when a step fails, with every id and stat
/// gathered up to that point, so the caller can always write it out.
pub async fn setup_infra(
    cloud: &dyn CloudProvider,
    options: &CreateOptions,
    cancel: &CancellationToken,
) -> (Infra, Result<(), InfraError>) {
    let mut setup = Setup {
        cloud,
        options,
        cancel,
        infra: Infra::new(&options.infra_id),
        observed: Observed::default(),
    };
    let result = setup.run().await;
    match &result {
        Ok(()) => info!(infra_id = %options.infra_id, "PowerVS infrastructure is ready"),
        Err(e) => warn!(infra_id = %options.infra_id, error = %e, "Failed to set up PowerVS infrastructure"),
    }
    (setup.infra, result)
}

/// [`setup_infra`] against IBM Cloud, authenticating with the API key from
/// the environment.
pub async fn create_infra(
    options: &CreateOptions,
    cancel: &CancellationToken,
) -> (Infra, Result<(), InfraError>) {
    let cloud = match api_key_from_env().and_then(|key| cloud_from_env(&key)) {
        Ok(cloud) => cloud,
        Err(e) => return (Infra::new(&options.infra_id), Err(e)),
    };
    setup_infra(&cloud, options, cancel).await
}

/// Locate the CIS instance and DNS zone serving `base_domain`.
///
/// Returns `(cis_crn, zone_id)`.
///
/// # Errors
///
/// Returns [`InfraError::NotFound`] when no CIS instance serves the domain.
pub(crate) async fn lookup_base_domain(
    resource_manager: &dyn ResourceManager,
    dns: &dyn DnsService,
    cancel: &CancellationToken,
    base_domain: &str,
) -> Result<(String, String), InfraError> {
    let catalog = resource_manager.catalog_ids(CIS_SERVICE, None).await?;
    let query = ResourceInstanceQuery {
        resource_id: Some(catalog.service_id),
        ..ResourceInstanceQuery::default()
    };
    let query = &query;
    let instances = collect_all(cancel, |start| async move {
        resource_manager
            .list_resource_instances(query, start.as_deref())
            .await
    })
    .await?;

    for instance in &instances {
        let crn = instance.crn.as_str();
        let zones = collect_all(cancel, |start| async move { dns.list_zones(crn, start.as_deref()).await })
            .await?;
        if let Some(zone) = zones.into_iter().find(|z| z.name == base_domain) {
            debug!(cis_crn = %crn, zone_id = %zone.id, "Found CIS domain");
            return Ok((instance.crn.clone(), zone.id));
        }
    }
    Err(InfraError::not_found("CIS domain", base_domain))
}

/// DNS records named `name` in one CIS zone.
pub(crate) async fn find_dns_records(
    dns: &dyn DnsService,
    cancel: &CancellationToken,
    cis_crn: &str,
    zone_id: &str,
    name: &str,
) -> Result<Vec<DnsRecord>, InfraError> {
    let records = collect_all(cancel, |start| async move {
        dns.list_dns_records(cis_crn, zone_id, Some(name), start.as_deref())
            .await
    })
    .await?;
    Ok(records.into_iter().filter(|r| r.name == name).collect())
}

/// Wildcard ingress record name of a cluster.
pub(crate) fn apps_record_name(cluster_name: &str, base_domain: &str) -> String {
    format!("*.apps.{cluster_name}.{base_domain}")
}

struct Setup<'a> {
    cloud: &'a dyn CloudProvider,
    options: &'a CreateOptions,
    cancel: &'a CancellationToken,
    infra: Infra,
    observed: Observed,
}

/// Last status polled during the running step.
#[derive(Debug, Default)]
struct Observed(Mutex<String>);

impl Observed {
    fn record(&self, status: &str) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = status.to_string();
    }

    fn take(&self) -> String {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Setup<'_> {
    async fn run(&mut self) -> Result<(), InfraError> {
        self.options.validate()?;
        check_supported_zone(&self.options.zone)?;
        self.infra.region = self.options.region.clone();
        self.infra.zone = self.options.zone.clone();

        self.account_and_resource_group().await?;
        self.base_domain().await?;

        let start = Instant::now();
        let outcome = self.setup_vpc().await;
        self.infra.stats.vpc = finish_step("vpc", start, &outcome, self.observed.take());
        outcome?;

        let start = Instant::now();
        let outcome = self.setup_vpc_subnet().await;
        self.infra.stats.vpc_subnet = finish_step("vpc-subnet", start, &outcome, self.observed.take());
        outcome?;

        let start = Instant::now();
        let outcome = self.setup_cloud_instance().await;
        self.infra.stats.cloud_instance = finish_step("cloud-instance", start, &outcome, self.observed.take());
        outcome?;

        self.setup_credentials().await?;

        let powervs = self.cloud.powervs(
            &self.infra.region,
            &self.infra.zone,
            &self.infra.powervs_cloud_instance_id,
            &self.infra.account_id,
        );
        self.setup_cloud_connection(powervs.as_ref()).await?;

        let start = Instant::now();
        let outcome = self.setup_dhcp(powervs.as_ref()).await;
        self.infra.stats.dhcp_service = finish_step("dhcp-service", start, &outcome, self.observed.take());
        outcome?;

        let start = Instant::now();
        let outcome = self.cloud_connection_ready(powervs.as_ref()).await;
        self.infra.stats.cloud_conn_state = finish_step("cloud-connection-state", start, &outcome, self.observed.take());
        outcome.map(|_| ())
    }

    async fn account_and_resource_group(&mut self) -> Result<(), InfraError> {
        self.infra.account_id = self.cloud.iam().account_id().await?;
        let group = &self.options.resource_group;
        self.infra.resource_group_id = self
            .cloud
            .resource_manager()
            .resource_group_id(group, &self.infra.account_id)
            .await?
            .ok_or_else(|| InfraError::not_found("resource group", group))?;
        info!(account_id = %self.infra.account_id, resource_group_id = %self.infra.resource_group_id, "Resolved account");
        Ok(())
    }

    async fn base_domain(&mut self) -> Result<(), InfraError> {
        let resource_manager = self.cloud.resource_manager();
        let dns = self.cloud.dns();
        let (crn, zone_id) = lookup_base_domain(
            resource_manager.as_ref(),
            dns.as_ref(),
            self.cancel,
            &self.options.base_domain,
        )
        .await?;

        let record = apps_record_name(&self.options.name, &self.options.base_domain);
        let existing = find_dns_records(dns.as_ref(), self.cancel, &crn, &zone_id, &record).await?;
        if !existing.is_empty() {
            return Err(InfraError::Policy(format!(
                "existing DNS record {record} found in base domain {}, cannot proceed",
                self.options.base_domain
            )));
        }

        self.infra.cis_crn = crn;
        self.infra.cis_domain_id = zone_id;
        Ok(())
    }

    async fn setup_vpc(&mut self) -> Result<String, InfraError> {
        let api = self.cloud.vpc(&self.options.vpc_region);
        let finder = Vpcs::new(
            api.as_ref(),
            &self.options.vpc_region,
            Some(&self.infra.resource_group_id),
        );

        let vpc = if let Some(name) = &self.options.vpc {
            let vpc = find_by_name(&finder, self.cancel, name).await?;
            check_ingress_rules(api.as_ref(), &vpc).await?;
            info!(vpc = %vpc.name, "Using existing VPC");
            vpc
        } else {
            let name = resource_name(&self.options.infra_id, VPC_NAME_SUFFIX);
            let vpc = match find_by_name(&finder, self.cancel, &name).await {
                Ok(vpc) => {
                    info!(vpc = %vpc.name, "Reusing VPC from a previous run");
                    vpc
                }
                Err(e) if e.is_not_found() => {
                    let created = api
                        .create_vpc(&CreateVpc {
                            name: name.clone(),
                            resource_group: ResourceRef::id(&self.infra.resource_group_id),
                            address_prefix_management: "auto".to_string(),
                        })
                        .await?;
                    info!(vpc = %created.name, id = %created.id, "Created VPC");
                    created
                }
                Err(e) => return Err(e),
            };
            let vpc = wait_vpc_available(api.as_ref(), self.cancel, &self.observed, &vpc.id).await?;
            ensure_ingress_rules(api.as_ref(), &vpc).await?;
            self.tag(&vpc.crn, &name).await?;
            vpc
        };

        self.infra.vpc_name = vpc.name;
        self.infra.vpc_id = vpc.id;
        self.infra.vpc_crn = vpc.crn;
        self.infra.vpc_routing_table_id = vpc.default_routing_table.map(|r| r.id).unwrap_or_default();
        Ok(vpc.status)
    }

    async fn setup_vpc_subnet(&mut self) -> Result<String, InfraError> {
        let api = self.cloud.vpc(&self.options.vpc_region);
        let api = api.as_ref();
        let query = SubnetQuery {
            resource_group_id: Some(self.infra.resource_group_id.clone()),
            routing_table_id: Some(self.infra.vpc_routing_table_id.clone()).filter(|id| !id.is_empty()),
        };
        let name = resource_name(&self.options.infra_id, VPC_SUBNET_NAME_SUFFIX);

        // A subnet from an earlier run wins over any other subnet of the VPC
        let finder = VpcSubnets::new(api, query.clone(), &self.options.vpc_region);
        let ours = match find_by_name(&finder, self.cancel, &name).await {
            Ok(subnet) if subnet.vpc.id == self.infra.vpc_id => Some(subnet),
            Ok(_) => None,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let subnet = match ours {
            Some(subnet) => {
                info!(subnet = %subnet.name, vpc = %self.infra.vpc_name, "Using existing VPC subnet");
                subnet
            }
            None => {
                let query = &query;
                let subnets = collect_all(self.cancel, |start| async move {
                    api.list_subnets(query, start.as_deref()).await
                })
                .await?;
                match subnets.into_iter().find(|s| s.vpc.id == self.infra.vpc_id) {
                    Some(subnet) => {
                        info!(subnet = %subnet.name, vpc = %self.infra.vpc_name, "Using existing VPC subnet");
                        subnet
                    }
                    None => self.create_vpc_subnet(api, &name).await?,
                }
            }
        };

        let id = subnet.id.as_str();
        let observed = &self.observed;
        let subnet = wait_for(
            format!("vpc subnet {id} to become available"),
            POLL_INTERVAL,
            VPC_CREATION_TIMEOUT,
            self.cancel,
            move || async move { api.get_subnet(id).await.map_err(InfraError::from) },
            |s: &Subnet| {
                observed.record(&s.status);
                Ok(s.status == VPC_AVAILABLE_STATE)
            },
            TRANSIENT_ERROR_KEYWORDS,
        )
        .await?;

        if subnet.name == name {
            self.tag(&subnet.crn, &name).await?;
        }
        self.infra.vpc_subnet_name = subnet.name;
        self.infra.vpc_subnet_id = subnet.id;
        Ok(subnet.status)
    }

    /// Try each zone of the region with the VPC's address prefix for that
    /// zone until one create succeeds.
    async fn create_vpc_subnet(&self, api: &dyn VpcService, name: &str) -> Result<Subnet, InfraError> {
        let zones = api.list_region_zones(&self.options.vpc_region).await?;
        let vpc_id = self.infra.vpc_id.as_str();
        let prefixes = collect_all(self.cancel, |start| async move {
            api.list_address_prefixes(vpc_id, start.as_deref()).await
        })
        .await?;

        let mut last_error = None;
        for zone in &zones {
            for prefix in prefixes.iter().filter(|p| &p.zone.name == zone) {
                let request = CreateSubnet {
                    name: name.to_string(),
                    vpc: ResourceRef::id(vpc_id),
                    zone: ZoneRef { name: zone.clone() },
                    ipv4_cidr_block: prefix.cidr.clone(),
                    resource_group: ResourceRef::id(&self.infra.resource_group_id),
                };
                match api.create_subnet(&request).await {
                    Ok(subnet) => {
                        info!(subnet = %subnet.name, zone = %zone, cidr = %prefix.cidr, "Created VPC subnet");
                        return Ok(subnet);
                    }
                    Err(e) => {
                        warn!(zone = %zone, cidr = %prefix.cidr, error = %e, "Failed to create VPC subnet, trying next zone");
                        last_error = Some(e);
                    }
                }
            }
        }

        Err(match last_error {
            Some(e) => e.into(),
            None => InfraError::Config(format!(
                "no address prefix found in vpc {} to create a subnet",
                self.infra.vpc_name
            )),
        })
    }

    async fn setup_cloud_instance(&mut self) -> Result<String, InfraError> {
        let resource_manager = self.cloud.resource_manager();
        let api = resource_manager.as_ref();
        let catalog = api.catalog_ids(POWERVS_SERVICE, Some(POWERVS_SERVICE_PLAN)).await?;
        let plan_id = catalog
            .plan_id
            .ok_or_else(|| InfraError::not_found("service plan", POWERVS_SERVICE_PLAN))?;
        let finder = CloudInstances::new(
            api,
            ResourceInstanceQuery {
                name: None,
                resource_group_id: Some(self.infra.resource_group_id.clone()),
                resource_id: Some(catalog.service_id),
                resource_plan_id: Some(plan_id.clone()),
            },
            &self.options.zone,
        );

        let instance = if let Some(id) = &self.options.cloud_instance_id {
            let instance = find_by_id(&finder, id).await?;
            info!(cloud_instance = %instance.name, "Using existing cloud instance");
            instance
        } else {
            let name = resource_name(&self.options.infra_id, CLOUD_INSTANCE_NAME_SUFFIX);
            let instance = match find_by_name(&finder, self.cancel, &name).await {
                Ok(instance) => {
                    info!(cloud_instance = %instance.name, "Reusing cloud instance from a previous run");
                    instance
                }
                Err(e) if e.is_not_found() => {
                    let created = api
                        .create_resource_instance(&CreateResourceInstance {
                            name: name.clone(),
                            target: self.options.zone.clone(),
                            resource_group: self.infra.resource_group_id.clone(),
                            resource_plan_id: plan_id,
                        })
                        .await?;
                    info!(cloud_instance = %created.name, guid = %created.guid, "Created cloud instance");
                    created
                }
                Err(e) => return Err(e),
            };
            let id = instance.id.as_str();
            let observed = &self.observed;
            let instance = wait_for(
                format!("cloud instance {} to become active", instance.name),
                POLL_INTERVAL,
                CLOUD_INSTANCE_CREATION_TIMEOUT,
                self.cancel,
                move || async move { api.get_resource_instance(id).await.map_err(InfraError::from) },
                |i: &ResourceInstance| {
                    observed.record(&i.state);
                    match i.state.as_str() {
                        CLOUD_INSTANCE_ACTIVE_STATE => Ok(true),
                        "failed" => Err(InfraError::State {
                            kind: "cloud instance",
                            name: i.name.clone(),
                            state: i.state.clone(),
                        }),
                        _ => Ok(false),
                    }
                },
                TRANSIENT_ERROR_KEYWORDS,
            )
            .await?;
            self.tag(&instance.crn, &name).await?;
            instance
        };

        self.infra.powervs_cloud_instance_id = instance.guid;
        Ok(instance.state)
    }

    async fn setup_credentials(&mut self) -> Result<(), InfraError> {
        let params = CredentialParams {
            infra_id: self.options.infra_id.clone(),
            cluster_name: self.options.name.clone(),
            namespace: self.options.namespace.clone(),
            cloud_instance_id: self.infra.powervs_cloud_instance_id.clone(),
            cis_crn: self.infra.cis_crn.clone(),
        };
        let iam = self.cloud.iam();
        let issuer = ServiceIdIssuer::new(
            iam.as_ref(),
            &self.infra.account_id,
            &self.infra.resource_group_id,
            self.cancel,
        );
        let secrets = setup_credentials(&issuer, &params, self.options.recreate_secrets).await?;
        self.infra.secrets = secrets;
        Ok(())
    }

    async fn setup_cloud_connection(&mut self, powervs: &dyn PowerVsService) -> Result<(), InfraError> {
        let id = if let Some(name) = &self.options.cloud_connection {
            let connection = find_by_name(&CloudConnections::new(powervs), self.cancel, name).await?;
            info!(cloud_connection = %connection.name, "Using existing cloud connection");
            connection.cloud_connection_id
        } else {
            let name = resource_name(&self.options.infra_id, CLOUD_CONNECTION_NAME_SUFFIX);
            match validate_cloud_connection_in_zone(powervs, &name).await? {
                Some(id) => {
                    info!(cloud_connection = %name, "Reusing cloud connection from a previous run");
                    id
                }
                None => {
                    let created = powervs
                        .create_cloud_connection(&CreateCloudConnection {
                            name: name.clone(),
                            global_routing: true,
                            speed: DEFAULT_CLOUD_CONNECTION_SPEED,
                            vpc: CloudConnectionVpcs {
                                enabled: true,
                                vpcs: vec![CloudConnectionVpc {
                                    vpc_id: self.infra.vpc_crn.clone(),
                                    name: self.infra.vpc_name.clone(),
                                }],
                            },
                        })
                        .await?;
                    info!(cloud_connection = %created.name, id = %created.cloud_connection_id, "Created cloud connection");
                    self.tag_direct_link_gateway(&name).await?;
                    created.cloud_connection_id
                }
            }
        };
        self.infra.powervs_cloud_connection_id = id;
        Ok(())
    }

    async fn setup_dhcp(&mut self, powervs: &dyn PowerVsService) -> Result<String, InfraError> {
        let mut servers = powervs.list_dhcp_servers().await?;
        let server = match servers.len() {
            0 => {
                let created = powervs
                    .create_dhcp_server(&CreateDhcpServer {
                        cloud_connection_id: self.infra.powervs_cloud_connection_id.clone(),
                        dns_server: DHCP_DNS_SERVER.to_string(),
                        name: None,
                    })
                    .await?;
                info!(dhcp_server = %created.id, "Created DHCP server");
                created
            }
            1 => {
                let existing = servers.remove(0);
                info!(dhcp_server = %existing.id, "Using existing DHCP server");
                existing
            }
            count => return Err(InfraError::DhcpServerLimitExceeds(count)),
        };

        let id = server.id.as_str();
        let observed = &self.observed;
        let server = wait_for(
            format!("dhcp server {id} to become {DHCP_ACTIVE_STATE}"),
            DHCP_POLL_INTERVAL,
            DHCP_CREATION_TIMEOUT,
            self.cancel,
            move || async move { powervs.get_dhcp_server(id).await.map_err(InfraError::from) },
            |s: &DhcpServer| {
                observed.record(&s.status);
                match s.status.as_str() {
                    DHCP_ACTIVE_STATE => Ok(true),
                    DHCP_ERROR_STATE => Err(InfraError::State {
                        kind: "dhcp server",
                        name: s.id.clone(),
                        state: s.status.clone(),
                    }),
                    _ => Ok(false),
                }
            },
            TRANSIENT_ERROR_KEYWORDS,
        )
        .await?;

        let network = server.network.clone().unwrap_or_default();
        if server.id.is_empty() || network.id.is_empty() {
            return Err(InfraError::Config(format!(
                "dhcp server {} has no private network",
                server.id
            )));
        }
        self.infra.powervs_dhcp_id = server.id;
        self.infra.powervs_dhcp_subnet = network.name;
        self.infra.powervs_dhcp_subnet_id = network.id;
        Ok(server.status)
    }

    /// Attach the VPC and the DHCP network, then wait for the link.
    async fn cloud_connection_ready(&mut self, powervs: &dyn PowerVsService) -> Result<String, InfraError> {
        let id = self.infra.powervs_cloud_connection_id.as_str();
        let connection = powervs.get_cloud_connection(id).await?;

        if !connection.has_vpc(&self.infra.vpc_crn) {
            let mut vpcs = connection.vpc.clone().map(|v| v.vpcs).unwrap_or_default();
            vpcs.push(CloudConnectionVpc {
                vpc_id: self.infra.vpc_crn.clone(),
                name: self.infra.vpc_name.clone(),
            });
            let update = UpdateCloudConnection {
                global_routing: Some(true),
                vpc: Some(CloudConnectionVpcs { enabled: true, vpcs }),
            };
            info!(cloud_connection = %connection.name, vpc = %self.infra.vpc_name, "Attaching VPC to cloud connection");
            if let Some(job) = powervs.update_cloud_connection(id, &update).await? {
                monitor_job(powervs, self.cancel, &job.id, CLOUD_CONNECTION_UPDATE_TIMEOUT).await?;
            }
        }

        if !connection.has_network(&self.infra.powervs_dhcp_subnet_id) {
            info!(cloud_connection = %connection.name, network = %self.infra.powervs_dhcp_subnet, "Attaching DHCP network to cloud connection");
            let job = powervs
                .add_network(id, &self.infra.powervs_dhcp_subnet_id)
                .await?;
            monitor_job(powervs, self.cancel, &job.id, CLOUD_CONNECTION_UPDATE_TIMEOUT).await?;
        }

        let observed = &self.observed;
        let mut last_error = None;
        for attempt in 1..=CLOUD_CONNECTION_ESTABLISH_ATTEMPTS {
            let outcome = wait_for(
                format!("cloud connection {} to be {CLOUD_CONNECTION_ESTABLISHED_STATE}", connection.name),
                POLL_INTERVAL,
                CLOUD_CONNECTION_ESTABLISHED_TIMEOUT,
                self.cancel,
                || async move { powervs.get_cloud_connection(id).await.map_err(InfraError::from) },
                |c: &CloudConnection| {
                    observed.record(&c.link_status);
                    Ok(c.link_status == CLOUD_CONNECTION_ESTABLISHED_STATE)
                },
                TRANSIENT_ERROR_KEYWORDS,
            )
            .await;
            self.log_direct_link_status(&connection.name).await;
            match outcome {
                Ok(established) => return Ok(established.link_status),
                Err(e @ InfraError::Timeout { .. }) => {
                    warn!(attempt, cloud_connection = %connection.name, "Cloud connection not established yet");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| InfraError::Timeout {
            operation: format!("cloud connection {}", connection.name),
            timeout: CLOUD_CONNECTION_ESTABLISHED_TIMEOUT,
        }))
    }

    async fn log_direct_link_status(&self, name: &str) {
        match self.cloud.direct_link().list_gateways().await {
            Ok(gateways) => {
                if let Some(gateway) = gateways.iter().find(|g| g.name == name) {
                    info!(
                        gateway = %gateway.name,
                        bgp_status = %gateway.bgp_status,
                        link_status = %gateway.link_status,
                        "Direct link gateway status"
                    );
                }
            }
            Err(e) => debug!(error = %e, "Could not read direct link gateways"),
        }
    }

    async fn tag_direct_link_gateway(&self, name: &str) -> Result<(), InfraError> {
        let gateways = self.cloud.direct_link().list_gateways().await?;
        match gateways.into_iter().find(|g| g.name == name) {
            Some(gateway) => self.tag(&gateway.crn, name).await,
            None => {
                debug!(gateway = %name, "No direct link gateway to tag yet");
                Ok(())
            }
        }
    }

    async fn tag(&self, crn: &str, name: &str) -> Result<(), InfraError> {
        if crn.is_empty() {
            return Ok(());
        }
        let tags = resource_tags(&self.options.infra_id, name);
        self.cloud
            .tagging()
            .attach_tags(&[crn.to_string()], &tags)
            .await?;
        debug!(crn = %crn, tags = ?tags, "Tagged resource");
        Ok(())
    }
}

/// Record the step's duration and final status, or on failure the last
/// status polled.
fn finish_step(step: &str, start: Instant, outcome: &Result<String, InfraError>, observed: String) -> Stat {
    let duration = start.elapsed();
    metrics::record_infra_step(InfraPhase::Create, step, duration, outcome.is_ok());
    match outcome {
        Ok(status) => {
            info!(step, duration = ?duration, status = %status, "Infrastructure step complete");
            Stat {
                duration,
                status: status.clone(),
            }
        }
        Err(e) => {
            warn!(step, duration = ?duration, status = %observed, error = %e, "Infrastructure step failed");
            Stat {
                duration,
                status: observed,
            }
        }
    }
}

async fn wait_vpc_available(
    api: &dyn VpcService,
    cancel: &CancellationToken,
    observed: &Observed,
    id: &str,
) -> Result<Vpc, InfraError> {
    wait_for(
        format!("vpc {id} to become available"),
        POLL_INTERVAL,
        VPC_CREATION_TIMEOUT,
        cancel,
        || async move { api.get_vpc(id).await.map_err(InfraError::from) },
        |v: &Vpc| {
            observed.record(&v.status);
            Ok(v.status == VPC_AVAILABLE_STATE)
        },
        TRANSIENT_ERROR_KEYWORDS,
    )
    .await
}

/// Add an inbound TCP rule for every ingress port the default security
/// group does not admit yet.
async fn ensure_ingress_rules(api: &dyn VpcService, vpc: &Vpc) -> Result<(), InfraError> {
    let Some(group_ref) = vpc.default_security_group.as_ref() else {
        return Err(InfraError::Policy(format!(
            "vpc {} has no default security group",
            vpc.name
        )));
    };
    let group = api.get_security_group(&group_ref.id).await?;
    for port in INGRESS_PORTS {
        if group.rules.iter().any(|rule| rule.admits_inbound_tcp(port)) {
            continue;
        }
        api.create_security_group_rule(&group.id, &SecurityGroupRule::inbound_tcp(port))
            .await?;
        info!(vpc = %vpc.name, port, "Added inbound security group rule");
    }
    Ok(())
}

/// Wait for a PowerVS job to complete.
///
/// # Errors
///
/// Returns [`InfraError::State`] when the job fails, or a timeout.
pub(crate) async fn monitor_job(
    powervs: &dyn PowerVsService,
    cancel: &CancellationToken,
    job_id: &str,
    timeout: Duration,
) -> Result<(), InfraError> {
    wait_for(
        format!("job {job_id} to complete"),
        POLL_INTERVAL,
        timeout,
        cancel,
        || async move { powervs.get_job(job_id).await.map_err(InfraError::from) },
        |job: &Job| match job.status.state.as_str() {
            JOB_COMPLETED_STATE => Ok(true),
            JOB_FAILED_STATE => Err(InfraError::State {
                kind: "job",
                name: job.id.clone(),
                state: format!("{JOB_FAILED_STATE}: {}", job.status.message),
            }),
            _ => Ok(false),
        },
        TRANSIENT_ERROR_KEYWORDS,
    )
    .await
    .map(|_| ())
}

#[cfg(test)]
#[path = "create_tests.rs"]
mod create_tests;
