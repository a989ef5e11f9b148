// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Teardown of PowerVS infrastructure.
//!
//! [`destroy_infra`] removes, in order, the wildcard DNS record, the
//! component ServiceIDs, the cloud connection, the VPC subnet (with the load
//! balancers the cloud controller placed on it), the VPC and the cloud
//! instance. Ids come from the infra record when one is given and are
//! otherwise discovered by canonical name. Every step runs even when an
//! earlier one failed; the failures are reported together.
//!
//! Resources the user supplied at create time are kept: a `--vpc` is never
//! deleted, a `--cloud-connection` is only unlinked from this cluster's VPC
//! and DHCP network, in a `--cloud-instance-id` only the DHCP server is
//! deleted, and a `--transit-gateway` is only looked up and reported.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::create::{apps_record_name, find_dns_records, lookup_base_domain, monitor_job};
use super::credentials::{delete_credentials, ServiceIdIssuer};
use super::infra::Infra;
use super::options::DestroyOptions;
use super::validators::{
    find_by_id, find_by_name, CloudConnections, CloudInstances, TransitGateways, Vpcs,
};
use super::{api_key_from_env, cloud_from_env, resource_name};
use crate::constants::{
    CLOUD_CONNECTION_NAME_SUFFIX, CLOUD_INSTANCE_DELETION_TIMEOUT, CLOUD_INSTANCE_NAME_SUFFIX,
    CLOUD_INSTANCE_REMOVED_STATE, DELETE_RETRY_ATTEMPTS, DHCP_DELETION_TIMEOUT, DHCP_ERROR_STATE,
    DHCP_SHUTOFF_STATE, POLL_INTERVAL, POWERVS_RESOURCE_DELETION_TIMEOUT, POWERVS_SERVICE,
    POWERVS_SERVICE_PLAN, TRANSIENT_ERROR_KEYWORDS, VPC_LB_NAME_PREFIX, VPC_NAME_SUFFIX,
    VPC_RESOURCE_DELETION_TIMEOUT, VPC_SUBNET_NAME_SUFFIX,
};
use crate::errors::{AggregateError, InfraError};
use crate::ibmcloud::{
    CloudConnectionVpcs, CloudError, CloudProvider, PowerVsService, ResourceInstanceQuery,
    SubnetQuery, UpdateCloudConnection, VpcService,
};
use crate::metrics::{self, InfraPhase};
use crate::paging::collect_all;
use crate::retry::{poll_fn, poll_until};

/// Message prefix of the aggregated destroy error.
const DESTROY_ERROR_MESSAGE: &str = "error in destroying infra";

/// Destroy the infrastructure of `options`, using `infra` for resource ids
/// when available.
///
/// # Errors
///
/// Returns every failure encountered, in order, as one [`AggregateError`].
pub async fn destroy_infra(
    cloud: &dyn CloudProvider,
    options: &DestroyOptions,
    infra: Option<&Infra>,
    cancel: &CancellationToken,
) -> Result<(), AggregateError> {
    let mut errors = AggregateError::new(DESTROY_ERROR_MESSAGE);
    if let Err(e) = options.validate() {
        errors.push(e);
        return Err(errors);
    }

    let record = infra.cloned().unwrap_or_else(|| Infra::new(&options.infra_id));
    let account_id = match non_empty(&record.account_id) {
        Some(id) => id.to_string(),
        None => match cloud.iam().account_id().await {
            Ok(id) => id,
            Err(e) => {
                errors.push(InfraError::from(e));
                return Err(errors);
            }
        },
    };
    let resource_group_id = match cloud
        .resource_manager()
        .resource_group_id(&options.resource_group, &account_id)
        .await
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            errors.push(InfraError::not_found("resource group", &options.resource_group));
            return Err(errors);
        }
        Err(e) => {
            errors.push(InfraError::from(e));
            return Err(errors);
        }
    };

    let mut teardown = Teardown {
        cloud,
        options,
        cancel,
        record,
        account_id,
        resource_group_id,
        errors,
    };
    teardown.run().await;
    teardown.errors.into_result()
}

/// Destroy against IBM Cloud with the API key from the environment, reading
/// the infra record from `options.infra_json` when set.
///
/// # Errors
///
/// Returns the aggregated failures of [`destroy_infra`], or a single error
/// when the record or the credentials cannot be loaded.
pub async fn run_destroy(options: &DestroyOptions, cancel: &CancellationToken) -> Result<(), AggregateError> {
    let setup = || -> Result<_, InfraError> {
        let record = options.infra_json.as_deref().map(Infra::read_json).transpose()?;
        let cloud = cloud_from_env(&api_key_from_env()?)?;
        Ok((record, cloud))
    };
    let (record, cloud) = match setup() {
        Ok(loaded) => loaded,
        Err(e) => {
            let mut errors = AggregateError::new(DESTROY_ERROR_MESSAGE);
            errors.push(e);
            return Err(errors);
        }
    };
    destroy_infra(&cloud, options, record.as_ref(), cancel).await
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

/// Treat "already gone" as success.
fn ignore_not_found<T>(result: Result<T, CloudError>) -> Result<Option<T>, InfraError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Run `delete` up to `attempts` times, sleeping between failures.
async fn delete_with_retry<F, Fut>(
    description: &str,
    attempts: usize,
    cancel: &CancellationToken,
    mut delete: F,
) -> Result<(), InfraError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), CloudError>>,
{
    let mut last_error = None;
    for attempt in 1..=attempts {
        match delete().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                warn!(resource = %description, attempt, error = %e, "Delete failed, retrying");
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            tokio::select! {
                () = cancel.cancelled() => return Err(InfraError::Cancelled),
                () = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }
    Err(last_error
        .map(InfraError::from)
        .unwrap_or_else(|| InfraError::Config(format!("no attempt made to delete {description}"))))
}

/// Poll `fetch` until the resource reports that it no longer exists.
async fn wait_gone<F, Fut, T>(
    description: String,
    timeout: Duration,
    cancel: &CancellationToken,
    mut fetch: F,
) -> Result<(), InfraError>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, CloudError>> + Send,
{
    let mut poll = poll_fn(description, move || {
        let pending = fetch();
        async move { ignore_not_found(pending.await).map(|found| found.is_none()) }
    });
    poll_until(POLL_INTERVAL, timeout, cancel, &mut poll, TRANSIENT_ERROR_KEYWORDS).await
}

struct Teardown<'a> {
    cloud: &'a dyn CloudProvider,
    options: &'a DestroyOptions,
    cancel: &'a CancellationToken,
    record: Infra,
    account_id: String,
    resource_group_id: String,
    errors: AggregateError,
}

impl Teardown<'_> {
    async fn run(&mut self) {
        let start = Instant::now();
        let outcome = self.delete_dns_record().await;
        self.settle("dns-record", start, outcome);

        let start = Instant::now();
        let outcome = self.delete_credentials().await;
        self.settle("credentials", start, outcome);

        let cloud_instance = match self.resolve_cloud_instance().await {
            Ok(guid) => guid,
            Err(e) => {
                self.errors.push(e);
                None
            }
        };

        if let Some(guid) = cloud_instance.as_deref() {
            let start = Instant::now();
            let outcome = self.delete_cloud_connection(guid).await;
            self.settle("cloud-connection", start, outcome);
        }

        if let Some(name) = self.options.transit_gateway.as_deref() {
            let start = Instant::now();
            let outcome = self.check_transit_gateway(name).await;
            self.settle("transit-gateway", start, outcome);
        }

        let start = Instant::now();
        let outcome = self.delete_vpc_subnets().await;
        self.settle("vpc-subnet", start, outcome);

        let start = Instant::now();
        let outcome = self.delete_vpc().await;
        self.settle("vpc", start, outcome);

        if let Some(guid) = cloud_instance.as_deref() {
            let start = Instant::now();
            let outcome = self.delete_cloud_instance(guid).await;
            self.settle("cloud-instance", start, outcome);
        }
    }

    /// Record a step's outcome and keep going.
    fn settle(&mut self, step: &str, start: Instant, outcome: Result<(), InfraError>) {
        metrics::record_infra_step(InfraPhase::Destroy, step, start.elapsed(), outcome.is_ok());
        if let Err(e) = outcome {
            warn!(step, error = %e, "Destroy step failed, continuing");
            self.errors.push(e);
        }
    }

    fn powervs(&self, guid: &str) -> Arc<dyn PowerVsService> {
        self.cloud
            .powervs(&self.options.region, &self.options.zone, guid, &self.account_id)
    }

    async fn delete_dns_record(&self) -> Result<(), InfraError> {
        let dns = self.cloud.dns();
        let (crn, zone_id) = match (non_empty(&self.record.cis_crn), non_empty(&self.record.cis_domain_id)) {
            (Some(crn), Some(zone)) => (crn.to_string(), zone.to_string()),
            _ => {
                lookup_base_domain(
                    self.cloud.resource_manager().as_ref(),
                    dns.as_ref(),
                    self.cancel,
                    &self.options.base_domain,
                )
                .await?
            }
        };

        let name = apps_record_name(&self.options.name, &self.options.base_domain);
        let records = find_dns_records(dns.as_ref(), self.cancel, &crn, &zone_id, &name).await?;
        let Some(record) = records.first() else {
            info!(record = %name, "No matching DNS Records present in CIS Domain");
            return Ok(());
        };
        ignore_not_found(dns.delete_dns_record(&crn, &zone_id, &record.id).await)?;
        info!(record = %name, id = %record.id, "Deleted DNS record");
        Ok(())
    }

    async fn delete_credentials(&self) -> Result<(), InfraError> {
        let iam = self.cloud.iam();
        let issuer = ServiceIdIssuer::new(
            iam.as_ref(),
            &self.account_id,
            &self.resource_group_id,
            self.cancel,
        );
        delete_credentials(&issuer, &self.options.infra_id).await
    }

    /// GUID of the cloud instance to clean up, if there is one.
    async fn resolve_cloud_instance(&self) -> Result<Option<String>, InfraError> {
        if let Some(guid) = non_empty(&self.record.powervs_cloud_instance_id) {
            return Ok(Some(guid.to_string()));
        }

        let resource_manager = self.cloud.resource_manager();
        let catalog = resource_manager
            .catalog_ids(POWERVS_SERVICE, Some(POWERVS_SERVICE_PLAN))
            .await?;
        let finder = CloudInstances::new(
            resource_manager.as_ref(),
            ResourceInstanceQuery {
                name: None,
                resource_group_id: Some(self.resource_group_id.clone()),
                resource_id: Some(catalog.service_id),
                resource_plan_id: catalog.plan_id,
            },
            &self.options.zone,
        );

        if let Some(id) = &self.options.cloud_instance_id {
            return Ok(Some(find_by_id(&finder, id).await?.guid));
        }

        let name = resource_name(&self.options.infra_id, CLOUD_INSTANCE_NAME_SUFFIX);
        match find_by_name(&finder, self.cancel, &name).await {
            Ok(instance) => Ok(Some(instance.guid)),
            Err(e) if e.is_not_found() => {
                info!(cloud_instance = %name, "No PowerVS Service Instance available to delete");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_cloud_connection(&self, guid: &str) -> Result<(), InfraError> {
        let powervs = self.powervs(guid);
        let powervs = powervs.as_ref();

        if let Some(name) = &self.options.cloud_connection {
            return self.unlink_cloud_connection(powervs, name).await;
        }

        let id = match non_empty(&self.record.powervs_cloud_connection_id) {
            Some(id) => id.to_string(),
            None => {
                let name = resource_name(&self.options.infra_id, CLOUD_CONNECTION_NAME_SUFFIX);
                match find_by_name(&CloudConnections::new(powervs), self.cancel, &name).await {
                    Ok(connection) => connection.cloud_connection_id,
                    Err(e) if e.is_not_found() => {
                        info!(cloud_connection = %name, "No cloud connection available to delete");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let Some(job) = ignore_not_found(powervs.delete_cloud_connection(&id).await)? else {
            return Ok(());
        };
        monitor_job(powervs, self.cancel, &job.id, POWERVS_RESOURCE_DELETION_TIMEOUT).await?;
        info!(cloud_connection = %id, "Deleted cloud connection");
        Ok(())
    }

    /// Detach this cluster's VPC and DHCP network from a user-supplied
    /// cloud connection.
    async fn unlink_cloud_connection(&self, powervs: &dyn PowerVsService, name: &str) -> Result<(), InfraError> {
        let connection = match find_by_name(&CloudConnections::new(powervs), self.cancel, name).await {
            Ok(connection) => connection,
            Err(e) if e.is_not_found() => {
                info!(cloud_connection = %name, "Cloud connection not found, nothing to unlink");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let id = connection.cloud_connection_id.as_str();

        let ours = self.vpc_names();
        if let Some(attached) = &connection.vpc {
            let kept: Vec<_> = attached
                .vpcs
                .iter()
                .filter(|v| {
                    !(ours.iter().any(|n| n == &v.name)
                        || (!self.record.vpc_crn.is_empty() && v.vpc_id == self.record.vpc_crn))
                })
                .cloned()
                .collect();
            if kept.len() != attached.vpcs.len() {
                let update = UpdateCloudConnection {
                    global_routing: None,
                    vpc: Some(CloudConnectionVpcs {
                        enabled: attached.enabled,
                        vpcs: kept,
                    }),
                };
                if let Some(job) = powervs.update_cloud_connection(id, &update).await? {
                    monitor_job(powervs, self.cancel, &job.id, POWERVS_RESOURCE_DELETION_TIMEOUT).await?;
                }
                info!(cloud_connection = %name, "Detached VPC from cloud connection");
            }
        }

        let networks = connection.networks.iter().filter(|n| match non_empty(&self.record.powervs_dhcp_subnet_id) {
            Some(network_id) => n.network_id == network_id,
            None => {
                let lower = n.name.to_lowercase();
                lower.contains("dhcp") && lower.contains("private")
            }
        });
        for network in networks {
            if let Some(job) = ignore_not_found(powervs.remove_network(id, &network.network_id).await)? {
                monitor_job(powervs, self.cancel, &job.id, POWERVS_RESOURCE_DELETION_TIMEOUT).await?;
            }
            info!(cloud_connection = %name, network = %network.name, "Detached network from cloud connection");
        }
        Ok(())
    }

    /// Names this cluster's VPC may carry.
    /// Look up the user's transit gateway, which outlives the cluster.
    async fn check_transit_gateway(&self, name: &str) -> Result<(), InfraError> {
        let api = self.cloud.transit_gateway();
        let finder = TransitGateways::new(api.as_ref(), self.options.transit_gateway_location.as_deref());
        match find_by_name(&finder, self.cancel, name).await {
            Ok(gateway) => {
                info!(
                    transit_gateway = %gateway.name,
                    id = %gateway.id,
                    status = %gateway.status,
                    "Keeping user transit gateway"
                );
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!(transit_gateway = %name, "User transit gateway not found");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn vpc_names(&self) -> Vec<String> {
        let mut names = vec![resource_name(&self.options.infra_id, VPC_NAME_SUFFIX)];
        names.extend(self.options.vpc.clone());
        if !self.record.vpc_name.is_empty() {
            names.push(self.record.vpc_name.clone());
        }
        names
    }

    async fn delete_vpc_subnets(&self) -> Result<(), InfraError> {
        let api = self.cloud.vpc(&self.options.vpc_region);
        let api = api.as_ref();

        let subnet_ids = match non_empty(&self.record.vpc_subnet_id) {
            Some(id) => vec![id.to_string()],
            None => {
                let query = SubnetQuery {
                    resource_group_id: Some(self.resource_group_id.clone()),
                    routing_table_id: None,
                };
                let query = &query;
                let vpc_name = resource_name(&self.options.infra_id, VPC_NAME_SUFFIX);
                let subnet_name = resource_name(&self.options.infra_id, VPC_SUBNET_NAME_SUFFIX);
                collect_all(self.cancel, |start| async move { api.list_subnets(query, start.as_deref()).await })
                    .await?
                    .into_iter()
                    .filter(|s| s.zone.name.contains(&self.options.vpc_region))
                    .filter(|s| s.vpc.name == vpc_name || s.name == subnet_name)
                    .map(|s| s.id)
                    .collect()
            }
        };
        if subnet_ids.is_empty() {
            info!("No VPC subnet available to delete");
        }

        for id in &subnet_ids {
            self.delete_load_balancers(api, id).await?;
            let id = id.as_str();
            if ignore_not_found(api.delete_subnet(id).await)?.is_none() {
                continue;
            }
            wait_gone(
                format!("vpc subnet {id} to be deleted"),
                VPC_RESOURCE_DELETION_TIMEOUT,
                self.cancel,
                move || api.get_subnet(id),
            )
            .await?;
            info!(subnet = %id, "Deleted VPC subnet");
        }
        Ok(())
    }

    /// Delete the cloud-controller load balancers of this cluster attached
    /// to the subnet.
    async fn delete_load_balancers(&self, api: &dyn VpcService, subnet_id: &str) -> Result<(), InfraError> {
        let prefix = format!("{VPC_LB_NAME_PREFIX}-{}", self.options.name);
        let load_balancers = collect_all(self.cancel, |start| async move {
            api.list_load_balancers(start.as_deref()).await
        })
        .await?;

        for lb in load_balancers
            .iter()
            .filter(|lb| lb.name.starts_with(&prefix) && lb.subnets.iter().any(|s| s.id == subnet_id))
        {
            let id = lb.id.as_str();
            delete_with_retry(&lb.name, DELETE_RETRY_ATTEMPTS, self.cancel, || api.delete_load_balancer(id)).await?;
            wait_gone(
                format!("load balancer {} to be deleted", lb.name),
                VPC_RESOURCE_DELETION_TIMEOUT,
                self.cancel,
                move || api.get_load_balancer(id),
            )
            .await?;
            info!(load_balancer = %lb.name, "Deleted load balancer");
        }
        Ok(())
    }

    async fn delete_vpc(&self) -> Result<(), InfraError> {
        let canonical = resource_name(&self.options.infra_id, VPC_NAME_SUFFIX);
        if self.options.vpc.is_some()
            || (!self.record.vpc_name.is_empty() && self.record.vpc_name != canonical)
        {
            info!(vpc = %self.record.vpc_name, "Keeping user-supplied VPC");
            return Ok(());
        }

        let api = self.cloud.vpc(&self.options.vpc_region);
        let api = api.as_ref();
        let id = match non_empty(&self.record.vpc_id) {
            Some(id) => id.to_string(),
            None => {
                let finder = Vpcs::new(api, &self.options.vpc_region, Some(&self.resource_group_id));
                match find_by_name(&finder, self.cancel, &canonical).await {
                    Ok(vpc) => vpc.id,
                    Err(e) if e.is_not_found() => {
                        info!(vpc = %canonical, "No VPC available to delete");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let id = id.as_str();
        if ignore_not_found(api.delete_vpc(id).await)?.is_none() {
            return Ok(());
        }
        wait_gone(
            format!("vpc {id} to be deleted"),
            VPC_RESOURCE_DELETION_TIMEOUT,
            self.cancel,
            move || api.get_vpc(id),
        )
        .await?;
        info!(vpc = %id, "Deleted VPC");
        Ok(())
    }

    async fn delete_cloud_instance(&self, guid: &str) -> Result<(), InfraError> {
        if self.options.cloud_instance_id.is_some() {
            return self.delete_dhcp_server(guid).await;
        }

        let resource_manager = self.cloud.resource_manager();
        let api = resource_manager.as_ref();
        delete_with_retry(guid, DELETE_RETRY_ATTEMPTS, self.cancel, || api.delete_resource_instance(guid)).await?;

        let mut poll = poll_fn(format!("cloud instance {guid} to be removed"), move || async move {
            ignore_not_found(api.get_resource_instance(guid).await)
                .map(|found| found.is_none_or(|instance| instance.state == CLOUD_INSTANCE_REMOVED_STATE))
        });
        poll_until(
            POLL_INTERVAL,
            CLOUD_INSTANCE_DELETION_TIMEOUT,
            self.cancel,
            &mut poll,
            TRANSIENT_ERROR_KEYWORDS,
        )
        .await?;
        info!(cloud_instance = %guid, "Deleted cloud instance");
        Ok(())
    }

    /// Delete only this cluster's DHCP server from a user-supplied cloud
    /// instance.
    async fn delete_dhcp_server(&self, guid: &str) -> Result<(), InfraError> {
        let powervs = self.powervs(guid);
        let powervs = powervs.as_ref();

        let id = match non_empty(&self.record.powervs_dhcp_id) {
            Some(id) => id.to_string(),
            None => match powervs.list_dhcp_servers().await?.into_iter().next() {
                Some(server) => server.id,
                None => {
                    info!(cloud_instance = %guid, "No DHCP server available to delete");
                    return Ok(());
                }
            },
        };

        let id = id.as_str();
        if ignore_not_found(powervs.delete_dhcp_server(id).await)?.is_none() {
            return Ok(());
        }

        // The DHCP server is backed by a PVM instance that outlives the
        // delete call.
        let mut poll = poll_fn(format!("dhcp server {id} to be deleted"), move || async move {
            ignore_not_found(powervs.get_pvm_instance(id).await).map(|found| {
                found.is_none_or(|instance| {
                    instance.status == DHCP_SHUTOFF_STATE || instance.status == DHCP_ERROR_STATE
                })
            })
        });
        poll_until(
            POLL_INTERVAL,
            DHCP_DELETION_TIMEOUT,
            self.cancel,
            &mut poll,
            TRANSIENT_ERROR_KEYWORDS,
        )
        .await?;
        info!(dhcp_server = %id, "Deleted DHCP server");
        Ok(())
    }
}

#[cfg(test)]
#[path = "destroy_tests.rs"]
mod destroy_tests;
