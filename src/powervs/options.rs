// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Options for `create infra powervs` and `destroy infra powervs`.
//!
//! Both structs derive [`clap::Args`] so the CLI flags and the library
//! options are the same type.

use std::path::PathBuf;

use clap::Args;

use crate::errors::InfraError;

/// Options for creating PowerVS infrastructure.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    /// A name for the cluster
    #[arg(long, default_value = "example")]
    pub name: String,

    /// Namespace the hosted cluster and its credential secrets live in
    #[arg(long, default_value = "clusters")]
    pub namespace: String,

    /// IBM Cloud CIS domain
    #[arg(long)]
    pub base_domain: String,

    /// IBM Cloud resource group
    #[arg(long)]
    pub resource_group: String,

    /// Cluster id with which to tag IBM Cloud resources
    #[arg(long)]
    pub infra_id: String,

    /// IBM Cloud PowerVS region
    #[arg(long, default_value = "us-south")]
    pub region: String,

    /// IBM Cloud PowerVS zone
    #[arg(long, default_value = "us-south")]
    pub zone: String,

    /// Existing PowerVS cloud instance id to use instead of creating one
    #[arg(long)]
    pub cloud_instance_id: Option<String>,

    /// IBM Cloud VPC region for VPC resources
    #[arg(long, default_value = "us-south")]
    pub vpc_region: String,

    /// Existing VPC name to use instead of creating one
    #[arg(long)]
    pub vpc: Option<String>,

    /// Existing cloud connection name to use instead of creating one
    #[arg(long)]
    pub cloud_connection: Option<String>,

    /// Path to a file that will contain the infra record as JSON
    #[arg(long)]
    pub output_file: Option<PathBuf>,

    /// Delete and re-issue component credentials that already exist
    #[arg(long)]
    pub recreate_secrets: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            name: "example".to_string(),
            namespace: "clusters".to_string(),
            base_domain: String::new(),
            resource_group: String::new(),
            infra_id: String::new(),
            region: "us-south".to_string(),
            zone: "us-south".to_string(),
            cloud_instance_id: None,
            vpc_region: "us-south".to_string(),
            vpc: None,
            cloud_connection: None,
            output_file: None,
            recreate_secrets: false,
            debug: false,
        }
    }
}

impl CreateOptions {
    /// Check that the required options are set.
    ///
    /// # Errors
    ///
    /// Returns [`InfraError::Config`] naming the first missing option.
    pub fn validate(&self) -> Result<(), InfraError> {
        require("infra-id", &self.infra_id)?;
        require("resource-group", &self.resource_group)?;
        require("base-domain", &self.base_domain)
    }
}

/// Options for destroying PowerVS infrastructure.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct DestroyOptions {
    /// Name of the cluster
    #[arg(long, default_value = "example")]
    pub name: String,

    /// IBM Cloud CIS domain
    #[arg(long)]
    pub base_domain: String,

    /// IBM Cloud resource group
    #[arg(long)]
    pub resource_group: String,

    /// Cluster id with which the IBM Cloud resources were tagged
    #[arg(long)]
    pub infra_id: String,

    /// IBM Cloud PowerVS region
    #[arg(long, default_value = "us-south")]
    pub region: String,

    /// IBM Cloud PowerVS zone
    #[arg(long, default_value = "us-south")]
    pub zone: String,

    /// User-supplied PowerVS cloud instance id, which is kept
    #[arg(long)]
    pub cloud_instance_id: Option<String>,

    /// IBM Cloud VPC region
    #[arg(long, default_value = "us-south")]
    pub vpc_region: String,

    /// User-supplied VPC name, which is kept
    #[arg(long)]
    pub vpc: Option<String>,

    /// User-supplied cloud connection name, which is unlinked instead of deleted
    #[arg(long)]
    pub cloud_connection: Option<String>,

    /// User-supplied transit gateway name, which is kept
    #[arg(long)]
    pub transit_gateway: Option<String>,

    /// Location of the user-supplied transit gateway
    #[arg(long)]
    pub transit_gateway_location: Option<String>,

    /// Path to the infra record written by create
    #[arg(long)]
    pub infra_json: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Default for DestroyOptions {
    fn default() -> Self {
        Self {
            name: "example".to_string(),
            base_domain: String::new(),
            resource_group: String::new(),
            infra_id: String::new(),
            region: "us-south".to_string(),
            zone: "us-south".to_string(),
            cloud_instance_id: None,
            vpc_region: "us-south".to_string(),
            vpc: None,
            cloud_connection: None,
            transit_gateway: None,
            transit_gateway_location: None,
            infra_json: None,
            debug: false,
        }
    }
}

impl DestroyOptions {
    /// Check that the required options are set.
    ///
    /// # Errors
    ///
    /// Returns [`InfraError::Config`] naming the first missing option.
    pub fn validate(&self) -> Result<(), InfraError> {
        require("infra-id", &self.infra_id)?;
        require("resource-group", &self.resource_group)?;
        require("base-domain", &self.base_domain)?;
        require("name", &self.name)?;
        require("region", &self.region)?;
        require("zone", &self.zone)?;
        require("vpc-region", &self.vpc_region)
    }
}

fn require(flag: &str, value: &str) -> Result<(), InfraError> {
    if value.trim().is_empty() {
        return Err(InfraError::Config(format!("--{flag} is required")));
    }
    Ok(())
}

impl From<&CreateOptions> for DestroyOptions {
    /// Destroy options matching a create run, used to clean up a failed create.
    fn from(create: &CreateOptions) -> Self {
        Self {
            name: create.name.clone(),
            base_domain: create.base_domain.clone(),
            resource_group: create.resource_group.clone(),
            infra_id: create.infra_id.clone(),
            region: create.region.clone(),
            zone: create.zone.clone(),
            cloud_instance_id: create.cloud_instance_id.clone(),
            vpc_region: create.vpc_region.clone(),
            vpc: create.vpc.clone(),
            cloud_connection: create.cloud_connection.clone(),
            transit_gateway: None,
            transit_gateway_location: None,
            infra_json: create.output_file.clone(),
            debug: create.debug,
        }
    }
}
