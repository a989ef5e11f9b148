// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! PowerVS infrastructure for hosted clusters.
//!
//! A hosted cluster on PowerVS needs a VPC with a subnet for its load
//! balancers, a PowerVS workspace (cloud instance) with a DHCP server for its
//! nodes, a cloud connection linking the two, and an IAM ServiceID per
//! in-cluster component. [`create::setup_infra`] provisions all of it and
//! returns an [`infra::Infra`] record; [`destroy::destroy_infra`] tears it
//! down again, either from that record or by naming convention.
//!
//! Every step validates an existing resource (by canonical name or
//! user-supplied override) before creating one, so re-running a failed create
//! resumes where it stopped.

use std::path::Path;

use crate::constants::{ENV_API_KEY, ENV_CREDENTIALS_FILE, UNSUPPORTED_POWERVS_ZONES};
use crate::errors::InfraError;
use crate::ibmcloud::{Endpoints, IbmCloud};

pub mod create;
pub mod credentials;
pub mod destroy;
pub mod infra;
pub mod options;
pub mod validators;

pub use create::{create_infra, setup_infra};
pub use destroy::{destroy_infra, run_destroy};
pub use infra::{Infra, Secrets, Stat, Stats};
pub use options::{CreateOptions, DestroyOptions};

/// Message returned when neither API key source is set.
const API_KEY_NOT_SET: &str = "cloud API Key not set. Set it with IBMCLOUD_API_KEY env var or set file path containing API Key credential in IBMCLOUD_CREDENTIALS";

/// Resolve the IBM Cloud API key from the environment.
///
/// # Errors
///
/// Returns [`InfraError::Config`] when no key is configured or the
/// credentials file cannot be read.
pub fn api_key_from_env() -> Result<String, InfraError> {
    resolve_api_key(
        std::env::var(ENV_API_KEY).ok().as_deref(),
        std::env::var(ENV_CREDENTIALS_FILE).ok().as_deref(),
    )
}

/// Pick the API key: the key itself when non-empty, else the trimmed
/// contents of the credentials file.
///
/// # Errors
///
/// Returns [`InfraError::Config`] when both sources are empty or the file
/// cannot be read.
pub fn resolve_api_key(
    api_key: Option<&str>,
    credentials_file: Option<&str>,
) -> Result<String, InfraError> {
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    let key = match credentials_file.filter(|f| !f.is_empty()) {
        Some(file) => std::fs::read_to_string(Path::new(file))
            .map_err(|e| {
                InfraError::Config(format!(
                    "error reading from {ENV_CREDENTIALS_FILE} file {file}: {e}"
                ))
            })?
            .trim()
            .to_string(),
        None => String::new(),
    };

    if key.is_empty() {
        return Err(InfraError::Config(API_KEY_NOT_SET.to_string()));
    }
    Ok(key)
}

/// Reject zones where the infrastructure cannot be created.
///
/// # Errors
///
/// Returns [`InfraError::UnsupportedZone`] for zones on the deny list.
pub fn check_supported_zone(zone: &str) -> Result<(), InfraError> {
    if UNSUPPORTED_POWERVS_ZONES.contains(&zone) {
        return Err(InfraError::UnsupportedZone(zone.to_string()));
    }
    Ok(())
}

/// HTTP cloud client for `api_key`, honouring the endpoint override
/// environment variables.
///
/// # Errors
///
/// Returns [`InfraError::Cloud`] when the HTTP client cannot be built.
pub fn cloud_from_env(api_key: &str) -> Result<IbmCloud, InfraError> {
    Ok(IbmCloud::with_endpoints(api_key, Endpoints::from_env())?)
}

/// Canonical `<infraId>-<suffix>` resource name.
#[must_use]
pub fn resource_name(infra_id: &str, suffix: &str) -> String {
    format!("{infra_id}-{suffix}")
}

/// Tags attached to every resource the orchestrator creates.
#[must_use]
pub fn resource_tags(infra_id: &str, name: &str) -> Vec<String> {
    vec![
        format!("kubernetes.io-cluster-{infra_id}:owned"),
        format!("Name:{name}"),
    ]
}
