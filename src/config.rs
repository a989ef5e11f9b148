// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command-line configuration of the operator binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;

use crate::constants::{DEFAULT_METRICS_ADDR, DEFAULT_WEBHOOK_ADDR, ENV_DH_PARAMS};

/// Hosted control plane operator
#[derive(Parser, Debug, Clone)]
#[command(name = "hostedcp-operator", version, about, long_about = None)]
pub struct OperatorConfig {
    /// Directory holding the control plane manifest templates
    #[arg(long, env = "HOSTEDCP_MANIFESTS_DIR", default_value = "/etc/hostedcp/manifests")]
    pub manifests_dir: PathBuf,

    /// YAML catalog mapping release images to versions and component images
    #[arg(long, env = "HOSTEDCP_RELEASE_INFO", default_value = "/etc/hostedcp/releases.yaml")]
    pub release_info: PathBuf,

    /// Listen address of the admission webhook
    #[arg(long, default_value = DEFAULT_WEBHOOK_ADDR)]
    pub webhook_addr: SocketAddr,

    /// PEM certificate served by the admission webhook
    #[arg(long, requires = "webhook_key")]
    pub webhook_cert: Option<PathBuf>,

    /// PEM private key of the admission webhook certificate
    #[arg(long, requires = "webhook_cert")]
    pub webhook_key: Option<PathBuf>,

    /// Listen address of `/metrics` and `/healthz`
    #[arg(long, default_value = DEFAULT_METRICS_ADDR)]
    pub metrics_addr: SocketAddr,

    /// Pre-generated Diffie-Hellman parameters used by the PKI
    #[arg(long, env = ENV_DH_PARAMS)]
    pub dh_params: Option<PathBuf>,
}

impl OperatorConfig {
    /// Certificate and key of the webhook, when both are configured.
    #[must_use]
    pub fn webhook_tls(&self) -> Option<(&Path, &Path)> {
        match (&self.webhook_cert, &self.webhook_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
