// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The infra record written by create and read by destroy.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use serde::{Deserialize, Serialize};

use crate::errors::InfraError;

/// Ids of everything a create run set up or reused.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Infra {
    pub id: String,
    #[serde(rename = "accountID")]
    pub account_id: String,
    #[serde(rename = "cisCrn")]
    pub cis_crn: String,
    #[serde(rename = "cisDomainID")]
    pub cis_domain_id: String,
    #[serde(rename = "resourceGroupID")]
    pub resource_group_id: String,
    pub region: String,
    pub zone: String,
    #[serde(rename = "powerVSCloudInstanceID")]
    pub powervs_cloud_instance_id: String,
    #[serde(rename = "powerVSDhcpSubnet")]
    pub powervs_dhcp_subnet: String,
    #[serde(rename = "powerVSDhcpSubnetID")]
    pub powervs_dhcp_subnet_id: String,
    #[serde(rename = "powerVSDhcpID")]
    pub powervs_dhcp_id: String,
    #[serde(rename = "powerVSCloudConnectionID")]
    pub powervs_cloud_connection_id: String,
    #[serde(rename = "vpcName")]
    pub vpc_name: String,
    #[serde(rename = "vpcID")]
    pub vpc_id: String,
    #[serde(rename = "vpcCrn")]
    pub vpc_crn: String,
    #[serde(rename = "vpcRoutingTableID")]
    pub vpc_routing_table_id: String,
    #[serde(rename = "vpcSubnetName")]
    pub vpc_subnet_name: String,
    #[serde(rename = "vpcSubnetID")]
    pub vpc_subnet_id: String,
    pub stats: Stats,
    pub secrets: Secrets,
}

/// Duration and final status of each step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Stats {
    pub vpc: Stat,
    pub vpc_subnet: Stat,
    pub cloud_instance: Stat,
    pub dhcp_service: Stat,
    pub cloud_conn_state: Stat,
}

/// Timing of one step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Stat {
    /// Rendered as e.g. `"1.5s"` or `"2m3s"`
    #[serde(with = "human_duration")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
}

/// Credential secrets issued for the in-cluster components.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Secrets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kube_cloud_controller_creds: Option<Secret>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_pool_management_creds: Option<Secret>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_operator_cloud_creds: Option<Secret>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_operator_cloud_creds: Option<Secret>,
}

impl Infra {
    /// Empty record for `infra_id`.
    #[must_use]
    pub fn new(infra_id: &str) -> Self {
        Self {
            id: infra_id.to_string(),
            ..Self::default()
        }
    }

    /// Write the record as two-space indented JSON to `path`, or to stdout
    /// when no path is given.
    ///
    /// # Errors
    ///
    /// Returns [`InfraError::Io`] or [`InfraError::Json`] when the record
    /// cannot be serialized or written.
    pub fn write_json(&self, path: Option<&Path>) -> Result<(), InfraError> {
        let json = serde_json::to_string_pretty(self)?;
        match path {
            Some(path) => std::fs::write(path, json)?,
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(json.as_bytes())?;
                stdout.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    /// Read a record previously written by [`Infra::write_json`].
    ///
    /// # Errors
    ///
    /// Returns [`InfraError::Io`] or [`InfraError::Json`] when the file
    /// cannot be read or decoded.
    pub fn read_json(path: &Path) -> Result<Self, InfraError> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// Render a duration the way Go's `time.Duration` prints, rounded to the
/// millisecond: `0s`, `150ms`, `1.5s`, `2m3s`, `1h0m5s`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let ms = (duration.as_micros() + 500) / 1000;
    if ms == 0 {
        return "0s".to_string();
    }
    if ms < 1000 {
        return format!("{ms}ms");
    }

    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    let millis = ms % 1000;

    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{hours}h");
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{minutes}m");
    }
    if millis == 0 {
        let _ = write!(out, "{seconds}s");
    } else {
        let fraction = format!("{millis:03}");
        let _ = write!(out, "{seconds}.{}s", fraction.trim_end_matches('0'));
    }
    out
}

/// Parse a Go-style duration such as `1h2m3.5s` or `150ms`.
///
/// # Errors
///
/// Returns [`InfraError::Parse`] for malformed input or unknown units.
pub fn parse_duration(text: &str) -> Result<Duration, InfraError> {
    let invalid = || InfraError::Parse(format!("invalid duration {text:?}"));
    let text = text.trim();
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.is_empty() {
        return Err(invalid());
    }

    let mut seconds = 0f64;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = number.parse().map_err(|_| invalid())?;
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 1e-3,
            "us" | "µs" => 1e-6,
            "ns" => 1e-9,
            _ => return Err(invalid()),
        };
        seconds += value * scale;
        rest = tail;
    }
    Ok(Duration::from_secs_f64(seconds))
}

mod human_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "infra_tests.rs"]
mod infra_tests;
