// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! EC2 instance-type capacity lookups.
//!
//! The machine deployment enricher needs the vCPU, memory, GPU count and CPU
//! architecture of the instance type behind every `AWSMachineTemplate`.
//! `DescribeInstanceTypes` returns several hundred entries per region, so the
//! whole region is fetched once and kept for [`INSTANCE_TYPE_CACHE_TTL`].
//!
//! Readers share a `tokio::sync::RwLock`. A reader that finds the region
//! missing or stale takes the write lock and re-checks freshness before
//! calling the catalog, so concurrent cold reads trigger a single fetch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::{GpuInfo, InstanceTypeInfo as Ec2InstanceTypeInfo};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::constants::{INSTANCE_TYPE_CACHE_TTL, INSTANCE_TYPE_MAX_PAGES, INSTANCE_TYPE_PAGE_SIZE};
use crate::errors::ReconcileError;
use crate::metrics;

/// Normalized `amd64` architecture
pub const ARCH_AMD64: &str = "amd64";

/// Normalized `arm64` architecture
pub const ARCH_ARM64: &str = "arm64";

/// Capacity of one instance type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceTypeInfo {
    pub instance_type: String,
    pub vcpu: i32,
    pub memory_mib: i64,
    pub gpu: i32,
    /// Normalized CPU architecture, `amd64` or `arm64`.
    pub arch: String,
}

/// Source of instance-type capacity for a region.
#[async_trait]
pub trait InstanceTypeCatalog: Send + Sync {
    /// All instance types offered in `region`, keyed by type name.
    async fn fetch(&self, region: &str) -> Result<HashMap<String, InstanceTypeInfo>, ReconcileError>;
}

/// Map an EC2 architecture name onto the Kubernetes `kubernetes.io/arch` value.
///
/// Unknown architectures fall back to `amd64`.
#[must_use]
pub fn normalize_arch(arch: &str) -> &'static str {
    match arch.to_ascii_lowercase().as_str() {
        "arm64" | "aarch64" => ARCH_ARM64,
        _ => ARCH_AMD64,
    }
}

/// Sum of the GPU counts of every accelerator model, skipping unset counts.
#[must_use]
pub fn gpu_count(info: &GpuInfo) -> i32 {
    info.gpus().iter().filter_map(|g| g.count()).sum()
}

fn convert(info: &Ec2InstanceTypeInfo) -> Option<InstanceTypeInfo> {
    let name = info.instance_type()?.as_str().to_string();
    let arch = info
        .processor_info()
        .and_then(|p| p.supported_architectures().first())
        .map_or(ARCH_AMD64, |a| normalize_arch(a.as_str()));

    Some(InstanceTypeInfo {
        instance_type: name,
        vcpu: info.v_cpu_info().and_then(|v| v.default_v_cpus()).unwrap_or(0),
        memory_mib: info.memory_info().and_then(|m| m.size_in_mib()).unwrap_or(0),
        gpu: info.gpu_info().map_or(0, gpu_count),
        arch: arch.to_string(),
    })
}

/// [`InstanceTypeCatalog`] backed by the EC2 API.
///
/// Credentials come from the default AWS provider chain
/// (`AWS_SHARED_CREDENTIALS_FILE`, environment, instance profile).
#[derive(Default)]
pub struct Ec2Catalog;

#[async_trait]
impl InstanceTypeCatalog for Ec2Catalog {
    async fn fetch(&self, region: &str) -> Result<HashMap<String, InstanceTypeInfo>, ReconcileError> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        let client = aws_sdk_ec2::Client::new(&sdk_config);

        collect_pages(region, INSTANCE_TYPE_MAX_PAGES, |next_token| {
            let request = client
                .describe_instance_types()
                .max_results(INSTANCE_TYPE_PAGE_SIZE)
                .set_next_token(next_token);
            async move {
                let output = request.send().await.map_err(|e| {
                    ReconcileError::InstanceType(format!(
                        "failed to describe instance types in {region}: {}",
                        DisplayErrorContext(&e)
                    ))
                })?;
                let types = output.instance_types().iter().filter_map(convert).collect();
                Ok((types, output.next_token().map(str::to_string)))
            }
        })
        .await
    }
}

/// Drive `fetch_page` from the first page until the catalog stops returning
/// a continuation token or `max_pages` pages have been read.
///
/// # Errors
///
/// Returns the first error of `fetch_page`.
pub async fn collect_pages<F, Fut>(
    region: &str,
    max_pages: usize,
    mut fetch_page: F,
) -> Result<HashMap<String, InstanceTypeInfo>, ReconcileError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(Vec<InstanceTypeInfo>, Option<String>), ReconcileError>>,
{
    let mut types = HashMap::new();
    let mut next_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let (page, token) = fetch_page(next_token.take()).await?;
        pages += 1;
        for info in page {
            types.insert(info.instance_type.clone(), info);
        }

        match token {
            Some(token) if !token.is_empty() => {
                if pages >= max_pages {
                    warn!(region = %region, pages, "Instance type page limit reached, keeping partial catalog");
                    break;
                }
                next_token = Some(token);
            }
            _ => break,
        }
    }

    debug!(region = %region, pages, count = types.len(), "Fetched EC2 instance types");
    Ok(types)
}

struct RegionEntry {
    fetched_at: Instant,
    types: HashMap<String, InstanceTypeInfo>,
}

/// Per-region instance-type cache.
pub struct InstanceTypeCache {
    catalog: Arc<dyn InstanceTypeCatalog>,
    ttl: Duration,
    regions: RwLock<HashMap<String, RegionEntry>>,
}

impl InstanceTypeCache {
    #[must_use]
    pub fn new(catalog: Arc<dyn InstanceTypeCatalog>) -> Self {
        Self::with_ttl(catalog, INSTANCE_TYPE_CACHE_TTL)
    }

    #[must_use]
    pub fn with_ttl(catalog: Arc<dyn InstanceTypeCatalog>, ttl: Duration) -> Self {
        Self {
            catalog,
            ttl,
            regions: RwLock::new(HashMap::new()),
        }
    }

    fn lookup(entry: &RegionEntry, region: &str, instance_type: &str) -> Result<InstanceTypeInfo, ReconcileError> {
        entry
            .types
            .get(instance_type)
            .cloned()
            .ok_or_else(|| ReconcileError::UnknownInstanceType {
                instance_type: instance_type.to_string(),
                region: region.to_string(),
            })
    }

    fn is_fresh(&self, entry: &RegionEntry) -> bool {
        entry.fetched_at.elapsed() < self.ttl
    }

    /// Capacity of `instance_type` in `region`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::InstanceType`] when the catalog fails and
    /// [`ReconcileError::UnknownInstanceType`] when the region does not offer
    /// the type.
    pub async fn get(&self, region: &str, instance_type: &str) -> Result<InstanceTypeInfo, ReconcileError> {
        {
            let regions = self.regions.read().await;
            if let Some(entry) = regions.get(region) {
                if self.is_fresh(entry) {
                    return Self::lookup(entry, region, instance_type);
                }
            }
        }

        let mut regions = self.regions.write().await;
        // Another reader may have refreshed the region while we waited
        if let Some(entry) = regions.get(region) {
            if self.is_fresh(entry) {
                return Self::lookup(entry, region, instance_type);
            }
        }

        let fetched = self.catalog.fetch(region).await;
        metrics::record_instance_type_fetch(region, fetched.is_ok());
        let types = fetched?;
        info!(region = %region, count = types.len(), "Refreshed instance type cache");
        let entry = RegionEntry {
            fetched_at: Instant::now(),
            types,
        };
        let result = Self::lookup(&entry, region, instance_type);
        regions.insert(region.to_string(), entry);
        result
    }
}

/// True when an instance-type error is a permanent unknown-type outcome.
#[must_use]
pub fn is_unknown_instance_type(err: &ReconcileError) -> bool {
    matches!(err, ReconcileError::UnknownInstanceType { .. })
}

#[cfg(test)]
#[path = "instance_types_tests.rs"]
mod instance_types_tests;
