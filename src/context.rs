// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for all controllers.
//!
//! All controllers receive an `Arc<Context>` that contains:
//! - Kubernetes client
//! - Reflector store of node pools, read by the sizing scheduler and the
//!   machine deployment enricher without API round trips
//! - Release metadata provider and manifest templates for the control plane
//! - Instance-type cache shared by every machine deployment reconcile
//! - Per-object error backoff used by the controllers' error policies

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use kube::runtime::reflector::{ObjectRef, Store};
use kube::Client;

use crate::constants::{ERROR_BACKOFF_INITIAL, ERROR_BACKOFF_MAX};
use crate::crd::NodePool;
use crate::reconcilers::instance_types::InstanceTypeCache;
use crate::release::ReleaseProvider;
use crate::render::TemplateSource;
use crate::retry::ExponentialBackoff;

/// Shared context passed to all controllers.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client for API operations
    pub client: Client,

    /// Reflector stores for cross-controller queries
    pub stores: Stores,

    /// Resolves release images to component versions and images
    pub releases: Arc<dyn ReleaseProvider>,

    /// Control plane manifest templates
    pub templates: TemplateSource,

    /// Pre-generated DH parameters handed to PKI generation
    pub dh_params: Option<PathBuf>,

    /// EC2 instance-type capacity, cached per region
    pub instance_types: Arc<InstanceTypeCache>,

    /// Per-object requeue delays after failed reconciles
    pub backoff: ErrorBackoff,
}

/// Collection of reflector stores.
#[derive(Clone)]
pub struct Stores {
    pub node_pools: Store<NodePool>,
}

impl Stores {
    /// Node pools of the hosted cluster `cluster_name` in `namespace`.
    #[must_use]
    pub fn node_pools_for_cluster(&self, namespace: &str, cluster_name: &str) -> Vec<Arc<NodePool>> {
        self.node_pools
            .state()
            .into_iter()
            .filter(|np| {
                np.metadata.namespace.as_deref() == Some(namespace)
                    && np.spec.cluster_name == cluster_name
            })
            .collect()
    }

    /// Node pool by name and namespace.
    #[must_use]
    pub fn get_node_pool(&self, namespace: &str, name: &str) -> Option<Arc<NodePool>> {
        self.node_pools.get(&ObjectRef::new(name).within(namespace))
    }
}

/// Exponential requeue delay per object key, 1s doubling up to 10s.
///
/// Controllers call [`ErrorBackoff::next_delay`] from their error policy and
/// [`ErrorBackoff::reset`] after a successful reconcile.
#[derive(Clone, Default)]
pub struct ErrorBackoff {
    entries: Arc<Mutex<HashMap<String, ExponentialBackoff>>>,
}

impl ErrorBackoff {
    /// Delay before the next retry of `key`.
    #[must_use]
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(key.to_string())
            .or_insert_with(|| {
                ExponentialBackoff::new(ERROR_BACKOFF_INITIAL, ERROR_BACKOFF_MAX, None, 2.0, 0.0)
            })
            .next_backoff()
            .unwrap_or(ERROR_BACKOFF_MAX)
    }

    /// Forget the failure history of `key`.
    pub fn reset(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Backoff key of a namespaced object.
#[must_use]
pub fn object_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
