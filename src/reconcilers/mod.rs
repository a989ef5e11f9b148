// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes reconciliation controllers for hosted control planes.
//!
//! Each reconciler watches one resource type of the management cluster and
//! converges the objects derived from it.
//!
//! # Reconciliation Architecture
//!
//! The operator follows the standard Kubernetes controller pattern:
//!
//! 1. **Watch** - Monitor resource changes via Kubernetes API
//! 2. **Reconcile** - Compare desired state (CRD spec) with actual state
//! 3. **Update** - Server-side apply the derived objects
//! 4. **Status** - Report reconciliation results back to Kubernetes
//!
//! # Available Reconcilers
//!
//! - [`reconcile_hostedcontrolplane`] - Applies PKI, secrets and rendered
//!   control plane manifests for a `HostedControlPlane`
//! - [`reconcile_nodepool`] - Translates a `NodePool` into an
//!   `AWSMachineTemplate` and `MachineDeployment`
//! - [`reconcile_machinedeployment`] - Publishes instance capacity, labels
//!   and taints on `MachineDeployment`s for scale-from-zero autoscaling
//! - [`reconcile_cluster_sizing`] - Assigns `HostedCluster`s a size class and
//!   applies its effects

pub mod controlplane;
pub mod instance_types;
pub mod machinedeployment;
pub mod nodepool;
pub mod resources;
pub mod sizing;

pub use controlplane::reconcile_hostedcontrolplane;
pub use machinedeployment::reconcile_machinedeployment;
pub use nodepool::reconcile_nodepool;
pub use sizing::reconcile_cluster_sizing;

/// Check if a status value has actually changed compared to the current status.
///
/// This helper prevents unnecessary status updates that would trigger reconciliation loops.
/// It compares a new status value with the existing status and returns `true` only if
/// they differ, indicating an update is needed.
///
/// # Arguments
///
/// * `current_value` - The current status value (from existing resource)
/// * `new_value` - The new status value to potentially set
///
/// # Returns
///
/// * `true` - Status has changed and needs updating
/// * `false` - Status is unchanged, skip the update
///
/// # Why This Matters
///
/// In kube-rs, status updates trigger "object updated" events which cause new reconciliations.
/// Without this check, updating status on every reconciliation creates a tight loop:
///
/// 1. Reconcile → Update status
/// 2. Status update → "object updated" event
/// 3. Event → New reconciliation
/// 4. Repeat from step 1 (infinite loop)
///
/// By only updating when status actually changes, we break this cycle.
#[must_use]
pub fn status_changed<T: PartialEq>(current_value: &Option<T>, new_value: &Option<T>) -> bool {
    current_value != new_value
}

#[cfg(test)]
mod mod_tests;
