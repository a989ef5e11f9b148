// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Hosted cluster sizing.
//!
//! Every `HostedCluster` is sorted into a size class of the cluster-scoped
//! `ClusterSizingConfiguration/cluster` by its node count. The scheduler
//! records its decision in three status conditions and the
//! `hypershift.openshift.io/hosted-cluster-size` label:
//!
//! 1. `ClusterSizeTransitionRequired=True` once a different class is computed
//! 2. `ClusterSizeTransitionPending=True` while the transition delay runs
//! 3. `ClusterSizeComputed=True` with the class as reason when it lands, after
//!    which the label follows on the next pass
//!
//! Status and label are written with server-side apply under the
//! `hostedcluster-sizing` field manager. The effects of the labelled class
//! (memory limits, priority classes, request overrides) are written as
//! annotations with an optimistic-concurrency retry, since other controllers
//! update the same `HostedCluster`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, ResourceExt};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::constants::{
    API_CRITICAL_PRIORITY_CLASS_ANNOTATION, CLUSTER_SIZE_OVERRIDE_ANNOTATION,
    CONDITION_CLUSTER_SIZE_COMPUTED, CONDITION_CLUSTER_SIZE_TRANSITION_PENDING,
    CONDITION_CLUSTER_SIZE_TRANSITION_REQUIRED, CONDITION_KUBE_APISERVER_AVAILABLE,
    CONDITION_SIZING_CONFIGURATION_VALID, CONTROL_PLANE_PRIORITY_CLASS_ANNOTATION,
    ETCD_PRIORITY_CLASS_ANNOTATION, HOSTED_CLUSTER_SIZE_LABEL, KAS_GOMEMLIMIT_ANNOTATION,
    MACHINE_HEALTH_CHECK_TIMEOUT_ANNOTATION, MAX_MUTATING_REQUESTS_INFLIGHT_ANNOTATION,
    MAX_REQUESTS_INFLIGHT_ANNOTATION, REASON_AS_EXPECTED, REASON_CLUSTER_SIZE_TRANSITIONED,
    REASON_TRANSITION_DELAY_NOT_ELAPSED, RESOURCE_REQUEST_OVERRIDE_PREFIX, SINGLETON_NAME,
    SIZING_FIELD_MANAGER,
};
use crate::context::Context;
use crate::crd::{
    find_condition, ClusterSizingConfiguration, ClusterSizingConfigurationSpec, Condition, Effects,
    HostedCluster, NodePool, SizeConfiguration,
};
use crate::errors::ReconcileError;
use crate::metrics::ObjectWrite;
use crate::powervs::infra::{format_duration, parse_duration};
use crate::retry::retry_on_conflict;

const TRANSITIONED_MESSAGE: &str = "The HostedCluster has transitioned to a new t-shirt size.";
const WILL_TRANSITION_MESSAGE: &str = "The HostedCluster will transition to a new t-shirt size.";

/// Conditions owned by the sizing field manager.
const MANAGED_CONDITIONS: [&str; 3] = [
    CONDITION_CLUSTER_SIZE_COMPUTED,
    CONDITION_CLUSTER_SIZE_TRANSITION_PENDING,
    CONDITION_CLUSTER_SIZE_TRANSITION_REQUIRED,
];

/// Annotations written from size class effects.
const EFFECT_ANNOTATIONS: [&str; 7] = [
    KAS_GOMEMLIMIT_ANNOTATION,
    CONTROL_PLANE_PRIORITY_CLASS_ANNOTATION,
    ETCD_PRIORITY_CLASS_ANNOTATION,
    API_CRITICAL_PRIORITY_CLASS_ANNOTATION,
    MAX_REQUESTS_INFLIGHT_ANNOTATION,
    MAX_MUTATING_REQUESTS_INFLIGHT_ANNOTATION,
    MACHINE_HEALTH_CHECK_TIMEOUT_ANNOTATION,
];

/// Pause state derived from `spec.pausedUntil`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Paused {
    No,
    Indefinitely,
    /// Paused for the given remaining time.
    For(Duration),
}

/// Interpret `pausedUntil`: `"true"` pauses indefinitely, an RFC3339
/// timestamp pauses until that time.
///
/// # Errors
///
/// Returns [`ReconcileError::Config`] for any other value.
pub fn paused_state(paused_until: Option<&str>, now: DateTime<Utc>) -> Result<Paused, ReconcileError> {
    let Some(value) = paused_until else {
        return Ok(Paused::No);
    };
    if value.eq_ignore_ascii_case("true") {
        return Ok(Paused::Indefinitely);
    }
    let until = DateTime::parse_from_rfc3339(value)
        .map_err(|e| ReconcileError::Config(format!("invalid pausedUntil {value:?}: {e}")))?
        .with_timezone(&Utc);
    match (until - now).to_std() {
        Ok(remaining) if !remaining.is_zero() => Ok(Paused::For(remaining)),
        _ => Ok(Paused::No),
    }
}

/// Node count of a hosted cluster summed over its node pools.
///
/// Autoscaled pools count their observed replicas, which are only
/// trustworthy while the kube-apiserver is available. `None` means the
/// count cannot be determined right now.
#[must_use]
pub fn node_count(node_pools: &[Arc<NodePool>], kas_available: bool, label_present: bool) -> Option<u32> {
    let mut total: u32 = 0;
    for pool in node_pools {
        let replicas = if pool.spec.auto_scaling.is_some() {
            if !kas_available && label_present {
                return None;
            }
            pool.status.as_ref().map_or(0, |s| s.replicas)
        } else {
            pool.spec.replicas.unwrap_or(0)
        };
        total = total.saturating_add(u32::try_from(replicas).unwrap_or(0));
    }
    Some(total)
}

/// Outcome of a sizing pass.
#[derive(Clone, Debug, PartialEq)]
pub enum SizingAction {
    /// Nothing to write.
    None,
    /// Set the size label to the class recorded in status.
    SetLabel(String),
    /// Apply the full list of managed conditions.
    SetConditions {
        conditions: Vec<Condition>,
        requeue_after: Option<Duration>,
    },
    /// Nothing to write, look again later.
    Requeue(Duration),
}

fn condition_time(condition: &Condition) -> Option<DateTime<Utc>> {
    condition
        .last_transition_time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Time and class of the last `condition_type=True` condition.
fn previous(conditions: &[Condition], condition_type: &str) -> (Option<DateTime<Utc>>, String) {
    match find_condition(conditions, condition_type).filter(|c| c.is_true()) {
        Some(c) => (condition_time(c), c.reason.clone().unwrap_or_default()),
        None => (None, String::new()),
    }
}

fn timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn condition(condition_type: &str, status: bool, reason: &str, message: &str, time: Option<DateTime<Utc>>) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: if status { "True" } else { "False" }.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: time.map(timestamp),
    }
}

fn condition_present(existing: &[Condition], wanted: &Condition) -> bool {
    existing.iter().any(|c| {
        c.r#type == wanted.r#type
            && c.status == wanted.status
            && c.reason == wanted.reason
            && c.message == wanted.message
    })
}

/// Full list of managed conditions after applying `updated`, or `None` when
/// every update is already present. Existing managed conditions not updated
/// are carried along so server-side apply does not drop them; unmanaged
/// conditions are left to their owners.
#[must_use]
pub fn merge_conditions(existing: &[Condition], updated: Vec<Condition>) -> Option<Vec<Condition>> {
    let updated: Vec<Condition> = updated
        .into_iter()
        .filter(|c| !condition_present(existing, c))
        .collect();
    if updated.is_empty() {
        return None;
    }

    let mut merged = updated;
    for c in existing {
        if MANAGED_CONDITIONS.contains(&c.r#type.as_str()) && !merged.iter().any(|u| u.r#type == c.r#type) {
            merged.push(c.clone());
        }
    }
    merged.sort_by(|a, b| a.r#type.cmp(&b.r#type));
    Some(merged)
}

fn delay_of(value: Option<&str>) -> Result<Duration, ReconcileError> {
    match value {
        None => Ok(Duration::ZERO),
        Some(text) => parse_duration(text)
            .map_err(|e| ReconcileError::Config(format!("invalid transition delay: {e}"))),
    }
}

/// Decide the next sizing step of `hc`.
///
/// `node_count` is `None` when the count cannot be trusted; the pass is then
/// skipped unless the override annotation names a class.
///
/// # Errors
///
/// Returns [`ReconcileError::Config`] when a transition delay cannot be parsed.
pub fn compute_sizing(
    config: &ClusterSizingConfigurationSpec,
    hc: &HostedCluster,
    node_count: Option<u32>,
    now: DateTime<Utc>,
) -> Result<SizingAction, ReconcileError> {
    let conditions = hc.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or_default();
    let (last_transition, last_class) = previous(conditions, CONDITION_CLUSTER_SIZE_COMPUTED);
    let current_label = hc.labels().get(HOSTED_CLUSTER_SIZE_LABEL);
    let label_present = current_label.is_some();
    let current_class = current_label.cloned().unwrap_or_default();

    // Status and labels cannot be written in one call; catch the label up first
    if (last_transition.is_some() && !label_present) || current_class != last_class {
        return Ok(SizingAction::SetLabel(last_class));
    }

    let size_class: Option<&SizeConfiguration> =
        match hc.annotations().get(CLUSTER_SIZE_OVERRIDE_ANNOTATION).filter(|v| !v.is_empty()) {
            Some(name) => config.sizes.iter().filter(|s| &s.name == name).last(),
            None => {
                let Some(nodes) = node_count else {
                    info!(name = %hc.name_any(), "Node count not available, skipping sizing");
                    return Ok(SizingAction::None);
                };
                config.sizes.iter().filter(|s| s.criteria.contains(nodes)).last()
            }
        };
    let Some(size_class) = size_class else {
        error!(name = %hc.name_any(), "No size class found for hosted cluster");
        return Ok(SizingAction::None);
    };

    if label_present && size_class.name == current_class {
        return Ok(merge_conditions(
            conditions,
            vec![
                condition(
                    CONDITION_CLUSTER_SIZE_TRANSITION_PENDING,
                    false,
                    REASON_CLUSTER_SIZE_TRANSITIONED,
                    TRANSITIONED_MESSAGE,
                    last_transition,
                ),
                condition(
                    CONDITION_CLUSTER_SIZE_TRANSITION_REQUIRED,
                    false,
                    REASON_AS_EXPECTED,
                    TRANSITIONED_MESSAGE,
                    last_transition,
                ),
            ],
        )
        .map_or(SizingAction::None, |conditions| SizingAction::SetConditions {
            conditions,
            requeue_after: None,
        }));
    }

    let previous_minimum = if label_present {
        config.size(&current_class).map_or(0, |s| s.criteria.from)
    } else {
        0
    };
    let increasing = previous_minimum < size_class.criteria.from;

    let mut delay_start = last_transition.unwrap_or_default();
    let (last_computed, last_computed_class) = previous(conditions, CONDITION_CLUSTER_SIZE_TRANSITION_REQUIRED);
    if let Some(computed) = last_computed.filter(|_| last_computed_class == size_class.name) {
        delay_start = computed;
    }

    let (transition, delay) = if increasing {
        ("increase", delay_of(config.transition_delay.increase.as_deref())?)
    } else {
        ("decrease", delay_of(config.transition_delay.decrease.as_deref())?)
    };

    let elapsed = (now - delay_start).to_std().unwrap_or(Duration::ZERO);
    if elapsed < delay {
        let remaining = delay - elapsed;
        let message = format!(
            "HostedClusters must wait at least {} to {transition} in size after the cluster size changes.",
            format_duration(delay)
        );
        let updated = merge_conditions(
            conditions,
            vec![
                condition(
                    CONDITION_CLUSTER_SIZE_TRANSITION_PENDING,
                    true,
                    REASON_TRANSITION_DELAY_NOT_ELAPSED,
                    &message,
                    Some(now),
                ),
                condition(
                    CONDITION_CLUSTER_SIZE_TRANSITION_REQUIRED,
                    true,
                    &size_class.name,
                    WILL_TRANSITION_MESSAGE,
                    Some(now),
                ),
            ],
        );
        return Ok(match updated {
            Some(conditions) => SizingAction::SetConditions {
                conditions,
                requeue_after: Some(remaining),
            },
            None => SizingAction::Requeue(remaining),
        });
    }

    Ok(merge_conditions(
        conditions,
        vec![
            condition(
                CONDITION_CLUSTER_SIZE_COMPUTED,
                true,
                &size_class.name,
                TRANSITIONED_MESSAGE,
                Some(now),
            ),
            condition(
                CONDITION_CLUSTER_SIZE_TRANSITION_PENDING,
                false,
                REASON_CLUSTER_SIZE_TRANSITIONED,
                TRANSITIONED_MESSAGE,
                Some(now),
            ),
            condition(
                CONDITION_CLUSTER_SIZE_TRANSITION_REQUIRED,
                false,
                REASON_AS_EXPECTED,
                TRANSITIONED_MESSAGE,
                Some(now),
            ),
        ],
    )
    .map_or(SizingAction::None, |conditions| SizingAction::SetConditions {
        conditions,
        requeue_after: None,
    }))
}

fn resource_request_key(deployment: &str, container: &str) -> String {
    format!("{RESOURCE_REQUEST_OVERRIDE_PREFIX}/{deployment}.{container}")
}

/// Annotations carrying the effects of a size class.
#[must_use]
pub fn effects_annotations(effects: Option<&Effects>) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    let Some(effects) = effects else {
        return annotations;
    };

    let mut set = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            annotations.insert(key.to_string(), value);
        }
    };
    set(KAS_GOMEMLIMIT_ANNOTATION, effects.kas_go_mem_limit.clone());
    set(
        CONTROL_PLANE_PRIORITY_CLASS_ANNOTATION,
        effects.control_plane_priority_class_name.clone(),
    );
    set(ETCD_PRIORITY_CLASS_ANNOTATION, effects.etcd_priority_class_name.clone());
    set(
        API_CRITICAL_PRIORITY_CLASS_ANNOTATION,
        effects.api_critical_priority_class_name.clone(),
    );
    set(
        MAX_REQUESTS_INFLIGHT_ANNOTATION,
        effects.maximum_requests_inflight.map(|n| n.to_string()),
    );
    set(
        MAX_MUTATING_REQUESTS_INFLIGHT_ANNOTATION,
        effects.maximum_mutating_requests_inflight.map(|n| n.to_string()),
    );
    set(
        MACHINE_HEALTH_CHECK_TIMEOUT_ANNOTATION,
        effects.machine_health_check_timeout.clone(),
    );

    for request in &effects.resource_requests {
        let parts: Vec<String> = [("memory", &request.memory), ("cpu", &request.cpu)]
            .into_iter()
            .filter_map(|(name, value)| value.as_ref().map(|v| format!("{name}={v}")))
            .collect();
        if !parts.is_empty() {
            annotations.insert(
                resource_request_key(&request.deployment_name, &request.container_name),
                parts.join(","),
            );
        }
    }
    annotations
}

fn is_effect_annotation(key: &str) -> bool {
    EFFECT_ANNOTATIONS.contains(&key)
        || key
            .strip_prefix(RESOURCE_REQUEST_OVERRIDE_PREFIX)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Replace the effect annotations in `annotations` with `desired`.
///
/// Returns `true` when anything changed. Effect annotations of a previous
/// class that the new class does not set are removed.
pub fn merge_effects(annotations: &mut BTreeMap<String, String>, desired: &BTreeMap<String, String>) -> bool {
    let before = annotations.clone();
    annotations.retain(|key, _| !is_effect_annotation(key) || desired.contains_key(key));
    annotations.extend(desired.iter().map(|(k, v)| (k.clone(), v.clone())));
    *annotations != before
}

async fn apply_effects(
    api: &Api<HostedCluster>,
    name: &str,
    desired: &BTreeMap<String, String>,
) -> Result<bool, kube::Error> {
    retry_on_conflict(|| async move {
        let mut current = api.get(name).await?;
        let annotations = current.metadata.annotations.get_or_insert_with(BTreeMap::new);
        if !merge_effects(annotations, desired) {
            return Ok(false);
        }
        api.replace(name, &PostParams::default(), &current).await?;
        Ok(true)
    })
    .await
}

/// Reconcile the size class and effects of a `HostedCluster`.
///
/// Returns the delay until the cluster must be looked at again, or `None`
/// when only a change to one of the watched objects can alter the outcome.
///
/// # Errors
///
/// Returns API failures, and [`ReconcileError::Config`] when the size label
/// names a class the configuration does not define.
pub async fn reconcile_cluster_sizing(
    ctx: Arc<Context>,
    hc: Arc<HostedCluster>,
) -> Result<Option<Duration>, ReconcileError> {
    let name = hc.name_any();
    let namespace = hc
        .namespace()
        .ok_or_else(|| ReconcileError::Config("HostedCluster must be namespaced".to_string()))?;

    let configs: Api<ClusterSizingConfiguration> = Api::all(ctx.client.clone());
    let Some(config) = configs.get_opt(SINGLETON_NAME).await? else {
        debug!("No ClusterSizingConfiguration, skipping sizing");
        return Ok(None);
    };
    let valid = config
        .status
        .as_ref()
        .and_then(|s| find_condition(&s.conditions, CONDITION_SIZING_CONFIGURATION_VALID))
        .is_some_and(Condition::is_true);
    if !valid {
        debug!("ClusterSizingConfiguration is not valid, skipping sizing");
        return Ok(None);
    }

    if hc.metadata.deletion_timestamp.is_some() {
        return Ok(None);
    }

    let now = Utc::now();
    match paused_state(hc.spec.paused_until.as_deref(), now) {
        Ok(Paused::No) => {}
        Ok(Paused::Indefinitely) => {
            info!(namespace = %namespace, name = %name, "Reconciliation paused");
            return Ok(None);
        }
        Ok(Paused::For(remaining)) => {
            info!(namespace = %namespace, name = %name, resume_in = ?remaining, "Reconciliation paused");
            return Ok(Some(remaining));
        }
        Err(e) => {
            // Requeueing cannot fix a malformed field
            warn!(namespace = %namespace, name = %name, error = %e, "Ignoring invalid pausedUntil");
            return Ok(None);
        }
    }

    let api: Api<HostedCluster> = Api::namespaced(ctx.client.clone(), &namespace);

    if let Some(size) = hc.labels().get(HOSTED_CLUSTER_SIZE_LABEL).filter(|s| !s.is_empty()) {
        let class = config.spec.size(size).ok_or_else(|| {
            ReconcileError::Config(format!(
                "size class {size:?} of HostedCluster {namespace}/{name} is not configured"
            ))
        })?;
        let desired = effects_annotations(class.effects.as_ref());
        if apply_effects(&api, &name, &desired).await? {
            info!(namespace = %namespace, name = %name, size = %size, "Applied size class effects");
        }
    }

    let label_present = hc.labels().contains_key(HOSTED_CLUSTER_SIZE_LABEL);
    let kas_available = hc
        .status
        .as_ref()
        .and_then(|s| find_condition(&s.conditions, CONDITION_KUBE_APISERVER_AVAILABLE))
        .is_some_and(Condition::is_true);
    let pools = ctx.stores.node_pools_for_cluster(&namespace, &name);
    let nodes = node_count(&pools, kas_available, label_present);

    let apply = PatchParams::apply(SIZING_FIELD_MANAGER).force();
    match compute_sizing(&config.spec, &hc, nodes, now)? {
        SizingAction::None => Ok(None),
        SizingAction::Requeue(after) => Ok(Some(after)),
        SizingAction::SetLabel(size) => {
            info!(namespace = %namespace, name = %name, size = %size, "Setting size label");
            let patch = json!({
                "apiVersion": "hypershift.openshift.io/v1beta1",
                "kind": "HostedCluster",
                "metadata": { "labels": { HOSTED_CLUSTER_SIZE_LABEL: size } },
            });
            api.patch(&name, &apply, &Patch::Apply(&patch)).await?;
            crate::metrics::record_object_write("HostedCluster", ObjectWrite::Patched);
            Ok(None)
        }
        SizingAction::SetConditions {
            conditions,
            requeue_after,
        } => {
            debug!(namespace = %namespace, name = %name, "Updating sizing conditions");
            let patch = json!({
                "apiVersion": "hypershift.openshift.io/v1beta1",
                "kind": "HostedCluster",
                "status": { "conditions": conditions },
            });
            api.patch_status(&name, &apply, &Patch::Apply(&patch)).await?;
            Ok(requeue_after)
        }
    }
}

#[cfg(test)]
#[path = "sizing_tests.rs"]
mod sizing_tests;
