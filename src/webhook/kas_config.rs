// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `kas-config` mutation.
//!
//! Handles AdmissionReview requests for the kube-apiserver configuration
//! ConfigMap of each hosted control plane, injecting the audit log rotation
//! settings of the `AuditLogPersistenceConfig` singleton into the
//! `apiServerArguments` of `config.json`.

use std::sync::Arc;

use axum::{extract::State, Json};
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{Api, DynamicObject},
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use super::WebhookState;
use crate::constants::{
    CONTROL_PLANE_NAMESPACE_LABEL, KAS_CONFIG_CONFIGMAP_NAME, KAS_CONFIG_KEY, SINGLETON_NAME,
};
use crate::crd::{AuditLogConfig, AuditLogPersistenceConfig};

/// kube-apiserver flag holding the audit log file size limit in megabytes
pub const AUDIT_LOG_MAX_SIZE_ARG: &str = "audit-log-maxsize";

/// kube-apiserver flag holding the number of rotated audit files kept
pub const AUDIT_LOG_MAX_BACKUP_ARG: &str = "audit-log-maxbackup";

/// Key of the flag map inside the kube-apiserver config document
const API_SERVER_ARGUMENTS: &str = "apiServerArguments";

/// Errors raised while rewriting the kube-apiserver config document.
#[derive(Debug, thiserror::Error)]
pub enum KasConfigError {
    /// `config.json` is present but empty
    #[error("config.json is empty")]
    Empty,

    /// `config.json` is not a JSON object
    #[error("failed to parse config.json: {0}")]
    Invalid(String),

    /// The mutated document could not be encoded
    #[error("failed to encode config.json: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Rewrite the kube-apiserver config document `config` with the rotation
/// settings of `audit_log`.
///
/// `apiServerArguments` is created when missing. Each flag is written as a
/// single-element string list, and only when its value is positive; every
/// other field of the document is kept.
///
/// # Errors
///
/// Returns [`KasConfigError::Empty`] for an empty document and
/// [`KasConfigError::Invalid`] when it is not a JSON object.
pub fn mutate_kas_config(config: &str, audit_log: &AuditLogConfig) -> Result<String, KasConfigError> {
    if config.trim().is_empty() {
        return Err(KasConfigError::Empty);
    }
    let mut document: Value =
        serde_json::from_str(config).map_err(|e| KasConfigError::Invalid(e.to_string()))?;
    let root = document
        .as_object_mut()
        .ok_or_else(|| KasConfigError::Invalid("document is not an object".to_string()))?;

    let arguments = root
        .entry(API_SERVER_ARGUMENTS)
        .or_insert_with(|| Value::Object(Map::new()));
    if !arguments.is_object() {
        *arguments = Value::Object(Map::new());
    }
    let Value::Object(arguments) = arguments else {
        return Err(KasConfigError::Invalid(format!("{API_SERVER_ARGUMENTS} is not an object")));
    };

    for (flag, value) in [
        (AUDIT_LOG_MAX_SIZE_ARG, audit_log.max_size),
        (AUDIT_LOG_MAX_BACKUP_ARG, audit_log.max_backup),
    ] {
        if let Some(n) = value.filter(|n| *n > 0) {
            arguments.insert(flag.to_string(), Value::Array(vec![Value::String(n.to_string())]));
        }
    }

    Ok(serde_json::to_string(&document)?)
}

/// Returns `true` when the request targets the `kas-config` ConfigMap on
/// create or update.
#[must_use]
pub fn is_kas_config_request(request: &AdmissionRequest<DynamicObject>) -> bool {
    matches!(request.operation, Operation::Create | Operation::Update)
        && request.kind.kind == "ConfigMap"
        && request.name == KAS_CONFIG_CONFIGMAP_NAME
}

/// Outcome of mutating the object carried by an admission request.
#[derive(Debug, PartialEq)]
pub enum Mutation {
    /// Admit the object unchanged
    Unchanged,
    /// Admit the object with this patch
    Patch(json_patch::Patch),
    /// Reject the object with this message
    Deny(String),
}

/// Compute the mutation of a `kas-config` object for `audit_log`.
///
/// `object` is the body of the ConfigMap without metadata, as carried by a
/// [`DynamicObject`]. A ConfigMap without `config.json` is admitted as is.
#[must_use]
pub fn mutate_object(object: &Value, audit_log: &AuditLogConfig) -> Mutation {
    let Some(config) = object.pointer(&format!("/data/{KAS_CONFIG_KEY}")) else {
        return Mutation::Unchanged;
    };
    let Some(config) = config.as_str() else {
        return Mutation::Deny(format!("{KAS_CONFIG_KEY} is not a string"));
    };

    let mutated_config = match mutate_kas_config(config, audit_log) {
        Ok(c) => c,
        Err(e) => return Mutation::Deny(e.to_string()),
    };

    let mut mutated = object.clone();
    if let Some(data) = mutated.get_mut("data").and_then(Value::as_object_mut) {
        data.insert(KAS_CONFIG_KEY.to_string(), Value::String(mutated_config));
    }
    let patch = json_patch::diff(object, &mutated);
    if patch.0.is_empty() {
        Mutation::Unchanged
    } else {
        Mutation::Patch(patch)
    }
}

/// Handle mutating admission review for `kas-config`
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = mutate_kas_config_request(&state, &req).await;
    Json(response.into_review())
}

/// Process a single `kas-config` mutation request
async fn mutate_kas_config_request(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let uid = request.uid.clone();
    let allow = AdmissionResponse::from(request);

    if !is_kas_config_request(request) {
        return allow;
    }
    let (Some(obj), Some(namespace)) = (&request.object, request.namespace.as_deref()) else {
        return allow;
    };

    let namespaces: Api<Namespace> = Api::all(state.kube.clone());
    let is_control_plane = match namespaces.get_opt(namespace).await {
        Ok(ns) => ns
            .and_then(|ns| ns.metadata.labels)
            .and_then(|labels| labels.get(CONTROL_PLANE_NAMESPACE_LABEL).cloned())
            .is_some_and(|v| v == "true"),
        Err(e) => {
            error!(uid = %uid, namespace = %namespace, error = %e, "Failed to get namespace");
            return allow.deny(e.to_string());
        }
    };
    if !is_control_plane {
        debug!(uid = %uid, namespace = %namespace, "Not a control plane namespace, allowing unchanged");
        return allow;
    }

    let configs: Api<AuditLogPersistenceConfig> = Api::all(state.kube.clone());
    let config = match configs.get_opt(SINGLETON_NAME).await {
        Ok(Some(config)) => config.spec.with_defaults(),
        Ok(None) => {
            debug!(uid = %uid, "No AuditLogPersistenceConfig, allowing unchanged");
            return allow;
        }
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to get AuditLogPersistenceConfig");
            return allow.deny(e.to_string());
        }
    };
    if !config.enabled {
        return allow;
    }
    let audit_log = config.audit_log.unwrap_or_default();

    match mutate_object(&obj.data, &audit_log) {
        Mutation::Unchanged => allow,
        Mutation::Deny(message) => {
            error!(uid = %uid, namespace = %namespace, error = %message, "Rejecting kas-config");
            allow.deny(message)
        }
        Mutation::Patch(patch) => {
            info!(
                uid = %uid,
                namespace = %namespace,
                patch_ops = patch.0.len(),
                "Injecting audit log rotation into kas-config"
            );
            match AdmissionResponse::from(request).with_patch(patch) {
                Ok(response) => response,
                Err(e) => {
                    error!(uid = %uid, error = %e, "Failed to serialize patch");
                    AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "kas_config_tests.rs"]
mod kas_config_tests;
