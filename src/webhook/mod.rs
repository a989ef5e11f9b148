// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Mutating admission webhook of the operator.
//!
//! The webhook intercepts writes of the kube-apiserver configuration
//! (`kas-config`) in control plane namespaces and injects the audit log
//! rotation settings of the `AuditLogPersistenceConfig` singleton.
//!
//! The server speaks HTTPS only; the certificate and key are mounted by the
//! deployment and loaded once at startup.

pub mod kas_config;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use kube::Client;
use tracing::info;

use crate::constants::KAS_CONFIG_WEBHOOK_PATH;

/// Shared state for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    /// Kubernetes client for namespace and audit config lookups
    pub kube: Client,
}

impl WebhookState {
    /// Create a new webhook state with the given Kubernetes client
    pub fn new(kube: Client) -> Self {
        Self { kube }
    }
}

/// Error type for webhook operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The admission review request was invalid or malformed
    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    /// An error occurred while communicating with the Kubernetes API
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// An error occurred during JSON serialization/deserialization
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Loading the TLS certificate or key, or serving, failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::InvalidReview(_) => StatusCode::BAD_REQUEST,
            WebhookError::Kube(_) | WebhookError::Serialization(_) | WebhookError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

/// Create the webhook router with all mutation endpoints
///
/// Currently supports:
/// - POST /mutate-kas-config - Inject audit log rotation into `kas-config`
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(KAS_CONFIG_WEBHOOK_PATH, post(kas_config::mutate_handler))
        .with_state(state)
}

/// Serve `router` over HTTPS on `addr` until the server fails.
///
/// # Errors
///
/// Returns an error if the certificate or key cannot be read or the listener
/// cannot be bound.
pub async fn serve_tls(
    addr: SocketAddr,
    cert: &Path,
    key: &Path,
    router: Router,
) -> Result<(), WebhookError> {
    let tls = RustlsConfig::from_pem_file(cert, key).await?;
    info!(addr = %addr, "Starting admission webhook server");

    axum_server::bind_rustls(addr, tls)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
