// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for infrastructure orchestration and reconciliation.
//!
//! - [`InfraError`] covers the PowerVS create/destroy flows and their helpers
//!   (paging, polling, validators, credential issuing).
//! - [`AggregateError`] collects every failure of an error-accumulating
//!   traversal such as infrastructure destroy or manifest apply.
//! - [`ReconcileError`] is returned by controllers to the kube runtime.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::ibmcloud::CloudError;
use crate::pki::PkiError;
use crate::release::ReleaseError;
use crate::render::RenderError;

/// Errors raised while creating or destroying cloud infrastructure.
#[derive(Debug, Error)]
pub enum InfraError {
    /// A required option, credential or secret key is missing or invalid
    #[error("{0}")]
    Config(String),

    /// The requested PowerVS zone cannot host the infrastructure
    #[error("{0} is unsupported PowerVS zone, please use another PowerVS zone")]
    UnsupportedZone(String),

    /// No resource with the given id or name exists
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Resource kind, e.g. `vpc` or `cloud instance`
        kind: &'static str,
        /// Id or name that was looked up
        name: String,
    },

    /// The resource exists but is not in a usable state
    #[error("{kind} {name} is not in a valid state: {state}")]
    State {
        /// Resource kind
        kind: &'static str,
        /// Id or name of the resource
        name: String,
        /// State reported by the cloud
        state: String,
    },

    /// A poll loop exhausted its deadline
    #[error("timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        /// Description of the awaited condition
        operation: String,
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// An existing resource does not satisfy a required policy
    #[error("{0}")]
    Policy(String),

    /// More than one DHCP server exists in the cloud instance
    #[error("more than one DHCP server is not allowed in a service instance, found {0} dhcp servers")]
    DhcpServerLimitExceeds(usize),

    /// The zone already carries the maximum number of cloud connections
    #[error("cannot create new cloud connection in powervs zone, only {max} cloud connections are allowed per zone, found {count}")]
    TooManyCloudConnections {
        /// Connections found in the zone
        count: usize,
        /// Allowed maximum
        max: usize,
    },

    /// A transient failure that may succeed on retry
    #[error("transient error: {0}")]
    Transient(String),

    /// A paging cursor or document could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// The operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// An IBM Cloud API call failed
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// Issuing or deleting component credentials failed
    #[error("credentials error: {0}")]
    Credentials(String),

    /// Reading or writing a local file failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InfraError {
    /// Shorthand for [`InfraError::NotFound`].
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Returns `true` when the error reports a missing resource.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Cloud(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Prefix the error message with context while keeping the error kind
    /// for variants carrying free text.
    #[must_use]
    pub fn context(self, context: &str) -> Self {
        match self {
            Self::Config(m) => Self::Config(format!("{context}: {m}")),
            Self::Policy(m) => Self::Policy(format!("{context}: {m}")),
            Self::Credentials(m) => Self::Credentials(format!("{context}: {m}")),
            other => other,
        }
    }
}

/// An ordered collection of errors reported as one.
///
/// Renders as `<message>: [e1, e2, ...]` and keeps every component for
/// inspection.
#[derive(Debug)]
pub struct AggregateError {
    message: String,
    errors: Vec<anyhow::Error>,
}

impl AggregateError {
    /// Create an empty aggregate with the given message prefix.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    /// Record an error.
    pub fn push(&mut self, error: impl Into<anyhow::Error>) {
        self.errors.push(error.into());
    }

    /// Returns `true` when no error was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of recorded errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Recorded errors in the order they occurred.
    #[must_use]
    pub fn errors(&self) -> &[anyhow::Error] {
        &self.errors
    }

    /// `Ok(())` when empty, otherwise `Err(self)`.
    ///
    /// # Errors
    ///
    /// Returns the aggregate itself when it holds at least one error.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: [", self.message)?;
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{e:#}")?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for AggregateError {}

/// Errors returned by controllers to the kube runtime.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A Kubernetes API call failed
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Manifest rendering failed
    #[error(transparent)]
    Render(#[from] RenderError),

    /// PKI generation failed
    #[error(transparent)]
    Pki(#[from] PkiError),

    /// Release metadata could not be resolved
    #[error(transparent)]
    Release(#[from] ReleaseError),

    /// Required configuration is missing on the reconciled object
    #[error("{0}")]
    Config(String),

    /// Instance-type lookup failed
    #[error("instance type lookup failed: {0}")]
    InstanceType(String),

    /// The instance type is not offered in the region
    #[error("instance type {instance_type} not found in region {region}")]
    UnknownInstanceType { instance_type: String, region: String },

    /// Serialization of a generated object failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Several independent steps failed
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// Any other failure bubbled up from helpers
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReconcileError {
    /// Returns `true` for failures that are expected to clear on their own,
    /// which the controllers requeue without counting as errors.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(e)) => e.code == 409 || e.code == 429 || e.code >= 500,
            Self::Kube(kube::Error::Service(_)) => true,
            _ => false,
        }
    }

    /// Machine-friendly category used as a metrics label.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Kube(_) => "api_error",
            Self::Render(_) | Self::Pki(_) | Self::Release(_) => "render_error",
            Self::Config(_) => "validation_error",
            Self::InstanceType(_) => "cloud_error",
            Self::UnknownInstanceType { .. } => "validation_error",
            Self::Serialization(_) => "serialization_error",
            Self::Aggregate(_) | Self::Other(_) => "internal_error",
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
