// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! IBM Cloud client errors.

use thiserror::Error;

/// Errors that can occur when interacting with IBM Cloud APIs.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The API answered with a non-success status code
    #[error("status {status}: {message}")]
    Http {
        /// HTTP status code returned by the API
        status: u16,
        /// Error message extracted from the response body
        message: String,
    },

    /// The request never produced a response (connect, TLS, timeout)
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The response body could not be decoded
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// IAM token exchange or API key lookup failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A URL could not be built from the configured endpoint
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

impl CloudError {
    /// Build an HTTP error from a status and message.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Returns `true` when the error reports a missing resource.
    ///
    /// Besides HTTP 404, PowerVS and VPC report missing resources with
    /// textual messages on other status codes.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        if let Self::Http { status: 404, .. } = self {
            return true;
        }
        is_not_found_message(&self.to_string())
    }
}

/// Returns `true` if an error message reports a missing resource.
#[must_use]
pub fn is_not_found_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("not found") || lower.contains("does not exist") || lower.contains("cannot be found")
}
