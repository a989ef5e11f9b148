// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! IAM API key authentication.
//!
//! Exchanges the API key for a bearer token at the IAM token endpoint and
//! caches the token until shortly before it expires.

use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::CloudError;

/// Refresh the token this long before IAM says it expires.
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);

const APIKEY_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Produces `Authorization` header values for an API key.
pub struct Authenticator {
    api_key: String,
    token_url: String,
    http: HttpClient,
    token: Mutex<Option<CachedToken>>,
}

impl Authenticator {
    /// Authenticator posting to `<iam_endpoint>/identity/token`.
    #[must_use]
    pub fn new(api_key: impl Into<String>, iam_endpoint: &str, http: HttpClient) -> Self {
        Self {
            api_key: api_key.into(),
            token_url: format!("{}/identity/token", iam_endpoint.trim_end_matches('/')),
            http,
            token: Mutex::new(None),
        }
    }

    /// The raw API key, needed by the IAM API key details endpoint.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// `Bearer <token>`, refreshing the cached token when stale.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Auth`] when IAM rejects the key.
    pub async fn bearer(&self) -> Result<String, CloudError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(format!("Bearer {}", token.value));
            }
        }

        debug!(url = %self.token_url, "Requesting IAM access token");
        let response = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&[("grant_type", APIKEY_GRANT_TYPE), ("apikey", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::Auth(format!(
                "IAM token request failed with status {}: {body}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_SKEW);
        let header = format!("Bearer {}", token.access_token);
        *cached = Some(CachedToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime,
        });
        Ok(header)
    }
}
