// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `webhook/mod.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_invalid_review_is_bad_request() {
        let response = WebhookError::InvalidReview("missing request".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_serialization_error_is_internal() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let response = WebhookError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_serve_tls_missing_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let result = serve_tls(
            "127.0.0.1:0".parse().unwrap(),
            &dir.path().join("tls.crt"),
            &dir.path().join("tls.key"),
            Router::new(),
        )
        .await;
        assert!(matches!(result, Err(WebhookError::Io(_))));
    }
}
