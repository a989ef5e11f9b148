// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `config.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::try_parse_from(["hostedcp-operator"]).unwrap();
        assert_eq!(config.webhook_addr.port(), 9443);
        assert_eq!(config.metrics_addr.port(), 8080);
        assert!(config.webhook_tls().is_none());
    }

    #[test]
    fn test_webhook_tls_pair() {
        let config = OperatorConfig::try_parse_from([
            "hostedcp-operator",
            "--webhook-cert",
            "/certs/tls.crt",
            "--webhook-key",
            "/certs/tls.key",
        ])
        .unwrap();
        let (cert, key) = config.webhook_tls().unwrap();
        assert_eq!(cert, Path::new("/certs/tls.crt"));
        assert_eq!(key, Path::new("/certs/tls.key"));
    }

    #[test]
    fn test_webhook_cert_requires_key() {
        let result =
            OperatorConfig::try_parse_from(["hostedcp-operator", "--webhook-cert", "/certs/tls.crt"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_paths() {
        let config = OperatorConfig::try_parse_from([
            "hostedcp-operator",
            "--manifests-dir",
            "/opt/manifests",
            "--release-info",
            "/opt/releases.yaml",
            "--metrics-addr",
            "127.0.0.1:9090",
        ])
        .unwrap();
        assert_eq!(config.manifests_dir, PathBuf::from("/opt/manifests"));
        assert_eq!(config.release_info, PathBuf::from("/opt/releases.yaml"));
        assert_eq!(config.metrics_addr.to_string(), "127.0.0.1:9090");
    }
}
