// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `resources.rs`

#[cfg(test)]
mod tests {
    use super::super::{is_already_exists, is_not_found, parse_manifest, split_api_version};
    use crate::render::RenderError;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} error"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_already_exists_requires_reason() {
        assert!(is_already_exists(&api_error(409, "AlreadyExists")));
        // A 409 conflict on update is not an AlreadyExists
        assert!(!is_already_exists(&api_error(409, "Conflict")));
        assert!(!is_already_exists(&api_error(404, "NotFound")));
    }

    #[test]
    fn test_not_found() {
        assert!(is_not_found(&api_error(404, "NotFound")));
        assert!(!is_not_found(&api_error(500, "InternalError")));
    }

    #[test]
    fn test_split_api_version() {
        assert_eq!(split_api_version("v1"), ("", "v1"));
        assert_eq!(split_api_version("apps/v1"), ("apps", "v1"));
        assert_eq!(
            split_api_version("cluster.x-k8s.io/v1beta1"),
            ("cluster.x-k8s.io", "v1beta1")
        );
    }

    #[test]
    fn test_parse_manifest_multi_document() {
        let data = br"
apiVersion: v1
kind: ServiceAccount
metadata:
  name: vpn
---
# comment only document
---
apiVersion: rbac.authorization.k8s.io/v1
kind: Role
metadata:
  name: vpn
rules: []
";
        let objects = parse_manifest("vpn.yaml", data).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].types.as_ref().unwrap().kind, "ServiceAccount");
        assert_eq!(objects[1].metadata.name.as_deref(), Some("vpn"));
        assert!(objects[1].data.get("rules").is_some());
    }

    #[test]
    fn test_parse_manifest_rejects_untyped_document() {
        let err = parse_manifest("broken.yaml", b"metadata:\n  name: x\n").unwrap_err();
        assert!(matches!(err, RenderError::Yaml { ref name, .. } if name == "broken.yaml"));
    }

    #[test]
    fn test_parse_manifest_invalid_yaml() {
        let err = parse_manifest("bad.yaml", b"kind: [unclosed").unwrap_err();
        assert!(err.to_string().contains("bad.yaml"));
    }
}
