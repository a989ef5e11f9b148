// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `render.rs`

#[cfg(test)]
mod tests {
    use super::super::{
        cidr_address, cidr_mask, indent, random_string, render_manifests, user_config_map_name,
        write_manifests, ClusterParams, RenderError, RenderInput, TemplateSource,
    };
    use crate::pki::PkiBundle;
    use crate::release::ReleaseImage;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use k8s_openapi::api::core::v1::ConfigMap;
    use std::collections::BTreeMap;

    fn params() -> ClusterParams {
        ClusterParams {
            namespace: "clusters-example".to_string(),
            cluster_name: "example".to_string(),
            external_api_address: "api.example.test".to_string(),
            external_api_port: 6443,
            service_cidr: "172.30.0.0/16".to_string(),
            ..ClusterParams::default()
        }
    }

    fn release(version: &str) -> ReleaseImage {
        ReleaseImage::new(
            version,
            BTreeMap::from([("hyperkube".to_string(), "quay.io/art@sha256:aaa".to_string())]),
            BTreeMap::from([("kubernetes".to_string(), "1.20.0".to_string())]),
        )
    }

    fn pki() -> PkiBundle {
        PkiBundle::from([(
            "root-ca.crt".to_string(),
            b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n".to_vec(),
        )])
    }

    fn render(
        templates: &[(&str, &str)],
        version: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, RenderError> {
        let source = TemplateSource::Memory(
            templates
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.as_bytes().to_vec()))
                .collect(),
        );
        let params = params();
        let release = release(version);
        let pki = pki();
        render_manifests(
            &source,
            &RenderInput {
                params: &params,
                release: &release,
                pull_secret: b"{\"auths\":{}}",
                pki: &pki,
            },
        )
    }

    fn text(bundle: &BTreeMap<String, Vec<u8>>, key: &str) -> String {
        String::from_utf8(bundle.get(key).unwrap_or_else(|| panic!("{key} missing")).clone())
            .unwrap()
    }

    #[test]
    fn test_indent() {
        assert_eq!(indent(2, "a\nb"), "  a\n  b");
        assert_eq!(indent(0, "a"), "a");
    }

    #[test]
    fn test_cidr_helpers() {
        assert_eq!(cidr_address("10.0.0.0/16").unwrap(), "10.0.0.0");
        assert_eq!(cidr_mask("10.0.0.0/16").unwrap(), "255.255.0.0");
        assert_eq!(cidr_mask("10.0.0.0/0").unwrap(), "0.0.0.0");
        assert_eq!(cidr_mask("fd00::/64").unwrap(), "ffff:ffff:ffff:ffff::");
        assert!(cidr_mask("10.0.0.0").is_err());
        assert!(cidr_address("10.0.0.0/40").is_err());
    }

    #[test]
    fn test_random_string_is_url_safe_and_sized() {
        for length in [1, 16, 43] {
            let value = random_string(length);
            assert_eq!(value.len(), length);
            assert!(value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
        assert_ne!(random_string(32), random_string(32));
    }

    #[test]
    fn test_user_config_map_name() {
        assert_eq!(
            user_config_map_name("openshift-controller-manager/00-openshift-controller-manager-namespace.yaml"),
            "user-manifest-00-openshift-controller-manager-namespace"
        );
        assert_eq!(user_config_map_name("my_file.v2.yaml"), "user-manifest-my-file");
    }

    #[test]
    fn test_render_with_release_helpers() {
        let bundle = render(
            &[(
                "kube-apiserver/kube-apiserver-deployment.yaml",
                "image: {{ imageFor('hyperkube') }}\nk8s: {{ version('kubernetes') }}\nns: {{ namespace }}\n{% if atleast_version('4.6') %}ignition: v3{% else %}ignition: v2{% endif %}\n",
            )],
            "4.7.0",
        )
        .unwrap();

        assert_eq!(
            text(&bundle, "kube-apiserver-deployment.yaml").trim_end(),
            "image: quay.io/art@sha256:aaa\nk8s: 1.20.0\nns: clusters-example\nignition: v3"
        );
    }

    #[test]
    fn test_yml_templates_are_rendered() {
        let bundle = render(
            &[
                ("etcd/etcd-service.yml", "ns: {{ namespace }}"),
                ("cluster-bootstrap/my-role.yml", "ns: {{ namespace }}"),
            ],
            "4.7.0",
        )
        .unwrap();

        assert_eq!(text(&bundle, "etcd-service.yml"), "ns: clusters-example");
        let wrapped = text(&bundle, "user-manifest-my-role.yml");
        assert!(wrapped.contains("ns: clusters-example"), "{wrapped}");
        assert!(!wrapped.contains("{{"), "{wrapped}");
    }

    #[test]
    fn test_version_comparisons() {
        let template = [(
            "v.yaml",
            "{{ atleast_version('4.6') }} {{ lessthan_version('4.6') }}",
        )];
        assert_eq!(text(&render(&template, "4.5.9").unwrap(), "v.yaml"), "false true");
        assert_eq!(text(&render(&template, "4.6.0").unwrap(), "v.yaml"), "true false");
    }

    #[test]
    fn test_unknown_image_and_undefined_variable_fail() {
        let err = render(&[("a.yaml", "{{ imageFor('missing') }}")], "4.7.0").unwrap_err();
        assert!(matches!(err, RenderError::Template { ref name, .. } if name == "a.yaml"));

        let err = render(&[("b.yaml", "{{ no_such_param }}")], "4.7.0").unwrap_err();
        assert!(matches!(err, RenderError::Template { ref name, .. } if name == "b.yaml"));
    }

    #[test]
    fn test_pki_and_pull_secret_helpers() {
        let bundle = render(
            &[(
                "secret.yaml",
                "ca: {{ pki('root-ca.crt') }}\npull: {{ pullSecretBase64() }}\npem: |\n{{ include_pki('root-ca.crt', 2) }}",
            )],
            "4.7.0",
        )
        .unwrap();

        let rendered = text(&bundle, "secret.yaml");
        let expected_ca = BASE64.encode(&pki()["root-ca.crt"]);
        assert!(rendered.contains(&format!("ca: {expected_ca}")));
        assert!(rendered.contains(&format!("pull: {}", BASE64.encode(b"{\"auths\":{}}"))));
        assert!(rendered.contains("pem: |\n  -----BEGIN CERTIFICATE-----\n  AAAA\n  -----END CERTIFICATE-----"));
    }

    #[test]
    fn test_include_and_data_url_helpers() {
        let bundle = render(
            &[
                ("config.yaml", "data:\n{{ include('snippets/kas.conf', 2) }}\nurl: {{ dataURLEncode('snippets/kas.conf') }}"),
                ("snippets/kas.conf", "ns: {{ namespace }}\nport: {{ external_api_port }}\n"),
            ],
            "4.7.0",
        )
        .unwrap();

        let rendered = text(&bundle, "config.yaml");
        assert!(rendered.starts_with("data:\n  ns: clusters-example\n  port: 6443\nurl: "));
        let encoded = rendered
            .split("url: data:text/plain;charset=utf-8;base64,")
            .nth(1)
            .unwrap();
        let decoded = String::from_utf8(BASE64.decode(encoded.trim()).unwrap()).unwrap();
        assert_eq!(decoded.trim_end(), "ns: clusters-example\nport: 6443");

        // Non-yaml files are copied without rendering.
        assert_eq!(
            text(&bundle, "kas.conf"),
            "ns: {{ namespace }}\nport: {{ external_api_port }}\n"
        );
    }

    #[test]
    fn test_user_manifests_are_wrapped_in_config_maps() {
        let bundle = render(
            &[
                ("openvpn/openvpn-client-configmap.yaml", "kind: ConfigMap\nns: {{ namespace }}"),
                ("cluster-bootstrap/my_role.yaml", "kind: Role"),
                ("openvpn/openvpn-server-configmap.yaml", "kind: ConfigMap"),
            ],
            "4.7.0",
        )
        .unwrap();

        let keys: Vec<&str> = bundle.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "openvpn-server-configmap.yaml",
                "user-manifest-my_role.yaml",
                "user-manifest-openvpn-client-configmap.yaml",
            ]
        );

        let cm: ConfigMap =
            serde_yaml::from_slice(&bundle["user-manifest-openvpn-client-configmap.yaml"]).unwrap();
        assert_eq!(
            cm.metadata.name.as_deref(),
            Some("user-manifest-openvpn-client-configmap")
        );
        assert_eq!(
            cm.data.unwrap()["data"],
            "kind: ConfigMap\nns: clusters-example"
        );

        let role: ConfigMap =
            serde_yaml::from_slice(&bundle["user-manifest-my_role.yaml"]).unwrap();
        assert_eq!(role.metadata.name.as_deref(), Some("user-manifest-my-role"));
    }

    #[test]
    fn test_patches_apply_in_order() {
        let bundle = render(
            &[
                ("etcd/etcd-cluster.yaml", "kind: EtcdCluster\nspec:\n  size: 1\n  version: 3.4.9\n"),
                (
                    "patches.yaml",
                    "- target: etcd-cluster.yaml\n  patch:\n    spec:\n      size: 3\n- target: etcd-cluster.yaml\n  patch:\n    spec:\n      version: null\n      repository: {{ namespace }}\n",
                ),
            ],
            "4.7.0",
        )
        .unwrap();

        assert!(!bundle.contains_key("patches.yaml"));
        let doc: serde_json::Value = serde_yaml::from_slice(&bundle["etcd-cluster.yaml"]).unwrap();
        assert_eq!(
            doc,
            serde_json::json!({
                "kind": "EtcdCluster",
                "spec": {"size": 3, "repository": "clusters-example"},
            })
        );
    }

    #[test]
    fn test_patch_with_missing_target_fails() {
        let err = render(
            &[("patches.yaml", "- target: absent.yaml\n  patch: {a: 1}\n")],
            "4.7.0",
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::Patch { ref target, .. } if target == "absent.yaml"));
    }

    #[test]
    fn test_directory_source_and_write_manifests() {
        let templates = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(templates.path().join("etcd")).unwrap();
        std::fs::write(
            templates.path().join("etcd/etcd-operator.yaml"),
            "ns: {{ namespace }}",
        )
        .unwrap();

        let params = params();
        let release = release("4.7.0");
        let pki = pki();
        let bundle = render_manifests(
            &TemplateSource::Directory(templates.path().to_path_buf()),
            &RenderInput {
                params: &params,
                release: &release,
                pull_secret: b"{}",
                pki: &pki,
            },
        )
        .unwrap();
        assert_eq!(text(&bundle, "etcd-operator.yaml"), "ns: clusters-example");

        let out = tempfile::tempdir().unwrap();
        write_manifests(&out.path().join("rendered"), &bundle).unwrap();
        assert_eq!(
            std::fs::read_to_string(out.path().join("rendered/etcd-operator.yaml")).unwrap(),
            "ns: clusters-example"
        );
    }

    #[test]
    fn test_pki_params_follow_cluster_params() {
        let pki = params().pki_params(None);
        assert_eq!(pki.external_api_address, "api.example.test");
        assert_eq!(pki.service_cidr, "172.30.0.0/16");
        assert_eq!(pki.namespace, "clusters-example");
        assert!(pki.dh_params_path.is_none());
    }
}
