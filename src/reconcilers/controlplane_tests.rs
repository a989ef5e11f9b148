// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `controlplane.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{DnsSpec, HostedControlPlaneSpec, PlatformSpec};
    use k8s_openapi::api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, ServicePort, ServiceSpec, ServiceStatus,
    };

    fn hcp() -> HostedControlPlane {
        let mut hcp = HostedControlPlane::new(
            "example",
            HostedControlPlaneSpec {
                release_image: "quay.io/ocp-release:4.7.0".to_string(),
                pull_secret: LocalObjectReference {
                    name: "pull-secret".to_string(),
                },
                ssh_key: LocalObjectReference {
                    name: "ssh-key".to_string(),
                },
                infra_id: "example-x7k2p".to_string(),
                platform: PlatformSpec {
                    r#type: PlatformType::AWS,
                    aws: None,
                },
                dns: DnsSpec {
                    base_domain: "example.com".to_string(),
                },
                ..Default::default()
            },
        );
        hcp.metadata.namespace = Some("clusters-example".to_string());
        hcp
    }

    fn service(type_: &str) -> Service {
        Service {
            spec: Some(ServiceSpec {
                type_: Some(type_.to_string()),
                cluster_ip: Some("172.30.0.10".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn with_ingress(mut svc: Service, hostname: Option<&str>, ip: Option<&str>) -> Service {
        svc.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    hostname: hostname.map(str::to_string),
                    ip: ip.map(str::to_string),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });
        svc
    }

    fn ready_infra() -> InfraStatus {
        InfraStatus {
            api_address: "api.example.test".to_string(),
            api_port: 6443,
            oauth_address: "oauth.example.test".to_string(),
            oauth_port: 8443,
            vpn_address: "vpn.example.test".to_string(),
            vpn_port: 1194,
            openshift_api_address: "172.30.0.20".to_string(),
            oauth_api_server_address: "172.30.0.21".to_string(),
            ignition_provider_address: "ignition.example.test".to_string(),
        }
    }

    fn data(secret: &Secret, key: &str) -> String {
        String::from_utf8(secret.data.as_ref().unwrap()[key].0.clone()).unwrap()
    }

    // ========== Infrastructure status ==========

    #[test]
    fn test_load_balancer_prefers_hostname() {
        let svc = with_ingress(service("LoadBalancer"), Some("lb.example.test"), Some("1.2.3.4"));
        assert_eq!(
            service_endpoint(&svc, 6443),
            ("lb.example.test".to_string(), 6443)
        );

        let svc = with_ingress(service("LoadBalancer"), None, Some("1.2.3.4"));
        assert_eq!(service_endpoint(&svc, 6443).0, "1.2.3.4");
    }

    #[test]
    fn test_load_balancer_without_ingress_is_unassigned() {
        assert_eq!(service_endpoint(&service("LoadBalancer"), 1194).0, "");
    }

    #[test]
    fn test_node_port_uses_external_ip_and_node_port() {
        let mut svc = service("NodePort");
        let spec = svc.spec.as_mut().unwrap();
        spec.external_ips = Some(vec!["10.0.0.5".to_string()]);
        spec.ports = Some(vec![ServicePort {
            port: 6443,
            node_port: Some(31443),
            ..Default::default()
        }]);
        assert_eq!(service_endpoint(&svc, 6443), ("10.0.0.5".to_string(), 31443));
    }

    #[test]
    fn test_cluster_ip_service() {
        assert_eq!(service_endpoint(&service("ClusterIP"), 443).0, "172.30.0.10");

        let mut headless = service("ClusterIP");
        headless.spec.as_mut().unwrap().cluster_ip = Some("None".to_string());
        assert_eq!(cluster_ip(&headless), "");
    }

    #[test]
    fn test_infra_status_readiness() {
        assert!(ready_infra().is_ready());
        assert!(!InfraStatus::default().is_ready());

        let mut no_vpn = ready_infra();
        no_vpn.vpn_address.clear();
        assert!(!no_vpn.is_ready());

        let mut no_ignition = ready_infra();
        no_ignition.ignition_provider_address.clear();
        assert!(!no_ignition.is_ready());

        // The openshift-apiserver cluster IP is not required
        let mut no_openshift_api = ready_infra();
        no_openshift_api.openshift_api_address.clear();
        assert!(no_openshift_api.is_ready());
    }

    // ========== Parameters ==========

    #[test]
    fn test_cluster_params() {
        let params = cluster_params(&hcp(), &ready_infra(), "ssh-rsa AAAA", "abcd");
        assert_eq!(params.namespace, "clusters-example");
        assert_eq!(params.cluster_name, "example");
        assert_eq!(params.ingress_subdomain, "apps.example.com");
        assert_eq!(params.external_api_address, "api.example.test");
        assert_eq!(params.external_api_port, 6443);
        assert_eq!(params.internal_api_port, 6443);
        assert_eq!(params.external_oauth_port, 8443);
        assert_eq!(params.external_openvpn_port, 1194);
        assert_eq!(params.openshift_api_cluster_ip, "172.30.0.20");
        assert_eq!(params.platform_type, "AWS");
        assert_eq!(params.cloud_provider, "aws");
        assert_eq!(params.ssh_key, "ssh-rsa AAAA");
        assert_eq!(params.image_registry_http_secret, "abcd");
    }

    #[test]
    fn test_image_registry_secret_shape() {
        let secret = generate_image_registry_secret();
        assert_eq!(secret.len(), 128);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(secret, generate_image_registry_secret());
    }

    // ========== Kubeadmin password ==========

    #[test]
    fn test_kubeadmin_password_shape() {
        let alphabet = format!("{LOWER_LETTERS}{UPPER_LETTERS}{DIGITS}");
        for _ in 0..50 {
            let password = generate_kubeadmin_password();
            let chars: Vec<char> = password.chars().collect();
            assert_eq!(chars.len(), 23, "password {password}");
            for (i, c) in chars.iter().enumerate() {
                if [5, 11, 17].contains(&i) {
                    assert_eq!(*c, '-');
                } else {
                    assert!(alphabet.contains(*c), "unexpected {c} in {password}");
                }
            }
        }
    }

    #[test]
    fn test_kubeadmin_password_alphabet_is_unambiguous() {
        for ambiguous in ['l', 'I', 'O', 'o', '0', '1'] {
            assert!(!LOWER_LETTERS.contains(ambiguous));
            assert!(!UPPER_LETTERS.contains(ambiguous));
            assert!(!DIGITS.contains(ambiguous));
        }
    }

    #[test]
    fn test_kubeadmin_password_never_uses_ambiguous_characters() {
        for _ in 0..1000 {
            let password = generate_kubeadmin_password();
            let chars: Vec<char> = password.chars().collect();
            assert_eq!(chars.len(), 23, "password {password}");
            assert_eq!((chars[5], chars[11], chars[17]), ('-', '-', '-'), "password {password}");
            assert_eq!(chars.iter().filter(|c| **c == '-').count(), 3, "password {password}");
            assert!(
                !password.contains(['l', 'I', 'O', 'o', '0', '1']),
                "ambiguous character in {password}"
            );
        }
    }

    #[test]
    fn test_kubeadmin_secrets() {
        let secret = kubeadmin_password_secret("clusters-example", "abcde-fghij-klmno-pqrst");
        assert_eq!(secret.metadata.name.as_deref(), Some("kubeadmin-password"));
        assert_eq!(data(&secret, "password"), "abcde-fghij-klmno-pqrst");

        let target = kubeadmin_target_config_map("clusters-example", "abcde-fghij-klmno-pqrst")
            .unwrap();
        assert_eq!(
            target.metadata.name.as_deref(),
            Some("user-manifest-kubeadmin-password")
        );
        let embedded: Secret =
            serde_json::from_str(&target.data.as_ref().unwrap()["data"]).unwrap();
        assert_eq!(embedded.metadata.name.as_deref(), Some("kubeadmin"));
        assert_eq!(embedded.metadata.namespace.as_deref(), Some("kube-system"));
        let hash = data(&embedded, "kubeadmin");
        assert!(bcrypt::verify("abcde-fghij-klmno-pqrst", &hash).unwrap());
    }

    // ========== Side objects ==========

    #[test]
    fn test_user_data_ignition_v3_from_4_6() {
        let version = Version::parse("4.7.0").unwrap();
        let secret = user_data_secret("example", "clusters-example", "ignition.test", &version);
        assert_eq!(secret.metadata.name.as_deref(), Some("example-user-data"));
        assert_eq!(
            data(&secret, "value"),
            r#"{"ignition":{"config":{"merge":[{"source":"http://ignition.test/config/master","verification":{}}]},"security":{},"timeouts":{},"version":"3.1.0"},"networkd":{},"passwd":{},"storage":{},"systemd":{}}"#
        );
        assert_eq!(data(&secret, "disableTemplating"), "dHJ1ZQ==");
    }

    #[test]
    fn test_user_data_ignition_v2_before_4_6() {
        let version = Version::parse("4.5.9").unwrap();
        let secret = user_data_secret("example", "clusters-example", "ignition.test", &version);
        assert_eq!(
            data(&secret, "value"),
            r#"{"ignition":{"config":{"append":[{"source":"http://ignition.test/config/master","verification":{}}]},"security":{},"timeouts":{},"version":"2.2.0"},"networkd":{},"passwd":{},"storage":{},"systemd":{}}"#
        );
    }

    #[test]
    fn test_user_data_ignores_prerelease() {
        // 4.6.0-rc.1 sorts below 4.6.0 unless the pre-release tag is dropped
        let version = Version::parse("4.6.0-rc.1+build.5").unwrap();
        let secret = user_data_secret("example", "clusters-example", "ignition.test", &version);
        assert!(data(&secret, "value").contains(r#""version":"3.1.0""#));
    }

    #[test]
    fn test_pull_secret_config_map() {
        let cm = pull_secret_config_map("clusters-example", br#"{"auths":{}}"#).unwrap();
        assert_eq!(cm.metadata.name.as_deref(), Some("user-manifest-pullsecret"));
        let embedded: Secret = serde_json::from_str(&cm.data.as_ref().unwrap()["data"]).unwrap();
        assert_eq!(embedded.metadata.name.as_deref(), Some("pull-secret"));
        assert_eq!(embedded.metadata.namespace.as_deref(), Some("openshift-config"));
        assert_eq!(embedded.type_.as_deref(), Some("kubernetes.io/dockerconfigjson"));
        assert_eq!(data(&embedded, ".dockerconfigjson"), r#"{"auths":{}}"#);

        let raw: serde_json::Value =
            serde_json::from_str(&cm.data.as_ref().unwrap()["data"]).unwrap();
        assert_eq!(raw["kind"], "Secret");
        assert_eq!(raw["apiVersion"], "v1");
    }

    #[test]
    fn test_kubeconfig_reference_defaults() {
        let mut hcp = hcp();
        let reference = kubeconfig_reference(&hcp);
        assert_eq!(reference.name, "example-kubeconfig");
        assert_eq!(reference.key, "value");

        hcp.spec.kube_config = Some(SecretKeyReference {
            name: "admin".to_string(),
            key: "kubeconfig".to_string(),
        });
        let secret = kubeconfig_secret("clusters-example", &kubeconfig_reference(&hcp), b"apiVersion: v1");
        assert_eq!(secret.metadata.name.as_deref(), Some("admin"));
        assert_eq!(data(&secret, "kubeconfig"), "apiVersion: v1");
    }

    // ========== Naming ==========

    #[test]
    fn test_fnv_hash() {
        assert_eq!(fnv_hash(""), "811c9dc5");
        assert_eq!(fnv_hash("a"), "e40c292c");
        assert_eq!(fnv_hash("foobar"), "bf9cf968");
    }

    #[test]
    fn test_get_name_short_enough() {
        assert_eq!(get_name("infra-cluster", "worker", 43), "infra-cluster-worker");
        assert_eq!(get_name("a", "b", 0), "");
    }

    #[test]
    fn test_get_name_truncates_base() {
        let base = "a".repeat(40);
        let name = get_name(&base, "worker", 43);
        assert_eq!(name.len(), 43);
        assert_eq!(name, format!("{}-{}-worker", "a".repeat(27), fnv_hash(&base)));
    }

    #[test]
    fn test_get_name_with_long_suffix() {
        let suffix = "s".repeat(40);
        let name = get_name("abc", &suffix, 43);
        assert_eq!(name, format!("abc-{}", fnv_hash(&format!("abc-{suffix}"))));

        let name = get_name(&"b".repeat(50), &suffix, 43);
        assert_eq!(name.len(), 43);
        assert!(name.starts_with(&"b".repeat(34)));
    }

    #[test]
    fn test_generate_machine_set_name() {
        assert_eq!(
            generate_machine_set_name("example-x7k2p", "example", "worker"),
            "example-x7k2p-example-worker"
        );
        let long = generate_machine_set_name("a-very-long-infrastructure-id", "a-long-cluster", "worker");
        assert_eq!(long.len(), 43);
        assert!(long.ends_with("-worker"));
    }

    #[test]
    fn test_worker_machine_set() {
        let ms = worker_machine_set(&hcp(), Some("1.20.0"), None);
        let name = ms.metadata.name.clone().unwrap();
        assert_eq!(name, "example-x7k2p-example-worker");
        assert_eq!(ms.metadata.namespace.as_deref(), Some("clusters-example"));
        assert_eq!(ms.spec.replicas, Some(0));
        assert_eq!(ms.spec.cluster_name, "example-x7k2p");
        assert_eq!(ms.spec.selector.match_labels, ms.spec.template.metadata.labels);

        let machine = &ms.spec.template.spec;
        assert_eq!(machine.bootstrap.data_secret_name.as_deref(), Some("example-user-data"));
        assert_eq!(machine.infrastructure_ref.kind, "AWSMachineTemplate");
        assert_eq!(machine.infrastructure_ref.name, name);
        assert_eq!(machine.version.as_deref(), Some("v1.20.0"));
    }

    #[test]
    fn test_should_apply() {
        assert!(should_apply("kube-apiserver-deployment.yaml"));
        assert!(should_apply("user-manifest-foo.yaml"));
        assert!(!should_apply("kube-apiserver-service.yaml"));
        assert!(!should_apply("openshift-apiserver-service.yaml"));
        assert!(!should_apply("oauth-server-service.yaml"));
        assert!(!should_apply("v4-0-config-system-branding.yaml"));
        assert!(!should_apply("openvpn-dh.pem"));
    }
}
