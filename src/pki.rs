// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Certificate and key generation for a hosted control plane.
//!
//! [`generate`] produces the whole bundle stored in the `pki` secret of the
//! control-plane namespace: three CAs, the leaf certificates served or
//! presented by control-plane components, the admin and bootstrap
//! kubeconfigs, the service-account signing key and the openvpn DH
//! parameters.
//!
//! # Validity
//!
//! - CA certificates: 10 years
//! - Leaf certificates: 1 year
//!
//! The bundle is generated once; the reconciler never rotates it.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

/// Validity period of CA certificates in days (10 years)
pub const CA_VALIDITY_DAYS: i64 = 10 * 365;

/// Validity period of leaf certificates in days (1 year)
pub const CERT_VALIDITY_DAYS: i64 = 365;

/// Key of the root CA certificate in the bundle
pub const ROOT_CA_CERT: &str = "root-ca.crt";

/// Key of the root CA and cluster signer chain in the bundle
pub const COMBINED_CA_CERT: &str = "combined-ca.crt";

/// Key of the externally reachable admin kubeconfig in the bundle
pub const ADMIN_KUBECONFIG: &str = "admin.kubeconfig";

/// Key of the openvpn DH parameters in the bundle
pub const OPENVPN_DH_PARAMS: &str = "openvpn-dh.pem";

/// ffdhe2048 group from RFC 7919, used when no DH params file is given.
const DEFAULT_DH_PARAMS: &str = "-----BEGIN DH PARAMETERS-----
MIIBCAKCAQEA//////////+t+FRYortKmq/cViAnPTzx2LnFg84tNpWp4TZBFGQz
+8yTnc4kmz75fS/jY2MMddj2gbICrsRhetPfHtXV/WVhJDP1H18GbtCFY2VVPe0a
87VXE15/V8k1mE8McODmi3fipona8+/och3xWKE2rec1MKzKT0g6eXq8CrGCsyT7
YdEIqUuyyOP7uWrat2DX9GgdT0Kj3jlN9K5W7edjcrsZCwenyO4KbXCeAvzhzffi
7MA0BM0oNC9hkXL+nOmFg/+OTxIy7vKBg8P+OxtMb61zO7X8vC7CIAXFjvGDfRaD
ssbzSibBsu/6iGtCOGEoXJf//////////wIBAg==
-----END DH PARAMETERS-----
";

/// Generated artifacts keyed by file name.
pub type PkiBundle = BTreeMap<String, Vec<u8>>;

/// Errors that can occur while generating the PKI bundle
#[derive(Debug, Error)]
pub enum PkiError {
    /// Key pair generation or decoding failed
    #[error("key generation failed for {name}: {reason}")]
    Key { name: String, reason: String },

    /// Certificate parameters were rejected or signing failed
    #[error("certificate generation failed for {name}: {reason}")]
    Certificate { name: String, reason: String },

    /// An input parameter is malformed
    #[error("invalid pki parameter: {0}")]
    InvalidParams(String),

    /// The DH params file could not be read
    #[error("failed to read DH params from {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A kubeconfig could not be serialized
    #[error("failed to serialize kubeconfig {name}: {reason}")]
    Kubeconfig { name: String, reason: String },
}

/// Addresses and names the generated certificates are issued for.
#[derive(Debug, Clone, Default)]
pub struct PkiParams {
    pub external_api_address: String,
    pub external_api_port: u16,
    pub internal_api_port: u16,
    /// CIDR of the hosted cluster's service network, e.g. `172.30.0.0/16`
    pub service_cidr: String,
    pub external_oauth_address: String,
    pub external_openvpn_address: String,
    /// Apps domain; the ingress certificate covers `*.<subdomain>`
    pub ingress_subdomain: String,
    pub machine_config_server_address: String,
    /// Control-plane namespace the in-cluster service names resolve in
    pub namespace: String,
    /// Pre-generated DH parameters; the embedded ffdhe2048 group otherwise
    pub dh_params_path: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Signer {
    Root,
    ClusterSigner,
    OpenVpn,
}

struct CertificateAuthority {
    cert_pem: String,
    issuer: Issuer<'static, KeyPair>,
}

/// One certificate to issue from a CA.
struct CertSpec {
    name: &'static str,
    common_name: String,
    organization: Option<&'static str>,
    dns_names: Vec<String>,
    ips: Vec<IpAddr>,
    usages: Vec<ExtendedKeyUsagePurpose>,
    signer: Signer,
}

impl CertSpec {
    fn client(name: &'static str, common_name: &str, organization: Option<&'static str>) -> Self {
        Self {
            name,
            common_name: common_name.to_string(),
            organization,
            dns_names: Vec::new(),
            ips: Vec::new(),
            usages: vec![ExtendedKeyUsagePurpose::ClientAuth],
            signer: Signer::Root,
        }
    }

    fn server(name: &'static str, common_name: &str, dns_names: Vec<String>) -> Self {
        Self {
            name,
            common_name: common_name.to_string(),
            organization: None,
            dns_names,
            ips: Vec::new(),
            usages: vec![ExtendedKeyUsagePurpose::ServerAuth],
            signer: Signer::Root,
        }
    }

    fn peer(mut self) -> Self {
        self.usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        self
    }

    fn signed_by(mut self, signer: Signer) -> Self {
        self.signer = signer;
        self
    }

    fn with_ips(mut self, ips: Vec<IpAddr>) -> Self {
        self.ips = ips;
        self
    }

    /// Add an externally published address: an IP literal becomes an IP SAN,
    /// anything else the first DNS SAN.
    fn with_address(mut self, address: &str) -> Self {
        if address.is_empty() {
            return self;
        }
        match address.parse::<IpAddr>() {
            Ok(ip) => self.ips.push(ip),
            Err(_) => self.dns_names.insert(0, address.to_string()),
        }
        self
    }
}

fn compute_validity(days: i64) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    (now, now + ::time::Duration::days(days))
}

fn distinguished_name(common_name: &str, organization: Option<&str>) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    if let Some(org) = organization {
        dn.push(DnType::OrganizationName, DnValue::Utf8String(org.to_string()));
    }
    dn
}

fn generate_key(name: &str) -> Result<KeyPair, PkiError> {
    KeyPair::generate().map_err(|e| PkiError::Key {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

impl CertificateAuthority {
    fn new(name: &str) -> Result<(Self, String), PkiError> {
        let key = generate_key(name)?;
        let key_pem = key.serialize_pem();

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(name, Some("openshift"));
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let (not_before, not_after) = compute_validity(CA_VALIDITY_DAYS);
        params.not_before = not_before;
        params.not_after = not_after;

        let cert = params.self_signed(&key).map_err(|e| PkiError::Certificate {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let ca = Self {
            cert_pem: cert.pem(),
            issuer: Issuer::new(params, key),
        };
        Ok((ca, key_pem))
    }

    /// Issue a leaf certificate. Returns `(cert_pem, key_pem)`.
    fn issue(&self, spec: &CertSpec) -> Result<(String, String), PkiError> {
        let cert_error = |reason: String| PkiError::Certificate {
            name: spec.name.to_string(),
            reason,
        };

        let key = generate_key(spec.name)?;

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(&spec.common_name, spec.organization);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = spec.usages.clone();

        for dns in &spec.dns_names {
            let name = Ia5String::try_from(dns.as_str())
                .map_err(|e| cert_error(format!("invalid DNS name {dns}: {e}")))?;
            params.subject_alt_names.push(SanType::DnsName(name));
        }
        for ip in &spec.ips {
            params.subject_alt_names.push(SanType::IpAddress(*ip));
        }

        let (not_before, not_after) = compute_validity(CERT_VALIDITY_DAYS);
        params.not_before = not_before;
        params.not_after = not_after;

        let cert = params
            .signed_by(&key, &self.issuer)
            .map_err(|e| cert_error(e.to_string()))?;
        Ok((cert.pem(), key.serialize_pem()))
    }
}

/// First usable address of a CIDR; `172.30.0.0/16` gives `172.30.0.1`.
///
/// # Errors
///
/// Returns [`PkiError::InvalidParams`] for a malformed CIDR or one without a
/// usable host address.
pub fn first_usable_ip(cidr: &str) -> Result<IpAddr, PkiError> {
    let invalid = || PkiError::InvalidParams(format!("invalid service CIDR {cidr:?}"));
    let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let prefix: u32 = prefix.parse().map_err(|_| invalid())?;
    let address: IpAddr = address.parse().map_err(|_| invalid())?;

    match address {
        IpAddr::V4(v4) => {
            if prefix >= 32 {
                return Err(invalid());
            }
            let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
            let network = u32::from(v4) & mask;
            Ok(IpAddr::V4(Ipv4Addr::from(network + 1)))
        }
        IpAddr::V6(v6) => {
            if prefix >= 128 {
                return Err(invalid());
            }
            let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
            let network = u128::from(v6) & mask;
            Ok(IpAddr::V6(Ipv6Addr::from(network + 1)))
        }
    }
}

fn service_names(service: &str, namespace: &str) -> Vec<String> {
    vec![
        service.to_string(),
        format!("{service}.{namespace}"),
        format!("{service}.{namespace}.svc"),
        format!("{service}.{namespace}.svc.cluster.local"),
    ]
}

fn leaf_specs(params: &PkiParams, kube_internal_ip: IpAddr) -> Vec<CertSpec> {
    let ns = params.namespace.as_str();

    let mut kas_names = vec![
        "kubernetes".to_string(),
        "kubernetes.default".to_string(),
        "kubernetes.default.svc".to_string(),
        "kubernetes.default.svc.cluster.local".to_string(),
    ];
    kas_names.extend(service_names("kube-apiserver", ns));

    let kas_ips = vec![kube_internal_ip, IpAddr::V4(Ipv4Addr::LOCALHOST)];

    let mut etcd_server_names = vec![
        format!("*.etcd.{ns}.svc"),
        format!("*.etcd.{ns}.svc.cluster.local"),
        "localhost".to_string(),
    ];
    etcd_server_names.extend(service_names("etcd-client", ns));

    let mut openshift_apiserver_names = service_names("openshift-apiserver", ns);
    openshift_apiserver_names.extend([
        "openshift-apiserver.default.svc".to_string(),
        "openshift-apiserver.default.svc.cluster.local".to_string(),
    ]);

    let mut oauth_apiserver_names = service_names("openshift-oauth-apiserver", ns);
    oauth_apiserver_names.extend([
        "openshift-oauth-apiserver.default.svc".to_string(),
        "openshift-oauth-apiserver.default.svc.cluster.local".to_string(),
    ]);

    let mcs_names = service_names("machine-config-server", ns);
    let openvpn_names = service_names("openvpn-server", ns);

    vec![
        CertSpec::server("kube-apiserver-server", "kubernetes", kas_names)
            .with_ips(kas_ips)
            .with_address(&params.external_api_address),
        CertSpec::client(
            "kube-apiserver-kubelet",
            "system:kube-apiserver",
            Some("kubernetes"),
        ),
        CertSpec::client(
            "kube-apiserver-aggregator-proxy-client",
            "system:openshift-aggregator",
            Some("kubernetes"),
        ),
        CertSpec::client("etcd-client", "etcd-client", Some("kubernetes")),
        CertSpec::server("etcd-server", "etcd-server", etcd_server_names)
            .with_ips(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)])
            .peer(),
        CertSpec::server(
            "etcd-peer",
            "etcd-peer",
            vec![
                format!("*.etcd.{ns}.svc"),
                format!("*.etcd.{ns}.svc.cluster.local"),
            ],
        )
        .peer(),
        CertSpec::server(
            "ingress-openshift",
            "openshift-ingress",
            vec![format!("*.{}", params.ingress_subdomain)],
        ),
        CertSpec::server(
            "openshift-apiserver-server",
            "openshift-apiserver",
            openshift_apiserver_names,
        ),
        CertSpec::server(
            "openshift-oauth-apiserver-server",
            "openshift-oauth-apiserver",
            oauth_apiserver_names,
        ),
        CertSpec::server("oauth-openshift", "openshift-oauth", Vec::new())
            .with_address(&params.external_oauth_address),
        CertSpec::server("machine-config-server", "machine-config-server", mcs_names)
            .with_address(&params.machine_config_server_address),
        CertSpec::server("openvpn-server", "server", openvpn_names)
            .with_address(&params.external_openvpn_address)
            .signed_by(Signer::OpenVpn),
        CertSpec::client("openvpn-kube-apiserver-client", "kube-apiserver", None)
            .signed_by(Signer::OpenVpn),
        CertSpec::client("openvpn-worker-client", "worker", None).signed_by(Signer::OpenVpn),
    ]
}

/// Kubeconfig with embedded client credentials for `server`.
fn kubeconfig(
    name: &str,
    server: &str,
    ca_pem: &str,
    cert_pem: &str,
    key_pem: &str,
) -> Result<Vec<u8>, PkiError> {
    let config = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": "cluster",
            "cluster": {
                "server": server,
                "certificate-authority-data": BASE64.encode(ca_pem),
            },
        }],
        "users": [{
            "name": name,
            "user": {
                "client-certificate-data": BASE64.encode(cert_pem),
                "client-key-data": BASE64.encode(key_pem),
            },
        }],
        "contexts": [{
            "name": name,
            "context": {
                "cluster": "cluster",
                "user": name,
            },
        }],
        "current-context": name,
    });
    serde_yaml::to_string(&config)
        .map(String::into_bytes)
        .map_err(|e| PkiError::Kubeconfig {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

fn load_dh_params(path: Option<&Path>) -> Result<Vec<u8>, PkiError> {
    match path {
        Some(path) => std::fs::read(path).map_err(|source| PkiError::Io {
            path: path.to_path_buf(),
            source,
        }),
        None => Ok(DEFAULT_DH_PARAMS.as_bytes().to_vec()),
    }
}

/// Generate the complete PKI bundle for one hosted control plane.
///
/// # Errors
///
/// - [`PkiError::InvalidParams`] when the service CIDR is malformed
/// - [`PkiError::Io`] when the DH params file cannot be read
/// - Key or certificate generation failures
pub fn generate(params: &PkiParams) -> Result<PkiBundle, PkiError> {
    let kube_internal_ip = first_usable_ip(&params.service_cidr)?;
    let dh_params = load_dh_params(params.dh_params_path.as_deref())?;

    let mut bundle = PkiBundle::new();
    let mut put = |name: String, data: Vec<u8>| {
        bundle.insert(name, data);
    };

    let (root, root_key) = CertificateAuthority::new("root-ca")?;
    let (signer, signer_key) = CertificateAuthority::new("cluster-signer")?;
    let (openvpn, openvpn_key) = CertificateAuthority::new("openvpn-ca")?;

    for (name, ca, key) in [
        ("root-ca", &root, root_key),
        ("cluster-signer", &signer, signer_key),
        ("openvpn-ca", &openvpn, openvpn_key),
    ] {
        put(format!("{name}.crt"), ca.cert_pem.clone().into_bytes());
        put(format!("{name}.key"), key.into_bytes());
    }
    put(
        COMBINED_CA_CERT.to_string(),
        format!("{}{}", root.cert_pem, signer.cert_pem).into_bytes(),
    );

    let external_server = format!(
        "https://{}:{}",
        params.external_api_address, params.external_api_port
    );
    let internal_server = format!("https://kube-apiserver:{}", params.internal_api_port);

    let admin = CertSpec::client("admin", "system:admin", Some("system:masters"));
    let bootstrap = CertSpec::client(
        "bootstrap",
        "system:serviceaccount:openshift-machine-config-operator:node-bootstrapper",
        Some("system:serviceaccounts:openshift-machine-config-operator"),
    )
    .signed_by(Signer::ClusterSigner);

    for (file, spec, server) in [
        (ADMIN_KUBECONFIG, &admin, &external_server),
        ("internal-admin.kubeconfig", &admin, &internal_server),
        ("bootstrap.kubeconfig", &bootstrap, &external_server),
    ] {
        let ca = if spec.signer == Signer::ClusterSigner { &signer } else { &root };
        let (cert_pem, key_pem) = ca.issue(spec)?;
        put(
            file.to_string(),
            kubeconfig(spec.name, server, &root.cert_pem, &cert_pem, &key_pem)?,
        );
    }

    for spec in leaf_specs(params, kube_internal_ip) {
        let ca = match spec.signer {
            Signer::Root => &root,
            Signer::ClusterSigner => &signer,
            Signer::OpenVpn => &openvpn,
        };
        let (cert_pem, key_pem) = ca.issue(&spec)?;
        debug!(certificate = spec.name, common_name = %spec.common_name, "Issued certificate");
        put(format!("{}.crt", spec.name), cert_pem.into_bytes());
        put(format!("{}.key", spec.name), key_pem.into_bytes());
    }

    let service_account = KeyPair::generate_for(&rcgen::PKCS_RSA_SHA256).map_err(|e| {
        PkiError::Key {
            name: "service-account".to_string(),
            reason: e.to_string(),
        }
    })?;
    put(
        "service-account.key".to_string(),
        service_account.serialize_pem().into_bytes(),
    );
    put(
        "service-account.pub".to_string(),
        service_account.public_key_pem().into_bytes(),
    );

    put(OPENVPN_DH_PARAMS.to_string(), dh_params);

    info!(
        namespace = %params.namespace,
        artifacts = bundle.len(),
        "Generated PKI bundle"
    );
    Ok(bundle)
}

#[cfg(test)]
#[path = "pki_tests.rs"]
mod pki_tests;
