// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `HostedControlPlane` reconciliation.
//!
//! A reconcile pass reads the published endpoints of the control plane
//! services, generates the PKI bundle once, renders the manifests of the
//! release and server-side applies them into the control plane namespace.
//! It then publishes the side objects tenants and machines consume:
//!
//! - `<name>-user-data`: ignition pointer served to new machines
//! - `kubeadmin-password` and its hashed `kube-system/kubeadmin` user manifest
//! - `<name>-kubeconfig`: the admin kubeconfig
//! - `user-manifest-pullsecret`: the pull secret for `openshift-config`
//! - the worker `MachineSet` (AWS only)
//!
//! Generated values (PKI, passwords, the registry secret) are created once
//! and never rewritten while their secret exists.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::api::{ObjectMeta, Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use semver::{BuildMetadata, Prerelease, Version};
use serde_json::json;
use tracing::{debug, info};

use super::resources::{create_if_absent, parse_manifest, ManifestApplier};
use super::status_changed;
use crate::capi::{
    Bootstrap, LabelSelector, MachineMetadata, MachineSet, MachineSetSpec, MachineSpec,
    MachineTemplateSpec, ObjectReference, CAPA_API_VERSION, CLUSTER_NAME_LABEL,
    MACHINE_SET_NAME_LABEL,
};
use crate::constants::{
    API_SERVER_PORT, CONDITION_AVAILABLE, CONTROL_PLANE_FIELD_MANAGER, EXCLUDED_MANIFESTS,
    IMAGE_REGISTRY_SECRET_BYTES, IMAGE_REGISTRY_SECRET_KEY, IMAGE_REGISTRY_SECRET_NAME,
    KIND_AWS_MACHINE_TEMPLATE, KUBEADMIN_PASSWORD_DASHES, KUBEADMIN_PASSWORD_KEY,
    KUBEADMIN_PASSWORD_LENGTH, KUBEADMIN_PASSWORD_SECRET_NAME, KUBEADMIN_TARGET_CONFIGMAP_NAME,
    KUBE_APISERVER_SERVICE, MACHINE_CONFIG_SERVER_SERVICE, MACHINE_SET_NAME_MAX_LENGTH,
    OAUTH_BRANDING_MANIFEST, OAUTH_PORT, OAUTH_SERVICE, OPENSHIFT_APISERVER_SERVICE,
    OPENSHIFT_OAUTH_APISERVER_SERVICE, OPENVPN_PORT, OPENVPN_SERVICE, PKI_SECRET_NAME,
    PULL_SECRET_CONFIGMAP_NAME, PULL_SECRET_KEY, SECRET_VALUE_KEY, SSH_PUBLIC_KEY,
    USER_MANIFEST_DATA_KEY,
};
use crate::context::Context;
use crate::crd::{
    set_condition, ApiEndpoint, Condition, HostedControlPlane, HostedControlPlaneStatus,
    LocalObjectReference, PlatformType, SecretKeyReference,
};
use crate::errors::{AggregateError, ReconcileError};
use crate::metrics::ObjectWrite;
use crate::pki::{self, PkiBundle, ADMIN_KUBECONFIG, COMBINED_CA_CERT};
use crate::render::{render_manifests, ClusterParams, ManifestBundle, RenderInput};

const LOWER_LETTERS: &str = "abcdefghijkmnpqrstuvwxyz";
const UPPER_LETTERS: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ";
const DIGITS: &str = "23456789";

/// Addresses published by the control plane services.
///
/// Empty strings mean the address has not been assigned yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfraStatus {
    pub api_address: String,
    pub api_port: u16,
    pub oauth_address: String,
    pub oauth_port: u16,
    pub vpn_address: String,
    pub vpn_port: u16,
    pub openshift_api_address: String,
    pub oauth_api_server_address: String,
    pub ignition_provider_address: String,
}

impl InfraStatus {
    /// All externally reachable endpoints are known.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.api_address.is_empty()
            && self.api_port > 0
            && !self.oauth_address.is_empty()
            && self.oauth_port > 0
            && !self.vpn_address.is_empty()
            && self.vpn_port > 0
            && !self.ignition_provider_address.is_empty()
    }
}

/// External address and port of a service.
///
/// - `LoadBalancer`: first ingress hostname, else its IP, with `default_port`
/// - `NodePort`: first external IP with the node port of the first port
/// - anything else: the cluster IP with `default_port`
///
/// The address is empty while nothing has been assigned.
#[must_use]
pub fn service_endpoint(service: &Service, default_port: u16) -> (String, u16) {
    let spec = service.spec.clone().unwrap_or_default();
    match spec.type_.as_deref() {
        Some("LoadBalancer") => {
            let address = service
                .status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref())
                .and_then(|ingress| ingress.first())
                .and_then(|first| {
                    first
                        .hostname
                        .clone()
                        .filter(|h| !h.is_empty())
                        .or_else(|| first.ip.clone().filter(|ip| !ip.is_empty()))
                })
                .unwrap_or_default();
            (address, default_port)
        }
        Some("NodePort") => {
            let address = spec
                .external_ips
                .as_ref()
                .and_then(|ips| ips.first().cloned())
                .unwrap_or_default();
            let port = spec
                .ports
                .as_ref()
                .and_then(|ports| ports.first())
                .and_then(|p| p.node_port)
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(default_port);
            (address, port)
        }
        _ => (cluster_ip(service), default_port),
    }
}

/// Cluster IP of a service, empty for headless or unassigned services.
#[must_use]
pub fn cluster_ip(service: &Service) -> String {
    service
        .spec
        .as_ref()
        .and_then(|s| s.cluster_ip.clone())
        .filter(|ip| ip != "None")
        .unwrap_or_default()
}

async fn infrastructure_status(client: &Client, namespace: &str) -> Result<InfraStatus, kube::Error> {
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    let mut status = InfraStatus::default();

    if let Some(svc) = services.get_opt(KUBE_APISERVER_SERVICE).await? {
        (status.api_address, status.api_port) = service_endpoint(&svc, API_SERVER_PORT);
    }
    if let Some(svc) = services.get_opt(OAUTH_SERVICE).await? {
        (status.oauth_address, status.oauth_port) = service_endpoint(&svc, OAUTH_PORT);
    }
    if let Some(svc) = services.get_opt(OPENVPN_SERVICE).await? {
        (status.vpn_address, status.vpn_port) = service_endpoint(&svc, OPENVPN_PORT);
    }
    if let Some(svc) = services.get_opt(OPENSHIFT_APISERVER_SERVICE).await? {
        status.openshift_api_address = cluster_ip(&svc);
    }
    if let Some(svc) = services.get_opt(OPENSHIFT_OAUTH_APISERVER_SERVICE).await? {
        status.oauth_api_server_address = cluster_ip(&svc);
    }
    if let Some(svc) = services.get_opt(MACHINE_CONFIG_SERVER_SERVICE).await? {
        status.ignition_provider_address = service_endpoint(&svc, 0).0;
    }
    Ok(status)
}

/// Template parameters of a control plane.
#[must_use]
pub fn cluster_params(
    hcp: &HostedControlPlane,
    infra: &InfraStatus,
    ssh_key: &str,
    image_registry_http_secret: &str,
) -> ClusterParams {
    let spec = &hcp.spec;
    let base_domain = spec.dns.base_domain.clone();
    ClusterParams {
        namespace: hcp.namespace().unwrap_or_default(),
        cluster_name: hcp.name_any(),
        infra_id: spec.infra_id.clone(),
        ingress_subdomain: format!("apps.{base_domain}"),
        base_domain,
        external_api_address: infra.api_address.clone(),
        external_api_port: infra.api_port,
        internal_api_port: API_SERVER_PORT,
        external_oauth_address: infra.oauth_address.clone(),
        external_oauth_port: infra.oauth_port,
        external_openvpn_address: infra.vpn_address.clone(),
        external_openvpn_port: infra.vpn_port,
        ignition_provider_address: infra.ignition_provider_address.clone(),
        service_cidr: spec.networking.service_cidr.clone(),
        pod_cidr: spec.networking.pod_cidr.clone(),
        machine_cidr: spec.networking.machine_cidr.clone(),
        release_image: spec.release_image.clone(),
        ssh_key: ssh_key.to_string(),
        image_registry_http_secret: image_registry_http_secret.to_string(),
        platform_type: spec.platform.r#type.as_str().to_string(),
        cloud_provider: spec.platform.r#type.cloud_provider().to_string(),
        openshift_api_cluster_ip: infra.openshift_api_address.clone(),
        oauth_api_server_address: infra.oauth_api_server_address.clone(),
        openshift_apiserver_ca_bundle: String::new(),
    }
}

/// Hex encoding of 64 random bytes.
#[must_use]
pub fn generate_image_registry_secret() -> String {
    let mut bytes = [0u8; IMAGE_REGISTRY_SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A 23 character password over an unambiguous alphabet with dashes at
/// positions 5, 11 and 17.
#[must_use]
pub fn generate_kubeadmin_password() -> String {
    let alphabet: Vec<char> = format!("{LOWER_LETTERS}{UPPER_LETTERS}{DIGITS}")
        .chars()
        .collect();
    let mut rng = OsRng;

    // Every character is inserted at a random position of the password built so far
    let mut password: Vec<char> = Vec::with_capacity(KUBEADMIN_PASSWORD_LENGTH);
    for i in 0..KUBEADMIN_PASSWORD_LENGTH {
        let next = alphabet[rng.gen_range(0..alphabet.len())];
        if password.is_empty() {
            password.push(next);
        }
        if i < KUBEADMIN_PASSWORD_LENGTH - 1 {
            let at = rng.gen_range(0..=password.len());
            password.insert(at, next);
        }
    }
    for position in KUBEADMIN_PASSWORD_DASHES {
        if let Some(c) = password.get_mut(position) {
            *c = '-';
        }
    }
    password.into_iter().collect()
}

/// Ignition user data pointing machines at the machine config server.
///
/// Releases from 4.6 on (pre-release and build tags ignored) use ignition
/// spec 3.1 `merge`, older ones spec 2.2 `append`.
#[must_use]
pub fn user_data_secret(
    name: &str,
    namespace: &str,
    ignition_provider_address: &str,
    version: &Version,
) -> Secret {
    let mut version = version.clone();
    version.pre = Prerelease::EMPTY;
    version.build = BuildMetadata::EMPTY;

    let value = if version >= Version::new(4, 6, 0) {
        format!(
            r#"{{"ignition":{{"config":{{"merge":[{{"source":"http://{ignition_provider_address}/config/master","verification":{{}}}}]}},"security":{{}},"timeouts":{{}},"version":"3.1.0"}},"networkd":{{}},"passwd":{{}},"storage":{{}},"systemd":{{}}}}"#
        )
    } else {
        format!(
            r#"{{"ignition":{{"config":{{"append":[{{"source":"http://{ignition_provider_address}/config/master","verification":{{}}}}]}},"security":{{}},"timeouts":{{}},"version":"2.2.0"}},"networkd":{{}},"passwd":{{}},"storage":{{}},"systemd":{{}}}}"#
        )
    };

    Secret {
        metadata: ObjectMeta {
            name: Some(format!("{name}-user-data")),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (
                "disableTemplating".to_string(),
                ByteString(BASE64.encode("true").into_bytes()),
            ),
            (SECRET_VALUE_KEY.to_string(), ByteString(value.into_bytes())),
        ])),
        ..Default::default()
    }
}

/// Secret holding the plain kubeadmin password.
#[must_use]
pub fn kubeadmin_password_secret(namespace: &str, password: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(KUBEADMIN_PASSWORD_SECRET_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            KUBEADMIN_PASSWORD_KEY.to_string(),
            ByteString(password.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

fn user_manifest_config_map(
    namespace: &str,
    name: &str,
    payload: &Secret,
) -> Result<ConfigMap, ReconcileError> {
    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            USER_MANIFEST_DATA_KEY.to_string(),
            serde_json::to_string(payload)?,
        )])),
        ..Default::default()
    })
}

/// User manifest creating `kube-system/kubeadmin` with the bcrypt hash of
/// `password` in the hosted cluster.
///
/// # Errors
///
/// Fails when hashing or serialization fails.
pub fn kubeadmin_target_config_map(
    namespace: &str,
    password: &str,
) -> Result<ConfigMap, ReconcileError> {
    let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| ReconcileError::Other(anyhow::anyhow!("failed to hash kubeadmin password: {e}")))?;
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some("kubeadmin".to_string()),
            namespace: Some("kube-system".to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "kubeadmin".to_string(),
            ByteString(hash.into_bytes()),
        )])),
        ..Default::default()
    };
    user_manifest_config_map(namespace, KUBEADMIN_TARGET_CONFIGMAP_NAME, &secret)
}

/// User manifest creating `openshift-config/pull-secret` in the hosted cluster.
///
/// # Errors
///
/// Fails when serialization fails.
pub fn pull_secret_config_map(namespace: &str, pull_secret: &[u8]) -> Result<ConfigMap, ReconcileError> {
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some("pull-secret".to_string()),
            namespace: Some("openshift-config".to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            PULL_SECRET_KEY.to_string(),
            ByteString(pull_secret.to_vec()),
        )])),
        type_: Some("kubernetes.io/dockerconfigjson".to_string()),
        ..Default::default()
    };
    user_manifest_config_map(namespace, PULL_SECRET_CONFIGMAP_NAME, &secret)
}

/// Secret publishing the admin kubeconfig under `reference`.
#[must_use]
pub fn kubeconfig_secret(namespace: &str, reference: &SecretKeyReference, kubeconfig: &[u8]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(reference.name.clone()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            reference.key.clone(),
            ByteString(kubeconfig.to_vec()),
        )])),
        ..Default::default()
    }
}

/// Where the admin kubeconfig of `hcp` is published.
#[must_use]
pub fn kubeconfig_reference(hcp: &HostedControlPlane) -> SecretKeyReference {
    hcp.spec.kube_config.clone().unwrap_or_else(|| SecretKeyReference {
        name: format!("{}-kubeconfig", hcp.name_any()),
        key: SECRET_VALUE_KEY.to_string(),
    })
}

/// FNV-1a 32-bit hash as 8 hex digits.
#[must_use]
pub fn fnv_hash(text: &str) -> String {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in text.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    format!("{hash:08x}")
}

fn prefix(text: &str, length: usize) -> String {
    text.chars().take(length).collect()
}

/// Join `base` and `suffix` with a dash, shortening to `max_length`.
///
/// When too long, the base is truncated and a hash of the base inserted
/// (`<base>-<hash>-<suffix>`). When the suffix alone leaves no room, the
/// result is `<base>-<hash of base-suffix>` cut to `max_length`.
#[must_use]
pub fn get_name(base: &str, suffix: &str, max_length: usize) -> String {
    if max_length == 0 {
        return String::new();
    }
    let name = format!("{base}-{suffix}");
    if name.len() <= max_length {
        return name;
    }

    // room left after "-<hash>-"
    match max_length.checked_sub(10 + suffix.len()) {
        Some(base_length) => format!("{}-{}-{suffix}", prefix(base, base_length), fnv_hash(base)),
        None => {
            let short = format!(
                "{}-{}",
                prefix(base, max_length.saturating_sub(9)),
                fnv_hash(&name)
            );
            prefix(&short, max_length)
        }
    }
}

/// Name of a machine set of `cluster_name`, at most 43 characters.
#[must_use]
pub fn generate_machine_set_name(infra_id: &str, cluster_name: &str, suffix: &str) -> String {
    get_name(
        &format!("{infra_id}-{cluster_name}"),
        suffix,
        MACHINE_SET_NAME_MAX_LENGTH,
    )
}

/// Worker machine set, scaled to zero, booting from the control plane's user data.
#[must_use]
pub fn worker_machine_set(
    hcp: &HostedControlPlane,
    kubernetes_version: Option<&str>,
    owner: Option<&OwnerReference>,
) -> MachineSet {
    let cluster = hcp.name_any();
    let infra_id = hcp.spec.infra_id.clone();
    let name = generate_machine_set_name(&infra_id, &cluster, "worker");
    let labels = BTreeMap::from([
        (CLUSTER_NAME_LABEL.to_string(), infra_id.clone()),
        (MACHINE_SET_NAME_LABEL.to_string(), name.clone()),
    ]);

    let mut machine_set = MachineSet::new(
        &name,
        MachineSetSpec {
            cluster_name: infra_id.clone(),
            replicas: Some(0),
            selector: LabelSelector {
                match_labels: labels.clone(),
            },
            template: MachineTemplateSpec {
                metadata: MachineMetadata {
                    labels,
                    annotations: BTreeMap::new(),
                },
                spec: MachineSpec {
                    cluster_name: infra_id,
                    bootstrap: Bootstrap {
                        data_secret_name: Some(format!("{cluster}-user-data")),
                    },
                    infrastructure_ref: ObjectReference {
                        api_version: CAPA_API_VERSION.to_string(),
                        kind: KIND_AWS_MACHINE_TEMPLATE.to_string(),
                        name: name.clone(),
                        namespace: hcp.namespace(),
                    },
                    version: kubernetes_version.map(|v| format!("v{}", v.trim_start_matches('v'))),
                },
            },
        },
    );
    machine_set.metadata.namespace = hcp.namespace();
    machine_set.metadata.owner_references = owner.map(|o| vec![o.clone()]);
    machine_set
}

/// Manifests applied with server-side apply; excluded services and the
/// branding manifest are handled elsewhere.
#[must_use]
pub fn should_apply(manifest: &str) -> bool {
    (manifest.ends_with(".yaml") || manifest.ends_with(".yml"))
        && manifest != OAUTH_BRANDING_MANIFEST
        && !EXCLUDED_MANIFESTS.contains(&manifest)
}

fn with_owner<K: Resource>(mut object: K, owner: Option<&OwnerReference>) -> K {
    object.meta_mut().owner_references = owner.map(|o| vec![o.clone()]);
    object
}

fn secret_value(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|value| value.0.clone())
}

async fn read_secret_key(api: &Api<Secret>, name: &str, key: &str) -> Result<Vec<u8>, ReconcileError> {
    let secret = api
        .get_opt(name)
        .await?
        .ok_or_else(|| ReconcileError::Config(format!("secret {name} not found")))?;
    secret_value(&secret, key)
        .ok_or_else(|| ReconcileError::Config(format!("secret {name} is missing the {key} key")))
}

/// Value of `key` in secret `name`, generating and storing it on first use.
async fn ensure_generated_value(
    client: &Client,
    namespace: &str,
    secret: Secret,
    key: &str,
) -> Result<(Vec<u8>, bool), ReconcileError> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let name = secret.name_any();
    if let Some(existing) = api.get_opt(&name).await? {
        let value = secret_value(&existing, key)
            .ok_or_else(|| ReconcileError::Config(format!("secret {name} is missing the {key} key")))?;
        return Ok((value, false));
    }
    if create_if_absent(client, namespace, &secret).await? {
        let value = secret_value(&secret, key).unwrap_or_default();
        return Ok((value, true));
    }
    // created concurrently, read the winner
    let existing = api.get(&name).await?;
    let value = secret_value(&existing, key)
        .ok_or_else(|| ReconcileError::Config(format!("secret {name} is missing the {key} key")))?;
    Ok((value, false))
}

async fn ensure_pki(
    client: &Client,
    namespace: &str,
    params: &ClusterParams,
    ctx: &Context,
    owner: Option<&OwnerReference>,
) -> Result<PkiBundle, ReconcileError> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    if let Some(existing) = api.get_opt(PKI_SECRET_NAME).await? {
        debug!(namespace = %namespace, "Using existing pki secret");
        return Ok(existing
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect());
    }

    info!(namespace = %namespace, "Generating PKI secret data");
    let bundle = pki::generate(&params.pki_params(ctx.dh_params.clone()))?;
    let secret = with_owner(
        Secret {
            metadata: ObjectMeta {
                name: Some(PKI_SECRET_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(
                bundle
                    .iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                    .collect(),
            ),
            ..Default::default()
        },
        owner,
    );
    if create_if_absent(client, namespace, &secret).await? {
        crate::metrics::record_object_write("Secret", ObjectWrite::Created);
        return Ok(bundle);
    }
    // lost a race, use what was stored
    let existing = api.get(PKI_SECRET_NAME).await?;
    Ok(existing
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect())
}

async fn apply_manifests(
    client: &Client,
    namespace: &str,
    manifests: &ManifestBundle,
) -> Result<(), ReconcileError> {
    let mut applier = ManifestApplier::new(client.clone(), CONTROL_PLANE_FIELD_MANAGER);

    // The branding manifest cannot be applied, only created
    if let Some(branding) = manifests.get(OAUTH_BRANDING_MANIFEST) {
        for object in parse_manifest(OAUTH_BRANDING_MANIFEST, branding)? {
            applier.create(namespace, object).await.map_err(|e| {
                ReconcileError::Other(e.context(format!("failed to apply manifest {OAUTH_BRANDING_MANIFEST}")))
            })?;
        }
    }

    let mut errors = AggregateError::new("failed to apply some manifests");
    for (name, data) in manifests.iter().filter(|(name, _)| should_apply(name)) {
        let objects = match parse_manifest(name, data) {
            Ok(objects) => objects,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };
        for object in objects {
            match applier.apply(namespace, object).await {
                Ok(()) => debug!(manifest = %name, "Applied manifest"),
                Err(e) => errors.push(e.context(format!("failed to apply manifest {name}"))),
            }
        }
    }
    errors.into_result()?;
    info!(namespace = %namespace, "Successfully applied all manifests");
    Ok(())
}

async fn ensure_kubeadmin(
    client: &Client,
    namespace: &str,
    owner: Option<&OwnerReference>,
) -> Result<(), ReconcileError> {
    let generated = with_owner(
        kubeadmin_password_secret(namespace, &generate_kubeadmin_password()),
        owner,
    );
    let (password, created) =
        ensure_generated_value(client, namespace, generated, KUBEADMIN_PASSWORD_KEY).await?;
    let password = String::from_utf8(password)
        .map_err(|_| ReconcileError::Config("kubeadmin password is not valid UTF-8".to_string()))?;

    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    if created || config_maps.get_opt(KUBEADMIN_TARGET_CONFIGMAP_NAME).await?.is_none() {
        let target = with_owner(kubeadmin_target_config_map(namespace, &password)?, owner);
        create_if_absent(client, namespace, &target).await?;
    }
    Ok(())
}

fn available_condition(ready: bool, reason: &str, message: &str) -> Condition {
    Condition {
        r#type: CONDITION_AVAILABLE.to_string(),
        status: if ready { "True" } else { "False" }.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
    }
}

async fn update_status(
    client: &Client,
    hcp: &HostedControlPlane,
    status: HostedControlPlaneStatus,
) -> Result<(), ReconcileError> {
    if !status_changed(&hcp.status, &Some(status.clone())) {
        return Ok(());
    }
    let namespace = hcp.namespace().unwrap_or_default();
    let api: Api<HostedControlPlane> = Api::namespaced(client.clone(), &namespace);
    api.patch_status(
        &hcp.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await?;
    Ok(())
}

/// Reconcile a `HostedControlPlane`.
///
/// Returns `Ok(true)` once the control plane has been fully applied and
/// `Ok(false)` while its endpoints are not assigned yet.
///
/// # Errors
///
/// Returns missing inputs as [`ReconcileError::Config`], and API, render,
/// PKI and release failures as their variants. Manifest apply failures are
/// aggregated.
pub async fn reconcile_hostedcontrolplane(
    ctx: Arc<Context>,
    hcp: HostedControlPlane,
) -> Result<bool, ReconcileError> {
    let client = ctx.client.clone();
    let name = hcp.name_any();
    let namespace = hcp
        .namespace()
        .ok_or_else(|| ReconcileError::Config("HostedControlPlane must be namespaced".to_string()))?;
    info!(namespace = %namespace, name = %name, "Ensuring control plane");

    let mut status = hcp.status.clone().unwrap_or_default();
    status.observed_generation = hcp.metadata.generation;

    let infra = infrastructure_status(&client, &namespace).await?;
    if !infra.is_ready() {
        info!(namespace = %namespace, name = %name, "Waiting for control plane endpoints");
        set_condition(
            &mut status.conditions,
            available_condition(false, "WaitingForInfrastructure", "control plane endpoints are not assigned yet"),
        );
        status.ready = false;
        update_status(&client, &hcp, status).await?;
        return Ok(false);
    }

    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let pull_secret = read_secret_key(&secrets, &hcp.spec.pull_secret.name, PULL_SECRET_KEY).await?;
    let ssh_key = read_secret_key(&secrets, &hcp.spec.ssh_key.name, SSH_PUBLIC_KEY).await?;
    let ssh_key = String::from_utf8_lossy(&ssh_key).to_string();

    let release = ctx.releases.lookup(&hcp.spec.release_image, &pull_secret).await?;
    let version = release.semver()?;

    let owner = hcp.controller_owner_ref(&());
    let owner = owner.as_ref();

    let registry = with_owner(
        Secret {
            metadata: ObjectMeta {
                name: Some(IMAGE_REGISTRY_SECRET_NAME.to_string()),
                namespace: Some(namespace.clone()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                IMAGE_REGISTRY_SECRET_KEY.to_string(),
                ByteString(generate_image_registry_secret().into_bytes()),
            )])),
            ..Default::default()
        },
        owner,
    );
    let (registry_secret, _) =
        ensure_generated_value(&client, &namespace, registry, IMAGE_REGISTRY_SECRET_KEY).await?;

    let mut params = cluster_params(
        &hcp,
        &infra,
        &ssh_key,
        &String::from_utf8_lossy(&registry_secret),
    );
    let pki = ensure_pki(&client, &namespace, &params, &ctx, owner).await?;
    params.openshift_apiserver_ca_bundle =
        BASE64.encode(pki.get(COMBINED_CA_CERT).map(Vec::as_slice).unwrap_or_default());

    let manifests = render_manifests(
        &ctx.templates,
        &RenderInput {
            params: &params,
            release: &release,
            pull_secret: &pull_secret,
            pki: &pki,
        },
    )?;
    apply_manifests(&client, &namespace, &manifests).await?;

    let user_data = with_owner(
        user_data_secret(&name, &namespace, &infra.ignition_provider_address, &version),
        owner,
    );
    create_if_absent(&client, &namespace, &user_data).await?;

    ensure_kubeadmin(&client, &namespace, owner).await?;

    let kubeconfig = kubeconfig_reference(&hcp);
    let admin_kubeconfig = pki
        .get(ADMIN_KUBECONFIG)
        .ok_or_else(|| ReconcileError::Config(format!("pki secret is missing {ADMIN_KUBECONFIG}")))?;
    create_if_absent(
        &client,
        &namespace,
        &with_owner(kubeconfig_secret(&namespace, &kubeconfig, admin_kubeconfig), owner),
    )
    .await?;

    create_if_absent(
        &client,
        &namespace,
        &with_owner(pull_secret_config_map(&namespace, &pull_secret)?, owner),
    )
    .await?;

    if hcp.spec.platform.r#type == PlatformType::AWS {
        let machine_set = worker_machine_set(&hcp, release.version_of("kubernetes"), owner);
        create_if_absent(&client, &namespace, &machine_set).await?;
    }

    info!("Cluster API URL: https://{}:{}", infra.api_address, infra.api_port);
    info!(
        "Kubeconfig is available in secret {} in the {} namespace",
        kubeconfig.name, namespace
    );
    info!("Console URL: https://console-openshift-console.{}", params.ingress_subdomain);
    info!(
        "kubeadmin password is available in secret {} in the {} namespace",
        KUBEADMIN_PASSWORD_SECRET_NAME, namespace
    );

    set_condition(
        &mut status.conditions,
        available_condition(true, "AsExpected", "control plane manifests applied"),
    );
    status.ready = true;
    status.version = Some(release.version.clone());
    status.release_image = Some(hcp.spec.release_image.clone());
    status.kube_config = Some(kubeconfig);
    status.kubeadmin_password = Some(LocalObjectReference {
        name: KUBEADMIN_PASSWORD_SECRET_NAME.to_string(),
    });
    status.control_plane_endpoint = Some(ApiEndpoint {
        host: infra.api_address.clone(),
        port: i32::from(infra.api_port),
    });
    update_status(&client, &hcp, status).await?;
    Ok(true)
}

#[cfg(test)]
#[path = "controlplane_tests.rs"]
mod controlplane_tests;
