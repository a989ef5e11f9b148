// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Control-plane manifest rendering.
//!
//! Templates are minijinja documents evaluated against [`ClusterParams`] with
//! a fixed set of helper functions (see [`register_helpers`]). The output is a
//! bundle keyed by manifest file name:
//!
//! - `*.yaml` templates render to a manifest of the same base name
//! - any other file is copied verbatim
//! - manifests on [`USER_MANIFEST_FILES`] (and everything under
//!   `cluster-bootstrap/`) are applied from inside the hosted cluster, so they
//!   are wrapped into a `user-manifest-<slug>` configmap instead
//! - `patches.yaml`, when present, lists merge patches applied last

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE},
    Engine as _,
};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use minijinja::{Environment, ErrorKind, State, UndefinedBehavior, Value};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::pki::{PkiBundle, PkiParams};
use crate::release::{parse_version, ReleaseImage, RELEASE_COMPONENT};

/// Template holding the ordered merge patches
pub const PATCHES_FILE: &str = "patches.yaml";

/// Directory whose templates are all user manifests
pub const CLUSTER_BOOTSTRAP_DIR: &str = "cluster-bootstrap/";

/// Manifests applied by the bootstrapper inside the hosted cluster.
pub const USER_MANIFEST_FILES: &[&str] = &[
    "ingress-certs-secret.yaml",
    "openshift-apiserver-user-service.yaml",
    "openshift-apiserver-user-endpoint.yaml",
    "oauth-apiserver-user-service.yaml",
    "oauth-apiserver-user-endpoint.yaml",
    "00-openshift-controller-manager-namespace.yaml",
    "openshift-controller-manager-service-ca.yaml",
    "cluster-imageregistry-config.yaml",
    "openvpn-client-deployment.yaml",
    "openvpn-client-configmap.yaml",
];

/// Rendered manifests keyed by file name.
pub type ManifestBundle = BTreeMap<String, Vec<u8>>;

/// Errors that can occur while rendering manifests
#[derive(Debug, Error)]
pub enum RenderError {
    /// A template failed to compile or evaluate
    #[error("failed to render {name}: {source}")]
    Template {
        name: String,
        #[source]
        source: minijinja::Error,
    },

    /// A template file is not UTF-8
    #[error("template {0} is not valid UTF-8")]
    Encoding(String),

    /// The template directory could not be read, or output not written
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A patch entry is malformed or its target does not exist
    #[error("failed to apply patch to {target}: {reason}")]
    Patch { target: String, reason: String },

    /// A manifest could not be parsed or serialized as YAML
    #[error("yaml error in {name}: {reason}")]
    Yaml { name: String, reason: String },
}

/// Values templates are evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    pub namespace: String,
    pub cluster_name: String,
    pub infra_id: String,
    pub base_domain: String,
    pub ingress_subdomain: String,
    pub external_api_address: String,
    pub external_api_port: u16,
    pub internal_api_port: u16,
    pub external_oauth_address: String,
    pub external_oauth_port: u16,
    pub external_openvpn_address: String,
    pub external_openvpn_port: u16,
    /// Address of the machine-config server serving ignition
    pub ignition_provider_address: String,
    pub service_cidr: String,
    pub pod_cidr: String,
    pub machine_cidr: String,
    pub release_image: String,
    pub ssh_key: String,
    /// Hex-encoded HTTP secret for the hosted image registry
    pub image_registry_http_secret: String,
    pub platform_type: String,
    pub cloud_provider: String,
    /// Cluster IP of the openshift-apiserver service
    pub openshift_api_cluster_ip: String,
    /// Cluster IP of the openshift-oauth-apiserver service
    pub oauth_api_server_address: String,
    /// Base64 of the combined CA bundle trusted by openshift-apiserver
    pub openshift_apiserver_ca_bundle: String,
}

impl ClusterParams {
    /// Certificate inputs derived from these parameters.
    #[must_use]
    pub fn pki_params(&self, dh_params_path: Option<PathBuf>) -> PkiParams {
        PkiParams {
            external_api_address: self.external_api_address.clone(),
            external_api_port: self.external_api_port,
            internal_api_port: self.internal_api_port,
            service_cidr: self.service_cidr.clone(),
            external_oauth_address: self.external_oauth_address.clone(),
            external_openvpn_address: self.external_openvpn_address.clone(),
            ingress_subdomain: self.ingress_subdomain.clone(),
            machine_config_server_address: self.ignition_provider_address.clone(),
            namespace: self.namespace.clone(),
            dh_params_path,
        }
    }
}

/// Where template files come from.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// A directory tree; keys are paths relative to its root
    Directory(PathBuf),
    /// Templates keyed by relative path
    Memory(BTreeMap<String, Vec<u8>>),
}

impl TemplateSource {
    /// All template files keyed by `/`-separated relative path.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Io`] when the directory cannot be walked.
    pub fn load(&self) -> Result<BTreeMap<String, Vec<u8>>, RenderError> {
        match self {
            Self::Memory(files) => Ok(files.clone()),
            Self::Directory(root) => {
                let mut files = BTreeMap::new();
                walk(root, root, &mut files)?;
                Ok(files)
            }
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RenderError + '_ {
    move |source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn walk(root: &Path, dir: &Path, files: &mut BTreeMap<String, Vec<u8>>) -> Result<(), RenderError> {
    for entry in std::fs::read_dir(dir).map_err(io_error(dir))? {
        let path = entry.map_err(io_error(dir))?.path();
        if path.is_dir() {
            walk(root, &path, files)?;
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let data = std::fs::read(&path).map_err(io_error(&path))?;
        files.insert(relative, data);
    }
    Ok(())
}

/// Everything a render pass needs besides the templates.
#[derive(Debug, Clone, Copy)]
pub struct RenderInput<'a> {
    pub params: &'a ClusterParams,
    pub release: &'a ReleaseImage,
    pub pull_secret: &'a [u8],
    pub pki: &'a PkiBundle,
}

fn helper_error(message: impl Into<String>) -> minijinja::Error {
    minijinja::Error::new(ErrorKind::InvalidOperation, message.into())
}

/// Prefix every line of `text` with `count` spaces.
#[must_use]
pub fn indent(count: usize, text: &str) -> String {
    let pad = " ".repeat(count);
    format!("{pad}{}", text.replace('\n', &format!("\n{pad}")))
}

/// Address part of a CIDR.
///
/// # Errors
///
/// Fails when the text is not `address/prefix`.
pub fn cidr_address(cidr: &str) -> Result<String, minijinja::Error> {
    let (address, _) = parse_cidr(cidr)?;
    Ok(address.to_string())
}

/// Netmask of a CIDR in address notation; `10.0.0.0/16` gives `255.255.0.0`.
///
/// # Errors
///
/// Fails when the text is not `address/prefix`.
pub fn cidr_mask(cidr: &str) -> Result<String, minijinja::Error> {
    let (address, prefix) = parse_cidr(cidr)?;
    let mask = match address {
        IpAddr::V4(_) => {
            let bits = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
            IpAddr::V4(bits.into())
        }
        IpAddr::V6(_) => {
            let bits = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
            IpAddr::V6(Ipv6Addr::from(bits))
        }
    };
    Ok(mask.to_string())
}

fn parse_cidr(cidr: &str) -> Result<(IpAddr, u32), minijinja::Error> {
    let invalid = || helper_error(format!("invalid CIDR {cidr:?}"));
    let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let address: IpAddr = address.parse().map_err(|_| invalid())?;
    let prefix: u32 = prefix.parse().map_err(|_| invalid())?;
    let max = if address.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(invalid());
    }
    Ok((address, prefix))
}

/// URL-safe random string of exactly `length` characters.
#[must_use]
pub fn random_string(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut encoded = URL_SAFE.encode(&bytes);
    encoded.truncate(length);
    encoded
}

#[must_use]
pub fn trim_trailing_space(text: &str) -> String {
    text.trim_end().to_string()
}

fn compare_release(release: &ReleaseImage, wanted: &str) -> Result<std::cmp::Ordering, minijinja::Error> {
    let current = release
        .version_of(RELEASE_COMPONENT)
        .unwrap_or(release.version.as_str());
    let current = parse_version(RELEASE_COMPONENT, current).map_err(|e| helper_error(e.to_string()))?;
    let wanted = parse_version("argument", wanted).map_err(|e| helper_error(e.to_string()))?;
    Ok(current.cmp(&wanted))
}

/// Register the helper functions on `env`.
///
/// `templates` backs the file helpers and `context` is the value included
/// files are rendered with.
pub fn register_helpers(
    env: &mut Environment<'static>,
    input: &RenderInput<'_>,
    templates: Arc<BTreeMap<String, String>>,
    context: Value,
) {
    let release = Arc::new(input.release.clone());
    let pki = Arc::new(input.pki.clone());
    let pull_secret = BASE64.encode(input.pull_secret);

    let versions = Arc::clone(&release);
    env.add_function("version", move |component: &str| {
        versions
            .version_of(component)
            .map(str::to_string)
            .ok_or_else(|| helper_error(format!("unknown component version {component}")))
    });

    let images = Arc::clone(&release);
    env.add_function("imageFor", move |component: &str| {
        images
            .image_for(component)
            .map(str::to_string)
            .ok_or_else(|| helper_error(format!("unknown component image {component}")))
    });

    let at_least = Arc::clone(&release);
    env.add_function("atleast_version", move |wanted: &str| -> Result<bool, minijinja::Error> {
        Ok(compare_release(&at_least, wanted)?.is_ge())
    });
    let less_than = Arc::clone(&release);
    env.add_function("lessthan_version", move |wanted: &str| -> Result<bool, minijinja::Error> {
        Ok(compare_release(&less_than, wanted)?.is_lt())
    });

    env.add_function("base64String", |text: &str| BASE64.encode(text));
    env.add_filter("base64String", |text: &str| BASE64.encode(text));
    env.add_function("indent", |count: usize, text: &str| indent(count, text));
    env.add_function("address", |cidr: &str| cidr_address(cidr));
    env.add_function("mask", |cidr: &str| cidr_mask(cidr));
    env.add_function("includeData", |text: &str, count: usize| indent(count, text));
    env.add_function("randomString", |length: usize| random_string(length));
    env.add_function("trimTrailingSpace", |text: &str| trim_trailing_space(text));
    env.add_filter("trimTrailingSpace", |text: &str| trim_trailing_space(text));
    env.add_function("pullSecretBase64", move || pull_secret.clone());

    let pki_data = Arc::clone(&pki);
    env.add_function("pki", move |file: &str| {
        pki_data
            .get(file)
            .map(|data| BASE64.encode(data))
            .ok_or_else(|| helper_error(format!("unknown pki file {file}")))
    });
    env.add_function(
        "include_pki",
        move |file: &str, count: usize| -> Result<String, minijinja::Error> {
            let data = pki
                .get(file)
                .ok_or_else(|| helper_error(format!("unknown pki file {file}")))?;
            Ok(indent(count, String::from_utf8_lossy(data).trim_end()))
        },
    );

    let sources = Arc::clone(&templates);
    let include_context = context.clone();
    env.add_function(
        "include",
        move |state: &State, file: &str, count: usize| -> Result<String, minijinja::Error> {
            let source = sources
                .get(file)
                .ok_or_else(|| helper_error(format!("unknown template {file}")))?;
            let rendered = state.env().render_str(source, include_context.clone())?;
            Ok(indent(count, rendered.trim_end()))
        },
    );

    let sources = Arc::clone(&templates);
    env.add_function(
        "includeFile",
        move |file: &str, count: usize| -> Result<String, minijinja::Error> {
            let source = sources
                .get(file)
                .ok_or_else(|| helper_error(format!("unknown file {file}")))?;
            Ok(indent(count, source.trim_end()))
        },
    );

    env.add_function(
        "dataURLEncode",
        move |state: &State, file: &str| -> Result<String, minijinja::Error> {
            let source = templates
                .get(file)
                .ok_or_else(|| helper_error(format!("unknown template {file}")))?;
            let rendered = state.env().render_str(source, context.clone())?;
            Ok(format!(
                "data:text/plain;charset=utf-8;base64,{}",
                BASE64.encode(rendered)
            ))
        },
    );
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_template(path: &str) -> bool {
    path.ends_with(".yaml") || path.ends_with(".yml")
}

fn is_user_manifest(path: &str) -> bool {
    path.starts_with(CLUSTER_BOOTSTRAP_DIR) || USER_MANIFEST_FILES.contains(&base_name(path))
}

/// Name of the configmap carrying a user manifest: the file name up to the
/// first dot, with underscores replaced.
#[must_use]
pub fn user_config_map_name(file: &str) -> String {
    let stem = base_name(file).split('.').next().unwrap_or_default();
    format!("user-manifest-{}", stem.replace('_', "-"))
}

/// Wrap a rendered manifest into the configmap the bootstrapper consumes.
///
/// # Errors
///
/// Returns [`RenderError::Yaml`] if the configmap cannot be serialized.
pub fn user_manifest_config_map(file: &str, data: &str) -> Result<Vec<u8>, RenderError> {
    let config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(user_config_map_name(file)),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([("data".to_string(), data.to_string())])),
        ..ConfigMap::default()
    };
    serde_yaml::to_string(&config_map)
        .map(String::into_bytes)
        .map_err(|e| RenderError::Yaml {
            name: file.to_string(),
            reason: e.to_string(),
        })
}

/// One entry of `patches.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestPatch {
    /// Output manifest name the patch applies to
    pub target: String,
    /// Merge patch document
    pub patch: serde_json::Value,
}

/// Apply merge patches to rendered manifests in order.
///
/// # Errors
///
/// Returns [`RenderError::Patch`] for a missing target and
/// [`RenderError::Yaml`] when a target is not a YAML document.
pub fn apply_patches(bundle: &mut ManifestBundle, patches: &[ManifestPatch]) -> Result<(), RenderError> {
    for entry in patches {
        let data = bundle.get(&entry.target).ok_or_else(|| RenderError::Patch {
            target: entry.target.clone(),
            reason: "no such manifest".to_string(),
        })?;
        let mut document: serde_json::Value =
            serde_yaml::from_slice(data).map_err(|e| RenderError::Yaml {
                name: entry.target.clone(),
                reason: e.to_string(),
            })?;
        json_patch::merge(&mut document, &entry.patch);
        let patched = serde_yaml::to_string(&document).map_err(|e| RenderError::Yaml {
            name: entry.target.clone(),
            reason: e.to_string(),
        })?;
        debug!(target = %entry.target, "Applied manifest patch");
        bundle.insert(entry.target.clone(), patched.into_bytes());
    }
    Ok(())
}

/// Render every template of `source`.
///
/// # Errors
///
/// - [`RenderError::Template`] when a template fails to evaluate
/// - [`RenderError::Encoding`] for a non UTF-8 `.yaml` template
/// - Patch and IO errors
pub fn render_manifests(
    source: &TemplateSource,
    input: &RenderInput<'_>,
) -> Result<ManifestBundle, RenderError> {
    let files = source.load()?;
    let templates: BTreeMap<String, String> = files
        .iter()
        .filter_map(|(path, data)| {
            std::str::from_utf8(data)
                .ok()
                .map(|text| (path.clone(), text.to_string()))
        })
        .collect();
    let templates = Arc::new(templates);

    let context = Value::from_serialize(input.params);
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    register_helpers(&mut env, input, Arc::clone(&templates), context.clone());

    let render = |path: &str| -> Result<String, RenderError> {
        let text = templates
            .get(path)
            .ok_or_else(|| RenderError::Encoding(path.to_string()))?;
        env.render_str(text, context.clone())
            .map_err(|source| RenderError::Template {
                name: path.to_string(),
                source,
            })
    };

    let mut bundle = ManifestBundle::new();
    let mut patches = Vec::new();
    for (path, data) in &files {
        if path == PATCHES_FILE {
            let rendered = render(path)?;
            patches = serde_yaml::from_str::<Option<Vec<ManifestPatch>>>(&rendered)
                .map_err(|e| RenderError::Yaml {
                    name: path.clone(),
                    reason: e.to_string(),
                })?
                .unwrap_or_default();
            continue;
        }

        let name = base_name(path);
        let (key, content) = if !is_template(path) {
            (name.to_string(), data.clone())
        } else if is_user_manifest(path) {
            let rendered = render(path)?;
            (
                format!("user-manifest-{name}"),
                user_manifest_config_map(name, &rendered)?,
            )
        } else {
            (name.to_string(), render(path)?.into_bytes())
        };

        if bundle.insert(key.clone(), content).is_some() {
            warn!(manifest = %key, template = %path, "Duplicate manifest name, last template wins");
        }
    }

    apply_patches(&mut bundle, &patches)?;
    debug!(manifests = bundle.len(), "Rendered manifests");
    Ok(bundle)
}

/// Write a rendered bundle into `dir`, one file per manifest.
///
/// # Errors
///
/// Returns [`RenderError::Io`] on any write failure.
pub fn write_manifests(dir: &Path, bundle: &ManifestBundle) -> Result<(), RenderError> {
    std::fs::create_dir_all(dir).map_err(io_error(dir))?;
    for (name, data) in bundle {
        let path = dir.join(name);
        std::fs::write(&path, data).map_err(io_error(&path))?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "render_tests.rs"]
mod render_tests;
