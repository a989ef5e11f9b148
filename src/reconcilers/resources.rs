// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic resource creation and update helpers for Kubernetes resources.
//!
//! # Strategies
//!
//! - **Apply**: server-side apply (SSA) with forced ownership, the default for
//!   everything the operator renders or generates
//! - **Create if absent**: create once and never touch again, used for
//!   generated secrets that must not churn (PKI, passwords, user data)
//! - **Manifest apply**: SSA of untyped rendered manifests whose kinds are
//!   resolved through API discovery
//!
//! # Example
//!
//! ```rust,no_run
//! use hostedcp::reconcilers::resources::{apply, create_if_absent};
//! use k8s_openapi::api::core::v1::Secret;
//! use kube::Client;
//!
//! async fn example(client: &Client, secret: Secret) -> Result<(), kube::Error> {
//!     if !create_if_absent(client, "clusters-example", &secret).await? {
//!         // Someone else created it first
//!     }
//!     apply(client, "clusters-example", &secret, "hostedcp-operator").await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;

use kube::api::{DynamicObject, GroupVersionKind, Patch, PatchParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::discovery::{pinned_kind, ApiCapabilities, ApiResource, Scope};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Deserialize;
use tracing::{debug, info};

use crate::render::RenderError;

/// Returns `true` when a create failed because the object already exists.
#[must_use]
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 409 && e.reason == "AlreadyExists")
}

/// Returns `true` for HTTP 404 responses.
#[must_use]
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

/// Server-side apply `resource` into `namespace`, forcing field ownership.
///
/// # Errors
///
/// Returns the API error when the patch is rejected. A resource without a
/// name is rejected by the API server as well.
pub async fn apply<T>(
    client: &Client,
    namespace: &str,
    resource: &T,
    field_manager: &str,
) -> Result<T, kube::Error>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    let name = resource.name_any();
    let api: Api<T> = Api::namespaced(client.clone(), namespace);

    debug!(
        namespace = %namespace,
        name = %name,
        kind = %T::kind(&()),
        "Applying resource"
    );

    let applied = api
        .patch(
            &name,
            &PatchParams::apply(field_manager).force(),
            &Patch::Apply(resource),
        )
        .await?;
    debug!("Applied {} {}/{}", T::kind(&()), namespace, name);
    Ok(applied)
}

/// Create `resource` unless an object with the same name already exists.
///
/// Returns `true` when this call created the object.
///
/// # Errors
///
/// Returns every API error other than `AlreadyExists`.
pub async fn create_if_absent<T>(
    client: &Client,
    namespace: &str,
    resource: &T,
) -> Result<bool, kube::Error>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    match api.create(&PostParams::default(), resource).await {
        Ok(_) => {
            info!(
                "Created {} {}/{}",
                T::kind(&()),
                namespace,
                resource.name_any()
            );
            Ok(true)
        }
        Err(e) if is_already_exists(&e) => {
            debug!(
                "{} {}/{} already exists, leaving it untouched",
                T::kind(&()),
                namespace,
                resource.name_any()
            );
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Split an `apiVersion` into group and version; the core group is empty.
#[must_use]
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    api_version.split_once('/').unwrap_or(("", api_version))
}

/// Decode every non-empty YAML document of a rendered manifest.
///
/// # Errors
///
/// Returns [`RenderError::Yaml`] naming the manifest when a document is not a
/// Kubernetes object.
pub fn parse_manifest(name: &str, data: &[u8]) -> Result<Vec<DynamicObject>, RenderError> {
    let yaml_error = |e: serde_yaml::Error| RenderError::Yaml {
        name: name.to_string(),
        reason: e.to_string(),
    };

    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_slice(data) {
        let value = serde_yaml::Value::deserialize(document).map_err(yaml_error)?;
        if value.is_null() {
            continue;
        }
        let object: DynamicObject = serde_yaml::from_value(value).map_err(yaml_error)?;
        if object.types.is_none() {
            return Err(RenderError::Yaml {
                name: name.to_string(),
                reason: "missing apiVersion or kind".to_string(),
            });
        }
        objects.push(object);
    }
    Ok(objects)
}

/// Server-side apply of untyped objects.
///
/// Kinds are resolved once per applier through API discovery and cached, so
/// a reconcile pass over a whole bundle discovers each kind at most once.
pub struct ManifestApplier {
    client: Client,
    field_manager: String,
    kinds: HashMap<GroupVersionKind, (ApiResource, ApiCapabilities)>,
}

impl ManifestApplier {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            kinds: HashMap::new(),
        }
    }

    async fn resolve(
        &mut self,
        gvk: &GroupVersionKind,
    ) -> Result<(ApiResource, ApiCapabilities), kube::Error> {
        if let Some(found) = self.kinds.get(gvk) {
            return Ok(found.clone());
        }
        let found = pinned_kind(&self.client, gvk).await?;
        self.kinds.insert(gvk.clone(), found.clone());
        Ok(found)
    }

    /// Apply `object`, placing namespaced kinds into `namespace`.
    ///
    /// # Errors
    ///
    /// Returns discovery or patch errors, or an error for objects missing
    /// their type or name.
    pub async fn apply(
        &mut self,
        namespace: &str,
        mut object: DynamicObject,
    ) -> anyhow::Result<()> {
        let types = object
            .types
            .clone()
            .ok_or_else(|| anyhow::anyhow!("object has no apiVersion or kind"))?;
        let name = object
            .metadata
            .name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("{} object has no name", types.kind))?;

        let (group, version) = split_api_version(&types.api_version);
        let gvk = GroupVersionKind::gvk(group, version, &types.kind);
        let (resource, capabilities) = self.resolve(&gvk).await?;

        let api: Api<DynamicObject> = if capabilities.scope == Scope::Cluster {
            object.metadata.namespace = None;
            Api::all_with(self.client.clone(), &resource)
        } else {
            object.metadata.namespace = Some(namespace.to_string());
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        };

        api.patch(
            &name,
            &PatchParams::apply(&self.field_manager).force(),
            &Patch::Apply(&object),
        )
        .await?;
        debug!(kind = %types.kind, name = %name, namespace = %namespace, "Applied manifest object");
        Ok(())
    }

    /// Create `object` in `namespace`; an existing object counts as success.
    ///
    /// # Errors
    ///
    /// Returns discovery errors and every create error other than
    /// `AlreadyExists`.
    pub async fn create(&mut self, namespace: &str, mut object: DynamicObject) -> anyhow::Result<()> {
        let types = object
            .types
            .clone()
            .ok_or_else(|| anyhow::anyhow!("object has no apiVersion or kind"))?;
        let (group, version) = split_api_version(&types.api_version);
        let gvk = GroupVersionKind::gvk(group, version, &types.kind);
        let (resource, capabilities) = self.resolve(&gvk).await?;

        let api: Api<DynamicObject> = if capabilities.scope == Scope::Cluster {
            Api::all_with(self.client.clone(), &resource)
        } else {
            object.metadata.namespace = Some(namespace.to_string());
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        };

        match api.create(&PostParams::default(), &object).await {
            Ok(_) => Ok(()),
            Err(e) if is_already_exists(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
