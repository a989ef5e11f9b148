// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Release image metadata.
//!
//! A release image names a component image per tag and a version per
//! component. Controllers resolve it through [`ReleaseProvider`]; the operator
//! binary wires in [`FileReleaseProvider`], which reads a YAML catalog mounted
//! into the pod.
//!
//! # Catalog format
//!
//! ```yaml
//! releases:
//!   quay.io/openshift-release-dev/ocp-release:4.7.0-x86_64:
//!     version: 4.7.0
//!     images:
//!       hyperkube: quay.io/openshift-release-dev/ocp-v4.0-art-dev@sha256:...
//!     componentVersions:
//!       kubernetes: 1.20.0
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Component key under which the release version itself is recorded
pub const RELEASE_COMPONENT: &str = "release";

/// Errors that can occur while resolving release metadata
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// The catalog file could not be read
    #[error("failed to read release catalog {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The catalog file is not valid YAML of the expected shape
    #[error("failed to parse release catalog: {0}")]
    Parse(String),

    /// No entry exists for the requested pullspec
    #[error("release image {0} not found")]
    NotFound(String),

    /// A version string is not a semantic version
    #[error("invalid version {version:?} for component {component}")]
    InvalidVersion { component: String, version: String },
}

/// Images and component versions of one release.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReleaseImage {
    pub version: String,
    /// Component tag to image pullspec
    pub images: BTreeMap<String, String>,
    /// Component name to version, including `release`
    pub component_versions: BTreeMap<String, String>,
}

impl ReleaseImage {
    /// Build a release and record its version under `release`.
    #[must_use]
    pub fn new(
        version: &str,
        images: BTreeMap<String, String>,
        mut component_versions: BTreeMap<String, String>,
    ) -> Self {
        if !version.is_empty() {
            component_versions
                .entry(RELEASE_COMPONENT.to_string())
                .or_insert_with(|| version.to_string());
        }
        Self {
            version: version.to_string(),
            images,
            component_versions,
        }
    }

    #[must_use]
    pub fn image_for(&self, component: &str) -> Option<&str> {
        self.images.get(component).map(String::as_str)
    }

    #[must_use]
    pub fn version_of(&self, component: &str) -> Option<&str> {
        self.component_versions.get(component).map(String::as_str)
    }

    /// The release version parsed for comparisons.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::InvalidVersion`] when the version is not semver.
    pub fn semver(&self) -> Result<semver::Version, ReleaseError> {
        parse_version(RELEASE_COMPONENT, &self.version)
    }
}

/// Parse a version, accepting a leading `v` and missing minor or patch parts
/// (`4.6` is read as `4.6.0`).
///
/// # Errors
///
/// Returns [`ReleaseError::InvalidVersion`] when the text is not a version.
pub fn parse_version(component: &str, text: &str) -> Result<semver::Version, ReleaseError> {
    let invalid = || ReleaseError::InvalidVersion {
        component: component.to_string(),
        version: text.to_string(),
    };
    let trimmed = text.trim().trim_start_matches('v');
    if let Ok(version) = semver::Version::parse(trimmed) {
        return Ok(version);
    }

    let (core, rest) = match trimmed.find(['-', '+']) {
        Some(at) => trimmed.split_at(at),
        None => (trimmed, ""),
    };
    let dots = core.matches('.').count();
    let padded = match dots {
        0 => format!("{core}.0.0{rest}"),
        1 => format!("{core}.0{rest}"),
        _ => return Err(invalid()),
    };
    semver::Version::parse(&padded).map_err(|_| invalid())
}

/// Resolves release metadata for a release image pullspec.
#[async_trait]
pub trait ReleaseProvider: Send + Sync {
    /// Look up `image`, authenticating with `pull_secret` where the provider
    /// needs registry access.
    async fn lookup(&self, image: &str, pull_secret: &[u8]) -> Result<ReleaseImage, ReleaseError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Catalog {
    releases: BTreeMap<String, ReleaseImage>,
}

/// Release catalog read from a YAML file on every lookup, so a remounted
/// configmap is picked up without a restart.
#[derive(Debug, Clone)]
pub struct FileReleaseProvider {
    path: PathBuf,
}

impl FileReleaseProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReleaseProvider for FileReleaseProvider {
    async fn lookup(&self, image: &str, _pull_secret: &[u8]) -> Result<ReleaseImage, ReleaseError> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|source| ReleaseError::Io {
                path: self.path.clone(),
                source,
            })?;
        let catalog: Catalog =
            serde_yaml::from_slice(&data).map_err(|e| ReleaseError::Parse(e.to_string()))?;

        let release = catalog
            .releases
            .get(image)
            .ok_or_else(|| ReleaseError::NotFound(image.to_string()))?;
        debug!(image = %image, version = %release.version, "Resolved release image");

        Ok(ReleaseImage::new(
            &release.version,
            release.images.clone(),
            release.component_versions.clone(),
        ))
    }
}

/// In-memory provider keyed by pullspec.
#[derive(Debug, Clone, Default)]
pub struct StaticReleaseProvider {
    releases: BTreeMap<String, ReleaseImage>,
}

impl StaticReleaseProvider {
    #[must_use]
    pub fn with_release(mut self, image: &str, release: ReleaseImage) -> Self {
        self.releases.insert(image.to_string(), release);
        self
    }
}

#[async_trait]
impl ReleaseProvider for StaticReleaseProvider {
    async fn lookup(&self, image: &str, _pull_secret: &[u8]) -> Result<ReleaseImage, ReleaseError> {
        self.releases
            .get(image)
            .cloned()
            .ok_or_else(|| ReleaseError::NotFound(image.to_string()))
    }
}

#[cfg(test)]
#[path = "release_tests.rs"]
mod release_tests;
