// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Resource discovery for Kubernetes clusters.
//!
//! Maps a kind name supplied at runtime ("Pod", "Certificate", ...) to the
//! group/version/plural locator needed to address it through the dynamic API,
//! using the server-preferred resource lists of the discovery API.

use kube::discovery::ApiResource;
use serde::Serialize;
use tracing::{debug, warn};

use super::backend::ClusterBackend;
use super::error::{ApiFailure, K8sError, Result};

/// Address of a resource collection on one API surface
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceLocator {
    /// API group (empty string for core v1)
    pub group: String,
    pub version: String,
    /// Collection name used in URLs (e.g., "pods", "certificates")
    pub plural: String,
}

impl ResourceLocator {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        plural: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            plural: plural.into(),
        }
    }

    /// Get the full API group/version string
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Build the kube `ApiResource` addressing this collection
    pub fn api_resource(&self, kind: &str) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: kind.to_string(),
            plural: self.plural.clone(),
        }
    }
}

/// One resource type as reported by the discovery API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
    pub verbs: Vec<String>,
}

impl ResourceDescriptor {
    /// Subresources (pods/log, deployments/scale) share the parent's kind
    pub fn is_subresource(&self) -> bool {
        self.plural.contains('/')
    }
}

/// Resources served under a single group/version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceList {
    /// "v1" for core, "group/version" otherwise
    pub group_version: String,
    pub resources: Vec<ResourceDescriptor>,
}

impl ResourceList {
    /// Split `group_version` into (group, version). Returns None for malformed values.
    pub fn group_and_version(&self) -> Option<(&str, &str)> {
        parse_group_version(&self.group_version)
    }
}

/// Result of a server-preferred discovery pass
#[derive(Debug, Clone, Default)]
pub struct DiscoveredResources {
    pub lists: Vec<ResourceList>,
    /// Group/versions whose resource list could not be fetched
    pub failed_groups: Vec<String>,
}

/// Flattened view of a discovered resource type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResourceSummary {
    pub name: String,
    pub kind: String,
    pub group: String,
    pub version: String,
    pub namespaced: bool,
    pub verbs: Vec<String>,
}

fn parse_group_version(group_version: &str) -> Option<(&str, &str)> {
    match group_version.split('/').collect::<Vec<_>>().as_slice() {
        [version] if !version.is_empty() => Some(("", *version)),
        [group, version] if !group.is_empty() && !version.is_empty() => Some((*group, *version)),
        _ => None,
    }
}

/// Run discovery, tolerating partial failures
///
/// Groups that failed to enumerate are logged and skipped. Discovery is only
/// considered unavailable when the backend call fails outright or when not a
/// single group could be enumerated.
async fn discover(backend: &dyn ClusterBackend) -> Result<DiscoveredResources> {
    let discovered = backend
        .discover_preferred()
        .await
        .map_err(|source| K8sError::DiscoveryUnavailable { source })?;

    if !discovered.failed_groups.is_empty() {
        if discovered.lists.is_empty() {
            return Err(K8sError::DiscoveryUnavailable {
                source: ApiFailure::transport(format!(
                    "all API groups failed to enumerate: {}",
                    discovered.failed_groups.join(", ")
                )),
            });
        }
        warn!(
            failed = ?discovered.failed_groups,
            "Partial discovery, continuing with available groups"
        );
    }

    Ok(discovered)
}

/// Resolve a kind name to its locator
///
/// The match is exact and case-sensitive ("Pod", not "pod"); the first
/// matching descriptor in discovery order wins.
pub async fn resolve_locator(backend: &dyn ClusterBackend, kind: &str) -> Result<ResourceLocator> {
    let discovered = discover(backend).await?;

    for list in &discovered.lists {
        let Some((group, version)) = list.group_and_version() else {
            continue;
        };
        if let Some(descriptor) = list
            .resources
            .iter()
            .find(|r| !r.is_subresource() && r.kind == kind)
        {
            let locator = ResourceLocator::new(group, version, descriptor.plural.clone());
            debug!(
                kind = %kind,
                group = %locator.group,
                version = %locator.version,
                plural = %locator.plural,
                "Resolved resource locator"
            );
            return Ok(locator);
        }
    }

    Err(K8sError::ResourceTypeNotFound {
        kind: kind.to_string(),
    })
}

/// List all server-preferred resource types, filtered by scope
pub async fn list_api_resources(
    backend: &dyn ClusterBackend,
    include_namespaced: bool,
    include_cluster: bool,
) -> Result<Vec<ApiResourceSummary>> {
    let discovered = discover(backend).await?;

    let mut resources = Vec::new();
    for list in &discovered.lists {
        let Some((group, version)) = list.group_and_version() else {
            continue;
        };
        for descriptor in &list.resources {
            if descriptor.is_subresource() {
                continue;
            }
            if (descriptor.namespaced && !include_namespaced)
                || (!descriptor.namespaced && !include_cluster)
            {
                continue;
            }
            resources.push(ApiResourceSummary {
                name: descriptor.plural.clone(),
                kind: descriptor.kind.clone(),
                group: group.to_string(),
                version: version.to_string(),
                namespaced: descriptor.namespaced,
                verbs: descriptor.verbs.clone(),
            });
        }
    }

    Ok(resources)
}
