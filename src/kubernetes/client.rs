// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Generic resource client
//!
//! Every operation takes a kind name, resolves it to a locator (cache first,
//! discovery on a miss) and then talks to the dynamic API. Logs, metrics and
//! events go through the typed surfaces of the backend instead.

use std::sync::Arc;
use std::time::Duration;

use futures::AsyncReadExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::ApiFilters;
use super::backend::{ClusterBackend, KubeBackend, LogStream};
use super::cache::LocatorCache;
use super::discovery::{self, ApiResourceSummary, ResourceLocator};
use super::error::{ApiFailure, K8sError, Result};
use super::records::{EventRecord, NodeMetricsRecord, PodMetricsRecord};
use crate::config::Config;

/// What to do when the update half of create-or-update fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFallback {
    /// Fall back to create on any update failure
    #[default]
    Always,
    /// Fall back to create only when the object does not exist (404)
    NotFoundOnly,
}

impl UpdateFallback {
    fn allows_create(self, failure: &ApiFailure) -> bool {
        match self {
            Self::Always => true,
            Self::NotFoundOnly => failure.is_not_found(),
        }
    }
}

/// Error name used for operations that address a whole collection
const COLLECTION: &str = "*";

fn non_empty(namespace: Option<&str>) -> Option<&str> {
    namespace.filter(|ns| !ns.is_empty())
}

/// Read a log stream to the end, keeping what was read before any error
///
/// Bytes are passed through unchanged; invalid UTF-8 is replaced, never fatal.
async fn drain(mut stream: LogStream) -> (String, Option<std::io::Error>) {
    let mut bytes = Vec::new();
    let error = stream.read_to_end(&mut bytes).await.err();
    (String::from_utf8_lossy(&bytes).into_owned(), error)
}

/// Client for any resource type served by the cluster
pub struct K8sClient {
    backend: Arc<dyn ClusterBackend>,
    cache: LocatorCache,
    log_tail_lines: i64,
    update_fallback: UpdateFallback,
}

impl K8sClient {
    /// Connect to the cluster selected by `config` (context, kubeconfig, timeouts)
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let backend = KubeBackend::connect(config).await?;
        info!(context = ?config.context, "Connected to cluster");
        Ok(Self::new(Arc::new(backend), config))
    }

    pub fn new(backend: Arc<dyn ClusterBackend>, config: &Config) -> Self {
        Self {
            backend,
            cache: LocatorCache::with_ttl(config.locator_ttl_secs.map(Duration::from_secs)),
            log_tail_lines: config.log_tail_lines,
            update_fallback: config.update_fallback,
        }
    }

    pub fn cache(&self) -> &LocatorCache {
        &self.cache
    }

    /// Resolve a kind, consulting the cache first
    ///
    /// Only successful resolutions are cached. Concurrent misses for the same
    /// kind may each run discovery; the identical results overwrite each other.
    pub async fn locator(&self, kind: &str) -> Result<ResourceLocator> {
        if let Some(locator) = self.cache.get(kind).await {
            return Ok(locator);
        }
        let locator = discovery::resolve_locator(self.backend.as_ref(), kind).await?;
        self.cache.put(kind, locator.clone()).await;
        Ok(locator)
    }

    pub async fn list_api_resources(
        &self,
        include_namespaced: bool,
        include_cluster: bool,
    ) -> Result<Vec<ApiResourceSummary>> {
        discovery::list_api_resources(self.backend.as_ref(), include_namespaced, include_cluster)
            .await
    }

    pub async fn get_resource(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Value> {
        self.fetch("get", kind, name, namespace).await
    }

    /// Same payload as [`get_resource`](Self::get_resource); failures are tagged `describe`
    pub async fn describe_resource(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Value> {
        self.fetch("describe", kind, name, namespace).await
    }

    async fn fetch(
        &self,
        operation: &'static str,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Value> {
        let namespace = non_empty(namespace);
        let ar = self.locator(kind).await?.api_resource(kind);
        debug!(operation, kind = %kind, name = %name, namespace = ?namespace, "Fetching resource");

        self.backend
            .get_object(&ar, namespace, name)
            .await
            .map_err(|f| K8sError::from_api(operation, kind, name, namespace, f))
    }

    /// List a kind in one namespace, or across all namespaces when none is given
    ///
    /// Selectors are handed to the API server verbatim.
    pub async fn list_resources(
        &self,
        kind: &str,
        namespace: Option<&str>,
        filters: &ApiFilters,
    ) -> Result<Vec<Value>> {
        let namespace = non_empty(namespace);
        let locator = self.locator(kind).await?;
        let ar = locator.api_resource(kind);
        debug!(
            kind = %kind,
            namespace = ?namespace,
            group = %ar.group,
            version = %ar.version,
            "Listing resources"
        );

        let items = self
            .backend
            .list_objects(&ar, namespace, filters)
            .await
            .map_err(|f| K8sError::from_api("list", kind, COLLECTION, namespace, f))?;

        // Inject apiVersion and kind (K8s list API doesn't include these per-item)
        let api_version = locator.api_version();
        Ok(items
            .into_iter()
            .map(|mut item| {
                if let Value::Object(ref mut map) = item {
                    map.insert("apiVersion".to_string(), Value::String(api_version.clone()));
                    map.insert("kind".to_string(), Value::String(kind.to_string()));
                }
                item
            })
            .collect())
    }

    /// Apply a YAML or JSON manifest: update the named object, creating it if
    /// the update fails (subject to the configured fallback policy)
    ///
    /// A non-empty `namespace` overrides the manifest's own namespace.
    /// Update and create are two separate requests.
    pub async fn create_or_update_resource(
        &self,
        kind: &str,
        namespace: Option<&str>,
        manifest: &str,
    ) -> Result<Value> {
        let invalid = |reason: String| K8sError::InvalidManifest {
            kind: kind.to_string(),
            reason,
        };

        let mut object: Value =
            serde_yaml::from_str(manifest).map_err(|e| invalid(e.to_string()))?;
        let Some(map) = object.as_object_mut() else {
            return Err(invalid("manifest root is not a mapping".to_string()));
        };

        if let Some(ns) = non_empty(namespace) {
            let metadata = map
                .entry("metadata")
                .or_insert_with(|| Value::Object(Map::new()));
            let Some(metadata) = metadata.as_object_mut() else {
                return Err(invalid("metadata is not a mapping".to_string()));
            };
            metadata.insert("namespace".to_string(), Value::String(ns.to_string()));
        }

        let name = object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .ok_or_else(|| K8sError::MissingName {
                kind: kind.to_string(),
            })?;
        let target_ns = object
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(String::from);
        let target_ns = target_ns.as_deref();

        let locator = self.locator(kind).await?;
        let ar = locator.api_resource(kind);
        if let Value::Object(ref mut map) = object {
            map.entry("apiVersion")
                .or_insert_with(|| Value::String(locator.api_version()));
            map.entry("kind")
                .or_insert_with(|| Value::String(kind.to_string()));
        }

        let failure = match self
            .backend
            .update_object(&ar, target_ns, &name, &object)
            .await
        {
            Ok(updated) => {
                debug!(kind = %kind, name = %name, namespace = ?target_ns, "Updated resource");
                return Ok(updated);
            }
            Err(failure) => failure,
        };

        if !self.update_fallback.allows_create(&failure) {
            return Err(K8sError::from_api("update", kind, &name, target_ns, failure));
        }
        if !failure.is_not_found() {
            warn!(
                kind = %kind,
                name = %name,
                namespace = ?target_ns,
                error = %failure,
                "Update failed, falling back to create"
            );
        }

        let created = self
            .backend
            .create_object(&ar, target_ns, &object)
            .await
            .map_err(|f| K8sError::from_api("create", kind, &name, target_ns, f))?;
        debug!(kind = %kind, name = %name, namespace = ?target_ns, "Created resource");
        Ok(created)
    }

    pub async fn delete_resource(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<()> {
        let namespace = non_empty(namespace);
        let ar = self.locator(kind).await?.api_resource(kind);

        self.backend
            .delete_object(&ar, namespace, name)
            .await
            .map_err(|f| K8sError::from_api("delete", kind, name, namespace, f))?;
        info!(kind = %kind, name = %name, namespace = ?namespace, "Deleted resource");
        Ok(())
    }

    /// Tail a pod's logs
    ///
    /// Without a container, a multi-container pod yields every container's
    /// logs under a per-container header. A container that fails contributes
    /// an inline error marker instead of failing the call.
    pub async fn get_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
    ) -> Result<String> {
        if let Some(container) = non_empty(container) {
            return self.container_logs(namespace, pod, Some(container)).await;
        }

        let containers = self
            .backend
            .pod_container_names(namespace, pod)
            .await
            .map_err(|f| K8sError::from_api("get", "Pod", pod, Some(namespace), f))?;

        if containers.len() <= 1 {
            return self
                .container_logs(namespace, pod, containers.first().map(String::as_str))
                .await;
        }

        let mut output = String::new();
        for container in &containers {
            output.push_str(&format!("\n--- Logs for container {} ---\n", container));
            match self
                .backend
                .open_log_stream(namespace, pod, Some(container.as_str()), self.log_tail_lines)
                .await
            {
                Ok(stream) => {
                    let (text, error) = drain(stream).await;
                    output.push_str(&text);
                    if let Some(e) = error {
                        output.push_str(&format!("Error reading logs: {}\n", e));
                    }
                }
                Err(e) => {
                    warn!(pod = %pod, container = %container, error = %e, "Failed to open log stream");
                    output.push_str(&format!(
                        "\n--- Error getting logs for container {}: {} ---\n",
                        container, e
                    ));
                }
            }
        }
        Ok(output)
    }

    async fn container_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
    ) -> Result<String> {
        let stream_error = |source: ApiFailure| K8sError::LogStream {
            pod: pod.to_string(),
            container: container.map(String::from),
            source,
        };

        let stream = self
            .backend
            .open_log_stream(namespace, pod, container, self.log_tail_lines)
            .await
            .map_err(stream_error)?;

        match drain(stream).await {
            (text, None) => Ok(text),
            (_, Some(e)) => Err(stream_error(ApiFailure::transport(e.to_string()))),
        }
    }

    pub async fn get_pod_metrics(&self, namespace: &str, pod: &str) -> Result<PodMetricsRecord> {
        let metrics = self
            .backend
            .pod_metrics(namespace, pod)
            .await
            .map_err(|source| K8sError::MetricsUnavailable {
                target: format!("pod {}/{}", namespace, pod),
                source,
            })?;
        Ok(PodMetricsRecord::new(namespace, pod, metrics))
    }

    pub async fn get_node_metrics(&self, node: &str) -> Result<NodeMetricsRecord> {
        let metrics = self
            .backend
            .node_metrics(node)
            .await
            .map_err(|source| K8sError::MetricsUnavailable {
                target: format!("node {}", node),
                source,
            })?;
        Ok(NodeMetricsRecord::new(node, metrics))
    }

    pub async fn get_events(&self, namespace: Option<&str>) -> Result<Vec<EventRecord>> {
        let namespace = non_empty(namespace);
        let events = self
            .backend
            .list_events(namespace)
            .await
            .map_err(|f| K8sError::from_api("list", "Event", COLLECTION, namespace, f))?;
        Ok(events.into_iter().map(EventRecord::from).collect())
    }
}
