// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Cluster API surfaces used by the resource access layer
//!
//! [`ClusterBackend`] groups the discovery, dynamic, typed core, metrics and
//! events surfaces behind one trait. [`KubeBackend`] implements it on a
//! `kube::Client`; tests substitute an in-memory fake.

use std::pin::Pin;

use anyhow::{Context, Result as AnyResult, anyhow};
use async_trait::async_trait;
use futures::io::AsyncBufRead;
use k8s_openapi::api::core::v1::{Event, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::api::{DeleteParams, DynamicObject, ListParams, LogParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Api, Client};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::ApiFilters;
use super::discovery::{DiscoveredResources, ResourceDescriptor, ResourceList};
use super::error::ApiFailure;
use super::records::{NodeMetrics, PodMetrics};
use crate::config::Config;

/// Page size for paginated list requests
/// Smaller pages reduce memory pressure and allow faster initial response
const PAGE_SIZE: u32 = 500;

/// Streamed log body. Dropping it closes the underlying connection.
pub type LogStream = Pin<Box<dyn AsyncBufRead + Send>>;

pub type BackendResult<T> = std::result::Result<T, ApiFailure>;

#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// Server-preferred resource lists. Groups that fail to enumerate are
    /// reported in `failed_groups` instead of failing the whole call.
    async fn discover_preferred(&self) -> BackendResult<DiscoveredResources>;

    async fn get_object(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> BackendResult<Value>;

    async fn list_objects(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        filters: &ApiFilters,
    ) -> BackendResult<Vec<Value>>;

    async fn create_object(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        object: &Value,
    ) -> BackendResult<Value>;

    async fn update_object(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        object: &Value,
    ) -> BackendResult<Value>;

    async fn delete_object(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> BackendResult<()>;

    /// Names of the pod's (non-init) containers, in spec order
    async fn pod_container_names(&self, namespace: &str, pod: &str) -> BackendResult<Vec<String>>;

    async fn open_log_stream(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: i64,
    ) -> BackendResult<LogStream>;

    async fn pod_metrics(&self, namespace: &str, pod: &str) -> BackendResult<PodMetrics>;

    async fn node_metrics(&self, node: &str) -> BackendResult<NodeMetrics>;

    async fn list_events(&self, namespace: Option<&str>) -> BackendResult<Vec<Event>>;
}

/// `metrics.k8s.io/v1beta1` resources, addressed through the dynamic API
fn metrics_resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: "metrics.k8s.io".to_string(),
        version: "v1beta1".to_string(),
        api_version: "metrics.k8s.io/v1beta1".to_string(),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

fn to_value(object: DynamicObject) -> BackendResult<Value> {
    serde_json::to_value(object)
        .map_err(|e| ApiFailure::transport(format!("failed to encode object: {}", e)))
}

fn to_dynamic(object: &Value) -> BackendResult<DynamicObject> {
    serde_json::from_value(object.clone())
        .map_err(|e| ApiFailure::transport(format!("failed to decode object: {}", e)))
}

/// Build ListParams from API filters (label selectors, field selectors)
fn build_list_params(filters: &ApiFilters) -> ListParams {
    let mut params = ListParams::default();

    if let Some(ref label_sel) = filters.label_selector {
        params = params.labels(label_sel);
    }

    if let Some(ref field_sel) = filters.field_selector {
        params = params.fields(field_sel);
    }

    trace!(
        label_selector = ?filters.label_selector,
        field_selector = ?filters.field_selector,
        "Built ListParams"
    );

    params
}

fn descriptors(list: APIResourceList) -> ResourceList {
    ResourceList {
        group_version: list.group_version,
        resources: list
            .resources
            .into_iter()
            .map(|r| ResourceDescriptor {
                kind: r.kind,
                plural: r.name,
                namespaced: r.namespaced,
                verbs: r.verbs,
            })
            .collect(),
    }
}

/// Backend talking to a real cluster through kube-rs
#[derive(Clone)]
pub struct KubeBackend {
    client: Client,
}

impl KubeBackend {
    /// Load kubeconfig and build a client with transport timeouts applied
    pub async fn connect(config: &Config) -> AnyResult<Self> {
        let kubeconfig = match &config.kubeconfig {
            Some(path) => Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?,
            None => Kubeconfig::read().context("Failed to read kubeconfig")?,
        };

        let context_name = config
            .context
            .clone()
            .or_else(|| kubeconfig.current_context.clone())
            .ok_or_else(|| anyhow!("No context specified and no current context in kubeconfig"))?;

        // Verify context exists
        if !kubeconfig.contexts.iter().any(|c| c.name == context_name) {
            return Err(anyhow!("Context '{}' not found in kubeconfig", context_name));
        }

        let mut client_config = kube::Config::from_custom_kubeconfig(
            kubeconfig,
            &KubeConfigOptions {
                context: Some(context_name.clone()),
                ..Default::default()
            },
        )
        .await
        .with_context(|| format!("Failed to load kubeconfig for context '{}'", context_name))?;

        // Set timeouts for reliability
        client_config.connect_timeout = Some(config.connect_timeout());
        client_config.read_timeout = Some(config.read_timeout());

        let client = Client::try_from(client_config)
            .with_context(|| format!("Failed to create client for context '{}'", context_name))?;

        debug!(context = %context_name, "Kubernetes client created");
        Ok(Self { client })
    }

    fn dynamic_api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }

    async fn group_resources(&self, group_version: &str) -> Result<ResourceList, kube::Error> {
        self.client
            .list_api_group_resources(group_version)
            .await
            .map(descriptors)
    }
}

#[async_trait]
impl ClusterBackend for KubeBackend {
    async fn discover_preferred(&self) -> BackendResult<DiscoveredResources> {
        let core_versions = self.client.list_core_api_versions().await?;
        let groups = self.client.list_api_groups().await?;

        let mut discovered = DiscoveredResources::default();

        // Legacy core group first so core kinds win over same-named kinds elsewhere
        for version in &core_versions.versions {
            match self.client.list_core_api_resources(version).await {
                Ok(list) => discovered.lists.push(descriptors(list)),
                Err(e) => {
                    warn!(group_version = %version, error = %e, "Failed to enumerate core API resources");
                    discovered.failed_groups.push(version.clone());
                }
            }
        }

        // Only each group's preferred version
        let group_versions: Vec<String> = groups
            .groups
            .iter()
            .filter_map(|g| {
                g.preferred_version
                    .as_ref()
                    .or_else(|| g.versions.first())
                    .map(|v| v.group_version.clone())
            })
            .collect();

        let results = futures::future::join_all(
            group_versions
                .iter()
                .map(|gv| async move { (gv, self.group_resources(gv).await) }),
        )
        .await;

        for (group_version, result) in results {
            match result {
                Ok(list) => discovered.lists.push(list),
                Err(e) => {
                    warn!(group_version = %group_version, error = %e, "Failed to enumerate API group");
                    discovered.failed_groups.push(group_version.clone());
                }
            }
        }

        debug!(
            lists = discovered.lists.len(),
            failed = discovered.failed_groups.len(),
            "Discovery complete"
        );
        Ok(discovered)
    }

    async fn get_object(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> BackendResult<Value> {
        let object = self.dynamic_api(ar, namespace).get(name).await?;
        to_value(object)
    }

    /// Uses continue tokens to fetch all pages
    async fn list_objects(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        filters: &ApiFilters,
    ) -> BackendResult<Vec<Value>> {
        let api = self.dynamic_api(ar, namespace);
        let base_params = build_list_params(filters);
        let mut items = Vec::new();
        let mut continue_token: Option<String> = None;
        let mut page_count = 0u32;

        loop {
            let mut params = base_params.clone().limit(PAGE_SIZE);
            if let Some(ref token) = continue_token {
                params = params.continue_token(token);
            }

            let list = api.list(&params).await?;
            page_count += 1;
            for item in list.items {
                items.push(to_value(item)?);
            }

            match list.metadata.continue_ {
                Some(token) if !token.is_empty() => continue_token = Some(token),
                _ => break,
            }
        }

        if page_count > 1 {
            debug!(
                plural = %ar.plural,
                pages = page_count,
                total_items = items.len(),
                "Pagination complete"
            );
        }

        Ok(items)
    }

    async fn create_object(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        object: &Value,
    ) -> BackendResult<Value> {
        let object = to_dynamic(object)?;
        let created = self
            .dynamic_api(ar, namespace)
            .create(&PostParams::default(), &object)
            .await?;
        to_value(created)
    }

    async fn update_object(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        object: &Value,
    ) -> BackendResult<Value> {
        let object = to_dynamic(object)?;
        let updated = self
            .dynamic_api(ar, namespace)
            .replace(name, &PostParams::default(), &object)
            .await?;
        to_value(updated)
    }

    async fn delete_object(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> BackendResult<()> {
        self.dynamic_api(ar, namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn pod_container_names(&self, namespace: &str, pod: &str) -> BackendResult<Vec<String>> {
        let pod: Pod = Api::namespaced(self.client.clone(), namespace)
            .get(pod)
            .await?;
        Ok(pod
            .spec
            .map(|spec| spec.containers.into_iter().map(|c| c.name).collect())
            .unwrap_or_default())
    }

    async fn open_log_stream(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: i64,
    ) -> BackendResult<LogStream> {
        let params = LogParams {
            container: container.map(String::from),
            tail_lines: Some(tail_lines),
            ..Default::default()
        };
        let stream = Api::<Pod>::namespaced(self.client.clone(), namespace)
            .log_stream(pod, &params)
            .await?;
        Ok(Box::pin(stream))
    }

    async fn pod_metrics(&self, namespace: &str, pod: &str) -> BackendResult<PodMetrics> {
        let ar = metrics_resource("PodMetrics", "pods");
        let object = self.dynamic_api(&ar, Some(namespace)).get(pod).await?;
        serde_json::from_value(to_value(object)?)
            .map_err(|e| ApiFailure::transport(format!("failed to decode PodMetrics: {}", e)))
    }

    async fn node_metrics(&self, node: &str) -> BackendResult<NodeMetrics> {
        let ar = metrics_resource("NodeMetrics", "nodes");
        let object = self.dynamic_api(&ar, None).get(node).await?;
        serde_json::from_value(to_value(object)?)
            .map_err(|e| ApiFailure::transport(format!("failed to decode NodeMetrics: {}", e)))
    }

    async fn list_events(&self, namespace: Option<&str>) -> BackendResult<Vec<Event>> {
        let api: Api<Event> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        Ok(api.list(&ListParams::default()).await?.items)
    }
}
