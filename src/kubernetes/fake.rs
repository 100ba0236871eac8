// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! In-memory cluster backend for unit tests
//!
//! Stores objects per (plural, namespace, name), counts calls per surface and
//! lets tests inject failures on individual surfaces.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::TryStreamExt;
use futures::io::{AsyncBufRead, AsyncRead};
use k8s_openapi::api::core::v1::Event;
use kube::discovery::ApiResource;
use serde_json::{Value, json};

use super::ApiFilters;
use super::backend::{BackendResult, ClusterBackend, LogStream};
use super::discovery::{DiscoveredResources, ResourceDescriptor, ResourceList};
use super::error::ApiFailure;
use super::records::{NodeMetrics, PodMetrics};

type ObjectKey = (String, String, String);
type ContainerKey = (String, String, String);

/// Shorthand for a discovery descriptor with the usual read/write verbs
pub fn descriptor(kind: &str, plural: &str, namespaced: bool) -> ResourceDescriptor {
    ResourceDescriptor {
        kind: kind.to_string(),
        plural: plural.to_string(),
        namespaced,
        verbs: ["create", "delete", "get", "list", "update"]
            .iter()
            .map(|v| v.to_string())
            .collect(),
    }
}

/// Minimal pod object with the given containers
pub fn pod_object(namespace: &str, name: &str, containers: &[&str]) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {
            "containers": containers
                .iter()
                .map(|c| json!({"name": c, "image": "busybox"}))
                .collect::<Vec<_>>()
        }
    })
}

fn not_found(what: &str, name: &str) -> ApiFailure {
    ApiFailure::new(Some(404), format!("{} \"{}\" not found", what, name))
}

fn object_name(object: &Value) -> String {
    object
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Equality-only label matching ("a=b,c=d")
fn labels_match(object: &Value, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => {
                object
                    .pointer("/metadata/labels")
                    .and_then(|labels| labels.get(key.trim()))
                    .and_then(Value::as_str)
                    == Some(value.trim())
            }
            None => true,
        })
}

enum LogSource {
    Bytes(Vec<u8>),
    OpenFails(ApiFailure),
    ReadFails { partial: String, error: String },
}

#[derive(Default)]
struct CallCounts {
    discovery: AtomicUsize,
    get: AtomicUsize,
    list: AtomicUsize,
    create: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
    core: AtomicUsize,
    metrics: AtomicUsize,
    events: AtomicUsize,
}

impl CallCounts {
    fn total(&self) -> usize {
        [
            &self.discovery,
            &self.get,
            &self.list,
            &self.create,
            &self.update,
            &self.delete,
            &self.core,
            &self.metrics,
            &self.events,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// Log stream that tracks how many streams are currently open
struct TrackedStream {
    inner: LogStream,
    open: Arc<AtomicUsize>,
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncBufRead for TrackedStream {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().inner).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.get_mut().inner).consume(amt)
    }
}

#[derive(Default)]
pub struct FakeBackend {
    discovery: Mutex<Vec<ResourceList>>,
    failed_groups: Mutex<Vec<String>>,
    discovery_failure: Mutex<Option<ApiFailure>>,
    objects: Mutex<BTreeMap<ObjectKey, Value>>,
    next_version: AtomicUsize,
    update_failure: Mutex<Option<ApiFailure>>,
    dynamic_failure: Mutex<Option<ApiFailure>>,
    last_filters: Mutex<Option<ApiFilters>>,
    logs: Mutex<HashMap<ContainerKey, LogSource>>,
    last_tail_lines: Mutex<Option<i64>>,
    open_streams: Arc<AtomicUsize>,
    pod_metrics: Mutex<HashMap<(String, String), PodMetrics>>,
    node_metrics: Mutex<HashMap<String, NodeMetrics>>,
    metrics_failure: Mutex<Option<ApiFailure>>,
    events: Mutex<Vec<Event>>,
    calls: CallCounts,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Core v1 plus apps/v1, the way a bare cluster reports them
    pub fn with_standard_discovery() -> Self {
        let backend = Self::new();
        backend.set_discovery(vec![
            ResourceList {
                group_version: "v1".to_string(),
                resources: vec![
                    descriptor("Pod", "pods", true),
                    descriptor("Pod", "pods/log", true),
                    descriptor("Service", "services", true),
                    descriptor("ConfigMap", "configmaps", true),
                    descriptor("Event", "events", true),
                    descriptor("Namespace", "namespaces", false),
                    descriptor("Node", "nodes", false),
                ],
            },
            ResourceList {
                group_version: "apps/v1".to_string(),
                resources: vec![
                    descriptor("Deployment", "deployments", true),
                    descriptor("Scale", "deployments/scale", true),
                    descriptor("StatefulSet", "statefulsets", true),
                ],
            },
        ]);
        backend
    }

    pub fn set_discovery(&self, lists: Vec<ResourceList>) {
        *self.discovery.lock().unwrap() = lists;
    }

    pub fn set_failed_groups(&self, groups: Vec<String>) {
        *self.failed_groups.lock().unwrap() = groups;
    }

    pub fn fail_discovery(&self, failure: ApiFailure) {
        *self.discovery_failure.lock().unwrap() = Some(failure);
    }

    /// Every subsequent update fails with `failure`
    pub fn fail_updates(&self, failure: ApiFailure) {
        *self.update_failure.lock().unwrap() = Some(failure);
    }

    /// Every subsequent get/list/delete fails with `failure`
    pub fn fail_dynamic(&self, failure: ApiFailure) {
        *self.dynamic_failure.lock().unwrap() = Some(failure);
    }

    pub fn fail_metrics(&self, failure: ApiFailure) {
        *self.metrics_failure.lock().unwrap() = Some(failure);
    }

    pub fn insert_object(&self, plural: &str, namespace: Option<&str>, object: Value) {
        let key = (
            plural.to_string(),
            namespace.unwrap_or_default().to_string(),
            object_name(&object),
        );
        self.objects.lock().unwrap().insert(key, object);
    }

    pub fn object(&self, plural: &str, namespace: Option<&str>, name: &str) -> Option<Value> {
        let key = (
            plural.to_string(),
            namespace.unwrap_or_default().to_string(),
            name.to_string(),
        );
        self.objects.lock().unwrap().get(&key).cloned()
    }

    pub fn add_pod(&self, namespace: &str, name: &str, containers: &[&str]) {
        self.insert_object("pods", Some(namespace), pod_object(namespace, name, containers));
    }

    pub fn set_logs(&self, namespace: &str, pod: &str, container: &str, text: &str) {
        self.logs.lock().unwrap().insert(
            (namespace.to_string(), pod.to_string(), container.to_string()),
            LogSource::Bytes(text.as_bytes().to_vec()),
        );
    }

    /// Log body given as raw bytes, not necessarily UTF-8
    pub fn set_raw_logs(&self, namespace: &str, pod: &str, container: &str, bytes: &[u8]) {
        self.logs.lock().unwrap().insert(
            (namespace.to_string(), pod.to_string(), container.to_string()),
            LogSource::Bytes(bytes.to_vec()),
        );
    }

    /// Opening the container's stream fails
    pub fn fail_logs(&self, namespace: &str, pod: &str, container: &str, failure: ApiFailure) {
        self.logs.lock().unwrap().insert(
            (namespace.to_string(), pod.to_string(), container.to_string()),
            LogSource::OpenFails(failure),
        );
    }

    /// The stream opens, yields `partial` and then errors
    pub fn break_logs(&self, namespace: &str, pod: &str, container: &str, partial: &str, error: &str) {
        self.logs.lock().unwrap().insert(
            (namespace.to_string(), pod.to_string(), container.to_string()),
            LogSource::ReadFails {
                partial: partial.to_string(),
                error: error.to_string(),
            },
        );
    }

    pub fn set_pod_metrics(&self, namespace: &str, pod: &str, metrics: PodMetrics) {
        self.pod_metrics
            .lock()
            .unwrap()
            .insert((namespace.to_string(), pod.to_string()), metrics);
    }

    pub fn set_node_metrics(&self, node: &str, metrics: NodeMetrics) {
        self.node_metrics
            .lock()
            .unwrap()
            .insert(node.to_string(), metrics);
    }

    pub fn add_event(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn discovery_calls(&self) -> usize {
        self.calls.discovery.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.calls.create.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.calls.update.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.total()
    }

    pub fn last_filters(&self) -> Option<ApiFilters> {
        self.last_filters.lock().unwrap().clone()
    }

    pub fn last_tail_lines(&self) -> Option<i64> {
        *self.last_tail_lines.lock().unwrap()
    }

    /// Log streams handed out and not yet dropped
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    fn dynamic_failure(&self) -> BackendResult<()> {
        match self.dynamic_failure.lock().unwrap().clone() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn metrics_failure(&self) -> BackendResult<()> {
        match self.metrics_failure.lock().unwrap().clone() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn with_version(&self, object: &Value) -> Value {
        let mut stored = object.clone();
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(metadata) = stored.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("resourceVersion".to_string(), json!(version.to_string()));
        }
        stored
    }

    fn track(&self, inner: LogStream) -> LogStream {
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Box::pin(TrackedStream {
            inner,
            open: Arc::clone(&self.open_streams),
        })
    }
}

#[async_trait]
impl ClusterBackend for FakeBackend {
    async fn discover_preferred(&self) -> BackendResult<DiscoveredResources> {
        bump(&self.calls.discovery);
        if let Some(failure) = self.discovery_failure.lock().unwrap().clone() {
            return Err(failure);
        }
        Ok(DiscoveredResources {
            lists: self.discovery.lock().unwrap().clone(),
            failed_groups: self.failed_groups.lock().unwrap().clone(),
        })
    }

    async fn get_object(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> BackendResult<Value> {
        bump(&self.calls.get);
        self.dynamic_failure()?;
        self.object(&ar.plural, namespace, name)
            .ok_or_else(|| not_found(&ar.plural, name))
    }

    async fn list_objects(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        filters: &ApiFilters,
    ) -> BackendResult<Vec<Value>> {
        bump(&self.calls.list);
        self.dynamic_failure()?;
        *self.last_filters.lock().unwrap() = Some(filters.clone());

        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|((plural, ns, _), _)| {
                plural == &ar.plural && namespace.is_none_or(|wanted| wanted == ns.as_str())
            })
            .map(|(_, object)| object)
            .filter(|object| {
                filters
                    .label_selector
                    .as_deref()
                    .is_none_or(|selector| labels_match(object, selector))
            })
            // Items come back without type information, as from a real list
            .map(|object| {
                let mut item = object.clone();
                if let Some(map) = item.as_object_mut() {
                    map.remove("apiVersion");
                    map.remove("kind");
                }
                item
            })
            .collect())
    }

    async fn create_object(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        object: &Value,
    ) -> BackendResult<Value> {
        bump(&self.calls.create);
        let name = object_name(object);
        if self.object(&ar.plural, namespace, &name).is_some() {
            return Err(ApiFailure::new(
                Some(409),
                format!("{} \"{}\" already exists", ar.plural, name),
            ));
        }
        let stored = self.with_version(object);
        self.insert_object(&ar.plural, namespace, stored.clone());
        Ok(stored)
    }

    async fn update_object(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        object: &Value,
    ) -> BackendResult<Value> {
        bump(&self.calls.update);
        if let Some(failure) = self.update_failure.lock().unwrap().clone() {
            return Err(failure);
        }
        if self.object(&ar.plural, namespace, name).is_none() {
            return Err(not_found(&ar.plural, name));
        }
        let stored = self.with_version(object);
        self.insert_object(&ar.plural, namespace, stored.clone());
        Ok(stored)
    }

    async fn delete_object(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> BackendResult<()> {
        bump(&self.calls.delete);
        self.dynamic_failure()?;
        let key = (
            ar.plural.clone(),
            namespace.unwrap_or_default().to_string(),
            name.to_string(),
        );
        match self.objects.lock().unwrap().remove(&key) {
            Some(_) => Ok(()),
            None => Err(not_found(&ar.plural, name)),
        }
    }

    async fn pod_container_names(&self, namespace: &str, pod: &str) -> BackendResult<Vec<String>> {
        bump(&self.calls.core);
        let object = self
            .object("pods", Some(namespace), pod)
            .ok_or_else(|| not_found("pods", pod))?;
        Ok(object
            .pointer("/spec/containers")
            .and_then(Value::as_array)
            .map(|containers| containers.iter().map(object_name_of_container).collect())
            .unwrap_or_default())
    }

    async fn open_log_stream(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: i64,
    ) -> BackendResult<LogStream> {
        bump(&self.calls.core);
        *self.last_tail_lines.lock().unwrap() = Some(tail_lines);

        let container = match container {
            Some(c) => c.to_string(),
            None => self
                .pod_container_names(namespace, pod)
                .await?
                .into_iter()
                .next()
                .unwrap_or_default(),
        };
        let key = (namespace.to_string(), pod.to_string(), container);

        let inner: LogStream = match self.logs.lock().unwrap().get(&key) {
            Some(LogSource::Bytes(bytes)) => Box::pin(futures::io::Cursor::new(bytes.clone())),
            Some(LogSource::OpenFails(failure)) => return Err(failure.clone()),
            Some(LogSource::ReadFails { partial, error }) => {
                let chunks: Vec<io::Result<Vec<u8>>> = vec![
                    Ok(partial.clone().into_bytes()),
                    Err(io::Error::other(error.clone())),
                ];
                Box::pin(futures::stream::iter(chunks).into_async_read())
            }
            None => Box::pin(futures::io::Cursor::new(Vec::new())),
        };
        Ok(self.track(inner))
    }

    async fn pod_metrics(&self, namespace: &str, pod: &str) -> BackendResult<PodMetrics> {
        bump(&self.calls.metrics);
        self.metrics_failure()?;
        self.pod_metrics
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), pod.to_string()))
            .cloned()
            .ok_or_else(|| not_found("podmetrics", pod))
    }

    async fn node_metrics(&self, node: &str) -> BackendResult<NodeMetrics> {
        bump(&self.calls.metrics);
        self.metrics_failure()?;
        self.node_metrics
            .lock()
            .unwrap()
            .get(node)
            .cloned()
            .ok_or_else(|| not_found("nodemetrics", node))
    }

    async fn list_events(&self, namespace: Option<&str>) -> BackendResult<Vec<Event>> {
        bump(&self.calls.events);
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| namespace.is_none_or(|ns| e.metadata.namespace.as_deref() == Some(ns)))
            .cloned()
            .collect())
    }
}

fn object_name_of_container(container: &Value) -> String {
    container
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
