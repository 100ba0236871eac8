// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Typed records for the narrow read paths (metrics, events)
//!
//! `metrics.k8s.io` has no k8s-openapi types, so the snapshots are decoded
//! from the dynamic representation into the structs below.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Event;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::{Deserialize, Serialize};

/// `metrics.k8s.io/v1beta1` PodMetrics snapshot
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodMetrics {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Sample window as reported by the server (e.g., "15.042s")
    #[serde(default)]
    pub window: String,
    #[serde(default)]
    pub containers: Vec<ContainerMetrics>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerMetrics {
    pub name: String,
    #[serde(default)]
    pub usage: BTreeMap<String, Quantity>,
}

/// `metrics.k8s.io/v1beta1` NodeMetrics snapshot
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeMetrics {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub window: String,
    #[serde(default)]
    pub usage: BTreeMap<String, Quantity>,
}

/// CPU and memory usage as Kubernetes quantity strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceUsage {
    pub cpu: String,
    pub memory: String,
}

impl ResourceUsage {
    fn from_usage(usage: &BTreeMap<String, Quantity>) -> Self {
        let get = |key: &str| {
            usage
                .get(key)
                .map(|q| q.0.clone())
                .unwrap_or_else(|| "0".to_string())
        };
        Self {
            cpu: get("cpu"),
            memory: get("memory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerUsage {
    pub name: String,
    #[serde(flatten)]
    pub usage: ResourceUsage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMetricsRecord {
    pub pod_name: String,
    pub namespace: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub window: String,
    pub containers: Vec<ContainerUsage>,
}

impl PodMetricsRecord {
    pub fn new(namespace: &str, pod: &str, metrics: PodMetrics) -> Self {
        Self {
            pod_name: pod.to_string(),
            namespace: namespace.to_string(),
            timestamp: metrics.timestamp,
            window: metrics.window,
            containers: metrics
                .containers
                .iter()
                .map(|c| ContainerUsage {
                    name: c.name.clone(),
                    usage: ResourceUsage::from_usage(&c.usage),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetricsRecord {
    pub node_name: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub window: String,
    pub usage: ResourceUsage,
}

impl NodeMetricsRecord {
    pub fn new(node: &str, metrics: NodeMetrics) -> Self {
        Self {
            node_name: node.to_string(),
            timestamp: metrics.timestamp,
            window: metrics.window,
            usage: ResourceUsage::from_usage(&metrics.usage),
        }
    }
}

/// Re-read an API timestamp through its RFC 3339 wire form
fn to_utc(time: Option<Time>) -> Option<DateTime<Utc>> {
    time.and_then(|t| serde_json::to_value(t).ok())
        .and_then(|v| serde_json::from_value(v).ok())
}

/// Flattened core/v1 Event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub name: String,
    pub namespace: String,
    pub reason: String,
    pub message: String,
    /// Component that emitted the event
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub count: i32,
    #[serde(rename = "firstTime")]
    pub first_timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "lastTime")]
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl From<Event> for EventRecord {
    fn from(event: Event) -> Self {
        Self {
            name: event.metadata.name.unwrap_or_default(),
            namespace: event.metadata.namespace.unwrap_or_default(),
            reason: event.reason.unwrap_or_default(),
            message: event.message.unwrap_or_default(),
            source: event
                .source
                .and_then(|s| s.component)
                .unwrap_or_default(),
            event_type: event.type_.unwrap_or_default(),
            count: event.count.unwrap_or_default(),
            first_timestamp: to_utc(event.first_timestamp),
            last_timestamp: to_utc(event.last_timestamp),
        }
    }
}
