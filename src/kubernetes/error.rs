// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Error taxonomy for the resource access layer
//!
//! Backend surfaces report raw [`ApiFailure`]s. The client classifies them into
//! [`K8sError`] variants and attaches the operation, resource type and object
//! name so that callers get something actionable.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, K8sError>;

/// Raw failure reported by one of the cluster API surfaces
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiFailure {
    /// HTTP status code, when the API server answered at all
    pub code: Option<u16>,
    pub message: String,
}

impl ApiFailure {
    pub fn new(code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Failure with no HTTP status (connection refused, decode error, ...)
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Some(404)
    }
}

impl From<kube::Error> for ApiFailure {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => Self::new(Some(resp.code), resp.message),
            other => Self::transport(other.to_string()),
        }
    }
}

/// Classified error returned by every [`K8sClient`](super::K8sClient) operation
#[derive(Debug, Error)]
pub enum K8sError {
    #[error("resource type '{kind}' not found in cluster discovery")]
    ResourceTypeNotFound { kind: String },

    #[error("resource discovery failed: {source}")]
    DiscoveryUnavailable {
        #[source]
        source: ApiFailure,
    },

    #[error("{kind} '{name}' not found{}", in_namespace(.namespace))]
    NotFound {
        kind: String,
        name: String,
        namespace: Option<String>,
    },

    #[error("{kind} manifest has no metadata.name")]
    MissingName { kind: String },

    /// Manifest text could not be parsed into an object. Classified with the
    /// other serialization failures of the backend category.
    #[error("invalid {kind} manifest: {reason}")]
    InvalidManifest { kind: String, reason: String },

    #[error("{operation} {kind} '{name}' failed: {source}")]
    Backend {
        operation: &'static str,
        kind: String,
        name: String,
        #[source]
        source: ApiFailure,
    },

    #[error("log stream for pod '{pod}'{} failed: {source}", container_suffix(.container))]
    LogStream {
        pod: String,
        container: Option<String>,
        #[source]
        source: ApiFailure,
    },

    #[error("metrics unavailable for {target}: {source}")]
    MetricsUnavailable {
        target: String,
        #[source]
        source: ApiFailure,
    },
}

impl K8sError {
    /// True for every failure that belongs to the backend category
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::InvalidManifest { .. })
    }

    /// Classify a dynamic-surface failure: 404 becomes `NotFound`, the rest `Backend`
    pub(crate) fn from_api(
        operation: &'static str,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
        failure: ApiFailure,
    ) -> Self {
        if failure.is_not_found() {
            Self::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.map(String::from),
            }
        } else {
            Self::Backend {
                operation,
                kind: kind.to_string(),
                name: name.to_string(),
                source: failure,
            }
        }
    }
}

fn in_namespace(namespace: &Option<String>) -> String {
    namespace
        .as_deref()
        .map(|ns| format!(" in namespace '{}'", ns))
        .unwrap_or_default()
}

fn container_suffix(container: &Option<String>) -> String {
    container
        .as_deref()
        .map(|c| format!(" container '{}'", c))
        .unwrap_or_default()
}
