// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "k8smcp")]
#[command(author, version, about = "Generic access to any Kubernetes resource type")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Kubernetes context to use (defaults to the kubeconfig's current context)
    #[arg(short, long, value_name = "CONTEXT", global = true)]
    pub context: Option<String>,

    /// Path to the kubeconfig file
    #[arg(long, value_name = "PATH", global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json", global = true)]
    pub output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List resource types served by the cluster
    ApiResources {
        /// Only namespaced resource types
        #[arg(long, conflicts_with = "cluster_only")]
        namespaced_only: bool,

        /// Only cluster-scoped resource types
        #[arg(long)]
        cluster_only: bool,
    },

    /// Get a single resource
    Get {
        /// Resource kind (e.g., Pod, Deployment, Certificate)
        kind: String,
        name: String,
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// List resources of a kind
    List {
        kind: String,
        /// Namespace to list in (all namespaces when omitted)
        #[arg(short, long)]
        namespace: Option<String>,
        /// Label selector (e.g., "app=nginx,tier!=db")
        #[arg(short = 'l', long)]
        selector: Option<String>,
        /// Field selector (e.g., "status.phase=Running")
        #[arg(long)]
        field_selector: Option<String>,
    },

    /// Show a resource in full
    Describe {
        kind: String,
        name: String,
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Create or update a resource from a YAML or JSON manifest
    Apply {
        kind: String,
        /// Manifest file ("-" reads stdin)
        #[arg(short, long)]
        file: PathBuf,
        /// Overrides the manifest's namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Delete a resource
    Delete {
        kind: String,
        name: String,
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Print the tail of a pod's logs
    Logs {
        pod: String,
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Container name (all containers when omitted)
        #[arg(long)]
        container: Option<String>,
    },

    /// Current CPU and memory usage of a pod
    PodMetrics {
        pod: String,
        #[arg(short, long, default_value = "default")]
        namespace: String,
    },

    /// Current CPU and memory usage of a node
    NodeMetrics { node: String },

    /// List events
    Events {
        /// Namespace (cluster-wide when omitted)
        #[arg(short, long)]
        namespace: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}
