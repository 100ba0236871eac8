// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod cli;
pub mod config;
mod kubernetes;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::prelude::*;

use cli::{Args, Command};
use kubernetes::{ApiFilters, K8sClient};

/// Initialize logging with file output and optional stderr
fn init_logging(verbose: bool) {
    use tracing_rolling_file::{RollingConditionBase, RollingFileAppenderBase};
    use tracing_subscriber::fmt::format::FmtSpan;

    // Create log directory
    let log_dir = config::base_dir()
        .map(|p| p.join("log"))
        .unwrap_or_else(|_| std::path::PathBuf::from("."));

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        return;
    }

    // File appender with size-based rotation:
    // - Max 10MB per file
    // - Keep up to 5 files (total max ~50MB)
    // - Also rotate daily
    let log_path = log_dir.join("k8smcp.log");
    let condition = RollingConditionBase::new()
        .daily()
        .max_size(10 * 1024 * 1024); // 10MB

    let file_appender = match RollingFileAppenderBase::new(log_path, condition, 5) {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {}", e);
            return;
        }
    };

    let (non_blocking, _guard) = file_appender.get_non_blocking_appender();
    // Leak the guard to keep the background writer alive
    std::mem::forget(_guard);

    let filter = if verbose { "k8smcp=debug" } else { "k8smcp=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    // File layer (always enabled)
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_span_events(FmtSpan::NONE);

    if verbose {
        // stdout carries results, diagnostics go to stderr
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::NONE);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stderr_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (aws-lc-rs). An Err only means one is already installed.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let args = Args::parse();
    init_logging(args.verbose);

    // CLI flags override the config file
    let mut config = config::Config::load()?;
    if let Some(ref context) = args.context {
        config.context = Some(context.clone());
    }
    if let Some(ref kubeconfig) = args.kubeconfig {
        config.kubeconfig = Some(kubeconfig.clone());
    }
    debug!(?config, "Loaded configuration");

    let client = K8sClient::connect(&config).await?;
    run(&client, &args).await
}

fn read_manifest(path: &std::path::Path) -> Result<String> {
    if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("Failed to read manifest from stdin")
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))
    }
}

async fn run(client: &K8sClient, args: &Args) -> Result<()> {
    let format = &args.output;

    let rendered = match &args.command {
        Command::ApiResources {
            namespaced_only,
            cluster_only,
        } => {
            let resources = client
                .list_api_resources(!cluster_only, !namespaced_only)
                .await?;
            output::render(&resources, format)?
        }
        Command::Get {
            kind,
            name,
            namespace,
        } => {
            let object = client
                .get_resource(kind, name, namespace.as_deref())
                .await?;
            output::render(&object, format)?
        }
        Command::List {
            kind,
            namespace,
            selector,
            field_selector,
        } => {
            let filters = ApiFilters {
                label_selector: selector.clone(),
                field_selector: field_selector.clone(),
            };
            let items = client
                .list_resources(kind, namespace.as_deref(), &filters)
                .await?;
            output::render(&items, format)?
        }
        Command::Describe {
            kind,
            name,
            namespace,
        } => {
            let object = client
                .describe_resource(kind, name, namespace.as_deref())
                .await?;
            output::render(&object, format)?
        }
        Command::Apply {
            kind,
            file,
            namespace,
        } => {
            let manifest = read_manifest(file)?;
            let object = client
                .create_or_update_resource(kind, namespace.as_deref(), &manifest)
                .await?;
            output::render(&object, format)?
        }
        Command::Delete {
            kind,
            name,
            namespace,
        } => {
            client
                .delete_resource(kind, name, namespace.as_deref())
                .await?;
            format!("{} '{}' deleted", kind, name)
        }
        Command::Logs {
            pod,
            namespace,
            container,
        } => client.get_logs(namespace, pod, container.as_deref()).await?,
        Command::PodMetrics { pod, namespace } => {
            let metrics = client.get_pod_metrics(namespace, pod).await?;
            output::render(&metrics, format)?
        }
        Command::NodeMetrics { node } => {
            let metrics = client.get_node_metrics(node).await?;
            output::render(&metrics, format)?
        }
        Command::Events { namespace } => {
            let events = client.get_events(namespace.as_deref()).await?;
            output::render(&events, format)?
        }
    };

    println!("{}", rendered);
    Ok(())
}
