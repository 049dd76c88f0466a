//! Appbridge CLI - host sandboxed UI clients over stdio or TCP
//!
//! Provides subcommands for writing a config, serving clients, and
//! inspecting the tool surface visible to a set of connected namespaces.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::net::TcpListener;

use appbridge::runtime::{ConnectionContext, HostConfig, SessionManager, resolve_visible_tools};
use appbridge::runtime::access::{SharedConnections, resource_visible};
use appbridge::service::{Service, catalog_from_config};

#[derive(Parser)]
#[command(name = "appbridge")]
#[command(about = "Host-side RPC runtime for sandboxed UI apps", long_about = None)]
struct Cli {
    /// Host configuration file (defaults apply when absent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Destination path
        path: PathBuf,
    },

    /// Serve clients over stdio, or over TCP with --listen
    Serve {
        /// Listen on TCP ADDR instead of stdio
        #[arg(long)]
        listen: Option<String>,

        /// UI resource rendered by connecting clients
        #[arg(long)]
        resource: Option<String>,

        /// Namespaces to treat as connected
        #[arg(long = "connect")]
        connect: Vec<String>,

        /// Override the host-to-client request timeout
        #[arg(long)]
        request_timeout_ms: Option<u64>,

        /// Override the per-channel pending request limit
        #[arg(long)]
        max_pending: Option<usize>,
    },

    /// Print the tools and resources visible to a set of namespaces
    Inspect {
        /// Namespaces to treat as connected
        #[arg(long = "connect")]
        connect: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => HostConfig::load(path)
            .with_context(|| format!("Failed to load config: {:?}", path))?,
        None => HostConfig::default(),
    };

    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.log_level().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { path } => {
            HostConfig::default().save(&path)?;
            println!("Wrote default configuration to {:?}", path);
        }

        Commands::Serve {
            listen,
            resource,
            connect,
            request_timeout_ms,
            max_pending,
        } => {
            let mut config = config;
            if let Some(timeout) = request_timeout_ms {
                config.request_timeout_ms = timeout;
            }
            if let Some(limit) = max_pending {
                config.max_pending_requests = limit;
            }
            config.validate()?;

            let registry = catalog_from_config(&config)?.snapshot();
            let connections = SharedConnections::new();
            for namespace in connect {
                connections.connect(namespace);
            }

            let manager = Arc::new(SessionManager::new(
                registry,
                Arc::new(connections),
                config,
            ));
            let service = Arc::new(Service::new(manager.clone(), resource));

            match listen {
                Some(addr) => {
                    let listener = TcpListener::bind(&addr)
                        .await
                        .with_context(|| format!("Failed to bind {addr}"))?;
                    tokio::select! {
                        result = service.listen(listener) => result?,
                        _ = tokio::signal::ctrl_c() => {}
                    }
                }
                None => {
                    let id = service
                        .handle(tokio::io::stdin(), tokio::io::stdout())
                        .await?;
                    tracing::info!(session = %id, "stdio session finished");
                }
            }

            manager.shutdown().await;
        }

        Commands::Inspect { connect } => {
            let registry = catalog_from_config(&config)?.snapshot();
            let context = ConnectionContext::with_namespaces(connect);

            let tools: Vec<_> = resolve_visible_tools(&registry, &context)
                .into_iter()
                .map(|tool| tool.describe_json())
                .collect();
            let resources: Vec<_> = registry
                .resources()
                .into_iter()
                .filter(|resource| resource_visible(resource.uri().as_str(), &context))
                .map(|resource| resource.describe())
                .collect();

            let report = json!({ "tools": tools, "resources": resources });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
