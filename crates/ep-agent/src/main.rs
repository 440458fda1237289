//! Edge Poll Agent Daemon
//!
//! Checks in with the controller at the configured cadence and hands the
//! returned schedules, log requests and stack targets to the local
//! subsystems. This binary carries no reverse tunnel transport, so it always
//! runs with tunnel management disabled; programs embedding `ep_agent`
//! supply a transport through [`ep_agent::Collaborators`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ep_agent::collaborators::{LoggingLogCollector, LoggingScheduler, LoggingStackReconciler};
use ep_agent::{Collaborators, PollService};
use ep_core::config::{self, AgentConfig};
use ep_core::ContainerPlatform;

#[derive(Parser)]
#[command(name = "ep-agent")]
#[command(about = "Edge poll agent - checks in with the controller")]
#[command(version)]
struct Args {
    /// Controller base URL
    /// Example: https://controller.example.com:9443
    #[arg(long, env = "EDGE_CONTROLLER_URL")]
    controller_url: Option<String>,

    /// Edge identifier
    #[arg(long, env = "EDGE_ID")]
    edge_id: Option<String>,

    /// Endpoint identifier assigned by the controller
    #[arg(long, env = "EDGE_ENDPOINT_ID")]
    endpoint_id: Option<String>,

    /// Initial poll frequency in seconds
    #[arg(long)]
    poll_frequency: Option<u64>,

    /// Tunnel inactivity timeout in seconds
    #[arg(long)]
    inactivity_timeout: Option<u64>,

    /// Skip TLS certificate validation when polling
    #[arg(long)]
    insecure_poll: bool,

    /// Platform reported to the controller
    #[arg(long, value_enum)]
    platform: Option<PlatformArg>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PlatformArg {
    Docker,
    Kubernetes,
    Podman,
}

impl From<PlatformArg> for ContainerPlatform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Docker => ContainerPlatform::Docker,
            PlatformArg::Kubernetes => ContainerPlatform::Kubernetes,
            PlatformArg::Podman => ContainerPlatform::Podman,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Edge poll agent starting...");

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);

    let mut config = if config_path.exists() {
        config::load_config(&config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", config_path, e);
            AgentConfig::default()
        })
    } else {
        AgentConfig::default()
    };

    apply_overrides(&mut config, args);

    if config.tunnel_capability {
        tracing::warn!("No tunnel transport is built into this binary, running without reverse tunnel");
        config.tunnel_capability = false;
    }

    let collaborators = Collaborators {
        scheduler: Arc::new(LoggingScheduler),
        log_collector: Arc::new(LoggingLogCollector),
        stack_reconciler: Arc::new(LoggingStackReconciler),
        tunnel: None,
    };

    let service =
        PollService::spawn(&config, collaborators).context("Failed to start poll service")?;
    service.handle().start().await;

    tracing::info!(
        endpoint_id = %config.endpoint_id,
        controller_url = config.controller_url(),
        "Polling controller"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down...");
    service.shutdown().await;
    Ok(())
}

/// Apply command-line overrides on top of the loaded configuration
fn apply_overrides(config: &mut AgentConfig, args: Args) {
    if let Some(url) = args.controller_url {
        config.controller_url = url;
    }
    if let Some(edge_id) = args.edge_id {
        config.edge_id = edge_id;
    }
    if let Some(endpoint_id) = args.endpoint_id {
        config.endpoint_id = endpoint_id;
    }
    if let Some(secs) = args.poll_frequency {
        config.poll_frequency = Duration::from_secs(secs);
    }
    if let Some(secs) = args.inactivity_timeout {
        config.inactivity_timeout = Duration::from_secs(secs);
    }
    if args.insecure_poll {
        config.insecure_poll = true;
    }
    if let Some(platform) = args.platform {
        config.container_platform = platform.into();
    }
}
