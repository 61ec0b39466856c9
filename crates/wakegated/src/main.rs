//! wakegated — the wakegate daemon.
//!
//! One binary for every wakegate role:
//! - Activation gateway (the reverse proxy's default backend)
//! - Workload scaler (wake event subscriber)
//! - One-shot sleep and status commands
//!
//! # Usage
//!
//! ```text
//! wakegated serve --config /etc/wakegate/wakegate.toml
//! wakegated serve --no-scaler          # gateway only
//! wakegated scaler                     # scaler only
//! wakegated sleep --namespace default --name grafana
//! wakegated status --namespace default --name grafana
//! ```
//!
//! `serve` binds two listeners: the public default backend the reverse
//! proxy forwards to, and the admin listener (loopback by default) for
//! the workload API and metrics.

mod components;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wakegate_api::{ApiState, build_admin_router, build_router};
use wakegate_core::{WakegateConfig, WorkloadKey};
use wakegate_state::{LifecycleState, StateStore};

use crate::components::Components;

const DEFAULT_FILTER: &str = "info,wakegate=debug,wakegated=debug";

#[derive(Parser)]
#[command(name = "wakegated", about = "wakegate scale-to-zero activation controller", version)]
struct Cli {
    /// Path to wakegate.toml. Defaults apply when omitted.
    #[arg(long, global = true, env = "WAKEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override `store.url`.
    #[arg(long, global = true, env = "WAKEGATE_REDIS_URL")]
    redis_url: Option<String>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the activation gateway, and the workload scaler unless disabled.
    Serve {
        /// Address to listen on (overrides `server.listen`).
        #[arg(long, env = "WAKEGATE_LISTEN")]
        listen: Option<SocketAddr>,

        /// Admin API and metrics address (overrides `server.admin_listen`).
        #[arg(long, env = "WAKEGATE_ADMIN_LISTEN")]
        admin_listen: Option<SocketAddr>,

        /// Do not consume wake events in this process.
        #[arg(long)]
        no_scaler: bool,
    },

    /// Run only the workload scaler.
    Scaler,

    /// Scale a workload to zero and record it as sleeping.
    Sleep {
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        name: String,
    },

    /// Print a workload's lifecycle state.
    Status {
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        name: String,
    },

    /// Print the effective configuration.
    Config,
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<WakegateConfig> {
    let mut config = match &cli.config {
        Some(path) => WakegateConfig::from_file(path)?,
        None => WakegateConfig::default(),
    };
    if let Some(url) = &cli.redis_url {
        config.store.url = url.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    let config = load_config(&cli)?;

    match cli.command {
        Command::Serve {
            listen,
            admin_listen,
            no_scaler,
        } => {
            let listeners = Listeners {
                public: listen.unwrap_or(config.server.listen),
                admin: admin_listen.unwrap_or(config.server.admin_listen),
            };
            if listeners.public == listeners.admin {
                anyhow::bail!("admin listener must differ from {}", listeners.public);
            }
            run_serve(config, listeners, no_scaler).await
        }
        Command::Scaler => run_scaler(config).await,
        Command::Sleep { namespace, name } => {
            let components = Components::build(config).await?;
            let key = WorkloadKey::parse(namespace, name)?;
            let transition = components.sleeper().sleep(&key).await?;
            println!(
                "{key}: {} -> {}",
                LifecycleState::label(transition.from),
                transition.to
            );
            Ok(())
        }
        Command::Status { namespace, name } => {
            let components = Components::build(config).await?;
            let key = WorkloadKey::parse(namespace, name)?;
            let state = components.store.get(&key).await?;
            println!("{key}: {}", LifecycleState::label(state));
            Ok(())
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

struct Listeners {
    public: SocketAddr,
    admin: SocketAddr,
}

async fn run_serve(config: WakegateConfig, listeners: Listeners, no_scaler: bool) -> anyhow::Result<()> {
    info!("wakegate daemon starting");

    let components = Components::build(config).await?;
    let coordinator = components.coordinator()?;

    // ── Shutdown signals ───────────────────────────────────────

    // Servers stop first; the scaler keeps running until they drained.
    let (stop_tx, stop_rx) = watch::channel(false);
    let (scaler_tx, scaler_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let scaler_handle = if no_scaler {
        info!("workload scaler disabled in this process");
        None
    } else {
        let scaler = components.scaler();
        Some(tokio::spawn(async move {
            scaler.run(scaler_rx).await;
        }))
    };

    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        // Parked fallback requests answer with a waiting page now.
        signal_coordinator.shutdown();
        let _ = stop_tx.send(true);
    });

    // ── Start HTTP servers ─────────────────────────────────────

    let state = ApiState::new(
        components.store.clone(),
        coordinator,
        std::sync::Arc::new(components.sleeper()),
        components.metrics.clone(),
        &components.config.gateway,
        components.config.wake.wake_unrecorded,
    );

    let public = tokio::net::TcpListener::bind(listeners.public).await?;
    info!(addr = %listeners.public, "activation gateway listening");
    let admin = tokio::net::TcpListener::bind(listeners.admin).await?;
    info!(addr = %listeners.admin, "admin API listening");

    let public = axum::serve(public, build_router(state.clone()))
        .with_graceful_shutdown(stopped(stop_rx.clone()))
        .into_future();
    let admin = axum::serve(admin, build_admin_router(state))
        .with_graceful_shutdown(stopped(stop_rx))
        .into_future();
    let served = tokio::try_join!(public, admin);

    let _ = scaler_tx.send(true);
    if let Some(handle) = scaler_handle {
        let _ = handle.await;
    }
    served?;

    info!("wakegate daemon stopped");
    Ok(())
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

async fn run_scaler(config: WakegateConfig) -> anyhow::Result<()> {
    let components = Components::build(config).await?;
    let scaler = components.scaler();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        scaler.run(shutdown_rx).await;
    });

    wait_for_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = handle.await;
    Ok(())
}

/// Resolve on Ctrl-C or, on unix, SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
