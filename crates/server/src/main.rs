use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use jejak_audit::RetentionPruner;
use jejak_server::api::AppState;
use jejak_server::config::JejakConfig;
use jejak_server::pipeline::AuditPipeline;

/// Jejak audit trail HTTP server.
#[derive(Parser, Debug)]
#[command(name = "jejak-server", about = "Standalone HTTP server for the Jejak audit trail")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "jejak.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server (default).
    Serve,
    /// Create the audit table and indexes for the configured backend, then exit.
    Migrate,
    /// Run one retention sweep, print the report as JSON, then exit.
    Cleanup {
        /// Override the configured retention horizon in days.
        #[arg(long)]
        days: Option<u32>,
    },
    /// Print retention statistics as JSON, then exit.
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (config, found) = JejakConfig::load(&cli.config)?;
    jejak_server::telemetry::init(&config.logging);

    if !found {
        info!(path = %cli.config, "config file not found, using defaults");
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, cli.host, cli.port).await,
        Commands::Migrate => run_migrate(&config).await,
        Commands::Cleanup { days } => run_cleanup(&config, days).await,
        Commands::Stats => run_stats(&config).await,
    }
}

async fn serve(
    config: JejakConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = jejak_server::store_factory::create_store(&config.store).await?;
    info!(backend = %config.store.backend, "audit store initialized");

    let pipeline = AuditPipeline::from_config(store, &config)?;

    let retention_cancel = CancellationToken::new();
    let retention_task = if config.retention.enabled {
        Some(pipeline.spawn_retention(retention_cancel.clone()))
    } else {
        info!("audit retention schedule disabled");
        None
    };

    let app = jejak_server::api::router(AppState::from_pipeline(&pipeline));

    // Resolve the bind address (CLI overrides take precedence).
    let host = host.unwrap_or(config.server.host);
    let port = port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "jejak-server listening");

    // Serve with graceful shutdown on SIGINT / SIGTERM.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop scheduling new sweeps, then flush what the recorder still holds.
    retention_cancel.cancel();

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
    info!(
        timeout_secs = config.server.shutdown_timeout_seconds,
        "draining audit pipeline..."
    );
    let drain = async {
        if let Some(task) = retention_task
            && let Err(e) = task.await
        {
            warn!(error = %e, "audit retention task ended abnormally");
        }
        pipeline.recorder.shutdown().await;
    };
    if tokio::time::timeout(shutdown_timeout, drain).await.is_err() {
        warn!(
            timeout_secs = config.server.shutdown_timeout_seconds,
            "shutdown timeout exceeded, some audit events may be lost"
        );
    }

    info!("jejak-server shut down");
    Ok(())
}

/// Run the `migrate` subcommand: initialize the audit schema and exit.
async fn run_migrate(config: &JejakConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(backend = %config.store.backend, "running audit store migrations...");
    let _store = jejak_server::store_factory::create_store(&config.store).await?;
    info!(backend = %config.store.backend, "audit store migrations complete");
    Ok(())
}

/// Run the `cleanup` subcommand: one manual sweep, report to stdout.
async fn run_cleanup(
    config: &JejakConfig,
    days: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pruner = build_pruner(config).await?;
    let report = pruner.run_manual(days).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Run the `stats` subcommand: retention statistics to stdout.
async fn run_stats(config: &JejakConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pruner = build_pruner(config).await?;
    let stats = pruner.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn build_pruner(config: &JejakConfig) -> Result<Arc<RetentionPruner>, Box<dyn std::error::Error>> {
    let store = jejak_server::store_factory::create_store(&config.store).await?;
    Ok(Arc::new(RetentionPruner::new(
        store,
        config.retention.to_retention_config(),
    )?))
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
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
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
