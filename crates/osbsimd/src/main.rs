//! osbsimd: the broker simulator daemon.
//!
//! Loads settings and the service catalog, then serves the `/v2` broker
//! routes until Ctrl-C. All state is in memory and lost on exit.
//!
//! # Usage
//!
//! ```text
//! osbsimd serve --config osbsim.toml --catalog catalog.json --port 8080
//! osbsimd config --config osbsim.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use osbsim_core::{Catalog, Settings};
use osbsim_engine::Broker;

const DEFAULT_FILTER: &str = "info,osbsimd=debug,osbsim=debug";

#[derive(Parser)]
#[command(name = "osbsimd", about = "Simulated service broker daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the broker API.
    Serve {
        /// Settings file (TOML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Catalog file (`.json` or `.toml`). Overrides `server.catalog`.
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Port to listen on. Overrides the port of `server.listen`.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the effective settings as TOML.
    Config {
        /// Settings file (TOML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            catalog,
            port,
        } => {
            let mut settings = load_settings(config.as_deref())?;
            if let Some(catalog) = catalog {
                settings.server.catalog = Some(catalog);
            }
            if let Some(port) = port {
                settings.server.listen.set_port(port);
            }
            serve(settings).await
        }
        Command::Config { config } => {
            let settings = load_settings(config.as_deref())?;
            print!("{}", settings.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    match path {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => Ok(Settings::default()),
    }
}

fn load_catalog(settings: &Settings) -> anyhow::Result<Catalog> {
    match &settings.server.catalog {
        Some(path) => {
            let catalog = Catalog::from_file(path)
                .with_context(|| format!("failed to load catalog from {}", path.display()))?;
            info!(path = %path.display(), services = catalog.services.len(), "catalog loaded");
            Ok(catalog)
        }
        None => {
            info!("no catalog configured, using the built-in sample");
            Ok(Catalog::sample())
        }
    }
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    info!("osbsim daemon starting");

    let catalog = load_catalog(&settings)?;
    let addr: SocketAddr = settings.server.listen;
    info!(
        min_api_version = %settings.protocol.min_api_version,
        async_by_default = settings.behavior.async_by_default,
        seconds_to_complete = settings.behavior.seconds_to_complete,
        "settings loaded"
    );

    let broker = Broker::new(Arc::new(catalog), Arc::new(settings));
    let router = osbsim_api::build_router(broker);

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
    });

    server.await?;

    info!("osbsim daemon stopped");
    Ok(())
}
