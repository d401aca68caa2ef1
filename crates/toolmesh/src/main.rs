use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use toolmesh_core::{BrokerConfig, ToolManager};
use toolmesh_server::{AppState, ProxyState, broker_router, proxy_router};

#[derive(Parser)]
#[command(name = "toolmesh")]
#[command(about = "Multi-provider tool broker with sandboxed execution sessions.")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "TOOLMESH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one broker instance
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "TOOLMESH_PORT")]
        port: Option<u16>,

        /// Address to bind to
        #[arg(short, long, env = "TOOLMESH_BIND")]
        bind: Option<String>,
    },
    /// Run the sticky proxy in front of a broker pool
    Proxy {
        /// Port to listen on
        #[arg(short, long, env = "TOOLMESH_PROXY_PORT")]
        port: Option<u16>,

        /// First port of the backend broker range
        #[arg(long, env = "TOOLMESH_BACKEND_START_PORT")]
        backend_start_port: Option<u16>,

        /// Number of backend broker instances
        #[arg(long, env = "TOOLMESH_BACKEND_COUNT")]
        backend_count: Option<usize>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => BrokerConfig::load(path)?,
        None => BrokerConfig::default(),
    };

    // The sandbox runs code on the blocking pool, so its size comes from
    // configuration rather than the tokio default.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.sandbox.worker_threads.max(1))
        .build()?;

    match cli.command {
        Commands::Serve { port, bind } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            runtime.block_on(serve(config))
        }
        Commands::Proxy {
            port,
            backend_start_port,
            backend_count,
        } => {
            if let Some(port) = port {
                config.proxy.port = port;
            }
            if let Some(start) = backend_start_port {
                config.proxy.backend_start_port = start;
            }
            if let Some(count) = backend_count {
                config.proxy.backend_count = count;
            }
            runtime.block_on(proxy(config))
        }
    }
}

async fn serve(config: BrokerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let tools = Arc::new(ToolManager::new());
    let providers = tools.ready(&config.providers).await;
    if providers.is_empty() {
        warn!("no tool providers connected; tool calls will fail until restart");
    } else {
        info!(providers = ?providers, "tool providers ready");
    }

    let state = Arc::new(AppState::new(Arc::clone(&tools), &config));
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("broker listening on {addr}");

    axum::serve(listener, broker_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tools.close().await;
    Ok(())
}

async fn proxy(config: BrokerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(ProxyState::new(&config.proxy)?);
    let addr = format!("{}:{}", config.proxy.bind, config.proxy.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        backends = config.proxy.backend_count,
        start_port = config.proxy.backend_start_port,
        "proxy listening on {addr}"
    );

    axum::serve(listener, proxy_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    warn!("received Ctrl+C, shutting down");
}
