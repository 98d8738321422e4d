use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use eclosion_broker::{compaction, BrokerRegistry};
use eclosion_server::api::{self, AppState};
use eclosion_server::auth::TokenService;
use eclosion_server::config::EclosionConfig;
use eclosion_server::directory::TenantDirectory;
use eclosion_server::realtime::RealtimeNotifier;
use eclosion_server::tunnel::TunnelProxy;
use eclosion_state::StateStore;
use eclosion_state_memory::MemoryStateStore;

/// Eclosion IFTTT shim HTTP server.
#[derive(Parser, Debug)]
#[command(name = "eclosion-server", about = "IFTTT edge for self-hosted Eclosion instances")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "eclosion.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber from RUST_LOG or default to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration from TOML file, or use defaults if the file does
    // not exist.
    let mut config: EclosionConfig = if Path::new(&cli.config).exists() {
        let contents = std::fs::read_to_string(&cli.config)?;
        toml::from_str(&contents)?
    } else {
        info!(path = %cli.config, "config file not found, using defaults");
        EclosionConfig::default()
    };
    config.apply_env_overrides();
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    if config.auth.token_secret.is_empty() {
        return Err("auth.token_secret (or ECLOSION_TOKEN_SECRET) must be set".into());
    }

    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let brokers = Arc::new(BrokerRegistry::new(
        Arc::clone(&store),
        config.limits.to_broker_limits(),
    ));
    let directory = Arc::new(TenantDirectory::new(Arc::clone(&store)));
    let tokens = Arc::new(TokenService::new(&config.auth.token_secret));
    let tunnel = Arc::new(TunnelProxy::new(
        config.origin.scheme.clone(),
        config.origin.host_suffix.clone(),
    ));
    let realtime = Arc::new(RealtimeNotifier::new(
        config.ifttt.realtime_url.clone(),
        config.ifttt.service_key.clone(),
    ));

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState {
        store,
        brokers: Arc::clone(&brokers),
        directory,
        tokens,
        tunnel,
        realtime,
        config: Arc::new(config),
    };

    let (compaction_tx, compaction_rx) = mpsc::channel(1);
    let compaction_handle = tokio::spawn(compaction::run(brokers, compaction_rx));

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "eclosion-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    let _ = compaction_tx.send(()).await;
    let _ = compaction_handle.await;

    Ok(())
}
