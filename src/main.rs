mod api;
mod gateway;
mod pairing;

use clap::{Parser, Subcommand};
use gateway::{Dispatcher, OutboundGateway, Scheduler};
use pairing::{server::PairingState, SessionStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wasla_channels::{
    whatsapp::{BridgeConnector, ConnectionManager},
    whatsapp_store::AuthStateStore,
};
use wasla_core::config::{self, shellexpand, Config};
use wasla_memory::Store;

#[derive(Parser)]
#[command(
    name = "wasla",
    version,
    about = "Wasla — WhatsApp restaurant bot with an admin API"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml", env = "WASLA_CONFIG")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to WhatsApp and serve the bot, API and pairing channel.
    Start,
    /// Show configuration, stored data and link credentials.
    Status,
    /// Forget the stored link credentials so the next start shows a QR code.
    Pair,
}

/// Stdout plus a daily rolling file under `{data_dir}/logs`.
fn init_logging(cfg: &Config) -> anyhow::Result<WorkerGuard> {
    let log_dir = format!("{}/logs", shellexpand(&cfg.wasla.data_dir));
    std::fs::create_dir_all(&log_dir)?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "wasla.log"));

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.wasla.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load(&cli.config)?;
    let rejected_port = cfg.apply_env();
    let _guard = init_logging(&cfg)?;

    if !Path::new(&cli.config).exists() {
        info!("Config file not found at {}, using defaults", cli.config);
    }
    if let Some(raw) = rejected_port {
        warn!("ignoring invalid PORT value '{raw}'");
    }

    match cli.command {
        Commands::Start => start(cfg).await?,
        Commands::Status => {
            println!("Wasla — Status Check\n");
            println!("Config: {}", cli.config);
            println!("Bridge: {}", cfg.whatsapp.bridge_url);
            println!(
                "API: {}",
                if cfg.api.enabled {
                    format!("{}:{}", cfg.api.host, cfg.api.port)
                } else {
                    "disabled".to_string()
                }
            );
            println!(
                "Pairing channel: {}",
                if cfg.pairing.enabled {
                    format!("{}:{}", cfg.pairing.host, cfg.pairing.port)
                } else {
                    "disabled".to_string()
                }
            );
            println!();

            let store = Store::new(&cfg.memory).await?;
            println!("  menu items:   {}", store.list_menu_items().await?.len());
            println!("  auto-replies: {}", store.list_auto_replies().await?.len());
            println!("  orders:       {}", store.list_orders().await?.len());
            println!("  chats:        {}", store.list_chats().await?.len());

            let auth = AuthStateStore::open(&cfg.auth_state_dir()).await?;
            let paired = auth.load(&cfg.whatsapp.auth_state).await?.is_some();
            println!(
                "  whatsapp:     {}",
                if paired {
                    "credentials stored"
                } else {
                    "not paired"
                }
            );
        }
        Commands::Pair => {
            let auth = AuthStateStore::open(&cfg.auth_state_dir()).await?;
            auth.clear(&cfg.whatsapp.auth_state).await?;
            println!(
                "Credentials for '{}' cleared. Run `wasla start` and scan the QR code.",
                cfg.whatsapp.auth_state
            );
        }
    }

    Ok(())
}

/// Wire everything up and run until Ctrl-C.
async fn start(cfg: Config) -> anyhow::Result<()> {
    info!("Wasla starting ({})", cfg.wasla.name);

    let store = Store::new(&cfg.memory).await?;
    let auth = AuthStateStore::open(&cfg.auth_state_dir()).await?;
    let connector = Arc::new(BridgeConnector::new(
        &cfg.whatsapp.bridge_url,
        Duration::from_secs(cfg.whatsapp.request_timeout_secs),
    ));

    let (inbound_tx, inbound_rx) = mpsc::channel(256);
    let connection = Arc::new(ConnectionManager::new(
        connector,
        auth,
        &cfg.whatsapp.auth_state,
        Duration::from_secs(cfg.whatsapp.reconnect_delay_secs),
        inbound_tx,
    ));
    connection.start();

    let outbound = OutboundGateway::new(
        Arc::clone(&connection) as Arc<dyn gateway::LinkSource>,
        store.clone(),
        cfg.outbound.clone(),
    );

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        outbound.clone(),
        cfg.dispatch.clone(),
    ));
    tokio::spawn(dispatcher.run(inbound_rx));

    let scheduler = Scheduler::new(outbound.clone());

    if cfg.api.enabled {
        let state = api::ApiState::new(
            &cfg.api,
            store.clone(),
            outbound.clone(),
            scheduler.clone(),
            Arc::clone(&connection),
        );
        tokio::spawn(api::serve(cfg.api.clone(), state));
    }

    if cfg.pairing.enabled {
        let state = PairingState {
            sessions: Arc::new(SessionStore::new()),
            outbound: outbound.clone(),
            connection: Arc::clone(&connection),
        };
        tokio::spawn(pairing::server::serve(cfg.pairing.clone(), state));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    scheduler.cancel_all();
    connection.shutdown().await;
    Ok(())
}
