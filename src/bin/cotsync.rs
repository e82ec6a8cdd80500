//! cotsync daemon
//!
//! Wires configuration, the store, transport readers, the sweeper and the mission controller
//! together, then runs until interrupted.

use std::path::PathBuf;
use std::process;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cotsync::config::{ConfigLoader, CotSyncConfig};
use cotsync::ingest::{ChangeBus, Ingestor, Notification};
use cotsync::logging::init_logging;
use cotsync::mission::{HttpMissionClient, MissionApi, SubscriptionController};
use cotsync::store::Store;
use cotsync::sweep::StaleSweeper;
use cotsync::transport::{run_datagram_listener, run_stream_reader};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "cotsync", version, about = "Cursor-on-Target ingestion daemon")]
struct Cli {
    /// Explicit configuration file, layered over the global one
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Subscribe to these missions at startup (NAME or NAME:PASSWORD)
    #[arg(long = "mission")]
    missions: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match ConfigLoader::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Err(e) = init_logging(Some(&config.logging)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(cli, config).await {
        error!("cotsync stopped: {:#}", e);
        eprintln!("{:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli, config: CotSyncConfig) -> Result<()> {
    let store = Store::shared(&config.store.path)
        .with_context(|| format!("opening store at {}", config.store.path.display()))?;
    info!(path = %config.store.path.display(), entities = store.entity_count(), "Store opened");

    let (bus, notifications) = ChangeBus::new_pair();
    spawn_notification_log(notifications);

    let ingestor = Arc::new(Ingestor::new(
        store.clone(),
        bus.clone(),
        config.ingest.max_buffer_bytes,
    ));
    let sweeper = StaleSweeper::new(store.clone(), bus.clone()).spawn(config.sweep.interval());

    let controller = match config.server.base_url() {
        Some(_) => {
            let api: Arc<dyn MissionApi> = Arc::new(HttpMissionClient::new(&config.server)?);
            Some(Arc::new(SubscriptionController::from_config(
                ingestor.clone(),
                api,
                &config.server,
            )))
        }
        None => None,
    };

    if let Some(bind) = &config.ingest.datagram_bind {
        let socket = UdpSocket::bind(bind)
            .await
            .with_context(|| format!("binding datagram listener to {}", bind))?;
        let ingestor = ingestor.clone();
        tokio::spawn(async move {
            if let Err(e) = run_datagram_listener(socket, ingestor).await {
                error!(error = %e, "Datagram listener stopped");
            }
        });
    }

    if let Some(addr) = config.ingest.stream_addr.clone() {
        tokio::spawn(stream_loop(
            addr,
            ingestor.clone(),
            controller.clone(),
            config.server.retry_delay(),
        ));
    }

    if let Some(controller) = &controller {
        if let Err(e) = controller.refresh_mission_list().await {
            warn!(error = %e, "Initial mission list refresh failed");
        }
        for arg in &cli.missions {
            let (name, password) = match arg.split_once(':') {
                Some((name, password)) => (name, Some(password)),
                None => (arg.as_str(), None),
            };
            match controller.subscribe(name, password).await {
                Ok(sync) => info!(
                    mission = name,
                    added = sync.report.to_add.len(),
                    fetching = sync.report.to_fetch.len(),
                    "Mission subscribed"
                ),
                Err(e) => warn!(mission = name, error = %e, "Mission subscription failed"),
            }
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutting down");
    sweeper.abort();
    store.flush()?;
    Ok(())
}

/// Keep a stream connection open, reconnecting after each close.
async fn stream_loop(
    addr: String,
    ingestor: Arc<Ingestor>,
    controller: Option<Arc<SubscriptionController>>,
    delay: Duration,
) {
    let mut connected_before = false;
    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                info!(%addr, "Stream connected");
                if connected_before {
                    if let Some(controller) = &controller {
                        // Detached; the controller logs each failed mission.
                        drop(controller.spawn_reconnect());
                    }
                }
                connected_before = true;
                if let Err(e) = run_stream_reader(stream, ingestor.clone()).await {
                    warn!(%addr, error = %e, "Stream read failed");
                }
            }
            Err(e) => warn!(%addr, error = %e, "Stream connect failed"),
        }
        tokio::time::sleep(delay).await;
    }
}

/// Drain the change bus into the log on a dedicated thread
fn spawn_notification_log(notifications: Receiver<Notification>) {
    std::thread::spawn(move || {
        for notification in notifications {
            debug!(?notification, "Change notification");
        }
    });
}
