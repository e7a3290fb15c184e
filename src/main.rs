//! Entry point: logging, service wiring, and the operator console loop.

use anyhow::Result;
use std::{path::Path, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing_appender::non_blocking::WorkerGuard;

use gas_courier::{
    auth::AuthSession,
    availability::AvailabilitySession,
    config::Config,
    console::{self, HELP, Input},
    lifecycle::OrderLifecycle,
    location::{LocationProvider, LocationTracker, StaticLocationProvider},
    remote::{
        api::{Credentials, HttpApi, OrderApi},
        session_store::FileSessionStore,
    },
    store::OrderStore,
    worker::{self, Services, WorkerCmd},
};

const CONFIG_PATH: &str = "config.toml";

/// Initialise file logging and keep the non-blocking guard alive.
fn init_logging(cfg: &Config) -> Result<WorkerGuard> {
    // Keep stdout clean for the console by writing straight to a file.
    let file_appender = tracing_appender::rolling::never(".", &cfg.logging.file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(cfg.log_level())
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
    tracing::info!("logging to {}", cfg.logging.file);
    Ok(guard)
}

fn build_services(cfg: &Config) -> Result<Services> {
    let credentials = Credentials::default();
    let api: Arc<dyn OrderApi> = Arc::new(HttpApi::new(
        &cfg.api.base_url,
        cfg.request_timeout(),
        credentials.clone(),
    )?);
    let auth = Arc::new(AuthSession::new(
        api.clone(),
        Arc::new(FileSessionStore::new(&cfg.storage.session_file)),
        credentials,
    ));

    let store = OrderStore::new();
    let provider: Arc<dyn LocationProvider> = Arc::new(StaticLocationProvider::new(
        cfg.fallback_position(),
        cfg.location.permission_granted,
    ));
    let tracker = LocationTracker::new(provider, cfg.location.min_distance_m);

    Ok(Services {
        auth,
        lifecycle: OrderLifecycle::new(api.clone(), store.clone()),
        availability: AvailabilitySession::new(api, tracker, store),
        completion: cfg.completion_settings(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::load_or_default(Path::new(CONFIG_PATH))?;
    let _log_guard = init_logging(&cfg)?;
    tracing::info!(base_url = %cfg.api.base_url, "app starting");

    let services = build_services(&cfg)?;
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (ev_tx, mut ev_rx) = mpsc::channel(128);
    let worker = tokio::spawn(worker::run(cmd_rx, ev_tx, services));

    cmd_tx.send(WorkerCmd::RestoreSession).await?;
    println!("gas courier console; type `help` for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match console::parse_line(&line) {
                    Ok(Input::Empty) => {}
                    Ok(Input::Help) => println!("{HELP}"),
                    Ok(Input::Quit) => break,
                    Ok(Input::Command(cmd)) => cmd_tx.send(cmd).await?,
                    Err(usage) => println!("{usage}"),
                }
            }
            Some(ev) = ev_rx.recv() => println!("{}", console::render(&ev)),
        }
    }

    // Closing the command channel ends the worker loop.
    drop(cmd_tx);
    if let Err(e) = worker.await {
        tracing::error!("worker task failed: {e}");
    }
    tracing::info!("app exiting");
    Ok(())
}
