//! Headless station runtime.
//!
//! Wires the engine to a real feed connection: loads station settings,
//! initializes structured logging (console + daily rolling file), then runs
//! until ctrl-c. Projection frames, arrivals, and notices are logged so a
//! station can be watched (or smoke-tested) without any UI attached.

use anyhow::Context;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use the_small_kds::{ConnectionManager, Engine, StationSettings};

fn settings_path() -> PathBuf {
    std::env::var_os("KDS_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("kds-settings.json"))
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,the_small_kds=debug"));

    let log_dir = PathBuf::from("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&log_dir, "kds");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Keep the guard alive for the lifetime of the process — dropping it
    // flushes and closes the file writer.
    std::mem::forget(guard);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    info!("Starting The Small KDS v{}", env!("CARGO_PKG_VERSION"));

    let settings = StationSettings::load(&settings_path());
    info!(
        station = %settings.station_name,
        feed = %settings.feed_url,
        "Station configuration loaded"
    );

    let cancel = CancellationToken::new();
    let (snapshots_tx, snapshots_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let (connection, mut conn_state) = ConnectionManager::new(
        settings.feed_url.clone(),
        settings.station_name.clone(),
        Duration::from_secs(settings.reconnect_delay_secs),
        snapshots_tx,
        outbound_rx,
        cancel.clone(),
    );
    let (engine, mut handle, mut events) =
        Engine::new(&settings, snapshots_rx, outbound_tx, cancel.clone());

    let engine_task = tokio::spawn(engine.run());
    let connection_task = tokio::spawn(connection.run());

    // Observer loops standing in for the presentation/alert collaborators.
    let observers = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = handle.frames.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let frame = handle.frames.borrow_and_update();
                    info!(
                        visible_kots = frame.kot_count,
                        cards = frame.tickets.len(),
                        delivered = frame.delivered.len(),
                        "Projection updated"
                    );
                }
                state = conn_state.changed() => {
                    if state.is_err() {
                        return;
                    }
                    info!(state = ?*conn_state.borrow_and_update(), "Connection state");
                }
                arrival = events.arrivals.recv() => match arrival {
                    Some(arrival) => info!(?arrival, "New arrival"),
                    None => return,
                },
                notice = events.notices.recv() => match notice {
                    Some(notice) => info!(%notice, "Notice"),
                    None => return,
                },
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("Shutdown requested");
    cancel.cancel();

    if let Err(e) = engine_task.await {
        warn!(error = %e, "Engine task ended abnormally");
    }
    if let Err(e) = connection_task.await {
        warn!(error = %e, "Connection task ended abnormally");
    }
    observers.abort();

    Ok(())
}
