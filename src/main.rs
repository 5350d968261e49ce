use anyhow::{Context, Result};
use clap::Parser;
use soar_aprs::config::EngineConfig;
use soar_aprs::persistence::Snapshot;
use soar_aprs::station_store::StationStore;
use soar_aprs::{log_format, migrations, Engine};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// APRS packet-processing and station-tracking engine.
#[derive(Parser, Debug)]
#[command(version = env!("VERGEN_GIT_DESCRIBE"), about)]
struct Cli {
    /// Path to a TOML config file. Overrides built-in defaults; itself
    /// overridden by SOAR_APRS_* environment variables.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the station snapshot database.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// This station's callsign, e.g. K1FSY-9.
    #[arg(long)]
    callsign: Option<String>,

    /// Replay a raw KISS byte stream from a file instead of waiting on a
    /// live transport, then print a station summary and exit.
    #[arg(long)]
    replay: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .event_format(log_format::TargetFirstFormat)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(callsign) = &cli.callsign {
        config.my_callsign = callsign.clone();
    }
    let db_path = cli
        .db_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.db_path));

    config.validate().map_err(anyhow::Error::from)?;

    tracing::info!(callsign = %config.my_callsign, db_path = %db_path.display(), "starting engine");

    let mut snapshot = match Snapshot::load(&db_path) {
        Ok(snapshot) => {
            tracing::info!(stations = snapshot.store.stations.len(), "loaded existing snapshot");
            snapshot
        }
        Err(err) => {
            tracing::warn!(error = %err, "no usable snapshot found, starting fresh");
            Snapshot::new(StationStore::new())
        }
    };

    let applied = migrations::apply_pending(&mut snapshot);
    if !applied.is_empty() {
        tracing::info!(?applied, "applied pending migrations");
    }

    let mut engine =
        Engine::with_messages(config, snapshot.store, snapshot.messages).map_err(anyhow::Error::from)?;

    if let Some(replay_path) = &cli.replay {
        let bytes = std::fs::read(replay_path)
            .with_context(|| format!("failed to read replay file {replay_path:?}"))?;
        engine.ingest_bytes(&bytes, chrono::Utc::now());
        for (callsign, station) in &engine.store().stations {
            tracing::info!(
                callsign = %callsign,
                receptions = station.receptions.len(),
                direct = station.heard_direct(),
                "station summary"
            );
        }
    }

    shutdown(&mut engine, &db_path).await?;
    Ok(())
}

/// Bounded graceful shutdown: save the snapshot, capped at 2 seconds so a
/// stuck filesystem can't hang the process indefinitely.
async fn shutdown(engine: &mut Engine, db_path: &std::path::Path) -> Result<()> {
    let snapshot = Snapshot::with_messages(engine.store().clone(), engine.messages().clone());
    let db_path = db_path.to_path_buf();
    let save = tokio::task::spawn_blocking(move || snapshot.save(&db_path));
    match tokio::time::timeout(std::time::Duration::from_secs(2), save).await {
        Ok(Ok(Ok(()))) => tracing::info!("snapshot saved on shutdown"),
        Ok(Ok(Err(err))) => tracing::error!(error = %err, "failed to save snapshot on shutdown"),
        Ok(Err(err)) => tracing::error!(error = %err, "snapshot save task panicked"),
        Err(_) => tracing::error!("snapshot save timed out after 2s"),
    }
    Ok(())
}
