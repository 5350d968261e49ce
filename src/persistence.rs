//! Snapshot persistence (C8): gzip-compressed JSON, written atomically
//! (`.tmp` + fsync + rename), with legacy uncompressed-JSON read support.

use crate::error::EngineError;
use crate::message_tracker::MessageTracker;
use crate::station_store::StationStore;
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{info, warn};

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub store: StationStore,
    #[serde(default)]
    pub messages: MessageTracker,
    pub applied_migrations: BTreeSet<String>,
}

impl Snapshot {
    pub fn new(store: StationStore) -> Self {
        Snapshot {
            schema_version: SCHEMA_VERSION,
            store,
            messages: MessageTracker::default(),
            applied_migrations: BTreeSet::new(),
        }
    }

    pub fn with_messages(store: StationStore, messages: MessageTracker) -> Self {
        Snapshot {
            schema_version: SCHEMA_VERSION,
            store,
            messages,
            applied_migrations: BTreeSet::new(),
        }
    }

    /// Writes the snapshot atomically: serialize to gzip-compressed JSON,
    /// write to `<path>.tmp`, fsync, then rename over `path`. Refuses (and
    /// logs) if the target directory isn't writable.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        if let Err(err) = std::fs::metadata(dir) {
            return Err(EngineError::Persistence(format!(
                "snapshot directory {dir:?} not accessible: {err}"
            ))
            .into());
        }

        let json = serde_json::to_vec(self).context("failed to serialize snapshot to JSON")?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json).context("failed to gzip snapshot")?;
        let compressed = encoder.finish().context("failed to finish gzip stream")?;

        let tmp_path = path.with_extension("db.tmp");
        let mut file = std::fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create {tmp_path:?}"))?;
        file.write_all(&compressed)
            .with_context(|| format!("failed to write {tmp_path:?}"))?;
        file.sync_all()
            .with_context(|| format!("failed to fsync {tmp_path:?}"))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename {tmp_path:?} to {path:?}"))?;

        info!(path = %path.display(), bytes = compressed.len(), "snapshot saved");
        Ok(())
    }

    /// Loads a snapshot, trying gzip first and falling back to legacy
    /// uncompressed JSON. After loading, re-parses any pressure fields
    /// that were stored in stale units (a historical bug fixed upstream).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).with_context(|| format!("failed to read {path:?}"))?;
        let json = match Self::try_gunzip(&raw) {
            Some(json) => json,
            None => {
                warn!(path = %path.display(), "snapshot not gzip-compressed, trying legacy plain JSON");
                raw
            }
        };
        let mut snapshot: Snapshot =
            serde_json::from_slice(&json).context("failed to deserialize snapshot JSON")?;
        snapshot.repair_pressure_units();
        Ok(snapshot)
    }

    fn try_gunzip(raw: &[u8]) -> Option<Vec<u8>> {
        let mut decoder = GzDecoder::new(raw);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).ok()?;
        Some(out)
    }

    /// Spec §4.8 "Pressure-migration on load": if a weather sample's
    /// `pressure_mb` falls outside the plausible 900..1100 mb range,
    /// attempt to re-derive it from the stored raw info field using the
    /// same tenths-of-mb/hundredths-of-inHg auto-detection as the live
    /// parser (§4.2 `b\d{5}`).
    fn repair_pressure_units(&mut self) {
        for station in self.store.stations.values_mut() {
            for sample in station.weather_history.iter_mut() {
                let plausible = sample
                    .weather
                    .pressure_mb
                    .is_some_and(|p| (900.0..=1100.0).contains(&p));
                if plausible {
                    continue;
                }
                let Some(raw) = &sample.weather.raw_info else {
                    continue;
                };
                let re_parsed = crate::aprs_parser::extract_weather_fields(raw).pressure_mb;
                sample.weather.pressure_mb = re_parsed.filter(|p| (900.0..=1100.0).contains(p));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stations.db");
        let snapshot = Snapshot::new(StationStore::new());
        snapshot.save(&path).unwrap();
        let loaded = Snapshot::load(&path).unwrap();
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn load_falls_back_to_legacy_uncompressed_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        let snapshot = Snapshot::new(StationStore::new());
        let json = serde_json::to_vec(&snapshot).unwrap();
        std::fs::write(&path, json).unwrap();
        let loaded = Snapshot::load(&path).unwrap();
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn save_fails_when_directory_missing() {
        let snapshot = Snapshot::new(StationStore::new());
        let bad_path = Path::new("/nonexistent-directory-xyz/stations.db");
        assert!(snapshot.save(bad_path).is_err());
    }

    #[test]
    fn repair_pressure_units_reparses_out_of_range_reading_from_raw_info() {
        use crate::station_store::WeatherSample;
        use chrono::Utc;

        let mut store = StationStore::new();
        store.observe_packet("K1FSY-9", &[], None, None, false, Utc::now(), None, None);
        {
            let station = store.stations.get_mut("K1FSY-9").unwrap();
            station.weather_history.push(WeatherSample {
                timestamp: Utc::now(),
                weather: crate::aprs_types::Weather {
                    pressure_mb: Some(297.9), // mis-stored tenths-of-mb read of a b02979 field
                    raw_info: Some("_180/010g015t072b02979".to_string()),
                    ..Default::default()
                },
            });
        }
        let mut snapshot = Snapshot::new(store);
        snapshot.repair_pressure_units();
        let station = snapshot.store.stations.get("K1FSY-9").unwrap();
        let repaired = station.weather_history[0].weather.pressure_mb.unwrap();
        assert!((repaired - 1008.5).abs() < 0.5, "expected ~1008.5 mb, got {repaired}");
    }
}
