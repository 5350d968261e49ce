//! Schema migrations (C10): idempotent, identified by id, applied ids
//! tracked in the snapshot so a migration never re-runs once recorded.

use crate::persistence::Snapshot;
use crate::station_store::{classify_path_type, recompute_digipeater_aggregates, DigipeaterActivity, DigipeaterStats};
use tracing::info;

pub struct Migration {
    pub id: &'static str,
    pub description: &'static str,
    pub run: fn(&mut Snapshot),
}

/// In the event-sourced model there is no stored zero-hop count left to
/// fix; the bug this historically addressed (stations double-tagged as
/// both igated and zero-hop) can't recur because those fields are computed
/// from `receptions`, not stored. Kept as a no-op so its id can be marked
/// applied and never re-attempted.
fn m001_zero_hop_counts(_snapshot: &mut Snapshot) {}

/// Clears stale zero-hop markers left by a historical bug where a station
/// could be recorded as both igated (carries a `relay_call`) and zero-hop
/// (`direct_rf = true, hop_count = 0`) from dual-tagging a single
/// reception. Spec invariant: a reception with a non-empty `relay_call`
/// must have `direct_rf = false` and contributes nothing to `heard_zero_hop`
/// or `hop_count`. Any pre-existing malformed events are corrected in place.
fn m002_clear_igated_zero_hop(snapshot: &mut Snapshot) {
    let mut fixed = 0;
    for station in snapshot.store.stations.values_mut() {
        for event in station.receptions.iter_mut() {
            if event.relay_call.is_some() && event.direct_rf {
                event.direct_rf = false;
                event.hop_count = 999;
                fixed += 1;
            }
        }
    }
    info!(fixed, "m002: cleared stale direct_rf/hop_count on igated receptions");
}

/// Companion to m002: the same historical confusion left stale
/// `is_digipeater` markers on stations that were never actually heard
/// repeating a frame. Rebuilds the flag from scratch by checking whether
/// any other station's receptions list this station as a first-hop
/// digipeater.
fn m003_rebuild_is_digipeater(snapshot: &mut Snapshot) {
    let mut digipeater_calls = std::collections::HashSet::new();
    for station in snapshot.store.stations.values() {
        for event in &station.receptions {
            if !event.direct_rf {
                continue;
            }
            if let Some(first_hop) = event.path.first() {
                if first_hop.ends_with('*') {
                    digipeater_calls.insert(first_hop.trim_end_matches('*').to_string());
                }
            }
        }
    }
    for (callsign, station) in snapshot.store.stations.iter_mut() {
        station.is_digipeater = digipeater_calls.contains(callsign);
    }
    info!(count = digipeater_calls.len(), "m003: rebuilt is_digipeater flags");
}

/// Clears and rebuilds each station's `digipeaters_heard_by` by rescanning
/// `receptions` for direct-RF packets whose first path hop is marked
/// heard ("*").
fn m004_rebuild_digipeaters_heard_by(snapshot: &mut Snapshot) {
    for station in snapshot.store.stations.values_mut() {
        station.digipeaters_heard_by.clear();
        for event in &station.receptions {
            if !event.direct_rf {
                continue;
            }
            if let Some(first_hop) = event.path.first() {
                if first_hop.ends_with('*') {
                    let digi = first_hop.trim_end_matches('*').to_string();
                    if !station.digipeaters_heard_by.contains(&digi) {
                        station.digipeaters_heard_by.push(digi);
                    }
                }
            }
        }
    }
    info!("m004: rebuilt digipeaters_heard_by for all stations");
}

/// Rescans all stations' receptions for digipeated packets and rebuilds
/// the network-wide `DigipeaterStats` aggregate from scratch: one activity
/// per digipeated packet, keyed by the station that was digipeated, then
/// the same three-tier time decimation and aggregate recompute the live
/// path applies.
fn m005_rebuild_digipeater_stats(snapshot: &mut Snapshot) {
    let mut activities = Vec::new();
    let mut packets_digipeated: u64 = 0;

    for station in snapshot.store.stations.values() {
        for event in &station.receptions {
            if !event.direct_rf || event.path.is_empty() {
                continue;
            }
            packets_digipeated += 1;
            let path_type = classify_path_type(&event.path);
            activities.push(DigipeaterActivity {
                timestamp: event.timestamp,
                station_call: station.callsign.clone(),
                path_type,
                original_path: event.path.clone(),
                frame_number: event.frame_number,
            });
        }
    }

    activities.sort_by_key(|a| a.timestamp);
    let session_start = activities.first().map(|a| a.timestamp);

    let mut stats = DigipeaterStats {
        session_start,
        packets_digipeated,
        activities,
        top_stations: std::collections::HashMap::new(),
        path_usage: std::collections::HashMap::new(),
    };
    recompute_digipeater_aggregates(&mut stats);
    snapshot.store.digipeater_stats = stats;

    info!(
        count = snapshot.store.digipeater_stats.packets_digipeated,
        "m005: rebuilt network-wide digipeater stats"
    );
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        id: "m001_zero_hop_counts",
        description: "no-op under the event-sourced station model",
        run: m001_zero_hop_counts,
    },
    Migration {
        id: "m002_clear_igated_zero_hop",
        description: "clear stale direct_rf flags on digipeated receptions",
        run: m002_clear_igated_zero_hop,
    },
    Migration {
        id: "m003_rebuild_is_digipeater",
        description: "rebuild is_digipeater flags from receptions",
        run: m003_rebuild_is_digipeater,
    },
    Migration {
        id: "m004_rebuild_digipeaters_heard_by",
        description: "rebuild digipeaters_heard_by from receptions",
        run: m004_rebuild_digipeaters_heard_by,
    },
    Migration {
        id: "m005_rebuild_digipeater_stats",
        description: "rebuild network-wide digipeater stats from receptions",
        run: m005_rebuild_digipeater_stats,
    },
];

/// Applies every migration not yet recorded in the snapshot's
/// `applied_migrations` set, in registry order.
pub fn apply_pending(snapshot: &mut Snapshot) -> Vec<&'static str> {
    let mut applied = Vec::new();
    for migration in MIGRATIONS {
        if snapshot.applied_migrations.contains(migration.id) {
            continue;
        }
        info!(id = migration.id, description = migration.description, "applying migration");
        (migration.run)(snapshot);
        snapshot.applied_migrations.insert(migration.id.to_string());
        applied.push(migration.id);
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station_store::StationStore;

    #[test]
    fn applies_all_migrations_once() {
        let mut snapshot = Snapshot::new(StationStore::new());
        let applied = apply_pending(&mut snapshot);
        assert_eq!(applied.len(), MIGRATIONS.len());
        let second_pass = apply_pending(&mut snapshot);
        assert!(second_pass.is_empty());
    }

    #[test]
    fn m002_clears_dual_tagged_receptions() {
        use crate::aprs_types::ReceptionEvent;
        use chrono::Utc;

        let mut store = StationStore::new();
        store.observe_packet("K1FSY-9", &[], None, None, false, Utc::now(), None, None);
        {
            let station = store.stations.get_mut("K1FSY-9").unwrap();
            station.receptions.push(ReceptionEvent {
                timestamp: Utc::now(),
                path: vec![],
                hop_count: 0,
                direct_rf: true, // malformed: should never co-occur with a relay_call
                relay_call: Some("CWOP1".to_string()),
                is_duplicate: false,
                packet_type: crate::aprs_types::PacketKind::Position,
                frame_number: None,
            });
        }
        let mut snapshot = Snapshot::new(store);
        m002_clear_igated_zero_hop(&mut snapshot);
        let station = snapshot.store.stations.get("K1FSY-9").unwrap();
        assert!(station.receptions.iter().all(|e| !(e.direct_rf && e.relay_call.is_some())));
    }
}
