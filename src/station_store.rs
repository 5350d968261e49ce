//! Station tracking (C3): the event-sourced station model. `ReceptionEvent`
//! is the only thing ever stored per-observation; hop counts, direct-heard
//! flags, and digipeater paths are all computed on read.

use crate::aprs_types::{AprsPayload, DeviceInfo, PacketKind, ReceptionEvent, Telemetry, Weather};
use crate::geo::haversine_distance_m;
use crate::zambretti::{self, PressureTrend};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

const WEATHER_RETENTION_AMORTIZE_THRESHOLD: usize = 250;
const WEATHER_RECENT_WINDOW_HOURS: i64 = 1;
const WEATHER_MEDIUM_WINDOW_HOURS: i64 = 24;
const WEATHER_MEDIUM_DECIMATE_MINUTES: i64 = 15;
const WEATHER_OLD_DECIMATE_HOURS: i64 = 1;

const POSITION_HISTORY_MAX: usize = 200;
const POSITION_MOVEMENT_THRESHOLD_MEDIUM_M: f64 = 100.0;
const POSITION_MOVEMENT_THRESHOLD_OLD_M: f64 = 500.0;

const RECEPTIONS_CAP: usize = 200;
const TELEMETRY_SEQUENCE_CAP: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherSample {
    pub timestamp: DateTime<Utc>,
    pub weather: Weather,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSample {
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub callsign: String,
    pub first_heard: DateTime<Utc>,
    pub last_heard: DateTime<Utc>,
    pub receptions: Vec<ReceptionEvent>,
    pub last_position: Option<PositionSample>,
    pub position_history: Vec<PositionSample>,
    pub weather_history: Vec<WeatherSample>,
    pub last_comment: Option<String>,
    pub last_status: Option<String>,
    pub symbol_table: Option<char>,
    pub symbol_code: Option<char>,
    pub is_digipeater: bool,
    pub digipeaters_heard_by: Vec<String>,
    /// Count of non-duplicate receptions (spec §4.3 "counters"); duplicates
    /// still grow `receptions` but never this.
    pub packets_heard: u64,
    /// Messages this station has sent, observed as the `from` side of a
    /// message packet.
    pub messages_sent: u64,
    /// Messages from this station addressed to us specifically.
    pub messages_received: u64,
    /// Hardware/software identity inferred from the destination callsign
    /// (tocall) or Mic-E destination encoding.
    pub device: Option<DeviceInfo>,
    pub last_telemetry: Option<Telemetry>,
    /// Sequence numbers seen on telemetry packets, most recent last, capped
    /// at 20 to bound memory without losing recent-duplicate detection.
    pub telemetry_sequence: Vec<u16>,
}

impl Station {
    fn new(callsign: &str, now: DateTime<Utc>) -> Self {
        Station {
            callsign: callsign.to_string(),
            first_heard: now,
            last_heard: now,
            receptions: Vec::new(),
            last_position: None,
            position_history: Vec::new(),
            weather_history: Vec::new(),
            last_comment: None,
            last_status: None,
            symbol_table: None,
            symbol_code: None,
            is_digipeater: false,
            digipeaters_heard_by: Vec::new(),
            packets_heard: 0,
            messages_sent: 0,
            messages_received: 0,
            device: None,
            last_telemetry: None,
            telemetry_sequence: Vec::new(),
        }
    }

    fn append_reception(&mut self, event: ReceptionEvent) {
        self.receptions.push(event);
        if self.receptions.len() > RECEPTIONS_CAP {
            let overflow = self.receptions.len() - RECEPTIONS_CAP;
            self.receptions.drain(0..overflow);
        }
    }

    /// `min` over direct-RF events of their `hop_count`, else 999 (spec
    /// §4.3 "Aggregates from receptions").
    pub fn hop_count(&self) -> u16 {
        self.receptions
            .iter()
            .filter(|e| e.direct_rf && e.hop_count < 999)
            .map(|e| e.hop_count)
            .min()
            .unwrap_or(999)
    }

    pub fn heard_direct(&self) -> bool {
        self.receptions.iter().any(|e| e.direct_rf)
    }

    pub fn heard_zero_hop(&self) -> bool {
        self.receptions.iter().any(|e| e.direct_rf && e.hop_count == 0)
    }

    pub fn zero_hop_packet_count(&self) -> usize {
        self.receptions
            .iter()
            .filter(|e| e.direct_rf && e.hop_count == 0)
            .count()
    }

    pub fn last_heard_zero_hop(&self) -> Option<DateTime<Utc>> {
        self.receptions
            .iter()
            .filter(|e| e.direct_rf && e.hop_count == 0)
            .map(|e| e.timestamp)
            .max()
    }

    /// Path of the newest direct-RF reception.
    pub fn digipeater_path(&self) -> Option<Vec<String>> {
        self.receptions
            .iter()
            .rev()
            .find(|e| e.direct_rf)
            .map(|e| e.path.clone())
    }

    /// Sorted unique set of iGate callsigns that relayed a packet from this
    /// station.
    pub fn relay_paths(&self) -> Vec<String> {
        let mut calls: Vec<String> = self
            .receptions
            .iter()
            .filter_map(|e| e.relay_call.clone())
            .collect();
        calls.sort();
        calls.dedup();
        calls
    }

    /// Unique digipeater path sequences observed on direct-RF receptions.
    pub fn digipeater_paths(&self) -> Vec<Vec<String>> {
        let mut paths: Vec<Vec<String>> = self
            .receptions
            .iter()
            .filter(|e| e.direct_rf && !e.path.is_empty())
            .map(|e| e.path.clone())
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigipeaterActivity {
    pub timestamp: DateTime<Utc>,
    /// The station that was digipeated, not the digipeater that repeated it.
    pub station_call: String,
    pub path_type: String,
    pub original_path: Vec<String>,
    pub frame_number: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigipeaterStats {
    pub session_start: Option<DateTime<Utc>>,
    pub packets_digipeated: u64,
    pub activities: Vec<DigipeaterActivity>,
    pub top_stations: HashMap<String, u64>,
    pub path_usage: HashMap<String, u64>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StationStore {
    pub stations: HashMap<String, Station>,
    pub digipeater_stats: DigipeaterStats,
}

/// The outcome of observing one packet: whether it was new or a duplicate,
/// and what got decoded from it.
pub struct ObservationOutcome {
    pub is_duplicate: bool,
    pub payload: Option<AprsPayload>,
}

impl StationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn station(&self, callsign: &str) -> Option<&Station> {
        self.stations.get(callsign)
    }

    fn get_or_create(&mut self, callsign: &str, now: DateTime<Utc>) -> &mut Station {
        self.stations
            .entry(callsign.to_string())
            .or_insert_with(|| Station::new(callsign, now))
    }

    /// Records ground truth for one packet reception: always appends a
    /// `ReceptionEvent` (a lightweight one for duplicates, without
    /// re-parsing the payload), and for non-duplicates updates the
    /// station's decoded state (position/weather/comment history).
    ///
    /// `relay_call` is `Some(igate_callsign)` when this packet arrived
    /// wrapped in a third-party packet (spec §4.2 "Third-party"); in that
    /// case `direct_rf` is false and `hop_count` is the 999 unknown/igated
    /// sentinel regardless of `path`.
    pub fn observe_packet(
        &mut self,
        source_callsign: &str,
        path: &[String],
        relay_call: Option<&str>,
        payload: Option<AprsPayload>,
        is_duplicate: bool,
        now: DateTime<Utc>,
        tocall: Option<&str>,
        frame_number: Option<u64>,
    ) -> ObservationOutcome {
        let direct_rf = relay_call.is_none();
        let hop_count: u16 = if direct_rf {
            path.iter().filter(|p| p.ends_with('*')).count() as u16
        } else {
            999
        };
        let packet_type = payload.as_ref().map(|p| p.kind()).unwrap_or(PacketKind::Unknown);
        let station = self.get_or_create(source_callsign, now);
        station.last_heard = now;

        station.append_reception(ReceptionEvent {
            timestamp: now,
            path: path.to_vec(),
            hop_count,
            direct_rf,
            relay_call: relay_call.map(|s| s.to_string()),
            is_duplicate,
            packet_type,
            frame_number,
        });

        if !is_duplicate {
            station.packets_heard += 1;
            if station.device.is_none() {
                if let Some(tocall) = tocall {
                    station.device = crate::device_id::identify_by_tocall(tocall);
                }
            }
            if let Some(payload) = &payload {
                apply_payload(station, payload, now);
            }
        }

        if relay_call.is_none() {
            if let Some(first_hop) = path.iter().find(|p| p.ends_with('*')) {
                let digi = first_hop.trim_end_matches('*').to_string();
                if !station.digipeaters_heard_by.contains(&digi) {
                    station.digipeaters_heard_by.push(digi);
                }
            }
        }

        // Every path callsign that already has an entry in the store gets
        // flagged as a digipeater; never creates a phantom entry for one
        // that hasn't been heard in its own right (spec §4.3 step 4).
        for hop in path {
            let call = hop.trim_end_matches('*');
            if call == source_callsign {
                continue;
            }
            if let Some(digi_station) = self.stations.get_mut(call) {
                digi_station.is_digipeater = true;
            }
        }

        if !is_duplicate && direct_rf && !path.is_empty() {
            self.record_digipeater_activity(source_callsign, path, now, frame_number);
        }

        debug!(station = source_callsign, duplicate = is_duplicate, "packet observed");

        ObservationOutcome { is_duplicate, payload }
    }

    /// Records one digipeater activity event per digipeated packet (not per
    /// path hop), then recomputes the aggregate stats from the retained
    /// activity log.
    fn record_digipeater_activity(
        &mut self,
        station_call: &str,
        path: &[String],
        now: DateTime<Utc>,
        frame_number: Option<u64>,
    ) {
        if self.digipeater_stats.session_start.is_none() {
            self.digipeater_stats.session_start = Some(now);
        }
        self.digipeater_stats.packets_digipeated += 1;

        let path_type = classify_path_type(path);
        self.digipeater_stats.activities.push(DigipeaterActivity {
            timestamp: now,
            station_call: station_call.to_string(),
            path_type,
            original_path: path.to_vec(),
            frame_number,
        });

        recompute_digipeater_aggregates(&mut self.digipeater_stats);
    }

    /// Builds a 7 (day-of-week) x 24 (hour) activity heatmap across all
    /// receptions of all stations, bucketed in local time as observed by
    /// the engine's configured timezone offset (hours from UTC).
    pub fn network_heatmap(&self, utc_offset_hours: i64) -> [[u64; 24]; 7] {
        let mut heatmap = [[0u64; 24]; 7];
        for station in self.stations.values() {
            for event in &station.receptions {
                let local = event.timestamp + Duration::hours(utc_offset_hours);
                let weekday = local.format("%u").to_string().parse::<usize>().unwrap_or(1) - 1;
                let hour = local.format("%H").to_string().parse::<usize>().unwrap_or(0);
                heatmap[weekday.min(6)][hour.min(23)] += 1;
            }
        }
        heatmap
    }

    /// Maps each digipeater to the distinct source stations it has relayed.
    pub fn digipeater_coverage(&self) -> HashMap<String, Vec<String>> {
        let mut coverage: HashMap<String, Vec<String>> = HashMap::new();
        for station in self.stations.values() {
            for event in &station.receptions {
                for hop in &event.path {
                    if !hop.ends_with('*') {
                        continue;
                    }
                    let digi = hop.trim_end_matches('*').to_string();
                    let entry = coverage.entry(digi).or_default();
                    if !entry.contains(&station.callsign) {
                        entry.push(station.callsign.clone());
                    }
                }
            }
        }
        coverage
    }

    /// Credits a station's `messages_received` counter: called by the
    /// caller once it knows (via the message tracker) that a message from
    /// this station was addressed to us, since `StationStore` itself has no
    /// notion of "our" callsign.
    pub fn record_message_received(&mut self, callsign: &str) {
        if let Some(station) = self.stations.get_mut(callsign) {
            station.messages_received += 1;
        }
    }

    /// Removes a station entirely (administrative command, not part of
    /// normal retention).
    pub fn clear_station(&mut self, callsign: &str) -> bool {
        self.stations.remove(callsign).is_some()
    }

    /// Drops stations not heard within `max_age`. Returns the number
    /// removed.
    pub fn prune_stale(&mut self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let cutoff = now - max_age;
        let before = self.stations.len();
        self.stations.retain(|_, s| s.last_heard >= cutoff);
        before - self.stations.len()
    }
}

const PATH_ALIAS_PREFIXES: [&str; 5] = ["WIDE", "RELAY", "TRACE", "TEMP", "LOCAL"];

/// Classifies a digipeater path's routing pattern (spec §4.3 "Path
/// classification") by extracting alias hops (WIDE/RELAY/TRACE/TEMP/LOCAL)
/// and ignoring specific digipeater callsigns, independent of which station
/// we are.
pub fn classify_path_type(path: &[String]) -> String {
    if path.is_empty() {
        return "Direct".to_string();
    }

    let aliases: Vec<String> = path
        .iter()
        .map(|hop| hop.trim_end_matches('*').to_uppercase())
        .filter(|hop| PATH_ALIAS_PREFIXES.iter().any(|prefix| hop.starts_with(prefix)))
        .collect();

    match aliases.len() {
        0 => "Via Digipeater".to_string(),
        1 => aliases[0].clone(),
        2..=3 => aliases.join(","),
        n => format!("{},{}+{}", aliases[0], aliases[1], n - 2),
    }
}

/// Three-tier time decimation for the digipeater activity log, run only once
/// it exceeds the amortize threshold: last hour kept in full, 1h-24h old
/// thinned to one sample per 15 minutes, older than 24h thinned to one per
/// hour. `top_stations`/`path_usage` are then rebuilt from scratch over
/// whatever activities remain.
pub(crate) fn recompute_digipeater_aggregates(stats: &mut DigipeaterStats) {
    let now = match stats.activities.last() {
        Some(a) => a.timestamp,
        None => return,
    };

    stats.activities.sort_by_key(|a| std::cmp::Reverse(a.timestamp));

    if stats.activities.len() > WEATHER_RETENTION_AMORTIZE_THRESHOLD {
        let recent_cutoff = now - Duration::hours(WEATHER_RECENT_WINDOW_HOURS);
        let medium_cutoff = now - Duration::hours(WEATHER_MEDIUM_WINDOW_HOURS);

        let mut retained = Vec::new();
        let mut last_15min: Option<DateTime<Utc>> = None;
        let mut last_hour: Option<DateTime<Utc>> = None;

        for activity in stats.activities.drain(..) {
            if activity.timestamp >= recent_cutoff {
                retained.push(activity);
            } else if activity.timestamp >= medium_cutoff {
                let keep = match last_15min {
                    Some(t) => t - activity.timestamp >= Duration::minutes(WEATHER_MEDIUM_DECIMATE_MINUTES),
                    None => true,
                };
                if keep {
                    last_15min = Some(activity.timestamp);
                    retained.push(activity);
                }
            } else {
                let keep = match last_hour {
                    Some(t) => t - activity.timestamp >= Duration::hours(WEATHER_OLD_DECIMATE_HOURS),
                    None => true,
                };
                if keep {
                    last_hour = Some(activity.timestamp);
                    retained.push(activity);
                }
            }
        }
        stats.activities = retained;
    }

    let mut top_stations: HashMap<String, u64> = HashMap::new();
    let mut path_usage: HashMap<String, u64> = HashMap::new();
    for activity in &stats.activities {
        *top_stations.entry(activity.station_call.clone()).or_insert(0) += 1;
        *path_usage.entry(activity.path_type.clone()).or_insert(0) += 1;
    }
    stats.top_stations = top_stations;
    stats.path_usage = path_usage;
}

fn apply_payload(station: &mut Station, payload: &AprsPayload, now: DateTime<Utc>) {
    match payload {
        AprsPayload::Position(pos) => {
            station.symbol_table = Some(pos.symbol_table);
            station.symbol_code = Some(pos.symbol_code);
            station.last_comment = Some(pos.comment.clone());
            if station.device.is_none() {
                station.device = pos.device.clone();
            }
            let sample = PositionSample {
                timestamp: now,
                lat: pos.coord.lat,
                lon: pos.coord.lon,
            };
            station.last_position = Some(sample.clone());
            add_position_to_history(station, sample);
            if let Some(weather) = &pos.weather {
                add_weather_to_history(station, weather.clone(), now);
            }
        }
        AprsPayload::Weather(weather) => {
            add_weather_to_history(station, weather.clone(), now);
        }
        AprsPayload::Status(status) => {
            station.last_status = Some(status.text.clone());
        }
        AprsPayload::Telemetry(telemetry) => {
            if !station.telemetry_sequence.contains(&telemetry.sequence) {
                station.telemetry_sequence.push(telemetry.sequence);
                if station.telemetry_sequence.len() > TELEMETRY_SEQUENCE_CAP {
                    let overflow = station.telemetry_sequence.len() - TELEMETRY_SEQUENCE_CAP;
                    station.telemetry_sequence.drain(0..overflow);
                }
            }
            station.last_telemetry = Some(telemetry.clone());
        }
        AprsPayload::Message(_) => {
            station.messages_sent += 1;
        }
        AprsPayload::Object(obj) => {
            station.symbol_table = Some(obj.position.symbol_table);
            station.symbol_code = Some(obj.position.symbol_code);
            station.last_comment = Some(obj.position.comment.clone());
        }
        AprsPayload::Item(item) => {
            station.symbol_table = Some(item.position.symbol_table);
            station.symbol_code = Some(item.position.symbol_code);
            station.last_comment = Some(item.position.comment.clone());
        }
        AprsPayload::ThirdParty { .. } | AprsPayload::Unknown(_) => {}
    }
}

fn add_position_to_history(station: &mut Station, sample: PositionSample) {
    station.position_history.push(sample);
    if station.position_history.len() > WEATHER_RETENTION_AMORTIZE_THRESHOLD {
        prune_position_history(station);
    }
}

/// Movement-aware three-tier decimation, applied only once history exceeds
/// the amortize threshold: recent history kept in full; 1h-24h old kept if
/// it's moved more than 100m from the last kept sample OR 15 minutes have
/// passed; older than 24h needs 500m OR 1 hour. Capped at 200 after
/// pruning.
fn prune_position_history(station: &mut Station) {
    let now = match station.position_history.last() {
        Some(s) => s.timestamp,
        None => return,
    };
    let recent_cutoff = now - Duration::hours(WEATHER_RECENT_WINDOW_HOURS);
    let medium_cutoff = now - Duration::hours(WEATHER_MEDIUM_WINDOW_HOURS);

    let mut kept: Vec<PositionSample> = Vec::new();
    for sample in station.position_history.drain(..) {
        if sample.timestamp >= recent_cutoff {
            kept.push(sample);
            continue;
        }
        let (min_gap, min_distance_m) = if sample.timestamp >= medium_cutoff {
            (Duration::minutes(WEATHER_MEDIUM_DECIMATE_MINUTES), POSITION_MOVEMENT_THRESHOLD_MEDIUM_M)
        } else {
            (Duration::hours(WEATHER_OLD_DECIMATE_HOURS), POSITION_MOVEMENT_THRESHOLD_OLD_M)
        };
        let keep = match kept.last() {
            Some(last) => {
                sample.timestamp - last.timestamp >= min_gap
                    || haversine_distance_m((last.lat, last.lon), (sample.lat, sample.lon)) > min_distance_m
            }
            None => true,
        };
        if keep {
            kept.push(sample);
        }
    }
    if kept.len() > POSITION_HISTORY_MAX {
        let overflow = kept.len() - POSITION_HISTORY_MAX;
        kept.drain(0..overflow);
    }
    station.position_history = kept;
}

fn add_weather_to_history(station: &mut Station, mut weather: Weather, now: DateTime<Utc>) {
    let three_hours_ago = now - Duration::hours(3);
    let closest = station
        .weather_history
        .iter()
        .min_by_key(|s| (s.timestamp - three_hours_ago).num_seconds().abs())
        .filter(|s| (s.timestamp - three_hours_ago).num_seconds().abs() <= Duration::minutes(30).num_seconds());
    if let Some(closest) = closest {
        if let (Some(then), Some(current)) = (closest.weather.pressure_mb, weather.pressure_mb) {
            let trend = if current > then + 0.5 {
                PressureTrend::Rising
            } else if current < then - 0.5 {
                PressureTrend::Falling
            } else {
                PressureTrend::Steady
            };
            weather.pressure_tendency = Some(trend);
            weather.pressure_change_3h = Some(current - then);

            let forecast = zambretti::calculate_zambretti_code(
                current,
                trend,
                weather.wind_direction_deg,
                now,
                true,
            );
            debug!(station = %station.callsign, forecast = forecast.text, "zambretti computed");
        }
    }
    station.weather_history.push(WeatherSample { timestamp: now, weather });

    if station.weather_history.len() > WEATHER_RETENTION_AMORTIZE_THRESHOLD {
        prune_weather_history(station, now);
    }
}

fn prune_weather_history(station: &mut Station, now: DateTime<Utc>) {
    let recent_cutoff = now - Duration::hours(WEATHER_RECENT_WINDOW_HOURS);
    let medium_cutoff = now - Duration::hours(WEATHER_MEDIUM_WINDOW_HOURS);

    let mut kept = Vec::new();
    let mut last_kept_time: Option<DateTime<Utc>> = None;
    for sample in station.weather_history.drain(..) {
        if sample.timestamp >= recent_cutoff {
            kept.push(sample);
            continue;
        }
        let min_gap = if sample.timestamp >= medium_cutoff {
            Duration::minutes(WEATHER_MEDIUM_DECIMATE_MINUTES)
        } else {
            Duration::hours(WEATHER_OLD_DECIMATE_HOURS)
        };
        let keep = match last_kept_time {
            Some(t) => sample.timestamp - t >= min_gap,
            None => true,
        };
        if keep {
            last_kept_time = Some(sample.timestamp);
            kept.push(sample);
        }
    }
    station.weather_history = kept;
}
