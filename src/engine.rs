//! Wiring (C9): ties the codec, parser, dedupe, station store, message
//! tracker, and beacon scheduler together into one ingress/egress pipeline.
//! The actual transport (serial/BLE/TCP-KISS) is out of scope; `Transport`
//! is the seam a caller plugs a real driver into.

use crate::ax25;
use crate::aprs_parser;
use crate::aprs_types::AprsPayload;
use crate::beacon::BeaconScheduler;
use crate::callsign::Callsign;
use crate::config::EngineConfig;
use crate::dedupe::DuplicateDetector;
use crate::error::EngineError;
use crate::kiss::KissDecoder;
use crate::message_tracker::{DispatchOutcome, MessageTracker, RetryConfig};
use crate::station_store::StationStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// A pluggable byte transport. Implementations own the actual KISS link
/// (TNC over serial, a TCP-KISS socket, etc).
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, bytes: Vec<u8>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
    fn recv<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;
}

pub type BoxedTransport = Arc<dyn Transport>;

/// A single GPS fix, as read from an external GPS source (spec §6 "External
/// Interfaces", GPS pull contract).
#[derive(Debug, Clone, Copy)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
}

/// Pull-model seam for a GPS receiver. Implementations own the actual
/// device (serial NMEA, gpsd socket, etc), matching `Transport`'s idiom of
/// keeping the driver outside the core engine.
pub trait GpsSource: Send + Sync {
    fn poll<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<GpsFix>> + Send + 'a>>;
}

/// Polls a `GpsSource` on the caller's schedule, tracking consecutive
/// failures. Spec §6: three consecutive failed polls should signal the
/// caller to restart the GPS link rather than silently beaconing stale
/// fixes forever.
pub struct GpsPoller {
    source: Arc<dyn GpsSource>,
    last_fix: Option<GpsFix>,
    consecutive_failures: u32,
}

impl GpsPoller {
    pub fn new(source: Arc<dyn GpsSource>) -> Self {
        GpsPoller { source, last_fix: None, consecutive_failures: 0 }
    }

    pub fn last_fix(&self) -> Option<GpsFix> {
        self.last_fix
    }

    /// Polls once. Returns `true` if three consecutive polls have now
    /// failed, meaning the caller should restart the underlying GPS link.
    pub async fn poll_once(&mut self) -> bool {
        match self.source.poll().await {
            Ok(fix) => {
                self.last_fix = Some(fix);
                self.consecutive_failures = 0;
                false
            }
            Err(err) => {
                self.consecutive_failures += 1;
                warn!(error = %err, failures = self.consecutive_failures, "GPS poll failed");
                self.consecutive_failures >= 3
            }
        }
    }
}

/// A single reading from a personal weather station (spec §6 "External
/// Interfaces", PWS push/pull contract). `pressure_mb` is the station's
/// own uncorrected reading; sea-level correction happens when a beacon is
/// built, using the configured station altitude.
#[derive(Debug, Clone, Copy, Default)]
pub struct PwsSample {
    pub wind_direction_deg: Option<u16>,
    pub wind_speed_mph: Option<f64>,
    pub wind_gust_mph: Option<f64>,
    pub temperature_f: Option<f64>,
    pub rain_1h_in: Option<f64>,
    pub rain_24h_in: Option<f64>,
    pub rain_since_midnight_in: Option<f64>,
    pub humidity_pct: Option<u8>,
    pub pressure_mb: Option<f64>,
}

/// Pull-model seam for a PWS. `Transport`-style: the driver is external,
/// the engine only consumes readings.
pub trait PwsSource: Send + Sync {
    fn poll<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<PwsSample>> + Send + 'a>>;
}

/// Bounded history of PWS samples (capacity 120, spec §6) plus a
/// circular-mean wind averager, producing the `Weather` used to build an
/// outbound weather beacon.
pub struct WxPoller {
    source: Arc<dyn PwsSource>,
    wind: crate::beacon::WindAverager,
    latest: Option<PwsSample>,
    altitude_m: Option<f64>,
}

impl WxPoller {
    const SAMPLE_HISTORY_CAPACITY: usize = 120;

    pub fn new(source: Arc<dyn PwsSource>, altitude_m: Option<f64>) -> Self {
        WxPoller {
            source,
            wind: crate::beacon::WindAverager::new(Self::SAMPLE_HISTORY_CAPACITY),
            latest: None,
            altitude_m,
        }
    }

    pub async fn poll_once(&mut self) -> Result<()> {
        let sample = self.source.poll().await?;
        if let (Some(dir), Some(speed)) = (sample.wind_direction_deg, sample.wind_speed_mph) {
            self.wind.push(dir as f64, speed, sample.wind_gust_mph.unwrap_or(speed));
        }
        self.latest = Some(sample);
        Ok(())
    }

    /// Builds the `Weather` to encode into the next beacon: the latest
    /// sample's non-wind fields, with wind replaced by the averager's
    /// circular mean when `average_wind` is set, and pressure corrected to
    /// sea level when a station altitude is configured.
    pub fn build_weather(&self, average_wind: bool) -> Option<crate::aprs_types::Weather> {
        let sample = self.latest?;
        let (wind_direction_deg, wind_speed_mph, wind_gust_mph) = if average_wind {
            match self.wind.mean() {
                Some((dir, speed)) => (Some(dir.round() as u16), Some(speed), self.wind.gust_peak()),
                None => (sample.wind_direction_deg, sample.wind_speed_mph, sample.wind_gust_mph),
            }
        } else {
            (sample.wind_direction_deg, sample.wind_speed_mph, sample.wind_gust_mph)
        };

        let sea_level_pressure_mb = match (sample.pressure_mb, self.altitude_m, sample.temperature_f) {
            (Some(station_mb), Some(altitude_m), Some(temp_f)) => {
                Some(crate::geo::sea_level_pressure_mb(station_mb, altitude_m, temp_f))
            }
            _ => None,
        };
        let pressure_mb = sea_level_pressure_mb.or(sample.pressure_mb);

        Some(crate::aprs_types::Weather {
            wind_direction_deg,
            wind_speed_mph,
            wind_gust_mph,
            temperature_f: sample.temperature_f,
            rain_1h_in: sample.rain_1h_in,
            rain_24h_in: sample.rain_24h_in,
            rain_since_midnight_in: sample.rain_since_midnight_in,
            humidity_pct: sample.humidity_pct,
            pressure_mb,
            dew_point_f: match sample.temperature_f.zip(sample.humidity_pct) {
                Some((temp_f, humidity_pct)) => Some(crate::geo::dew_point_f(temp_f, humidity_pct as f64)),
                None => None,
            },
            sea_level_pressure_mb,
            pressure_tendency: None,
            pressure_change_3h: None,
            raw_info: None,
        })
    }
}

/// Observer callback invoked for each fully processed inbound packet.
/// Matches the teacher's `Arc<dyn Trait>` pluggable-processor idiom
/// (`aprs_client.rs::MessageProcessor`).
pub trait PacketObserver: Send + Sync {
    fn on_packet(&self, source: &str, path: &[String], payload: &Option<AprsPayload>, is_duplicate: bool);
}

/// A sent-but-not-yet-acked message queued to transmit on the caller's next
/// opportunity.
#[derive(Debug, Clone)]
pub struct PendingAck {
    pub to_call: String,
    pub message_id: String,
}

pub struct Engine {
    config: EngineConfig,
    decoder: KissDecoder,
    dedupe: DuplicateDetector,
    store: StationStore,
    messages: MessageTracker,
    beacon: BeaconScheduler,
    observer: Option<Arc<dyn PacketObserver>>,
    frame_counter: u64,
    /// `AUTO_ACK`: acks owed to senders of messages delivered to us this
    /// tick, drained by the caller and sent via `send_ack`.
    pending_acks: Vec<PendingAck>,
    /// `DIGIPEATER`: fully-built KISS frames repeating a heard frame whose
    /// next path hop matched our callsign or alias, drained by the caller
    /// and handed straight to the transport.
    pending_digipeats: Vec<Vec<u8>>,
}

impl Engine {
    pub fn new(config: EngineConfig, store: StationStore) -> Result<Self, EngineError> {
        Self::with_messages(config, store, MessageTracker::default())
    }

    /// Like `new`, but seeded with a message tracker restored from a
    /// snapshot (its `my_callsign`/retry config are rehydrated from
    /// `config`, since those aren't persisted).
    pub fn with_messages(
        config: EngineConfig,
        store: StationStore,
        mut messages: MessageTracker,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        messages.rehydrate(
            &config.my_callsign,
            RetryConfig {
                max_retries: config.max_retries,
                retry_fast_seconds: config.retry_fast_seconds,
                retry_slow_seconds: config.retry_slow_seconds,
            },
        );
        let beacon = BeaconScheduler::new(crate::beacon::BeaconConfig {
            interval: chrono::Duration::seconds(config.beacon_interval_seconds),
            symbol_table: config.symbol_table,
            symbol_code: config.symbol_code,
        });
        Ok(Engine {
            config,
            decoder: KissDecoder::new(),
            dedupe: DuplicateDetector::new(),
            store,
            messages,
            beacon,
            observer: None,
            frame_counter: 0,
            pending_acks: Vec::new(),
            pending_digipeats: Vec::new(),
        })
    }

    pub fn set_observer(&mut self, observer: Arc<dyn PacketObserver>) {
        self.observer = Some(observer);
    }

    pub fn store(&self) -> &StationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut StationStore {
        &mut self.store
    }

    pub fn messages(&self) -> &MessageTracker {
        &self.messages
    }

    pub fn messages_mut(&mut self) -> &mut MessageTracker {
        &mut self.messages
    }

    /// Feeds raw transport bytes through KISS decode -> AX.25 parse -> APRS
    /// dialect parse -> dedupe check -> station-store observation ->
    /// message dispatch.
    pub fn ingest_bytes(&mut self, bytes: &[u8], now: DateTime<Utc>) {
        let frames = self.decoder.feed(bytes);
        for frame in frames {
            if !frame.is_data_frame() {
                continue;
            }
            let frame_number = self.frame_counter;
            self.frame_counter += 1;
            self.ingest_frame(&frame.payload, now, Some(frame_number));
        }
    }

    fn ingest_frame(&mut self, ax25_bytes: &[u8], now: DateTime<Utc>, frame_number: Option<u64>) {
        let frame = match ax25::parse_ui_frame(ax25_bytes) {
            Ok(f) => f,
            Err(err) => {
                metrics::counter!("ax25.malformed_frames_total").increment(1);
                warn!(error = %err, "discarding malformed AX.25 frame");
                return;
            }
        };

        self.maybe_digipeat(&frame);

        let path: Vec<String> = frame
            .path
            .iter()
            .map(|p| {
                if p.h_bit {
                    format!("{}*", p.callsign.canonical_key())
                } else {
                    p.callsign.canonical_key()
                }
            })
            .collect();

        let info = String::from_utf8_lossy(&frame.info).to_string();
        let source_key = frame.source.canonical_key();
        let tocall = frame.destination.base().to_string();

        let is_duplicate = self.dedupe.is_duplicate(&source_key, &info, now);

        let payload = if is_duplicate {
            None
        } else {
            match aprs_parser::parse_info_field_with_destination(&info, Some(&tocall)) {
                Ok(p) => Some(p),
                Err(err) => {
                    debug!(source = %source_key, error = %err, "packet did not parse as any known dialect");
                    None
                }
            }
        };

        // A third-party packet (`}SRC>DST,PATH:info`) wraps a fully-formed
        // inner APRS packet, typically injected by an iGate. The outer
        // frame's source is recorded as the relay callsign and the inner
        // packet is observed against its own source station with
        // `direct_rf = false` (spec §4.2 "Third-party").
        let (effective_source, effective_path, relay_call, effective_payload) = match payload {
            Some(AprsPayload::ThirdParty { source, path: inner_path, inner, .. }) => {
                (source, inner_path, Some(source_key.clone()), Some(*inner))
            }
            other => (source_key.clone(), path.clone(), None, other),
        };

        let outcome = self.store.observe_packet(
            &effective_source,
            &effective_path,
            relay_call.as_deref(),
            effective_payload,
            is_duplicate,
            now,
            Some(&tocall),
            frame_number,
        );

        if let Some(AprsPayload::Message(msg)) = &outcome.payload {
            let heard_via_digipeater = !effective_path.is_empty();
            let dispatch = self.messages.dispatch_inbound(
                &effective_source,
                &msg.addressee,
                &msg.text,
                msg.message_id.as_deref(),
                msg.is_ack,
                msg.is_rej,
                heard_via_digipeater,
                now,
            );
            if matches!(
                dispatch,
                DispatchOutcome::DeliveredToMe | DispatchOutcome::DuplicateToMe
            ) {
                self.store.record_message_received(&effective_source);
            }
            if self.config.auto_ack && dispatch == DispatchOutcome::DeliveredToMe {
                if let Some(id) = &msg.message_id {
                    self.pending_acks.push(PendingAck {
                        to_call: effective_source.clone(),
                        message_id: id.clone(),
                    });
                }
            }
        }

        if let Some(observer) = &self.observer {
            observer.on_packet(&effective_source, &effective_path, &outcome.payload, outcome.is_duplicate);
        }
    }

    /// Spec §6 `DIGIPEATER`: if enabled and the next unrepeated path hop
    /// matches our callsign or alias, queue a retransmission of the same
    /// frame with that hop's H-bit set (spec §1 "drives outbound behaviour
    /// ... digipeating"). Runs regardless of whether the payload parsed or
    /// was a duplicate, since digipeating is a link-layer decision.
    fn maybe_digipeat(&mut self, frame: &ax25::Ax25Frame) {
        if !self.config.digipeater_enabled {
            return;
        }
        let Ok(my_call) = Callsign::parse(&self.config.my_callsign) else {
            return;
        };
        let my_alias = Callsign::parse(&self.config.my_alias).ok();
        let next_hop = frame
            .path
            .iter()
            .position(|entry| !entry.h_bit && (entry.callsign == my_call || my_alias.as_ref() == Some(&entry.callsign)));
        if let Some(idx) = next_hop {
            let mut repeated = frame.clone();
            repeated.path[idx].h_bit = true;
            let bytes = ax25::encode_frame(&repeated);
            self.pending_digipeats.push(crate::kiss::encode_frame(0, &bytes));
            debug!(hop = %frame.path[idx].callsign, "queued digipeat");
        }
    }

    /// Drains acks queued by `AUTO_ACK` since the last drain.
    pub fn drain_pending_acks(&mut self) -> Vec<PendingAck> {
        std::mem::take(&mut self.pending_acks)
    }

    /// Drains fully KISS-encoded digipeated frames queued by `DIGIPEATER`
    /// since the last drain; the caller hands each straight to the
    /// transport.
    pub fn drain_pending_digipeats(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.pending_digipeats)
    }

    /// Builds and transmits an automatic `ackNNNNN` reply to a message
    /// delivered to us (spec §6 `AUTO_ACK`).
    pub async fn send_ack(&self, transport: &dyn Transport, ack: &PendingAck) -> Result<()> {
        let destination =
            Callsign::parse(&self.config.unproto).context("invalid UNPROTO destination")?;
        let info = crate::message_tracker::format_ack_info(&ack.to_call, &ack.message_id);
        self.send_ui_frame(transport, &destination, &[], info.as_bytes()).await
    }

    /// Builds and transmits a UI frame, handing the encoded bytes to
    /// `transport`.
    pub async fn send_ui_frame(
        &self,
        transport: &dyn Transport,
        destination: &Callsign,
        digipeaters: &[Callsign],
        info: &[u8],
    ) -> Result<()> {
        let source = Callsign::parse(&self.config.my_callsign).context("invalid configured callsign")?;
        let frame_bytes = ax25::build_ui_frame(&source, destination, digipeaters, info)?;
        let kiss_bytes = crate::kiss::encode_frame(0, &frame_bytes);
        transport.send(kiss_bytes).await
    }

    /// Runs one scheduler tick: fires a beacon if due, and returns any
    /// outbound messages whose retry interval has elapsed.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickResult {
        let beacon_due = self.beacon.is_due(now);
        if beacon_due {
            self.beacon.mark_sent(now);
        }
        let due_retries = self.messages.due_retries(now);
        TickResult { beacon_due, due_retries }
    }
}

pub struct TickResult {
    pub beacon_due: bool,
    pub due_retries: Vec<crate::message_tracker::Message>,
}
