//! APRS payload data model (C2/C3): the decoded shape of an info field,
//! independent of how it arrived (direct, digipeated, or nested inside a
//! third-party packet).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub coord: Coordinate,
    pub symbol_table: char,
    pub symbol_code: char,
    pub course_deg: Option<u16>,
    pub speed_knots: Option<f64>,
    pub altitude_ft: Option<f64>,
    pub comment: String,
    pub compressed: bool,
    /// Weather fields found greedily in the same packet (symbol code `_`,
    /// spec §4.2 "Position with weather"). `None` for a plain position.
    pub weather: Option<Weather>,
    /// Maidenhead grid square at 6-char precision, derived from `coord`.
    pub grid_square: Option<String>,
    /// Device identity inferred from a Mic-E comment's trailing fingerprint
    /// bytes. `None` for dialects that carry no such suffix; tocall-based
    /// identification happens separately, in the station store.
    pub device: Option<DeviceInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    pub wind_direction_deg: Option<u16>,
    pub wind_speed_mph: Option<f64>,
    pub wind_gust_mph: Option<f64>,
    pub temperature_f: Option<f64>,
    pub rain_1h_in: Option<f64>,
    pub rain_24h_in: Option<f64>,
    pub rain_since_midnight_in: Option<f64>,
    pub humidity_pct: Option<u8>,
    pub pressure_mb: Option<f64>,
    pub dew_point_f: Option<f64>,
    pub sea_level_pressure_mb: Option<f64>,
    /// Rising/steady/falling, compared against the sample closest to 3
    /// hours prior. `None` until enough history exists to compare against.
    pub pressure_tendency: Option<crate::zambretti::PressureTrend>,
    /// `pressure_mb` minus the pressure 3 hours prior, in millibars.
    pub pressure_change_3h: Option<f64>,
    /// The raw info-field text this was extracted from, kept so a stale
    /// `pressure_mb` can be re-derived on snapshot load (spec §4.8
    /// "Pressure-migration on load").
    pub raw_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub sequence: u16,
    pub analog: [f64; 5],
    pub digital: [bool; 8],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub addressee: String,
    pub text: String,
    pub message_id: Option<String>,
    pub is_ack: bool,
    pub is_rej: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectReport {
    pub name: String,
    pub alive: bool,
    pub position: Position,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub name: String,
    pub alive: bool,
    pub position: Position,
}

/// The fully decoded form of one APRS info field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AprsPayload {
    Position(Position),
    Weather(Weather),
    Status(StatusReport),
    Telemetry(Telemetry),
    Message(Message),
    Object(ObjectReport),
    Item(ItemReport),
    /// A packet re-encoded inside another (`}SRC>DST,PATH:info`), parsed
    /// recursively. Carries the inner source/destination/path plus the
    /// inner payload.
    ThirdParty {
        source: String,
        destination: String,
        path: Vec<String>,
        inner: Box<AprsPayload>,
    },
    /// Payload recognized as APRS but whose dialect we don't decode further
    /// (e.g. raw user-defined data).
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketKind {
    Position,
    Weather,
    Status,
    Telemetry,
    Message,
    Object,
    Item,
    ThirdParty,
    Unknown,
}

impl AprsPayload {
    pub fn kind(&self) -> PacketKind {
        match self {
            AprsPayload::Position(_) => PacketKind::Position,
            AprsPayload::Weather(_) => PacketKind::Weather,
            AprsPayload::Status(_) => PacketKind::Status,
            AprsPayload::Telemetry(_) => PacketKind::Telemetry,
            AprsPayload::Message(_) => PacketKind::Message,
            AprsPayload::Object(_) => PacketKind::Object,
            AprsPayload::Item(_) => PacketKind::Item,
            AprsPayload::ThirdParty { .. } => PacketKind::ThirdParty,
            AprsPayload::Unknown(_) => PacketKind::Unknown,
        }
    }
}

/// Device identity inferred from the destination callsign (tocall) or, for
/// MIC-E packets, the destination-address encoding itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifier: String,
    pub class: String,
    pub description: String,
}

/// One observed reception of a packet, the ground truth everything else is
/// computed from. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceptionEvent {
    pub timestamp: DateTime<Utc>,
    /// Raw digipeater path as heard, e.g. `["WIDE1-1*", "WIDE2-1"]`.
    pub path: Vec<String>,
    /// 0 = direct RF (empty path), 1..N = digipeater hops taken (count of
    /// H-bit-marked path entries), 999 = unknown/igated.
    pub hop_count: u16,
    /// False iff this packet reached us via a third-party iGate wrapper.
    /// A digipeated-but-still-RF packet (non-empty path, no relay_call) is
    /// still `direct_rf = true`.
    pub direct_rf: bool,
    /// The iGate callsign that relayed this packet, if it arrived wrapped
    /// in a third-party (`}SRC>DST,PATH:info`) packet.
    pub relay_call: Option<String>,
    /// True if this event recorded a duplicate packet's path only (the
    /// payload was not re-parsed or counted towards packet totals).
    pub is_duplicate: bool,
    /// Dialect of the decoded payload, or `Unknown` for a duplicate/unparsed
    /// reception.
    pub packet_type: PacketKind,
    /// Sequence number assigned by the ingress pipeline, when the caller
    /// tracks one (e.g. a replay file's frame index). `None` for live
    /// traffic with no natural frame numbering.
    pub frame_number: Option<u64>,
}
