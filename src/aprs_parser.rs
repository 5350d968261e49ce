//! APRS info-field parsing (C2): dispatches on the first data-type-indicator
//! byte, then decodes each dialect into the shared [`AprsPayload`] shape.

use crate::aprs_types::{
    AprsPayload, Coordinate, DeviceInfo, ItemReport, Message, ObjectReport, Position, StatusReport,
    Telemetry, Weather,
};
use crate::device_id;
use crate::error::EngineError;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use regex::Regex;
use std::sync::LazyLock;

// Standard wind form `_ddd/sss` (direction/speed together, spec.md §4.2); by
// the time this reaches `extract_weather_fields` every real call site has
// already consumed the leading `_` itself (as a position's weather symbol
// code, or as the weather-packet data-type indicator), so the text in hand
// starts directly at the digits.
static WEATHER_WIND_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{3})/(\d{3})").unwrap());
static WEATHER_WIND_SPEED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"c\d{3}s(\d{3})").unwrap());
static WEATHER_GUST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"g(\d{3})").unwrap());
static WEATHER_TEMP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"t(-?\d{1,3})").unwrap());
static WEATHER_RAIN_1H: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"r(\d{3})").unwrap());
static WEATHER_RAIN_24H: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"p(\d{3})").unwrap());
static WEATHER_RAIN_MIDNIGHT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"P(\d{3})").unwrap());
static WEATHER_HUMIDITY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"h(\d{2})").unwrap());
static WEATHER_PRESSURE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"b(\d{5})").unwrap());

static TELEMETRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^T#(\d{1,3}),([\d.]+),([\d.]+),([\d.]+),([\d.]+),([\d.]+),([01]{8})").unwrap()
});

static MESSAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^:([A-Za-z0-9 -]{9}):(.*)$").unwrap());
static MESSAGE_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*)\{(.+)$").unwrap());

static OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^;(.{9})([*_])(\d{6}[zh/])?(\d{4}\.\d{2}[NS])(.)(\d{5}\.\d{2}[EW])(.)(.*)$").unwrap()
});
static ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\)([!-~]{3,9})([!_])(\d{4}\.\d{2}[NS])(.)(\d{5}\.\d{2}[EW])(.)(.*)$").unwrap());

static UNCOMPRESSED_POS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4}\.\d{2})([NS])(.)(\d{5}\.\d{2})([EW])(.)(.*)$").unwrap());
static COURSE_SPEED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{3})/(\d{3})").unwrap());
static ALTITUDE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/A=(\d{6})").unwrap());
static PHG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"PHG\d{4}").unwrap());
static RNG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"RNG\d{4}").unwrap());
static DFS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"DFS\d{4}").unwrap());

const BASE91_CHARS: &str = "!\"#$%&'()*+,-./0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^_`abcdefghijklmnopqrstuvwxyz{|}~";

/// Top-level entry point: classifies and fully decodes one APRS info field.
/// Equivalent to [`parse_info_field_with_destination`] with no destination
/// callsign available (the common case for dialects other than Mic-E, which
/// is the only one that reads the AX.25 destination address).
pub fn parse_info_field(info: &str) -> Result<AprsPayload, EngineError> {
    parse_info_field_with_destination(info, None)
}

/// Classifies and fully decodes one APRS info field, given the AX.25
/// destination (tocall) address it arrived with. Mic-E packets (spec §4.2)
/// encode latitude and N/S/W flags in that address, not the info field, so
/// callers that have it (the ingress pipeline, and a third-party packet's
/// inner header) should pass it through rather than calling
/// [`parse_info_field`] directly.
pub fn parse_info_field_with_destination(
    info: &str,
    dest_base: Option<&str>,
) -> Result<AprsPayload, EngineError> {
    if info.is_empty() {
        return Err(EngineError::Parse("empty info field".into()));
    }
    let indicator = info.chars().next().unwrap();
    match indicator {
        '}' => parse_third_party(info),
        '!' | '=' => parse_position(&info[1..], false),
        '@' | '/' => {
            // Timestamped position: 7-byte timestamp precedes the body.
            if info.len() < 8 {
                return Err(EngineError::Parse("timestamped position too short".into()));
            }
            parse_position(&info[8..], false)
        }
        '`' | '\'' | '\x1c'..='\x1f' => decode_mic_e_body(info, dest_base),
        '_' => parse_weather(&info[1..]),
        '>' => Ok(AprsPayload::Status(StatusReport {
            text: clean_comment(&info[1..]),
        })),
        ':' => parse_message(info),
        'T' if info.starts_with("T#") => parse_telemetry(info),
        ';' => parse_object(info),
        ')' => parse_item(info),
        _ => Ok(AprsPayload::Unknown(info.to_string())),
    }
}

fn parse_third_party(info: &str) -> Result<AprsPayload, EngineError> {
    let rest = &info[1..];
    let (header, payload) = rest
        .split_once(':')
        .ok_or_else(|| EngineError::Parse("third-party packet missing ':'".into()))?;
    let (source, dest_and_path) = header
        .split_once('>')
        .ok_or_else(|| EngineError::Parse("third-party header missing '>'".into()))?;
    let mut parts = dest_and_path.split(',');
    let destination = parts
        .next()
        .ok_or_else(|| EngineError::Parse("third-party header missing destination".into()))?
        .to_string();
    let path: Vec<String> = parts.map(|s| s.to_string()).collect();
    let inner = parse_info_field_with_destination(payload, Some(&destination))?;
    Ok(AprsPayload::ThirdParty {
        source: source.to_string(),
        destination,
        path,
        inner: Box::new(inner),
    })
}

/// Parses a position body (after the data-type-indicator and any
/// timestamp), dispatching on whether it's compressed (symbol table char
/// immediately followed by base-91 data) or uncompressed (digit-led
/// DDMM.mm string).
fn parse_position(body: &str, in_mic_e: bool) -> Result<AprsPayload, EngineError> {
    if body.is_empty() {
        return Err(EngineError::Parse("empty position body".into()));
    }
    let first = body.chars().next().unwrap();
    if first.is_ascii_digit() {
        parse_uncompressed_position(body)
    } else if !in_mic_e {
        parse_compressed_position(body)
    } else {
        Err(EngineError::Parse("unrecognized position encoding".into()))
    }
}

fn parse_uncompressed_position(body: &str) -> Result<AprsPayload, EngineError> {
    let caps = UNCOMPRESSED_POS_RE
        .captures(body)
        .ok_or_else(|| EngineError::Parse(format!("malformed uncompressed position: {body:?}")))?;
    let lat = dm_to_decimal(&caps[1], &caps[2])?;
    let symbol_table = caps[3].chars().next().unwrap();
    let lon = dm_to_decimal(&caps[4], &caps[5])?;
    let symbol_code = caps[6].chars().next().unwrap();
    let rest = &caps[7];

    validate_coord(lat, lon)?;

    // Symbol code `_` marks a weather station: the remainder is the same
    // wind/gust/temp/rain/humidity/pressure field set a dedicated weather
    // packet carries, not course/speed/altitude (spec §4.2 "Position with
    // weather").
    let weather = if symbol_code == '_' {
        Some(extract_weather_fields(rest))
    } else {
        None
    };

    let (course_deg, speed_knots, altitude_ft, comment) = if weather.is_some() {
        (None, None, None, String::new())
    } else {
        let (course_deg, speed_knots) = match COURSE_SPEED_RE.captures(rest) {
            Some(cs) => (
                cs[1].parse::<u16>().ok().filter(|&c| c <= 360),
                cs[2].parse::<f64>().ok(),
            ),
            None => (None, None),
        };
        let altitude_ft = ALTITUDE_RE
            .captures(rest)
            .and_then(|c| c[1].parse::<f64>().ok());
        (course_deg, speed_knots, altitude_ft, clean_comment(rest))
    };

    Ok(AprsPayload::Position(Position {
        coord: Coordinate { lat, lon },
        symbol_table,
        symbol_code,
        course_deg,
        speed_knots,
        altitude_ft,
        comment,
        compressed: false,
        weather,
        grid_square: crate::geo::latlon_to_maidenhead(lat, lon, 6).ok(),
        device: None,
    }))
}

fn dm_to_decimal(dm: &str, hemisphere: &str) -> Result<f64, EngineError> {
    let dot = dm
        .find('.')
        .ok_or_else(|| EngineError::Parse(format!("malformed degree-minute value: {dm:?}")))?;
    let deg_len = dot - 2;
    let degrees: f64 = dm[..deg_len]
        .parse()
        .map_err(|_| EngineError::Parse(format!("bad degrees in {dm:?}")))?;
    let minutes: f64 = dm[deg_len..]
        .parse()
        .map_err(|_| EngineError::Parse(format!("bad minutes in {dm:?}")))?;
    let mut value = degrees + minutes / 60.0;
    if hemisphere == "S" || hemisphere == "W" {
        value = -value;
    }
    Ok(value)
}

fn validate_coord(lat: f64, lon: f64) -> Result<(), EngineError> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(EngineError::Coord(format!("out of range: ({lat}, {lon})")));
    }
    if lat == 0.0 && lon == 0.0 {
        return Err(EngineError::Coord("(0, 0) is treated as invalid/unset".into()));
    }
    Ok(())
}

fn base91_decode(chars: &[char]) -> i64 {
    let mut value: i64 = 0;
    for &c in chars {
        let digit = BASE91_CHARS.find(c).unwrap_or(0) as i64;
        value = value * 91 + digit;
    }
    value
}

fn parse_compressed_position(body: &str) -> Result<AprsPayload, EngineError> {
    let chars: Vec<char> = body.chars().collect();
    if chars.len() < 13 {
        return Err(EngineError::Parse("compressed position too short".into()));
    }
    let symbol_table = chars[0];
    let lat_val = base91_decode(&chars[1..5]);
    let lon_val = base91_decode(&chars[5..9]);
    let symbol_code = chars[9];
    let course_speed_byte1 = chars[10];
    let course_speed_byte2 = chars[11];
    let _compression_type = chars[12];

    let lat = 90.0 - (lat_val as f64) / 380926.0;
    let lon = -180.0 + (lon_val as f64) / 190463.0;
    validate_coord(lat, lon)?;

    let (course_deg, speed_knots) = if course_speed_byte1 != ' ' && course_speed_byte2 != ' ' {
        let c = (course_speed_byte1 as i64 - 33) * 91 + (course_speed_byte2 as i64 - 33);
        let course = (c / 4 * 4) as u16;
        let speed_code = c % 4;
        let speed = 1.08_f64.powi(speed_code as i32) - 1.0;
        (Some(course), Some(speed))
    } else {
        (None, None)
    };

    let rest: String = chars[13..].iter().collect();

    let weather = if symbol_code == '_' {
        Some(extract_weather_fields(&rest))
    } else {
        None
    };
    let comment = if weather.is_some() { String::new() } else { clean_comment(&rest) };

    Ok(AprsPayload::Position(Position {
        coord: Coordinate { lat, lon },
        symbol_table,
        symbol_code,
        course_deg,
        speed_knots,
        altitude_ft: None,
        comment,
        compressed: true,
        weather,
        grid_square: crate::geo::latlon_to_maidenhead(lat, lon, 6).ok(),
        device: None,
    }))
}

/// Extracts whatever weather fields are present in free text (a dedicated
/// `_`-prefixed weather packet, or fields embedded in a position comment).
pub fn extract_weather_fields(text: &str) -> Weather {
    let wind_caps = WEATHER_WIND_RE.captures(text);
    let wind_direction_deg = wind_caps.as_ref().and_then(|c| c[1].parse::<u16>().ok());
    let wind_speed_mph = wind_caps
        .as_ref()
        .and_then(|c| c[2].parse::<f64>().ok())
        .or_else(|| WEATHER_WIND_SPEED.captures(text).and_then(|c| c[1].parse::<f64>().ok()));
    let wind_gust_mph = WEATHER_GUST.captures(text).and_then(|c| c[1].parse::<f64>().ok());
    let temperature_f = WEATHER_TEMP
        .captures(text)
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(|t| if t > 200.0 { t - 256.0 } else { t });
    let rain_1h_in = WEATHER_RAIN_1H
        .captures(text)
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(|v| v / 100.0);
    let rain_24h_in = WEATHER_RAIN_24H
        .captures(text)
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(|v| v / 100.0);
    let rain_since_midnight_in = WEATHER_RAIN_MIDNIGHT
        .captures(text)
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(|v| v / 100.0);
    let humidity_pct = WEATHER_HUMIDITY
        .captures(text)
        .and_then(|c| c[1].parse::<u8>().ok())
        .map(|h| if h == 0 { 100 } else { h });
    let pressure_mb = WEATHER_PRESSURE
        .captures(text)
        .and_then(|c| crate::zambretti::parse_pressure_field(&c[1]));

    let mut weather = Weather {
        wind_direction_deg,
        wind_speed_mph,
        wind_gust_mph,
        temperature_f,
        rain_1h_in,
        rain_24h_in,
        rain_since_midnight_in,
        humidity_pct,
        pressure_mb,
        dew_point_f: None,
        sea_level_pressure_mb: None,
        pressure_tendency: None,
        pressure_change_3h: None,
        raw_info: Some(text.to_string()),
    };

    if let (Some(t), Some(h)) = (weather.temperature_f, weather.humidity_pct) {
        weather.dew_point_f = Some(crate::geo::dew_point_f(t, h as f64));
    }

    weather
}

fn parse_weather(body: &str) -> Result<AprsPayload, EngineError> {
    Ok(AprsPayload::Weather(extract_weather_fields(body)))
}

fn parse_message(info: &str) -> Result<AprsPayload, EngineError> {
    let caps = MESSAGE_RE
        .captures(info)
        .ok_or_else(|| EngineError::Parse(format!("malformed message packet: {info:?}")))?;
    let addressee = caps[1].trim().to_string();
    let body = &caps[2];

    let (text, message_id) = match MESSAGE_ID_RE.captures(body) {
        Some(id_caps) => (id_caps[1].to_string(), Some(id_caps[2].to_string())),
        None => (body.to_string(), None),
    };

    let trimmed = text.trim();
    let is_ack = trimmed.starts_with("ack");
    let is_rej = trimmed.starts_with("rej");

    Ok(AprsPayload::Message(Message {
        addressee,
        text,
        message_id,
        is_ack,
        is_rej,
    }))
}

fn parse_telemetry(info: &str) -> Result<AprsPayload, EngineError> {
    let caps = TELEMETRY_RE
        .captures(info)
        .ok_or_else(|| EngineError::Parse(format!("malformed telemetry packet: {info:?}")))?;
    let sequence: u16 = caps[1]
        .parse()
        .map_err(|_| EngineError::Parse("bad telemetry sequence".into()))?;
    let mut analog = [0.0; 5];
    for i in 0..5 {
        analog[i] = caps[i + 2]
            .parse()
            .map_err(|_| EngineError::Parse("bad telemetry analog value".into()))?;
    }
    let bits = &caps[7];
    let mut digital = [false; 8];
    for (i, c) in bits.chars().enumerate().take(8) {
        digital[i] = c == '1';
    }
    Ok(AprsPayload::Telemetry(Telemetry {
        sequence,
        analog,
        digital,
    }))
}

/// Resolves an object report's APRS timestamp token (spec.md §4.2: 6 digits
/// plus a `z`/`h`/`/` type byte) to a UTC instant. `ddhhmm` + `z`/`/` gives
/// day-of-month/hour/minute; `hhmmss` + `h` gives hour/minute/second. Neither
/// form carries a year or month, so both are anchored to the current UTC
/// date — the same ambiguity the APRS spec itself leaves to the receiver.
fn parse_object_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.len() != 7 {
        return None;
    }
    let digits = &raw[..6];
    let kind = raw.as_bytes()[6];
    let a: u32 = digits[0..2].parse().ok()?;
    let b: u32 = digits[2..4].parse().ok()?;
    let c: u32 = digits[4..6].parse().ok()?;
    let now = Utc::now();
    match kind {
        b'z' | b'/' => Utc.with_ymd_and_hms(now.year(), now.month(), a, b, c, 0).single(),
        b'h' => Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), a, b, c).single(),
        _ => None,
    }
}

fn parse_object(info: &str) -> Result<AprsPayload, EngineError> {
    let caps = OBJECT_RE
        .captures(info)
        .ok_or_else(|| EngineError::Parse(format!("malformed object packet: {info:?}")))?;
    let name = caps[1].trim().to_string();
    let alive = &caps[2] == "*";
    let lat_field = &caps[4];
    let lat = dm_to_decimal(&lat_field[..lat_field.len() - 1], &lat_field[lat_field.len() - 1..])?;
    let symbol_table = caps[5].chars().next().unwrap();
    let lon_field = &caps[6];
    let lon = dm_to_decimal(&lon_field[..lon_field.len() - 1], &lon_field[lon_field.len() - 1..])?;
    let symbol_code = caps[7].chars().next().unwrap();
    let comment = clean_comment(&caps[8]);
    let timestamp = caps.get(3).and_then(|m| parse_object_timestamp(m.as_str()));

    validate_coord(lat, lon)?;

    Ok(AprsPayload::Object(ObjectReport {
        name,
        alive,
        position: Position {
            coord: Coordinate { lat, lon },
            symbol_table,
            symbol_code,
            course_deg: None,
            speed_knots: None,
            altitude_ft: None,
            comment,
            compressed: false,
            weather: None,
            grid_square: crate::geo::latlon_to_maidenhead(lat, lon, 6).ok(),
            device: None,
        },
        timestamp,
    }))
}

fn parse_item(info: &str) -> Result<AprsPayload, EngineError> {
    let caps = ITEM_RE
        .captures(info)
        .ok_or_else(|| EngineError::Parse(format!("malformed item packet: {info:?}")))?;
    let name = caps[1].trim().to_string();
    let alive = &caps[2] == "!";
    let lat = dm_to_decimal(&caps[3][..caps[3].len() - 1], &caps[3][caps[3].len() - 1..])?;
    let symbol_table = caps[4].chars().next().unwrap();
    let lon = dm_to_decimal(&caps[5][..caps[5].len() - 1], &caps[5][caps[5].len() - 1..])?;
    let symbol_code = caps[6].chars().next().unwrap();
    let comment = clean_comment(&caps[7]);

    validate_coord(lat, lon)?;

    Ok(AprsPayload::Item(ItemReport {
        name,
        alive,
        position: Position {
            coord: Coordinate { lat, lon },
            symbol_table,
            symbol_code,
            course_deg: None,
            speed_knots: None,
            altitude_ft: None,
            comment,
            compressed: false,
            weather: None,
            grid_square: crate::geo::latlon_to_maidenhead(lat, lon, 6).ok(),
            device: None,
        },
    }))
}

const MIC_E_ALPHABET_NORTH_WEST: &str = "PQRSTUVWXYZ";

/// Decodes a Mic-E packet. The destination callsign (already decoded by the
/// AX.25 layer, passed in as `dest_base`) carries the latitude digits,
/// north/south, and east/west-longitude-offset flags; the info field
/// carries longitude, speed, and course.
pub fn parse_mic_e(info: &str) -> Result<AprsPayload, EngineError> {
    // This entry point is used when `info` alone is available; callers that
    // have the decoded destination address should prefer
    // `parse_mic_e_with_destination`.
    decode_mic_e_body(info, None)
}

pub fn parse_mic_e_with_destination(info: &str, dest_base: &str) -> Result<AprsPayload, EngineError> {
    decode_mic_e_body(info, Some(dest_base))
}

fn decode_mic_e_body(info: &str, dest_base: Option<&str>) -> Result<AprsPayload, EngineError> {
    let bytes: Vec<u8> = info.bytes().collect();
    if bytes.len() < 9 {
        return Err(EngineError::Parse("mic-e info field too short".into()));
    }

    let (lat, north, west_longitude_offset, long_offset) = match dest_base {
        Some(dest) if dest.len() == 6 => decode_mic_e_destination(dest)?,
        _ => (0.0, true, false, false),
    };

    let d = bytes[1] as i32 - 28;
    let m = bytes[2] as i32 - 28;
    let s = bytes[3] as i32 - 28;

    let mut lon_deg = d;
    if long_offset {
        lon_deg += 100;
    }
    if lon_deg >= 180 && lon_deg <= 189 {
        lon_deg -= 80;
    } else if lon_deg >= 190 && lon_deg <= 199 {
        lon_deg -= 190;
    }
    let lon_min = if m >= 60 { m - 60 } else { m };
    let lon = lon_deg as f64 + lon_min as f64 / 60.0 + (s as f64) / 6000.0;
    let lon = if west_longitude_offset { -lon } else { lon };

    let lat = if north { lat } else { -lat };

    validate_coord(lat, lon)?;

    let sp = bytes[4] as i32 - 28;
    let dc = bytes[5] as i32 - 28;
    let se = bytes[6] as i32 - 28;

    let speed_raw = sp * 10 + dc / 10;
    let speed_knots = if speed_raw >= 800 {
        Some((speed_raw - 800) as f64)
    } else {
        Some(speed_raw as f64)
    };
    let course_raw = (dc % 10) * 100 + se;
    let course_deg = if course_raw >= 400 {
        Some((course_raw - 400) as u16)
    } else {
        Some(course_raw as u16)
    };

    let symbol_code = bytes.get(7).copied().unwrap_or(b'>') as char;
    let symbol_table = bytes.get(8).copied().unwrap_or(b'/') as char;

    let (comment, device) = if bytes.len() > 9 {
        decode_mic_e_status(&info[9..])
    } else {
        (String::new(), None)
    };

    Ok(AprsPayload::Position(Position {
        coord: Coordinate { lat, lon },
        symbol_table,
        symbol_code,
        course_deg,
        speed_knots,
        altitude_ft: None,
        comment,
        compressed: false,
        weather: None,
        device,
        grid_square: crate::geo::latlon_to_maidenhead(lat, lon, 6).ok(),
    }))
}

/// Decodes a Mic-E status/comment field (everything after byte 8): strips
/// the leading type-indicator byte (space/`>`/`]`/`` ` ``/`'`), keeps only
/// printable characters, strips a trailing `}xyz` base-91 altitude suffix,
/// identifies the originating device from the comment's trailing
/// fingerprint bytes, strips the trailing manufacturer/version glyphs, and
/// finally runs the usual token-stripping/gibberish-suppression pass.
/// Device identification must run before the trailing-glyph strip, since
/// that strip destroys the fingerprint bytes it looks at.
fn decode_mic_e_status(raw: &str) -> (String, Option<DeviceInfo>) {
    let mut text = raw;
    if let Some(first) = text.chars().next() {
        if matches!(first, ' ' | '>' | ']' | '`' | '\'') {
            text = &text[first.len_utf8()..];
        }
    }

    let mut printable: String = text.chars().filter(|c| (' '..='~').contains(c)).collect();

    if let Some(brace_idx) = printable.find('}') {
        let bytes = printable.as_bytes();
        let mut end_idx = brace_idx + 1;
        while end_idx < bytes.len() && end_idx < brace_idx + 4 && (0x21..=0x7B).contains(&bytes[end_idx]) {
            end_idx += 1;
        }
        printable = format!("{}{}", &printable[..brace_idx], &printable[end_idx..]);
    }

    let suffix: String = printable.chars().rev().take(2).collect::<Vec<_>>().into_iter().rev().collect();
    let device = device_id::identify_by_mice(&suffix);

    let stripped = printable.trim_end_matches(|c: char| !c.is_ascii_alphanumeric() && c != ' ');
    let comment = clean_comment(stripped.trim_end());

    (comment, device)
}

/// Decodes the Mic-E destination address into `(latitude, is_north,
/// is_west, longitude_needs_plus_100)`. Each of the 6 characters is one of
/// three alphabets depending on whether it also encodes a message bit and
/// the N/S or E/W flags.
fn decode_mic_e_destination(dest: &str) -> Result<(f64, bool, bool, bool), EngineError> {
    let chars: Vec<char> = dest.to_ascii_uppercase().chars().collect();
    if chars.len() != 6 {
        return Err(EngineError::Parse("mic-e destination must be 6 chars".into()));
    }
    let mut digits = [0u32; 6];
    for (i, &c) in chars.iter().enumerate() {
        digits[i] = match c {
            '0'..='9' => c.to_digit(10).unwrap(),
            'A'..='J' => c as u32 - 'A' as u32,
            'P'..='Y' => c as u32 - 'P' as u32,
            'K' | 'L' | 'Z' => 0,
            _ => return Err(EngineError::Parse(format!("bad mic-e destination char: {c}"))),
        };
    }
    // Custom/standard message-bit and N/S/W flags live in chars 4, 5, 6
    // (0-indexed 3, 4, 5): A-J/P-Y => bit set, K/L/Z => ambiguous/space.
    let north = matches!(chars[3], 'A'..='J' | 'P'..='Y' | 'K');
    let long_offset = matches!(chars[4], 'A'..='J' | 'P'..='Y' | 'L');
    let west = matches!(chars[5], 'A'..='J' | 'P'..='Y' | 'Z');

    let lat_deg = digits[0] * 10 + digits[1];
    let lat_min = digits[2] * 10 + digits[3];
    let lat_hundredths = digits[4] * 10 + digits[5];
    let lat = lat_deg as f64 + (lat_min as f64 + lat_hundredths as f64 / 100.0) / 60.0;

    Ok((lat, north, west, long_offset))
}

/// Strips known telemetry tokens out of a comment before suppressing
/// gibberish, in order: weather fields accidentally left in a non-weather
/// comment, altitude (`/A=dddddd`), course/speed (`ddd/ddd`), then the
/// station-capability tokens `PHGdddd`/`RNGdddd`/`DFSdddd` (spec §4.2
/// "Comment cleaning"). Device identification must be extracted *before*
/// calling this, since the fingerprint tokens themselves get stripped too.
pub fn clean_comment(raw: &str) -> String {
    let mut text = raw.to_string();
    for re in [
        &*WEATHER_WIND_RE,
        &*WEATHER_WIND_SPEED,
        &*WEATHER_GUST,
        &*WEATHER_TEMP,
        &*WEATHER_RAIN_1H,
        &*WEATHER_RAIN_24H,
        &*WEATHER_RAIN_MIDNIGHT,
        &*WEATHER_HUMIDITY,
        &*WEATHER_PRESSURE,
    ] {
        text = re.replace_all(&text, "").to_string();
    }
    text = ALTITUDE_RE.replace_all(&text, "").to_string();
    text = COURSE_SPEED_RE.replace(&text, "").to_string();
    text = PHG_RE.replace_all(&text, "").to_string();
    text = RNG_RE.replace_all(&text, "").to_string();
    text = DFS_RE.replace_all(&text, "").to_string();

    let trimmed = text.trim();
    let alnum_or_space = trimmed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .count();
    if !trimmed.is_empty() && (alnum_or_space as f64 / trimmed.len() as f64) < 0.4 {
        return String::new();
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_uncompressed_position() {
        let payload = parse_info_field("!4903.50N/07201.75W-Test comment").unwrap();
        match payload {
            AprsPayload::Position(pos) => {
                assert!((pos.coord.lat - 49.0583).abs() < 0.001);
                assert!((pos.coord.lon - -72.0292).abs() < 0.001);
                assert_eq!(pos.symbol_table, '/');
                assert_eq!(pos.symbol_code, '-');
                assert_eq!(pos.comment, "Test comment");
            }
            other => panic!("expected Position, got {other:?}"),
        }
    }

    #[test]
    fn parses_course_and_speed() {
        let payload = parse_info_field("!4903.50N/07201.75W-088/036/A=001234").unwrap();
        match payload {
            AprsPayload::Position(pos) => {
                assert_eq!(pos.course_deg, Some(88));
                assert_eq!(pos.speed_knots, Some(36.0));
                assert_eq!(pos.altitude_ft, Some(1234.0));
            }
            other => panic!("expected Position, got {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_zero_coordinate() {
        let result = parse_info_field("!0000.00N/00000.00W-");
        assert!(result.is_err());
    }

    #[test]
    fn humidity_00_means_100_percent() {
        // No leading `_`: real call sites (weather-symbol position, or the
        // `_` data-type-indicator dispatch) always consume it first.
        let weather = extract_weather_fields("280/015g020t077r000p000P000h00b10132");
        assert_eq!(weather.humidity_pct, Some(100));
    }

    #[test]
    fn temperature_two_s_complement_negative() {
        let weather = extract_weather_fields("280/015g020t253r000p000P000h50b10132");
        assert_eq!(weather.temperature_f, Some(-3.0));
    }

    #[test]
    fn parses_weather_fields() {
        let weather = extract_weather_fields("280/015g020t077r000p000P000h50b10132");
        assert_eq!(weather.wind_direction_deg, Some(280));
        assert_eq!(weather.wind_speed_mph, Some(15.0));
        assert_eq!(weather.wind_gust_mph, Some(20.0));
        assert_eq!(weather.temperature_f, Some(77.0));
        assert_eq!(weather.humidity_pct, Some(50));
        assert_eq!(weather.pressure_mb, Some(1013.2));
        assert!(weather.dew_point_f.is_some());
    }

    #[test]
    fn parses_compact_wind_form() {
        let weather = extract_weather_fields("c220s012g020t077r000p000P000h50b10132");
        assert_eq!(weather.wind_speed_mph, Some(12.0));
    }

    #[test]
    fn parses_message_with_id() {
        let payload = parse_info_field(":K1FSY-9  :Hello there{42").unwrap();
        match payload {
            AprsPayload::Message(msg) => {
                assert_eq!(msg.addressee, "K1FSY-9");
                assert_eq!(msg.text, "Hello there");
                assert_eq!(msg.message_id, Some("42".to_string()));
                assert!(!msg.is_ack);
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn parses_ack_message() {
        let payload = parse_info_field(":K1FSY-9  :ack42").unwrap();
        match payload {
            AprsPayload::Message(msg) => assert!(msg.is_ack),
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn parses_telemetry() {
        let payload = parse_info_field("T#123,1.0,2.0,3.0,4.0,5.0,10110000").unwrap();
        match payload {
            AprsPayload::Telemetry(t) => {
                assert_eq!(t.sequence, 123);
                assert_eq!(t.analog[0], 1.0);
                assert_eq!(t.digital[0], true);
                assert_eq!(t.digital[1], false);
            }
            other => panic!("expected Telemetry, got {other:?}"),
        }
    }

    #[test]
    fn parses_status() {
        let payload = parse_info_field(">Net control active").unwrap();
        match payload {
            AprsPayload::Status(s) => assert_eq!(s.text, "Net control active"),
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[test]
    fn parses_object_with_timestamp() {
        let payload =
            parse_info_field(";LEADER   *092345z4903.50N/07201.75W-meeting here").unwrap();
        match payload {
            AprsPayload::Object(obj) => {
                assert_eq!(obj.name, "LEADER");
                assert!(obj.alive);
                let ts = obj.timestamp.expect("object timestamp should be parsed");
                assert_eq!(ts.day(), 9);
                assert_eq!(ts.hour(), 23);
                assert_eq!(ts.minute(), 45);
            }
            other => panic!("expected Object, got {other:?}"),
        }
    }

    #[test]
    fn parses_object_without_timestamp() {
        let payload = parse_info_field(";LEADER   *4903.50N/07201.75W-meeting here").unwrap();
        match payload {
            AprsPayload::Object(obj) => assert_eq!(obj.timestamp, None),
            other => panic!("expected Object, got {other:?}"),
        }
    }

    #[test]
    fn parses_third_party() {
        let payload = parse_info_field("}N0CALL>APRS,TCPIP*:!4903.50N/07201.75W-hi").unwrap();
        match payload {
            AprsPayload::ThirdParty { source, destination, inner, .. } => {
                assert_eq!(source, "N0CALL");
                assert_eq!(destination, "APRS");
                assert!(matches!(*inner, AprsPayload::Position(_)));
            }
            other => panic!("expected ThirdParty, got {other:?}"),
        }
    }

    #[test]
    fn clean_comment_suppresses_gibberish() {
        assert_eq!(clean_comment("\x01\x02\x03\x04\x05"), "");
        assert_eq!(clean_comment("Hello world"), "Hello world");
    }

    #[test]
    fn parses_mic_e_position_using_destination_address() {
        // Destination "421K4F": degrees 42, minutes-tens 1, minutes-ones 0
        // via 'K' (north flag set), hundredths-tens 4 (no +100 longitude
        // offset), hundredths-ones 5 via 'F' (west flag set) -> lat
        // 42 10.45' N. Info longitude bytes 'c'/'Q'/0x1c -> 71 53.00' W,
        // zero speed/course, symbol `>/`.
        let dest = "421K4F";
        let info = "`cQ\x1c\x1c\x1c\x1c>/";
        let payload = parse_info_field_with_destination(info, Some(dest)).unwrap();
        match payload {
            AprsPayload::Position(pos) => {
                assert!((pos.coord.lat - 42.174_167).abs() < 1e-4);
                assert!((pos.coord.lon - (-71.883_333)).abs() < 1e-4);
                assert_eq!(pos.symbol_code, '>');
                assert_eq!(pos.symbol_table, '/');
                assert_eq!(pos.speed_knots, Some(0.0));
                assert_eq!(pos.course_deg, Some(0));
                assert!(!pos.compressed);
                assert!(pos.grid_square.is_some());
            }
            other => panic!("expected Position, got {other:?}"),
        }
    }

    #[test]
    fn mic_e_without_destination_loses_latitude() {
        // Regression guard for the bug where the ingress pipeline dropped
        // the AX.25 destination address before calling into the Mic-E
        // decoder: with no destination, latitude/hemisphere can't be
        // recovered from the info field alone and silently degrades to the
        // equator rather than erroring, which is exactly why callers that
        // have a destination address (the engine, and a third-party
        // packet's inner header) must route through
        // `parse_info_field_with_destination` instead of `parse_info_field`.
        let info = "`cQ\x1c\x1c\x1c\x1c>/";
        let payload = parse_info_field_with_destination(info, None).unwrap();
        match payload {
            AprsPayload::Position(pos) => assert_eq!(pos.coord.lat, 0.0),
            other => panic!("expected Position, got {other:?}"),
        }
    }

    #[test]
    fn third_party_mic_e_uses_inner_destination() {
        let dest = "421K4F";
        let inner_info = "`cQ\x1c\x1c\x1c\x1c>/";
        let outer = format!("}}N0CALL>{dest}:{inner_info}");
        let payload = parse_info_field(&outer).unwrap();
        match payload {
            AprsPayload::ThirdParty { inner, .. } => match *inner {
                AprsPayload::Position(pos) => {
                    assert!((pos.coord.lat - 42.174_167).abs() < 1e-4);
                }
                other => panic!("expected inner Position, got {other:?}"),
            },
            other => panic!("expected ThirdParty, got {other:?}"),
        }
    }
}
