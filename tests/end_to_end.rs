//! End-to-end scenarios exercising the ingest pipeline through the public
//! `Engine` API: KISS bytes in, station-store/message-tracker state out.
//! Mirrors the concrete walkthroughs used to validate the reference engine
//! before this crate existed.

use chrono::{DateTime, TimeZone, Utc};
use soar_aprs::ax25;
use soar_aprs::callsign::Callsign;
use soar_aprs::config::EngineConfig;
use soar_aprs::kiss;
use soar_aprs::station_store::StationStore;
use soar_aprs::Engine;

fn t(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

fn kiss_frame(source: &str, path: &[&str], info: &[u8]) -> Vec<u8> {
    let source = Callsign::parse(source).unwrap();
    let dest = Callsign::parse("APRS").unwrap();
    let digis: Vec<Callsign> = path.iter().map(|c| Callsign::parse(c).unwrap()).collect();
    let ax25 = ax25::build_ui_frame(&source, &dest, &digis, info).unwrap();
    kiss::encode_frame(0, &ax25)
}

/// Scenario 1: a direct-RF position report with no digipeater path.
#[test]
fn direct_rf_position_report() {
    let mut engine = Engine::new(EngineConfig::default(), StationStore::new()).unwrap();
    let frame = kiss_frame("N1ABC-9", &[], b"!4210.45N/07153.00W>Hello");
    engine.ingest_bytes(&frame, t(0));

    let station = engine.store().station("N1ABC-9").unwrap();
    let pos = station.last_position.as_ref().unwrap();
    assert!((pos.lat - 42.1742).abs() < 0.001);
    assert!((pos.lon - -71.8833).abs() < 0.001);
    assert_eq!(station.hop_count(), 0);
    assert!(station.heard_zero_hop());
    assert_eq!(station.zero_hop_packet_count(), 1);
}

/// Scenario 2: the same packet heard twice, once direct and once relayed
/// through a digipeater, 5 seconds apart. Dedup suppresses the re-parse and
/// the packets_heard counter, but both receptions (and the digipeater's
/// first-hop credit) are retained.
#[test]
fn digipeated_copy_is_deduped_but_path_is_recorded() {
    let mut engine = Engine::new(EngineConfig::default(), StationStore::new()).unwrap();
    let info = b"!4210.45N/07153.00W>Hello";

    let direct = kiss_frame("N1ABC-9", &[], info);
    engine.ingest_bytes(&direct, t(0));

    let digipeated = kiss_frame("N1ABC-9", &["N0DIGI*", "WIDE1-1"], info);
    engine.ingest_bytes(&digipeated, t(5));

    let station = engine.store().station("N1ABC-9").unwrap();
    assert_eq!(station.packets_heard, 1);
    assert_eq!(station.receptions.len(), 2);
    assert_eq!(station.digipeaters_heard_by, vec!["N0DIGI".to_string()]);
    assert_eq!(station.hop_count(), 0);
}

/// Scenario 3: a position packet whose symbol code marks it as a weather
/// report; wind/gust/temp/rain/humidity/pressure are all extracted
/// alongside the position.
#[test]
fn weather_fields_extracted_alongside_position() {
    let mut engine = Engine::new(EngineConfig::default(), StationStore::new()).unwrap();
    let info = b"!4210.45N/07153.00W_180/010g015t072r000p000P000h65b10130";
    let frame = kiss_frame("KC1ABC-2", &[], info);
    engine.ingest_bytes(&frame, t(0));

    let station = engine.store().station("KC1ABC-2").unwrap();
    let sample = station.weather_history.last().unwrap();
    assert_eq!(sample.weather.wind_direction_deg, Some(180));
    assert_eq!(sample.weather.wind_speed_mph, Some(10.0));
    assert_eq!(sample.weather.wind_gust_mph, Some(15.0));
    assert_eq!(sample.weather.temperature_f, Some(72.0));
    assert_eq!(sample.weather.humidity_pct, Some(65));
    assert_eq!(sample.weather.pressure_mb, Some(1013.0));
    assert!(station.last_position.is_some());
}

/// Scenario 4: a sent message gets acknowledged by a reply from an SSID
/// other than the one it was addressed to (SSID-loose / base-call match).
#[test]
fn sent_message_acked_with_ssid_loose_match() {
    let mut config = EngineConfig::default();
    config.my_callsign = "MYCALL".to_string();
    let mut engine = Engine::new(config, StationStore::new()).unwrap();
    engine
        .messages_mut()
        .add_sent_message("W1XYZ", "hello", Some("A1B2C"), t(0));
    assert!(!engine.messages().sent_messages()[0].ack_received);

    let ack_frame = kiss_frame("W1XYZ-7", &[], b":MYCALL-0 :ackA1B2C");
    engine.ingest_bytes(&ack_frame, t(1));

    assert!(engine.messages().sent_messages()[0].ack_received);
}

/// Scenario 2 (third-party variant): a packet wrapped by an iGate relay is
/// observed under its inner source callsign, never direct, with the relay
/// recorded.
#[test]
fn igated_third_party_packet_is_not_direct() {
    let mut engine = Engine::new(EngineConfig::default(), StationStore::new()).unwrap();
    let info = b"}N1ABC>APRS,WIDE1-1:!4210.45N/07153.00W>Hello";
    let frame = kiss_frame("CWOP1", &[], info);
    engine.ingest_bytes(&frame, t(0));

    assert!(engine.store().station("CWOP1").is_none());
    let station = engine.store().station("N1ABC").unwrap();
    assert!(!station.heard_direct());
    assert_eq!(station.hop_count(), 999);
    assert_eq!(station.relay_paths(), vec!["CWOP1".to_string()]);
}
