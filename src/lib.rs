//! APRS packet-processing and station-tracking engine: AX.25-over-KISS
//! ingress, dialect-aware APRS parsing, event-sourced station tracking,
//! message delivery with retry, weather history with Zambretti forecasting,
//! and atomic snapshot persistence.

pub mod ax25;
pub mod aprs_parser;
pub mod aprs_types;
pub mod beacon;
pub mod callsign;
pub mod config;
pub mod dedupe;
pub mod device_id;
pub mod engine;
pub mod error;
pub mod geo;
pub mod kiss;
pub mod log_format;
pub mod message_tracker;
pub mod migrations;
pub mod persistence;
pub mod station_store;
pub mod zambretti;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use station_store::StationStore;
