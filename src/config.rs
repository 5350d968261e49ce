//! Engine configuration (ambient stack): a flat key-value config loaded
//! from, in increasing priority: built-in defaults, an optional TOML file,
//! environment variables (`SOAR_APRS_<KEY>`), then CLI flags.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub my_callsign: String,
    pub my_alias: String,
    /// `MYLOCATION`: Maidenhead grid, used as the beacon position source
    /// when no GPS fix is locked.
    pub my_location: Option<String>,
    /// `UNPROTO`: default destination + via path for outbound UI frames,
    /// e.g. `APRS via WIDE1-1,WIDE2-1`.
    pub unproto: String,
    /// `MONITOR`: emit every heard packet to the observer, not just ones
    /// addressed to us.
    pub monitor: bool,
    /// `AUTO_ACK`: send `ackNNNNN` automatically on receipt of a message.
    pub auto_ack: bool,
    /// `DIGIPEATER`: repeat frames whose next path hop matches our
    /// callsign or alias.
    pub digipeater_enabled: bool,
    pub beacon_enabled: bool,
    pub beacon_interval_seconds: i64,
    /// `BEACON_PATH`: digipeater path used for our own beacons.
    pub beacon_path: Vec<String>,
    pub symbol_table: char,
    pub symbol_code: char,
    pub beacon_comment: String,
    pub last_beacon: Option<chrono::DateTime<chrono::Utc>>,
    pub station_altitude_m: Option<f64>,
    pub db_path: String,
    pub log_level: String,
    pub max_retries: u32,
    pub retry_fast_seconds: i64,
    pub retry_slow_seconds: i64,
    pub northern_hemisphere: bool,
    pub utc_offset_hours: i64,
    pub stale_station_ttl_hours: i64,
    /// `WX_ENABLE`: poll a PWS and include weather in beacons.
    pub wx_enable: bool,
    /// `WX_BACKEND`: driver identifier for the PWS (serial/HTTP poll/etc),
    /// opaque to the core engine.
    pub wx_backend: String,
    pub wx_address: String,
    pub wx_port: u16,
    /// `WX_INTERVAL`: PWS poll period in seconds, range 30-3600.
    pub wx_interval_seconds: u32,
    /// `WX_AVERAGE_WIND`: vector-average wind over the beacon interval
    /// instead of sending the latest instantaneous sample.
    pub wx_average_wind: bool,
    /// `WXTREND`: Zambretti trend threshold in mb/hr.
    pub wx_trend_threshold: f64,
    pub disable_migrations: bool,
    pub debug_buffer: bool,
    pub debug_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            my_callsign: "N0CALL".to_string(),
            my_alias: "WIDE1-1".to_string(),
            my_location: None,
            unproto: "APRS".to_string(),
            monitor: false,
            auto_ack: true,
            digipeater_enabled: false,
            beacon_enabled: true,
            beacon_interval_seconds: 600,
            beacon_path: Vec::new(),
            symbol_table: '/',
            symbol_code: '-',
            beacon_comment: String::new(),
            last_beacon: None,
            station_altitude_m: None,
            db_path: "stations.db".to_string(),
            log_level: "info".to_string(),
            max_retries: 3,
            retry_fast_seconds: 20,
            retry_slow_seconds: 600,
            northern_hemisphere: true,
            utc_offset_hours: 0,
            stale_station_ttl_hours: 24 * 7,
            wx_enable: false,
            wx_backend: String::new(),
            wx_address: String::new(),
            wx_port: 0,
            wx_interval_seconds: 300,
            wx_average_wind: true,
            wx_trend_threshold: 0.3,
            disable_migrations: false,
            debug_buffer: false,
            debug_buffer_size: 200,
        }
    }
}

impl EngineConfig {
    /// Loads config from, in increasing priority: built-in defaults, an
    /// optional TOML file, then `SOAR_APRS_<KEY>` environment variables.
    /// CLI flag overrides are applied by the caller afterward via the
    /// `apply_*` setters, matching clap's own precedence over everything
    /// else.
    pub fn load(toml_path: Option<&Path>) -> Result<Self, EngineError> {
        let mut config = EngineConfig::default();

        if let Some(path) = toml_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| EngineError::Config(format!("failed to read {path:?}: {e}")))?;
            config = toml::from_str(&contents)
                .map_err(|e| EngineError::Config(format!("invalid TOML in {path:?}: {e}")))?;
        }

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), EngineError> {
        macro_rules! env_str {
            ($key:literal, $field:expr) => {
                if let Ok(val) = std::env::var(concat!("SOAR_APRS_", $key)) {
                    $field = val;
                }
            };
        }
        macro_rules! env_parse {
            ($key:literal, $field:expr, $ty:ty) => {
                if let Ok(val) = std::env::var(concat!("SOAR_APRS_", $key)) {
                    $field = val.parse::<$ty>().map_err(|_| {
                        EngineError::Config(format!(
                            concat!("invalid value for SOAR_APRS_", $key, ": {}"),
                            val
                        ))
                    })?;
                }
            };
        }

        env_str!("MY_CALLSIGN", self.my_callsign);
        env_str!("MY_ALIAS", self.my_alias);
        env_str!("UNPROTO", self.unproto);
        env_str!("DB_PATH", self.db_path);
        env_str!("LOG_LEVEL", self.log_level);
        env_str!("BEACON_COMMENT", self.beacon_comment);
        env_str!("WX_BACKEND", self.wx_backend);
        env_str!("WX_ADDRESS", self.wx_address);
        env_parse!("MONITOR", self.monitor, bool);
        env_parse!("AUTO_ACK", self.auto_ack, bool);
        env_parse!("DIGIPEATER", self.digipeater_enabled, bool);
        env_parse!("BEACON_ENABLED", self.beacon_enabled, bool);
        env_parse!("BEACON_INTERVAL_SECONDS", self.beacon_interval_seconds, i64);
        env_parse!("MAX_RETRIES", self.max_retries, u32);
        env_parse!("RETRY_FAST_SECONDS", self.retry_fast_seconds, i64);
        env_parse!("RETRY_SLOW_SECONDS", self.retry_slow_seconds, i64);
        env_parse!("NORTHERN_HEMISPHERE", self.northern_hemisphere, bool);
        env_parse!("UTC_OFFSET_HOURS", self.utc_offset_hours, i64);
        env_parse!("STALE_STATION_TTL_HOURS", self.stale_station_ttl_hours, i64);
        env_parse!("WX_ENABLE", self.wx_enable, bool);
        env_parse!("WX_PORT", self.wx_port, u16);
        env_parse!("WX_INTERVAL", self.wx_interval_seconds, u32);
        env_parse!("WX_AVERAGE_WIND", self.wx_average_wind, bool);
        env_parse!("WXTREND", self.wx_trend_threshold, f64);
        env_parse!("DISABLE_MIGRATIONS", self.disable_migrations, bool);
        env_parse!("DEBUG_BUFFER", self.debug_buffer, bool);
        env_parse!("DEBUG_BUFFER_SIZE", self.debug_buffer_size, usize);

        if let Ok(val) = std::env::var("SOAR_APRS_STATION_ALTITUDE_M") {
            self.station_altitude_m = Some(
                val.parse()
                    .map_err(|_| EngineError::Config(format!("invalid SOAR_APRS_STATION_ALTITUDE_M: {val}")))?,
            );
        }
        if let Ok(val) = std::env::var("SOAR_APRS_MYLOCATION") {
            self.my_location = Some(val);
        }
        if let Ok(val) = std::env::var("SOAR_APRS_BEACON_PATH") {
            self.beacon_path = val.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }

        if self.wx_interval_seconds != 0 && !(30..=3600).contains(&self.wx_interval_seconds) {
            return Err(EngineError::Config(format!(
                "wx_interval_seconds must be in 30..=3600, got {}",
                self.wx_interval_seconds
            )));
        }

        Ok(())
    }

    /// Validates the assembled config, rejecting out-of-range values rather
    /// than silently clamping them.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.my_callsign.trim().is_empty() {
            return Err(EngineError::Config("my_callsign must not be empty".into()));
        }
        if self.beacon_interval_seconds <= 0 {
            return Err(EngineError::Config("beacon_interval_seconds must be positive".into()));
        }
        if self.retry_fast_seconds <= 0 || self.retry_slow_seconds <= 0 {
            return Err(EngineError::Config("retry intervals must be positive".into()));
        }
        Ok(())
    }

    /// Atomically persists the config back to a TOML file (e.g. after CLI
    /// flags are merged in), matching the teacher's write-tmp-then-rename
    /// convention.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;
        let contents = toml::to_string_pretty(self).context("failed to serialize config to TOML")?;
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, &contents).with_context(|| format!("failed to write {tmp_path:?}"))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename {tmp_path:?} to {path:?}"))?;
        Ok(())
    }
}
