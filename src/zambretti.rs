//! Zambretti forecast (C7): the 1915 barometer/wind/season forecasting
//! method, transcribed from the original's pressure-bucket + lookup-table
//! design.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

const BARO_TOP: f64 = 1050.0;
const BARO_BOTTOM: f64 = 950.0;
const BUCKET_COUNT: usize = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PressureTrend {
    Rising,
    Steady,
    Falling,
}

/// The 26 canned Zambretti forecast strings, indexed A (0, best) to Z (25,
/// worst).
pub const FORECASTS: [&str; 26] = [
    "Settled fine",
    "Fine weather",
    "Becoming fine",
    "Fine, becoming less settled",
    "Fine, possible showers",
    "Fairly fine, improving",
    "Fairly fine, possible showers early",
    "Fairly fine, showery later",
    "Showery early, improving",
    "Changeable, mending",
    "Fairly fine, showers likely",
    "Rather unsettled clearing later",
    "Unsettled, probably improving",
    "Showery, bright intervals",
    "Showery, becoming less settled",
    "Changeable, some rain",
    "Unsettled, short fine intervals",
    "Unsettled, rain later",
    "Unsettled, some rain",
    "Mostly very unsettled",
    "Occasional rain, worsening",
    "Rain at times, very unsettled",
    "Rain at frequent intervals",
    "Rain, very unsettled",
    "Stormy, may improve",
    "Stormy, much rain",
];

// Forecast-code index per pressure bucket (0 = lowest pressure, 21 =
// highest), one table per trend.
const RISE_OPTIONS: [usize; BUCKET_COUNT] = [
    25, 25, 25, 24, 24, 19, 16, 12, 11, 9, 8, 6, 5, 2, 1, 1, 0, 0, 0, 0, 0, 0,
];
const STEADY_OPTIONS: [usize; BUCKET_COUNT] = [
    25, 25, 25, 25, 25, 25, 23, 23, 22, 18, 15, 13, 10, 4, 1, 1, 0, 0, 0, 0, 0, 0,
];
const FALL_OPTIONS: [usize; BUCKET_COUNT] = [
    25, 25, 25, 25, 25, 25, 25, 25, 23, 23, 21, 20, 17, 14, 7, 3, 1, 1, 1, 0, 0, 0,
];

/// One named 16-point compass direction and its bearing in degrees.
const WIND_POINTS: [(&str, f64); 16] = [
    ("N", 0.0), ("NNE", 22.5), ("NE", 45.0), ("ENE", 67.5),
    ("E", 90.0), ("ESE", 112.5), ("SE", 135.0), ("SSE", 157.5),
    ("S", 180.0), ("SSW", 202.5), ("SW", 225.0), ("WSW", 247.5),
    ("W", 270.0), ("WNW", 292.5), ("NW", 315.0), ("NNW", 337.5),
];

/// Wind-direction pressure nudge, in percent of the 100 mb bucket range,
/// keyed by nearest 16-point compass direction. Mirrored for the southern
/// hemisphere (`NORTH` rotated by 8 points = 180 degrees).
const WIND_ADJUST_NORTH_PCT: [(&str, f64); 16] = [
    ("N", 6.0), ("NNE", 5.0), ("NE", 5.0), ("ENE", 2.0),
    ("E", -0.5), ("ESE", -2.0), ("SE", -5.0), ("SSE", -8.5),
    ("S", -12.0), ("SSW", -10.0), ("SW", -6.0), ("WSW", -4.5),
    ("W", -3.0), ("WNW", -0.5), ("NW", 1.5), ("NNW", 3.0),
];

/// Finds the nearest of the 16 named compass points to `deg`.
fn nearest_cardinal(deg: u16) -> &'static str {
    let deg = deg as f64;
    WIND_POINTS
        .iter()
        .min_by(|(_, a), (_, b)| {
            let da = (deg - a).abs().min(360.0 - (deg - a).abs());
            let db = (deg - b).abs().min(360.0 - (deg - b).abs());
            da.partial_cmp(&db).unwrap()
        })
        .map(|(name, _)| *name)
        .unwrap()
}

/// Pressure adjustment (in mb) for a wind direction, added to the raw
/// pressure before bucketing. The southern-hemisphere table is the northern
/// one rotated 8 points (180 degrees), since cyclonic systems rotate the
/// other way below the equator.
fn wind_pressure_adjustment_mb(deg: u16, northern_hemisphere: bool, z_range: f64) -> f64 {
    let lookup_deg = if northern_hemisphere { deg } else { (deg + 180) % 360 };
    let cardinal = nearest_cardinal(lookup_deg);
    let pct = WIND_ADJUST_NORTH_PCT
        .iter()
        .find(|(name, _)| *name == cardinal)
        .map(|(_, pct)| *pct)
        .unwrap_or(0.0);
    (pct / 100.0) * z_range
}

/// Returns `true` for the local summer half of the year (Apr-Sep in the
/// northern hemisphere, Oct-Mar in the southern).
fn is_summer(month: u32, northern_hemisphere: bool) -> bool {
    let northern_summer = (4..=9).contains(&month);
    if northern_hemisphere {
        northern_summer
    } else {
        !northern_summer
    }
}

pub struct ZambrettiForecast {
    pub code: char,
    pub text: &'static str,
}

/// Computes the Zambretti forecast for a station-level pressure reading.
///
/// `wind_direction_deg` and `northern_hemisphere` are optional refinements;
/// when wind direction is unknown, only the pressure/trend/season
/// adjustment applies.
pub fn calculate_zambretti_code(
    pressure_mb: f64,
    trend: PressureTrend,
    wind_direction_deg: Option<u16>,
    at: DateTime<Utc>,
    northern_hemisphere: bool,
) -> ZambrettiForecast {
    let z_range = BARO_TOP - BARO_BOTTOM;
    let z_constant = z_range / BUCKET_COUNT as f64;

    let mut z_hpa = pressure_mb;

    if let Some(deg) = wind_direction_deg {
        z_hpa += wind_pressure_adjustment_mb(deg, northern_hemisphere, z_range);
    }

    // Northern-hemisphere summer and southern-hemisphere winter both nudge
    // the forecast toward "improving" on a rising trend, and toward
    // "worsening" on a falling one.
    let seasonal_shift_applies = if northern_hemisphere {
        is_summer(at.month(), northern_hemisphere)
    } else {
        !is_summer(at.month(), northern_hemisphere)
    };
    if seasonal_shift_applies {
        match trend {
            PressureTrend::Rising => z_hpa += 0.07 * z_range,
            PressureTrend::Falling => z_hpa -= 0.07 * z_range,
            PressureTrend::Steady => {}
        }
    }

    if z_hpa >= BARO_TOP {
        z_hpa = BARO_TOP - 1.0;
    }

    let z_option = (((z_hpa - BARO_BOTTOM) / z_constant) as i32).clamp(0, BUCKET_COUNT as i32 - 1);

    let table = match trend {
        PressureTrend::Rising => &RISE_OPTIONS,
        PressureTrend::Steady => &STEADY_OPTIONS,
        PressureTrend::Falling => &FALL_OPTIONS,
    };
    let code_idx = table[z_option as usize];

    ZambrettiForecast {
        code: (b'A' + code_idx as u8) as char,
        text: FORECASTS[code_idx],
    }
}

/// Auto-detects whether a raw "bXXXXX" APRS pressure field is tenths of mb
/// (the normal case) or, rarely, hundredths of inHg, and returns mb.
pub fn parse_pressure_field(raw: &str) -> Option<f64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).take(5).collect();
    if digits.len() != 5 {
        return None;
    }
    let value: f64 = digits.parse().ok()?;
    let mb = value / 10.0;
    if (900.0..=1100.0).contains(&mb) {
        Some(mb)
    } else {
        // Fall back to hundredths-of-inHg interpretation.
        let inhg = value / 100.0;
        Some(inhg * 33.8639)
    }
}
