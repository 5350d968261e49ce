//! Geographic helpers: Maidenhead grid squares, dew point, sea-level
//! pressure adjustment, and great-circle distance for position-history
//! pruning (C2 supplemental, C3 retention).

use crate::error::EngineError;

// Longitude spans 360 degrees across the same 18-cell grid latitude spans
// 180 degrees over, so every tier's longitude cell is twice its latitude
// cell: 20x10 degree fields, 2x1 degree squares, 5'x2.5' subsquares, and so
// on down.
const GRID_FIELD_LON: f64 = 20.0;
const GRID_FIELD_LAT: f64 = 10.0;
const GRID_SQUARE_LON: f64 = 2.0;
const GRID_SQUARE_LAT: f64 = 1.0;
const GRID_SUBSQUARE_LON: f64 = GRID_SQUARE_LON / 24.0;
const GRID_SUBSQUARE_LAT: f64 = GRID_SQUARE_LAT / 24.0;
const GRID_EXTSQUARE_LON: f64 = GRID_SUBSQUARE_LON / 10.0;
const GRID_EXTSQUARE_LAT: f64 = GRID_SUBSQUARE_LAT / 10.0;
const GRID_EXTSUBSQUARE_LON: f64 = GRID_EXTSQUARE_LON / 24.0;
const GRID_EXTSUBSQUARE_LAT: f64 = GRID_EXTSQUARE_LAT / 24.0;

/// Encodes a coordinate to a Maidenhead grid square at the given precision
/// (2, 4, 6, 8, or 10 characters).
pub fn latlon_to_maidenhead(lat: f64, lon: f64, precision: u8) -> Result<String, EngineError> {
    if !(2..=10).contains(&precision) || precision % 2 != 0 {
        return Err(EngineError::Coord(format!(
            "unsupported maidenhead precision: {precision}"
        )));
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(EngineError::Coord(format!("coordinate out of range: ({lat}, {lon})")));
    }

    let adj_lon = lon + 180.0;
    let adj_lat = lat + 90.0;

    let mut out = String::with_capacity(precision as usize);

    let field_lon = (adj_lon / GRID_FIELD_LON) as u32;
    let field_lat = (adj_lat / GRID_FIELD_LAT) as u32;
    out.push((b'A' + field_lon as u8) as char);
    out.push((b'A' + field_lat as u8) as char);

    let rem_lon = adj_lon - field_lon as f64 * GRID_FIELD_LON;
    let rem_lat = adj_lat - field_lat as f64 * GRID_FIELD_LAT;

    if precision >= 4 {
        let sq_lon = (rem_lon / GRID_SQUARE_LON) as u32;
        let sq_lat = (rem_lat / GRID_SQUARE_LAT) as u32;
        out.push_str(&sq_lon.to_string());
        out.push_str(&sq_lat.to_string());
    }

    let rem_lon2 = rem_lon - (rem_lon / GRID_SQUARE_LON) as u32 as f64 * GRID_SQUARE_LON;
    let rem_lat2 = rem_lat - (rem_lat / GRID_SQUARE_LAT) as u32 as f64 * GRID_SQUARE_LAT;

    if precision >= 6 {
        let sub_lon = (rem_lon2 / GRID_SUBSQUARE_LON) as u32;
        let sub_lat = (rem_lat2 / GRID_SUBSQUARE_LAT) as u32;
        out.push((b'a' + sub_lon as u8) as char);
        out.push((b'a' + sub_lat as u8) as char);

        let rem_lon3 = rem_lon2 - sub_lon as f64 * GRID_SUBSQUARE_LON;
        let rem_lat3 = rem_lat2 - sub_lat as f64 * GRID_SUBSQUARE_LAT;

        if precision >= 8 {
            let ext_lon = (rem_lon3 / GRID_EXTSQUARE_LON) as u32;
            let ext_lat = (rem_lat3 / GRID_EXTSQUARE_LAT) as u32;
            out.push_str(&ext_lon.to_string());
            out.push_str(&ext_lat.to_string());

            if precision >= 10 {
                let rem_lon4 = rem_lon3 - ext_lon as f64 * GRID_EXTSQUARE_LON;
                let rem_lat4 = rem_lat3 - ext_lat as f64 * GRID_EXTSQUARE_LAT;
                let extsub_lon = (rem_lon4 / GRID_EXTSUBSQUARE_LON) as u32;
                let extsub_lat = (rem_lat4 / GRID_EXTSUBSQUARE_LAT) as u32;
                out.push((b'a' + extsub_lon as u8) as char);
                out.push((b'a' + extsub_lat as u8) as char);
            }
        }
    }

    Ok(out)
}

/// Decodes a Maidenhead grid square back to the coordinate at its center.
pub fn maidenhead_to_latlon(grid: &str) -> Result<(f64, f64), EngineError> {
    let chars: Vec<char> = grid.chars().collect();
    if chars.len() < 2 || chars.len() % 2 != 0 || chars.len() > 10 {
        return Err(EngineError::Coord(format!("invalid maidenhead length: {grid:?}")));
    }

    let field_lon = chars[0].to_ascii_uppercase() as i32 - 'A' as i32;
    let field_lat = chars[1].to_ascii_uppercase() as i32 - 'A' as i32;
    if !(0..18).contains(&field_lon) || !(0..18).contains(&field_lat) {
        return Err(EngineError::Coord(format!("invalid field letters: {grid:?}")));
    }

    let mut lon = field_lon as f64 * GRID_FIELD_LON;
    let mut lat = field_lat as f64 * GRID_FIELD_LAT;
    let mut cell_lon = GRID_FIELD_LON;
    let mut cell_lat = GRID_FIELD_LAT;

    if chars.len() >= 4 {
        let sq_lon = chars[2].to_digit(10).ok_or_else(|| EngineError::Coord("bad square digit".into()))? as f64;
        let sq_lat = chars[3].to_digit(10).ok_or_else(|| EngineError::Coord("bad square digit".into()))? as f64;
        lon += sq_lon * GRID_SQUARE_LON;
        lat += sq_lat * GRID_SQUARE_LAT;
        cell_lon = GRID_SQUARE_LON;
        cell_lat = GRID_SQUARE_LAT;
    }

    if chars.len() >= 6 {
        let sub_lon = chars[4].to_ascii_lowercase() as i32 - 'a' as i32;
        let sub_lat = chars[5].to_ascii_lowercase() as i32 - 'a' as i32;
        lon += sub_lon as f64 * GRID_SUBSQUARE_LON;
        lat += sub_lat as f64 * GRID_SUBSQUARE_LAT;
        cell_lon = GRID_SUBSQUARE_LON;
        cell_lat = GRID_SUBSQUARE_LAT;
    }

    if chars.len() >= 8 {
        let ext_lon = chars[6].to_digit(10).ok_or_else(|| EngineError::Coord("bad ext digit".into()))? as f64;
        let ext_lat = chars[7].to_digit(10).ok_or_else(|| EngineError::Coord("bad ext digit".into()))? as f64;
        lon += ext_lon * GRID_EXTSQUARE_LON;
        lat += ext_lat * GRID_EXTSQUARE_LAT;
        cell_lon = GRID_EXTSQUARE_LON;
        cell_lat = GRID_EXTSQUARE_LAT;
    }

    if chars.len() >= 10 {
        let extsub_lon = chars[8].to_ascii_lowercase() as i32 - 'a' as i32;
        let extsub_lat = chars[9].to_ascii_lowercase() as i32 - 'a' as i32;
        lon += extsub_lon as f64 * GRID_EXTSUBSQUARE_LON;
        lat += extsub_lat as f64 * GRID_EXTSUBSQUARE_LAT;
        cell_lon = GRID_EXTSUBSQUARE_LON;
        cell_lat = GRID_EXTSUBSQUARE_LAT;
    }

    // Center of the smallest resolved cell.
    lon += cell_lon / 2.0;
    lat += cell_lat / 2.0;

    Ok((lat - 90.0, lon - 180.0))
}

/// Magnus-formula dew point from temperature (F) and relative humidity (%).
pub fn dew_point_f(temp_f: f64, humidity_pct: f64) -> f64 {
    const A: f64 = 17.27;
    const B: f64 = 237.3;
    let temp_c = (temp_f - 32.0) * 5.0 / 9.0;
    let rh = (humidity_pct / 100.0).clamp(0.0001, 1.0);
    let alpha = (A * temp_c) / (B + temp_c) + rh.ln();
    let dew_c = (B * alpha) / (A - alpha);
    dew_c * 9.0 / 5.0 + 32.0
}

/// Adjusts a station-level pressure reading to sea level via the
/// barometric formula, given station altitude in meters and temperature in
/// Fahrenheit.
pub fn sea_level_pressure_mb(station_mb: f64, altitude_m: f64, temp_f: f64) -> f64 {
    let temp_k = (temp_f - 32.0) * 5.0 / 9.0 + 273.15;
    station_mb * (1.0 - (0.0065 * altitude_m) / (temp_k + 0.0065 * altitude_m)).powf(-5.257)
}

/// Great-circle distance in meters (mean Earth radius 6,371,000 m), used
/// for movement-aware position-history pruning.
pub fn haversine_distance_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    const R_M: f64 = 6_371_000.0;
    let (lat1, lon1) = a;
    let (lat2, lon2) = b;
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * R_M * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_square_roundtrip_approx() {
        let grid = latlon_to_maidenhead(42.36, -71.06, 6).unwrap();
        let (lat, lon) = maidenhead_to_latlon(&grid).unwrap();
        assert!((lat - 42.36).abs() < 0.05);
        assert!((lon - -71.06).abs() < 0.05);
    }

    #[test]
    fn grid_square_exact_roundtrip_via_center() {
        for grid in ["FN42", "FN42ab", "JO65du", "AA00aa", "RR99xx"] {
            let (lat, lon) = maidenhead_to_latlon(grid).unwrap();
            let re_encoded = latlon_to_maidenhead(lat, lon, grid.len() as u8).unwrap();
            assert_eq!(re_encoded, grid, "center of {grid} re-encoded as {re_encoded}");
        }
    }

    #[test]
    fn grid_square_known_value() {
        // FN42 covers most of eastern Massachusetts.
        let grid = latlon_to_maidenhead(42.36, -71.06, 4).unwrap();
        assert!(grid.starts_with("FN4"));
    }

    #[test]
    fn rejects_bad_precision() {
        assert!(latlon_to_maidenhead(0.0, 0.0, 3).is_err());
    }

    #[test]
    fn dew_point_sane() {
        let dp = dew_point_f(70.0, 50.0);
        assert!(dp < 70.0 && dp > 40.0);
    }

    #[test]
    fn haversine_zero_for_same_point() {
        assert_eq!(haversine_distance_m((42.0, -71.0), (42.0, -71.0)), 0.0);
    }

    #[test]
    fn haversine_known_distance() {
        // Roughly 1 degree of latitude ~= 111,000 m.
        let d = haversine_distance_m((42.0, -71.0), (43.0, -71.0));
        assert!((d - 111_000.0).abs() < 2000.0);
    }
}
