//! AX.25/APRS callsign parsing and canonical-form handling.
//!
//! A callsign is a 1-6 character alphanumeric base plus an optional SSID
//! (0-15). `K1FSY` and `K1FSY-0` name the same station; the canonical key
//! used everywhere stations are looked up strips an explicit `-0`.

use crate::error::EngineError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Callsign {
    base: String,
    ssid: u8,
}

impl Callsign {
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let raw = raw.trim().trim_end_matches('*');
        let (base, ssid) = match raw.split_once('-') {
            Some((base, ssid_str)) => {
                let ssid: u8 = ssid_str
                    .parse()
                    .map_err(|_| EngineError::Frame(format!("bad SSID in {raw:?}")))?;
                if ssid > 15 {
                    return Err(EngineError::Frame(format!("SSID out of range in {raw:?}")));
                }
                (base, ssid)
            }
            None => (raw, 0),
        };
        if base.is_empty() || base.len() > 6 {
            return Err(EngineError::Frame(format!(
                "callsign base length out of range: {raw:?}"
            )));
        }
        if !base.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(EngineError::Frame(format!(
                "callsign base has non-alphanumeric characters: {raw:?}"
            )));
        }
        Ok(Callsign {
            base: base.to_ascii_uppercase(),
            ssid,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    /// The key used for station-store lookups: base only when SSID is 0,
    /// otherwise `BASE-SSID`.
    pub fn canonical_key(&self) -> String {
        if self.ssid == 0 {
            self.base.clone()
        } else {
            format!("{}-{}", self.base, self.ssid)
        }
    }

    /// Full `BASE-SSID` form, always including the SSID even when zero.
    pub fn full(&self) -> String {
        format!("{}-{}", self.base, self.ssid)
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_callsign() {
        let c = Callsign::parse("k1fsy").unwrap();
        assert_eq!(c.base(), "K1FSY");
        assert_eq!(c.ssid(), 0);
        assert_eq!(c.canonical_key(), "K1FSY");
    }

    #[test]
    fn parses_ssid() {
        let c = Callsign::parse("K1FSY-9").unwrap();
        assert_eq!(c.ssid(), 9);
        assert_eq!(c.canonical_key(), "K1FSY-9");
    }

    #[test]
    fn zero_ssid_normalizes_to_base() {
        let a = Callsign::parse("K1FSY").unwrap();
        let b = Callsign::parse("K1FSY-0").unwrap();
        assert_eq!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn strips_trailing_digi_marker() {
        let c = Callsign::parse("WIDE1-1*").unwrap();
        assert_eq!(c.canonical_key(), "WIDE1-1");
    }

    #[test]
    fn rejects_bad_ssid() {
        assert!(Callsign::parse("K1FSY-16").is_err());
        assert!(Callsign::parse("K1FSY-AB").is_err());
    }

    #[test]
    fn rejects_too_long_base() {
        assert!(Callsign::parse("TOOLONGCALL").is_err());
    }
}
