//! Duplicate-packet detection (C4): MD5 hash of `CALLSIGN:info` over a
//! fixed 30-second sliding window.

use chrono::{DateTime, Duration, Utc};
use md5::{Digest, Md5};
use std::collections::HashMap;

const WINDOW_SECONDS: i64 = 30;

#[derive(Debug, Default)]
pub struct DuplicateDetector {
    seen: HashMap<String, DateTime<Utc>>,
}

impl DuplicateDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash_of(callsign: &str, info: &str) -> String {
        let mut hasher = Md5::new();
        hasher.update(format!("{}:{}", callsign.to_ascii_uppercase(), info));
        let digest = hasher.finalize();
        hex::encode(digest)
    }

    /// Evicts expired entries, then checks-and-inserts. Returns `true` if
    /// this exact `(callsign, info)` pair was already seen within the
    /// window.
    pub fn is_duplicate(&mut self, callsign: &str, info: &str, now: DateTime<Utc>) -> bool {
        self.evict_expired(now);
        let hash = Self::hash_of(callsign, info);
        if self.seen.contains_key(&hash) {
            metrics::counter!("dedupe.duplicates_total").increment(1);
            true
        } else {
            self.seen.insert(hash, now);
            false
        }
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(WINDOW_SECONDS);
        self.seen.retain(|_, ts| *ts >= cutoff);
    }

    pub fn tracked_count(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn first_sighting_is_not_duplicate() {
        let mut d = DuplicateDetector::new();
        assert!(!d.is_duplicate("K1FSY-9", "!4238.12N/07105.45W>", t(0)));
    }

    #[test]
    fn repeated_within_window_is_duplicate() {
        let mut d = DuplicateDetector::new();
        assert!(!d.is_duplicate("K1FSY-9", "payload", t(0)));
        assert!(d.is_duplicate("K1FSY-9", "payload", t(10)));
    }

    #[test]
    fn expires_after_window() {
        let mut d = DuplicateDetector::new();
        assert!(!d.is_duplicate("K1FSY-9", "payload", t(0)));
        assert!(!d.is_duplicate("K1FSY-9", "payload", t(31)));
    }

    #[test]
    fn callsign_case_insensitive() {
        let mut d = DuplicateDetector::new();
        assert!(!d.is_duplicate("k1fsy-9", "payload", t(0)));
        assert!(d.is_duplicate("K1FSY-9", "payload", t(1)));
    }
}
