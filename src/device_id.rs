//! Device fingerprinting (C2 supplemental): identifies the originating
//! hardware/software from its destination callsign (tocall) or, for MIC-E
//! packets, from the destination-address encoding itself.
//!
//! The original loads a large external YAML database (the hessu/aprs-deviceid
//! project) that isn't part of this crate's sources. This table carries a
//! small representative set of well-known tocalls; unknown prefixes fall
//! through to `Unknown`.

use crate::aprs_types::DeviceInfo;

struct TocallEntry {
    pattern: &'static str,
    identifier: &'static str,
    class: &'static str,
    description: &'static str,
}

/// `?` matches any single character, `n` matches a digit, `*` matches the
/// rest of the string. Longest literal-character match wins on ambiguity.
const TOCALLS: &[TocallEntry] = &[
    TocallEntry { pattern: "APRS", identifier: "generic", class: "software", description: "Generic APRS software" },
    TocallEntry { pattern: "APDR??", identifier: "dire-wolf", class: "software", description: "Dire Wolf soundcard TNC" },
    TocallEntry { pattern: "APOT??", identifier: "other", class: "software", description: "Other APRS software" },
    TocallEntry { pattern: "APYSQ?", identifier: "ysf", class: "gateway", description: "YSF-to-APRS gateway" },
    TocallEntry { pattern: "APMI0?", identifier: "apmi0x", class: "tracker", description: "Mic-Pro tracker" },
    TocallEntry { pattern: "APWW??", identifier: "winwin", class: "software", description: "WinWin/WinAPRS" },
    TocallEntry { pattern: "APX2??", identifier: "xastir", class: "software", description: "Xastir" },
    TocallEntry { pattern: "APU25N", identifier: "uiview32", class: "software", description: "UI-View32" },
    TocallEntry { pattern: "APY300", identifier: "yaesu-ftm400", class: "radio", description: "Yaesu FTM-400" },
    TocallEntry { pattern: "APY400", identifier: "yaesu-ftm300", class: "radio", description: "Yaesu FTM-300" },
    TocallEntry { pattern: "APK0??", identifier: "kenwood", class: "radio", description: "Kenwood TM-D7xx/D71x" },
    TocallEntry { pattern: "APK10?", identifier: "kenwood-d710", class: "radio", description: "Kenwood TM-D710" },
    TocallEntry { pattern: "APT3**", identifier: "byonics-tinytrak3", class: "tracker", description: "Byonics TinyTrak3" },
    TocallEntry { pattern: "APT4**", identifier: "byonics-tinytrak4", class: "tracker", description: "Byonics TinyTrak4" },
    TocallEntry { pattern: "APOZY?", identifier: "ozy-tracker", class: "tracker", description: "OZY tracker" },
    TocallEntry { pattern: "APN38?", identifier: "aprsdroid", class: "software", description: "APRSdroid" },
    TocallEntry { pattern: "APDW??", identifier: "dire-wolf", class: "software", description: "Dire Wolf soundcard TNC" },
];

fn wildcard_match(pattern: &str, tocall: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = tocall.chars().collect();
    let mut pi = 0;
    let mut ti = 0;
    while pi < p.len() {
        match p[pi] {
            '*' => return true,
            '?' => {
                if ti >= t.len() {
                    return false;
                }
                ti += 1;
            }
            'n' => {
                if ti >= t.len() || !t[ti].is_ascii_digit() {
                    return false;
                }
                ti += 1;
            }
            c => {
                if ti >= t.len() || t[ti].to_ascii_uppercase() != c.to_ascii_uppercase() {
                    return false;
                }
                ti += 1;
            }
        }
        pi += 1;
    }
    ti == t.len()
}

fn literal_chars(pattern: &str) -> usize {
    pattern.chars().filter(|c| *c != '?' && *c != '*' && *c != 'n').count()
}

/// Identifies a device from its destination callsign (tocall), picking the
/// longest literal-match pattern among all that match.
pub fn identify_by_tocall(tocall: &str) -> Option<DeviceInfo> {
    TOCALLS
        .iter()
        .filter(|entry| wildcard_match(entry.pattern, tocall))
        .max_by_key(|entry| literal_chars(entry.pattern))
        .map(|entry| DeviceInfo {
            identifier: entry.identifier.to_string(),
            class: entry.class.to_string(),
            description: entry.description.to_string(),
        })
}

struct MicESuffixEntry {
    suffix: &'static str,
    identifier: &'static str,
    class: &'static str,
    description: &'static str,
}

const MICE_SUFFIXES: &[MicESuffixEntry] = &[
    MicESuffixEntry { suffix: "TT", identifier: "byonics-tinytrak", class: "tracker", description: "Byonics TinyTrak" },
    MicESuffixEntry { suffix: "XX", identifier: "unknown-mic-e", class: "tracker", description: "Unspecified Mic-E device" },
];

/// Identifies a device from a Mic-E destination address's two trailing
/// encoded characters, falling back to a legacy prefix+suffix table.
pub fn identify_by_mice(suffix: &str) -> Option<DeviceInfo> {
    MICE_SUFFIXES
        .iter()
        .find(|entry| entry.suffix.eq_ignore_ascii_case(suffix))
        .map(|entry| DeviceInfo {
            identifier: entry.identifier.to_string(),
            class: entry.class.to_string(),
            description: entry.description.to_string(),
        })
}

/// Human-readable summary of a device class, for display.
pub fn class_description(class: &str) -> &'static str {
    match class {
        "tracker" => "Hardware GPS tracker",
        "radio" => "APRS-capable radio",
        "software" => "APRS client software",
        "gateway" => "Protocol gateway",
        _ => "Unknown device class",
    }
}
