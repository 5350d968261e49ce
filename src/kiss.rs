//! KISS framing (C1): byte-stream in, AX.25 frame payloads out.
//!
//! Frame format: `FEND [type] escaped-payload FEND`. Only type byte `0x00`
//! (data frame, port 0) is handed to the AX.25 decoder; other types (port
//! numbers, hardware commands) are surfaced but not decoded further.

use tracing::{debug, warn};

pub const FEND: u8 = 0xC0;
pub const FESC: u8 = 0xDB;
pub const TFEND: u8 = 0xDC;
pub const TFESC: u8 = 0xDD;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KissFrame {
    pub port_and_type: u8,
    pub payload: Vec<u8>,
}

impl KissFrame {
    pub fn is_data_frame(&self) -> bool {
        self.port_and_type & 0x0F == 0x00
    }
}

/// Escapes `FEND`/`FESC` bytes inside a payload for transmission.
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        match b {
            FEND => {
                out.push(FESC);
                out.push(TFEND);
            }
            FESC => {
                out.push(FESC);
                out.push(TFESC);
            }
            _ => out.push(b),
        }
    }
    out
}

/// Reverses [`escape`]. Returns `None` on a dangling escape byte or an
/// unrecognized escape sequence; callers should discard the frame and bump a
/// malformed-frame metric rather than panic.
pub fn unescape(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().copied();
    while let Some(b) = iter.next() {
        if b == FESC {
            match iter.next()? {
                TFEND => out.push(FEND),
                TFESC => out.push(FESC),
                _ => return None,
            }
        } else {
            out.push(b);
        }
    }
    Some(out)
}

/// Builds a complete KISS frame (both delimiters included) for a data frame
/// on the given port.
pub fn encode_frame(port: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(FEND);
    out.push(port & 0x0F);
    out.extend(escape(payload));
    out.push(FEND);
    out
}

/// Incremental decoder over an arbitrary byte stream. Handles frames that
/// span multiple `feed` calls (e.g. chunked serial reads).
#[derive(Debug, Default)]
pub struct KissDecoder {
    buf: Vec<u8>,
    in_frame: bool,
    malformed_count: u64,
}

impl KissDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed_count
    }

    /// Feeds new bytes into the decoder, returning any frames completed by
    /// this call. Consecutive `FEND` bytes (empty frames) are skipped, per
    /// the KISS spec's tolerance for keep-alive delimiters.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<KissFrame> {
        let mut frames = Vec::new();
        for &b in bytes {
            if b == FEND {
                if self.in_frame && !self.buf.is_empty() {
                    if let Some(frame) = self.finish_frame() {
                        frames.push(frame);
                    }
                } else {
                    self.buf.clear();
                }
                self.in_frame = true;
            } else if self.in_frame {
                self.buf.push(b);
            }
            // Bytes outside any frame (before the first FEND) are dropped.
        }
        frames
    }

    fn finish_frame(&mut self) -> Option<KissFrame> {
        let raw = std::mem::take(&mut self.buf);
        let Some((&port_and_type, escaped)) = raw.split_first() else {
            return None;
        };
        match unescape(escaped) {
            Some(payload) => Some(KissFrame {
                port_and_type,
                payload,
            }),
            None => {
                self.malformed_count += 1;
                metrics::counter!("kiss.malformed_frames_total").increment(1);
                warn!(count = self.malformed_count, "discarding malformed KISS frame");
                None
            }
        }
    }
}

/// Hex-dumps bytes 16 per row, offset prefixed, for diagnostics/fixtures.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
            .collect();
        out.push_str(&format!("{:06x}  {:<47}  {}\n", i * 16, hex.join(" "), ascii));
    }
    debug!(bytes = data.len(), "hex dump generated");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_roundtrip() {
        let data = vec![0x01, FEND, 0x02, FESC, 0x03];
        let escaped = escape(&data);
        assert!(!escaped.contains(&FEND));
        assert_eq!(unescape(&escaped).unwrap(), data);
    }

    #[test]
    fn unescape_rejects_bad_sequence() {
        assert!(unescape(&[FESC, 0x42]).is_none());
    }

    #[test]
    fn unescape_rejects_dangling_escape() {
        assert!(unescape(&[FESC]).is_none());
    }

    #[test]
    fn decoder_extracts_single_frame() {
        let mut decoder = KissDecoder::new();
        let payload = b"hello";
        let framed = encode_frame(0, payload);
        let frames = decoder.feed(&framed);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, payload);
        assert!(frames[0].is_data_frame());
    }

    #[test]
    fn decoder_handles_chunked_feed() {
        let mut decoder = KissDecoder::new();
        let framed = encode_frame(0, b"chunked payload");
        let mid = framed.len() / 2;
        let mut frames = decoder.feed(&framed[..mid]);
        frames.extend(decoder.feed(&framed[mid..]));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"chunked payload");
    }

    #[test]
    fn decoder_skips_keepalive_fends() {
        let mut decoder = KissDecoder::new();
        let mut stream = vec![FEND, FEND, FEND];
        stream.extend(encode_frame(0, b"x"));
        let frames = decoder.feed(&stream);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn decoder_counts_malformed_frames() {
        let mut decoder = KissDecoder::new();
        let stream = vec![FEND, 0x00, FESC, 0x42, FEND];
        let frames = decoder.feed(&stream);
        assert!(frames.is_empty());
        assert_eq!(decoder.malformed_count(), 1);
    }
}
