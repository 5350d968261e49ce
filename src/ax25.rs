//! AX.25 address and UI-frame codec (C1).
//!
//! Addresses are 7 octets: 6 characters shifted left one bit (space-padded),
//! then an SSID byte carrying the SSID in bits 1-4, the "has-been-repeated"
//! (H) bit at bit 7, reserved bits set per convention, and the
//! address-extension bit at bit 0 (set on the last address field only).

use crate::callsign::Callsign;
use crate::error::EngineError;

const SSID_RESERVED_BITS: u8 = 0b0110_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub callsign: Callsign,
    /// "has-been-repeated" bit: this digipeater has already relayed the frame.
    pub h_bit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ax25Frame {
    pub source: Callsign,
    pub destination: Callsign,
    pub path: Vec<PathEntry>,
    pub control: u8,
    pub pid: u8,
    pub info: Vec<u8>,
}

/// Encodes one 7-octet AX.25 address field.
pub fn encode_address(call: &Callsign, h_bit: bool, last: bool) -> [u8; 7] {
    let mut out = [0u8; 7];
    let padded: Vec<u8> = call
        .base()
        .bytes()
        .chain(std::iter::repeat(b' '))
        .take(6)
        .collect();
    for (i, b) in padded.iter().enumerate() {
        out[i] = b << 1;
    }
    let mut ssid_byte = (call.ssid() << 1) | SSID_RESERVED_BITS;
    if h_bit {
        ssid_byte |= 0x80;
    }
    if last {
        ssid_byte |= 0x01;
    }
    out[6] = ssid_byte;
    out
}

/// Decodes one 7-octet AX.25 address field, returning `(callsign, h_bit,
/// is_last)`.
pub fn decode_address(bytes: &[u8; 7]) -> Result<(Callsign, bool, bool), EngineError> {
    let mut base = String::with_capacity(6);
    for &b in &bytes[0..6] {
        let ch = (b >> 1) as char;
        if ch != ' ' {
            base.push(ch);
        }
    }
    let ssid_byte = bytes[6];
    let ssid = (ssid_byte >> 1) & 0x0F;
    let h_bit = ssid_byte & 0x80 != 0;
    let is_last = ssid_byte & 0x01 != 0;
    let callsign = if ssid == 0 {
        Callsign::parse(&base)
    } else {
        Callsign::parse(&format!("{base}-{ssid}"))
    }
    .map_err(|e| EngineError::Frame(format!("bad address field: {e}")))?;
    Ok((callsign, h_bit, is_last))
}

/// Builds a UI frame (Control=0x03, PID=0xF0) with up to 8 digipeater
/// entries. H-bits are never set on transmit; a station only marks H-bits
/// on frames it receives and repeats, never on frames it originates.
pub fn build_ui_frame(
    source: &Callsign,
    destination: &Callsign,
    digipeaters: &[Callsign],
    info: &[u8],
) -> Result<Vec<u8>, EngineError> {
    if digipeaters.len() > 8 {
        return Err(EngineError::Frame("digipeater path exceeds 8 entries".into()));
    }
    let mut out = Vec::with_capacity(14 + digipeaters.len() * 7 + 2 + info.len());
    let no_digis = digipeaters.is_empty();
    out.extend(encode_address(destination, false, no_digis));
    out.extend(encode_address(source, false, no_digis));
    for (i, digi) in digipeaters.iter().enumerate() {
        let last = i == digipeaters.len() - 1;
        out.extend(encode_address(digi, false, last));
    }
    out.push(0x03); // Control: UI frame
    out.push(0xF0); // PID: no layer 3
    out.extend_from_slice(info);
    Ok(out)
}

/// Re-encodes a previously-decoded frame verbatim, including each path
/// entry's H-bit as it currently stands. Used to repeat a heard frame with
/// one hop's H-bit flipped on, as opposed to `build_ui_frame` which always
/// originates a fresh frame with no H-bits set.
pub fn encode_frame(frame: &Ax25Frame) -> Vec<u8> {
    let mut out = Vec::with_capacity(14 + frame.path.len() * 7 + 2 + frame.info.len());
    let no_path = frame.path.is_empty();
    out.extend(encode_address(&frame.destination, false, no_path));
    out.extend(encode_address(&frame.source, false, no_path));
    for (i, entry) in frame.path.iter().enumerate() {
        let last = i == frame.path.len() - 1;
        out.extend(encode_address(&entry.callsign, entry.h_bit, last));
    }
    out.push(frame.control);
    out.push(frame.pid);
    out.extend_from_slice(&frame.info);
    out
}

/// Parses a raw AX.25 frame (post KISS-unescape) into destination, source,
/// digipeater path, and info field.
pub fn parse_ui_frame(bytes: &[u8]) -> Result<Ax25Frame, EngineError> {
    if bytes.len() < 16 {
        return Err(EngineError::Frame("frame too short for AX.25 header".into()));
    }
    let mut offset = 0;
    let mut read_addr = |bytes: &[u8]| -> Result<([u8; 7], bool), EngineError> {
        if bytes.len() < offset + 7 {
            return Err(EngineError::Frame("truncated address field".into()));
        }
        let mut field = [0u8; 7];
        field.copy_from_slice(&bytes[offset..offset + 7]);
        offset += 7;
        let is_last = field[6] & 0x01 != 0;
        Ok((field, is_last))
    };

    let (dest_bytes, dest_last) = read_addr(bytes)?;
    if dest_last {
        return Err(EngineError::Frame(
            "destination address marked as last; no source field".into(),
        ));
    }
    let (dest, _, _) = decode_address(&dest_bytes)?;

    let (src_bytes, mut last) = read_addr(bytes)?;
    let (source, _, _) = decode_address(&src_bytes)?;

    let mut path = Vec::new();
    while !last {
        if path.len() >= 8 {
            return Err(EngineError::Frame("digipeater path exceeds 8 entries".into()));
        }
        let (addr_bytes, is_last) = read_addr(bytes)?;
        let (callsign, h_bit, _) = decode_address(&addr_bytes)?;
        path.push(PathEntry { callsign, h_bit });
        last = is_last;
    }

    if bytes.len() < offset + 2 {
        return Err(EngineError::Frame("frame missing control/PID bytes".into()));
    }
    let control = bytes[offset];
    let pid = bytes[offset + 1];
    offset += 2;
    let info = bytes[offset..].to_vec();

    Ok(Ax25Frame {
        source,
        destination: dest,
        path,
        control,
        pid,
        info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrip() {
        let call = Callsign::parse("K1FSY-9").unwrap();
        let encoded = encode_address(&call, true, true);
        let (decoded, h_bit, is_last) = decode_address(&encoded).unwrap();
        assert_eq!(decoded, call);
        assert!(h_bit);
        assert!(is_last);
    }

    #[test]
    fn frame_roundtrip_no_digis() {
        let source = Callsign::parse("K1FSY-9").unwrap();
        let dest = Callsign::parse("APRS").unwrap();
        let info = b":WEATHER :test message".to_vec();
        let bytes = build_ui_frame(&source, &dest, &[], &info).unwrap();
        let frame = parse_ui_frame(&bytes).unwrap();
        assert_eq!(frame.source, source);
        assert_eq!(frame.destination, dest);
        assert!(frame.path.is_empty());
        assert_eq!(frame.control, 0x03);
        assert_eq!(frame.pid, 0xF0);
        assert_eq!(frame.info, info);
    }

    #[test]
    fn frame_roundtrip_with_digis() {
        let source = Callsign::parse("K1FSY-9").unwrap();
        let dest = Callsign::parse("APRS").unwrap();
        let wide1 = Callsign::parse("WIDE1-1").unwrap();
        let wide2 = Callsign::parse("WIDE2-2").unwrap();
        let bytes = build_ui_frame(&source, &dest, &[wide1.clone(), wide2.clone()], b"test").unwrap();
        let frame = parse_ui_frame(&bytes).unwrap();
        assert_eq!(frame.path.len(), 2);
        assert_eq!(frame.path[0].callsign, wide1);
        assert_eq!(frame.path[1].callsign, wide2);
    }

    #[test]
    fn rejects_too_many_digis() {
        let source = Callsign::parse("K1FSY").unwrap();
        let dest = Callsign::parse("APRS").unwrap();
        let digis: Vec<Callsign> = (0..9)
            .map(|i| Callsign::parse(&format!("WIDE{}-1", i % 7 + 1)).unwrap())
            .collect();
        assert!(build_ui_frame(&source, &dest, &digis, b"x").is_err());
    }

    #[test]
    fn rejects_truncated_frame() {
        assert!(parse_ui_frame(&[0u8; 10]).is_err());
    }

    #[test]
    fn encode_frame_sets_requested_h_bit() {
        let source = Callsign::parse("K1FSY-9").unwrap();
        let dest = Callsign::parse("APRS").unwrap();
        let wide1 = Callsign::parse("WIDE1-1").unwrap();
        let bytes = build_ui_frame(&source, &dest, &[wide1], b"test").unwrap();
        let mut frame = parse_ui_frame(&bytes).unwrap();
        assert!(!frame.path[0].h_bit);
        frame.path[0].h_bit = true;
        let repeated = encode_frame(&frame);
        let reparsed = parse_ui_frame(&repeated).unwrap();
        assert!(reparsed.path[0].h_bit);
        assert_eq!(reparsed.info, frame.info);
    }
}
