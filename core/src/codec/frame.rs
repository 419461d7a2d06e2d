/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use crate::error::{Error, Result};

/// Magic prefix on every stage-2 packet (XFlash and XML alike).
pub const MAGIC: u32 = 0xFEEEEEEF;
/// The only data type the engine speaks: protocol flow.
pub const DATA_TYPE_PROTOCOL_FLOW: u32 = 1;
/// Fixed header size: magic | data type | payload length, each u32 LE.
pub const HEADER_LEN: usize = 12;
/// Largest payload a well-formed packet may announce.
pub const MAX_PAYLOAD: usize = 0x1000000;

/// Builds the 12-byte packet header for a payload of `len` bytes.
pub fn header(len: usize) -> [u8; HEADER_LEN] {
    let mut hdr = [0u8; HEADER_LEN];
    hdr[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    hdr[4..8].copy_from_slice(&DATA_TYPE_PROTOCOL_FLOW.to_le_bytes());
    hdr[8..12].copy_from_slice(&(len as u32).to_le_bytes());
    hdr
}

/// Builds a complete magic-framed packet around `payload`.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
    packet.extend_from_slice(&header(payload.len()));
    packet.extend_from_slice(payload);
    packet
}

/// Validates a packet header and returns the payload length it announces.
///
/// A wrong magic fails before any payload byte is looked at, so the caller
/// can keep the stream position for resynchronization.
pub fn parse_header(hdr: &[u8; HEADER_LEN]) -> Result<u32> {
    let magic = u32::from_le_bytes(hdr[0..4].try_into().unwrap());
    if magic != MAGIC {
        return Err(Error::Malformed(format!("bad packet magic 0x{:08X}", magic)));
    }

    let len = u32::from_le_bytes(hdr[8..12].try_into().unwrap());
    if len as usize > MAX_PAYLOAD {
        return Err(Error::Malformed(format!("packet announces 0x{:X} bytes", len)));
    }

    Ok(len)
}

/// Splits a full in-memory packet into its payload.
pub fn parse(packet: &[u8]) -> Result<&[u8]> {
    if packet.len() < HEADER_LEN {
        return Err(Error::Malformed("packet shorter than header".into()));
    }

    let hdr: [u8; HEADER_LEN] = packet[..HEADER_LEN].try_into().unwrap();
    let len = parse_header(&hdr)? as usize;
    if packet.len() < HEADER_LEN + len {
        return Err(Error::Malformed(format!(
            "packet truncated: header announces {} bytes, {} present",
            len,
            packet.len() - HEADER_LEN
        )));
    }

    Ok(&packet[HEADER_LEN..HEADER_LEN + len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_parse_round_trip() {
        for len in [0usize, 1, 2, 0x1000, 0x100000] {
            let payload = vec![0x5Au8; len];
            let packet = frame(&payload);
            assert_eq!(parse(&packet).unwrap(), &payload[..]);
        }
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut packet = frame(&[1, 2, 3]);
        packet[0] ^= 0xFF;
        assert!(parse(&packet).is_err());
    }

    #[test]
    fn truncated_packet_is_rejected() {
        let packet = frame(&[1, 2, 3, 4]);
        assert!(parse(&packet[..packet.len() - 1]).is_err());
    }
}
