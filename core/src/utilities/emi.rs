/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/

const BLOADER_MARKER: &[u8] = b"MTK_BLOADER_INFO_v";
const BIN_MARKER: &[u8] = b"MTK_BIN";

/// Extracts the EMI configuration payload embedded in a preloader image.
///
/// The payload starts 12 bytes past the `MTK_BIN` marker (falling back to the
/// `MTK_BLOADER_INFO_v` marker on older images) and runs to the end of the
/// file. Returns `None` when neither marker is present.
pub fn extract_emi(preloader: &[u8]) -> Option<&[u8]> {
    let marker_offset = find(preloader, BIN_MARKER).or_else(|| find(preloader, BLOADER_MARKER))?;

    let start = marker_offset + 12;
    if start >= preloader.len() {
        return None;
    }

    Some(&preloader[start..])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emi_payload_follows_marker() {
        let mut image = vec![0u8; 0x100];
        image.extend_from_slice(b"MTK_BIN\0\0\0\0\0");
        image.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        let emi = extract_emi(&image).unwrap();
        assert_eq!(emi, &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn missing_marker_yields_none() {
        assert!(extract_emi(&[0u8; 64]).is_none());
    }
}
