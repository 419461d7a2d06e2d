/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use log::debug;

use crate::core::devinfo::DeviceIdentity;
use crate::error::{CatalogError, Result};
use crate::{le_u16, le_u32};

/// Protocol family spoken by a DA blob.
/// - Legacy: byte-synchronous DA for NAND-era chips
/// - V5 (XFlash): most Helio and early Dimensity devices
/// - V6 (XML): recent Dimensity and Helio devices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaType {
    Legacy,
    V5,
    V6,
}

/// One region of a DA entry. Region 1 is the stage-1 code, region 2 the
/// stage-2 code; anything else is metadata the engine ignores.
#[derive(Debug, Clone)]
pub struct DaRegion {
    pub data: Vec<u8>,
    pub file_offset: u32,
    pub length: u32,
    pub load_address: u32,
    pub start_offset: u32,
    pub sig_len: u32,
}

/// DA entry for one SoC.
#[derive(Debug, Clone)]
pub struct DaEntry {
    pub magic: u16,
    pub hw_code: u16,
    pub hw_sub_code: u16,
    pub hw_version: u16,
    pub sw_version: u16,
    pub page_size: u16,
    pub regions: Vec<DaRegion>,
}

impl DaEntry {
    pub fn stage1(&self) -> Option<&DaRegion> {
        self.regions.get(1)
    }

    pub fn stage2(&self) -> Option<&DaRegion> {
        self.regions.get(2)
    }
}

const HEADER_LEN: usize = 0x6C;
const ENTRY_SIZE_LEGACY: usize = 0xD8;
const ENTRY_SIZE: usize = 0xDC;
const REGION_RECORD_LEN: usize = 20;

/// Parsed `MTK_AllInOne_DA.bin`. Read-only after load; safe to share across
/// sessions.
#[derive(Debug, Clone)]
pub struct DaCatalog {
    pub da_type: DaType,
    pub version: String,
    entries: Vec<DaEntry>,
}

impl DaCatalog {
    pub fn parse(raw: &[u8]) -> Result<DaCatalog> {
        if raw.len() < HEADER_LEN + ENTRY_SIZE {
            return Err(CatalogError::CorruptDaBlob("file too small".into()).into());
        }

        let header = &raw[..HEADER_LEN];
        let version = header
            .windows(8)
            .position(|w| w == b"MTK_DA_v")
            .map(|pos| {
                let tail = &header[pos..];
                let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
                String::from_utf8_lossy(&tail[..end]).into_owned()
            })
            .unwrap_or_default();

        let entry_count = le_u32!(raw, 0x68) as usize;

        // A 0xDADA magic right after a legacy-sized first entry tells the
        // two layouts apart.
        let probe = HEADER_LEN + ENTRY_SIZE_LEGACY;
        let is_legacy = raw.len() >= probe + 2 && le_u16!(raw, probe) == 0xDADA;
        let da_type = if is_legacy {
            DaType::Legacy
        } else if version.contains("MTK_DA_v6") {
            DaType::V6
        } else {
            DaType::V5
        };
        let entry_size = if is_legacy { ENTRY_SIZE_LEGACY } else { ENTRY_SIZE };

        let mut entries = Vec::with_capacity(entry_count);
        for i in 0..entry_count {
            let start = HEADER_LEN + i * entry_size;
            let end = start + entry_size;
            if end > raw.len() {
                return Err(CatalogError::CorruptDaBlob(format!(
                    "entry {} extends past end of file",
                    i
                ))
                .into());
            }
            entries.push(Self::parse_entry(raw, &raw[start..end], is_legacy)?);
        }

        debug!("Parsed DA blob '{}': {:?}, {} entries", version, da_type, entries.len());
        Ok(DaCatalog { da_type, version, entries })
    }

    // Entry layout, u16 LE fields:
    //   0x00 magic | 0x02 hw_code | 0x04 hw_sub_code | 0x06 hw_version
    //   [0x08 sw_version | 0x0A reserved -- absent on legacy entries]
    //   pagesize | reserved | entry_region_index | entry_region_count
    // followed by entry_region_count 20-byte region records.
    fn parse_entry(raw: &[u8], entry: &[u8], legacy: bool) -> Result<DaEntry> {
        let magic = le_u16!(entry, 0x00);
        let hw_code = le_u16!(entry, 0x02);
        let hw_sub_code = le_u16!(entry, 0x04);
        let hw_version = le_u16!(entry, 0x06);
        let (sw_version, tail) = if legacy { (0, 0x08) } else { (le_u16!(entry, 0x08), 0x0C) };
        let page_size = le_u16!(entry, tail);
        let region_count = le_u16!(entry, tail + 6) as usize;
        let mut region_off = tail + 8;

        let mut regions = Vec::with_capacity(region_count);
        for _ in 0..region_count {
            if region_off + REGION_RECORD_LEN > entry.len() {
                return Err(
                    CatalogError::CorruptDaBlob("region table overflows entry".into()).into()
                );
            }
            let record = &entry[region_off..region_off + REGION_RECORD_LEN];
            let file_offset = le_u32!(record, 0x00);
            let length = le_u32!(record, 0x04);
            let load_address = le_u32!(record, 0x08);
            let start_offset = le_u32!(record, 0x0C);
            let sig_len = le_u32!(record, 0x10);

            let data_end = file_offset as usize + length as usize;
            if data_end > raw.len() {
                return Err(CatalogError::CorruptDaBlob(format!(
                    "region [0x{:X}, 0x{:X}) outside file",
                    file_offset, data_end
                ))
                .into());
            }

            regions.push(DaRegion {
                data: raw[file_offset as usize..data_end].to_vec(),
                file_offset,
                length,
                load_address,
                start_offset,
                sig_len,
            });
            region_off += REGION_RECORD_LEN;
        }

        Ok(DaEntry { magic, hw_code, hw_sub_code, hw_version, sw_version, page_size, regions })
    }

    /// Picks the DA entry for a probed device: first entry for the (aliased)
    /// hw_code whose versions do not exceed the device's, else the first
    /// entry for that hw_code, else `NoMatchingDa`.
    pub fn select(&self, identity: &DeviceIdentity) -> Result<&DaEntry> {
        let da_code = alias_hw_code(identity.hw_code);

        let candidates: Vec<&DaEntry> =
            self.entries.iter().filter(|e| e.hw_code == da_code).collect();
        if candidates.is_empty() {
            return Err(CatalogError::NoMatchingDa { hw_code: identity.hw_code }.into());
        }

        let selected = candidates
            .iter()
            .find(|e| {
                e.hw_version <= identity.hw_version && e.sw_version <= identity.sw_version
            })
            .copied()
            .unwrap_or(candidates[0]);

        debug!(
            "Selected DA entry hw_code=0x{:04X} hw_ver=0x{:04X} sw_ver=0x{:04X}",
            selected.hw_code, selected.hw_version, selected.sw_version
        );
        Ok(selected)
    }

    pub fn entries(&self) -> &[DaEntry] {
        &self.entries
    }
}

/// Maps probed hardware codes onto the commercial codes the all-in-one blob
/// is keyed by.
fn alias_hw_code(hw_code: u16) -> u16 {
    match hw_code {
        0x279 => 0x6797,
        0x321 => 0x6735,
        0x326 => 0x6755,
        0x335 => 0x6735,
        0x337 => 0x6735,
        0x507 => 0x6758,
        0x551 => 0x6757,
        0x562 => 0x6799,
        0x601 => 0x6755,
        0x633 => 0x6570,
        0x688 => 0x6758,
        0x690 => 0x6763,
        0x699 => 0x6739,
        0x707 => 0x6768,
        0x717 => 0x6761,
        0x725 => 0x6779,
        0x766 => 0x6765,
        0x788 => 0x6771,
        0x813 => 0x6785,
        0x816 => 0x6885,
        0x886 => 0x6873,
        0x908 => 0x8696,
        0x930 => 0x8195,
        0x950 => 0x6893,
        0x959 => 0x6877,
        0x989 => 0x6833,
        0x996 => 0x6853,
        0x1066 => 0x6781,
        0x6583 => 0x6589,
        0x8172 => 0x8173,
        0x8176 => 0x8173,
        _ => hw_code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal non-legacy blob with one SoC entry of three regions.
    fn build_blob(hw_code: u16, hw_version: u16, sw_version: u16) -> Vec<u8> {
        let mut raw = vec![0u8; 0x1000];
        raw[0x20..0x29].copy_from_slice(b"MTK_DA_v5");
        raw[0x68..0x6C].copy_from_slice(&1u32.to_le_bytes());

        let entry = 0x6C;
        raw[entry..entry + 2].copy_from_slice(&0xDADAu16.to_le_bytes());
        raw[entry + 2..entry + 4].copy_from_slice(&hw_code.to_le_bytes());
        raw[entry + 6..entry + 8].copy_from_slice(&hw_version.to_le_bytes());
        raw[entry + 8..entry + 10].copy_from_slice(&sw_version.to_le_bytes());
        raw[entry + 0x12..entry + 0x14].copy_from_slice(&3u16.to_le_bytes());

        for region in 0..3usize {
            let record = entry + 0x14 + region * 20;
            let offset = 0x400 + region as u32 * 0x100;
            raw[record..record + 4].copy_from_slice(&offset.to_le_bytes());
            raw[record + 4..record + 8].copy_from_slice(&0x100u32.to_le_bytes());
            raw[record + 8..record + 12]
                .copy_from_slice(&(0x200000u32 + region as u32).to_le_bytes());
            raw[record + 16..record + 20].copy_from_slice(&0u32.to_le_bytes());
        }

        raw
    }

    #[test]
    fn parses_and_selects() {
        let blob = build_blob(0x6768, 0xCA00, 0x0000);
        let catalog = DaCatalog::parse(&blob).unwrap();
        assert_eq!(catalog.da_type, DaType::V5);
        assert_eq!(catalog.entries().len(), 1);

        let identity =
            DeviceIdentity { hw_code: 0x707, hw_version: 0xCA00, ..Default::default() };
        let entry = catalog.select(&identity).unwrap();
        assert_eq!(entry.hw_code, 0x6768);
        assert_eq!(entry.stage1().unwrap().load_address, 0x200001);
        assert_eq!(entry.stage2().unwrap().load_address, 0x200002);
    }

    #[test]
    fn selection_is_deterministic() {
        let blob = build_blob(0x6768, 0x0000, 0x0000);
        let catalog = DaCatalog::parse(&blob).unwrap();
        let identity =
            DeviceIdentity { hw_code: 0x6768, hw_version: 0xCB00, ..Default::default() };

        let first = catalog.select(&identity).unwrap() as *const DaEntry;
        for _ in 0..10 {
            assert_eq!(catalog.select(&identity).unwrap() as *const DaEntry, first);
        }
    }

    #[test]
    fn version_fallback_picks_first_entry() {
        // Device versions below every entry's: fall back to entry 0.
        let blob = build_blob(0x6768, 0xCA00, 0x0100);
        let catalog = DaCatalog::parse(&blob).unwrap();
        let identity = DeviceIdentity { hw_code: 0x6768, ..Default::default() };

        assert_eq!(catalog.select(&identity).unwrap().hw_code, 0x6768);
    }

    #[test]
    fn unknown_chip_is_an_error() {
        let blob = build_blob(0x6768, 0, 0);
        let catalog = DaCatalog::parse(&blob).unwrap();
        let identity = DeviceIdentity { hw_code: 0x9999, ..Default::default() };

        assert!(catalog.select(&identity).is_err());
    }
}
