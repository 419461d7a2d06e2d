/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use log::{debug, warn};

use crate::error::{Result, StorageError};
use crate::{le_u32, le_u64};

const EFI_SIGNATURE: &[u8; 8] = b"EFI PART";
const MBR_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const GPT_ENTRY_MIN: usize = 128;

/// Parses the partition array out of a primary-GPT dump (34 sectors read
/// from LBA 0 of the user area).
///
/// The header may sit at offset 0 or, behind a protective MBR, at the second
/// sector. The entry walk stops at the first all-zero type GUID.
pub fn parse_gpt(data: &[u8], sector_size: u32) -> Result<Vec<crate::core::storage::Partition>> {
    let ss = sector_size as usize;

    let header_offset = if data.len() >= 8 && &data[0..8] == EFI_SIGNATURE {
        0
    } else if ss >= 2
        && data.len() >= ss + 8
        && data[ss - 2..ss] == MBR_SIGNATURE
        && &data[ss..ss + 8] == EFI_SIGNATURE
    {
        ss
    } else {
        return Err(StorageError::GptInvalid("no EFI PART signature".into()).into());
    };

    let header = &data[header_offset..];
    if header.len() < 92 {
        return Err(StorageError::GptInvalid("truncated GPT header".into()).into());
    }

    check_header_crc(header);

    let entry_lba = le_u64!(header, 72);
    let num_entries = le_u32!(header, 80) as usize;
    let entry_size = le_u32!(header, 84) as usize;
    if entry_size < GPT_ENTRY_MIN {
        return Err(StorageError::GptInvalid(format!("entry size {}", entry_size)).into());
    }
    debug!("GPT: {} entries of {} bytes at LBA {}", num_entries, entry_size, entry_lba);

    let array_offset = (entry_lba as usize).saturating_mul(ss);
    let mut partitions = Vec::new();

    for index in 0..num_entries {
        let off = array_offset + index * entry_size;
        if off + GPT_ENTRY_MIN > data.len() {
            warn!("GPT entry {} lies outside the read window", index);
            break;
        }
        let entry = &data[off..off + GPT_ENTRY_MIN];

        // All-zero type GUID terminates the array.
        if entry[0..16].iter().all(|&b| b == 0) {
            break;
        }

        let first_lba = le_u64!(entry, 32);
        let last_lba = le_u64!(entry, 40);
        let name = decode_utf16le_name(&entry[56..128]);

        partitions.push(crate::core::storage::Partition {
            name,
            start_sector: first_lba,
            sector_count: last_lba - first_lba + 1,
            sector_size,
        });
    }

    Ok(partitions)
}

/// Header CRC is diagnostic only; dumps made through the DA occasionally
/// carry a stale backup header.
fn check_header_crc(header: &[u8]) {
    let header_size = le_u32!(header, 12) as usize;
    if header_size < 92 || header_size > header.len() {
        warn!("GPT header size field {} out of range", header_size);
        return;
    }

    let stored = le_u32!(header, 16);
    let mut canonical = header[..header_size].to_vec();
    canonical[16..20].fill(0);

    let computed = crc32fast::hash(&canonical);
    if stored != computed {
        warn!("GPT header CRC mismatch: stored 0x{:08X}, computed 0x{:08X}", stored, computed);
    }
}

fn decode_utf16le_name(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();

    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_gpt(num_entries: u32, with_mbr: bool) -> Vec<u8> {
        let mut disk = vec![0u8; 34 * 512];
        let header_offset = if with_mbr {
            disk[510] = 0x55;
            disk[511] = 0xAA;
            512
        } else {
            0
        };

        disk[header_offset..header_offset + 8].copy_from_slice(b"EFI PART");
        disk[header_offset + 12..header_offset + 16].copy_from_slice(&92u32.to_le_bytes());
        disk[header_offset + 72..header_offset + 80].copy_from_slice(&2u64.to_le_bytes());
        disk[header_offset + 80..header_offset + 84].copy_from_slice(&num_entries.to_le_bytes());
        disk[header_offset + 84..header_offset + 88].copy_from_slice(&128u32.to_le_bytes());

        for i in 0..num_entries as usize {
            let off = 2 * 512 + i * 128;
            disk[off..off + 16].fill(0x11); // type GUID
            disk[off + 16..off + 32].fill(0x22); // unique GUID
            let first = 0x400u64 + i as u64 * 0x100;
            let last = first + 0xFF;
            disk[off + 32..off + 40].copy_from_slice(&first.to_le_bytes());
            disk[off + 40..off + 48].copy_from_slice(&last.to_le_bytes());

            let name = format!("part{}", i);
            for (j, unit) in name.encode_utf16().enumerate() {
                disk[off + 56 + j * 2..off + 56 + j * 2 + 2]
                    .copy_from_slice(&unit.to_le_bytes());
            }
        }

        disk
    }

    #[test]
    fn parses_gpt_behind_protective_mbr() {
        let disk = build_gpt(3, true);
        let partitions = parse_gpt(&disk, 512).unwrap();

        assert_eq!(partitions.len(), 3);
        for (i, part) in partitions.iter().enumerate() {
            assert_eq!(part.name, format!("part{}", i));
            assert_eq!(part.offset(), (0x400 + i as u64 * 0x100) * 512);
            assert_eq!(part.sector_count, 0x100);
        }
    }

    #[test]
    fn parses_bare_gpt_at_offset_zero() {
        let disk = build_gpt(2, false);
        let partitions = parse_gpt(&disk, 512).unwrap();
        assert_eq!(partitions.len(), 2);
    }

    #[test]
    fn stops_at_zero_type_guid() {
        let mut disk = build_gpt(3, true);
        // Wipe entry 1's type GUID; entry 2 must not be reported.
        let off = 2 * 512 + 128;
        disk[off..off + 16].fill(0);

        let partitions = parse_gpt(&disk, 512).unwrap();
        assert_eq!(partitions.len(), 1);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_gpt(&[0u8; 34 * 512], 512).is_err());
    }
}
