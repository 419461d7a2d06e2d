/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::time::Duration;

use log::{debug, info};

use crate::core::storage::{Partition, PartitionKind, StorageType, parse_gpt};
use crate::da::xflash::cmds::{Cmd, status};
use crate::da::xflash::xflash_lib::{DATA_CHUNK, XFlash};
use crate::error::{Error, Result, StorageError};
use crate::event::LogLevel;

/// Top-level write granularity; each chunk is one packet, acknowledged
/// individually by the device.
const WRITE_CHUNK: usize = 0x100000;
/// GPT read window: protective MBR + header + 32 entry sectors.
const GPT_READ_LEN: usize = 34 * 512;
/// Upper bound on a format delay request.
const FORMAT_DELAY_CAP_MS: u32 = 5000;

/// 24-byte parameter block common to the flash I/O commands.
fn io_param(storage: StorageType, section: PartitionKind, addr: u64, len: u64) -> Vec<u8> {
    let mut param = Vec::with_capacity(24);
    param.extend_from_slice(&u32::from(storage).to_le_bytes());
    param.extend_from_slice(&section.as_u32().to_le_bytes());
    param.extend_from_slice(&addr.to_le_bytes());
    param.extend_from_slice(&len.to_le_bytes());
    param
}

/// 48-byte parameter block for format-style commands; the tail carries the
/// NAND-specific fields, zeroed for block storage.
fn format_param(storage: StorageType, section: PartitionKind, addr: u64, len: u64) -> Vec<u8> {
    let mut param = io_param(storage, section, addr, len);
    param.resize(48, 0);
    param
}

pub(super) async fn read_flash(
    xflash: &mut XFlash,
    addr: u64,
    size: usize,
    section: PartitionKind,
    label: &str,
) -> Result<Vec<u8>> {
    info!("Reading flash at 0x{:X}, 0x{:X} bytes", addr, size);
    let storage_type = xflash.get_or_detect_storage().await?.kind();

    xflash.send_cmd(Cmd::ReadData).await?;
    xflash.send_data(&io_param(storage_type, section, addr, size as u64)).await?;

    let window = xflash.conn.transport.timeouts.bulk_frame;
    let capacity = size.min(xflash.read_packet_length.unwrap_or(DATA_CHUNK) * 16);
    let mut buffer = Vec::with_capacity(capacity);
    let events = xflash.conn.events.clone();

    loop {
        let chunk = xflash.read_packet_timeout(window).await?;
        if chunk.is_empty() {
            debug!("Empty read frame, stopping");
            break;
        }
        buffer.extend_from_slice(&chunk);

        // Zero-payload flow packet acknowledges the frame.
        xflash.write_packet(&[]).await?;

        let st = xflash.get_status().await?;
        if st != status::OK && st != status::CONTINUE {
            return Err(Error::Protocol { code: st });
        }

        events.progress(buffer.len() as u64, size as u64, label);
        if buffer.len() >= size {
            break;
        }
    }

    buffer.truncate(size);
    Ok(buffer)
}

pub(super) async fn write_flash(
    xflash: &mut XFlash,
    addr: u64,
    size: usize,
    data: &[u8],
    section: PartitionKind,
    label: &str,
) -> Result<()> {
    info!("Writing flash at 0x{:X}, 0x{:X} bytes", addr, data.len());
    let storage_type = xflash.get_or_detect_storage().await?.kind();

    if data.len() > size {
        return Err(StorageError::SizeExceedsPartition {
            data: data.len() as u64,
            partition: size as u64,
        }
        .into());
    }

    // Short images are padded up to the declared size so stale tail bytes
    // cannot survive in the partition.
    let mut image = data.to_vec();
    if image.len() < size {
        image.resize(size, 0);
    }

    xflash.send_cmd(Cmd::WriteData).await?;
    xflash.send_data(&io_param(storage_type, section, addr, size as u64)).await?;

    let events = xflash.conn.events.clone();
    let mut written = 0usize;

    for chunk in image.chunks(WRITE_CHUNK) {
        if let Err(e) = write_chunk(xflash, chunk).await {
            return Err(Error::PartialWrite { offset: written as u64, source: Box::new(e) });
        }
        written += chunk.len();
        events.progress(written as u64, size as u64, label);
    }

    let st = xflash.get_status().await?;
    if st != status::OK && st != status::COMPLETE {
        return Err(Error::PartialWrite {
            offset: written as u64,
            source: Box::new(Error::Protocol { code: st }),
        });
    }

    info!("Flash write completed, {} bytes", written);
    Ok(())
}

async fn write_chunk(xflash: &mut XFlash, chunk: &[u8]) -> Result<()> {
    xflash.write_packet(chunk).await?;

    let st = xflash.get_status().await?;
    if st != status::OK && st != status::CONTINUE {
        return Err(Error::Protocol { code: st });
    }
    Ok(())
}

/// Erase is a ranged format: same parameter block, same continue/delay loop.
pub(super) async fn erase_flash(
    xflash: &mut XFlash,
    addr: u64,
    size: usize,
    section: PartitionKind,
    label: &str,
) -> Result<()> {
    info!("Erasing flash at 0x{:X}, 0x{:X} bytes", addr, size);
    let storage_type = xflash.get_or_detect_storage().await?.kind();

    xflash.send_cmd(Cmd::FormatPartition).await?;
    xflash.send_data(&format_param(storage_type, section, addr, size as u64)).await?;

    format_status_loop(xflash, label).await
}

pub(super) async fn format(
    xflash: &mut XFlash,
    addr: u64,
    size: u64,
    section: PartitionKind,
    label: &str,
) -> Result<()> {
    info!("Formatting 0x{:X}..0x{:X}", addr, addr + size);
    let storage_type = xflash.get_or_detect_storage().await?.kind();

    xflash.send_cmd(Cmd::Format).await?;
    xflash.send_data(&format_param(storage_type, section, addr, size)).await?;

    format_status_loop(xflash, label).await
}

/// Long-running operations report `CONTINUE` followed by a requested delay
/// in milliseconds, until `COMPLETE`.
async fn format_status_loop(xflash: &mut XFlash, label: &str) -> Result<()> {
    let events = xflash.conn.events.clone();
    let mut rounds = 0u64;

    loop {
        let st = xflash.get_status().await?;
        match st {
            status::COMPLETE => {
                events.log(LogLevel::Info, format!("{}: complete", label));
                return Ok(());
            }
            status::CONTINUE => {
                let delay = xflash.get_status().await?.min(FORMAT_DELAY_CAP_MS as u32);
                debug!("{}: device asks for {} ms", label, delay);
                xflash.conn.transport.sleep(Duration::from_millis(delay as u64)).await?;
                xflash.write_packet(&[]).await?;
                rounds += 1;
                events.progress(rounds, 0, label);
            }
            other => return Err(Error::Protocol { code: other }),
        }
    }
}

/// Writes a whole partition by name; the DA resolves the placement. This is
/// the path that stays inside the vendor's security checks on locked
/// bootloaders.
pub(super) async fn download(xflash: &mut XFlash, part_name: &str, data: &[u8]) -> Result<()> {
    info!("Download to partition '{}', 0x{:X} bytes", part_name, data.len());

    xflash.send_cmd(Cmd::Download).await?;
    xflash.send_data(part_name.as_bytes()).await?;
    xflash.send_data(&(data.len() as u64).to_le_bytes()).await?;

    let events = xflash.conn.events.clone();
    let mut written = 0usize;
    for chunk in data.chunks(WRITE_CHUNK) {
        if let Err(e) = write_chunk(xflash, chunk).await {
            return Err(Error::PartialWrite { offset: written as u64, source: Box::new(e) });
        }
        written += chunk.len();
        events.progress(written as u64, data.len() as u64, part_name);
    }

    let st = xflash.get_status().await?;
    if st != status::OK && st != status::COMPLETE {
        return Err(Error::Protocol { code: st });
    }
    Ok(())
}

/// Reads a whole partition by name, length announced by the DA.
pub(super) async fn upload(xflash: &mut XFlash, part_name: &str) -> Result<Vec<u8>> {
    info!("Upload of partition '{}'", part_name);

    xflash.send_cmd(Cmd::Upload).await?;
    xflash.send_data(part_name.as_bytes()).await?;

    let announced = xflash.read_packet().await?;
    if announced.len() < 8 {
        return Err(Error::Malformed("short upload length announcement".into()));
    }
    let total = u64::from_le_bytes(announced[0..8].try_into().unwrap()) as usize;

    let window = xflash.conn.transport.timeouts.bulk_frame;
    let events = xflash.conn.events.clone();
    let mut buffer = Vec::with_capacity(total);

    while buffer.len() < total {
        let chunk = xflash.read_packet_timeout(window).await?;
        if chunk.is_empty() {
            break;
        }
        buffer.extend_from_slice(&chunk);

        xflash.write_packet(&[]).await?;
        let st = xflash.get_status().await?;
        if st != status::OK && st != status::CONTINUE {
            return Err(Error::Protocol { code: st });
        }
        events.progress(buffer.len() as u64, total as u64, part_name);
    }

    Ok(buffer)
}

/// Reads and parses the primary GPT from the user area.
pub(super) async fn read_partitions(xflash: &mut XFlash) -> Result<Vec<Partition>> {
    let storage = xflash.get_or_detect_storage().await?;
    let sector_size = storage.block_size();
    let user = storage.user_part();

    let gpt_raw = read_flash(xflash, 0, GPT_READ_LEN, user, "gpt").await?;
    match parse_gpt(&gpt_raw, sector_size) {
        Ok(partitions) => Ok(partitions),
        Err(gpt_err) => {
            debug!("GPT parse failed ({}), trying DA partition catalog", gpt_err);
            partition_table_catalog(xflash).await.map_err(|_| gpt_err)
        }
    }
}

/// Fallback partition source for NAND/NOR devices without a GPT: the DA's
/// own partition-table catalog. Entries are `name[64] | addr u64 | len u64`,
/// terminated by an empty name.
async fn partition_table_catalog(xflash: &mut XFlash) -> Result<Vec<Partition>> {
    let resp = xflash.devctrl(Cmd::GetPartitionTblCata, None).await?;
    let sector_size = 512u32;

    let mut partitions = Vec::new();
    for record in resp.chunks_exact(80) {
        let name_end = record[..64].iter().position(|&b| b == 0).unwrap_or(64);
        if name_end == 0 {
            break;
        }
        let name = String::from_utf8_lossy(&record[..name_end]).into_owned();
        let addr = u64::from_le_bytes(record[64..72].try_into().unwrap());
        let len = u64::from_le_bytes(record[72..80].try_into().unwrap());

        partitions.push(Partition {
            name,
            start_sector: addr / sector_size as u64,
            sector_count: len.div_ceil(sector_size as u64),
            sector_size,
        });
    }

    Ok(partitions)
}
