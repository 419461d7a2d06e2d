/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::time::Duration;

use log::{debug, info};

use crate::connection::Connection;
use crate::core::storage::{DEFAULT_SECTOR_SIZE, Partition};
use crate::da::DaEntry;
use crate::da::legacy::cmds::{ACK, CONT, Cmd, NACK};
use crate::error::{Error, Result};

/// PMT resident entry: `name[64] | size u64 | part_id u64 | offset u64 |
/// flags u64`.
const PMT_ENTRY_LEN: usize = 96;

/// Legacy (pre-XFlash) stage-2 driver. Byte-synchronous: one opcode byte
/// out, big-endian parameters, ACK/NACK/CONT back. All flash addressing is
/// in sectors of a fixed per-session size.
pub struct LegacyDa {
    pub conn: Connection,
    pub entry: DaEntry,
    pub sector_size: u32,
}

impl LegacyDa {
    pub fn new(conn: Connection, entry: DaEntry) -> Self {
        LegacyDa { conn, entry, sector_size: DEFAULT_SECTOR_SIZE }
    }

    /// Uploads and starts the legacy DA, then waits for its ready byte.
    pub async fn upload_da(&mut self) -> Result<()> {
        let (addr, data, sig_len) = {
            let da1 = self
                .entry
                .stage1()
                .ok_or_else(|| Error::Malformed("DA entry has no stage-1 region".into()))?;
            (da1.load_address, da1.data.clone(), da1.sig_len)
        };

        self.conn.send_da(addr, &data, sig_len).await?;
        self.conn.jump_da(addr).await?;

        // The DA announces itself with a single ACK once its runtime is up.
        self.expect_ack(self.conn.transport.timeouts.control).await?;
        self.conn.transport.write(&[ACK]).await?;
        info!("Legacy DA is running");
        Ok(())
    }

    async fn send_cmd(&mut self, cmd: Cmd) -> Result<()> {
        debug!("[TX] Legacy command 0x{:02X}", cmd as u8);
        self.conn.transport.write(&[cmd as u8]).await
    }

    async fn expect_ack(&mut self, window: Duration) -> Result<()> {
        let reply = self.conn.transport.read_u8(window).await?;
        match reply {
            ACK => Ok(()),
            NACK => Err(Error::Protocol { code: NACK as u32 }),
            other => Err(Error::Malformed(format!("expected ACK, got 0x{:02X}", other))),
        }
    }

    /// Reads `sector_count` sectors starting at `start_sector`, ACK-ing each
    /// one. A final ACK closes the transaction.
    pub async fn read_flash(
        &mut self,
        start_sector: u64,
        sector_count: u64,
        label: &str,
    ) -> Result<Vec<u8>> {
        info!("Legacy read: {} sectors from {}", sector_count, start_sector);
        let window = self.conn.transport.timeouts.bulk_frame;
        let sector_size = self.sector_size as usize;

        self.send_cmd(Cmd::ReadFlash).await?;
        self.conn.transport.write(&start_sector.to_be_bytes()).await?;
        self.conn.transport.write(&sector_count.to_be_bytes()).await?;

        let events = self.conn.events.clone();
        let total = sector_count * sector_size as u64;
        let mut out = Vec::with_capacity(total as usize);

        for _ in 0..sector_count {
            let sector = self.conn.transport.read_exact(sector_size, window).await?;
            out.extend_from_slice(&sector);
            self.conn.transport.write(&[ACK]).await?;
            events.progress(out.len() as u64, total, label);
        }

        self.expect_ack(window).await?;
        Ok(out)
    }

    /// Writes whole sectors; the last one is zero-padded. The device answers
    /// each sector with ACK or the continuation marker.
    pub async fn write_flash(
        &mut self,
        start_sector: u64,
        sector_count: u64,
        data: &[u8],
        label: &str,
    ) -> Result<()> {
        info!("Legacy write: {} sectors from {}", sector_count, start_sector);
        let window = self.conn.transport.timeouts.bulk_frame;
        let sector_size = self.sector_size as usize;

        self.send_cmd(Cmd::WriteFlash).await?;
        self.conn.transport.write(&start_sector.to_be_bytes()).await?;
        self.conn.transport.write(&sector_count.to_be_bytes()).await?;
        self.expect_ack(window).await?;

        let events = self.conn.events.clone();
        let total = sector_count * sector_size as u64;
        let mut written = 0u64;

        for i in 0..sector_count as usize {
            let begin = i * sector_size;
            let mut sector = vec![0u8; sector_size];
            if begin < data.len() {
                let end = (begin + sector_size).min(data.len());
                sector[..end - begin].copy_from_slice(&data[begin..end]);
            }

            if let Err(e) = self.write_sector(&sector, window).await {
                return Err(Error::PartialWrite { offset: written, source: Box::new(e) });
            }
            written += sector_size as u64;
            events.progress(written, total, label);
        }

        Ok(())
    }

    async fn write_sector(&mut self, sector: &[u8], window: Duration) -> Result<()> {
        self.conn.transport.write(sector).await?;
        let reply = self.conn.transport.read_u8(window).await?;
        match reply {
            ACK | CONT => Ok(()),
            NACK => Err(Error::Protocol { code: NACK as u32 }),
            other => Err(Error::Malformed(format!("expected ACK/CONT, got 0x{:02X}", other))),
        }
    }

    pub async fn erase_flash(&mut self, start_sector: u64, sector_count: u64) -> Result<()> {
        info!("Legacy erase: {} sectors from {}", sector_count, start_sector);
        self.send_cmd(Cmd::EraseFlash).await?;
        self.conn.transport.write(&start_sector.to_be_bytes()).await?;
        self.conn.transport.write(&sector_count.to_be_bytes()).await?;

        let window = self.conn.transport.timeouts.erase;
        self.expect_ack(window).await
    }

    pub async fn format_flash(&mut self) -> Result<()> {
        info!("Legacy format");
        self.send_cmd(Cmd::Format).await?;

        let window = self.conn.transport.timeouts.format;
        self.expect_ack(window).await
    }

    /// Reads the raw partition-map table.
    pub async fn read_pmt(&mut self) -> Result<Vec<u8>> {
        let window = self.conn.transport.timeouts.control;
        self.send_cmd(Cmd::ReadPmt).await?;

        let len = self.conn.transport.read_u32_be(window).await? as usize;
        let payload = self.conn.transport.read_exact(len, window).await?;
        self.conn.transport.write(&[ACK]).await?;

        Ok(payload)
    }

    pub async fn write_pmt(&mut self, payload: &[u8]) -> Result<()> {
        let window = self.conn.transport.timeouts.control;
        self.send_cmd(Cmd::WritePmt).await?;
        self.conn.transport.write(&(payload.len() as u32).to_be_bytes()).await?;
        self.conn.transport.write(payload).await?;

        self.expect_ack(window).await
    }

    /// Partition list from the PMT.
    pub async fn read_partitions(&mut self) -> Result<Vec<Partition>> {
        let pmt = self.read_pmt().await?;
        Ok(parse_pmt(&pmt, self.sector_size))
    }

    pub async fn read_reg32(&mut self, address: u32) -> Result<u32> {
        let window = self.conn.transport.timeouts.control;
        self.send_cmd(Cmd::ReadReg32).await?;
        self.conn.transport.write(&address.to_be_bytes()).await?;

        let value = self.conn.transport.read_u32_be(window).await?;
        self.expect_ack(window).await?;
        Ok(value)
    }

    pub async fn write_reg32(&mut self, address: u32, value: u32) -> Result<()> {
        let window = self.conn.transport.timeouts.control;
        self.send_cmd(Cmd::WriteReg32).await?;
        self.conn.transport.write(&address.to_be_bytes()).await?;
        self.conn.transport.write(&value.to_be_bytes()).await?;

        self.expect_ack(window).await
    }

    /// `FINISH` with mode 0 reboots, mode 1 powers off.
    pub async fn finish(&mut self, power_off: bool) -> Result<()> {
        let window = self.conn.transport.timeouts.control;
        self.send_cmd(Cmd::Finish).await?;
        self.conn.transport.write(&(power_off as u32).to_be_bytes()).await?;

        self.expect_ack(window).await
    }
}

fn parse_pmt(pmt: &[u8], sector_size: u32) -> Vec<Partition> {
    let mut partitions = Vec::new();

    for record in pmt.chunks_exact(PMT_ENTRY_LEN) {
        let name_end = record[..64].iter().position(|&b| b == 0).unwrap_or(64);
        if name_end == 0 {
            break;
        }
        let name = String::from_utf8_lossy(&record[..name_end]).into_owned();
        let size = u64::from_le_bytes(record[64..72].try_into().unwrap());
        let offset = u64::from_le_bytes(record[80..88].try_into().unwrap());

        partitions.push(Partition {
            name,
            start_sector: offset / sector_size as u64,
            sector_count: size.div_ceil(sector_size as u64),
            sector_size,
        });
    }

    partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pmt_entries_parse() {
        let mut pmt = vec![0u8; PMT_ENTRY_LEN * 2];
        pmt[..4].copy_from_slice(b"boot");
        pmt[64..72].copy_from_slice(&0x100000u64.to_le_bytes()); // size
        pmt[80..88].copy_from_slice(&0x8000u64.to_le_bytes()); // offset

        let parts = parse_pmt(&pmt, 512);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, "boot");
        assert_eq!(parts[0].offset(), 0x8000);
        assert_eq!(parts[0].size(), 0x100000);
    }
}
