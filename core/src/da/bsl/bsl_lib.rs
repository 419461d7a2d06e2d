/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::time::Duration;

use log::{debug, info};

use crate::codec::hdlc;
use crate::connection::transport::Transport;
use crate::core::storage::Partition;
use crate::da::bsl::cmds::{BslCmd, BslResp};
use crate::error::{Error, Result};
use crate::event::EventSink;

/// FDL transfer chunk.
const FDL_CHUNK: usize = 0x1000;
/// Partition transfer chunk.
const PART_CHUNK: usize = 0x10000;
/// Settle time between acknowledging a baud change and retuning the line.
const BAUD_SETTLE: Duration = Duration::from_millis(100);

/// SPRD/Unisoc BSL driver. Runs against both the BROM and the FDLs, since
/// all stages speak the same HDLC-framed command set.
pub struct Bsl {
    pub transport: Transport,
    pub events: EventSink,
}

impl Bsl {
    pub fn new(transport: Transport, events: EventSink) -> Self {
        Bsl { transport, events }
    }

    /// Frame payload: type u16 LE, data length u32 LE, data.
    async fn send_frame(&mut self, cmd: BslCmd, data: &[u8]) -> Result<()> {
        debug!("[TX] BSL 0x{:02X}, {} data bytes", cmd as u16, data.len());
        let mut payload = Vec::with_capacity(6 + data.len());
        payload.extend_from_slice(&(cmd as u16).to_le_bytes());
        payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
        payload.extend_from_slice(data);

        self.transport.write(&hdlc::frame(&payload)).await
    }

    /// Reads a full `7E ... 7E` frame and unpacks type and data.
    async fn recv_frame(&mut self, window: Duration) -> Result<(BslResp, Vec<u8>)> {
        let mut raw = Vec::with_capacity(64);

        // Skip inter-frame noise until the opening flag.
        loop {
            let byte = self.transport.read_u8(window).await?;
            if byte == hdlc::FLAG {
                raw.push(byte);
                break;
            }
        }
        loop {
            let byte = self.transport.read_u8(window).await?;
            raw.push(byte);
            if byte == hdlc::FLAG && raw.len() > 1 {
                break;
            }
        }

        let payload = hdlc::unframe(&raw)?;
        if payload.len() < 6 {
            return Err(Error::Malformed("BSL frame too short".into()));
        }

        let resp_type = u16::from_le_bytes([payload[0], payload[1]]);
        let data_len = u32::from_le_bytes(payload[2..6].try_into().unwrap()) as usize;
        if payload.len() < 6 + data_len {
            return Err(Error::Malformed("BSL frame shorter than its length field".into()));
        }

        let resp = BslResp::try_from(resp_type)
            .map_err(|_| Error::Malformed(format!("unknown BSL response 0x{:04X}", resp_type)))?;
        debug!("[RX] BSL {:?}, {} data bytes", resp, data_len);

        Ok((resp, payload[6..6 + data_len].to_vec()))
    }

    /// One command round-trip that must end in OK.
    async fn command(&mut self, cmd: BslCmd, data: &[u8], window: Duration) -> Result<()> {
        self.send_frame(cmd, data).await?;
        let (resp, _) = self.recv_frame(window).await?;
        match resp {
            BslResp::Ok => Ok(()),
            other => Err(Error::Protocol { code: other as u32 }),
        }
    }

    /// One command round-trip that must return a DATA frame.
    async fn query(&mut self, cmd: BslCmd, data: &[u8], window: Duration) -> Result<Vec<u8>> {
        self.send_frame(cmd, data).await?;
        let (resp, payload) = self.recv_frame(window).await?;
        match resp {
            BslResp::Data => Ok(payload),
            other => Err(Error::Protocol { code: other as u32 }),
        }
    }

    /// Initial CONNECT exchange with whichever stage is listening.
    pub async fn connect(&mut self) -> Result<()> {
        info!("BSL connect");
        let window = self.transport.timeouts.identity;
        self.command(BslCmd::Connect, &[], window).await
    }

    /// Uploads an FDL image: `DATA_START`, 4 KiB `DATA_MIDST` chunks,
    /// `DATA_END`, then `DATA_EXEC` to run it.
    pub async fn upload_fdl(&mut self, address: u32, data: &[u8]) -> Result<()> {
        info!("Uploading FDL to 0x{:08X}, 0x{:X} bytes", address, data.len());
        let window = self.transport.timeouts.bulk_frame;

        let mut start = Vec::with_capacity(8);
        start.extend_from_slice(&address.to_le_bytes());
        start.extend_from_slice(&(data.len() as u32).to_le_bytes());
        self.command(BslCmd::DataStart, &start, window).await?;

        let events = self.events.clone();
        let mut sent = 0usize;
        for chunk in data.chunks(FDL_CHUNK) {
            self.command(BslCmd::DataMidst, chunk, window).await?;
            sent += chunk.len();
            events.progress(sent as u64, data.len() as u64, "fdl");
        }

        self.command(BslCmd::DataEnd, &[], window).await?;
        self.command(BslCmd::DataExec, &[], window).await?;

        info!("FDL running");
        Ok(())
    }

    /// Negotiates a new line rate, then retunes the local port after the
    /// device has had time to switch.
    pub async fn change_baudrate(&mut self, rate: u32) -> Result<()> {
        info!("Changing baudrate to {}", rate);
        let window = self.transport.timeouts.control;
        self.command(BslCmd::ChangeBaudrate, &rate.to_le_bytes(), window).await?;

        self.transport.sleep(BAUD_SETTLE).await?;
        self.transport.retune(rate).await
    }

    /// `name\0 | offset i64 LE | size u64 LE` parameter block shared by the
    /// partition commands.
    fn partition_param(name: &str, offset: i64, size: u64) -> Vec<u8> {
        let mut param = Vec::with_capacity(name.len() + 17);
        param.extend_from_slice(name.as_bytes());
        param.push(0);
        param.extend_from_slice(&offset.to_le_bytes());
        param.extend_from_slice(&size.to_le_bytes());
        param
    }

    /// Reads `size` bytes of the named partition in 64 KiB requests.
    pub async fn read_partition(&mut self, name: &str, size: u64) -> Result<Vec<u8>> {
        info!("BSL read of '{}', 0x{:X} bytes", name, size);
        let window = self.transport.timeouts.bulk_frame;
        let events = self.events.clone();

        let mut out = Vec::with_capacity(size as usize);
        while (out.len() as u64) < size {
            let want = PART_CHUNK.min((size - out.len() as u64) as usize);
            let param = Self::partition_param(name, out.len() as i64, want as u64);
            let chunk = self.query(BslCmd::ReadPartition, &param, window).await?;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
            events.progress(out.len() as u64, size, name);
        }

        Ok(out)
    }

    /// Writes the named partition in 64 KiB chunks, each acknowledged.
    pub async fn write_partition(&mut self, name: &str, data: &[u8]) -> Result<()> {
        info!("BSL write of '{}', 0x{:X} bytes", name, data.len());
        let window = self.transport.timeouts.bulk_frame;
        let events = self.events.clone();

        let mut written = 0usize;
        for chunk in data.chunks(PART_CHUNK) {
            let mut param = Self::partition_param(name, written as i64, chunk.len() as u64);
            param.extend_from_slice(chunk);

            if let Err(e) = self.command(BslCmd::WritePartition, &param, window).await {
                return Err(Error::PartialWrite { offset: written as u64, source: Box::new(e) });
            }
            written += chunk.len();
            events.progress(written as u64, data.len() as u64, name);
        }

        Ok(())
    }

    pub async fn erase_partition(&mut self, name: &str) -> Result<()> {
        info!("BSL erase of '{}'", name);
        let window = self.transport.timeouts.erase;
        let param = Self::partition_param(name, 0, 0);
        self.command(BslCmd::ErasePartition, &param, window).await
    }

    /// Raw flash read by absolute address.
    pub async fn read_flash(&mut self, address: u32, size: u32) -> Result<Vec<u8>> {
        let window = self.transport.timeouts.bulk_frame;
        let mut param = Vec::with_capacity(8);
        param.extend_from_slice(&address.to_le_bytes());
        param.extend_from_slice(&size.to_le_bytes());
        self.query(BslCmd::ReadFlash, &param, window).await
    }

    pub async fn power_off(&mut self) -> Result<()> {
        info!("BSL power off");
        let window = self.transport.timeouts.control;
        self.command(BslCmd::PowerOff, &[], window).await
    }

    pub async fn reset(&mut self) -> Result<()> {
        info!("BSL reset");
        let window = self.transport.timeouts.control;
        self.command(BslCmd::Reset, &[], window).await
    }

    /// Chip UID, as raw bytes.
    pub async fn read_uid(&mut self) -> Result<Vec<u8>> {
        let window = self.transport.timeouts.control;
        self.query(BslCmd::ReadUid, &[], window).await
    }

    /// SPRD exposes no partition table read; known partitions come from the
    /// firmware package, which is the host's concern.
    pub fn read_partitions(&mut self) -> Vec<Partition> {
        Vec::new()
    }
}
