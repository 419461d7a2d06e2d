/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::codec::frame;
use crate::connection::Connection;
use crate::core::storage::Storage;
use crate::da::DaEntry;
use crate::da::xflash::cmds::{Cmd, EXT_LOAD_ADDR, status};
use crate::da::xflash::storage::detect_storage;
use crate::error::{Error, Result};

/// Sub-chunk size for streamed packet payloads.
pub(super) const DATA_CHUNK: usize = 0x1000;
/// Stage-1 sync byte sent by a freshly started DA1.
const DA1_SYNC_BYTE: u8 = 0xC0;

/// XFlash (V5) stage-2 driver.
pub struct XFlash {
    pub conn: Connection,
    pub entry: DaEntry,
    pub(super) storage: Option<Arc<dyn Storage>>,
    pub(super) write_packet_length: Option<usize>,
    pub(super) read_packet_length: Option<usize>,
    pub(super) using_exts: bool,
    ext_payload: Option<Vec<u8>>,
}

impl XFlash {
    pub fn new(conn: Connection, entry: DaEntry, ext_payload: Option<Vec<u8>>) -> Self {
        XFlash {
            conn,
            entry,
            storage: None,
            write_packet_length: None,
            read_packet_length: None,
            using_exts: false,
            ext_payload,
        }
    }

    /// Writes one magic-framed packet, streaming the payload in 4 KiB
    /// sub-chunks (or less if the DA negotiated a smaller packet length).
    /// No status is consumed.
    pub(super) async fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let sub_chunk = self.write_packet_length.unwrap_or(DATA_CHUNK).clamp(64, DATA_CHUNK);
        self.conn.transport.write(&frame::header(payload.len())).await?;
        for chunk in payload.chunks(sub_chunk) {
            self.conn.transport.write(chunk).await?;
        }
        Ok(())
    }

    /// Reads one magic-framed packet within `window`.
    pub(super) async fn read_packet_timeout(&mut self, window: Duration) -> Result<Vec<u8>> {
        let hdr: [u8; frame::HEADER_LEN] = self
            .conn
            .transport
            .read_exact(frame::HEADER_LEN, window)
            .await?
            .try_into()
            .unwrap();
        let len = frame::parse_header(&hdr)? as usize;

        self.conn.transport.read_exact(len, window).await
    }

    pub(super) async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let window = self.conn.transport.timeouts.control;
        self.read_packet_timeout(window).await
    }

    /// Reads one packet and normalizes it into a status word: a 2-byte
    /// payload is a u16 status, a 4-byte payload equal to the magic is OK,
    /// anything else 4 bytes and up is a u32 status.
    pub(super) async fn get_status(&mut self) -> Result<u32> {
        let data = self.read_packet().await?;

        let st = match data.len() {
            2 => u16::from_le_bytes(data[0..2].try_into().unwrap()) as u32,
            4 => {
                let value = u32::from_le_bytes(data[0..4].try_into().unwrap());
                if value == frame::MAGIC { status::OK } else { value }
            }
            n if n >= 4 => u32::from_le_bytes(data[0..4].try_into().unwrap()),
            1 => data[0] as u32,
            _ => 0xFFFFFFFF,
        };

        debug!("[RX] Status: 0x{:08X}", st);
        Ok(st)
    }

    /// Sends a command word and consumes the immediate OK.
    pub(super) async fn send_cmd(&mut self, cmd: Cmd) -> Result<()> {
        debug!("[TX] Command 0x{:08X}", cmd as u32);
        self.write_packet(&(cmd as u32).to_le_bytes()).await?;
        status_ok!(self);
        Ok(())
    }

    /// Sends a parameter or data packet and consumes the OK.
    pub(super) async fn send_data(&mut self, payload: &[u8]) -> Result<()> {
        self.write_packet(payload).await?;
        status_ok!(self);
        Ok(())
    }

    /// Device-control query: `DEVICE_CTRL → OK → sub → OK → payload → OK`.
    /// With `params` the payload flows host-to-device instead.
    pub(super) async fn devctrl(&mut self, cmd: Cmd, params: Option<&[&[u8]]>) -> Result<Vec<u8>> {
        self.send_cmd(Cmd::DeviceCtrl).await?;
        self.send_cmd(cmd).await?;

        if let Some(params) = params {
            for param in params {
                self.send_data(param).await?;
            }
            return Ok(Vec::new());
        }

        let data = self.read_packet().await?;
        status_ok!(self);
        Ok(data)
    }

    /// Full stage-1 to stage-2 chain: upload DA1 over the BROM protocol,
    /// jump, synchronize, then BOOT_TO the stage-2 region.
    pub async fn upload_da(&mut self) -> Result<()> {
        let (da1_addr, da1_data, da1_sig) = {
            let da1 = self
                .entry
                .stage1()
                .ok_or_else(|| Error::Malformed("DA entry has no stage-1 region".into()))?;
            (da1.load_address, da1.data.clone(), da1.sig_len)
        };

        self.conn.send_da(da1_addr, &da1_data, da1_sig).await?;
        info!("Sent DA1, jumping to 0x{:08X}", da1_addr);
        self.conn.jump_da(da1_addr).await?;
        self.stage1_sync().await?;

        self.fetch_packet_lengths().await?;

        let (da2_addr, da2_data) = {
            let da2 = self
                .entry
                .stage2()
                .ok_or_else(|| Error::Malformed("DA entry has no stage-2 region".into()))?;
            let code_len = da2.data.len().saturating_sub(da2.sig_len as usize);
            (da2.load_address, da2.data[..code_len].to_vec())
        };

        self.boot_to(da2_addr, &da2_data).await?;
        info!("DA2 is running");

        self.log_sla_status().await;
        self.fetch_packet_lengths().await?;

        if self.ext_payload.is_some() {
            self.boot_extensions().await?;
        }

        Ok(())
    }

    /// DA1 announces itself with a single 0xC0, then expects the sync word
    /// and the environment setup exchange.
    async fn stage1_sync(&mut self) -> Result<()> {
        let window = self.conn.transport.timeouts.control;
        let sync = self.conn.transport.read_u8(window).await?;
        if sync != DA1_SYNC_BYTE {
            return Err(Error::Malformed(format!("unexpected DA1 sync byte 0x{:02X}", sync)));
        }

        self.write_packet(&(Cmd::SyncSignal as u32).to_le_bytes()).await?;

        let mut env = Vec::new();
        env.extend_from_slice(&2u32.to_le_bytes()); // da_log_level = 2 (UART)
        env.extend_from_slice(&1u32.to_le_bytes()); // log_channel = 1
        env.extend_from_slice(&1u32.to_le_bytes()); // system_os = OS_LINUX
        env.extend_from_slice(&0u32.to_le_bytes()); // ufs_provision = 0
        env.extend_from_slice(&0u32.to_le_bytes());

        self.write_packet(&(Cmd::SetupEnvironment as u32).to_le_bytes()).await?;
        self.send_data(&env).await?;

        self.write_packet(&(Cmd::SetupHwInitParams as u32).to_le_bytes()).await?;
        self.send_data(&[0u8; 4]).await?;

        status_any!(self, Cmd::SyncSignal as u32);
        info!("Received DA1 sync signal");
        Ok(())
    }

    /// Uploads `data` to `addr` and jumps to it. Chunks are individual
    /// packets; the final status arrives up to half a second later as either
    /// OK or the SYNC word.
    pub async fn boot_to(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        info!("BOOT_TO 0x{:08X}, 0x{:X} bytes", addr, data.len());

        self.send_cmd(Cmd::BootTo).await?;

        let mut param = Vec::with_capacity(16);
        param.extend_from_slice(&(addr as u64).to_le_bytes());
        param.extend_from_slice(&(data.len() as u64).to_le_bytes());
        self.send_data(&param).await?;

        for chunk in data.chunks(DATA_CHUNK) {
            self.write_packet(chunk).await?;
        }

        self.conn.transport.sleep(Duration::from_millis(500)).await?;
        status_any!(self, status::OK, Cmd::SyncSignal as u32);

        Ok(())
    }

    /// Installs the extension payload at its well-known address, unlocking
    /// the raw memory and SEJ commands.
    pub async fn boot_extensions(&mut self) -> Result<()> {
        if self.using_exts {
            warn!("DA extensions already in use, skipping re-upload");
            return Ok(());
        }
        let payload = match &self.ext_payload {
            Some(payload) => payload.clone(),
            None => return Err(Error::Unsupported { op: "extensions (no payload injected)" }),
        };

        info!("Booting DA extensions...");
        self.boot_to(EXT_LOAD_ADDR, &payload).await?;
        self.using_exts = true;
        Ok(())
    }

    async fn fetch_packet_lengths(&mut self) -> Result<()> {
        let resp = self.devctrl(Cmd::GetPacketLength, None).await?;
        if resp.len() < 8 {
            return Err(Error::Malformed("short GET_PACKET_LENGTH response".into()));
        }

        let write_len = u32::from_le_bytes(resp[0..4].try_into().unwrap()) as usize;
        let read_len = u32::from_le_bytes(resp[4..8].try_into().unwrap()) as usize;
        debug!("Packet lengths: write=0x{:X} read=0x{:X}", write_len, read_len);

        self.write_packet_length = Some(write_len);
        self.read_packet_length = Some(read_len);
        Ok(())
    }

    async fn log_sla_status(&mut self) {
        match self.devctrl(Cmd::SlaEnabledStatus, None).await {
            Ok(resp) if resp.len() >= 4 => {
                let enabled = u32::from_le_bytes(resp[0..4].try_into().unwrap());
                debug!("DA SLA status: {}", enabled);
            }
            Ok(_) => {}
            Err(e) => debug!("SLA status query failed: {}", e),
        }
    }

    /// Which agent loaded the DA ("brom" or "preloader").
    pub async fn connection_agent(&mut self) -> Result<String> {
        let resp = self.devctrl(Cmd::GetConnectionAgent, None).await?;
        Ok(String::from_utf8_lossy(&resp).trim_end_matches('\0').to_string())
    }

    pub async fn chip_id(&mut self) -> Result<Vec<u8>> {
        self.devctrl(Cmd::GetChipId, None).await
    }

    pub async fn random_id(&mut self) -> Result<Vec<u8>> {
        self.devctrl(Cmd::GetRandomId, None).await
    }

    pub async fn da_version(&mut self) -> Result<String> {
        let resp = self.devctrl(Cmd::GetDaVersion, None).await?;
        Ok(String::from_utf8_lossy(&resp).trim_end_matches('\0').to_string())
    }

    /// `(base, length)` of the DA-visible DRAM window.
    pub async fn ram_info(&mut self) -> Result<(u64, u64)> {
        let resp = self.devctrl(Cmd::GetRamInfo, None).await?;
        if resp.len() < 16 {
            return Err(Error::Malformed("short GET_RAM_INFO response".into()));
        }
        let base = u64::from_le_bytes(resp[0..8].try_into().unwrap());
        let length = u64::from_le_bytes(resp[8..16].try_into().unwrap());
        Ok((base, length))
    }

    /// Reports the negotiated USB speed. Downshifted links are surfaced to
    /// the caller only; re-enumeration is never initiated from here.
    pub async fn usb_speed(&mut self) -> Result<u32> {
        let resp = self.devctrl(Cmd::GetUsbSpeed, None).await?;
        if resp.len() < 4 {
            return Err(Error::Malformed("short GET_USB_SPEED response".into()));
        }
        Ok(u32::from_le_bytes(resp[0..4].try_into().unwrap()))
    }

    pub(crate) async fn get_or_detect_storage(&mut self) -> Result<Arc<dyn Storage>> {
        if let Some(storage) = &self.storage {
            return Ok(storage.clone());
        }

        let storage = detect_storage(self).await?;
        info!("Detected storage: {}", storage.describe());
        self.storage = Some(storage.clone());
        Ok(storage)
    }

    /// Plain reboot: the shutdown command with no parameter block.
    pub async fn reboot(&mut self) -> Result<()> {
        info!("Rebooting device");
        self.send_cmd(Cmd::Shutdown).await
    }

    /// Shutdown with an explicit boot target.
    pub async fn shutdown(&mut self, mode: crate::da::ShutdownMode) -> Result<()> {
        info!("Shutting down into {:?}", mode);
        self.send_cmd(Cmd::Shutdown).await?;

        let mut param = Vec::with_capacity(12);
        param.extend_from_slice(&0u32.to_le_bytes()); // async_mode
        param.extend_from_slice(&0u32.to_le_bytes()); // dl_bit
        param.extend_from_slice(&(mode as u32).to_le_bytes());
        self.send_data(&param).await
    }

    /// Raw memory dump through the extension set.
    pub async fn peek(&mut self, addr: u32, length: usize) -> Result<Vec<u8>> {
        if !self.using_exts {
            return Err(Error::Unsupported { op: "peek (extensions not booted)" });
        }
        super::exts::read_mem_ext(self, addr, length).await
    }

    pub async fn read32(&mut self, addr: u32) -> Result<u32> {
        if self.using_exts {
            return super::exts::read32_ext(self, addr).await;
        }

        let param = addr.to_le_bytes();
        self.send_cmd(Cmd::DeviceCtrl).await?;
        self.send_cmd(Cmd::DeviceCtrlReadRegister).await?;
        self.send_data(&param).await?;
        let resp = self.read_packet().await?;
        status_ok!(self);

        if resp.len() < 4 {
            return Err(Error::Malformed("short register read".into()));
        }
        Ok(u32::from_le_bytes(resp[0..4].try_into().unwrap()))
    }

    pub async fn write32(&mut self, addr: u32, value: u32) -> Result<()> {
        if self.using_exts {
            return super::exts::write32_ext(self, addr, value).await;
        }

        let mut param = Vec::with_capacity(8);
        param.extend_from_slice(&addr.to_le_bytes());
        param.extend_from_slice(&value.to_le_bytes());
        self.devctrl(Cmd::SetRegisterValue, Some(&[&param])).await?;
        Ok(())
    }
}

// Flash I/O entry points; the transaction bodies live in `flash`.
impl XFlash {
    pub async fn read_flash(
        &mut self,
        addr: u64,
        size: usize,
        section: crate::core::storage::PartitionKind,
        label: &str,
    ) -> Result<Vec<u8>> {
        super::flash::read_flash(self, addr, size, section, label).await
    }

    pub async fn write_flash(
        &mut self,
        addr: u64,
        size: usize,
        data: &[u8],
        section: crate::core::storage::PartitionKind,
        label: &str,
    ) -> Result<()> {
        super::flash::write_flash(self, addr, size, data, section, label).await
    }

    pub async fn erase_flash(
        &mut self,
        addr: u64,
        size: usize,
        section: crate::core::storage::PartitionKind,
        label: &str,
    ) -> Result<()> {
        super::flash::erase_flash(self, addr, size, section, label).await
    }

    pub async fn format(
        &mut self,
        addr: u64,
        size: u64,
        section: crate::core::storage::PartitionKind,
        label: &str,
    ) -> Result<()> {
        super::flash::format(self, addr, size, section, label).await
    }

    pub async fn download(&mut self, part_name: &str, data: &[u8]) -> Result<()> {
        super::flash::download(self, part_name, data).await
    }

    pub async fn upload(&mut self, part_name: &str) -> Result<Vec<u8>> {
        super::flash::upload(self, part_name).await
    }

    pub async fn read_partitions(&mut self) -> Result<Vec<crate::core::storage::Partition>> {
        super::flash::read_partitions(self).await
    }
}
