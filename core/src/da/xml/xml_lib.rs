/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::sync::Arc;

use log::{debug, info};

use crate::codec::frame;
use crate::connection::Connection;
use crate::core::storage::Storage;
use crate::da::DaEntry;
use crate::da::xml::cmds::{
    self,
    BootTo,
    CMD_END,
    CMD_START,
    GetHwInfo,
    HostSupportedCommands,
    NotifyInitHw,
    SetRuntimeParameter,
    XmlCommand,
    create_cmd,
};
use crate::da::xml::sla::DaSlaSigner;
use crate::error::{Error, Result};
use crate::utilities::xml::{get_tag, get_tag_usize};

const DATA_CHUNK: usize = 0x1000;
const DA1_SYNC_BYTE: u8 = 0xC0;
const RAW_OK: &[u8] = b"OK";

/// Direction-specific payload for one command exchange.
pub(super) enum Phase<'a> {
    None,
    /// Device pushes bytes to the host (CMD:UPLOAD-FILE).
    Upload(&'a mut Vec<u8>),
    /// Host pushes bytes to the device (CMD:DOWNLOAD-FILE).
    Download(&'a [u8]),
}

/// XML (V6) stage-2 driver. Same magic framing as XFlash, but every logical
/// packet is a UTF-8 `<da>` document.
pub struct XmlDa {
    pub conn: Connection,
    pub entry: DaEntry,
    pub(super) storage: Option<Arc<dyn Storage>>,
    pub(super) sla_signer: Option<Arc<dyn DaSlaSigner>>,
}

impl XmlDa {
    pub fn new(conn: Connection, entry: DaEntry, sla_signer: Option<Arc<dyn DaSlaSigner>>) -> Self {
        XmlDa { conn, entry, storage: None, sla_signer }
    }

    pub(super) async fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        self.conn.transport.write(&frame::header(payload.len())).await?;
        for chunk in payload.chunks(DATA_CHUNK) {
            self.conn.transport.write(chunk).await?;
        }
        Ok(())
    }

    pub(super) async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let window = self.conn.transport.timeouts.bulk_frame;
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

    pub(super) async fn read_doc(&mut self) -> Result<String> {
        let data = self.read_packet().await?;
        let doc = String::from_utf8_lossy(&data).trim_end_matches('\0').to_string();
        debug!("[RX] {}", doc);
        Ok(doc)
    }

    async fn ack_ok(&mut self) -> Result<()> {
        self.write_packet(RAW_OK).await
    }

    /// Sends a command document and runs the exchange until the device's
    /// CMD:END, feeding any data phase from `phase`. Returns the result
    /// document (the one carrying `<status>`).
    pub(super) async fn run_cmd<C: XmlCommand>(
        &mut self,
        cmd: &C,
        mut phase: Phase<'_>,
    ) -> Result<String> {
        let doc = create_cmd(cmd);
        debug!("[TX] {}", doc);
        self.write_packet(doc.as_bytes()).await?;

        let mut result = None;
        loop {
            let rx = self.read_doc().await?;

            if rx.contains(CMD_START) {
                continue;
            }
            if rx.contains(CMD_END) {
                self.ack_ok().await?;
                break;
            }
            if rx.contains("CMD:PROGRESS-REPORT") {
                self.ack_ok().await?;
                continue;
            }
            if rx.contains("CMD:UPLOAD-FILE") {
                let Phase::Upload(sink) = &mut phase else {
                    return Err(Error::Malformed("unexpected upload phase".into()));
                };
                self.upload_phase(&rx, sink).await?;
                continue;
            }
            if rx.contains("CMD:DOWNLOAD-FILE") {
                let Phase::Download(source) = &phase else {
                    return Err(Error::Malformed("unexpected download phase".into()));
                };
                let source = *source;
                self.download_phase(&rx, source).await?;
                continue;
            }
            if rx.contains("<status>") {
                result = Some(rx);
                continue;
            }

            debug!("Ignoring unrecognized document");
        }

        let result =
            result.ok_or_else(|| Error::Malformed("command ended without a status".into()))?;
        let status = get_tag(&result, "status")?;
        if status != "OK" && status != "SUCCEEDED" {
            let message = get_tag(&result, "message").unwrap_or_else(|_| status.clone());
            return Err(Error::Malformed(format!("DA refused command: {}", message)));
        }

        Ok(result)
    }

    /// Device-to-host transfer: `<length>` announces the total, raw frames
    /// follow, each acknowledged with a raw OK.
    async fn upload_phase(&mut self, request: &str, sink: &mut Vec<u8>) -> Result<()> {
        let total = get_tag_usize(request, "length").unwrap_or(0);
        self.ack_ok().await?;

        let events = self.conn.events.clone();
        while sink.len() < total {
            let chunk = self.read_packet().await?;
            if chunk.is_empty() {
                break;
            }
            sink.extend_from_slice(&chunk);
            self.ack_ok().await?;
            events.progress(sink.len() as u64, total as u64, "upload");
        }
        Ok(())
    }

    /// Host-to-device transfer: the request names a packet length, data goes
    /// out in raw frames, each answered with a raw OK.
    async fn download_phase(&mut self, request: &str, source: &[u8]) -> Result<()> {
        let packet_length = get_tag_usize(request, "packet_length").unwrap_or(DATA_CHUNK);
        self.ack_ok().await?;

        let events = self.conn.events.clone();
        let mut sent = 0usize;
        for chunk in source.chunks(packet_length.clamp(64, 0x100000)) {
            self.write_packet(chunk).await?;

            let reply = self.read_packet().await?;
            if reply != RAW_OK {
                let text = String::from_utf8_lossy(&reply).into_owned();
                return Err(Error::PartialWrite {
                    offset: sent as u64,
                    source: Box::new(Error::Malformed(format!("chunk rejected: {}", text))),
                });
            }
            sent += chunk.len();
            events.progress(sent as u64, source.len() as u64, "download");
        }

        // Zero-length frame terminates the stream.
        self.write_packet(&[]).await?;
        Ok(())
    }

    /// Full stage-1 to stage-2 chain for the XML DA family.
    pub async fn upload_da(&mut self) -> Result<()> {
        let (da1_addr, da1_data, da1_sig) = {
            let da1 = self
                .entry
                .stage1()
                .ok_or_else(|| Error::Malformed("DA entry has no stage-1 region".into()))?;
            (da1.load_address, da1.data.clone(), da1.sig_len)
        };

        self.conn.send_da(da1_addr, &da1_data, da1_sig).await?;
        info!("Sent XML DA1, jumping to 0x{:08X}", da1_addr);
        self.conn.jump_da(da1_addr).await?;

        let window = self.conn.transport.timeouts.control;
        let sync = self.conn.transport.read_u8(window).await?;
        if sync != DA1_SYNC_BYTE {
            return Err(Error::Malformed(format!("unexpected DA1 sync byte 0x{:02X}", sync)));
        }

        self.run_cmd(&SetRuntimeParameter, Phase::None).await?;

        let (da2_addr, da2_data) = {
            let da2 = self
                .entry
                .stage2()
                .ok_or_else(|| Error::Malformed("DA entry has no stage-2 region".into()))?;
            let code_len = da2.data.len().saturating_sub(da2.sig_len as usize);
            (da2.load_address, da2.data[..code_len].to_vec())
        };
        self.boot_to(da2_addr as u64, &da2_data).await?;

        // Some DA builds reject this; harmless either way.
        self.run_cmd(&HostSupportedCommands, Phase::None).await.ok();
        self.run_cmd(&NotifyInitHw, Phase::None).await?;

        super::sla::da_sla_verify(self).await?;

        info!("XML DA2 is running");
        Ok(())
    }

    pub async fn boot_to(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        info!("XML BOOT-TO 0x{:X}, 0x{:X} bytes", addr, data.len());
        let cmd = BootTo { at_addr: addr, jmp_addr: addr, length: data.len() as u64 };
        self.run_cmd(&cmd, Phase::Download(data)).await?;
        Ok(())
    }

    pub(crate) async fn get_or_detect_storage(&mut self) -> Result<Arc<dyn Storage>> {
        if let Some(storage) = &self.storage {
            return Ok(storage.clone());
        }

        let mut info = Vec::new();
        self.run_cmd(&GetHwInfo, Phase::Upload(&mut info)).await?;
        let doc = String::from_utf8_lossy(&info).into_owned();

        let storage = super::flash::storage_from_hw_info(&doc)?;
        info!("Detected storage: {}", storage.describe());
        self.storage = Some(storage.clone());
        Ok(storage)
    }

    /// System property query, used by the DA-SLA flow.
    pub async fn get_sys_property(&mut self, key: &'static str) -> Result<String> {
        let mut value = Vec::new();
        let result =
            self.run_cmd(&cmds::GetSysProperty { key }, Phase::Upload(&mut value)).await?;

        if !value.is_empty() {
            return Ok(String::from_utf8_lossy(&value).trim_end_matches('\0').to_string());
        }
        get_tag(&result, "value")
    }
}
