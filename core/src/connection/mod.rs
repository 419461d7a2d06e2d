/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod command;
pub mod port;
#[cfg(feature = "serial")]
pub mod serial;
pub mod sla;
pub mod transport;

use std::time::Duration;

use log::{debug, info, warn};

use crate::codec::checksum;
use crate::connection::command::{Command, HANDSHAKE_RETRIES, HANDSHAKE_TX, TargetConfig, status};
use crate::connection::sla::SlaKeyring;
use crate::connection::transport::Transport;
use crate::core::devinfo::DeviceIdentity;
use crate::error::{Error, Result, SecurityError, TransportError};
use crate::event::EventSink;

const MAX_ME_ID_LEN: usize = 16;
const MAX_SOC_ID_LEN: usize = 32;

/// Stage-1 driver: speaks the byte-echo protocol of the MTK preloader/BROM.
#[derive(Debug)]
pub struct Connection {
    pub transport: Transport,
    pub events: EventSink,
    pub keyring: SlaKeyring,
}

impl Connection {
    pub fn new(transport: Transport, events: EventSink) -> Self {
        Connection { transport, events, keyring: SlaKeyring::new() }
    }

    /// Writes `data` and requires the device to echo it back verbatim.
    pub async fn echo(&mut self, data: &[u8], window: Duration) -> Result<()> {
        self.transport.write(data).await?;
        let echoed = self.transport.read_exact(data.len(), window).await?;
        if echoed != data {
            return Err(Error::Malformed(format!(
                "echo mismatch: sent {:02X?}, got {:02X?}",
                data, echoed
            )));
        }
        Ok(())
    }

    pub(crate) async fn echo_cmd(&mut self, cmd: Command) -> Result<()> {
        let window = self.transport.timeouts.identity;
        self.echo(&[cmd as u8], window).await
    }

    pub(crate) async fn echo_u32(&mut self, value: u32) -> Result<()> {
        let window = self.transport.timeouts.identity;
        self.echo(&value.to_be_bytes(), window).await
    }

    /// Maps a stage-1 status word onto the failure taxonomy.
    pub(crate) fn map_security(code: u16) -> Error {
        match code {
            status::SBC_ENABLED => SecurityError::SbcBlocked.into(),
            status::SLA_REQUIRED => SecurityError::SlaRequired.into(),
            status::DAA_REQUIRED => SecurityError::DaaBlocked.into(),
            status::DA_SEC_FIRST..=status::DA_SEC_LAST => SecurityError::Rejected { code }.into(),
            _ => Error::Protocol { code: code as u32 },
        }
    }

    fn check_status(code: u16) -> Result<()> {
        if code == status::OK { Ok(()) } else { Err(Self::map_security(code)) }
    }

    /// Startup handshake: each of the four magic bytes must be answered with
    /// its one's complement. Any wrong byte restarts the sequence from the
    /// beginning; between retries the input is drained and, from the second
    /// retry onward, a lone 0xA0 is sent to resynchronize.
    pub async fn handshake(&mut self) -> Result<()> {
        info!("Starting handshake...");
        let window = self.transport.timeouts.handshake_byte;

        for attempt in 0..HANDSHAKE_RETRIES {
            if attempt >= 1 {
                self.transport.drain().await?;
            }
            if attempt >= 2 {
                self.transport.write(&[HANDSHAKE_TX[0]]).await?;
                let _ = self.transport.read_u8(window).await;
                self.transport.drain().await?;
            }

            match self.handshake_pass(window).await {
                Ok(true) => {
                    info!("Handshake completed after {} attempt(s)", attempt + 1);
                    return Ok(());
                }
                Ok(false) => debug!("Handshake mismatch on attempt {}", attempt + 1),
                Err(Error::Transport(TransportError::Timeout)) => {
                    debug!("Handshake timeout on attempt {}", attempt + 1);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::HandshakeFailed { attempts: HANDSHAKE_RETRIES })
    }

    async fn handshake_pass(&mut self, window: Duration) -> Result<bool> {
        for &tx in &HANDSHAKE_TX {
            self.transport.write(&[tx]).await?;
            let reply = self.transport.read_u8(window).await?;
            if reply != !tx {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Runs the fixed identity command sequence. Optional probes are allowed
    /// to fail without aborting.
    pub async fn probe_identity(&mut self) -> Result<DeviceIdentity> {
        let hw_code = self.get_hw_code().await?;
        let (bl_version, is_brom) = self.get_bl_version().await?;
        let (hw_sub_code, hw_version, sw_version) = self.get_hw_sw_ver().await?;
        let target_config = self.get_target_config().await?;
        let chip_evolution = match self.get_pl_capabilities().await {
            Ok((_, evolution)) => evolution,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(_) => {
                self.transport.drain().await.ok();
                0
            }
        };
        let me_id = self.optional_id(Command::GetMeId, MAX_ME_ID_LEN).await?;
        let soc_id = self.optional_id(Command::GetSocId, MAX_SOC_ID_LEN).await?;

        let identity = DeviceIdentity {
            hw_code,
            hw_sub_code,
            hw_version,
            sw_version,
            chip_evolution,
            bl_version,
            is_brom,
            me_id,
            soc_id,
            target_config,
        };
        info!(
            "Identified target: hw_code=0x{:04X} hw_ver=0x{:04X} sw_ver=0x{:04X} brom={}",
            identity.hw_code, identity.hw_version, identity.sw_version, identity.is_brom
        );

        Ok(identity)
    }

    pub async fn get_hw_code(&mut self) -> Result<u16> {
        let window = self.transport.timeouts.identity;
        self.echo_cmd(Command::GetHwCode).await?;

        let hw_code = self.transport.read_u16_be(window).await?;
        let st = self.transport.read_u16_be(window).await?;
        Self::check_status(st)?;

        Ok(hw_code)
    }

    /// `GET_BL_VER` has no status word. A device that echoes the command
    /// byte back is still in BROM; otherwise the byte is the loader version.
    pub async fn get_bl_version(&mut self) -> Result<(u8, bool)> {
        let window = self.transport.timeouts.identity;
        self.transport.write(&[Command::GetBlVer as u8]).await?;
        let version = self.transport.read_u8(window).await?;

        let is_brom = version == Command::GetBlVer as u8;
        if is_brom {
            info!("Device is in BROM mode");
        }

        Ok((version, is_brom))
    }

    pub async fn get_hw_sw_ver(&mut self) -> Result<(u16, u16, u16)> {
        let window = self.transport.timeouts.identity;
        self.echo_cmd(Command::GetHwSwVer).await?;

        let hw_sub_code = self.transport.read_u16_be(window).await?;
        let hw_version = self.transport.read_u16_be(window).await?;
        let sw_version = self.transport.read_u16_be(window).await?;
        let st = self.transport.read_u16_be(window).await?;
        Self::check_status(st)?;

        Ok((hw_sub_code, hw_version, sw_version))
    }

    pub async fn get_target_config(&mut self) -> Result<TargetConfig> {
        let window = self.transport.timeouts.identity;
        self.echo_cmd(Command::GetTargetConfig).await?;

        let config = self.transport.read_u32_be(window).await?;
        let st = self.transport.read_u16_be(window).await?;
        Self::check_status(st)?;

        Ok(TargetConfig(config))
    }

    /// Preloader capabilities: the first word is the capability bitmap, the
    /// second carries the chip evolution in its low half.
    pub async fn get_pl_capabilities(&mut self) -> Result<(u32, u16)> {
        let window = self.transport.timeouts.identity;
        self.echo_cmd(Command::GetPlCap).await?;

        let cap0 = self.transport.read_u32_be(window).await?;
        let cap1 = self.transport.read_u32_be(window).await?;

        Ok((cap0, cap1 as u16))
    }

    /// Length-prefixed identifier probe (`GET_ME_ID` / `GET_SOC_ID`). These
    /// are optional; silence or garbage yields an empty identifier.
    async fn optional_id(&mut self, cmd: Command, max_len: usize) -> Result<Vec<u8>> {
        let window = self.transport.timeouts.identity;

        if let Err(e) = self.echo(&[cmd as u8], window).await {
            if matches!(e, Error::Cancelled) {
                return Err(e);
            }
            self.transport.drain().await.ok();
            return Ok(Vec::new());
        }

        let len = match self.transport.read_u32_be(window).await {
            Ok(len) => len as usize,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(_) => {
                self.transport.drain().await.ok();
                return Ok(Vec::new());
            }
        };
        if len > max_len {
            warn!("{:?} announced {} bytes, ignoring", cmd, len);
            self.transport.drain().await.ok();
            return Ok(Vec::new());
        }

        let id = self.transport.read_exact(len, window).await?;
        let st = self.transport.read_u16_be(window).await?;
        Self::check_status(st)?;

        Ok(id)
    }

    /// Reads `count` 16-bit words from `address`.
    pub async fn read16(&mut self, address: u32, count: u32) -> Result<Vec<u16>> {
        let window = self.transport.timeouts.identity;
        self.echo_cmd(Command::Read16).await?;
        self.echo_u32(address).await?;
        self.echo_u32(count).await?;

        let st = self.transport.read_u16_be(window).await?;
        if st != 0 {
            return Err(SecurityError::MemAuthBlocked.into());
        }

        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            values.push(self.transport.read_u16_be(window).await?);
        }
        Ok(values)
    }

    /// Reads `count` 32-bit words from `address`.
    pub async fn read32(&mut self, address: u32, count: u32) -> Result<Vec<u32>> {
        let window = self.transport.timeouts.identity;
        self.echo_cmd(Command::Read32).await?;
        self.echo_u32(address).await?;
        self.echo_u32(count).await?;

        let st = self.transport.read_u16_be(window).await?;
        if st != 0 {
            return Err(SecurityError::MemAuthBlocked.into());
        }

        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            values.push(self.transport.read_u32_be(window).await?);
        }
        Ok(values)
    }

    pub async fn write16(&mut self, address: u32, values: &[u16]) -> Result<()> {
        let window = self.transport.timeouts.identity;
        self.echo_cmd(Command::Write16).await?;
        self.echo_u32(address).await?;
        self.echo_u32(values.len() as u32).await?;

        let st = self.transport.read_u16_be(window).await?;
        if st != 0 {
            return Err(SecurityError::MemAuthBlocked.into());
        }

        for &value in values {
            self.transport.write(&value.to_be_bytes()).await?;
        }
        let st = self.transport.read_u16_be(window).await?;
        if st != 0 {
            return Err(SecurityError::MemAuthBlocked.into());
        }
        Ok(())
    }

    pub async fn write32(&mut self, address: u32, values: &[u32]) -> Result<()> {
        let window = self.transport.timeouts.identity;
        self.echo_cmd(Command::Write32).await?;
        self.echo_u32(address).await?;
        self.echo_u32(values.len() as u32).await?;

        let st = self.transport.read_u16_be(window).await?;
        if st != 0 {
            return Err(SecurityError::MemAuthBlocked.into());
        }

        for &value in values {
            self.transport.write(&value.to_be_bytes()).await?;
        }
        let st = self.transport.read_u16_be(window).await?;
        if st != 0 {
            return Err(SecurityError::MemAuthBlocked.into());
        }
        Ok(())
    }

    /// Uploads a DA region. Enters the SLA exchange once if the device
    /// demands it, then retries the upload command.
    pub async fn send_da(&mut self, address: u32, data: &[u8], sig_len: u32) -> Result<()> {
        debug!("Sending DA to 0x{:08X}, {} bytes, sig_len={}", address, data.len(), sig_len);

        let mut payload = data.to_vec();
        checksum::pad_even(&mut payload);
        let expected_checksum = checksum::xor16(&payload);

        let window = self.transport.timeouts.identity;
        let mut sla_done = false;
        loop {
            self.echo_cmd(Command::SendDa).await?;
            self.echo_u32(address).await?;
            self.echo_u32(payload.len() as u32).await?;
            self.echo_u32(sig_len).await?;

            let st = self.transport.read_u16_be(window).await?;
            if st == status::SLA_REQUIRED && !sla_done {
                info!("Device demands serial link authentication");
                sla::perform(self).await?;
                sla_done = true;
                continue;
            }
            if st > 0xFF {
                return Err(Self::map_security(st));
            }
            break;
        }

        for chunk in payload.chunks(64) {
            self.transport.write(chunk).await?;
        }
        self.transport.write(&[]).await?;

        self.transport.sleep(upload_trailer_delay(payload.len())).await?;

        let returned_checksum = self.transport.read_u16_be(window).await?;
        let st = self.transport.read_u16_be(window).await?;
        if st > 0xFF {
            return Err(Self::map_security(st));
        }
        if returned_checksum != expected_checksum {
            // The status word is authoritative; a checksum disagreement on an
            // accepted upload is only worth a warning.
            warn!(
                "DA checksum mismatch: device 0x{:04X}, host 0x{:04X}",
                returned_checksum, expected_checksum
            );
        }

        debug!("DA sent");
        Ok(())
    }

    /// Hands control to the uploaded DA.
    pub async fn jump_da(&mut self, address: u32) -> Result<()> {
        debug!("Jump to DA at 0x{:08X}", address);
        let window = self.transport.timeouts.identity;

        self.echo_cmd(Command::JumpDa).await?;
        self.echo_u32(address).await?;

        let st = self.transport.read_u16_be(window).await?;
        Self::check_status(st)
    }

    /// 64-bit variant of [`jump_da`](Self::jump_da).
    pub async fn jump_da64(&mut self, address: u32) -> Result<()> {
        debug!("Jump to 64-bit DA at 0x{:08X}", address);
        let window = self.transport.timeouts.identity;

        self.echo_cmd(Command::JumpDa64).await?;
        self.echo_u32(address).await?;

        let st = self.transport.read_u16_be(window).await?;
        Self::check_status(st)
    }
}

/// Load-adaptive wait after the DA upload trailer.
fn upload_trailer_delay(bytes: usize) -> Duration {
    let ms = (bytes as u64 / 1000 + 35).clamp(35, 500);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::upload_trailer_delay;

    #[test]
    fn trailer_delay_is_clamped() {
        assert_eq!(upload_trailer_delay(0).as_millis(), 35);
        assert_eq!(upload_trailer_delay(100_000).as_millis(), 135);
        assert_eq!(upload_trailer_delay(10_000_000).as_millis(), 500);
    }
}
