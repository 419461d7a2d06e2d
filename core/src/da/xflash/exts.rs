/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use crate::da::xflash::cmds::Cmd;
use crate::da::xflash::xflash_lib::XFlash;
use crate::error::{Error, Result};

// Raw register access through the injected extension set. Unlike the stock
// DEVICE_CTRL register commands these are not filtered by the DA's address
// allowlist, which the SEJ/DXCC drivers depend on.

pub(super) async fn read32_ext(xflash: &mut XFlash, addr: u32) -> Result<u32> {
    xflash.send_cmd(Cmd::ExtReadRegister).await?;
    xflash.send_data(&addr.to_le_bytes()).await?;

    let resp = xflash.read_packet().await?;
    status_ok!(xflash);

    if resp.len() < 4 {
        return Err(Error::Malformed("short extension register read".into()));
    }
    Ok(u32::from_le_bytes(resp[0..4].try_into().unwrap()))
}

pub(super) async fn write32_ext(xflash: &mut XFlash, addr: u32, value: u32) -> Result<()> {
    let mut param = Vec::with_capacity(8);
    param.extend_from_slice(&addr.to_le_bytes());
    param.extend_from_slice(&value.to_le_bytes());

    xflash.send_cmd(Cmd::ExtWriteRegister).await?;
    xflash.send_data(&param).await?;
    Ok(())
}

/// Bulk memory read through the extensions; used for raw dumps the stock
/// DA refuses.
pub(super) async fn read_mem_ext(xflash: &mut XFlash, addr: u32, length: usize) -> Result<Vec<u8>> {
    let mut param = Vec::with_capacity(12);
    param.extend_from_slice(&addr.to_le_bytes());
    param.extend_from_slice(&(length as u64).to_le_bytes());

    xflash.send_cmd(Cmd::ExtReadMem).await?;
    xflash.send_data(&param).await?;

    let mut out = Vec::with_capacity(length);
    while out.len() < length {
        let chunk = xflash.read_packet().await?;
        if chunk.is_empty() {
            return Err(Error::Malformed("extension memory read ended early".into()));
        }
        out.extend_from_slice(&chunk);
    }
    status_ok!(xflash);

    out.truncate(length);
    Ok(out)
}
