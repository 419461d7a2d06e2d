/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::sync::Arc;

use log::info;

use crate::core::storage::emmc::EmmcStorage;
use crate::core::storage::ufs::UfsStorage;
use crate::core::storage::{Partition, Storage, parse_gpt};
use crate::da::xml::cmds::{
    ErasePartition,
    FlashAll,
    ReadFlash,
    ReadPartition,
    ReadRegister,
    Reboot,
    SetBootMode,
    WriteFlash,
    WritePartition,
    WriteRegister,
};
use crate::da::xml::xml_lib::{Phase, XmlDa};
use crate::error::{Error, Result};
use crate::utilities::xml::{get_tag, get_tag_usize};

/// GPT read window, matching the XFlash path.
const GPT_READ_LEN: usize = 34 * 512;

impl XmlDa {
    pub async fn read_partition(&mut self, name: &str) -> Result<Vec<u8>> {
        info!("XML read of partition '{}'", name);
        let mut data = Vec::new();
        self.run_cmd(&ReadPartition { partition: name.into() }, Phase::Upload(&mut data)).await?;
        Ok(data)
    }

    pub async fn read_flash(
        &mut self,
        partition: &str,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let cmd = ReadFlash { partition: partition.into(), offset, length };
        self.run_cmd(&cmd, Phase::Upload(&mut data)).await?;
        data.truncate(length);
        Ok(data)
    }

    pub async fn write_partition(&mut self, name: &str, data: &[u8]) -> Result<()> {
        info!("XML write of partition '{}', 0x{:X} bytes", name, data.len());
        self.run_cmd(&WritePartition { partition: name.into() }, Phase::Download(data)).await?;
        Ok(())
    }

    pub async fn write_flash(&mut self, partition: &str, offset: u64, data: &[u8]) -> Result<()> {
        let cmd = WriteFlash { partition: partition.into(), offset, length: data.len() };
        self.run_cmd(&cmd, Phase::Download(data)).await?;
        Ok(())
    }

    pub async fn erase_partition(&mut self, name: &str) -> Result<()> {
        info!("XML erase of partition '{}'", name);
        self.run_cmd(&ErasePartition { partition: name.into() }, Phase::None).await?;
        Ok(())
    }

    /// Whole-firmware flash driven by the DA itself.
    pub async fn flash_all(&mut self, image: &[u8]) -> Result<()> {
        self.run_cmd(&FlashAll { path_separator: "/" }, Phase::Download(image)).await?;
        Ok(())
    }

    pub async fn read_partitions(&mut self) -> Result<Vec<Partition>> {
        let storage = self.get_or_detect_storage().await?;
        let sector_size = storage.block_size();

        let gpt_raw = self.read_flash("PGPT", 0, GPT_READ_LEN).await?;
        parse_gpt(&gpt_raw, sector_size)
    }

    pub async fn reboot(&mut self) -> Result<()> {
        self.run_cmd(&Reboot { action: "IMMEDIATE" }, Phase::None).await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.run_cmd(&Reboot { action: "POWER-OFF" }, Phase::None).await?;
        Ok(())
    }

    pub async fn set_boot_mode(&mut self, mode: &'static str) -> Result<()> {
        self.run_cmd(&SetBootMode { mode }, Phase::None).await?;
        Ok(())
    }

    pub async fn read32(&mut self, address: u32) -> Result<u32> {
        let mut data = Vec::new();
        self.run_cmd(&ReadRegister { address }, Phase::Upload(&mut data)).await?;
        if data.len() < 4 {
            return Err(Error::Malformed("short register read".into()));
        }
        Ok(u32::from_le_bytes(data[0..4].try_into().unwrap()))
    }

    pub async fn write32(&mut self, address: u32, value: u32) -> Result<()> {
        let bytes = value.to_le_bytes();
        self.run_cmd(&WriteRegister { address }, Phase::Download(&bytes)).await?;
        Ok(())
    }

    pub async fn read_efuse(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.run_cmd(&super::cmds::ReadEfuse, Phase::Upload(&mut data)).await?;
        Ok(data)
    }

    pub async fn write_efuse(&mut self, payload: &[u8]) -> Result<()> {
        self.run_cmd(&super::cmds::WriteEfuse, Phase::Download(payload)).await?;
        Ok(())
    }

    /// Registers a signature covering the whole download session, for DAs
    /// configured to verify the all-in-one image.
    pub async fn set_all_in_one_signature(&mut self, signature: &[u8]) -> Result<()> {
        let cmd = super::cmds::SecuritySetAllInOneSignature { length: signature.len() };
        self.run_cmd(&cmd, Phase::Download(signature)).await?;
        Ok(())
    }
}

/// Maps a GET-HW-INFO response document onto a storage descriptor.
///
/// The document carries `<storage>` plus per-kind size tags, which are
/// repacked into the binary descriptor layouts shared with XFlash.
pub(super) fn storage_from_hw_info(doc: &str) -> Result<Arc<dyn Storage>> {
    let kind = get_tag(doc, "storage")?;

    match kind.as_str() {
        "EMMC" => {
            let mut resp = vec![0u8; crate::core::storage::emmc::EMMC_INFO_LEN];
            resp[0..4].copy_from_slice(&1u32.to_le_bytes());
            pack_u64(&mut resp, 8, tag_or_zero(doc, "boot1_size"));
            pack_u64(&mut resp, 16, tag_or_zero(doc, "boot2_size"));
            pack_u64(&mut resp, 24, tag_or_zero(doc, "rpmb_size"));
            pack_u64(&mut resp, 64, tag_or_zero(doc, "user_size"));
            Ok(Arc::new(EmmcStorage::from_response(&resp)?))
        }
        "UFS" => {
            let mut resp = vec![0u8; crate::core::storage::ufs::UFS_INFO_LEN];
            resp[0..4].copy_from_slice(&1u32.to_le_bytes());
            pack_u64(&mut resp, 8, tag_or_zero(doc, "lu0_size"));
            pack_u64(&mut resp, 16, tag_or_zero(doc, "lu1_size"));
            pack_u64(&mut resp, 24, tag_or_zero(doc, "lu2_size"));
            Ok(Arc::new(UfsStorage::from_response(&resp)?))
        }
        other => Err(Error::Malformed(format!("unknown storage kind '{}'", other))),
    }
}

fn tag_or_zero(doc: &str, tag: &str) -> u64 {
    get_tag_usize(doc, tag).unwrap_or(0) as u64
}

fn pack_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::StorageType;

    #[test]
    fn hw_info_maps_to_storage() {
        let doc = "<da><storage>UFS</storage><lu0_size>0x400000</lu0_size>\
                   <lu2_size>0x100000000</lu2_size></da>";
        let storage = storage_from_hw_info(doc).unwrap();
        assert_eq!(storage.kind(), StorageType::Ufs);
        assert_eq!(storage.boot1_size(), 0x400000);
        assert_eq!(storage.user_size(), 0x100000000);
    }
}
