/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use crate::core::storage::{DEFAULT_SECTOR_SIZE, Storage, StorageType};
use crate::error::{Error, Result};
use crate::{le_u32, le_u64};

/// eMMC descriptor, from the `GET_EMMC_INFO` device-control response.
///
/// Response layout (all little-endian):
/// `ret u32 | block_size u32 | boot1 u64 | boot2 u64 | rpmb u64 |
///  gp[4] u64 | user u64 | cid[16] | fw_version[8]`
#[derive(Debug, Clone)]
pub struct EmmcStorage {
    pub block_size: u32,
    pub boot1_size: u64,
    pub boot2_size: u64,
    pub rpmb_size: u64,
    pub gp_size: [u64; 4],
    pub user_size: u64,
    pub cid: [u8; 16],
    pub fw_version: [u8; 8],
}

pub const EMMC_INFO_LEN: usize = 96;

impl EmmcStorage {
    pub fn from_response(resp: &[u8]) -> Result<Self> {
        if resp.len() < EMMC_INFO_LEN {
            return Err(Error::Malformed(format!("eMMC info too short: {} bytes", resp.len())));
        }

        let block_size = match le_u32!(resp, 4) {
            0 => DEFAULT_SECTOR_SIZE,
            n => n,
        };

        Ok(EmmcStorage {
            block_size,
            boot1_size: le_u64!(resp, 8),
            boot2_size: le_u64!(resp, 16),
            rpmb_size: le_u64!(resp, 24),
            gp_size: [
                le_u64!(resp, 32),
                le_u64!(resp, 40),
                le_u64!(resp, 48),
                le_u64!(resp, 56),
            ],
            user_size: le_u64!(resp, 64),
            cid: resp[72..88].try_into().unwrap(),
            fw_version: resp[88..96].try_into().unwrap(),
        })
    }
}

impl Storage for EmmcStorage {
    fn kind(&self) -> StorageType {
        StorageType::Emmc
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn user_size(&self) -> u64 {
        self.user_size
    }

    fn boot1_size(&self) -> u64 {
        self.boot1_size
    }

    fn boot2_size(&self) -> u64 {
        self.boot2_size
    }

    fn rpmb_size(&self) -> u64 {
        self.rpmb_size
    }

    fn describe(&self) -> String {
        format!(
            "eMMC user={}MiB boot1={}KiB boot2={}KiB rpmb={}KiB cid={}",
            self.user_size >> 20,
            self.boot1_size >> 10,
            self.boot2_size >> 10,
            self.rpmb_size >> 10,
            hex::encode(self.cid)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_info_response() {
        let mut resp = vec![0u8; EMMC_INFO_LEN];
        resp[0..4].copy_from_slice(&1u32.to_le_bytes());
        resp[8..16].copy_from_slice(&0x400000u64.to_le_bytes()); // boot1
        resp[64..72].copy_from_slice(&0x3A3E00000u64.to_le_bytes()); // user

        let storage = EmmcStorage::from_response(&resp).unwrap();
        assert_eq!(storage.kind(), StorageType::Emmc);
        assert_eq!(storage.block_size(), DEFAULT_SECTOR_SIZE);
        assert_eq!(storage.boot1_size(), 0x400000);
        assert_eq!(storage.user_size(), 0x3A3E00000);
    }
}
