/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use crate::core::storage::{Storage, StorageType};
use crate::error::{Error, Result};
use crate::{le_u32, le_u64};

/// UFS descriptor, from the `GET_UFS_INFO` device-control response.
///
/// Response layout (all little-endian):
/// `ret u32 | block_size u32 | lu0 u64 | lu1 u64 | lu2 u64 |
///  cid[16] | fw_version[8]`
///
/// LU0/LU1 are the boot units, LU2 is the user area.
#[derive(Debug, Clone)]
pub struct UfsStorage {
    pub block_size: u32,
    pub lu0_size: u64,
    pub lu1_size: u64,
    pub lu2_size: u64,
    pub cid: [u8; 16],
    pub fw_version: [u8; 8],
}

pub const UFS_INFO_LEN: usize = 56;
const UFS_BLOCK_SIZE: u32 = 4096;

impl UfsStorage {
    pub fn from_response(resp: &[u8]) -> Result<Self> {
        if resp.len() < UFS_INFO_LEN {
            return Err(Error::Malformed(format!("UFS info too short: {} bytes", resp.len())));
        }

        let block_size = match le_u32!(resp, 4) {
            0 => UFS_BLOCK_SIZE,
            n => n,
        };

        Ok(UfsStorage {
            block_size,
            lu0_size: le_u64!(resp, 8),
            lu1_size: le_u64!(resp, 16),
            lu2_size: le_u64!(resp, 24),
            cid: resp[32..48].try_into().unwrap(),
            fw_version: resp[48..56].try_into().unwrap(),
        })
    }
}

impl Storage for UfsStorage {
    fn kind(&self) -> StorageType {
        StorageType::Ufs
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn user_size(&self) -> u64 {
        self.lu2_size
    }

    fn boot1_size(&self) -> u64 {
        self.lu0_size
    }

    fn boot2_size(&self) -> u64 {
        self.lu1_size
    }

    fn describe(&self) -> String {
        format!(
            "UFS lu2={}MiB lu0={}KiB lu1={}KiB cid={}",
            self.lu2_size >> 20,
            self.lu0_size >> 10,
            self.lu1_size >> 10,
            hex::encode(self.cid)
        )
    }
}
