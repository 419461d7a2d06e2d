/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use crate::core::storage::{Storage, StorageType};
use crate::error::{Error, Result};
use crate::{le_u32, le_u64};

/// NAND descriptor, from `GET_NAND_INFO`:
/// `ret u32 | page_size u32 | block_size u32 | spare_size u32 | total u64`
#[derive(Debug, Clone)]
pub struct NandStorage {
    pub page_size: u32,
    pub block_size: u32,
    pub spare_size: u32,
    pub total_size: u64,
}

pub const NAND_INFO_LEN: usize = 24;

impl NandStorage {
    pub fn from_response(resp: &[u8]) -> Result<Self> {
        if resp.len() < NAND_INFO_LEN {
            return Err(Error::Malformed(format!("NAND info too short: {} bytes", resp.len())));
        }

        Ok(NandStorage {
            page_size: le_u32!(resp, 4),
            block_size: le_u32!(resp, 8),
            spare_size: le_u32!(resp, 12),
            total_size: le_u64!(resp, 16),
        })
    }
}

impl Storage for NandStorage {
    fn kind(&self) -> StorageType {
        StorageType::Nand
    }

    fn block_size(&self) -> u32 {
        if self.page_size == 0 { 512 } else { self.page_size }
    }

    fn user_size(&self) -> u64 {
        self.total_size
    }

    fn describe(&self) -> String {
        format!(
            "NAND total={}MiB page={} spare={}",
            self.total_size >> 20,
            self.page_size,
            self.spare_size
        )
    }
}

/// NOR descriptor, from `GET_NOR_INFO`:
/// `ret u32 | page_size u32 | total u64`
#[derive(Debug, Clone)]
pub struct NorStorage {
    pub page_size: u32,
    pub total_size: u64,
}

pub const NOR_INFO_LEN: usize = 16;

impl NorStorage {
    pub fn from_response(resp: &[u8]) -> Result<Self> {
        if resp.len() < NOR_INFO_LEN {
            return Err(Error::Malformed(format!("NOR info too short: {} bytes", resp.len())));
        }

        Ok(NorStorage { page_size: le_u32!(resp, 4), total_size: le_u64!(resp, 8) })
    }
}

impl Storage for NorStorage {
    fn kind(&self) -> StorageType {
        StorageType::Nor
    }

    fn user_size(&self) -> u64 {
        self.total_size
    }

    fn describe(&self) -> String {
        format!("NOR total={}KiB page={}", self.total_size >> 10, self.page_size)
    }
}
