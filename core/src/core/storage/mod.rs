/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod emmc;
mod gpt;
pub mod nand;
pub mod ufs;

use std::fmt;

use downcast_rs::{DowncastSync, impl_downcast};
use num_enum::{IntoPrimitive, TryFromPrimitive};

pub use gpt::parse_gpt;

pub const DEFAULT_SECTOR_SIZE: u32 = 512;

/// Physical storage behind the DA, as reported by the stage-2 info queries.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum StorageType {
    Unknown = 0,
    Emmc = 1,
    Nand = 2,
    Ufs = 3,
    Nor = 4,
}

/// Hardware partition selector passed to the stage-2 flash commands.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
pub enum PartitionKind {
    Boot1 = 1,
    Boot2 = 2,
    Rpmb = 3,
    Gp1 = 4,
    Gp2 = 5,
    Gp3 = 6,
    Gp4 = 7,
    User = 8,
}

impl PartitionKind {
    pub fn as_u32(self) -> u32 {
        self.into()
    }
}

/// One named region of the user area, from GPT or the DA partition catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub start_sector: u64,
    pub sector_count: u64,
    pub sector_size: u32,
}

impl Partition {
    pub fn new(
        name: impl Into<String>,
        start_sector: u64,
        sector_count: u64,
        sector_size: u32,
    ) -> Self {
        Partition { name: name.into(), start_sector, sector_count, sector_size }
    }

    /// Absolute byte offset within the user area.
    pub fn offset(&self) -> u64 {
        self.start_sector * self.sector_size as u64
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.sector_count * self.sector_size as u64
    }
}

/// Storage descriptor read from the running DA.
pub trait Storage: fmt::Debug + DowncastSync {
    fn kind(&self) -> StorageType;

    fn block_size(&self) -> u32 {
        DEFAULT_SECTOR_SIZE
    }

    /// Size of the user area in bytes.
    fn user_size(&self) -> u64;

    fn boot1_size(&self) -> u64 {
        0
    }

    fn boot2_size(&self) -> u64 {
        0
    }

    fn rpmb_size(&self) -> u64 {
        0
    }

    fn user_part(&self) -> PartitionKind {
        PartitionKind::User
    }

    fn boot_part1(&self) -> PartitionKind {
        PartitionKind::Boot1
    }

    fn boot_part2(&self) -> PartitionKind {
        PartitionKind::Boot2
    }

    /// One-line human-readable summary for logs and the event channel.
    fn describe(&self) -> String;
}

impl_downcast!(sync Storage);
