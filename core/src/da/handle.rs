/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::sync::Arc;

use crate::connection::transport::Transport;
use crate::core::storage::{Partition, Storage};
use crate::da::bsl::Bsl;
use crate::da::legacy::LegacyDa;
use crate::da::xflash::XFlash;
use crate::da::xml::XmlDa;
use crate::error::{Error, Result};
use crate::event::EventSink;

/// Boot target for a stage-2 shutdown.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Normal = 0,
    HomeScreen = 1,
    BootToFastboot = 2,
    BootToBrom = 3,
    BootToRecovery = 4,
    BootToMeta = 5,
    Charger = 6,
    Exception = 7,
}

/// The four stage-2 protocol families have incompatible internals, so the
/// session dispatches over a tagged variant rather than a trait object.
pub enum DaHandle {
    XFlash(XFlash),
    Legacy(LegacyDa),
    Xml(XmlDa),
    Bsl(Bsl),
}

impl DaHandle {
    pub fn protocol_name(&self) -> &'static str {
        match self {
            DaHandle::XFlash(_) => "xflash",
            DaHandle::Legacy(_) => "legacy",
            DaHandle::Xml(_) => "xml",
            DaHandle::Bsl(_) => "bsl",
        }
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        match self {
            DaHandle::XFlash(x) => &mut x.conn.transport,
            DaHandle::Legacy(l) => &mut l.conn.transport,
            DaHandle::Xml(x) => &mut x.conn.transport,
            DaHandle::Bsl(b) => &mut b.transport,
        }
    }

    pub fn events(&self) -> EventSink {
        match self {
            DaHandle::XFlash(x) => x.conn.events.clone(),
            DaHandle::Legacy(l) => l.conn.events.clone(),
            DaHandle::Xml(x) => x.conn.events.clone(),
            DaHandle::Bsl(b) => b.events.clone(),
        }
    }

    /// Storage descriptor, where the protocol can produce one.
    pub async fn storage(&mut self) -> Result<Option<Arc<dyn Storage>>> {
        match self {
            DaHandle::XFlash(x) => x.get_or_detect_storage().await.map(Some),
            DaHandle::Xml(x) => x.get_or_detect_storage().await.map(Some),
            DaHandle::Legacy(_) | DaHandle::Bsl(_) => Ok(None),
        }
    }

    /// Partition table: GPT for block devices, PMT for legacy NAND. SPRD
    /// devices carry their layout in the firmware package instead.
    pub async fn read_partitions(&mut self) -> Result<Vec<Partition>> {
        match self {
            DaHandle::XFlash(x) => x.read_partitions().await,
            DaHandle::Legacy(l) => l.read_partitions().await,
            DaHandle::Xml(x) => x.read_partitions().await,
            DaHandle::Bsl(b) => Ok(b.read_partitions()),
        }
    }

    pub async fn read_partition(&mut self, part: &Partition) -> Result<Vec<u8>> {
        match self {
            DaHandle::XFlash(x) => {
                let section = x.get_or_detect_storage().await?.user_part();
                x.read_flash(part.offset(), part.size() as usize, section, &part.name).await
            }
            DaHandle::Legacy(l) => {
                l.read_flash(part.start_sector, part.sector_count, &part.name).await
            }
            DaHandle::Xml(x) => x.read_partition(&part.name).await,
            DaHandle::Bsl(b) => b.read_partition(&part.name, part.size()).await,
        }
    }

    pub async fn write_partition(&mut self, part: &Partition, data: &[u8]) -> Result<()> {
        match self {
            DaHandle::XFlash(x) => {
                let section = x.get_or_detect_storage().await?.user_part();
                x.write_flash(part.offset(), part.size() as usize, data, section, &part.name)
                    .await
            }
            DaHandle::Legacy(l) => {
                l.write_flash(part.start_sector, part.sector_count, data, &part.name).await
            }
            DaHandle::Xml(x) => x.write_partition(&part.name, data).await,
            DaHandle::Bsl(b) => b.write_partition(&part.name, data).await,
        }
    }

    pub async fn erase_partition(&mut self, part: &Partition) -> Result<()> {
        match self {
            DaHandle::XFlash(x) => {
                let section = x.get_or_detect_storage().await?.user_part();
                x.erase_flash(part.offset(), part.size() as usize, section, &part.name).await
            }
            DaHandle::Legacy(l) => l.erase_flash(part.start_sector, part.sector_count).await,
            DaHandle::Xml(x) => x.erase_partition(&part.name).await,
            DaHandle::Bsl(b) => b.erase_partition(&part.name).await,
        }
    }

    /// Whole-partition write resolved by name on the device side, where the
    /// protocol supports it.
    pub async fn download(&mut self, name: &str, data: &[u8]) -> Result<()> {
        match self {
            DaHandle::XFlash(x) => x.download(name, data).await,
            DaHandle::Xml(x) => x.write_partition(name, data).await,
            DaHandle::Bsl(b) => b.write_partition(name, data).await,
            DaHandle::Legacy(_) => Err(Error::Unsupported { op: "download by name" }),
        }
    }

    /// Whole-partition read resolved by name on the device side.
    pub async fn upload(&mut self, name: &str, size_hint: u64) -> Result<Vec<u8>> {
        match self {
            DaHandle::XFlash(x) => x.upload(name).await,
            DaHandle::Xml(x) => x.read_partition(name).await,
            DaHandle::Bsl(b) => b.read_partition(name, size_hint).await,
            DaHandle::Legacy(_) => Err(Error::Unsupported { op: "upload by name" }),
        }
    }

    /// Formats either one partition or, with `None`, the whole user area.
    pub async fn format(&mut self, target: Option<&Partition>) -> Result<()> {
        match (self, target) {
            (DaHandle::XFlash(x), Some(part)) => {
                let section = x.get_or_detect_storage().await?.user_part();
                x.format(part.offset(), part.size(), section, &part.name).await
            }
            (DaHandle::XFlash(x), None) => {
                let storage = x.get_or_detect_storage().await?;
                let (section, size) = (storage.user_part(), storage.user_size());
                x.format(0, size, section, "userarea").await
            }
            (DaHandle::Legacy(l), _) => l.format_flash().await,
            (DaHandle::Xml(x), Some(part)) => x.erase_partition(&part.name).await,
            (DaHandle::Bsl(b), Some(part)) => b.erase_partition(&part.name).await,
            (DaHandle::Xml(_), None) | (DaHandle::Bsl(_), None) => {
                Err(Error::Unsupported { op: "full format" })
            }
        }
    }

    pub async fn reboot(&mut self) -> Result<()> {
        match self {
            DaHandle::XFlash(x) => x.reboot().await,
            DaHandle::Legacy(l) => l.finish(false).await,
            DaHandle::Xml(x) => x.reboot().await,
            DaHandle::Bsl(b) => b.reset().await,
        }
    }

    pub async fn shutdown(&mut self, mode: ShutdownMode) -> Result<()> {
        match self {
            DaHandle::XFlash(x) => x.shutdown(mode).await,
            DaHandle::Legacy(l) => l.finish(true).await,
            DaHandle::Xml(x) => match mode {
                ShutdownMode::Normal | ShutdownMode::HomeScreen => x.reboot().await,
                ShutdownMode::BootToFastboot => x.set_boot_mode("FASTBOOT").await,
                ShutdownMode::BootToRecovery => x.set_boot_mode("RECOVERY").await,
                ShutdownMode::BootToMeta => x.set_boot_mode("META").await,
                _ => x.shutdown().await,
            },
            DaHandle::Bsl(b) => b.power_off().await,
        }
    }

    pub async fn read32(&mut self, addr: u32) -> Result<u32> {
        match self {
            DaHandle::XFlash(x) => x.read32(addr).await,
            DaHandle::Legacy(l) => l.read_reg32(addr).await,
            DaHandle::Xml(x) => x.read32(addr).await,
            DaHandle::Bsl(_) => Err(Error::Unsupported { op: "register read" }),
        }
    }

    pub async fn write32(&mut self, addr: u32, value: u32) -> Result<()> {
        match self {
            DaHandle::XFlash(x) => x.write32(addr, value).await,
            DaHandle::Legacy(l) => l.write_reg32(addr, value).await,
            DaHandle::Xml(x) => x.write32(addr, value).await,
            DaHandle::Bsl(_) => Err(Error::Unsupported { op: "register write" }),
        }
    }
}
