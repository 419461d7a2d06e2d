/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::connection::command::TargetConfig;
use crate::core::storage::{Partition, Storage};

/// Immutable per-device identity, discovered during stage-1.
#[derive(Debug, Clone, Default)]
pub struct DeviceIdentity {
    pub hw_code: u16,
    pub hw_sub_code: u16,
    pub hw_version: u16,
    pub sw_version: u16,
    pub chip_evolution: u16,
    pub bl_version: u8,
    pub is_brom: bool,
    pub me_id: Vec<u8>,
    pub soc_id: Vec<u8>,
    pub target_config: TargetConfig,
}

/// Struct holding device information data.
/// This should not be accessed directly, instead use the `DeviceInfo` wrapper.
#[derive(Clone, Default)]
pub struct DevInfoData {
    pub identity: DeviceIdentity,
    pub partitions: Vec<Partition>,
    pub storage: Option<Arc<dyn Storage>>,
}

/// Safe wrapper around device information with async read/write access.
#[derive(Clone, Default)]
pub struct DeviceInfo {
    inner: Arc<RwLock<DevInfoData>>,
}

impl DeviceInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_data(&self) -> DevInfoData {
        self.inner.read().await.clone()
    }

    pub async fn identity(&self) -> DeviceIdentity {
        self.inner.read().await.identity.clone()
    }

    pub async fn set_identity(&self, identity: DeviceIdentity) {
        self.inner.write().await.identity = identity;
    }

    pub async fn partitions(&self) -> Vec<Partition> {
        self.inner.read().await.partitions.clone()
    }

    pub async fn set_partitions(&self, partitions: Vec<Partition>) {
        self.inner.write().await.partitions = partitions;
    }

    pub async fn get_partition(&self, name: &str) -> Option<Partition> {
        self.inner.read().await.partitions.iter().find(|p| p.name == name).cloned()
    }

    pub async fn storage(&self) -> Option<Arc<dyn Storage>> {
        self.inner.read().await.storage.clone()
    }

    pub async fn set_storage(&self, storage: Arc<dyn Storage>) {
        self.inner.write().await.storage = Some(storage);
    }

    pub async fn sla_enabled(&self) -> bool {
        self.inner.read().await.identity.target_config.sla()
    }

    pub async fn sbc_enabled(&self) -> bool {
        self.inner.read().await.identity.target_config.sbc()
    }

    pub async fn daa_enabled(&self) -> bool {
        self.inner.read().await.identity.target_config.daa()
    }
}
