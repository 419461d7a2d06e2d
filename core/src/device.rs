/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};

use crate::connection::Connection;
use crate::connection::port::{CancelToken, Port, Timeouts};
use crate::connection::sla::SlaKeyring;
use crate::connection::transport::Transport;
use crate::core::crypto::dxcc::DxccEngine;
use crate::core::crypto::sej::SejEngine;
use crate::core::crypto::sw::SwCrypto;
use crate::core::crypto::{AesCbcBlock, CryptoIO};
use crate::core::devinfo::DeviceInfo;
use crate::core::seccfg::{LockFlag, SecCfg};
use crate::core::storage::emmc::EmmcStorage;
use crate::core::storage::{Partition, PartitionKind};
use crate::da::bsl::Bsl;
use crate::da::legacy::LegacyDa;
use crate::da::xflash::XFlash;
use crate::da::xml::{DaSlaSigner, XmlDa};
use crate::da::{DaCatalog, DaHandle, DaType, ShutdownMode};
use crate::error::{CatalogError, Error, Result, StorageError};
use crate::event::{Event, EventSink};

/// Session lifecycle. Each value strictly follows the previous in time;
/// `Failed` is reachable from anywhere and terminal except via reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opened,
    Handshook,
    StageOneReady,
    DaSelected,
    StageTwoUp,
    StorageKnown,
    PartitionsKnown,
    Operational,
    Closing,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Closed => "closed",
            SessionState::Opened => "opened",
            SessionState::Handshook => "handshook",
            SessionState::StageOneReady => "stage1-ready",
            SessionState::DaSelected => "da-selected",
            SessionState::StageTwoUp => "stage2-up",
            SessionState::StorageKnown => "storage-known",
            SessionState::PartitionsKnown => "partitions-known",
            SessionState::Operational => "operational",
            SessionState::Closing => "closing",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Which hardware crypto engine backs the seccfg hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoEngineSel {
    Sej { base: u32 },
    Dxcc { base: u32 },
    Sw,
}

impl Default for CryptoEngineSel {
    fn default() -> Self {
        // SEJ at its usual base; newer chips override with Dxcc.
        CryptoEngineSel::Sej { base: 0x1000A000 }
    }
}

/// A builder for creating a new [`Device`].
///
/// A port must be provided. For MTK targets, DA data enables stage-2
/// operations; without it only stage-1 commands are available. For SPRD
/// targets, provide the FDL pair instead.
#[derive(Default)]
pub struct DeviceBuilder {
    port: Option<Box<dyn Port>>,
    da_data: Option<Vec<u8>>,
    catalog: Option<Arc<DaCatalog>>,
    fdl1: Option<(u32, Vec<u8>)>,
    fdl2: Option<(u32, Vec<u8>)>,
    sprd_baudrate: Option<u32>,
    keyring: SlaKeyring,
    sla_signer: Option<Arc<dyn DaSlaSigner>>,
    ext_payload: Option<Vec<u8>>,
    events: Option<EventSink>,
    timeouts: Option<Timeouts>,
}

impl DeviceBuilder {
    pub fn with_port(mut self, port: Box<dyn Port>) -> Self {
        self.port = Some(port);
        self
    }

    /// Raw `MTK_AllInOne_DA.bin` contents; parsed lazily on DA selection.
    pub fn with_da_data(mut self, data: Vec<u8>) -> Self {
        self.da_data = Some(data);
        self
    }

    /// A pre-parsed catalog; may be shared between sessions.
    pub fn with_catalog(mut self, catalog: Arc<DaCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// SPRD first- and second-stage loaders with their load addresses.
    pub fn with_fdl(mut self, fdl1: (u32, Vec<u8>), fdl2: (u32, Vec<u8>)) -> Self {
        self.fdl1 = Some(fdl1);
        self.fdl2 = Some(fdl2);
        self
    }

    /// Line rate to switch to after FDL1 is running.
    pub fn with_sprd_baudrate(mut self, baudrate: u32) -> Self {
        self.sprd_baudrate = Some(baudrate);
        self
    }

    pub fn with_keyring(mut self, keyring: SlaKeyring) -> Self {
        self.keyring = keyring;
        self
    }

    pub fn with_da_sla_signer(mut self, signer: Arc<dyn DaSlaSigner>) -> Self {
        self.sla_signer = Some(signer);
        self
    }

    /// Stage-2 extension payload, installed with BOOT_TO after the DA runs.
    pub fn with_extension_payload(mut self, payload: Vec<u8>) -> Self {
        self.ext_payload = Some(payload);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    pub fn build(self) -> Result<Device> {
        let port = self
            .port
            .ok_or_else(|| Error::Malformed("a port must be provided to build a Device".into()))?;

        let is_sprd = self.fdl1.is_some();
        let cancel = CancelToken::new();
        let mut transport = Transport::new(port, cancel.clone());
        if let Some(timeouts) = self.timeouts {
            transport.timeouts = timeouts;
        }

        Ok(Device {
            dev_info: DeviceInfo::new(),
            state: SessionState::Closed,
            transport: Some(transport),
            connection: None,
            bsl: None,
            stage2: None,
            catalog: self.catalog,
            da_data: self.da_data,
            fdl1: self.fdl1,
            fdl2: self.fdl2,
            sprd_baudrate: self.sprd_baudrate,
            keyring: self.keyring,
            sla_signer: self.sla_signer,
            ext_payload: self.ext_payload,
            events: self.events.unwrap_or_default(),
            cancel,
            is_sprd,
        })
    }
}

/// A flashing session against one target device.
///
/// # Lifecycle
/// 1. Construct via [`DeviceBuilder`].
/// 2. [`Device::open`], then [`Device::init`] to handshake and identify.
/// 3. [`Device::enter_da_mode`] to bring up the stage-2 agent.
/// 4. Partition and control operations.
/// 5. [`Device::close`].
pub struct Device {
    pub dev_info: DeviceInfo,
    state: SessionState,
    transport: Option<Transport>,
    connection: Option<Connection>,
    bsl: Option<Bsl>,
    stage2: Option<DaHandle>,
    catalog: Option<Arc<DaCatalog>>,
    da_data: Option<Vec<u8>>,
    fdl1: Option<(u32, Vec<u8>)>,
    fdl2: Option<(u32, Vec<u8>)>,
    sprd_baudrate: Option<u32>,
    keyring: SlaKeyring,
    sla_signer: Option<Arc<dyn DaSlaSigner>>,
    ext_payload: Option<Vec<u8>>,
    events: EventSink,
    cancel: CancelToken,
    is_sprd: bool,
}

impl Device {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Token shared with the transport; cancelling it aborts the next
    /// suspension point.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn transition(&mut self, to: SessionState) {
        if self.state != to {
            info!("Session: {} -> {}", self.state, to);
            self.events.state_changed(self.state, to);
            self.state = to;
        }
    }

    fn require_state(&self, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState { expected, actual: self.state })
        }
    }

    /// Marks the session failed after an unrecoverable error and reports it.
    fn fail(&mut self, err: &Error) {
        self.events.error(err);
        self.transition(SessionState::Failed);
    }

    /// Errors that poison the session: a dead link or a cancellation mid
    /// transaction leaves the device in an unknown protocol state.
    fn is_fatal(err: &Error) -> bool {
        matches!(err, Error::Transport(_) | Error::Cancelled | Error::HandshakeFailed { .. })
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if Self::is_fatal(err) {
                self.fail(err);
            } else {
                self.events.error(err);
            }
        }
        result
    }

    /// Opens the session. The port itself was opened by the host; this arms
    /// the state machine.
    pub async fn open(&mut self) -> Result<()> {
        self.require_state(SessionState::Closed)?;
        self.transition(SessionState::Opened);
        Ok(())
    }

    /// Performs the stage-1 handshake and identity probe.
    pub async fn init(&mut self) -> Result<()> {
        self.require_state(SessionState::Opened)?;

        let transport = self
            .transport
            .take()
            .ok_or_else(|| Error::Malformed("transport already consumed".into()))?;

        if self.is_sprd {
            let mut bsl = Bsl::new(transport, self.events.clone());
            let result = bsl.connect().await;
            self.bsl = Some(bsl);
            self.track(result)?;
            self.transition(SessionState::Handshook);

            // The BROM UID is the only identity SPRD exposes this early.
            if let Some(bsl) = &mut self.bsl {
                if let Ok(uid) = bsl.read_uid().await {
                    let mut identity = self.dev_info.identity().await;
                    identity.soc_id = uid;
                    self.dev_info.set_identity(identity).await;
                }
            }
        } else {
            let mut conn = Connection::new(transport, self.events.clone());
            conn.keyring = self.keyring.clone();

            let result = conn.handshake().await;
            if let Err(err) = result {
                self.fail(&err);
                return Err(err);
            }
            self.transition(SessionState::Handshook);

            let identity = match conn.probe_identity().await {
                Ok(identity) => identity,
                Err(err) => {
                    self.fail(&err);
                    return Err(err);
                }
            };
            self.dev_info.set_identity(identity).await;
            self.connection = Some(conn);
        }

        let identity = self.dev_info.identity().await;
        self.events.emit(Event::DeviceInfo(identity));
        self.transition(SessionState::StageOneReady);
        Ok(())
    }

    /// Uploads the stage-2 agent and brings the session to `Operational`.
    pub async fn enter_da_mode(&mut self) -> Result<()> {
        self.require_state(SessionState::StageOneReady)?;

        if self.is_sprd {
            self.enter_fdl_mode().await?;
        } else {
            self.enter_mtk_da_mode().await?;
        }

        let storage = {
            let stage2 = self.stage2.as_mut().unwrap();
            stage2.storage().await
        };
        let storage = self.track(storage)?;
        if let Some(storage) = storage {
            self.dev_info.set_storage(storage).await;
        }
        self.transition(SessionState::StorageKnown);

        let partitions = {
            let stage2 = self.stage2.as_mut().unwrap();
            stage2.read_partitions().await
        };
        let partitions = match partitions {
            Ok(partitions) => partitions,
            Err(err) => {
                // A device without a readable table can still run named ops.
                warn!("Partition discovery failed: {}", err);
                Vec::new()
            }
        };
        self.events.emit(Event::PartitionsDiscovered(partitions.clone()));
        self.dev_info.set_partitions(partitions).await;
        self.transition(SessionState::PartitionsKnown);

        self.transition(SessionState::Operational);
        Ok(())
    }

    async fn enter_mtk_da_mode(&mut self) -> Result<()> {
        let catalog = match (&self.catalog, &self.da_data) {
            (Some(catalog), _) => catalog.clone(),
            (None, Some(data)) => {
                let catalog = Arc::new(DaCatalog::parse(data)?);
                self.catalog = Some(catalog.clone());
                catalog
            }
            (None, None) => {
                return Err(CatalogError::CorruptDaBlob("no DA data provided".into()).into());
            }
        };

        let identity = self.dev_info.identity().await;
        let entry = catalog.select(&identity)?.clone();
        self.transition(SessionState::DaSelected);

        let conn = self
            .connection
            .take()
            .ok_or_else(|| Error::Malformed("stage-1 connection already consumed".into()))?;

        let mut handle = match catalog.da_type {
            DaType::V5 => {
                DaHandle::XFlash(XFlash::new(conn, entry, self.ext_payload.clone()))
            }
            DaType::V6 => DaHandle::Xml(XmlDa::new(conn, entry, self.sla_signer.clone())),
            DaType::Legacy => DaHandle::Legacy(LegacyDa::new(conn, entry)),
        };

        let upload = match &mut handle {
            DaHandle::XFlash(x) => x.upload_da().await,
            DaHandle::Xml(x) => x.upload_da().await,
            DaHandle::Legacy(l) => l.upload_da().await,
            DaHandle::Bsl(_) => unreachable!("BSL is never selected from a DA catalog"),
        };
        self.stage2 = Some(handle);
        self.track(upload)?;

        info!("Stage-2 agent is up ({})", self.stage2.as_ref().unwrap().protocol_name());
        self.transition(SessionState::StageTwoUp);
        Ok(())
    }

    async fn enter_fdl_mode(&mut self) -> Result<()> {
        let (fdl1, fdl2) = match (self.fdl1.clone(), self.fdl2.clone()) {
            (Some(fdl1), Some(fdl2)) => (fdl1, fdl2),
            _ => return Err(CatalogError::CorruptDaBlob("no FDL pair provided".into()).into()),
        };
        self.transition(SessionState::DaSelected);

        let mut bsl = self
            .bsl
            .take()
            .ok_or_else(|| Error::Malformed("BSL driver already consumed".into()))?;

        let result = async {
            bsl.upload_fdl(fdl1.0, &fdl1.1).await?;
            if let Some(rate) = self.sprd_baudrate {
                bsl.change_baudrate(rate).await?;
            }
            // FDL1 re-announces itself on the fresh line.
            bsl.connect().await?;
            bsl.upload_fdl(fdl2.0, &fdl2.1).await?;
            bsl.connect().await
        }
        .await;

        self.stage2 = Some(DaHandle::Bsl(bsl));
        self.track(result)?;

        self.transition(SessionState::StageTwoUp);
        Ok(())
    }

    fn ensure_operational(&self) -> Result<()> {
        if self.state == SessionState::Operational {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected: SessionState::Operational,
                actual: self.state,
            })
        }
    }

    fn stage2_mut(&mut self) -> Result<&mut DaHandle> {
        self.ensure_operational()?;
        self.stage2
            .as_mut()
            .ok_or_else(|| Error::Malformed("no stage-2 agent bound".into()))
    }

    async fn resolve_partition(&self, name: &str) -> Result<Partition> {
        self.dev_info
            .get_partition(name)
            .await
            .ok_or_else(|| StorageError::PartitionNotFound { name: name.to_string() }.into())
    }

    /// Reads a whole named partition.
    pub async fn read_partition(&mut self, name: &str) -> Result<Vec<u8>> {
        self.ensure_operational()?;
        let part = self.resolve_partition(name).await?;
        let result = self.stage2_mut()?.read_partition(&part).await;
        self.track(result)
    }

    /// Writes a named partition. The image may be shorter than the
    /// partition (it is padded) but never longer.
    pub async fn write_partition(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.ensure_operational()?;
        let part = self.resolve_partition(name).await?;
        if data.len() as u64 > part.size() {
            return Err(StorageError::SizeExceedsPartition {
                data: data.len() as u64,
                partition: part.size(),
            }
            .into());
        }

        let result = self.stage2_mut()?.write_partition(&part, data).await;
        self.track(result)
    }

    pub async fn erase_partition(&mut self, name: &str) -> Result<()> {
        self.ensure_operational()?;
        let part = self.resolve_partition(name).await?;
        let result = self.stage2_mut()?.erase_partition(&part).await;
        self.track(result)
    }

    /// Formats one partition, or the whole user area with `None`.
    pub async fn format(&mut self, name: Option<&str>) -> Result<()> {
        self.ensure_operational()?;
        let part = match name {
            Some(name) => Some(self.resolve_partition(name).await?),
            None => None,
        };
        let result = self.stage2_mut()?.format(part.as_ref()).await;
        self.track(result)
    }

    /// Writes a partition resolved by name on the device side, the way SP
    /// Flash Tool downloads firmware images.
    pub async fn download(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let result = self.stage2_mut()?.download(name, data).await;
        self.track(result)
    }

    /// Reads a partition resolved by name on the device side.
    pub async fn upload(&mut self, name: &str) -> Result<Vec<u8>> {
        let size_hint =
            self.dev_info.get_partition(name).await.map(|p| p.size()).unwrap_or_default();
        let result = self.stage2_mut()?.upload(name, size_hint).await;
        self.track(result)
    }

    /// Raw read at an absolute address of the given hardware partition.
    pub async fn read_offset(
        &mut self,
        address: u64,
        size: usize,
        section: PartitionKind,
    ) -> Result<Vec<u8>> {
        let result = match self.stage2_mut()? {
            DaHandle::XFlash(x) => x.read_flash(address, size, section, "offset-read").await,
            DaHandle::Legacy(l) => {
                let ss = l.sector_size as u64;
                let sectors = (size as u64).div_ceil(ss);
                l.read_flash(address / ss, sectors, "offset-read").await.map(|mut data| {
                    data.truncate(size);
                    data
                })
            }
            DaHandle::Bsl(b) => b.read_flash(address as u32, size as u32).await,
            DaHandle::Xml(_) => Err(Error::Unsupported { op: "offset read" }),
        };
        self.track(result)
    }

    /// Raw write at an absolute address of the given hardware partition.
    pub async fn write_offset(
        &mut self,
        address: u64,
        data: &[u8],
        section: PartitionKind,
    ) -> Result<()> {
        let result = match self.stage2_mut()? {
            DaHandle::XFlash(x) => {
                x.write_flash(address, data.len(), data, section, "offset-write").await
            }
            DaHandle::Legacy(l) => {
                let ss = l.sector_size as u64;
                let sectors = (data.len() as u64).div_ceil(ss);
                l.write_flash(address / ss, sectors, data, "offset-write").await
            }
            _ => Err(Error::Unsupported { op: "offset write" }),
        };
        self.track(result)
    }

    pub async fn reboot(&mut self) -> Result<()> {
        let result = self.stage2_mut()?.reboot().await;
        let result = self.track(result);
        if result.is_ok() {
            self.transition(SessionState::Closing);
            self.transition(SessionState::Closed);
        }
        result
    }

    pub async fn shutdown(&mut self, mode: ShutdownMode) -> Result<()> {
        let result = self.stage2_mut()?.shutdown(mode).await;
        let result = self.track(result);
        if result.is_ok() {
            self.transition(SessionState::Closing);
            self.transition(SessionState::Closed);
        }
        result
    }

    /// Rewrites the seccfg partition with the requested lock state.
    ///
    /// Reads the partition, validates and mutates the record, recomputes the
    /// hardware-keyed hash through the selected engine, and writes the image
    /// back. Returns the new image.
    pub async fn set_seccfg_lock_state(
        &mut self,
        flag: LockFlag,
        engine: CryptoEngineSel,
    ) -> Result<Vec<u8>> {
        let raw = self.read_partition("seccfg").await?;
        let mut seccfg = SecCfg::parse(&raw)?;

        let new_blob = {
            let stage2 = self.stage2_mut()?;
            match engine {
                CryptoEngineSel::Sw => {
                    let mut sw = SwCrypto;
                    mutate_seccfg(&mut seccfg, flag, &mut sw).await?
                }
                CryptoEngineSel::Sej { base } => {
                    let mut sej = SejEngine::new(stage2, base);
                    mutate_seccfg(&mut seccfg, flag, &mut sej).await?
                }
                CryptoEngineSel::Dxcc { base } => {
                    let mut dxcc = DxccEngine::new(stage2, base);
                    mutate_seccfg(&mut seccfg, flag, &mut dxcc).await?
                }
            }
        };

        self.write_partition("seccfg", &new_blob).await?;
        info!("seccfg rewritten ({:?})", flag);
        Ok(new_blob)
    }

    /// eMMC card identification, when the detected storage is eMMC.
    pub async fn emmc_cid(&self) -> Option<[u8; 16]> {
        let storage = self.dev_info.storage().await?;
        storage.downcast_arc::<EmmcStorage>().ok().map(|emmc| emmc.cid)
    }

    /// Closes the session. The only valid call on a failed session.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.transition(SessionState::Closing);

        let transport = match (&mut self.stage2, &mut self.connection, &mut self.bsl) {
            (Some(stage2), _, _) => Some(stage2.transport_mut()),
            (_, Some(conn), _) => Some(&mut conn.transport),
            (_, _, Some(bsl)) => Some(&mut bsl.transport),
            _ => self.transport.as_mut(),
        };
        if let Some(transport) = transport {
            transport.drain().await.ok();
        }

        self.transition(SessionState::Closed);
        Ok(())
    }
}

async fn mutate_seccfg(
    seccfg: &mut SecCfg,
    flag: LockFlag,
    engine: &mut dyn AesCbcBlock,
) -> Result<Vec<u8>> {
    match seccfg.verify(engine).await {
        Ok(true) => {}
        Ok(false) => warn!("seccfg hash does not verify against this engine"),
        Err(e) => warn!("seccfg hash verification unavailable: {}", e),
    }

    seccfg.set_lock_state(flag);
    seccfg.serialize(engine).await
}

#[async_trait]
impl CryptoIO for DaHandle {
    async fn read32(&mut self, addr: u32) -> Result<u32> {
        DaHandle::read32(self, addr).await
    }

    async fn write32(&mut self, addr: u32, value: u32) -> Result<()> {
        DaHandle::write32(self, addr, value).await
    }
}
