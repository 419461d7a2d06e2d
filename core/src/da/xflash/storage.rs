/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::sync::Arc;

use log::debug;

use crate::core::storage::Storage;
use crate::core::storage::emmc::EmmcStorage;
use crate::core::storage::nand::{NandStorage, NorStorage};
use crate::core::storage::ufs::UfsStorage;
use crate::da::xflash::cmds::Cmd;
use crate::da::xflash::xflash_lib::XFlash;
use crate::error::{Error, Result};
use crate::le_u32;

/// Probes storage in fixed order: eMMC, UFS, NAND, NOR. The first query
/// whose leading word is non-zero wins.
pub(super) async fn detect_storage(xflash: &mut XFlash) -> Result<Arc<dyn Storage>> {
    let probes = [Cmd::GetEmmcInfo, Cmd::GetUfsInfo, Cmd::GetNandInfo, Cmd::GetNorInfo];

    for probe in probes {
        let resp = match xflash.devctrl(probe, None).await {
            Ok(resp) => resp,
            Err(e) => {
                debug!("{:?} probe failed: {}", probe, e);
                continue;
            }
        };
        if resp.len() < 4 || le_u32!(resp, 0) == 0 {
            continue;
        }

        let storage: Arc<dyn Storage> = match probe {
            Cmd::GetEmmcInfo => Arc::new(EmmcStorage::from_response(&resp)?),
            Cmd::GetUfsInfo => Arc::new(UfsStorage::from_response(&resp)?),
            Cmd::GetNandInfo => Arc::new(NandStorage::from_response(&resp)?),
            _ => Arc::new(NorStorage::from_response(&resp)?),
        };
        return Ok(storage);
    }

    Err(Error::Malformed("no storage responded to the info probes".into()))
}
