/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod bsl;
mod dafile;
mod handle;
pub mod legacy;
pub mod xflash;
pub mod xml;

pub use dafile::{DaCatalog, DaEntry, DaRegion, DaType};
pub use handle::{DaHandle, ShutdownMode};
