/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
#[macro_use]
mod macros;
mod cmds;
mod exts;
mod flash;
mod storage;
mod xflash_lib;

pub use cmds::{Cmd, status};
pub use xflash_lib::XFlash;
