/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
mod bsl_lib;
mod cmds;

pub use bsl_lib::Bsl;
pub use cmds::{BslCmd, BslResp};
