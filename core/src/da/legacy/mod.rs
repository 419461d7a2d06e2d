/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
mod cmds;
mod legacy_lib;

pub use cmds::{ACK, CONT, Cmd, NACK};
pub use legacy_lib::LegacyDa;
