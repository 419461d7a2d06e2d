/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
mod cmds;
mod flash;
mod sla;
mod xml_lib;

pub use cmds::{XmlCommand, create_cmd};
pub use sla::{DaSlaSigner, SlaIdSelect};
pub use xml_lib::XmlDa;
