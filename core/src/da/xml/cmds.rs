/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::collections::BTreeMap;

pub const CMD_START: &str = "<command>CMD:START</command>";
pub const CMD_END: &str = "<command>CMD:END</command>";
pub const HOST_CMDS: &str =
    "CMD:DOWNLOAD-FILE^1@CMD:FILE-SYS-OPERATION^1@CMD:PROGRESS-REPORT^1@CMD:UPLOAD-FILE^1@";

/// In-memory pseudo-path the DA uses when a transfer has no real file
/// behind it.
pub const MEM_TARGET: &str = "MEM://0x0:0x200000";

/// Every XML command renders to the same `<da>` envelope; implementations
/// supply the name, version and argument list.
pub trait XmlCommand {
    fn cmd_name(&self) -> &'static str;
    /// `(section, tag, content)` triples; `None` section renders as `<arg>`.
    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)>;
    fn version(&self) -> &'static str {
        "1.0"
    }
}

pub fn create_cmd<C: XmlCommand>(cmd: &C) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><da><version>{}</version><command>CMD:{}</command>"#,
        cmd.version(),
        cmd.cmd_name()
    );

    let mut sections: BTreeMap<Option<&str>, Vec<(&str, String)>> = BTreeMap::new();
    for (section, tag, content) in cmd.args() {
        sections.entry(section).or_default().push((tag, content));
    }

    for (section, entries) in sections {
        let tag = section.unwrap_or("arg");
        xml.push_str(&format!("<{}>", tag));
        for (inner, content) in entries {
            xml.push_str(&format!("<{}>{}</{}>", inner, content, inner));
        }
        xml.push_str(&format!("</{}>", tag));
    }

    xml.push_str("</da>\u{0}");
    xml
}

pub struct BootTo {
    pub at_addr: u64,
    pub jmp_addr: u64,
    pub length: u64,
}

impl XmlCommand for BootTo {
    fn cmd_name(&self) -> &'static str {
        "BOOT-TO"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![
            (None, "at_address", format!("0x{:x}", self.at_addr)),
            (None, "jmp_address", format!("0x{:x}", self.jmp_addr)),
            (None, "source_file", format!("MEM://0x0:0x{:x}", self.length)),
        ]
    }
}

pub struct SetRuntimeParameter;

impl XmlCommand for SetRuntimeParameter {
    fn cmd_name(&self) -> &'static str {
        "SET-RUNTIME-PARAMETER"
    }

    fn version(&self) -> &'static str {
        "1.1"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![
            (None, "checksum_level", "NONE".into()),
            (None, "battery_exist", "AUTO-DETECT".into()),
            (None, "da_log_level", "INFO".into()),
            (None, "log_channel", "UART".into()),
            (None, "system_os", "LINUX".into()),
            (Some("adv"), "initialize_dram", "YES".into()),
        ]
    }
}

pub struct HostSupportedCommands;

impl XmlCommand for HostSupportedCommands {
    fn cmd_name(&self) -> &'static str {
        "HOST-SUPPORTED-COMMANDS"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![(None, "host_capability", HOST_CMDS.into())]
    }
}

pub struct NotifyInitHw;

impl XmlCommand for NotifyInitHw {
    fn cmd_name(&self) -> &'static str {
        "NOTIFY-INIT-HW"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        Vec::new()
    }
}

pub struct GetHwInfo;

impl XmlCommand for GetHwInfo {
    fn cmd_name(&self) -> &'static str {
        "GET-HW-INFO"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![(None, "target_file", MEM_TARGET.into())]
    }
}

pub struct GetSysProperty {
    pub key: &'static str,
}

impl XmlCommand for GetSysProperty {
    fn cmd_name(&self) -> &'static str {
        "GET-SYS-PROPERTY"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![(None, "key", self.key.into()), (None, "target_file", MEM_TARGET.into())]
    }
}

pub struct ReadPartition {
    pub partition: String,
}

impl XmlCommand for ReadPartition {
    fn cmd_name(&self) -> &'static str {
        "READ-PARTITION"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![
            (None, "partition", self.partition.clone()),
            (None, "target_file", format!("{}.bin", self.partition)),
        ]
    }
}

pub struct ReadFlash {
    pub partition: String,
    pub offset: u64,
    pub length: usize,
}

impl XmlCommand for ReadFlash {
    fn cmd_name(&self) -> &'static str {
        "READ-FLASH"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![
            (None, "partition", self.partition.clone()),
            (None, "offset", format!("0x{:X}", self.offset)),
            (None, "length", format!("0x{:X}", self.length)),
            (None, "target_file", self.partition.clone()),
        ]
    }
}

pub struct WritePartition {
    pub partition: String,
}

impl XmlCommand for WritePartition {
    fn cmd_name(&self) -> &'static str {
        "WRITE-PARTITION"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![
            (None, "partition", self.partition.clone()),
            (None, "source_file", format!("{}.bin", self.partition)),
        ]
    }
}

pub struct WriteFlash {
    pub partition: String,
    pub offset: u64,
    pub length: usize,
}

impl XmlCommand for WriteFlash {
    fn cmd_name(&self) -> &'static str {
        "WRITE-FLASH"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![
            (None, "partition", self.partition.clone()),
            (None, "offset", format!("0x{:X}", self.offset)),
            (None, "source_file", format!("MEM://0x0:0x{:X}", self.length)),
        ]
    }
}

pub struct ErasePartition {
    pub partition: String,
}

impl XmlCommand for ErasePartition {
    fn cmd_name(&self) -> &'static str {
        "ERASE-PARTITION"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![(None, "partition", self.partition.clone())]
    }
}

pub struct FlashAll {
    pub path_separator: &'static str,
}

impl XmlCommand for FlashAll {
    fn cmd_name(&self) -> &'static str {
        "FLASH-ALL"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![(None, "path_separator", self.path_separator.into())]
    }
}

pub struct Reboot {
    pub action: &'static str,
}

impl XmlCommand for Reboot {
    fn cmd_name(&self) -> &'static str {
        "REBOOT"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![(None, "action", self.action.into())]
    }
}

pub struct SetBootMode {
    pub mode: &'static str,
}

impl XmlCommand for SetBootMode {
    fn cmd_name(&self) -> &'static str {
        "SET-BOOT-MODE"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![
            (None, "mode", self.mode.into()),
            (None, "connect_type", "USB".into()),
            (None, "mobile_log", "OFF".into()),
            (None, "adb", "OFF".into()),
        ]
    }
}

pub struct ReadRegister {
    pub address: u32,
}

impl XmlCommand for ReadRegister {
    fn cmd_name(&self) -> &'static str {
        "READ-REGISTER"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![
            (None, "base_address", format!("0x{:X}", self.address)),
            (None, "target_file", MEM_TARGET.into()),
        ]
    }
}

pub struct WriteRegister {
    pub address: u32,
}

impl XmlCommand for WriteRegister {
    fn cmd_name(&self) -> &'static str {
        "WRITE-REGISTER"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![
            (None, "base_address", format!("0x{:X}", self.address)),
            (None, "source_file", "MEM://0x0:0x4".into()),
        ]
    }
}

pub struct ReadEfuse;

impl XmlCommand for ReadEfuse {
    fn cmd_name(&self) -> &'static str {
        "READ-EFUSE"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![(None, "target_file", MEM_TARGET.into())]
    }
}

pub struct WriteEfuse;

impl XmlCommand for WriteEfuse {
    fn cmd_name(&self) -> &'static str {
        "WRITE-EFUSE"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![(None, "source_file", MEM_TARGET.into())]
    }
}

pub struct SecurityGetDevFwInfo;

impl XmlCommand for SecurityGetDevFwInfo {
    fn cmd_name(&self) -> &'static str {
        "SECURITY-GET-DEV-FW-INFO"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![(None, "target_file", MEM_TARGET.into())]
    }
}

pub struct SecuritySetFlashPolicy {
    pub length: usize,
}

impl XmlCommand for SecuritySetFlashPolicy {
    fn cmd_name(&self) -> &'static str {
        "SECURITY-SET-FLASH-POLICY"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![(None, "source_file", format!("MEM://0x0:0x{:X}", self.length))]
    }
}

pub struct SecuritySetAllInOneSignature {
    pub length: usize,
}

impl XmlCommand for SecuritySetAllInOneSignature {
    fn cmd_name(&self) -> &'static str {
        "SECURITY-SET-ALLINONE-SIGNATURE"
    }

    fn args(&self) -> Vec<(Option<&'static str>, &'static str, String)> {
        vec![(None, "source_file", format!("MEM://0x0:0x{:X}", self.length))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_envelope_shape() {
        let doc = create_cmd(&BootTo { at_addr: 0x40000000, jmp_addr: 0x40000000, length: 0x100 });
        assert!(doc.starts_with(r#"<?xml version="1.0" encoding="utf-8"?><da>"#));
        assert!(doc.contains("<command>CMD:BOOT-TO</command>"));
        assert!(doc.contains("<at_address>0x40000000</at_address>"));
        assert!(doc.contains("<source_file>MEM://0x0:0x100</source_file>"));
        assert!(doc.ends_with("</da>\u{0}"));
    }

    #[test]
    fn custom_sections_render_separately() {
        let doc = create_cmd(&SetRuntimeParameter);
        assert!(doc.contains("<arg><checksum_level>NONE</checksum_level>"));
        assert!(doc.contains("<adv><initialize_dram>YES</initialize_dram></adv>"));
    }
}
