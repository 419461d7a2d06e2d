/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use num_enum::TryFromPrimitive;

/// BSL request types carried in the HDLC frame header.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum BslCmd {
    Connect = 0x00,
    DataStart = 0x01,
    DataMidst = 0x02,
    DataEnd = 0x03,
    DataExec = 0x04,
    ReadFlash = 0x05,
    ReadPartition = 0x0B,
    WritePartition = 0x0C,
    ErasePartition = 0x0D,
    PowerOff = 0x0E,
    Reset = 0x0F,
    ChangeBaudrate = 0x12,
    ReadUid = 0x14,
}

/// BSL response types.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum BslResp {
    Ok = 0x80,
    Error = 0x81,
    Data = 0x82,
    Busy = 0x83,
    VerifyError = 0x84,
}
