/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/

/// Reads a `u16` little-endian at `$off` from a byte slice.
#[macro_export]
macro_rules! le_u16 {
    ($buf:expr, $off:expr) => {
        u16::from_le_bytes($buf[$off..$off + 2].try_into().unwrap())
    };
}

/// Reads a `u32` little-endian at `$off` from a byte slice.
#[macro_export]
macro_rules! le_u32 {
    ($buf:expr, $off:expr) => {
        u32::from_le_bytes($buf[$off..$off + 4].try_into().unwrap())
    };
}

/// Reads a `u64` little-endian at `$off` from a byte slice.
#[macro_export]
macro_rules! le_u64 {
    ($buf:expr, $off:expr) => {
        u64::from_le_bytes($buf[$off..$off + 8].try_into().unwrap())
    };
}
