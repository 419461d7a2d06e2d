/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod dxcc;
pub mod sej;
pub mod sw;

use async_trait::async_trait;

use crate::error::Result;

/// Register-level access to the target, provided by whatever stage-2
/// protocol is running (the custom read/write-memory extension commands).
#[async_trait]
pub trait CryptoIO: Send {
    async fn read32(&mut self, addr: u32) -> Result<u32>;
    async fn write32(&mut self, addr: u32, value: u32) -> Result<()>;
}

/// AES-CBC capability with a device-held key.
///
/// Hardware engines (SEJ, DXCC) drive memory-mapped registers through
/// [`CryptoIO`]; the software fallback computes locally. Input length must be
/// a multiple of 16.
#[async_trait]
pub trait AesCbcBlock: Send {
    async fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>>;
    async fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>>;
}
