/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use async_trait::async_trait;
use log::debug;

use crate::core::crypto::{AesCbcBlock, CryptoIO};
use crate::error::{Error, Result};

// HACC register offsets from the SEJ base.
const HACC_CON: u32 = 0x00;
const HACC_ACON: u32 = 0x04;
const HACC_ACON2: u32 = 0x08;
const HACC_ACONK: u32 = 0x0C;
const HACC_ASRC0: u32 = 0x10;
const HACC_AKEY0: u32 = 0x20;
const HACC_AOUT0: u32 = 0x40;

const HACC_AES_ENC: u32 = 0x0001;
const HACC_AES_MODE_CBC: u32 = 0x0002;
const HACC_AES_128: u32 = 0x0010;
const HACC_AES_START: u32 = 0x0001;
const HACC_AES_CLR: u32 = 0x0002;
const HACC_AES_RDY: u32 = 0x8000;
const HACC_AES_BK2C: u32 = 0x0010;
const HACC_AES_R2K: u32 = 0x0100;

// Fixed configuration pattern mixed into the hardware-unique key.
const HACC_CFG: [u32; 4] = [0x9ED40400, 0x00E884A1, 0xE3F083BD, 0x2F4E6D8A];

const POLL_LIMIT: u32 = 1000;

/// MediaTek SEJ (security engine, JTAG-fused) driven over the stage-2
/// register-access extension. Uses the chip's internal derived key, so the
/// output matches what the boot chain computes on-device.
pub struct SejEngine<'a> {
    io: &'a mut dyn CryptoIO,
    base: u32,
}

impl<'a> SejEngine<'a> {
    /// `base` is the SEJ block's MMIO base (0x1000A000 on most SoCs).
    pub fn new(io: &'a mut dyn CryptoIO, base: u32) -> Self {
        SejEngine { io, base }
    }

    async fn init(&mut self, encrypt: bool) -> Result<()> {
        let base = self.base;

        self.io.write32(base + HACC_ACON2, HACC_AES_CLR).await?;
        self.io.write32(base + HACC_CON, 0).await?;

        // Mix the fixed pattern into the key registers; the engine combines
        // it with the fused hardware key.
        for (i, word) in HACC_CFG.iter().enumerate() {
            self.io.write32(base + HACC_AKEY0 + (i as u32) * 4, *word).await?;
        }
        for i in HACC_CFG.len()..8 {
            self.io.write32(base + HACC_AKEY0 + (i as u32) * 4, 0).await?;
        }

        self.io.write32(base + HACC_ACONK, HACC_AES_BK2C | HACC_AES_R2K).await?;

        let mut acon = HACC_AES_MODE_CBC | HACC_AES_128;
        if encrypt {
            acon |= HACC_AES_ENC;
        }
        self.io.write32(base + HACC_ACON, acon).await?;

        debug!("SEJ initialized at 0x{:08X}, encrypt={}", base, encrypt);
        Ok(())
    }

    async fn run(&mut self, data: &[u8], encrypt: bool) -> Result<Vec<u8>> {
        if data.len() % 16 != 0 {
            return Err(Error::Malformed(format!("SEJ input length {} not block-aligned", data.len())));
        }

        self.init(encrypt).await?;

        let base = self.base;
        let mut out = Vec::with_capacity(data.len());

        for block in data.chunks_exact(16) {
            for (i, word) in block.chunks_exact(4).enumerate() {
                let value = u32::from_le_bytes(word.try_into().unwrap());
                self.io.write32(base + HACC_ASRC0 + (i as u32) * 4, value).await?;
            }

            self.io.write32(base + HACC_ACON2, HACC_AES_START).await?;

            let mut polls = 0;
            loop {
                let state = self.io.read32(base + HACC_ACON2).await?;
                if state & HACC_AES_RDY != 0 {
                    break;
                }
                polls += 1;
                if polls >= POLL_LIMIT {
                    return Err(Error::Malformed("SEJ engine never became ready".into()));
                }
            }

            for i in 0..4u32 {
                let word = self.io.read32(base + HACC_AOUT0 + i * 4).await?;
                out.extend_from_slice(&word.to_le_bytes());
            }
        }

        self.io.write32(base + HACC_ACON2, HACC_AES_CLR).await?;
        Ok(out)
    }
}

#[async_trait]
impl AesCbcBlock for SejEngine<'_> {
    async fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.run(data, true).await
    }

    async fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.run(data, false).await
    }
}
