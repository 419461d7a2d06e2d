/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use async_trait::async_trait;
use log::debug;

use crate::core::crypto::{AesCbcBlock, CryptoIO};
use crate::error::{Error, Result};

// DXCC host register offsets.
const DXCC_HOST_IRR: u32 = 0xA00;
const DXCC_HOST_ICR: u32 = 0xA08;
const DXCC_DSCRPTR_QUEUE_WORD0: u32 = 0xE80;
const DXCC_DSCRPTR_QUEUE_CONTENT: u32 = 0xE9C;
const DXCC_DIN_BUF: u32 = 0xC40;
const DXCC_DOUT_BUF: u32 = 0xC80;

const DXCC_OP_AES_CBC: u32 = 0x0220;
const DXCC_DIR_ENC: u32 = 0x0001;
const DXCC_KEY_HUK: u32 = 0x0400;
const DXCC_IRR_DONE: u32 = 0x0004;

const POLL_LIMIT: u32 = 1000;

/// ARM CryptoCell (DXCC) wrapper for SoCs that replaced SEJ. The descriptor
/// queue is fed one 16-byte block at a time with the hardware-unique key
/// selected, which is all the seccfg path needs.
pub struct DxccEngine<'a> {
    io: &'a mut dyn CryptoIO,
    base: u32,
}

impl<'a> DxccEngine<'a> {
    pub fn new(io: &'a mut dyn CryptoIO, base: u32) -> Self {
        DxccEngine { io, base }
    }

    async fn submit(&mut self, opcode: u32) -> Result<()> {
        let base = self.base;

        // Descriptor word 0 carries opcode and key selection; the queue
        // content register kicks the operation.
        self.io.write32(base + DXCC_DSCRPTR_QUEUE_WORD0, opcode | DXCC_KEY_HUK).await?;
        self.io.write32(base + DXCC_DSCRPTR_QUEUE_CONTENT, 1).await?;

        let mut polls = 0;
        loop {
            let irr = self.io.read32(base + DXCC_HOST_IRR).await?;
            if irr & DXCC_IRR_DONE != 0 {
                break;
            }
            polls += 1;
            if polls >= POLL_LIMIT {
                return Err(Error::Malformed("DXCC descriptor never completed".into()));
            }
        }
        self.io.write32(base + DXCC_HOST_ICR, DXCC_IRR_DONE).await?;

        Ok(())
    }

    async fn run(&mut self, data: &[u8], encrypt: bool) -> Result<Vec<u8>> {
        if data.len() % 16 != 0 {
            return Err(Error::Malformed(format!(
                "DXCC input length {} not block-aligned",
                data.len()
            )));
        }

        let base = self.base;
        let mut opcode = DXCC_OP_AES_CBC;
        if encrypt {
            opcode |= DXCC_DIR_ENC;
        }
        debug!("DXCC run at 0x{:08X}, {} bytes, encrypt={}", base, data.len(), encrypt);

        let mut out = Vec::with_capacity(data.len());
        for block in data.chunks_exact(16) {
            for (i, word) in block.chunks_exact(4).enumerate() {
                let value = u32::from_le_bytes(word.try_into().unwrap());
                self.io.write32(base + DXCC_DIN_BUF + (i as u32) * 4, value).await?;
            }

            self.submit(opcode).await?;

            for i in 0..4u32 {
                let word = self.io.read32(base + DXCC_DOUT_BUF + i * 4).await?;
                out.extend_from_slice(&word.to_le_bytes());
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl AesCbcBlock for DxccEngine<'_> {
    async fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.run(data, true).await
    }

    async fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.run(data, false).await
    }
}
