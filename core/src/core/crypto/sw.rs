/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use aes::Aes128;
use async_trait::async_trait;
use cbc::{Decryptor, Encryptor};
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::core::crypto::AesCbcBlock;
use crate::error::{Error, Result};

// Derivation constants for the software seccfg algorithm.
const SW_KEY: [u8; 16] = [
    0x57, 0x32, 0x5A, 0x5A, 0x12, 0x5E, 0x86, 0x4D, 0xEC, 0x26, 0xB9, 0x00, 0x65, 0x41, 0x34,
    0xC3,
];
const SW_IV: [u8; 16] = [
    0x6A, 0x23, 0x34, 0xC5, 0xE8, 0xF0, 0x11, 0x22, 0x7C, 0x4D, 0x90, 0xAB, 0x3F, 0x51, 0x08,
    0x64,
];

/// Software AES-CBC used by devices whose seccfg carries the `SW` algorithm
/// marker, and by tests. Unlike SEJ/DXCC this needs no target access.
#[derive(Debug, Clone, Default)]
pub struct SwCrypto;

#[async_trait]
impl AesCbcBlock for SwCrypto {
    async fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut buf = data.to_vec();
        let len = buf.len();
        Encryptor::<Aes128>::new(&SW_KEY.into(), &SW_IV.into())
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|_| Error::Malformed("AES input not block-aligned".into()))?;
        Ok(buf)
    }

    async fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut buf = data.to_vec();
        Decryptor::<Aes128>::new(&SW_KEY.into(), &SW_IV.into())
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| Error::Malformed("AES input not block-aligned".into()))?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn encrypt_decrypt_round_trip() {
        let mut engine = SwCrypto;
        let plain = [0x42u8; 32];
        let cipher = engine.encrypt(&plain).await.unwrap();
        assert_ne!(cipher, plain);
        assert_eq!(engine.decrypt(&cipher).await.unwrap(), plain);
    }

    #[tokio::test]
    async fn rejects_unaligned_input() {
        let mut engine = SwCrypto;
        assert!(engine.encrypt(&[0u8; 15]).await.is_err());
    }
}
