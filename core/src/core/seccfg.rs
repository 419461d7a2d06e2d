/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use log::debug;
use num_enum::TryFromPrimitive;
use sha2::{Digest, Sha256};

use crate::core::crypto::AesCbcBlock;
use crate::error::{Error, Result};
use crate::le_u32;

pub const SECCFG_MAGIC: u32 = 0x4D4D4D4D;
pub const SECCFG_END_FLAG: u32 = 0x45454545;

const HEADER_LEN: usize = 28;
const HASH_LEN: usize = 32;
const MIN_SIZE: u32 = 64;

/// Bootloader lock state as stored in the seccfg header.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum LockState {
    Default = 0,
    MpDefault = 1,
    Unlock = 3,
    Lock = 4,
    Verified = 5,
    Custom = 6,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum CriticalLockState {
    Unlock = 1,
    Lock = 2,
}

/// Requested mutation for [`SecCfg::set_lock_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFlag {
    Lock,
    Unlock,
}

/// Parsed seccfg partition image.
///
/// Everything outside the two lock-state words and the trailing encrypted
/// hash is preserved byte-for-byte from the original read.
pub struct SecCfg {
    pub version: u32,
    pub size: u32,
    pub lock_state: u32,
    pub critical_lock_state: u32,
    pub sboot_runtime: u32,
    raw: Vec<u8>,
    dirty: bool,
}

impl SecCfg {
    /// Validates magic, end flag and size, and captures the raw image.
    pub fn parse(blob: &[u8]) -> Result<Self> {
        if blob.len() < MIN_SIZE as usize {
            return Err(Error::Malformed(format!("seccfg too short: {} bytes", blob.len())));
        }

        let magic = le_u32!(blob, 0);
        let version = le_u32!(blob, 4);
        let size = le_u32!(blob, 8);
        let lock_state = le_u32!(blob, 12);
        let critical_lock_state = le_u32!(blob, 16);
        let sboot_runtime = le_u32!(blob, 20);
        let end_flag = le_u32!(blob, 24);

        if magic != SECCFG_MAGIC || end_flag != SECCFG_END_FLAG {
            return Err(Error::Malformed(format!(
                "bad seccfg markers: magic=0x{:08X} end=0x{:08X}",
                magic, end_flag
            )));
        }
        if size < MIN_SIZE || (size as usize) > blob.len() {
            return Err(Error::Malformed(format!("seccfg size field {} out of range", size)));
        }

        debug!(
            "seccfg v{}: lock_state={} critical={} sboot_runtime={}",
            version, lock_state, critical_lock_state, sboot_runtime
        );

        Ok(SecCfg {
            version,
            size,
            lock_state,
            critical_lock_state,
            sboot_runtime,
            raw: blob.to_vec(),
            dirty: false,
        })
    }

    pub fn lock_state(&self) -> Option<LockState> {
        LockState::try_from(self.lock_state).ok()
    }

    /// Canonical 28-byte header used for hashing. The end-flag slot always
    /// carries the constant, whatever the image said.
    fn canonical_header(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&SECCFG_MAGIC.to_le_bytes());
        header[4..8].copy_from_slice(&self.version.to_le_bytes());
        header[8..12].copy_from_slice(&self.size.to_le_bytes());
        header[12..16].copy_from_slice(&self.lock_state.to_le_bytes());
        header[16..20].copy_from_slice(&self.critical_lock_state.to_le_bytes());
        header[20..24].copy_from_slice(&self.sboot_runtime.to_le_bytes());
        header[24..28].copy_from_slice(&SECCFG_END_FLAG.to_le_bytes());
        header
    }

    fn hash_range(&self) -> std::ops::Range<usize> {
        let end = self.size as usize;
        end - HASH_LEN..end
    }

    /// Checks the trailing hardware-encrypted hash against the header.
    pub async fn verify(&self, engine: &mut dyn AesCbcBlock) -> Result<bool> {
        let stored = &self.raw[self.hash_range()];
        let decrypted = engine.decrypt(stored).await?;
        let expected = Sha256::digest(self.canonical_header());

        Ok(decrypted == expected.as_slice())
    }

    /// Applies the requested lock state to both lock words.
    pub fn set_lock_state(&mut self, flag: LockFlag) {
        let (lock, critical) = match flag {
            LockFlag::Lock => (LockState::Lock, CriticalLockState::Lock),
            LockFlag::Unlock => (LockState::Unlock, CriticalLockState::Unlock),
        };
        self.lock_state = lock as u32;
        self.critical_lock_state = critical as u32;
        self.dirty = true;
    }

    /// Serializes the image. An unmutated record is returned bit-exactly;
    /// a mutated one differs only in the lock words and the re-encrypted
    /// trailing hash.
    pub async fn serialize(&self, engine: &mut dyn AesCbcBlock) -> Result<Vec<u8>> {
        let mut out = self.raw.clone();

        if !self.dirty {
            return Ok(out);
        }

        out[12..16].copy_from_slice(&self.lock_state.to_le_bytes());
        out[16..20].copy_from_slice(&self.critical_lock_state.to_le_bytes());

        let digest = Sha256::digest(self.canonical_header());
        let encrypted = engine.encrypt(&digest).await?;
        if encrypted.len() != HASH_LEN {
            return Err(Error::Malformed(format!(
                "crypto engine produced {} hash bytes",
                encrypted.len()
            )));
        }
        let range = self.hash_range();
        out[range].copy_from_slice(&encrypted);

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::sw::SwCrypto;

    async fn build_blob(lock_state: u32, critical: u32) -> Vec<u8> {
        let mut blob = vec![0u8; 0x4000];
        blob[0..4].copy_from_slice(&SECCFG_MAGIC.to_le_bytes());
        blob[4..8].copy_from_slice(&4u32.to_le_bytes());
        blob[8..12].copy_from_slice(&0x4000u32.to_le_bytes());
        blob[12..16].copy_from_slice(&lock_state.to_le_bytes());
        blob[16..20].copy_from_slice(&critical.to_le_bytes());
        blob[24..28].copy_from_slice(&SECCFG_END_FLAG.to_le_bytes());
        // Opaque vendor bytes that must survive rewriting untouched.
        blob[28..64].fill(0x5C);

        // Stamp a valid encrypted hash so parse/verify round-trips.
        let cfg = SecCfg::parse(&blob).unwrap();
        let digest = Sha256::digest(cfg.canonical_header());
        let encrypted = SwCrypto.encrypt(&digest).await.unwrap();
        let end = blob.len();
        blob[end - 32..].copy_from_slice(&encrypted);
        blob
    }

    #[tokio::test]
    async fn unmutated_serialize_is_identity() {
        let blob = build_blob(LockState::Lock as u32, CriticalLockState::Lock as u32).await;
        let cfg = SecCfg::parse(&blob).unwrap();

        assert!(cfg.verify(&mut SwCrypto).await.unwrap());
        assert_eq!(cfg.serialize(&mut SwCrypto).await.unwrap(), blob);
    }

    #[tokio::test]
    async fn unlock_changes_lock_words_and_hash_only() {
        let blob = build_blob(LockState::Lock as u32, CriticalLockState::Lock as u32).await;
        let mut cfg = SecCfg::parse(&blob).unwrap();

        cfg.set_lock_state(LockFlag::Unlock);
        let out = cfg.serialize(&mut SwCrypto).await.unwrap();

        assert_eq!(out.len(), blob.len());
        assert_eq!(le_u32!(out, 12), LockState::Unlock as u32);
        assert_eq!(le_u32!(out, 16), CriticalLockState::Unlock as u32);
        assert_ne!(out[out.len() - 32..], blob[blob.len() - 32..]);

        // Everything outside [12, 20) and the trailing hash is untouched.
        assert_eq!(out[..12], blob[..12]);
        assert_eq!(out[20..out.len() - 32], blob[20..blob.len() - 32]);

        // The rewritten image must verify again.
        let reparsed = SecCfg::parse(&out).unwrap();
        assert!(reparsed.verify(&mut SwCrypto).await.unwrap());
    }

    #[test]
    fn bad_markers_are_rejected() {
        let mut blob = vec![0u8; 128];
        blob[0..4].copy_from_slice(&SECCFG_MAGIC.to_le_bytes());
        blob[8..12].copy_from_slice(&128u32.to_le_bytes());
        // end flag missing
        assert!(SecCfg::parse(&blob).is_err());
    }
}
