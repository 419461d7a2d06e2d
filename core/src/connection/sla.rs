/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use log::{debug, info, warn};
use num_bigint::BigUint;
use sha2::{Digest, Sha256};

use crate::connection::Connection;
use crate::connection::command::{Command, status};
use crate::error::{Error, Result, SecurityError};

/// ASN.1 DigestInfo prefix for SHA-256, as used by EMSA-PKCS1-v1_5.
const SHA256_DIGEST_INFO: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0D, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
    0x05, 0x00, 0x04, 0x20,
];

const MAX_CHALLENGE_LEN: usize = 1024;

/// One RSA private key from the per-chip authentication table.
#[derive(Debug, Clone)]
pub struct SlaKey {
    pub name: String,
    n: BigUint,
    d: BigUint,
}

impl SlaKey {
    /// Builds a key from hex-encoded modulus and private exponent.
    pub fn from_hex(name: impl Into<String>, n_hex: &str, d_hex: &str) -> Result<Self> {
        let n = BigUint::parse_bytes(n_hex.as_bytes(), 16)
            .ok_or_else(|| Error::Malformed("invalid SLA key modulus".into()))?;
        let d = BigUint::parse_bytes(d_hex.as_bytes(), 16)
            .ok_or_else(|| Error::Malformed("invalid SLA key exponent".into()))?;

        // The padding scheme needs room for the digest info; anything under
        // RSA-512 cannot be a real SLA key.
        if n.to_bytes_be().len() < 64 {
            return Err(Error::Malformed("SLA key modulus too small".into()));
        }

        Ok(SlaKey { name: name.into(), n, d })
    }

    /// EMSA-PKCS1-v1_5 signature with SHA-256 over `challenge`.
    pub fn sign(&self, challenge: &[u8]) -> Vec<u8> {
        let key_len = self.n.to_bytes_be().len();
        let digest = Sha256::digest(challenge);

        let mut em = Vec::with_capacity(key_len);
        em.push(0x00);
        em.push(0x01);
        em.resize(key_len - SHA256_DIGEST_INFO.len() - digest.len() - 1, 0xFF);
        em.push(0x00);
        em.extend_from_slice(&SHA256_DIGEST_INFO);
        em.extend_from_slice(&digest);

        let signature = BigUint::from_bytes_be(&em).modpow(&self.d, &self.n);
        let mut out = signature.to_bytes_be();

        // Left-pad back up to the modulus width.
        while out.len() < key_len {
            out.insert(0, 0);
        }
        out
    }
}

/// Preloaded SLA key table. Read-only once the session opens.
#[derive(Debug, Clone, Default)]
pub struct SlaKeyring {
    keys: Vec<SlaKey>,
}

impl SlaKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: SlaKey) {
        self.keys.push(key);
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[SlaKey] {
        &self.keys
    }
}

/// Runs the stage-1 SLA challenge/response against every key in the ring
/// until one is accepted.
pub(super) async fn perform(conn: &mut Connection) -> Result<()> {
    let window = conn.transport.timeouts.identity;

    conn.echo_cmd(Command::Sla).await?;
    let st = conn.transport.read_u16_be(window).await?;
    if st == status::SLA_PASS {
        info!("SLA already satisfied");
        return Ok(());
    }
    if st > 0xFF {
        return Err(Connection::map_security(st));
    }

    let challenge_len = conn.transport.read_u32_be(window).await? as usize;
    if challenge_len == 0 || challenge_len > MAX_CHALLENGE_LEN {
        return Err(Error::Malformed(format!("SLA challenge length {}", challenge_len)));
    }
    let challenge = conn.transport.read_exact(challenge_len, window).await?;
    debug!("SLA challenge: {}", hex::encode(&challenge));

    let keys = conn.keyring.keys().to_vec();
    if keys.is_empty() {
        warn!("Device demands SLA but the keyring is empty");
        return Err(SecurityError::SlaFailed.into());
    }

    for key in &keys {
        let signature = key.sign(&challenge);

        conn.transport.write(&(signature.len() as u32).to_le_bytes()).await?;
        let echoed = conn.transport.read_u32_le(window).await?;
        if echoed as usize != signature.len() {
            debug!("Key '{}': device rejected signature length", key.name);
            continue;
        }

        let st = conn.transport.read_u16_be(window).await?;
        if st != 0 {
            debug!("Key '{}': status 0x{:04X} before signature", key.name, st);
            continue;
        }

        conn.transport.write(&signature).await?;
        let result = conn.transport.read_u32_be(window).await?;
        if result <= 0xFF {
            info!("SLA accepted with key '{}'", key.name);
            return Ok(());
        }
        debug!("Key '{}': result 0x{:08X}", key.name, result);
    }

    Err(SecurityError::SlaFailed.into())
}
