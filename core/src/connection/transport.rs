/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::time::Duration;

use log::debug;
use tokio::time::timeout;

use crate::connection::port::{CancelToken, ConnectionType, Port, Timeouts};
use crate::error::{Error, Result, TransportError};

/// Timeout- and cancellation-aware wrapper around a [`Port`].
///
/// All protocol drivers go through this type; nothing else touches the port.
/// Calls are serialized by `&mut self`, so there is never more than one
/// outstanding operation per transport.
#[derive(Debug)]
pub struct Transport {
    port: Box<dyn Port>,
    cancel: CancelToken,
    pub timeouts: Timeouts,
}

impl Transport {
    pub fn new(port: Box<dyn Port>, cancel: CancelToken) -> Self {
        Transport { port, cancel, timeouts: Timeouts::default() }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.port.connection_type()
    }

    pub fn baudrate(&self) -> u32 {
        self.port.baudrate()
    }

    /// Writes the whole buffer or fails; no partial writes.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.cancel.ensure_active()?;
        debug!("[TX] {}", hex::encode(&data[..data.len().min(64)]));
        self.port.write_all(data).await?;
        self.port.flush().await
    }

    /// Reads exactly `buf.len()` bytes within `window`, or fails with
    /// `Timeout`, `Disconnected` or `Cancelled`. The window is never extended
    /// by internal retries.
    pub async fn read_into(&mut self, buf: &mut [u8], window: Duration) -> Result<()> {
        self.cancel.ensure_active()?;
        let cancel = self.cancel.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            read = timeout(window, self.port.read_exact(buf)) => match read {
                Ok(result) => result,
                Err(_) => Err(Error::Transport(TransportError::Timeout)),
            },
        }?;

        debug!("[RX] {}", hex::encode(&buf[..buf.len().min(64)]));
        Ok(())
    }

    pub async fn read_exact(&mut self, len: usize, window: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(&mut buf, window).await?;
        Ok(buf)
    }

    pub async fn read_u8(&mut self, window: Duration) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_into(&mut buf, window).await?;
        Ok(buf[0])
    }

    pub async fn read_u16_be(&mut self, window: Duration) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_into(&mut buf, window).await?;
        Ok(u16::from_be_bytes(buf))
    }

    pub async fn read_u32_be(&mut self, window: Duration) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_into(&mut buf, window).await?;
        Ok(u32::from_be_bytes(buf))
    }

    pub async fn read_u32_le(&mut self, window: Duration) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_into(&mut buf, window).await?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Discards whatever the device queued on either direction.
    pub async fn drain(&mut self) -> Result<()> {
        self.cancel.ensure_active()?;
        self.port.drain().await
    }

    /// Reopens the line at a new baud rate (SPRD only).
    pub async fn retune(&mut self, baudrate: u32) -> Result<()> {
        self.cancel.ensure_active()?;
        debug!("Retuning line to {} baud", baudrate);
        self.port.retune(baudrate).await
    }

    /// Cancellation-aware sleep; an in-operation delay is a suspension point
    /// like any read.
    pub async fn sleep(&mut self, duration: Duration) -> Result<()> {
        self.cancel.ensure_active()?;
        let cancel = self.cancel.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
