/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{Error, Result};

/// Which agent is answering on the other side of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Brom,
    Preloader,
    Da,
    Bsl,
}

/// Raw byte pipe to the device. Implementations do plain blocking I/O;
/// timeouts and cancellation are layered on top by [`Transport`].
///
/// [`Transport`]: crate::connection::transport::Transport
#[async_trait]
pub trait Port: Send + fmt::Debug {
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;
    async fn flush(&mut self) -> Result<()>;

    /// Discards pending input and output buffers.
    async fn drain(&mut self) -> Result<()>;

    /// Closes and reopens the line at a new baud rate. Only the SPRD path
    /// ever calls this.
    async fn retune(&mut self, baudrate: u32) -> Result<()>;

    fn connection_type(&self) -> ConnectionType;
    fn baudrate(&self) -> u32;
}

/// Default per-operation read windows. All of these are plain data, callers
/// may override any of them before opening a session.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Per-byte window during the stage-1 handshake.
    pub handshake_byte: Duration,
    /// Identity probe commands.
    pub identity: Duration,
    /// One bulk frame during chunked reads/writes.
    pub bulk_frame: Duration,
    /// Partition erase.
    pub erase: Duration,
    /// Format-style operations.
    pub format: Duration,
    /// Everything else on the control path.
    pub control: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            handshake_byte: Duration::from_millis(150),
            identity: Duration::from_secs(1),
            bulk_frame: Duration::from_secs(5),
            erase: Duration::from_secs(30),
            format: Duration::from_secs(600),
            control: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

/// Ambient cancellation token, checked at every suspension point and at the
/// start of every chunk in a chunked transfer.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Errors with [`Error::Cancelled`] once [`cancel`](Self::cancel) has
    /// been called.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() { Err(Error::Cancelled) } else { Ok(()) }
    }

    /// Resolves when the token is cancelled. Used to abort in-flight reads.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
