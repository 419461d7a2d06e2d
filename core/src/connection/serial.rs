/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serialport::{ClearBuffer, SerialPort as _};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::connection::port::{ConnectionType, Port};
use crate::error::{Error, Result, TransportError};

/// USB-CDC serial port backend.
///
/// Device discovery is the host's problem; this type is handed a path that is
/// already known to be a target in download mode.
pub struct CdcSerialPort {
    path: String,
    baudrate: u32,
    connection_type: ConnectionType,
    stream: Option<SerialStream>,
}

impl fmt::Debug for CdcSerialPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CdcSerialPort {{ path: {}, baudrate: {}, open: {} }}",
            self.path,
            self.baudrate,
            self.stream.is_some()
        )
    }
}

impl CdcSerialPort {
    pub fn new(path: impl Into<String>, baudrate: u32, connection_type: ConnectionType) -> Self {
        CdcSerialPort { path: path.into(), baudrate, connection_type, stream: None }
    }

    pub fn open(&mut self) -> Result<()> {
        let stream = tokio_serial::new(&self.path, self.baudrate)
            .timeout(Duration::from_secs(5))
            .open_native_async()
            .map_err(|e| Error::Transport(TransportError::Io(std::io::Error::other(e))))?;

        debug!("Opened {} at {} baud", self.path, self.baudrate);
        self.stream = Some(stream);
        Ok(())
    }

    fn stream(&mut self) -> Result<&mut SerialStream> {
        self.stream.as_mut().ok_or(Error::Transport(TransportError::Disconnected))
    }
}

#[async_trait]
impl Port for CdcSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.stream()?.write_all(data).await.map_err(map_io)
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.stream()?.read_exact(buf).await.map(|_| ()).map_err(map_io)
    }

    async fn flush(&mut self) -> Result<()> {
        self.stream()?.flush().await.map_err(map_io)
    }

    async fn drain(&mut self) -> Result<()> {
        self.stream()?
            .clear(ClearBuffer::All)
            .map_err(|e| Error::Transport(TransportError::Io(std::io::Error::other(e))))
    }

    async fn retune(&mut self, baudrate: u32) -> Result<()> {
        self.stream = None;
        self.baudrate = baudrate;
        self.open()
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    fn baudrate(&self) -> u32 {
        self.baudrate
    }
}

fn map_io(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::BrokenPipe => {
            Error::Transport(TransportError::Disconnected)
        }
        _ => Error::Transport(TransportError::Io(e)),
    }
}
