/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
//! Scripted in-memory port used by the protocol tests. A responder closure
//! plays the device: it sees every host write and queues reply bytes.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use syzygy::error::Result;
use syzygy::{ConnectionType, Port};

pub type Responder = Box<dyn FnMut(&[u8], &mut VecDeque<u8>) + Send>;

#[derive(Default)]
pub struct MockState {
    /// Bytes queued for the host to read.
    pub rx: VecDeque<u8>,
    /// Flat record of everything the host wrote.
    pub tx: Vec<u8>,
    /// Per-call record of host writes.
    pub writes: Vec<Vec<u8>>,
    pub drains: usize,
    pub responder: Option<Responder>,
}

pub struct MockPort {
    pub state: Arc<Mutex<MockState>>,
    connection_type: ConnectionType,
    baudrate: u32,
}

impl fmt::Debug for MockPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MockPort {{ baudrate: {} }}", self.baudrate)
    }
}

impl MockPort {
    pub fn new() -> (Self, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let port = MockPort {
            state: state.clone(),
            connection_type: ConnectionType::Brom,
            baudrate: 115_200,
        };
        (port, state)
    }

    pub fn with_responder(responder: Responder) -> (Self, Arc<Mutex<MockState>>) {
        let (port, state) = Self::new();
        state.lock().unwrap().responder = Some(responder);
        (port, state)
    }
}

#[async_trait]
impl Port for MockPort {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.tx.extend_from_slice(data);
        state.writes.push(data.to_vec());

        let mut responder = state.responder.take();
        if let Some(respond) = &mut responder {
            respond(data, &mut state.rx);
        }
        state.responder = responder;
        Ok(())
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if state.rx.len() >= buf.len() {
                    for slot in buf.iter_mut() {
                        *slot = state.rx.pop_front().unwrap();
                    }
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    async fn drain(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.rx.clear();
        state.drains += 1;
        Ok(())
    }

    async fn retune(&mut self, baudrate: u32) -> Result<()> {
        self.baudrate = baudrate;
        Ok(())
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    fn baudrate(&self) -> u32 {
        self.baudrate
    }
}

/// Splits a flat byte stream of magic-framed packets into payloads.
pub fn split_frames(stream: &[u8]) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos + 12 <= stream.len() {
        let len = u32::from_le_bytes(stream[pos + 8..pos + 12].try_into().unwrap()) as usize;
        frames.push(stream[pos + 12..pos + 12 + len].to_vec());
        pos += 12 + len;
    }
    frames
}

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}
