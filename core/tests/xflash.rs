/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
mod common;

use std::sync::{Arc, Mutex};

use common::{MockPort, MockState, init_logs, split_frames};
use syzygy::Transport;
use syzygy::codec::frame;
use syzygy::connection::Connection;
use syzygy::da::xflash::XFlash;
use syzygy::da::{DaEntry, ShutdownMode};
use syzygy::error::Error;
use syzygy::event::EventSink;

const SYNC: u32 = 0x434E5953;

fn empty_entry() -> DaEntry {
    DaEntry {
        magic: 0xDADA,
        hw_code: 0x6768,
        hw_sub_code: 0xCA00,
        hw_version: 0,
        sw_version: 0,
        page_size: 0,
        regions: Vec::new(),
    }
}

fn xflash_with(responder: common::Responder) -> (XFlash, Arc<Mutex<MockState>>) {
    let (port, state) = MockPort::with_responder(responder);
    let transport = Transport::new(Box::new(port), syzygy::CancelToken::new());
    let conn = Connection::new(transport, EventSink::disabled());
    (XFlash::new(conn, empty_entry(), None), state)
}

/// Responds to every received frame with a canned status frame.
fn status_responder(status_payloads: Vec<Vec<u8>>) -> common::Responder {
    let mut queue = status_payloads.into_iter();
    let mut buffered: Vec<u8> = Vec::new();
    Box::new(move |data, rx| {
        buffered.extend_from_slice(data);
        // Consume any complete frames; answer one status per frame.
        while buffered.len() >= 12 {
            let len =
                u32::from_le_bytes(buffered[8..12].try_into().unwrap()) as usize;
            if buffered.len() < 12 + len {
                break;
            }
            buffered.drain(..12 + len);
            if let Some(payload) = queue.next() {
                rx.extend(frame::frame(&payload));
            }
        }
    })
}

#[tokio::test(start_paused = true)]
async fn two_byte_status_is_accepted() {
    init_logs();
    let (mut xflash, _state) = xflash_with(status_responder(vec![0u16.to_le_bytes().to_vec()]));
    xflash.reboot().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn magic_payload_normalizes_to_ok() {
    init_logs();
    let (mut xflash, _state) =
        xflash_with(status_responder(vec![frame::MAGIC.to_le_bytes().to_vec()]));
    xflash.reboot().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn four_byte_error_status_is_preserved_bit_exactly() {
    init_logs();
    let (mut xflash, _state) =
        xflash_with(status_responder(vec![0xC0010004u32.to_le_bytes().to_vec()]));

    match xflash.reboot().await {
        Err(Error::Protocol { code }) => assert_eq!(code, 0xC0010004),
        other => panic!("expected protocol error, got {:?}", other.err()),
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_parameter_block_is_twelve_bytes() {
    init_logs();
    let ok = 0u16.to_le_bytes().to_vec();
    let (mut xflash, state) = xflash_with(status_responder(vec![ok.clone(), ok]));

    xflash.shutdown(ShutdownMode::BootToFastboot).await.unwrap();

    let frames = split_frames(&state.lock().unwrap().tx);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], 0x010007u32.to_le_bytes().to_vec());
    let mut param = Vec::new();
    param.extend_from_slice(&0u32.to_le_bytes());
    param.extend_from_slice(&0u32.to_le_bytes());
    param.extend_from_slice(&2u32.to_le_bytes());
    assert_eq!(frames[1], param);
}

#[tokio::test(start_paused = true)]
async fn boot_to_chunks_payload_and_waits_for_sync() {
    init_logs();
    // Statuses: command OK, parameter OK; then nothing until the device has
    // the whole image, at which point it raises SYNC.
    let mut buffered: Vec<u8> = Vec::new();
    let mut frames_seen = 0usize;
    let mut body_expected = 0usize;
    let mut body_received = 0usize;
    let responder: common::Responder = Box::new(move |data, rx| {
        buffered.extend_from_slice(data);
        while buffered.len() >= 12 {
            let len = u32::from_le_bytes(buffered[8..12].try_into().unwrap()) as usize;
            if buffered.len() < 12 + len {
                break;
            }
            let payload: Vec<u8> = buffered[12..12 + len].to_vec();
            buffered.drain(..12 + len);
            frames_seen += 1;

            match frames_seen {
                1 => rx.extend(frame::frame(&0u16.to_le_bytes())),
                2 => {
                    body_expected =
                        u64::from_le_bytes(payload[8..16].try_into().unwrap()) as usize;
                    rx.extend(frame::frame(&0u16.to_le_bytes()));
                }
                _ => {
                    body_received += payload.len();
                    if body_received >= body_expected {
                        rx.extend(frame::frame(&SYNC.to_le_bytes()));
                    }
                }
            }
        }
    });
    let (mut xflash, state) = xflash_with(responder);

    let image = vec![0x42u8; 0x2800]; // 10 KiB
    xflash.boot_to(0x40000000, &image).await.unwrap();

    let frames = split_frames(&state.lock().unwrap().tx);
    // Command, parameters, then 4 KiB chunks: 4 + 4 + 2.
    assert_eq!(frames.len(), 5);
    assert_eq!(frames[2].len(), 0x1000);
    assert_eq!(frames[3].len(), 0x1000);
    assert_eq!(frames[4].len(), 0x800);
}
