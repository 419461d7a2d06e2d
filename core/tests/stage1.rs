/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
mod common;

use std::sync::{Arc, Mutex};

use common::{MockPort, MockState, init_logs};
use syzygy::Transport;
use syzygy::connection::Connection;
use syzygy::error::{Error, SecurityError};
use syzygy::event::EventSink;

fn connection_with(responder: common::Responder) -> (Connection, Arc<Mutex<MockState>>) {
    let (port, state) = MockPort::with_responder(responder);
    let transport = Transport::new(Box::new(port), syzygy::CancelToken::new());
    (Connection::new(transport, EventSink::disabled()), state)
}

/// Device side of SEND_DA: echo the command and parameters, accept the
/// payload, then report the additive XOR-16 checksum it computed.
fn send_da_responder(first_status: u16) -> common::Responder {
    let mut params_echoed = 0usize;
    let mut payload_len = 0usize;
    let mut received = 0usize;
    let mut checksum = 0u16;
    let mut word_hi: Option<u8> = None;
    let mut status_sent = false;

    Box::new(move |data, rx| {
        // Command byte and the three 4-byte parameters are echoed.
        if params_echoed < 13 {
            for &b in data {
                rx.push_back(b);
                params_echoed += 1;
                if (6..=9).contains(&params_echoed) {
                    payload_len = (payload_len << 8) | b as usize;
                }
                if params_echoed == 13 {
                    rx.extend(first_status.to_be_bytes());
                }
            }
            return;
        }

        // Payload phase: fold incoming bytes into the checksum.
        for &b in data {
            received += 1;
            match word_hi.take() {
                None => word_hi = Some(b),
                Some(hi) => checksum ^= u16::from_be_bytes([hi, b]),
            }
        }
        if received >= payload_len && !status_sent {
            if let Some(hi) = word_hi.take() {
                checksum ^= u16::from_be_bytes([hi, 0]);
            }
            rx.extend(checksum.to_be_bytes());
            rx.extend(0u16.to_be_bytes());
            status_sent = true;
        }
    })
}

#[tokio::test(start_paused = true)]
async fn da_upload_sends_even_payload_and_checksum_matches() {
    init_logs();
    let (mut conn, state) = connection_with(send_da_responder(0x0000));

    conn.send_da(0x200000, &[0x01, 0x02, 0x03, 0x04], 0).await.unwrap();

    let state = state.lock().unwrap();
    // Command byte, 3 parameter words, payload, terminating empty write.
    assert_eq!(state.writes[0], vec![0xD7]);
    assert_eq!(state.writes[1], 0x200000u32.to_be_bytes().to_vec());
    assert_eq!(state.writes[2], 4u32.to_be_bytes().to_vec(), "payload stays 4 bytes");
    assert_eq!(state.writes[3], 0u32.to_be_bytes().to_vec());
    assert_eq!(state.writes[4], vec![0x01, 0x02, 0x03, 0x04]);
    assert!(state.writes[5].is_empty(), "upload ends with a zero-byte write");
}

#[tokio::test(start_paused = true)]
async fn da_upload_chunks_at_64_bytes() {
    init_logs();
    let (mut conn, state) = connection_with(send_da_responder(0x0000));

    let payload = vec![0x11u8; 200];
    conn.send_da(0x200000, &payload, 0).await.unwrap();

    let state = state.lock().unwrap();
    let chunks: Vec<usize> = state.writes[4..].iter().map(|w| w.len()).collect();
    assert_eq!(chunks, vec![64, 64, 64, 8, 0]);
}

#[tokio::test(start_paused = true)]
async fn sla_demand_without_keys_fails_authentication() {
    init_logs();
    // SEND_DA answers SLA_REQUIRED; the SLA exchange then presents a
    // challenge nobody can sign.
    let mut da_params = 0usize;
    let mut in_sla = false;
    let responder: common::Responder = Box::new(move |data, rx| {
        for &b in data {
            if !in_sla && b == 0xE3 {
                in_sla = true;
                rx.push_back(b);
                rx.extend(0u16.to_be_bytes()); // not SLA_PASS
                rx.extend(16u32.to_be_bytes());
                rx.extend([0x5A; 16]); // challenge
                continue;
            }
            if !in_sla {
                rx.push_back(b);
                da_params += 1;
                if da_params == 13 {
                    rx.extend(0x1D0Du16.to_be_bytes());
                }
            }
        }
    });
    let (mut conn, _state) = connection_with(responder);

    let err = conn.send_da(0x200000, &[0u8; 16], 0).await.unwrap_err();
    assert!(matches!(err, Error::Security(SecurityError::SlaFailed)));
}

#[tokio::test(start_paused = true)]
async fn secure_status_maps_to_sbc_rejection() {
    init_logs();
    let mut params = 0usize;
    let responder: common::Responder = Box::new(move |data, rx| {
        for &b in data {
            rx.push_back(b);
            params += 1;
            if params == 13 {
                rx.extend(0x1D08u16.to_be_bytes());
            }
        }
    });
    let (mut conn, _state) = connection_with(responder);

    let err = conn.send_da(0x200000, &[0u8; 16], 0).await.unwrap_err();
    assert!(matches!(err, Error::Security(SecurityError::SbcBlocked)));
}

#[tokio::test(start_paused = true)]
async fn denied_memory_read_maps_to_mem_auth() {
    init_logs();
    let mut params = 0usize;
    let responder: common::Responder = Box::new(move |data, rx| {
        for &b in data {
            rx.push_back(b);
            params += 1;
            if params == 9 {
                rx.extend(0x0001u16.to_be_bytes());
            }
        }
    });
    let (mut conn, _state) = connection_with(responder);

    let err = conn.read32(0x1000A000, 4).await.unwrap_err();
    assert!(matches!(err, Error::Security(SecurityError::MemAuthBlocked)));
}

#[tokio::test(start_paused = true)]
async fn jump_da_requires_address_echo() {
    init_logs();
    // The device echoes a corrupted address word back.
    let responder: common::Responder = Box::new(move |data, rx| {
        if data == [0xD5].as_slice() {
            rx.push_back(0xD5);
        } else {
            for &b in data {
                rx.push_back(b ^ 0x01);
            }
        }
    });
    let (mut conn, _state) = connection_with(responder);

    assert!(conn.jump_da(0x200000).await.is_err());
}
