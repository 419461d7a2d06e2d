/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
mod common;

use common::{MockPort, init_logs};
use syzygy::Transport;
use syzygy::connection::Connection;
use syzygy::error::Error;
use syzygy::event::EventSink;

fn connection_with(responder: common::Responder) -> (Connection, std::sync::Arc<std::sync::Mutex<common::MockState>>) {
    let (port, state) = MockPort::with_responder(responder);
    let transport = Transport::new(Box::new(port), syzygy::CancelToken::new());
    (Connection::new(transport, EventSink::disabled()), state)
}

/// A device that answers every handshake byte with its one's complement.
fn complement_responder() -> common::Responder {
    Box::new(|data, rx| {
        for &b in data {
            rx.push_back(!b);
        }
    })
}

#[tokio::test(start_paused = true)]
async fn handshake_succeeds_in_one_pass() {
    init_logs();
    let (mut conn, state) = connection_with(complement_responder());

    conn.handshake().await.unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.tx, vec![0xA0, 0x0A, 0x50, 0x05]);
}

#[tokio::test(start_paused = true)]
async fn handshake_recovers_from_leading_noise() {
    init_logs();
    // One garbage byte before the device starts answering properly.
    let mut first = true;
    let responder: common::Responder = Box::new(move |data, rx| {
        if first {
            rx.push_back(0xFF);
            first = false;
            return;
        }
        for &b in data {
            rx.push_back(!b);
        }
    });
    let (mut conn, state) = connection_with(responder);

    conn.handshake().await.unwrap();

    // First attempt died on the noise byte, second ran the full sequence.
    let state = state.lock().unwrap();
    assert_eq!(state.tx, vec![0xA0, 0xA0, 0x0A, 0x50, 0x05]);
    assert!(state.drains >= 1);
}

#[tokio::test(start_paused = true)]
async fn handshake_restarts_on_wrong_byte() {
    init_logs();
    // Correct complements except a single wrong answer at index 2.
    let mut answered = 0u32;
    let responder: common::Responder = Box::new(move |data, rx| {
        for &b in data {
            answered += 1;
            if answered == 3 {
                rx.push_back(0x00);
            } else {
                rx.push_back(!b);
            }
        }
    });
    let (mut conn, state) = connection_with(responder);

    conn.handshake().await.unwrap();

    // 3 bytes on the failed pass, then the full 4-byte pass.
    let tx = state.lock().unwrap().tx.clone();
    assert_eq!(&tx[tx.len() - 4..], &[0xA0, 0x0A, 0x50, 0x05]);
    assert_eq!(tx.len(), 7);
}

#[tokio::test(start_paused = true)]
async fn handshake_gives_up_after_retry_bound() {
    init_logs();
    let (port, _state) = MockPort::new();
    let transport = Transport::new(Box::new(port), syzygy::CancelToken::new());
    let mut conn = Connection::new(transport, EventSink::disabled());

    match conn.handshake().await {
        Err(Error::HandshakeFailed { attempts }) => assert_eq!(attempts, 100),
        other => panic!("expected HandshakeFailed, got {:?}", other.err()),
    }
}

#[tokio::test(start_paused = true)]
async fn brom_is_detected_by_echoed_bl_ver() {
    init_logs();
    // A BROM echoes the GET_BL_VER command byte instead of a version.
    let responder: common::Responder = Box::new(|data, rx| {
        if data == [0xFE].as_slice() {
            rx.push_back(0xFE);
        }
    });
    let (mut conn, _state) = connection_with(responder);

    let (version, is_brom) = conn.get_bl_version().await.unwrap();
    assert_eq!(version, 0xFE);
    assert!(is_brom);
}

#[tokio::test(start_paused = true)]
async fn preloader_reports_version_byte() {
    init_logs();
    let responder: common::Responder = Box::new(|data, rx| {
        if data == [0xFE].as_slice() {
            rx.push_back(0x01);
        }
    });
    let (mut conn, _state) = connection_with(responder);

    let (version, is_brom) = conn.get_bl_version().await.unwrap();
    assert_eq!(version, 0x01);
    assert!(!is_brom);
}

/// Simulates the full identity probe of a BROM-mode MT6768.
fn brom_identity_responder() -> common::Responder {
    Box::new(move |data, rx| {
        for &b in data {
            match b {
                0xFD => {
                    rx.push_back(b);
                    rx.extend([0x07, 0x07]); // hw_code 0x0707
                    rx.extend([0x00, 0x00]); // status
                }
                0xFE => rx.push_back(0xFE), // BROM echo
                0xFC => {
                    rx.push_back(b);
                    rx.extend([0x80, 0x00]); // hw_sub_code
                    rx.extend([0xCA, 0x00]); // hw_version
                    rx.extend([0x00, 0x00]); // sw_version
                    rx.extend([0x00, 0x00]); // status
                }
                0xD8 => {
                    rx.push_back(b);
                    rx.extend([0x00, 0x00, 0x00, 0x05]); // sbc | daa
                    rx.extend([0x00, 0x00]); // status
                }
                0xFB => {
                    rx.push_back(b);
                    rx.extend([0x00, 0x00, 0x00, 0x01]); // cap0
                    rx.extend([0x00, 0x00, 0x00, 0x02]); // cap1 -> evolution
                }
                0xE1 => {
                    rx.push_back(b);
                    rx.extend(4u32.to_be_bytes());
                    rx.extend([0xAA, 0xBB, 0xCC, 0xDD]);
                    rx.extend([0x00, 0x00]);
                }
                0xE7 => {
                    rx.push_back(b);
                    rx.extend(8u32.to_be_bytes());
                    rx.extend([1, 2, 3, 4, 5, 6, 7, 8]);
                    rx.extend([0x00, 0x00]);
                }
                other => panic!("unexpected command byte 0x{:02X}", other),
            }
        }
    })
}

#[tokio::test(start_paused = true)]
async fn identity_probe_collects_all_fields() {
    init_logs();
    let (mut conn, _state) = connection_with(brom_identity_responder());

    let identity = conn.probe_identity().await.unwrap();
    assert_eq!(identity.hw_code, 0x0707);
    assert_eq!(identity.hw_sub_code, 0x8000);
    assert_eq!(identity.hw_version, 0xCA00);
    assert_eq!(identity.sw_version, 0x0000);
    assert!(identity.is_brom);
    assert_eq!(identity.chip_evolution, 0x0002);
    assert!(identity.target_config.sbc());
    assert!(!identity.target_config.sla());
    assert!(identity.target_config.daa());
    assert_eq!(identity.me_id, vec![0xAA, 0xBB, 0xCC, 0xDD]);
    assert_eq!(identity.soc_id, vec![1, 2, 3, 4, 5, 6, 7, 8]);
}
