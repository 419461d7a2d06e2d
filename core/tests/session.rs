/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
mod common;

use common::{MockPort, init_logs};
use syzygy::error::Error;
use syzygy::event::{Event, EventSink};
use syzygy::{Device, DeviceBuilder, SessionState};

/// A preloader-mode device that answers handshake and the identity probe.
fn preloader_responder() -> common::Responder {
    let mut handshaken = 0usize;
    Box::new(move |data, rx| {
        for &b in data {
            if handshaken < 4 {
                handshaken += 1;
                rx.push_back(!b);
                continue;
            }
            match b {
                0xFD => {
                    rx.push_back(b);
                    rx.extend([0x07, 0x66]);
                    rx.extend([0x00, 0x00]);
                }
                0xFE => rx.push_back(0x05), // preloader version
                0xFC => {
                    rx.push_back(b);
                    rx.extend([0x8A, 0x00, 0xCA, 0x00, 0x00, 0x00, 0x00, 0x00]);
                }
                0xD8 => {
                    rx.push_back(b);
                    rx.extend([0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
                }
                0xFB => {
                    rx.push_back(b);
                    rx.extend([0u8; 8]);
                }
                0xE1 | 0xE7 => {
                    rx.push_back(b);
                    rx.extend(0u32.to_be_bytes());
                    rx.extend([0x00, 0x00]);
                }
                other => panic!("unexpected command byte 0x{:02X}", other),
            }
        }
    })
}

fn device_with(responder: common::Responder) -> (Device, tokio::sync::mpsc::UnboundedReceiver<Event>) {
    let (port, _state) = MockPort::with_responder(responder);
    let (events, rx) = EventSink::channel();
    let device = DeviceBuilder::default()
        .with_port(Box::new(port))
        .with_events(events)
        .build()
        .unwrap();
    (device, rx)
}

#[tokio::test(start_paused = true)]
async fn session_walks_the_state_chain() {
    init_logs();
    let (mut device, mut rx) = device_with(preloader_responder());

    assert_eq!(device.state(), SessionState::Closed);
    device.open().await.unwrap();
    device.init().await.unwrap();
    assert_eq!(device.state(), SessionState::StageOneReady);

    let identity = device.dev_info.identity().await;
    assert_eq!(identity.hw_code, 0x0766);
    assert!(!identity.is_brom);

    device.close().await.unwrap();
    assert_eq!(device.state(), SessionState::Closed);

    let mut transitions = Vec::new();
    let mut saw_device_info = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            Event::StateChanged { to, .. } => transitions.push(to),
            Event::DeviceInfo(_) => saw_device_info = true,
            _ => {}
        }
    }
    assert!(saw_device_info);
    assert_eq!(
        transitions,
        vec![
            SessionState::Opened,
            SessionState::Handshook,
            SessionState::StageOneReady,
            SessionState::Closing,
            SessionState::Closed,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn operations_in_wrong_state_are_rejected() {
    init_logs();
    let (mut device, _rx) = device_with(preloader_responder());

    let err = device.read_partition("boot").await.unwrap_err();
    match err {
        Error::InvalidState { expected, actual } => {
            assert_eq!(expected, SessionState::Operational);
            assert_eq!(actual, SessionState::Closed);
        }
        other => panic!("unexpected error {:?}", other),
    }

    // init() without open() is a state violation too.
    let err = device.init().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_all_writes_and_fails_the_session() {
    init_logs();
    let (port, state) = MockPort::with_responder(preloader_responder());
    let device = DeviceBuilder::default().with_port(Box::new(port)).build();
    let mut device = device.unwrap();

    device.open().await.unwrap();
    device.cancel_token().cancel();

    let err = device.init().await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(device.state(), SessionState::Failed);
    assert!(state.lock().unwrap().tx.is_empty(), "no bytes may leave after cancellation");

    // A failed session still closes.
    device.close().await.unwrap();
}
