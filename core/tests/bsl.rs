/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
mod common;

use common::{MockPort, init_logs};
use syzygy::Transport;
use syzygy::codec::hdlc;
use syzygy::da::bsl::Bsl;
use syzygy::event::EventSink;

const OK_FRAME_TYPE: u16 = 0x80;
const DATA_FRAME_TYPE: u16 = 0x82;

fn response_frame(frame_type: u16, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(6 + data.len());
    payload.extend_from_slice(&frame_type.to_le_bytes());
    payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
    payload.extend_from_slice(data);
    hdlc::frame(&payload)
}

/// Unwraps one host frame; each `Transport::write` carries a whole frame.
fn parse_request(raw: &[u8]) -> (u16, Vec<u8>) {
    let payload = hdlc::unframe(raw).expect("host sent a malformed frame");
    let cmd = u16::from_le_bytes([payload[0], payload[1]]);
    let len = u32::from_le_bytes(payload[2..6].try_into().unwrap()) as usize;
    (cmd, payload[6..6 + len].to_vec())
}

#[tokio::test(start_paused = true)]
async fn fdl_upload_uses_expected_frame_sequence() {
    init_logs();
    let responder: common::Responder = Box::new(|data, rx| {
        let (_cmd, _payload) = parse_request(data);
        rx.extend(response_frame(OK_FRAME_TYPE, &[]));
    });
    let (port, state) = MockPort::with_responder(responder);
    let transport = Transport::new(Box::new(port), syzygy::CancelToken::new());
    let mut bsl = Bsl::new(transport, EventSink::disabled());

    let fdl = vec![0x7Eu8; 10 * 1024]; // flag-heavy on purpose
    bsl.upload_fdl(0x5500, &fdl).await.unwrap();

    let state = state.lock().unwrap();
    let requests: Vec<(u16, Vec<u8>)> =
        state.writes.iter().map(|w| parse_request(w)).collect();

    let cmds: Vec<u16> = requests.iter().map(|(cmd, _)| *cmd).collect();
    // DATA_START, three DATA_MIDST (4 + 4 + 2 KiB), DATA_END, DATA_EXEC.
    assert_eq!(cmds, vec![0x01, 0x02, 0x02, 0x02, 0x03, 0x04]);
    assert_eq!(requests[1].1.len(), 0x1000);
    assert_eq!(requests[2].1.len(), 0x1000);
    assert_eq!(requests[3].1.len(), 0x800);

    // DATA_START carries address and total size, little-endian.
    let start = &requests[0].1;
    assert_eq!(u32::from_le_bytes(start[0..4].try_into().unwrap()), 0x5500);
    assert_eq!(u32::from_le_bytes(start[4..8].try_into().unwrap()), 10 * 1024);
}

#[tokio::test(start_paused = true)]
async fn partition_read_requests_64k_chunks() {
    init_logs();
    let responder: common::Responder = Box::new(|data, rx| {
        let (cmd, payload) = parse_request(data);
        assert_eq!(cmd, 0x0B);
        // name\0 | offset i64 | size u64
        let tail = payload.len() - 16;
        let size = u64::from_le_bytes(payload[tail + 8..].try_into().unwrap()) as usize;
        rx.extend(response_frame(DATA_FRAME_TYPE, &vec![0xAB; size]));
    });
    let (port, state) = MockPort::with_responder(responder);
    let transport = Transport::new(Box::new(port), syzygy::CancelToken::new());
    let mut bsl = Bsl::new(transport, EventSink::disabled());

    let data = bsl.read_partition("nvitem", 0x18000).await.unwrap();
    assert_eq!(data.len(), 0x18000);
    assert!(data.iter().all(|&b| b == 0xAB));

    // 96 KiB read in 64 KiB + 32 KiB requests.
    assert_eq!(state.lock().unwrap().writes.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn baud_change_retunes_after_ok() {
    init_logs();
    let responder: common::Responder = Box::new(|data, rx| {
        let (cmd, payload) = parse_request(data);
        assert_eq!(cmd, 0x12);
        assert_eq!(u32::from_le_bytes(payload[0..4].try_into().unwrap()), 921_600);
        rx.extend(response_frame(OK_FRAME_TYPE, &[]));
    });
    let (port, _state) = MockPort::with_responder(responder);
    let transport = Transport::new(Box::new(port), syzygy::CancelToken::new());
    let mut bsl = Bsl::new(transport, EventSink::disabled());

    bsl.change_baudrate(921_600).await.unwrap();
    assert_eq!(bsl.transport.baudrate(), 921_600);
}

#[tokio::test(start_paused = true)]
async fn error_response_surfaces_as_protocol_error() {
    init_logs();
    let responder: common::Responder = Box::new(|_data, rx| {
        rx.extend(response_frame(0x81, &[]));
    });
    let (port, _state) = MockPort::with_responder(responder);
    let transport = Transport::new(Box::new(port), syzygy::CancelToken::new());
    let mut bsl = Bsl::new(transport, EventSink::disabled());

    assert!(bsl.connect().await.is_err());
}
