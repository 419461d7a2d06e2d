/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod codec;
pub mod connection;
pub mod core;
pub mod da;
pub mod device;
pub mod error;
pub mod event;
pub mod utilities;

pub use connection::port::{CancelToken, ConnectionType, Port, Timeouts};
pub use connection::transport::Transport;
pub use device::{Device, DeviceBuilder, SessionState};
pub use event::{Event, EventSink};
