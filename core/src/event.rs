/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::core::devinfo::DeviceIdentity;
use crate::core::storage::Partition;
use crate::device::SessionState;
use crate::error::Error;

/// Severity of a [`Event::Log`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured progress and status events emitted by the engine.
///
/// The core only ever pushes into the channel; the host drains it. No
/// back-reference to the subscriber is stored anywhere in the engine.
#[derive(Debug, Clone)]
pub enum Event {
    Log { level: LogLevel, message: String },
    Progress { done: u64, total: u64, label: String },
    StateChanged { from: SessionState, to: SessionState },
    DeviceInfo(DeviceIdentity),
    PartitionsDiscovered(Vec<Partition>),
    Error { kind: &'static str, message: String },
}

/// Forward-only event channel handle.
///
/// A sink without a subscriber swallows everything, so the engine can emit
/// unconditionally.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<Event>>,
}

impl EventSink {
    /// Creates a connected sink and the receiving end for the host.
    pub fn channel() -> (Self, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub fn disabled() -> Self {
        EventSink { tx: None }
    }

    pub fn emit(&self, event: Event) {
        if let Some(tx) = &self.tx {
            // A closed receiver just means the host stopped listening.
            let _ = tx.send(event);
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(Event::Log { level, message: message.into() });
    }

    pub fn progress(&self, done: u64, total: u64, label: &str) {
        self.emit(Event::Progress { done, total, label: label.to_string() });
    }

    pub fn state_changed(&self, from: SessionState, to: SessionState) {
        self.emit(Event::StateChanged { from, to });
    }

    pub fn error(&self, err: &Error) {
        self.emit(Event::Error { kind: err.kind(), message: err.to_string() });
    }
}
