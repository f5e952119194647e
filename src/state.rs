// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Application state management.

use tokio::sync::watch;

use crate::bluetooth::{ChatMessage, ConnectionEvent, DeviceLists, PeerDevice};

/// Error shown when a connection-state change names a device that is not paired.
pub const NON_PAIRED_ERROR: &str = "Can't connect to a non-paired device.";

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Error => "Error",
        }
    }
}

/// Inputs that change the observable state.
#[derive(Debug, Clone)]
pub enum StateUpdate {
    /// A server or client attempt has started.
    Connecting,
    /// Lifecycle or transfer event from the controller.
    Connection(ConnectionEvent),
    /// The connection job failed outright; the session was closed.
    Fault(String),
    /// Platform connection-state change for a device.
    LinkState { connected: bool, paired: bool },
    /// Free-form error for display.
    Error(String),
    /// Message typed on this device.
    LocalMessage(ChatMessage),
    /// New directory snapshot.
    Devices(DeviceLists),
    /// The user ended the session.
    Disconnect,
    /// The session's event stream closed.
    Ended,
}

/// Snapshot of everything the UI renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub last_error: Option<String>,
    pub paired_devices: Vec<PeerDevice>,
    pub scanned_devices: Vec<PeerDevice>,
    /// Append-only log in arrival order.
    pub messages: Vec<ChatMessage>,
}

impl ChatState {
    pub fn status(&self) -> ConnectionStatus {
        if self.is_connected {
            ConnectionStatus::Connected
        } else if self.is_connecting {
            ConnectionStatus::Connecting
        } else if self.last_error.is_some() {
            ConnectionStatus::Error
        } else {
            ConnectionStatus::Disconnected
        }
    }

    /// Fold one update into the state.
    pub fn apply(&mut self, update: StateUpdate) {
        match update {
            StateUpdate::Connecting => {
                self.is_connecting = true;
            }
            StateUpdate::Connection(ConnectionEvent::Established) => {
                self.is_connected = true;
                self.is_connecting = false;
                self.last_error = None;
            }
            StateUpdate::Connection(ConnectionEvent::MessageReceived(message)) => {
                self.messages.push(message);
            }
            StateUpdate::Connection(ConnectionEvent::Failed(reason))
            | StateUpdate::Fault(reason) => {
                self.is_connected = false;
                self.is_connecting = false;
                self.last_error = Some(reason);
            }
            StateUpdate::Connection(ConnectionEvent::Disconnected)
            | StateUpdate::Disconnect
            | StateUpdate::Ended => {
                self.is_connected = false;
                self.is_connecting = false;
            }
            StateUpdate::LinkState { connected, paired } => {
                if paired {
                    self.is_connected = connected;
                } else {
                    self.last_error = Some(NON_PAIRED_ERROR.to_string());
                }
            }
            StateUpdate::Error(message) => {
                self.last_error = Some(message);
            }
            StateUpdate::LocalMessage(message) => {
                self.messages.push(message);
            }
            StateUpdate::Devices(lists) => {
                self.paired_devices = lists.paired;
                self.scanned_devices = lists.scanned;
            }
        }
    }
}

/// Publishes [`ChatState`] snapshots to observers.
///
/// Readers always see a whole snapshot, never a half-applied update.
#[derive(Debug)]
pub struct SessionProjector {
    state: watch::Sender<ChatState>,
}

impl Default for SessionProjector {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionProjector {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ChatState::default());
        Self { state }
    }

    pub fn apply(&self, update: StateUpdate) {
        self.state.send_modify(|state| state.apply(update));
    }

    pub fn snapshot(&self) -> ChatState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }
}
