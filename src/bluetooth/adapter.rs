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

//! Platform abstraction for the Bluetooth radio.
//!
//! The controller only talks to the radio through [`ChatAdapter`], so the
//! BlueZ backend and in-memory test doubles are interchangeable.

use std::fmt;
use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use super::protocol::{PeerDevice, ServiceRecord};

/// Capabilities the platform must grant before radio operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Scanning for nearby devices.
    Scan,
    /// Opening RFCOMM sockets and enumerating bonded devices.
    Connect,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Scan => f.write_str("scan"),
            Permission::Connect => f.write_str("connect"),
        }
    }
}

/// Connection-state change reported by the platform for a remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondingEvent {
    pub address: String,
    pub connected: bool,
}

/// An open RFCOMM byte stream.
pub trait RfcommStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Whether the socket completed its connection handshake.
    fn is_connected(&self) -> bool {
        true
    }
}

/// In-memory pipes are connected for their whole lifetime.
impl RfcommStream for tokio::io::DuplexStream {}

/// A listening RFCOMM socket bound to a service record.
#[async_trait]
pub trait RfcommListener: Send + 'static {
    type Stream: RfcommStream;

    /// Wait for the next incoming connection.
    async fn accept(&mut self) -> io::Result<Self::Stream>;
}

/// The local Bluetooth radio.
#[async_trait]
pub trait ChatAdapter: Send + Sync + 'static {
    type Stream: RfcommStream;
    type Listener: RfcommListener<Stream = Self::Stream>;

    /// Check whether a capability is currently granted.
    async fn has_permission(&self, permission: Permission) -> bool;

    /// Name this device advertises to peers.
    async fn local_name(&self) -> Option<String>;

    /// Snapshot of bonded devices.
    async fn paired_devices(&self) -> io::Result<Vec<PeerDevice>>;

    /// Start scanning, reporting each found device on `found`.
    async fn start_discovery(&self, found: mpsc::Sender<PeerDevice>) -> io::Result<()>;

    /// Stop an in-progress scan. No-op when idle.
    async fn cancel_discovery(&self);

    /// Subscribe to connection-state changes of remote devices.
    async fn bonding_events(&self) -> io::Result<mpsc::Receiver<BondingEvent>>;

    /// Register the service record and open a listening socket for it.
    async fn listen(&self, service: &ServiceRecord) -> io::Result<Self::Listener>;

    /// Open a client socket to `address` for the service and connect it.
    async fn connect(&self, address: &str, service: &ServiceRecord) -> io::Result<Self::Stream>;
}
