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

//! Bluetooth communication module.
//!
//! RFCOMM chat between two peers: device discovery, the server and client
//! roles, and message transfer over the established socket.

mod adapter;
mod bluez;
mod controller;
mod directory;
mod protocol;
#[cfg(test)]
pub(crate) mod testing;
mod transfer;

pub use adapter::{BondingEvent, ChatAdapter, Permission, RfcommListener, RfcommStream};
pub use bluez::{BluezAdapter, BluezListener, BluezStream};
pub use controller::{
    ChatController, ConnectionEvent, Outgoing, SessionPhase, CONNECTION_INTERRUPTED,
};
pub use directory::{DeviceDirectory, DeviceLists};
pub use protocol::{
    ChatMessage, PeerDevice, ServiceRecord, FALLBACK_SENDER_NAME, READ_BUFFER_SIZE, SERVICE_NAME,
    SERVICE_UUID,
};
pub use transfer::{MessageSender, TransferChannel};
