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

//! Chat wire format and shared data types.
//!
//! A frame is `<sender>#<text>` as UTF-8 with no prefix or terminator. The
//! receiver treats every successful read of up to [`READ_BUFFER_SIZE`] bytes
//! as exactly one frame.

use std::fmt;
use std::hash::{Hash, Hasher};

use uuid::Uuid;

/// RFCOMM service UUID shared by the server and client roles.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x27b7d1da_08c7_4505_a6d1_2459987e5e2d);

/// Human-readable name of the registered service record.
pub const SERVICE_NAME: &str = "chat_service";

/// Size of a single read, and therefore the largest frame a peer can decode.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Sender name used when the local adapter does not report one.
pub const FALLBACK_SENDER_NAME: &str = "Unknown name";

/// Separator between sender name and message text.
pub const SEPARATOR: char = '#';

/// Service record a server registers and a client connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub uuid: Uuid,
    pub name: String,
}

impl Default for ServiceRecord {
    fn default() -> Self {
        Self {
            uuid: SERVICE_UUID,
            name: SERVICE_NAME.to_string(),
        }
    }
}

/// Snapshot of a remote Bluetooth device.
///
/// Identity is the address alone, so two records for the same device with
/// different names compare equal.
#[derive(Debug, Clone, Eq)]
pub struct PeerDevice {
    pub name: Option<String>,
    pub address: String,
}

impl PeerDevice {
    pub fn new(name: Option<impl Into<String>>, address: impl Into<String>) -> Self {
        Self {
            name: name.map(Into::into),
            address: address.into(),
        }
    }

    /// Name for listings, falling back to the address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl PartialEq for PeerDevice {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Hash for PeerDevice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for PeerDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.address)
    }
}

/// A chat message, either typed locally or decoded from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub text: String,
    pub sender_name: String,
    pub is_local: bool,
}

impl ChatMessage {
    /// Create a message authored on this device.
    pub fn local(text: impl Into<String>, sender_name: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender_name: sender_name.into(),
            is_local: true,
        }
    }

    /// Encode as a wire frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}{}{}", self.sender_name, SEPARATOR, self.text).into_bytes()
    }

    /// Decode a frame received from the peer.
    ///
    /// The sender is everything before the last `#`. The text starts after
    /// the first `#`, which means a sender containing `#` does not survive
    /// decoding. Invalid UTF-8 is replaced rather than rejected.
    pub fn from_bytes(frame: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(frame);
        Self::decode(&raw, false)
    }

    fn decode(raw: &str, is_local: bool) -> Self {
        let sender_name = match raw.rfind(SEPARATOR) {
            Some(idx) => &raw[..idx],
            None => raw,
        };
        let text = match raw.find(SEPARATOR) {
            Some(idx) => &raw[idx + SEPARATOR.len_utf8()..],
            None => raw,
        };

        Self {
            text: text.to_string(),
            sender_name: sender_name.to_string(),
            is_local,
        }
    }
}
