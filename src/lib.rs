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

//! Peer-to-peer chat over Bluetooth RFCOMM.
//!
//! Two devices discover each other, one waits for an incoming connection
//! while the other connects to its chat service, and both then exchange
//! `sender#text` frames over the socket.

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod events;
pub mod state;

pub use config::Config;
pub use error::{ChatError, Result};
pub use events::ChatService;
pub use state::{ChatState, ConnectionStatus};
