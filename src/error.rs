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

//! Error types for the chat core.

use crate::bluetooth::Permission;

/// Errors produced by the connection and transfer layers.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The platform has not granted a required capability.
    #[error("missing {0} permission")]
    PermissionDenied(Permission),

    /// Reading from the session socket failed.
    #[error("Reading incoming data failed")]
    TransferFailed(#[source] std::io::Error),

    /// Writing a frame to the session socket failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Opening, accepting or connecting a socket failed.
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChatError>;
