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

//! Message transfer over an established RFCOMM stream.

use std::io;

use futures::stream::{self, Stream};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::adapter::RfcommStream;
use super::protocol::{ChatMessage, READ_BUFFER_SIZE};
use crate::error::{ChatError, Result};

/// Transfer channel wrapping one session stream.
pub struct TransferChannel<S> {
    stream: S,
    read_buffer_size: usize,
}

impl<S: RfcommStream> TransferChannel<S> {
    /// Create a channel over a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buffer_size: READ_BUFFER_SIZE,
        }
    }

    /// Override the per-read frame limit.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Split into the receive sequence and the send handle.
    ///
    /// A stream that never completed its handshake yields an empty sequence.
    pub fn split(
        self,
    ) -> (
        impl Stream<Item = Result<ChatMessage>> + Send + Unpin,
        MessageSender<WriteHalf<S>>,
    ) {
        let connected = self.stream.is_connected();
        let (reader, writer) = tokio::io::split(self.stream);
        let reader = connected.then_some(reader);
        (
            receive(reader, self.read_buffer_size),
            MessageSender::new(writer),
        )
    }
}

struct ReceiveState<R> {
    reader: Option<R>,
    buffer: Vec<u8>,
}

/// Lazily decode frames from `reader`.
///
/// Each successful read is one frame. The sequence ends after a clean EOF or
/// after yielding a single [`ChatError::TransferFailed`].
fn receive<R>(
    reader: Option<ReadHalf<R>>,
    buffer_size: usize,
) -> impl Stream<Item = Result<ChatMessage>> + Send + Unpin
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let state = ReceiveState {
        reader,
        buffer: vec![0u8; buffer_size],
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        let Some(mut reader) = state.reader.take() else {
            return None;
        };
        match reader.read(&mut state.buffer).await {
            Ok(0) => {
                info!("Connection closed by remote");
                None
            }
            Ok(n) => {
                debug!("Received frame: {} bytes", n);
                let message = ChatMessage::from_bytes(&state.buffer[..n]);
                state.reader = Some(reader);
                Some((Ok(message), state))
            }
            Err(e) => {
                error!("Read error: {}", e);
                Some((Err(ChatError::TransferFailed(e)), state))
            }
        }
    }))
}

/// Write side of a transfer channel.
pub struct MessageSender<W> {
    writer: W,
    closed: Option<watch::Receiver<bool>>,
}

impl<W: AsyncWrite + Send + Unpin> MessageSender<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            closed: None,
        }
    }

    /// Abort in-flight writes once `closed` turns true or its sender is dropped.
    pub fn with_close_signal(mut self, closed: watch::Receiver<bool>) -> Self {
        self.closed = Some(closed);
        self
    }

    /// Write one encoded frame.
    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let Self { writer, closed } = self;
        let write = async {
            writer.write_all(frame).await?;
            writer.flush().await
        };

        let result: io::Result<()> = match closed {
            Some(closed) => tokio::select! {
                result = write => result,
                _ = closed.wait_for(|closed| *closed) => {
                    Err(io::Error::new(io::ErrorKind::NotConnected, "session closed"))
                }
            },
            None => write.await,
        };

        match result {
            Ok(()) => {
                debug!("Sent frame: {} bytes", frame.len());
                Ok(())
            }
            Err(e) => {
                error!("Failed to send frame: {}", e);
                Err(ChatError::SendFailed(e))
            }
        }
    }

    /// Shut down the write direction.
    pub async fn close(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("Error shutting down writer: {}", e);
        }
    }
}
