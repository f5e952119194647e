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

//! Connection lifecycle for a single chat peer.
//!
//! The controller runs either the server role (register the service record
//! and accept one inbound connection) or the client role (connect to a peer's
//! service record). Once a socket is live it supervises a transfer channel and
//! reports everything as [`ConnectionEvent`]s. Only one session exists at a
//! time; starting a role tears down whatever session was active.
//!
//! Accept and connect have no timeout of their own and rely on the platform
//! defaults. A pending accept, connect or read is cancelled by closing the
//! session, which wakes the task and drops every socket it owns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::WriteHalf;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::adapter::{ChatAdapter, Permission, RfcommListener};
use super::directory::DeviceDirectory;
use super::protocol::{
    ChatMessage, PeerDevice, ServiceRecord, FALLBACK_SENDER_NAME, READ_BUFFER_SIZE,
};
use super::transfer::{MessageSender, TransferChannel};
use crate::config::BluetoothConfig;
use crate::error::{ChatError, Result};

/// Error reported when a client connection attempt fails.
pub const CONNECTION_INTERRUPTED: &str = "Connection was interrupted";

/// Capacity of a session's event channel.
const EVENT_CHANNEL_SIZE: usize = 32;

/// Events emitted over the lifetime of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Socket connected; emitted once, before any message.
    Established,
    /// Message decoded from the peer.
    MessageReceived(ChatMessage),
    /// Connecting or reading failed; the session is gone.
    Failed(String),
    /// The peer closed the stream.
    Disconnected,
}

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Listening,
    Accepting,
    Connecting,
    SessionActive,
}

/// Result of sending a local message.
#[derive(Debug)]
pub struct Outgoing {
    pub message: ChatMessage,
    /// Whether the frame reached the socket.
    pub delivery: Result<()>,
}

type SharedSender<S> = Arc<tokio::sync::Mutex<MessageSender<WriteHalf<S>>>>;

struct ActiveSession<S> {
    id: u64,
    shutdown: Option<oneshot::Sender<()>>,
    /// Wakes sends blocked on a full socket.
    closed: watch::Sender<bool>,
    sender: Option<SharedSender<S>>,
}

struct Inner<S> {
    phase: SessionPhase,
    session: Option<ActiveSession<S>>,
}

impl<S> Inner<S> {
    fn is_current(&self, id: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == id)
    }
}

/// Orchestrates discovery, the server and client roles, and sending.
pub struct ChatController<A: ChatAdapter> {
    adapter: Arc<A>,
    directory: Arc<DeviceDirectory>,
    service: ServiceRecord,
    device_name: Option<String>,
    read_buffer_size: usize,
    inner: Arc<Mutex<Inner<A::Stream>>>,
    discovery: Mutex<Option<JoinHandle<()>>>,
    next_session_id: AtomicU64,
}

impl<A: ChatAdapter> ChatController<A> {
    /// Create a controller with the default service record.
    pub fn new(adapter: Arc<A>, directory: Arc<DeviceDirectory>) -> Self {
        Self {
            adapter,
            directory,
            service: ServiceRecord::default(),
            device_name: None,
            read_buffer_size: READ_BUFFER_SIZE,
            inner: Arc::new(Mutex::new(Inner {
                phase: SessionPhase::Idle,
                session: None,
            })),
            discovery: Mutex::new(None),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Apply service record, buffer size and name override from configuration.
    pub fn with_config(mut self, config: &BluetoothConfig) -> Self {
        self.service = config.service_record();
        self.device_name = config.device_name.clone();
        self.read_buffer_size = config.read_buffer_size;
        self
    }

    pub fn directory(&self) -> &Arc<DeviceDirectory> {
        &self.directory
    }

    pub fn service(&self) -> &ServiceRecord {
        &self.service
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.lock().phase
    }

    /// Whether a transfer channel is available for sending.
    pub fn is_session_active(&self) -> bool {
        self.inner
            .lock()
            .session
            .as_ref()
            .is_some_and(|s| s.sender.is_some())
    }

    /// Refresh the paired set from the adapter's bonded devices.
    pub async fn update_paired_devices(&self) {
        if !self.adapter.has_permission(Permission::Connect).await {
            return;
        }

        match self.adapter.paired_devices().await {
            Ok(devices) => {
                debug!("{} paired devices", devices.len());
                self.directory.set_paired(devices);
            }
            Err(e) => warn!("Failed to enumerate paired devices: {}", e),
        }
    }

    /// Start scanning; found devices land in the directory.
    pub async fn start_discovery(&self) {
        if !self.adapter.has_permission(Permission::Scan).await {
            debug!("Scan permission missing, not starting discovery");
            return;
        }

        self.update_paired_devices().await;

        let (found_tx, mut found_rx) = mpsc::channel::<PeerDevice>(EVENT_CHANNEL_SIZE);
        if let Err(e) = self.adapter.start_discovery(found_tx).await {
            error!("Failed to start discovery: {}", e);
            return;
        }
        info!("Discovery started");

        let directory = self.directory.clone();
        let task = tokio::spawn(async move {
            while let Some(device) = found_rx.recv().await {
                directory.record_discovered(device);
            }
        });

        if let Some(previous) = self.discovery.lock().replace(task) {
            previous.abort();
        }
    }

    /// Stop scanning.
    pub async fn stop_discovery(&self) {
        if !self.adapter.has_permission(Permission::Scan).await {
            return;
        }
        self.cancel_discovery().await;
    }

    async fn cancel_discovery(&self) {
        self.adapter.cancel_discovery().await;
        if let Some(task) = self.discovery.lock().take() {
            task.abort();
            info!("Discovery stopped");
        }
    }

    /// Register the service record and wait for one inbound connection.
    pub async fn start_server(&self) -> Result<mpsc::Receiver<ConnectionEvent>> {
        if !self.adapter.has_permission(Permission::Connect).await {
            return Err(ChatError::PermissionDenied(Permission::Connect));
        }

        self.close_connection();

        let listener = self.adapter.listen(&self.service).await?;
        info!(
            "Listening for '{}' (UUID: {})",
            self.service.name, self.service.uuid
        );

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = self.begin_session(SessionPhase::Listening, shutdown_tx, event_tx);

        tokio::spawn(task.serve(listener, shutdown_rx));
        Ok(event_rx)
    }

    /// Connect to a peer's service record.
    pub async fn connect_to_device(
        &self,
        device: &PeerDevice,
    ) -> Result<mpsc::Receiver<ConnectionEvent>> {
        if !self.adapter.has_permission(Permission::Connect).await {
            return Err(ChatError::PermissionDenied(Permission::Connect));
        }

        self.close_connection();
        // The radio cannot scan and connect reliably at the same time.
        self.cancel_discovery().await;

        info!("Connecting to {}", device);

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = self.begin_session(SessionPhase::Connecting, shutdown_tx, event_tx);

        tokio::spawn(task.connect(device.address.clone(), self.service.clone(), shutdown_rx));
        Ok(event_rx)
    }

    /// Send `text` to the peer.
    ///
    /// Returns `None` when no session is active or the connect permission is
    /// missing. Otherwise the message is returned along with the outcome of
    /// the write. Closing the session fails a write that is still pending.
    pub async fn try_send_message(&self, text: &str) -> Option<Outgoing> {
        self.try_send_message_with(text, |_| {}).await
    }

    /// Like [`try_send_message`](Self::try_send_message), calling
    /// `before_write` with the message once it is built and before any byte
    /// is written.
    pub async fn try_send_message_with<F>(&self, text: &str, before_write: F) -> Option<Outgoing>
    where
        F: FnOnce(&ChatMessage) + Send,
    {
        if !self.adapter.has_permission(Permission::Connect).await {
            return None;
        }

        let sender = {
            let inner = self.inner.lock();
            inner.session.as_ref().and_then(|s| s.sender.clone())
        }?;

        let sender_name = match &self.device_name {
            Some(name) => name.clone(),
            None => self
                .adapter
                .local_name()
                .await
                .unwrap_or_else(|| FALLBACK_SENDER_NAME.to_string()),
        };
        let message = ChatMessage::local(text, sender_name);
        before_write(&message);

        let delivery = sender.lock().await.send(&message.to_bytes()).await;
        if let Err(e) = &delivery {
            warn!("Message not delivered: {}", e);
        }

        Some(Outgoing { message, delivery })
    }

    /// Close the active session and its sockets. Safe to call repeatedly.
    pub fn close_connection(&self) {
        let session = {
            let mut inner = self.inner.lock();
            inner.phase = SessionPhase::Idle;
            inner.session.take()
        };

        match session {
            Some(mut session) => {
                if let Some(shutdown) = session.shutdown.take() {
                    let _ = shutdown.send(());
                }
                session.closed.send_replace(true);
                info!("Session {} closed", session.id);
            }
            None => debug!("No session to close"),
        }
    }

    /// Stop discovery and close the session. Call once at end of life.
    pub fn release(&self) {
        if let Some(task) = self.discovery.lock().take() {
            task.abort();
        }
        self.close_connection();
        info!("Controller released");
    }

    fn begin_session(
        &self,
        phase: SessionPhase,
        shutdown: oneshot::Sender<()>,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> SessionTask<A> {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (closed_tx, closed_rx) = watch::channel(false);
        {
            let mut inner = self.inner.lock();
            inner.phase = phase;
            inner.session = Some(ActiveSession {
                id,
                shutdown: Some(shutdown),
                closed: closed_tx,
                sender: None,
            });
        }
        debug!("Session {} started ({:?})", id, phase);

        SessionTask {
            id,
            adapter: self.adapter.clone(),
            inner: self.inner.clone(),
            events,
            closed: closed_rx,
            read_buffer_size: self.read_buffer_size,
        }
    }
}

/// Background half of a session.
struct SessionTask<A: ChatAdapter> {
    id: u64,
    adapter: Arc<A>,
    inner: Arc<Mutex<Inner<A::Stream>>>,
    events: mpsc::Sender<ConnectionEvent>,
    closed: watch::Receiver<bool>,
    read_buffer_size: usize,
}

impl<A: ChatAdapter> SessionTask<A> {
    async fn serve(self, mut listener: A::Listener, mut shutdown: oneshot::Receiver<()>) {
        self.set_phase(SessionPhase::Accepting);
        info!("Waiting for an incoming connection...");

        let accepted = tokio::select! {
            _ = &mut shutdown => {
                info!("Server stopped");
                None
            }
            _ = self.events.closed() => {
                debug!("Event receiver dropped, server stopped");
                None
            }
            result = listener.accept() => match result {
                Ok(stream) => Some(stream),
                Err(e) => {
                    // A closed listener ends the server quietly.
                    info!("Accept loop ended: {}", e);
                    None
                }
            },
        };

        // Only one inbound session per server.
        drop(listener);

        if let Some(stream) = accepted {
            info!("Incoming connection accepted");
            self.run_session(stream, shutdown).await;
        }
        self.finish().await;
    }

    async fn connect(
        self,
        address: String,
        service: ServiceRecord,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let connected = tokio::select! {
            _ = &mut shutdown => {
                info!("Connection attempt cancelled");
                None
            }
            _ = self.events.closed() => {
                debug!("Event receiver dropped, connection attempt cancelled");
                None
            }
            result = self.adapter.connect(&address, &service) => match result {
                Ok(stream) => Some(stream),
                Err(e) => {
                    warn!("Connection to {} failed: {}", address, e);
                    self.clear_session();
                    let _ = self
                        .events
                        .send(ConnectionEvent::Failed(CONNECTION_INTERRUPTED.to_string()))
                        .await;
                    None
                }
            },
        };

        if let Some(stream) = connected {
            info!("Connected to {}", address);
            self.run_session(stream, shutdown).await;
        }
        self.finish().await;
    }

    async fn run_session(&self, stream: A::Stream, mut shutdown: oneshot::Receiver<()>) {
        let (mut messages, sender) = TransferChannel::new(stream)
            .with_read_buffer_size(self.read_buffer_size)
            .split();

        if !self.install(sender.with_close_signal(self.closed.clone())) {
            debug!("Session {} closed before it was established", self.id);
            return;
        }

        if self.events.send(ConnectionEvent::Established).await.is_err() {
            return;
        }
        info!("Session {} established", self.id);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Session {} closed locally", self.id);
                    break;
                }
                item = messages.next() => match item {
                    Some(Ok(message)) => {
                        let event = ConnectionEvent::MessageReceived(message);
                        if self.events.send(event).await.is_err() {
                            debug!("Event receiver dropped, ending session {}", self.id);
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = self.events.send(ConnectionEvent::Failed(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = self.events.send(ConnectionEvent::Disconnected).await;
                        break;
                    }
                },
            }
        }
    }

    fn set_phase(&self, phase: SessionPhase) {
        let mut inner = self.inner.lock();
        if inner.is_current(self.id) {
            inner.phase = phase;
        }
    }

    /// Publish the send half and mark the session live.
    fn install(&self, sender: MessageSender<WriteHalf<A::Stream>>) -> bool {
        let mut inner = self.inner.lock();
        if !inner.is_current(self.id) {
            return false;
        }
        inner.phase = SessionPhase::SessionActive;
        if let Some(session) = inner.session.as_mut() {
            session.sender = Some(Arc::new(tokio::sync::Mutex::new(sender)));
        }
        true
    }

    fn clear_session(&self) -> Option<SharedSender<A::Stream>> {
        let mut inner = self.inner.lock();
        if !inner.is_current(self.id) {
            return None;
        }
        inner.phase = SessionPhase::Idle;
        inner.session.take().and_then(|s| s.sender)
    }

    /// Release whatever sockets this session still owns.
    async fn finish(self) {
        if let Some(sender) = self.clear_session() {
            sender.lock().await.close().await;
        }
        debug!("Session {} finished", self.id);
    }
}
