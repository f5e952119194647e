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

//! In-memory adapter for unit tests.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;

use super::adapter::{BondingEvent, ChatAdapter, Permission, RfcommListener, RfcommStream};
use super::protocol::{PeerDevice, ServiceRecord};

const PIPE_SIZE: usize = 4096;

/// Duplex pipe whose writes can be forced to fail or hang.
pub struct MockStream {
    inner: DuplexStream,
    fail_writes: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        if self.stall_writes.load(Ordering::SeqCst) {
            return Poll::Pending;
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl RfcommStream for MockStream {}

pub struct MockListener {
    incoming: mpsc::UnboundedReceiver<io::Result<MockStream>>,
}

#[async_trait]
impl RfcommListener for MockListener {
    type Stream = MockStream;

    async fn accept(&mut self) -> io::Result<MockStream> {
        match self.incoming.recv().await {
            Some(result) => result,
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "listener closed")),
        }
    }
}

/// Scriptable radio: incoming connections, connect outcomes, permissions.
pub struct MockAdapter {
    name: Option<String>,
    denied: Mutex<HashSet<Permission>>,
    paired: Mutex<Vec<PeerDevice>>,
    discoverable: Mutex<Vec<PeerDevice>>,
    incoming: Mutex<Option<mpsc::UnboundedSender<io::Result<MockStream>>>>,
    connects: Mutex<VecDeque<MockStream>>,
    connected_addresses: Mutex<Vec<String>>,
    discovery_cancellations: AtomicUsize,
    fail_writes: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
    bonding_tx: mpsc::Sender<BondingEvent>,
    bonding_rx: Mutex<Option<mpsc::Receiver<BondingEvent>>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        let (bonding_tx, bonding_rx) = mpsc::channel(16);
        Self {
            name: None,
            denied: Mutex::new(HashSet::new()),
            paired: Mutex::new(Vec::new()),
            discoverable: Mutex::new(Vec::new()),
            incoming: Mutex::new(None),
            connects: Mutex::new(VecDeque::new()),
            connected_addresses: Mutex::new(Vec::new()),
            discovery_cancellations: AtomicUsize::new(0),
            fail_writes: Arc::new(AtomicBool::new(false)),
            stall_writes: Arc::new(AtomicBool::new(false)),
            bonding_tx,
            bonding_rx: Mutex::new(Some(bonding_rx)),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn deny(&self, permission: Permission) {
        self.denied.lock().insert(permission);
    }

    pub fn set_paired(&self, devices: Vec<PeerDevice>) {
        *self.paired.lock() = devices;
    }

    pub fn set_discoverable(&self, devices: Vec<PeerDevice>) {
        *self.discoverable.lock() = devices;
    }

    fn pipe(&self) -> (MockStream, DuplexStream) {
        let (local, remote) = duplex(PIPE_SIZE);
        let stream = MockStream {
            inner: local,
            fail_writes: self.fail_writes.clone(),
            stall_writes: self.stall_writes.clone(),
        };
        (stream, remote)
    }

    /// Deliver an inbound connection to the current listener; returns the peer end.
    pub fn push_incoming(&self) -> DuplexStream {
        let (local, remote) = self.pipe();
        if let Some(tx) = self.incoming.lock().as_ref() {
            let _ = tx.send(Ok(local));
        }
        remote
    }

    /// Make the current listener's pending accept fail.
    pub fn fail_accept(&self) {
        if let Some(tx) = self.incoming.lock().as_ref() {
            let _ = tx.send(Err(io::Error::from(io::ErrorKind::ConnectionAborted)));
        }
    }

    /// Let the next connect succeed; returns the peer end.
    pub fn accept_next_connect(&self) -> DuplexStream {
        let (local, remote) = self.pipe();
        self.connects.lock().push_back(local);
        remote
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Writes never complete, like a peer that stopped reading.
    pub fn stall_writes(&self) {
        self.stall_writes.store(true, Ordering::SeqCst);
    }

    pub fn discovery_cancellations(&self) -> usize {
        self.discovery_cancellations.load(Ordering::SeqCst)
    }

    pub fn connected_addresses(&self) -> Vec<String> {
        self.connected_addresses.lock().clone()
    }

    pub async fn emit_bonding(&self, address: &str, connected: bool) {
        let event = BondingEvent {
            address: address.to_string(),
            connected,
        };
        let _ = self.bonding_tx.send(event).await;
    }
}

#[async_trait]
impl ChatAdapter for MockAdapter {
    type Stream = MockStream;
    type Listener = MockListener;

    async fn has_permission(&self, permission: Permission) -> bool {
        !self.denied.lock().contains(&permission)
    }

    async fn local_name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn paired_devices(&self) -> io::Result<Vec<PeerDevice>> {
        Ok(self.paired.lock().clone())
    }

    async fn start_discovery(&self, found: mpsc::Sender<PeerDevice>) -> io::Result<()> {
        let devices = self.discoverable.lock().clone();
        tokio::spawn(async move {
            for device in devices {
                if found.send(device).await.is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    async fn cancel_discovery(&self) {
        self.discovery_cancellations.fetch_add(1, Ordering::SeqCst);
    }

    async fn bonding_events(&self) -> io::Result<mpsc::Receiver<BondingEvent>> {
        self.bonding_rx
            .lock()
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "already subscribed"))
    }

    async fn listen(&self, _service: &ServiceRecord) -> io::Result<MockListener> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.incoming.lock() = Some(tx);
        Ok(MockListener { incoming: rx })
    }

    async fn connect(&self, address: &str, _service: &ServiceRecord) -> io::Result<MockStream> {
        self.connected_addresses.lock().push(address.to_string());
        self.connects
            .lock()
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))
    }
}
