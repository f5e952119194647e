//! End-to-end chat between two peers over in-memory RFCOMM pipes.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{duplex, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use bluetooth_chat::bluetooth::{
    BondingEvent, ChatAdapter, Permission, PeerDevice, RfcommListener, ServiceRecord,
    CONNECTION_INTERRUPTED,
};
use bluetooth_chat::{ChatService, ChatState, Config};

/// Shared medium: registered servers keyed by device address.
#[derive(Default)]
struct Air {
    servers: Mutex<HashMap<String, mpsc::UnboundedSender<DuplexStream>>>,
}

struct LinkListener {
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

#[async_trait]
impl RfcommListener for LinkListener {
    type Stream = DuplexStream;

    async fn accept(&mut self) -> io::Result<DuplexStream> {
        self.incoming
            .recv()
            .await
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))
    }
}

struct LinkAdapter {
    name: String,
    address: String,
    air: Arc<Air>,
}

impl LinkAdapter {
    fn new(name: &str, address: &str, air: &Arc<Air>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            address: address.to_string(),
            air: air.clone(),
        })
    }
}

#[async_trait]
impl ChatAdapter for LinkAdapter {
    type Stream = DuplexStream;
    type Listener = LinkListener;

    async fn has_permission(&self, _permission: Permission) -> bool {
        true
    }

    async fn local_name(&self) -> Option<String> {
        Some(self.name.clone())
    }

    async fn paired_devices(&self) -> io::Result<Vec<PeerDevice>> {
        Ok(Vec::new())
    }

    async fn start_discovery(&self, _found: mpsc::Sender<PeerDevice>) -> io::Result<()> {
        Ok(())
    }

    async fn cancel_discovery(&self) {}

    async fn bonding_events(&self) -> io::Result<mpsc::Receiver<BondingEvent>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn listen(&self, _service: &ServiceRecord) -> io::Result<LinkListener> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.air.servers.lock().insert(self.address.clone(), tx);
        Ok(LinkListener { incoming: rx })
    }

    async fn connect(&self, address: &str, _service: &ServiceRecord) -> io::Result<DuplexStream> {
        let (client, server) = duplex(4096);
        let servers = self.air.servers.lock();
        match servers.get(address) {
            Some(tx) if tx.send(server).is_ok() => Ok(client),
            _ => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
        }
    }
}

async fn wait_for(
    service: &ChatService<LinkAdapter>,
    predicate: impl FnMut(&ChatState) -> bool,
) -> ChatState {
    let mut rx = service.subscribe();
    let state = timeout(Duration::from_secs(2), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .unwrap();
    state.clone()
}

async fn connected_pair() -> (ChatService<LinkAdapter>, ChatService<LinkAdapter>) {
    let air = Arc::new(Air::default());
    let config = Config::default();

    let alice = ChatService::new(LinkAdapter::new("Alice", "00:00:00:00:00:0A", &air), &config).await;
    let bob = ChatService::new(LinkAdapter::new("Bob", "00:00:00:00:00:0B", &air), &config).await;

    alice.wait_for_incoming_connections().await;
    bob.connect_to_device(&PeerDevice::new(Some("Alice"), "00:00:00:00:00:0A"))
        .await;

    wait_for(&alice, |s| s.is_connected).await;
    wait_for(&bob, |s| s.is_connected).await;
    (alice, bob)
}

#[tokio::test]
async fn test_two_peers_exchange_messages() {
    let (alice, bob) = connected_pair().await;

    assert!(bob.send_message("hi").await.is_some());
    let state = wait_for(&alice, |s| s.messages.len() == 1).await;
    assert_eq!(state.messages[0].sender_name, "Bob");
    assert_eq!(state.messages[0].text, "hi");
    assert!(!state.messages[0].is_local);

    assert!(alice.send_message("hello back").await.is_some());
    let state = wait_for(&bob, |s| s.messages.len() == 2).await;
    let log: Vec<_> = state
        .messages
        .iter()
        .map(|m| (m.sender_name.as_str(), m.text.as_str(), m.is_local))
        .collect();
    assert_eq!(
        log,
        vec![("Bob", "hi", true), ("Alice", "hello back", false)]
    );
}

#[tokio::test]
async fn test_disconnect_is_seen_by_peer() {
    let (alice, bob) = connected_pair().await;

    bob.disconnect_from_device();
    assert!(!bob.state().is_connected);

    let state = wait_for(&alice, |s| !s.is_connected).await;
    assert!(!state.is_connecting);
    assert_eq!(state.last_error, None);
}

#[tokio::test]
async fn test_connect_without_server_is_interrupted() {
    let air = Arc::new(Air::default());
    let bob = ChatService::new(
        LinkAdapter::new("Bob", "00:00:00:00:00:0B", &air),
        &Config::default(),
    )
    .await;

    bob.connect_to_device(&PeerDevice::new(None::<String>, "00:00:00:00:00:0A"))
        .await;

    let state = wait_for(&bob, |s| s.last_error.is_some()).await;
    assert!(!state.is_connected);
    assert!(!state.is_connecting);
    assert_eq!(state.last_error.as_deref(), Some(CONNECTION_INTERRUPTED));
}
