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

//! Event processing and state dispatch.
//!
//! [`ChatService`] owns the controller and feeds everything it observes into
//! the [`SessionProjector`]: connection events, directory snapshots and
//! platform bonding events.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bluetooth::{
    BondingEvent, ChatAdapter, ChatController, ChatMessage, ConnectionEvent, DeviceDirectory,
    DeviceLists, PeerDevice,
};
use crate::config::{Config, SendFailurePolicy};
use crate::error::Result;
use crate::state::{ChatState, SessionProjector, StateUpdate};

/// Chat session front door used by the UI.
pub struct ChatService<A: ChatAdapter> {
    controller: Arc<ChatController<A>>,
    projector: Arc<SessionProjector>,
    send_failure_policy: SendFailurePolicy,
    connection_job: Mutex<Option<JoinHandle<()>>>,
    /// Bumped whenever the connection job is replaced or cancelled.
    job_generation: Arc<AtomicU64>,
    subscriptions: Mutex<Vec<JoinHandle<()>>>,
    released: AtomicBool,
}

impl<A: ChatAdapter> ChatService<A> {
    /// Build the service and start observing the directory and bonding events.
    pub async fn new(adapter: Arc<A>, config: &Config) -> Self {
        let directory = Arc::new(DeviceDirectory::new());
        let controller = Arc::new(
            ChatController::new(adapter.clone(), directory.clone()).with_config(&config.bluetooth),
        );
        let projector = Arc::new(SessionProjector::new());

        let mut subscriptions = vec![spawn_directory_forwarder(
            directory.subscribe(),
            projector.clone(),
        )];

        match adapter.bonding_events().await {
            Ok(bonding) => subscriptions.push(spawn_bonding_forwarder(
                bonding,
                directory.clone(),
                projector.clone(),
            )),
            Err(e) => warn!("Bonding events unavailable: {}", e),
        }

        controller.update_paired_devices().await;

        Self {
            controller,
            projector,
            send_failure_policy: config.chat.send_failure_policy,
            connection_job: Mutex::new(None),
            job_generation: Arc::new(AtomicU64::new(0)),
            subscriptions: Mutex::new(subscriptions),
            released: AtomicBool::new(false),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> ChatState {
        self.projector.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.projector.subscribe()
    }

    pub fn controller(&self) -> &Arc<ChatController<A>> {
        &self.controller
    }

    pub fn directory(&self) -> &Arc<DeviceDirectory> {
        self.controller.directory()
    }

    pub async fn start_scan(&self) {
        self.controller.start_discovery().await;
    }

    pub async fn stop_scan(&self) {
        self.controller.stop_discovery().await;
    }

    /// Act as the server and wait for a peer to connect.
    pub async fn wait_for_incoming_connections(&self) {
        self.abort_connection_job();
        self.projector.apply(StateUpdate::Connecting);
        let events = self.controller.start_server().await;
        self.follow(events);
    }

    /// Act as the client and connect to `device`.
    pub async fn connect_to_device(&self, device: &PeerDevice) {
        self.abort_connection_job();
        self.projector.apply(StateUpdate::Connecting);
        let events = self.controller.connect_to_device(device).await;
        self.follow(events);
    }

    /// End the current session, whatever phase it is in.
    pub fn disconnect_from_device(&self) {
        self.abort_connection_job();
        self.controller.close_connection();
        self.projector.apply(StateUpdate::Disconnect);
    }

    /// Send `text` and append it to the log.
    ///
    /// The message is logged before it is written, so it keeps its place
    /// ahead of anything the peer sends meanwhile. Returns `None` when
    /// nothing was sent because no session is active.
    pub async fn send_message(&self, text: &str) -> Option<ChatMessage> {
        let projector = &self.projector;
        let outgoing = self
            .controller
            .try_send_message_with(text, |message| {
                projector.apply(StateUpdate::LocalMessage(message.clone()));
            })
            .await?;

        if let Err(e) = outgoing.delivery {
            match self.send_failure_policy {
                SendFailurePolicy::Log => debug!("Ignoring failed send: {}", e),
                SendFailurePolicy::Surface => self.projector.apply(StateUpdate::Error(e.to_string())),
                SendFailurePolicy::Disconnect => {
                    warn!("Disconnecting after failed send: {}", e);
                    self.disconnect_from_device();
                }
            }
        }

        Some(outgoing.message)
    }

    /// Stop every background job and close the session. Later calls do nothing.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        for task in self.subscriptions.lock().drain(..) {
            task.abort();
        }
        self.abort_connection_job();
        self.controller.release();
        info!("Chat service released");
    }

    fn abort_connection_job(&self) {
        self.job_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(job) = self.connection_job.lock().take() {
            job.abort();
        }
    }

    /// Forward a session's events into the projector.
    fn follow(&self, events: Result<mpsc::Receiver<ConnectionEvent>>) {
        match events {
            Ok(mut events) => {
                let projector = self.projector.clone();
                let generation = self.job_generation.clone();
                let id = generation.load(Ordering::SeqCst);
                let job = tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        if generation.load(Ordering::SeqCst) != id {
                            return;
                        }
                        debug!("Connection event: {:?}", event);
                        projector.apply(StateUpdate::Connection(event));
                    }
                    // A server that stopped accepting closes the stream without an event.
                    if generation.load(Ordering::SeqCst) == id {
                        debug!("Connection job ended");
                        projector.apply(StateUpdate::Ended);
                    }
                });
                if let Some(previous) = self.connection_job.lock().replace(job) {
                    previous.abort();
                }
            }
            Err(e) => {
                warn!("Connection job failed: {}", e);
                self.controller.close_connection();
                self.projector.apply(StateUpdate::Fault(e.to_string()));
            }
        }
    }
}

impl<A: ChatAdapter> Drop for ChatService<A> {
    fn drop(&mut self) {
        self.release();
    }
}

fn spawn_directory_forwarder(
    mut lists: watch::Receiver<DeviceLists>,
    projector: Arc<SessionProjector>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let snapshot = lists.borrow_and_update().clone();
            projector.apply(StateUpdate::Devices(snapshot));
            if lists.changed().await.is_err() {
                break;
            }
        }
    })
}

fn spawn_bonding_forwarder(
    mut bonding: mpsc::Receiver<BondingEvent>,
    directory: Arc<DeviceDirectory>,
    projector: Arc<SessionProjector>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = bonding.recv().await {
            let paired = directory.is_paired(&event.address);
            debug!(
                "Link to {} {} (paired: {})",
                event.address,
                if event.connected { "up" } else { "down" },
                paired
            );
            projector.apply(StateUpdate::LinkState {
                connected: event.connected,
                paired,
            });
        }
    })
}
