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

//! BlueZ backend built on RFCOMM profiles.
//!
//! Both roles register a profile for the chat service UUID with bluetoothd,
//! which publishes the SDP record and hands over connected sockets as
//! [`ConnectRequest`]s.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::Result;
use async_trait::async_trait;
use bluer::rfcomm::{ConnectRequest, Profile, ProfileHandle, Role};
use bluer::{Address, AdapterEvent, DeviceEvent, DeviceProperty, Session};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::adapter::{BondingEvent, ChatAdapter, Permission, RfcommListener, RfcommStream};
use super::protocol::{PeerDevice, ServiceRecord};

fn to_io<E>(e: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::Other, e)
}

fn profile(service: &ServiceRecord, role: Role) -> Profile {
    Profile {
        uuid: service.uuid,
        name: Some(service.name.clone()),
        role: Some(role),
        require_authentication: Some(false),
        require_authorization: Some(false),
        ..Default::default()
    }
}

/// Connected RFCOMM socket.
///
/// Client sockets keep their profile registered for as long as they live.
pub struct BluezStream {
    stream: bluer::rfcomm::Stream,
    _profile: Option<Pin<Box<ProfileHandle>>>,
}

impl BluezStream {
    fn accept(request: ConnectRequest, profile: Option<Pin<Box<ProfileHandle>>>) -> io::Result<Self> {
        let peer = request.device();
        let stream = request.accept().map_err(to_io)?;
        debug!("Accepted RFCOMM socket from {}", peer);
        Ok(Self {
            stream,
            _profile: profile,
        })
    }
}

impl AsyncRead for BluezStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for BluezStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

impl RfcommStream for BluezStream {
    fn is_connected(&self) -> bool {
        self.stream.peer_addr().is_ok()
    }
}

/// Server profile waiting for inbound connections.
pub struct BluezListener {
    handle: Pin<Box<ProfileHandle>>,
}

#[async_trait]
impl RfcommListener for BluezListener {
    type Stream = BluezStream;

    async fn accept(&mut self) -> io::Result<BluezStream> {
        match self.handle.next().await {
            Some(request) => BluezStream::accept(request, None),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "profile unregistered",
            )),
        }
    }
}

/// The default BlueZ adapter.
pub struct BluezAdapter {
    session: Session,
    adapter: bluer::Adapter,
    discovery: Mutex<Option<JoinHandle<()>>>,
}

impl BluezAdapter {
    /// Open a BlueZ session and power on the default adapter.
    pub async fn new() -> Result<Self> {
        info!("Initializing Bluetooth adapter...");

        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        adapter.set_pairable(true).await?;
        info!("Adapter address: {}", adapter.address().await?);

        Ok(Self {
            session,
            adapter,
            discovery: Mutex::new(None),
        })
    }

    /// Set the advertised device name.
    pub async fn set_name(&self, name: &str) -> Result<()> {
        self.adapter.set_alias(name.to_string()).await?;
        info!("Bluetooth name set to: {}", name);
        Ok(())
    }

    pub async fn address(&self) -> Result<Address> {
        Ok(self.adapter.address().await?)
    }
}

#[async_trait]
impl ChatAdapter for BluezAdapter {
    type Stream = BluezStream;
    type Listener = BluezListener;

    async fn has_permission(&self, permission: Permission) -> bool {
        // bluetoothd grants everything once the adapter is up.
        match self.adapter.is_powered().await {
            Ok(powered) => powered,
            Err(e) => {
                debug!("No {} permission: {}", permission, e);
                false
            }
        }
    }

    async fn local_name(&self) -> Option<String> {
        self.adapter.alias().await.ok()
    }

    async fn paired_devices(&self) -> io::Result<Vec<PeerDevice>> {
        let mut devices = Vec::new();

        for address in self.adapter.device_addresses().await.map_err(to_io)? {
            let device = self.adapter.device(address).map_err(to_io)?;
            if device.is_paired().await.map_err(to_io)? {
                let name = device.name().await.unwrap_or(None);
                devices.push(PeerDevice::new(name, address.to_string()));
            }
        }

        Ok(devices)
    }

    async fn start_discovery(&self, found: mpsc::Sender<PeerDevice>) -> io::Result<()> {
        let events = self.adapter.discover_devices().await.map_err(to_io)?;
        let adapter = self.adapter.clone();

        let task = tokio::spawn(async move {
            tokio::pin!(events);
            while let Some(event) = events.next().await {
                let AdapterEvent::DeviceAdded(address) = event else {
                    continue;
                };
                let name = match adapter.device(address) {
                    Ok(device) => device.name().await.unwrap_or(None),
                    Err(_) => None,
                };
                if found
                    .send(PeerDevice::new(name, address.to_string()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            debug!("Discovery stream ended");
        });

        if let Some(previous) = self.discovery.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn cancel_discovery(&self) {
        // Dropping the discovery stream stops the scan.
        if let Some(task) = self.discovery.lock().take() {
            task.abort();
        }
    }

    async fn bonding_events(&self) -> io::Result<mpsc::Receiver<BondingEvent>> {
        let (tx, rx) = mpsc::channel(32);

        for address in self.adapter.device_addresses().await.map_err(to_io)? {
            watch_device(&self.adapter, address, tx.clone());
        }

        let events = self.adapter.events().await.map_err(to_io)?;
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            tokio::pin!(events);
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    event = events.next() => match event {
                        Some(AdapterEvent::DeviceAdded(address)) => {
                            watch_device(&adapter, address, tx.clone());
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        });

        Ok(rx)
    }

    async fn listen(&self, service: &ServiceRecord) -> io::Result<BluezListener> {
        let handle = self
            .session
            .register_profile(profile(service, Role::Server))
            .await
            .map_err(to_io)?;
        info!("Registered server profile '{}'", service.name);

        Ok(BluezListener {
            handle: Box::pin(handle),
        })
    }

    async fn connect(&self, address: &str, service: &ServiceRecord) -> io::Result<BluezStream> {
        let address: Address = address.parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid Bluetooth address: {}", address),
            )
        })?;
        let device = self.adapter.device(address).map_err(to_io)?;

        let mut handle = Box::pin(
            self.session
                .register_profile(profile(service, Role::Client))
                .await
                .map_err(to_io)?,
        );

        debug!("Connecting profile {} on {}", service.uuid, address);
        let request = tokio::select! {
            result = device.connect_profile(&service.uuid) => {
                result.map_err(to_io)?;
                handle.next().await
            }
            request = handle.next() => request,
        };

        match request {
            Some(request) => BluezStream::accept(request, Some(handle)),
            None => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "profile unregistered before connecting",
            )),
        }
    }
}

/// Forward connected/disconnected changes of one device.
fn watch_device(adapter: &bluer::Adapter, address: Address, tx: mpsc::Sender<BondingEvent>) {
    let device = match adapter.device(address) {
        Ok(device) => device,
        Err(e) => {
            warn!("Cannot watch {}: {}", address, e);
            return;
        }
    };

    tokio::spawn(async move {
        let events = match device.events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("Cannot watch {}: {}", address, e);
                return;
            }
        };
        tokio::pin!(events);

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                event = events.next() => match event {
                    Some(DeviceEvent::PropertyChanged(DeviceProperty::Connected(connected))) => {
                        let event = BondingEvent {
                            address: address.to_string(),
                            connected,
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
    });
}
