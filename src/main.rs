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

//! Bluetooth Chat terminal client.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bluetooth_chat::bluetooth::{BluezAdapter, PeerDevice};
use bluetooth_chat::{ChatService, ChatState, Config};

/// A line typed by the user.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Scan,
    StopScan,
    Devices,
    Listen,
    Connect(String),
    Disconnect,
    Quit,
    Send(String),
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let command = match line.split_once(' ') {
            Some(("/connect", address)) => Command::Connect(address.trim().to_string()),
            _ => match line {
                "/scan" => Command::Scan,
                "/stop" => Command::StopScan,
                "/devices" => Command::Devices,
                "/listen" => Command::Listen,
                "/disconnect" => Command::Disconnect,
                "/quit" => Command::Quit,
                _ => Command::Send(line.to_string()),
            },
        };
        Some(command)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("bluetooth_chat=info".parse()?))
        .init();

    info!("Starting Bluetooth Chat v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    let adapter = Arc::new(BluezAdapter::new().await?);
    if let Some(name) = &config.bluetooth.device_name {
        adapter.set_name(name).await?;
    }
    info!("Local address: {}", adapter.address().await?);

    let service = ChatService::new(adapter, &config).await;
    tokio::spawn(print_state(service.subscribe()));

    println!("Commands: /scan /stop /devices /listen /connect <address> /disconnect /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let Some(command) = Command::parse(&line) else {
                    continue;
                };
                if !run_command(&service, command).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    service.release();
    info!("Bluetooth Chat stopped");
    Ok(())
}

/// Execute one command. Returns false when the user asked to quit.
async fn run_command(service: &ChatService<BluezAdapter>, command: Command) -> bool {
    match command {
        Command::Scan => service.start_scan().await,
        Command::StopScan => service.stop_scan().await,
        Command::Devices => {
            let state = service.state();
            println!("Paired:");
            for device in &state.paired_devices {
                println!("  {} ({})", device.display_name(), device.address);
            }
            println!("Scanned:");
            for device in &state.scanned_devices {
                println!("  {} ({})", device.display_name(), device.address);
            }
        }
        Command::Listen => service.wait_for_incoming_connections().await,
        Command::Connect(address) => {
            let lists = service.directory().snapshot();
            let device = lists
                .paired
                .into_iter()
                .chain(lists.scanned)
                .find(|d| d.address.eq_ignore_ascii_case(&address))
                .unwrap_or_else(|| PeerDevice::new(None::<String>, address));
            service.connect_to_device(&device).await;
        }
        Command::Disconnect => service.disconnect_from_device(),
        Command::Quit => return false,
        Command::Send(text) => {
            if service.send_message(&text).await.is_none() {
                warn!("Not connected, message dropped");
            }
        }
    }
    true
}

/// Print status changes and new messages as they arrive.
async fn print_state(mut state: watch::Receiver<ChatState>) {
    let mut status = state.borrow().status();
    let mut printed = 0;
    let mut last_error: Option<String> = None;

    while state.changed().await.is_ok() {
        let snapshot = state.borrow_and_update().clone();

        if snapshot.status() != status {
            status = snapshot.status();
            println!("[{}]", status.as_str());
        }
        if snapshot.last_error != last_error {
            if let Some(error) = &snapshot.last_error {
                println!("[error] {}", error);
            }
            last_error = snapshot.last_error.clone();
        }
        for message in snapshot.messages.iter().skip(printed) {
            let who: &str = if message.is_local { "me" } else { &message.sender_name };
            println!("{}: {}", who, message.text);
        }
        printed = snapshot.messages.len();
    }
}
