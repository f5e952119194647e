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

//! Known peer devices.

use tokio::sync::watch;
use tracing::debug;

use super::protocol::PeerDevice;

/// Paired and discovered devices, each unique by address in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceLists {
    pub paired: Vec<PeerDevice>,
    pub scanned: Vec<PeerDevice>,
}

/// Device directory fed by discovery and bonding enumeration.
///
/// Every change is published as a whole [`DeviceLists`] snapshot.
#[derive(Debug)]
pub struct DeviceDirectory {
    lists: watch::Sender<DeviceLists>,
}

impl Default for DeviceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDirectory {
    pub fn new() -> Self {
        let (lists, _) = watch::channel(DeviceLists::default());
        Self { lists }
    }

    /// Record a discovered device. Returns `false` if its address was already known.
    pub fn record_discovered(&self, device: PeerDevice) -> bool {
        self.lists.send_if_modified(|lists| {
            if lists.scanned.contains(&device) {
                return false;
            }
            debug!("Discovered device: {}", device);
            lists.scanned.push(device);
            true
        })
    }

    /// Replace the paired set with a fresh bonding snapshot.
    pub fn set_paired(&self, devices: Vec<PeerDevice>) {
        let mut unique: Vec<PeerDevice> = Vec::with_capacity(devices.len());
        for device in devices {
            if !unique.contains(&device) {
                unique.push(device);
            }
        }
        self.lists.send_modify(|lists| lists.paired = unique);
    }

    pub fn is_paired(&self, address: &str) -> bool {
        self.lists
            .borrow()
            .paired
            .iter()
            .any(|device| device.address == address)
    }

    pub fn paired(&self) -> Vec<PeerDevice> {
        self.lists.borrow().paired.clone()
    }

    pub fn scanned(&self) -> Vec<PeerDevice> {
        self.lists.borrow().scanned.clone()
    }

    pub fn snapshot(&self) -> DeviceLists {
        self.lists.borrow().clone()
    }

    /// Observe directory snapshots.
    pub fn subscribe(&self) -> watch::Receiver<DeviceLists> {
        self.lists.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, address: &str) -> PeerDevice {
        PeerDevice::new(Some(name), address)
    }

    #[test]
    fn test_discovered_devices_are_unique_and_ordered() {
        let directory = DeviceDirectory::new();

        assert!(directory.record_discovered(device("a", "00:00:00:00:00:01")));
        assert!(directory.record_discovered(device("b", "00:00:00:00:00:02")));
        assert!(!directory.record_discovered(device("a-again", "00:00:00:00:00:01")));
        assert!(directory.record_discovered(device("c", "00:00:00:00:00:03")));
        assert!(!directory.record_discovered(device("b", "00:00:00:00:00:02")));

        let addresses: Vec<_> = directory
            .scanned()
            .into_iter()
            .map(|d| d.address)
            .collect();
        assert_eq!(
            addresses,
            vec!["00:00:00:00:00:01", "00:00:00:00:00:02", "00:00:00:00:00:03"]
        );
        // The first-seen record is kept.
        assert_eq!(directory.scanned()[0].name.as_deref(), Some("a"));
    }

    #[test]
    fn test_set_paired_replaces_snapshot() {
        let directory = DeviceDirectory::new();
        directory.set_paired(vec![
            device("phone", "00:00:00:00:00:01"),
            device("laptop", "00:00:00:00:00:02"),
        ]);
        assert!(directory.is_paired("00:00:00:00:00:02"));

        directory.set_paired(vec![device("tablet", "00:00:00:00:00:03")]);
        assert!(!directory.is_paired("00:00:00:00:00:01"));
        assert!(directory.is_paired("00:00:00:00:00:03"));
        assert_eq!(directory.paired().len(), 1);
    }

    #[test]
    fn test_set_paired_collapses_duplicates() {
        let directory = DeviceDirectory::new();
        directory.set_paired(vec![
            device("phone", "00:00:00:00:00:01"),
            device("phone", "00:00:00:00:00:01"),
        ]);
        assert_eq!(directory.paired().len(), 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_new_devices() {
        let directory = DeviceDirectory::new();
        let mut rx = directory.subscribe();

        directory.record_discovered(device("a", "00:00:00:00:00:01"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().scanned.len(), 1);

        // Duplicates do not notify.
        directory.record_discovered(device("a", "00:00:00:00:00:01"));
        assert!(!rx.has_changed().unwrap());
    }
}
