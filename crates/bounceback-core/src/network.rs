//! Network connectivity monitor
//!
//! Purely observational: platform glue feeds status changes in, the sync
//! engine watches for offline→online transitions. Nothing here ever blocks
//! or delays a local write.

use tokio::sync::watch;

/// Transport currently carrying traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    #[default]
    Unknown,
}

/// Connectivity snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStatus {
    pub online: bool,
    pub connection_type: ConnectionType,
}

impl NetworkStatus {
    #[must_use]
    pub const fn online(connection_type: ConnectionType) -> Self {
        Self {
            online: true,
            connection_type,
        }
    }

    #[must_use]
    pub const fn offline() -> Self {
        Self {
            online: false,
            connection_type: ConnectionType::Unknown,
        }
    }
}

/// Observes connectivity and notifies watchers of changes
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: watch::Sender<NetworkStatus>,
}

impl NetworkMonitor {
    /// Create a monitor with a known initial status
    #[must_use]
    pub fn new(initial: NetworkStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Current connectivity snapshot
    #[must_use]
    pub fn current(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    /// Whether the device is currently online
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.current().online
    }

    /// Feed a status change from the platform layer
    pub fn set_status(&self, status: NetworkStatus) {
        // send_if_modified avoids waking watchers on duplicate reports
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Watch channel receiver for status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkStatus::offline())
    }
}
