//! bounceback-core - Local-first data core for Bounceback
//!
//! The bounded local record store and its synchronization engine: an
//! embedded transactional store with a fixed storage quota, a durable
//! write-ahead queue of pending mutations, and a push/pull reconciliation
//! engine with conflict detection and pluggable resolution. Presentation,
//! auth, and notification layers consume this crate through the record
//! CRUD surface and the observability hooks.

pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod network;
pub mod queue;
pub mod quota;
pub mod schema;
pub mod sync;

pub use config::{QuotaConfig, RetryPolicy, StoreConfig, SyncSettings};
pub use db::{BatchOp, Filter, LocalStore, Query, SortDir, StoreStats};
pub use error::{Error, Result};
pub use events::{DataEvent, EventBus};
pub use models::{Record, RecordId, RecordKind, SyncMeta, SyncStatus};
pub use network::{ConnectionType, NetworkMonitor, NetworkStatus};
pub use sync::{ConflictStrategy, ManualResolution, SyncEngine, SyncPhase, SyncReport};
