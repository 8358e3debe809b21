//! waymark-core - Core library for Waymark
//!
//! Offline-first sync engine: a self-healing local store, a durable outbox
//! of remote intents, connectivity tracking, and a sync manager that drains
//! the outbox, pulls remote records and merges live changes.

pub mod config;
pub mod connectivity;
pub mod error;
pub mod models;
pub mod observer;
pub mod outbox;
pub mod records;
pub mod remote;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, SyncSettings};
pub use connectivity::{ConnectivityConfig, ConnectivityMonitor};
pub use error::{Error, InviteError, Result};
pub use models::{Invite, Membership, OutboxOp, OutboxOperation, Record, Role};
pub use outbox::OutboxQueue;
pub use records::RecordService;
pub use state::{SyncState, SyncStatus};
pub use store::{Collection, LocalStore, StoreOptions};
pub use sync::{DrainOutcome, SyncEvent, SyncManager, SyncOptions};
