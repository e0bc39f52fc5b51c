//! keel-core - Core library for Keel
//!
//! This crate contains the record models, merge rules, storage layers and sync
//! machinery shared by the Keel server (`keel-api`) and client (`keel`).

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod merge;
pub mod models;
pub mod state;
pub mod storage;
pub mod sync;
pub mod transport;
pub mod util;

pub use error::{Error, Result};
pub use events::{EventBus, Notice, SyncEvent};
pub use models::{CollectionKind, Note, Record, Snapshot, Task, Tombstone, TombstoneLog};
