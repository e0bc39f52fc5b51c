//! libSQL persistence

mod blob_repository;
mod connection;
mod migrations;
mod snapshot_repository;

pub use blob_repository::LibSqlBlobStore;
pub use connection::Database;
pub use snapshot_repository::LibSqlSnapshotStore;
