//! Data models for Keel

mod collection;
mod note;
mod operation;
mod record;
mod snapshot;
mod sync_conflict;
mod sync_state;
mod task;
mod tombstone;
mod tracking;

pub use collection::CollectionKind;
pub use note::Note;
pub use operation::{OperationType, QueuedOperation, DEFAULT_MAX_RETRIES};
pub use record::{is_valid_record, new_record_id, Record, UPDATED_AT};
pub use snapshot::Snapshot;
pub use sync_conflict::{ConflictKind, ConflictRecord};
pub use sync_state::SyncState;
pub use task::Task;
pub use tombstone::{Tombstone, TombstoneLog};
pub use tracking::{Flashcard, Habit, InventoryItem, TimeSession};
