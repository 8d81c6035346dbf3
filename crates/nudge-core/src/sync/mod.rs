//! Two-way reconciliation with a remote reminder store.
//!
//! Conflicts resolve per record by `updated_at`: the newer side wins and
//! a tie keeps the local copy. Local deletes travel as tombstones until the
//! remote confirms them.

pub mod cursor;
pub mod memory;
pub mod merge;
pub mod reconciler;
pub mod remote;
pub mod types;

pub use cursor::{SyncCursor, SyncRun, SyncStatus};
pub use memory::MemoryRemoteStore;
pub use merge::{decide_merge, MergeDecision};
pub use reconciler::SyncReconciler;
pub use remote::{HttpRemoteStore, RemoteStore};
pub use types::{
    EntityFailure, MergeCounts, ReminderInput, RemoteReminder, RemoteTag, SyncError,
    SyncOperation, SyncOutcome, SyncReport, TagInput,
};
