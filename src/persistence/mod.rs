//! Persistence layer for tagrelay.
//!
//! Feed, webhook and cursor state lives in a single JSON document that is
//! rewritten atomically on every mutation.
//!
//! # File Layout
//!
//! ```text
//! <state_dir>/
//!   store.json        # webhooks, feeds, feeds_webhooks, cursors
//!   store.json.tmp    # transient, only during a write
//! ```
//!
//! # Crash Safety
//!
//! - Writes are temp-file + fsync + rename + directory fsync
//! - A mutation is visible in memory only after it is on disk
//! - A corrupt or future-schema document aborts startup instead of being
//!   silently replaced

pub mod cursor;
pub mod fsync;
pub mod snapshot;
pub mod store;

pub use cursor::CursorStore;
pub use fsync::{fsync_dir, fsync_file, write_atomic};
pub use snapshot::{
    SCHEMA_VERSION, SnapshotError, StoreSnapshot, WebhookRow, load_snapshot, save_snapshot_atomic,
    try_load_snapshot,
};
pub use store::{STORE_FILE_NAME, Store, StoreError};
