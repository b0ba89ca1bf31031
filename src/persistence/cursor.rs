//! Per-tag-key fetch cursors.
//!
//! A cursor is the highest item id already published for a tag key. Unknown
//! keys read as 0 ("from the beginning"). The store accepts any value; keeping
//! cursors monotonic is the scheduler's job.

use std::sync::Arc;

use super::store::{Store, StoreError};
use crate::types::TagKey;

/// Durable map from tag key to last-seen item id.
#[derive(Debug, Clone)]
pub struct CursorStore {
    store: Arc<Store>,
}

impl CursorStore {
    pub fn new(store: Arc<Store>) -> Self {
        CursorStore { store }
    }

    /// Returns the cursor for `key`, or 0 if none is stored.
    pub fn get(&self, key: &TagKey) -> u64 {
        self.store
            .read(|s| s.cursors.get(key.as_str()).copied().unwrap_or(0))
    }

    /// Upserts the cursor for `key`. Durable once this returns.
    pub fn set(&self, key: &TagKey, last_id: u64) -> Result<(), StoreError> {
        self.store.update(|s| {
            s.cursors.insert(key.as_str().to_string(), last_id);
            Ok(())
        })
    }
}
