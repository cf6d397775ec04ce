//! Per-player mutual exclusion
//!
//! Two sessions may be logged in as the same player (the deployed client
//! reconnects freely), so any command that reads then writes that player's
//! balances or buildings must run under the player's lock. Locks are scoped
//! per player id; commands for different players never contend.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of one async mutex per player id.
#[derive(Clone, Default)]
pub struct PlayerLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl PlayerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for a player, creating it on first use. The guard
    /// must be held for the whole read-modify-write sequence.
    pub async fn acquire(&self, player_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(player_id).or_default())
        };
        lock.lock_owned().await
    }
}
