use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::{Identifier, NetworkId};

/// In-process single-writer locks, one per (network, identifier).
///
/// Runs on distinct keys proceed concurrently; runs on the same key queue.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<(NetworkId, Identifier), Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `(network, identifier)`.
    pub async fn acquire(&self, network: &NetworkId, identifier: &Identifier) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry((network.clone(), identifier.clone()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }
}
