use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per channel, created on first use.
///
/// Holding the guard for a whole exchange keeps a channel's turns in
/// question/answer order while other channels proceed independently.
#[derive(Debug, Default)]
pub struct ChannelLocks {
    locks: Mutex<HashMap<u64, Arc<AsyncMutex<()>>>>,
}

impl ChannelLocks {
    pub async fn acquire(&self, channel_id: u64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop idle entries so the map tracks active channels only.
            locks.retain(|id, l| *id == channel_id || Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(channel_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Channels with an exchange in progress or queued.
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|l| Arc::strong_count(l) > 1)
            .count()
    }
}
