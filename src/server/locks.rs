use crate::protocol::ParentRef;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guards held for the duration of one read-modify-write cycle
pub struct ParentGuards {
    keys: Vec<ParentRef>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ParentGuards {
    pub fn keys(&self) -> &[ParentRef] {
        &self.keys
    }
}

/// One async mutex per parent. Writers to the same parent serialise; writers
/// to different parents never contend.
#[derive(Default)]
pub struct ParentLocks {
    table: Mutex<HashMap<ParentRef, Arc<Mutex<()>>>>,
}

impl ParentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks every key, always in ascending key order so two writers
    /// needing overlapping sets cannot deadlock.
    pub async fn lock(&self, keys: impl IntoIterator<Item = ParentRef>) -> ParentGuards {
        let mut keys: Vec<ParentRef> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mutexes: Vec<Arc<Mutex<()>>> = {
            let mut table = self.table.lock().await;
            // Drop entries nobody holds or waits on
            table.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            keys.iter()
                .map(|key| table.entry(*key).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }

        ParentGuards {
            keys,
            _guards: guards,
        }
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.table.lock().await.len()
    }
}
