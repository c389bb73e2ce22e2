//! Per-(category, geocell) serial lanes.
//!
//! A decision takes every lane its search disk touches, always in sorted
//! order, so two decisions whose disks overlap run one after the other while
//! disjoint regions proceed in parallel.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::geo_index::LaneKey;

#[derive(Debug, Default)]
pub struct LaneLocks {
    lanes: Mutex<HashMap<LaneKey, Arc<AsyncMutex<()>>>>,
}

/// Held lanes. Dropping it releases them.
#[derive(Debug)]
pub struct LaneGuard {
    keys: Vec<LaneKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LaneGuard {
    pub fn keys(&self) -> &[LaneKey] {
        &self.keys
    }
}

impl LaneLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for every lane in `keys`. Sorted acquisition rules out deadlock
    /// between overlapping requests.
    pub async fn acquire(&self, keys: BTreeSet<LaneKey>) -> LaneGuard {
        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut lanes = self.lanes.lock().expect("lane table lock poisoned");
            keys.iter()
                .map(|key| lanes.entry(key.clone()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        LaneGuard {
            keys: keys.into_iter().collect(),
            _guards: guards,
        }
    }

    /// Forget lanes nobody holds or waits on.
    pub fn prune(&self) -> usize {
        let mut lanes = self.lanes.lock().expect("lane table lock poisoned");
        let before = lanes.len();
        lanes.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before - lanes.len()
    }

    pub fn len(&self) -> usize {
        self.lanes.lock().expect("lane table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
