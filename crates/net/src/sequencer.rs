//! Per-project lanes that order "persist then broadcast"
//!
//! Holding a project's lane across the store write and the broadcast
//! makes the room see events in the order they were persisted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct Sequencer {
    lanes: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of a project's lane
    pub async fn lane(&self, project_id: Uuid) -> OwnedMutexGuard<()> {
        let lane = {
            let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
            lanes.entry(project_id).or_default().clone()
        };
        lane.lock_owned().await
    }

    /// Drop a deleted project's lane
    pub fn forget(&self, project_id: Uuid) {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&project_id);
    }

    pub fn len(&self) -> usize {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
