//! Guards against two concurrent delivery attempts for the same job.

use crate::job::JobId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Registry of job ids with a delivery currently running.
///
/// Cloning shares the registry; the dispatcher and the retry coordinator must
/// be handed clones of the same one.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<JobId>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `id` until the returned guard is dropped. `None` if already claimed.
    pub fn claim(&self, id: JobId) -> Option<InFlightGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(id) {
            return None;
        }
        Some(InFlightGuard {
            id,
            ids: Arc::clone(&self.ids),
        })
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    id: JobId,
    ids: Arc<Mutex<HashSet<JobId>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
