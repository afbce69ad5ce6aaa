/// A bound on the number of concurrently live connections, standing in for
/// the source's fixed-size connection-object slab (§9). A `Semaphore`
/// gives the same fail-closed behavior -- acquisition fails rather than
/// growing unbounded -- without needing an explicit free-list, and releases
/// its slot via `Drop` so a slot can't be leaked on any exit path, panics
/// included.
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_POOL_SIZE: usize = 64;

#[derive(Clone)]
pub struct ConnectionPool {
    semaphore: Arc<Semaphore>,
}

impl ConnectionPool {
    pub fn new(size: usize) -> ConnectionPool {
        ConnectionPool {
            semaphore: Arc::new(Semaphore::new(size)),
        }
    }

    /// Reserve a slot for one connection, or `None` if the pool is
    /// currently exhausted. Never blocks -- a full pool must reject the
    /// accepted socket immediately (§4.1), not queue behind it.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
