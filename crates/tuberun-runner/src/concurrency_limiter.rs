// ConcurrencyLimiter: caps how many commands run at once.
// A slot is taken before a job is acknowledged and released when its process
// ends, so at most `capacity` commands are ever in flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const NEVER_CLOSED: &str = "limiter semaphore is never closed";

/// Counting gate shared between the dispatcher and launch tasks.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    high_water: Arc<AtomicUsize>,
}

/// Ownership of one execution slot. Dropping it frees the slot, on every
/// exit path of the task that holds it.
#[derive(Debug)]
pub struct LimiterSlot {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    /// A limiter with `capacity` slots. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            high_water: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot. FIFO among waiters.
    pub async fn acquire(&self) -> LimiterSlot {
        // The semaphore is private and `close` is never called on it.
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect(NEVER_CLOSED);
        self.high_water.fetch_max(self.in_flight(), Ordering::SeqCst);
        LimiterSlot { _permit: permit }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// The largest number of slots held at the same time so far.
    pub fn high_water_mark(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    /// Resolve once every slot has been returned.
    pub async fn wait_idle(&self) {
        let permits = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        let _all = self
            .semaphore
            .acquire_many(permits)
            .await
            .expect(NEVER_CLOSED);
    }
}
