// MemoryQueue: an in-process JobQueue with beanstalkd-like reservation semantics.
// Test double, built only with the `test-util` feature. Clones share state.

use crate::job_queue::{JobQueue, PutOptions, QueueError, ReservedJob};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How often a blocked `reserve` re-checks for ready jobs.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Default)]
struct State {
    next_id: u64,
    ready: VecDeque<u64>,
    bodies: HashMap<u64, Vec<u8>>,
    reserved: HashMap<u64, Instant>,
    deleted: Vec<u64>,
    buried: Vec<u64>,
    deliveries: HashMap<u64, u32>,
    reserve_calls: usize,
}

impl State {
    /// Put every reservation whose visibility window elapsed back in line.
    fn expire_reservations(&mut self, now: Instant) {
        let mut expired: Vec<u64> = self
            .reserved
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired.sort_unstable();
        for id in expired {
            self.reserved.remove(&id);
            self.ready.push_back(id);
        }
    }

    fn take_ready(&mut self, visibility: Duration) -> Option<ReservedJob> {
        let id = self.ready.pop_front()?;
        let body = self.bodies.get(&id).cloned().unwrap_or_default();
        self.reserved.insert(id, Instant::now() + visibility);
        *self.deliveries.entry(id).or_insert(0) += 1;
        Some(ReservedJob { id, body })
    }

    fn release_reserved(&mut self, id: u64) -> Result<(), QueueError> {
        if self.reserved.remove(&id).is_none() {
            return Err(QueueError::NotFound(id));
        }
        Ok(())
    }
}

/// In-memory queue. A reserved job that is neither deleted nor buried is
/// handed out again once `visibility` has elapsed.
#[derive(Clone)]
pub struct MemoryQueue {
    state: Arc<Mutex<State>>,
    visibility: Duration,
}

impl MemoryQueue {
    pub fn new(visibility: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_id: 1,
                ..State::default()
            })),
            visibility,
        }
    }

    /// Enqueue a body directly, returning its id.
    pub fn push(&self, body: impl Into<Vec<u8>>) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.bodies.insert(id, body.into());
        state.ready.push_back(id);
        id
    }

    pub fn deleted_ids(&self) -> Vec<u64> {
        self.state.lock().deleted.clone()
    }

    pub fn buried_ids(&self) -> Vec<u64> {
        self.state.lock().buried.clone()
    }

    pub fn is_deleted(&self, id: u64) -> bool {
        self.state.lock().deleted.contains(&id)
    }

    /// How many times `id` has been handed out by `reserve`.
    pub fn delivery_count(&self, id: u64) -> u32 {
        self.state.lock().deliveries.get(&id).copied().unwrap_or(0)
    }

    /// Total number of `reserve` calls issued against this queue.
    pub fn reserve_calls(&self) -> usize {
        self.state.lock().reserve_calls
    }

    pub fn ready_len(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn reserved_len(&self) -> usize {
        self.state.lock().reserved.len()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn reserve(&mut self, timeout: Duration) -> Result<Option<ReservedJob>, QueueError> {
        let deadline = Instant::now() + timeout;
        self.state.lock().reserve_calls += 1;

        loop {
            let now = Instant::now();
            {
                let mut state = self.state.lock();
                state.expire_reservations(now);
                if let Some(job) = state.take_ready(self.visibility) {
                    return Ok(Some(job));
                }
            }

            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn delete(&mut self, id: u64) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        state.release_reserved(id)?;
        state.bodies.remove(&id);
        state.deleted.push(id);
        Ok(())
    }

    async fn bury(&mut self, id: u64) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        state.release_reserved(id)?;
        state.buried.push(id);
        Ok(())
    }

    async fn put(&mut self, body: &[u8], _options: PutOptions) -> Result<u64, QueueError> {
        Ok(self.push(body))
    }
}
