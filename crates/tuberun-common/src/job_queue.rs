// JobQueue: the queue-service contract consumed by the dispatcher and the emitter.

use crate::constants;
use async_trait::async_trait;
use std::time::Duration;

/// A job claimed from the queue. It stays owned by the queue service until
/// it is deleted; if it is not, the service hands it out again once its
/// time-to-run elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedJob {
    pub id: u64,
    pub body: Vec<u8>,
}

/// Parameters for enqueuing a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    pub priority: u32,
    pub delay: Duration,
    pub ttr: Duration,
}

impl Default for PutOptions {
    /// Priority 1, no delay, two-hour time-to-run.
    fn default() -> Self {
        Self {
            priority: constants::queue::PUT_PRIORITY,
            delay: constants::queue::PUT_DELAY,
            ttr: constants::queue::PUT_TTR,
        }
    }
}

/// Errors reported by a queue client.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue server closed the connection")]
    ConnectionClosed,
    #[error("job {0} not found")]
    NotFound(u64),
    #[error("job {0} was buried by the server on insert")]
    BuriedOnPut(u64),
    #[error("job body is larger than the server accepts")]
    JobTooBig,
    #[error("job {id} has a {len} byte body; refusing to read it")]
    OversizedJob { id: u64, len: usize },
    #[error("queue server is draining and refuses new jobs")]
    Draining,
    #[error("invalid tube name '{0}'")]
    InvalidTubeName(String),
    #[error("queue server error: {0}")]
    Server(String),
    #[error("unexpected response from queue server: '{0}'")]
    UnexpectedResponse(String),
}

/// The queue operations tuberun needs.
///
/// Implementations are owned by a single task; every call takes `&mut self`.
#[async_trait]
pub trait JobQueue: Send {
    /// Block up to `timeout` for a job. `Ok(None)` means nothing arrived.
    async fn reserve(&mut self, timeout: Duration) -> Result<Option<ReservedJob>, QueueError>;

    /// Permanently acknowledge a job.
    async fn delete(&mut self, id: u64) -> Result<(), QueueError>;

    /// Park a reserved job so it is never handed out again until kicked.
    async fn bury(&mut self, id: u64) -> Result<(), QueueError>;

    /// Enqueue a job body, returning its id.
    async fn put(&mut self, body: &[u8], options: PutOptions) -> Result<u64, QueueError>;
}
