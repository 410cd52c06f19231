// Dispatcher: the runner's main loop.
// Reserve a job, decode it, resolve it against the registry, take a slot,
// launch, then acknowledge. One dispatcher owns one queue connection.

use crate::command_registry::{CommandRegistry, RuntimeCommand};
use crate::concurrency_limiter::ConcurrencyLimiter;
use crate::error_throttler::ErrorThrottler;
use crate::process_launcher::ProcessLauncher;
use crate::rejection_ledger::{self, RejectionLedger};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tuberun_common::constants;
use tuberun_common::{CommandRequest, JobQueue, QueueError, ReservedJob};
use tuberun_sdk::TraceWriter;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Running,
    Draining,
    Stopped,
}

/// What happened to one reserved job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The command was started and the job deleted (or the delete was
    /// attempted and logged).
    Launched { job_id: u64, command: RuntimeCommand },
    /// The requested name is not in the registry. The job is left reserved.
    InvalidCommand { job_id: u64, name: String },
    /// The body is not a command request. The job is left reserved.
    DecodeFailed { job_id: u64, reason: String },
    /// The job was rejected `rejections` times and has been buried.
    Buried { job_id: u64, rejections: u32 },
}

/// Result of a single reserve-and-handle step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The reserve timed out with nothing to do.
    Idle,
    TransportError(String),
    Dispatched(DispatchOutcome),
}

/// Counters accumulated over a dispatch session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub launched: u64,
    pub invalid: u64,
    pub decode_failed: u64,
    pub buried: u64,
    pub transport_errors: u64,
}

#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub reserve_timeout: Duration,
    /// Bury a job once this runner has rejected it this many times.
    pub bury_after: Option<u32>,
    /// How many distinct rejected job ids are counted at once.
    pub max_tracked_rejections: usize,
    /// Wait for running commands before `run` returns.
    pub drain: bool,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            reserve_timeout: constants::queue::RESERVE_TIMEOUT,
            bury_after: None,
            max_tracked_rejections: rejection_ledger::DEFAULT_CAPACITY,
            drain: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher<Q: JobQueue> {
    queue: Q,
    registry: Arc<CommandRegistry>,
    limiter: ConcurrencyLimiter,
    launcher: ProcessLauncher,
    trace: Arc<dyn TraceWriter>,
    options: DispatcherOptions,
    state: DispatcherState,
    /// Rejected deliveries per job id. Only tracked when `bury_after` is set.
    rejections: RejectionLedger,
    throttler: ErrorThrottler,
    summary: DispatchSummary,
}

impl<Q: JobQueue> Dispatcher<Q> {
    pub fn new(
        queue: Q,
        registry: Arc<CommandRegistry>,
        limiter: ConcurrencyLimiter,
        trace: Arc<dyn TraceWriter>,
        options: DispatcherOptions,
    ) -> Self {
        Self {
            queue,
            registry,
            limiter,
            launcher: ProcessLauncher::new(trace.clone()),
            trace,
            rejections: RejectionLedger::new(options.max_tracked_rejections),
            options,
            state: DispatcherState::Running,
            throttler: ErrorThrottler::new(),
            summary: DispatchSummary::default(),
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn summary(&self) -> &DispatchSummary {
        &self.summary
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Number of job ids whose rejections are currently being counted.
    pub fn tracked_rejections(&self) -> usize {
        self.rejections.len()
    }

    /// Reserve one job and handle it.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let job = match self.queue.reserve(self.options.reserve_timeout).await {
            Ok(Some(job)) => job,
            Ok(None) => return PollOutcome::Idle,
            Err(QueueError::OversizedJob { id, len }) => {
                self.summary.decode_failed += 1;
                self.trace
                    .warning(&format!("Job {id} has a {len} byte body; not reading it"));
                let outcome = DispatchOutcome::DecodeFailed {
                    job_id: id,
                    reason: format!("body of {len} bytes is too large"),
                };
                return PollOutcome::Dispatched(self.reject(id, outcome).await);
            }
            Err(e) => {
                self.summary.transport_errors += 1;
                self.trace.warning(&format!(
                    "Failed to reserve a job from the queue (consecutive error {}): {e}",
                    self.throttler.consecutive_errors() + 1
                ));
                return PollOutcome::TransportError(e.to_string());
            }
        };

        PollOutcome::Dispatched(self.dispatch(job).await)
    }

    async fn dispatch(&mut self, job: ReservedJob) -> DispatchOutcome {
        let request = match CommandRequest::decode(&job.body) {
            Ok(request) => request,
            Err(e) => {
                self.summary.decode_failed += 1;
                self.trace
                    .warning(&format!("Could not decode job {}: {}", job.id, e));
                let outcome = DispatchOutcome::DecodeFailed {
                    job_id: job.id,
                    reason: e.to_string(),
                };
                return self.reject(job.id, outcome).await;
            }
        };

        let Some(command) = self.registry.resolve(&request) else {
            self.summary.invalid += 1;
            self.trace
                .warning(&format!("Invalid command requested: '{request}'"));
            let outcome = DispatchOutcome::InvalidCommand {
                job_id: job.id,
                name: request.name,
            };
            return self.reject(job.id, outcome).await;
        };

        let slot = self.limiter.acquire().await;

        self.trace
            .info(&format!("Executing requested command '{command}'"));
        self.launcher.launch(command.clone(), slot);
        self.summary.launched += 1;
        self.rejections.forget(job.id);

        if let Err(e) = self.queue.delete(job.id).await {
            self.trace
                .warning(&format!("Failed to delete job {}: {e}", job.id));
        }

        DispatchOutcome::Launched {
            job_id: job.id,
            command,
        }
    }

    /// Leave a rejected job for redelivery, or bury it once it has been
    /// rejected `bury_after` times.
    async fn reject(&mut self, job_id: u64, outcome: DispatchOutcome) -> DispatchOutcome {
        let Some(limit) = self.options.bury_after else {
            return outcome;
        };

        let rejections = self.rejections.record(job_id);
        if rejections < limit {
            return outcome;
        }

        match self.queue.bury(job_id).await {
            Ok(()) => {
                self.rejections.forget(job_id);
                self.summary.buried += 1;
                self.trace.warning(&format!(
                    "Buried job {job_id} after {rejections} rejected deliveries"
                ));
                DispatchOutcome::Buried { job_id, rejections }
            }
            Err(e) => {
                self.trace
                    .warning(&format!("Failed to bury job {job_id}: {e}"));
                outcome
            }
        }
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// The token is checked once per iteration, so a reserve already in
    /// progress runs to its timeout. Running commands are only awaited when
    /// the dispatcher was built with `drain`.
    pub async fn run(&mut self, shutdown: CancellationToken) -> DispatchSummary {
        self.trace.info(&format!(
            "Listening for command requests with {} execution slot(s)",
            self.limiter.capacity()
        ));

        loop {
            if shutdown.is_cancelled() {
                self.state = DispatcherState::Draining;
                self.trace.info("Shutting down runner...");
                break;
            }

            match self.poll_once().await {
                PollOutcome::TransportError(_) => {
                    self.throttler.increment_and_wait(&shutdown).await;
                }
                PollOutcome::Idle | PollOutcome::Dispatched(_) => self.throttler.reset(),
            }
        }

        let in_flight = self.limiter.in_flight();
        if self.options.drain {
            if in_flight > 0 {
                self.trace.info(&format!(
                    "Waiting for {in_flight} running command(s) to finish"
                ));
            }
            self.limiter.wait_idle().await;
        } else if in_flight > 0 {
            self.trace.info(&format!(
                "Exiting with {in_flight} command(s) still running"
            ));
        }

        self.state = DispatcherState::Stopped;
        self.summary.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_registry::CommandDefinition;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tuberun_common::{MemoryQueue, PutOptions};
    use tuberun_sdk::{CollectingTraceWriter, TraceLevel};

    fn registry(entries: &[(&str, &str)]) -> Arc<CommandRegistry> {
        Arc::new(
            CommandRegistry::from_definitions(entries.iter().map(|(name, path)| {
                CommandDefinition {
                    name: name.to_string(),
                    path: path.to_string(),
                    parameters: Vec::new(),
                }
            }))
            .unwrap(),
        )
    }

    fn body(name: &str, params: &[&str]) -> Vec<u8> {
        CommandRequest::new(name, params.iter().map(|p| p.to_string()).collect())
            .encode()
            .unwrap()
    }

    fn options(reserve_timeout: Duration) -> DispatcherOptions {
        DispatcherOptions {
            reserve_timeout,
            ..DispatcherOptions::default()
        }
    }

    fn dispatcher<Q: JobQueue>(
        queue: Q,
        registry: Arc<CommandRegistry>,
        limit: usize,
        trace: Arc<CollectingTraceWriter>,
        options: DispatcherOptions,
    ) -> Dispatcher<Q> {
        Dispatcher::new(queue, registry, ConcurrencyLimiter::new(limit), trace, options)
    }

    #[tokio::test]
    async fn valid_request_is_launched_and_deleted() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        let id = queue.push(body("echo", &["hello"]));
        let trace = Arc::new(CollectingTraceWriter::new());
        let mut dispatcher = dispatcher(
            queue.clone(),
            registry(&[("echo", "/bin/echo")]),
            2,
            trace.clone(),
            options(Duration::ZERO),
        );

        match dispatcher.poll_once().await {
            PollOutcome::Dispatched(DispatchOutcome::Launched { job_id, command }) => {
                assert_eq!(job_id, id);
                assert_eq!(command.to_string(), "echo hello");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(queue.is_deleted(id));

        dispatcher.limiter().wait_idle().await;
        assert_eq!(dispatcher.limiter().available(), 2);
        assert_eq!(
            trace.count_matching(TraceLevel::Info, "Executing requested command 'echo hello'"),
            1
        );
        assert_eq!(dispatcher.summary().launched, 1);
    }

    #[tokio::test]
    async fn unknown_command_is_never_deleted() {
        let queue = MemoryQueue::new(Duration::from_millis(10));
        let id = queue.push(body("ghost", &[]));
        let trace = Arc::new(CollectingTraceWriter::new());
        let mut dispatcher = dispatcher(
            queue.clone(),
            registry(&[]),
            2,
            trace.clone(),
            options(Duration::from_millis(500)),
        );

        for _ in 0..3 {
            assert_eq!(
                dispatcher.poll_once().await,
                PollOutcome::Dispatched(DispatchOutcome::InvalidCommand {
                    job_id: id,
                    name: "ghost".into()
                })
            );
        }

        assert!(!queue.is_deleted(id));
        assert_eq!(queue.delivery_count(id), 3);
        assert_eq!(
            trace.count_matching(TraceLevel::Warning, "Invalid command requested: 'ghost'"),
            3
        );
        assert_eq!(dispatcher.summary().invalid, 3);
    }

    #[tokio::test]
    async fn single_slot_serializes_launches() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        queue.push(body("nap", &["1"]));
        queue.push(body("nap", &["1"]));
        let trace = Arc::new(CollectingTraceWriter::new());
        let mut dispatcher = dispatcher(
            queue.clone(),
            registry(&[("nap", "/bin/sleep")]),
            1,
            trace,
            options(Duration::ZERO),
        );

        let start = Instant::now();
        assert!(matches!(
            dispatcher.poll_once().await,
            PollOutcome::Dispatched(DispatchOutcome::Launched { .. })
        ));
        assert!(start.elapsed() < Duration::from_millis(900));

        // The second launch has to wait for the first sleep to give back its slot.
        assert!(matches!(
            dispatcher.poll_once().await,
            PollOutcome::Dispatched(DispatchOutcome::Launched { .. })
        ));
        assert!(start.elapsed() >= Duration::from_millis(900));

        dispatcher.limiter().wait_idle().await;
        assert_eq!(dispatcher.limiter().high_water_mark(), 1);
        assert_eq!(queue.deleted_ids().len(), 2);
    }

    #[tokio::test]
    async fn delete_happens_before_command_finishes() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        let id = queue.push(body("nap", &["1"]));
        let mut dispatcher = dispatcher(
            queue.clone(),
            registry(&[("nap", "/bin/sleep")]),
            2,
            Arc::new(CollectingTraceWriter::new()),
            options(Duration::ZERO),
        );

        dispatcher.poll_once().await;
        assert!(queue.is_deleted(id));
        assert_eq!(dispatcher.limiter().in_flight(), 1);
        dispatcher.limiter().wait_idle().await;
    }

    #[tokio::test]
    async fn path_always_comes_from_registry() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        queue.push(br#"{"name":"echo","params":["hi"],"path":"/bin/rm"}"#.to_vec());
        let mut dispatcher = dispatcher(
            queue,
            registry(&[("echo", "/bin/echo")]),
            1,
            Arc::new(CollectingTraceWriter::new()),
            options(Duration::ZERO),
        );

        match dispatcher.poll_once().await {
            PollOutcome::Dispatched(DispatchOutcome::Launched { command, .. }) => {
                assert_eq!(command.path(), "/bin/echo");
                assert_eq!(command.params(), ["hi".to_string()]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        dispatcher.limiter().wait_idle().await;
    }

    #[tokio::test]
    async fn undecodable_body_is_retained() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        let id = queue.push("not a command request");
        let trace = Arc::new(CollectingTraceWriter::new());
        let mut dispatcher = dispatcher(
            queue.clone(),
            registry(&[("echo", "/bin/echo")]),
            1,
            trace.clone(),
            options(Duration::ZERO),
        );

        assert!(matches!(
            dispatcher.poll_once().await,
            PollOutcome::Dispatched(DispatchOutcome::DecodeFailed { job_id, .. }) if job_id == id
        ));
        assert!(!queue.is_deleted(id));
        assert_eq!(trace.count_matching(TraceLevel::Warning, "Could not decode job"), 1);
        assert_eq!(dispatcher.summary().decode_failed, 1);
    }

    #[tokio::test]
    async fn rejected_job_is_buried_after_limit() {
        let queue = MemoryQueue::new(Duration::from_millis(10));
        let id = queue.push(body("ghost", &[]));
        let mut dispatcher = dispatcher(
            queue.clone(),
            registry(&[]),
            1,
            Arc::new(CollectingTraceWriter::new()),
            DispatcherOptions {
                reserve_timeout: Duration::from_millis(500),
                bury_after: Some(2),
                ..DispatcherOptions::default()
            },
        );

        assert!(matches!(
            dispatcher.poll_once().await,
            PollOutcome::Dispatched(DispatchOutcome::InvalidCommand { .. })
        ));
        assert_eq!(
            dispatcher.poll_once().await,
            PollOutcome::Dispatched(DispatchOutcome::Buried {
                job_id: id,
                rejections: 2
            })
        );
        assert_eq!(queue.buried_ids(), vec![id]);
        assert!(!queue.is_deleted(id));
        assert_eq!(dispatcher.summary().buried, 1);
    }

    #[tokio::test]
    async fn empty_queue_is_idle() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        let mut dispatcher = dispatcher(
            queue,
            registry(&[]),
            1,
            Arc::new(CollectingTraceWriter::new()),
            options(Duration::from_millis(10)),
        );
        assert_eq!(dispatcher.poll_once().await, PollOutcome::Idle);
    }

    #[tokio::test]
    async fn no_reserve_after_shutdown() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        let mut dispatcher = dispatcher(
            queue.clone(),
            registry(&[]),
            1,
            Arc::new(CollectingTraceWriter::new()),
            options(Duration::from_millis(10)),
        );

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        dispatcher.run(shutdown).await;

        assert_eq!(queue.reserve_calls(), 0);
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }

    #[tokio::test]
    async fn run_stops_polling_once_cancelled() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        let mut dispatcher = dispatcher(
            queue.clone(),
            registry(&[]),
            1,
            Arc::new(CollectingTraceWriter::new()),
            options(Duration::from_millis(10)),
        );

        let shutdown = CancellationToken::new();
        let canceller = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                shutdown.cancel();
            })
        };
        dispatcher.run(shutdown).await;
        canceller.await.unwrap();

        let calls = queue.reserve_calls();
        assert!(calls > 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.reserve_calls(), calls);
    }

    #[tokio::test]
    async fn run_does_not_wait_for_running_commands() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        queue.push(body("nap", &["2"]));
        let mut dispatcher = dispatcher(
            queue.clone(),
            registry(&[("nap", "/bin/sleep")]),
            1,
            Arc::new(CollectingTraceWriter::new()),
            options(Duration::from_millis(10)),
        );

        let shutdown = CancellationToken::new();
        let canceller = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                shutdown.cancel();
            })
        };

        let start = Instant::now();
        let summary = dispatcher.run(shutdown).await;
        canceller.await.unwrap();

        assert_eq!(summary.launched, 1);
        assert!(start.elapsed() < Duration::from_millis(1500));
        assert_eq!(dispatcher.limiter().in_flight(), 1);
    }

    #[tokio::test]
    async fn drain_waits_for_running_commands() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        queue.push(body("nap", &["1"]));
        let mut dispatcher = dispatcher(
            queue.clone(),
            registry(&[("nap", "/bin/sleep")]),
            1,
            Arc::new(CollectingTraceWriter::new()),
            DispatcherOptions {
                reserve_timeout: Duration::from_millis(10),
                drain: true,
                ..DispatcherOptions::default()
            },
        );

        let shutdown = CancellationToken::new();
        let canceller = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                shutdown.cancel();
            })
        };

        let start = Instant::now();
        dispatcher.run(shutdown).await;
        canceller.await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(900));
        assert_eq!(dispatcher.limiter().in_flight(), 0);
    }

    #[tokio::test]
    async fn slots_never_exceed_limit_under_burst() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        for _ in 0..5 {
            queue.push(body("nap", &["0.3"]));
        }
        let mut dispatcher = dispatcher(
            queue.clone(),
            registry(&[("nap", "/bin/sleep")]),
            2,
            Arc::new(CollectingTraceWriter::new()),
            options(Duration::ZERO),
        );

        for _ in 0..5 {
            assert!(matches!(
                dispatcher.poll_once().await,
                PollOutcome::Dispatched(DispatchOutcome::Launched { .. })
            ));
            assert!(dispatcher.limiter().in_flight() <= 2);
        }
        dispatcher.limiter().wait_idle().await;

        assert_eq!(dispatcher.limiter().high_water_mark(), 2);
        assert_eq!(queue.deleted_ids().len(), 5);
    }

    #[tokio::test]
    async fn background_child_does_not_hold_slot() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        queue.push(body("bg", &["-c", "sleep 3 &"]));
        let mut dispatcher = dispatcher(
            queue,
            registry(&[("bg", "/bin/sh")]),
            1,
            Arc::new(CollectingTraceWriter::new()),
            options(Duration::ZERO),
        );

        let start = Instant::now();
        assert!(matches!(
            dispatcher.poll_once().await,
            PollOutcome::Dispatched(DispatchOutcome::Launched { .. })
        ));
        dispatcher.limiter().wait_idle().await;
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn rejection_counts_are_bounded() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        for _ in 0..1000 {
            queue.push(body("ghost", &[]));
        }
        let mut dispatcher = dispatcher(
            queue.clone(),
            registry(&[]),
            1,
            Arc::new(CollectingTraceWriter::new()),
            DispatcherOptions {
                reserve_timeout: Duration::ZERO,
                bury_after: Some(5),
                max_tracked_rejections: 100,
                ..DispatcherOptions::default()
            },
        );

        for _ in 0..1000 {
            assert!(matches!(
                dispatcher.poll_once().await,
                PollOutcome::Dispatched(DispatchOutcome::InvalidCommand { .. })
            ));
        }

        assert_eq!(dispatcher.tracked_rejections(), 100);
        assert!(queue.buried_ids().is_empty());
    }

    #[tokio::test]
    async fn rejections_are_not_tracked_without_bury_policy() {
        let queue = MemoryQueue::new(Duration::from_secs(60));
        queue.push(body("ghost", &[]));
        let mut dispatcher = dispatcher(
            queue,
            registry(&[]),
            1,
            Arc::new(CollectingTraceWriter::new()),
            options(Duration::ZERO),
        );

        dispatcher.poll_once().await;
        assert_eq!(dispatcher.tracked_rejections(), 0);
    }

    // -----------------------------------------------------------------------
    // Queue stubs
    // -----------------------------------------------------------------------

    struct BrokenQueue {
        reserve_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobQueue for BrokenQueue {
        async fn reserve(&mut self, _timeout: Duration) -> Result<Option<ReservedJob>, QueueError> {
            self.reserve_calls.fetch_add(1, Ordering::SeqCst);
            Err(QueueError::ConnectionClosed)
        }

        async fn delete(&mut self, id: u64) -> Result<(), QueueError> {
            Err(QueueError::NotFound(id))
        }

        async fn bury(&mut self, id: u64) -> Result<(), QueueError> {
            Err(QueueError::NotFound(id))
        }

        async fn put(&mut self, _body: &[u8], _options: PutOptions) -> Result<u64, QueueError> {
            Err(QueueError::ConnectionClosed)
        }
    }

    /// Hands out the same oversized job until it is buried.
    struct OversizedQueue {
        buried: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobQueue for OversizedQueue {
        async fn reserve(&mut self, _timeout: Duration) -> Result<Option<ReservedJob>, QueueError> {
            if self.buried.load(Ordering::SeqCst) > 0 {
                return Ok(None);
            }
            Err(QueueError::OversizedJob {
                id: 11,
                len: constants::queue::MAX_JOB_SIZE + 1,
            })
        }

        async fn delete(&mut self, id: u64) -> Result<(), QueueError> {
            Err(QueueError::NotFound(id))
        }

        async fn bury(&mut self, _id: u64) -> Result<(), QueueError> {
            self.buried.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn put(&mut self, _body: &[u8], _options: PutOptions) -> Result<u64, QueueError> {
            Err(QueueError::ConnectionClosed)
        }
    }

    /// Delivers from a memory queue but refuses every delete.
    struct UndeletableQueue(MemoryQueue);

    #[async_trait]
    impl JobQueue for UndeletableQueue {
        async fn reserve(&mut self, timeout: Duration) -> Result<Option<ReservedJob>, QueueError> {
            self.0.reserve(timeout).await
        }

        async fn delete(&mut self, _id: u64) -> Result<(), QueueError> {
            Err(QueueError::ConnectionClosed)
        }

        async fn bury(&mut self, id: u64) -> Result<(), QueueError> {
            self.0.bury(id).await
        }

        async fn put(&mut self, body: &[u8], options: PutOptions) -> Result<u64, QueueError> {
            self.0.put(body, options).await
        }
    }

    #[tokio::test]
    async fn transport_error_backoff_is_cancellable() {
        let reserve_calls = Arc::new(AtomicUsize::new(0));
        let trace = Arc::new(CollectingTraceWriter::new());
        let mut dispatcher = dispatcher(
            BrokenQueue {
                reserve_calls: reserve_calls.clone(),
            },
            registry(&[]),
            1,
            trace.clone(),
            options(Duration::from_millis(10)),
        );

        let shutdown = CancellationToken::new();
        let canceller = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                shutdown.cancel();
            })
        };

        let start = Instant::now();
        let summary = dispatcher.run(shutdown).await;
        canceller.await.unwrap();

        assert!(start.elapsed() < Duration::from_millis(900));
        assert_eq!(summary.transport_errors, 1);
        assert_eq!(reserve_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            trace.count_matching(TraceLevel::Warning, "(consecutive error 1)"),
            1
        );
    }

    #[tokio::test]
    async fn oversized_job_is_rejected_then_buried() {
        let buried = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = dispatcher(
            OversizedQueue {
                buried: buried.clone(),
            },
            registry(&[]),
            1,
            Arc::new(CollectingTraceWriter::new()),
            DispatcherOptions {
                reserve_timeout: Duration::ZERO,
                bury_after: Some(2),
                ..DispatcherOptions::default()
            },
        );

        assert!(matches!(
            dispatcher.poll_once().await,
            PollOutcome::Dispatched(DispatchOutcome::DecodeFailed { job_id: 11, .. })
        ));
        assert!(matches!(
            dispatcher.poll_once().await,
            PollOutcome::Dispatched(DispatchOutcome::Buried { job_id: 11, rejections: 2 })
        ));
        assert_eq!(buried.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.summary().transport_errors, 0);
        assert!(matches!(dispatcher.poll_once().await, PollOutcome::Idle));
    }

    #[tokio::test]
    async fn failed_delete_does_not_stop_launch() {
        let inner = MemoryQueue::new(Duration::from_secs(60));
        inner.push(body("echo", &["still runs"]));
        let trace = Arc::new(CollectingTraceWriter::new());
        let mut dispatcher = dispatcher(
            UndeletableQueue(inner),
            registry(&[("echo", "/bin/echo")]),
            1,
            trace.clone(),
            options(Duration::ZERO),
        );

        assert!(matches!(
            dispatcher.poll_once().await,
            PollOutcome::Dispatched(DispatchOutcome::Launched { .. })
        ));
        dispatcher.limiter().wait_idle().await;

        assert_eq!(trace.count_matching(TraceLevel::Warning, "Failed to delete job"), 1);
        assert_eq!(
            trace.count_matching(TraceLevel::Info, "Command 'echo still runs' finished"),
            1
        );
    }
}
