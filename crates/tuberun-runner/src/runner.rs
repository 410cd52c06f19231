// Runner: top-level orchestration for the `tuberun` binary.
// Load the registry, connect to the tube, watch for interrupts, then hand
// control to the dispatcher until shutdown.

use anyhow::{Context, Result};
use std::sync::Arc;
use tuberun_common::constants;
use tuberun_common::host_context::HostContext;
use tuberun_common::tracing::Tracing;
use tuberun_common::{BeanstalkClient, JobQueue};
use tuberun_sdk::TraceWriter;

use crate::command_registry::CommandRegistry;
use crate::command_settings::CommandSettings;
use crate::concurrency_limiter::ConcurrencyLimiter;
use crate::dispatcher::{DispatchSummary, Dispatcher, DispatcherOptions};
use crate::shutdown::ShutdownCoordinator;

pub struct Runner {
    context: Arc<HostContext>,
    trace: Tracing,
    settings: CommandSettings,
}

impl Runner {
    pub fn new(context: Arc<HostContext>, settings: CommandSettings) -> Self {
        let trace = context.get_trace("Runner");
        Self {
            context,
            trace,
            settings,
        }
    }

    /// Run until interrupted. Startup failures are returned as errors; a
    /// normal shutdown returns the success exit code.
    pub async fn run(&self) -> Result<i32> {
        let registry = CommandRegistry::load(&self.settings.commands)?;
        self.trace.info(&format!(
            "Loaded {} command(s) from '{}': {}",
            registry.len(),
            self.settings.commands.display(),
            registry.names().join(", ")
        ));

        let queue = BeanstalkClient::open_tube(&self.settings.source, &self.settings.queue)
            .await
            .with_context(|| {
                format!(
                    "Couldn't connect to source queue '{}' at {}",
                    self.settings.queue, self.settings.source
                )
            })?;
        self.trace.info(&format!(
            "Connected to beanstalkd at {}, watching tube '{}'",
            self.settings.source, self.settings.queue
        ));

        ShutdownCoordinator::new(self.context.clone()).install();

        self.dispatch_with(queue, Arc::new(registry)).await;
        Ok(constants::return_code::SUCCESS)
    }

    /// Drive a dispatcher over `queue` until the context's shutdown token is
    /// cancelled.
    pub async fn dispatch_with<Q: JobQueue>(
        &self,
        queue: Q,
        registry: Arc<CommandRegistry>,
    ) -> DispatchSummary {
        let options = DispatcherOptions {
            bury_after: self.settings.bury_after,
            drain: self.settings.drain,
            ..DispatcherOptions::default()
        };
        let trace: Arc<dyn TraceWriter> = Arc::new(self.context.get_trace("Dispatcher"));
        let mut dispatcher = Dispatcher::new(
            queue,
            registry,
            ConcurrencyLimiter::new(self.settings.limit),
            trace,
            options,
        );

        let summary = dispatcher.run(self.context.shutdown_token()).await;
        self.trace.info(&format!(
            "Dispatch finished: {} launched, {} invalid, {} undecodable, {} buried, {} transport error(s)",
            summary.launched,
            summary.invalid,
            summary.decode_failed,
            summary.buried,
            summary.transport_errors
        ));
        summary
    }
}
