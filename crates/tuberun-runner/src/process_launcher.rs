// ProcessLauncher: runs one accepted command to completion on its own task.

use crate::command_registry::RuntimeCommand;
use crate::concurrency_limiter::LimiterSlot;

use std::sync::Arc;
use tokio::task::JoinHandle;
use tuberun_sdk::{ProcessInvoker, TraceWriter};

/// How a launched command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Success,
    /// Spawn error, non-zero exit or death by signal.
    Failure(String),
}

impl LaunchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LaunchOutcome::Success)
    }
}

#[derive(Clone)]
pub struct ProcessLauncher {
    trace: Arc<dyn TraceWriter>,
}

impl ProcessLauncher {
    pub fn new(trace: Arc<dyn TraceWriter>) -> Self {
        Self { trace }
    }

    /// Start `command` on a new task. The slot is held for as long as the
    /// process runs and is released when the task ends, whatever the outcome.
    pub fn launch(&self, command: RuntimeCommand, slot: LimiterSlot) -> JoinHandle<LaunchOutcome> {
        let launcher = self.clone();
        tokio::spawn(async move {
            let outcome = launcher.run(&command).await;
            drop(slot);
            outcome
        })
    }

    /// Run `command` in the current task and report how it ended. No retry.
    pub async fn run(&self, command: &RuntimeCommand) -> LaunchOutcome {
        let invoker = ProcessInvoker::new(self.trace.clone());
        match invoker
            .execute(command.name(), command.path(), command.params(), true)
            .await
        {
            Ok(_) => {
                self.trace
                    .info(&format!("Command '{}' finished successfully", command));
                LaunchOutcome::Success
            }
            Err(e) => {
                let reason = format!("{e:#}");
                self.trace
                    .warning(&format!("Warning [{}]: {}", command.name(), reason));
                LaunchOutcome::Failure(reason)
            }
        }
    }
}
