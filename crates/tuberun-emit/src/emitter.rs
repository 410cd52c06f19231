// Emitter: turns forwarded arguments into a command request and enqueues it.

use anyhow::{Context, Result};
use tuberun_common::{CommandRequest, JobQueue, PutOptions};
use tuberun_sdk::TraceWriter;

/// The first forwarded argument is the command name, the rest are its
/// parameters, kept in order and unmodified.
pub fn request_from_forwarded(forward: &[String]) -> Result<CommandRequest> {
    match forward.split_first() {
        Some((name, params)) if !name.trim().is_empty() => {
            Ok(CommandRequest::new(name.clone(), params.to_vec()))
        }
        _ => anyhow::bail!("No command to forward found."),
    }
}

/// Put `request` on the queue's current tube with priority 1, no delay and
/// a two-hour time-to-run. Returns the new job id.
pub async fn emit<Q: JobQueue>(
    queue: &mut Q,
    request: &CommandRequest,
    trace: &dyn TraceWriter,
) -> Result<u64> {
    let body = request
        .encode()
        .context("Failed to encode command request")?;
    let id = queue
        .put(&body, PutOptions::default())
        .await
        .with_context(|| format!("Failed to enqueue '{request}'"))?;
    trace.info(&format!("Enqueued '{request}' as job {id}"));
    Ok(id)
}
