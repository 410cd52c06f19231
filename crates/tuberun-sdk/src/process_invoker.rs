use crate::trace::TraceWriter;
use anyhow::{Context, Result};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// How long output forwarding may continue once the process has exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Error type for non-zero process exit codes.
#[derive(Debug, thiserror::Error)]
#[error("Exit code {exit_code} returned from process: file name '{file_name}', arguments '{arguments}'.")]
pub struct ProcessExitCodeError {
    pub exit_code: i32,
    pub file_name: String,
    pub arguments: String,
}

/// Spawns a child process, forwards its stdout/stderr lines to the trace at
/// verbose level, and waits for it to exit.
///
/// Arguments are passed to the executable verbatim; nothing is interpreted by
/// a shell.
pub struct ProcessInvoker {
    trace: Arc<dyn TraceWriter>,
}

impl ProcessInvoker {
    /// Create a new `ProcessInvoker` with the given trace writer.
    pub fn new(trace: Arc<dyn TraceWriter>) -> Self {
        Self { trace }
    }

    /// Run `file_name` with `arguments` and wait for it to finish.
    ///
    /// `label` prefixes every forwarded output line. When
    /// `require_exit_code_zero` is set, a non-zero exit is returned as a
    /// [`ProcessExitCodeError`].
    ///
    /// Returns the process exit code. A process killed by a signal reports
    /// `128 + signal` on unix.
    pub async fn execute(
        &self,
        label: &str,
        file_name: &str,
        arguments: &[String],
        require_exit_code_zero: bool,
    ) -> Result<i32> {
        if file_name.is_empty() {
            anyhow::bail!("Cannot start process for '{label}': empty file name");
        }

        let joined = arguments.join(" ");
        self.trace.verbose(&format!(
            "Starting process '{file_name}' with arguments '{joined}'"
        ));

        let start = std::time::Instant::now();
        let mut child = Command::new(file_name)
            .args(arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| {
                format!("Failed to start process '{file_name}' with arguments '{joined}'")
            })?;

        let pid = child.id().unwrap_or(0);
        self.trace
            .verbose(&format!("Process started with process id {pid}, waiting for process exit."));

        let stdout_task = child
            .stdout
            .take()
            .map(|s| self.forward_lines(s, format!("{label} stdout")));
        let stderr_task = child
            .stderr
            .take()
            .map(|s| self.forward_lines(s, format!("{label} stderr")));

        let status = child
            .wait()
            .await
            .with_context(|| format!("Failed to wait for process '{file_name}' ({pid})"))?;

        // A background child can inherit the pipes and hold them open long
        // after this process is gone. Forward what is already buffered, then
        // stop reading.
        let output_deadline = tokio::time::Instant::now() + OUTPUT_DRAIN_TIMEOUT;
        for mut task in [stdout_task, stderr_task].into_iter().flatten() {
            if tokio::time::timeout_at(output_deadline, &mut task).await.is_err() {
                task.abort();
                self.trace.verbose(&format!(
                    "Output of process {pid} is still open after exit; no longer forwarding it."
                ));
            }
        }

        let exit_code = exit_code_of(status);
        self.trace.verbose(&format!(
            "Finished process {pid} with exit code {exit_code}, and elapsed time {:.2?}.",
            start.elapsed()
        ));

        if exit_code != 0 && require_exit_code_zero {
            return Err(ProcessExitCodeError {
                exit_code,
                file_name: file_name.to_string(),
                arguments: joined,
            }
            .into());
        }

        Ok(exit_code)
    }

    fn forward_lines<R>(&self, stream: R, prefix: String) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let trace = self.trace.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                trace.verbose(&format!("[{prefix}] {line}"));
            }
        })
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .or_else(|| status.signal().map(|s| 128 + s))
            .unwrap_or(1)
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(1)
    }
}
