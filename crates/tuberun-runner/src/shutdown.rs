// ShutdownCoordinator: turns the first interrupt into a shutdown request on
// the HostContext. Running reserves and commands are not interrupted.

use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tuberun_common::{HostContext, ShutdownReason};
use tuberun_sdk::TraceWriter;

pub struct ShutdownCoordinator {
    context: Arc<HostContext>,
}

impl ShutdownCoordinator {
    pub fn new(context: Arc<HostContext>) -> Self {
        Self { context }
    }

    /// Request shutdown with `reason` once `signal` resolves.
    ///
    /// The task resolves to `true` if it was the one that initiated shutdown.
    /// A signal that fails to install is logged and never fires.
    pub fn watch<F>(&self, signal: F, reason: ShutdownReason) -> JoinHandle<bool>
    where
        F: Future<Output = io::Result<()>> + Send + 'static,
    {
        let context = self.context.clone();
        tokio::spawn(async move {
            let trace = context.get_trace("ShutdownCoordinator");
            match signal.await {
                Ok(()) => {
                    trace.info("Received interrupt signal; finishing polling session.");
                    context.shutdown(reason)
                }
                Err(e) => {
                    trace.warning(&format!("Unable to listen for {reason} signal: {e}"));
                    false
                }
            }
        })
    }

    /// Watch Ctrl-C, and SIGTERM on unix.
    pub fn install(&self) -> Vec<JoinHandle<bool>> {
        let mut handles = vec![self.watch(tokio::signal::ctrl_c(), ShutdownReason::UserCancelled)];

        #[cfg(unix)]
        handles.push(self.watch(
            async {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                sigterm.recv().await;
                Ok(())
            },
            ShutdownReason::OperatingSystemShutdown,
        ));

        handles
    }
}
