// HostContext: the process-wide application context.
// Owns trace sources and the single shutdown signal shared by every task.

use crate::constants;
use crate::tracing::{TraceManager, TraceSetting, Tracing};

use parking_lot::Mutex;
use std::env;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tuberun_sdk::TraceWriter;

/// The reason the process is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    UserCancelled,
    OperatingSystemShutdown,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::UserCancelled => write!(f, "UserCancelled"),
            ShutdownReason::OperatingSystemShutdown => write!(f, "OperatingSystemShutdown"),
        }
    }
}

/// Application context shared by the dispatch loop, the launch tasks and the
/// shutdown watcher.
///
/// The shutdown token is the only "keep polling" state in the process. It is
/// written once and observed by everyone, so no unsynchronized flag exists.
pub struct HostContext {
    /// The host type string (e.g. "Runner", "Emit").
    host_type: String,

    /// Cancelled exactly once when shutdown is requested.
    shutdown_token: CancellationToken,

    /// Reason recorded by the first shutdown request.
    shutdown_reason: Mutex<Option<ShutdownReason>>,

    trace_manager: TraceManager,
}

impl HostContext {
    /// Create a new `HostContext`. Trace output also goes to stdout when
    /// `TUBERUN_PRINT_LOG_TO_STDOUT` is truthy.
    pub fn new(host_type: impl Into<String>) -> Arc<Self> {
        let print_to_stdout = env::var(constants::variables::PRINT_LOG_TO_STDOUT)
            .ok()
            .and_then(|v| parse_bool(&v))
            .unwrap_or(false);

        Self::with_setting(
            host_type,
            TraceSetting {
                print_to_stdout,
                ..TraceSetting::default()
            },
        )
    }

    /// Create a `HostContext` with an explicit trace setting.
    pub fn with_setting(host_type: impl Into<String>, setting: TraceSetting) -> Arc<Self> {
        Arc::new(Self {
            host_type: host_type.into(),
            shutdown_token: CancellationToken::new(),
            shutdown_reason: Mutex::new(None),
            trace_manager: TraceManager::with_setting(setting),
        })
    }

    pub fn host_type(&self) -> &str {
        &self.host_type
    }

    /// Get a named trace source.
    pub fn get_trace(&self, name: &str) -> Tracing {
        self.trace_manager.get(name)
    }

    /// The token cancelled on shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// The reason recorded by the first shutdown request, if any.
    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        *self.shutdown_reason.lock()
    }

    /// Request shutdown. Only the first call records its reason and cancels
    /// the token; later calls are ignored. Returns whether this call was the
    /// one that initiated shutdown.
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        {
            let mut recorded = self.shutdown_reason.lock();
            if recorded.is_some() {
                return false;
            }
            *recorded = Some(reason);
        }

        self.get_trace("HostContext")
            .info(&format!("{} will be shut down for {}", self.host_type, reason));
        self.shutdown_token.cancel();
        true
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
