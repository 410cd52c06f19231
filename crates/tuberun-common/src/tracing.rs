// Per-component trace sources.
// Every component logs through a named `Tracing` handed out by the `TraceManager`.

use chrono::Utc;
use tuberun_sdk::TraceWriter;

/// Trace event severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TraceEventType {
    Verbose,
    Information,
    Warning,
    Error,
}

impl std::fmt::Display for TraceEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceEventType::Verbose => write!(f, "VERB"),
            TraceEventType::Information => write!(f, "INFO"),
            TraceEventType::Warning => write!(f, "WARN"),
            TraceEventType::Error => write!(f, "ERR "),
        }
    }
}

/// Configuration for trace output.
#[derive(Debug, Clone)]
pub struct TraceSetting {
    /// Minimum severity level to emit.
    pub level: TraceEventType,
    /// Whether to also print to stdout.
    pub print_to_stdout: bool,
}

impl Default for TraceSetting {
    fn default() -> Self {
        Self {
            level: TraceEventType::Verbose,
            print_to_stdout: false,
        }
    }
}

/// A named trace source. The name is attached to every event as the
/// `component` field.
#[derive(Debug, Clone)]
pub struct Tracing {
    name: String,
    setting: TraceSetting,
}

impl Tracing {
    pub fn new(name: impl Into<String>, setting: TraceSetting) -> Self {
        Self {
            name: name.into(),
            setting,
        }
    }

    fn trace(&self, event_type: TraceEventType, message: &str) {
        if event_type < self.setting.level {
            return;
        }

        let component = self.name.as_str();
        match event_type {
            TraceEventType::Error => tracing::error!(component, "{}", message),
            TraceEventType::Warning => tracing::warn!(component, "{}", message),
            TraceEventType::Information => tracing::info!(component, "{}", message),
            TraceEventType::Verbose => tracing::debug!(component, "{}", message),
        }

        if self.setting.print_to_stdout {
            println!(
                "[{}][{}] {}: {}",
                Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                component,
                event_type,
                message
            );
        }
    }

    /// Get the name of this trace source.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl TraceWriter for Tracing {
    fn info(&self, message: &str) {
        self.trace(TraceEventType::Information, message);
    }

    fn verbose(&self, message: &str) {
        self.trace(TraceEventType::Verbose, message);
    }

    fn warning(&self, message: &str) {
        self.trace(TraceEventType::Warning, message);
    }

    fn error(&self, message: &str) {
        self.trace(TraceEventType::Error, message);
    }
}

/// Hands out named trace sources sharing one setting.
#[derive(Debug, Clone, Default)]
pub struct TraceManager {
    default_setting: TraceSetting,
}

impl TraceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_setting(setting: TraceSetting) -> Self {
        Self {
            default_setting: setting,
        }
    }

    /// Get (create) a named trace source.
    pub fn get(&self, name: &str) -> Tracing {
        Tracing::new(name, self.default_setting.clone())
    }

    pub fn setting(&self) -> &TraceSetting {
        &self.default_setting
    }
}
