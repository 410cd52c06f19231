// Process-wide tracing subscriber setup shared by the runner and the emitter.

use tracing_subscriber::EnvFilter;

/// Output format of the process log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Text,
    Json,
}

/// Build the filter: `RUST_LOG` when set, otherwise `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(output: LogOutput) {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());
    let _ = match output {
        LogOutput::Text => builder.try_init(),
        LogOutput::Json => builder.json().try_init(),
    };
}
