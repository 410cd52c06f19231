// tuberun-sdk: Foundation layer for the tuberun workspace.
// This crate has ZERO dependencies on other tuberun crates and provides the
// trace abstraction and the child-process invoker used by the runner.

pub mod process_invoker;
pub mod trace;

// Re-export commonly used items at crate root
pub use process_invoker::{ProcessExitCodeError, ProcessInvoker};
pub use trace::{CollectingTraceWriter, NullTraceWriter, TraceLevel, TraceWriter};
