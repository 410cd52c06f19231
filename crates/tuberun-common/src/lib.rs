// tuberun-common: Shared services and infrastructure for the runner and the emitter.
// Depends on `tuberun-sdk`.

pub mod beanstalk;
pub mod command_request;
pub mod constants;
pub mod host_context;
pub mod job_queue;
pub mod logging;
#[cfg(any(test, feature = "test-util"))]
pub mod memory_queue;
pub mod tracing;

// ---------------------------------------------------------------------------
// Re-exports for convenient access
// ---------------------------------------------------------------------------

pub use beanstalk::BeanstalkClient;
pub use command_request::{CommandRequest, DecodeError};
pub use host_context::{HostContext, ShutdownReason};
pub use job_queue::{JobQueue, PutOptions, QueueError, ReservedJob};
#[cfg(any(test, feature = "test-util"))]
pub use memory_queue::MemoryQueue;
pub use crate::tracing::{TraceEventType, TraceManager, TraceSetting, Tracing};
