// Constants shared by the runner and the emitter.

use std::time::Duration;

/// Defaults for the runner and emitter command lines.
pub mod defaults {
    /// Maximum number of jobs running in parallel.
    pub const LIMIT: usize = 2;
    /// Location of the command registry file.
    pub const COMMAND_FILE: &str = "data/commands.json";
    /// Tube to pull from / push to.
    pub const QUEUE: &str = "default";
    /// Network address of the beanstalkd instance.
    pub const SOURCE: &str = "127.0.0.1:11300";
}

/// Queue interaction parameters.
pub mod queue {
    use super::Duration;

    /// How long a single reserve call may block the dispatch loop.
    pub const RESERVE_TIMEOUT: Duration = Duration::from_secs(2);

    /// Priority used when enqueuing a command request.
    pub const PUT_PRIORITY: u32 = 1;

    /// Ready delay used when enqueuing a command request.
    pub const PUT_DELAY: Duration = Duration::ZERO;

    /// Time-to-run used when enqueuing a command request. A reserved job that
    /// is not deleted within this window is handed out again.
    pub const PUT_TTR: Duration = Duration::from_secs(2 * 60 * 60);

    /// Priority assigned to jobs buried by the runner.
    pub const BURY_PRIORITY: u32 = 1;

    /// Tube every beanstalkd connection watches on connect.
    pub const DEFAULT_TUBE: &str = "default";

    /// Largest job body read off the wire (beanstalkd's default `-z`).
    pub const MAX_JOB_SIZE: usize = 65_535;
}

/// Process exit codes.
pub mod return_code {
    pub const SUCCESS: i32 = 0;
    pub const TERMINATED_ERROR: i32 = 1;
}

/// Environment variable names.
pub mod variables {
    pub const LIMIT: &str = "TUBERUN_LIMIT";
    pub const COMMANDS: &str = "TUBERUN_COMMANDS";
    pub const QUEUE: &str = "TUBERUN_QUEUE";
    pub const SOURCE: &str = "TUBERUN_SOURCE";
    pub const DRAIN: &str = "TUBERUN_DRAIN";
    pub const BURY_AFTER: &str = "TUBERUN_BURY_AFTER";
    pub const LOG_FORMAT: &str = "TUBERUN_LOG_FORMAT";
    pub const PRINT_LOG_TO_STDOUT: &str = "TUBERUN_PRINT_LOG_TO_STDOUT";
}
