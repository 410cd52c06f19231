// CommandSettings: runner command line, with environment variable fallbacks.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tuberun_common::constants::{defaults, variables};
use tuberun_common::logging::LogOutput;

/// Log output format selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl From<LogFormat> for LogOutput {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Text => LogOutput::Text,
            LogFormat::Json => LogOutput::Json,
        }
    }
}

/// Pull command requests from a beanstalkd tube and run the allow-listed
/// commands they name.
#[derive(Debug, Clone, Parser)]
#[command(name = "tuberun", version)]
pub struct CommandSettings {
    /// The maximum number of jobs to run in parallel.
    #[arg(long, env = variables::LIMIT, default_value_t = defaults::LIMIT, value_parser = parse_limit)]
    pub limit: usize,

    /// A file describing the list of commands.
    #[arg(long, env = variables::COMMANDS, default_value = defaults::COMMAND_FILE)]
    pub commands: PathBuf,

    /// The name of the queue that should be pulled from.
    #[arg(long, env = variables::QUEUE, default_value = defaults::QUEUE)]
    pub queue: String,

    /// The network address of the beanstalkd instance.
    #[arg(long, env = variables::SOURCE, default_value = defaults::SOURCE)]
    pub source: String,

    /// On shutdown, wait for running commands to finish before exiting.
    #[arg(long, env = variables::DRAIN)]
    pub drain: bool,

    /// Bury a job after this many rejected deliveries instead of letting it
    /// be redelivered forever.
    #[arg(long, env = variables::BURY_AFTER, value_parser = clap::value_parser!(u32).range(1..))]
    pub bury_after: Option<u32>,

    #[arg(long, env = variables::LOG_FORMAT, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

fn parse_limit(value: &str) -> Result<usize, String> {
    let limit: usize = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a positive integer"))?;
    if limit == 0 {
        return Err("limit must be at least 1".to_string());
    }
    Ok(limit)
}
