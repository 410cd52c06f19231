// EmitSettings: emitter command line.

use clap::Parser;
use tuberun_common::constants::{defaults, variables};

/// Enqueue a request for a runner to execute NAME with PARAMs.
#[derive(Debug, Clone, Parser)]
#[command(name = "tube-emit", version)]
pub struct EmitSettings {
    /// The name of the queue the request is pushed to.
    #[arg(long, env = variables::QUEUE, default_value = defaults::QUEUE)]
    pub queue: String,

    /// The network address of the beanstalkd instance.
    #[arg(long, env = variables::SOURCE, default_value = defaults::SOURCE)]
    pub source: String,

    /// Everything after `--`: the command name followed by its parameters.
    #[arg(last = true, value_name = "NAME [PARAM]...")]
    pub forward: Vec<String>,
}
