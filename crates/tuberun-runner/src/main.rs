// Entry point for the tuberun runner process.
//
// Parses the command line, installs logging, creates a HostContext and
// delegates to the Runner.

use clap::Parser;
use tuberun_common::constants;
use tuberun_common::host_context::HostContext;
use tuberun_common::logging;

use tuberun_runner::command_settings::CommandSettings;
use tuberun_runner::runner::Runner;

fn main() {
    let settings = CommandSettings::parse();
    logging::init(settings.log_format.into());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    let exit_code = runtime.block_on(run(settings));

    // Exit without waiting on launch tasks that are still running.
    std::process::exit(exit_code);
}

async fn run(settings: CommandSettings) -> i32 {
    tracing::info!("tuberun {} starting.", env!("CARGO_PKG_VERSION"));

    let host_context = HostContext::new("Runner");
    let runner = Runner::new(host_context, settings);

    match runner.run().await {
        Ok(exit_code) => {
            tracing::info!("Runner exiting with code {}", exit_code);
            exit_code
        }
        Err(e) => {
            tracing::error!("Runner failed with error: {:#}", e);
            constants::return_code::TERMINATED_ERROR
        }
    }
}
