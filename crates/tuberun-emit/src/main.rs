// Entry point for tube-emit.

use anyhow::{Context, Result};
use clap::Parser;
use tuberun_common::constants;
use tuberun_common::host_context::HostContext;
use tuberun_common::logging::{self, LogOutput};
use tuberun_common::BeanstalkClient;

use tuberun_emit::emit_settings::EmitSettings;
use tuberun_emit::emitter;

fn main() {
    let settings = EmitSettings::parse();
    logging::init(LogOutput::Text);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    let exit_code = match runtime.block_on(run(settings)) {
        Ok(_) => constants::return_code::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            constants::return_code::TERMINATED_ERROR
        }
    };

    std::process::exit(exit_code);
}

async fn run(settings: EmitSettings) -> Result<u64> {
    let request = emitter::request_from_forwarded(&settings.forward)?;

    let context = HostContext::new("Emit");
    let trace = context.get_trace("Emitter");

    let mut queue = BeanstalkClient::connect(&settings.source)
        .await
        .context("Couldn't connect to source queue")?;
    queue
        .use_tube(&settings.queue)
        .await
        .with_context(|| format!("Couldn't use tube '{}'", settings.queue))?;

    emitter::emit(&mut queue, &request, &trace).await
}
