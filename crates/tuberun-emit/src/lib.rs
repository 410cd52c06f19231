// tuberun-emit: producer side of tuberun.
// Builds a command request from the forwarded command line and puts it on a tube.

pub mod emit_settings;
pub mod emitter;
