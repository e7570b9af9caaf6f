use crate::cli::{actions::Action, commands, dispatch::handler, telemetry};
use anyhow::Result;

/// Parse arguments, initialize logging and return the action to run.
///
/// # Errors
/// Returns an error if telemetry cannot be initialized or the arguments do
/// not form a valid action.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    let verbosity_level = match matches
        .get_one::<u8>(commands::logging::ARG_VERBOSITY)
        .map_or(0, |&v| v)
    {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::WARN,
        2 => tracing::Level::INFO,
        3 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    telemetry::init(Some(verbosity_level))?;

    handler(&matches)
}
