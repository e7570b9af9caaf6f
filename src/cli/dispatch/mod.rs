//! Map parsed command-line arguments to the action to run.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, push, ARG_DSN, ARG_PORT};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if policy or push provider arguments are inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .filter(|dsn| !dsn.trim().is_empty());

    let auth = auth::Options::parse(matches)?;
    let push = push::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        auth,
        push,
    }))
}
