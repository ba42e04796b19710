use crate::cli::{
    actions::{server::Args, Action},
    commands::{auth, email, report},
};
use anyhow::{Context, Result};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    Ok(Action::Server(Args {
        port,
        dsn,
        auth: auth::Options::parse(matches)?,
        email: email::Options::parse(matches)?,
        report: report::Options::parse(matches)?,
    }))
}
