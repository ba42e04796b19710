use anyhow::Result;
use clap::{Arg, ArgMatches, Command};

pub const ARG_REQUEST_TIMEOUT_SECONDS: &str = "request-timeout-seconds";
pub const ARG_SESSION_COOKIE_NAME: &str = "session-cookie-name";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_CODE_COOLDOWN_SECONDS: &str = "code-cooldown-seconds";
pub const ARG_CODE_TTL_SECONDS: &str = "code-ttl-seconds";
pub const ARG_CODE_MAX_ATTEMPTS: &str = "code-max-attempts";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    with_code_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REQUEST_TIMEOUT_SECONDS)
                .long(ARG_REQUEST_TIMEOUT_SECONDS)
                .help("Maximum time spent handling a single request")
                .env("SHEKEL_REQUEST_TIMEOUT_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SESSION_COOKIE_NAME)
                .long(ARG_SESSION_COOKIE_NAME)
                .help("Name of the session cookie")
                .env("SHEKEL_SESSION_COOKIE_NAME")
                .default_value("SessionID"),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session cookie Max-Age in seconds")
                .env("SHEKEL_SESSION_TTL_SECONDS")
                .default_value("31536000")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_code_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CODE_COOLDOWN_SECONDS)
                .long(ARG_CODE_COOLDOWN_SECONDS)
                .help("Minimum interval between codes sent to the same address")
                .env("SHEKEL_CODE_COOLDOWN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_CODE_TTL_SECONDS)
                .long(ARG_CODE_TTL_SECONDS)
                .help("How long a verification code stays valid")
                .env("SHEKEL_CODE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_CODE_MAX_ATTEMPTS)
                .long(ARG_CODE_MAX_ATTEMPTS)
                .help("Wrong submissions tolerated before a code is locked")
                .env("SHEKEL_CODE_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(i32).range(0..)),
        )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub request_timeout_seconds: u64,
    pub session_cookie_name: String,
    pub session_ttl_seconds: u64,
    pub code_cooldown_seconds: u64,
    pub code_ttl_seconds: u64,
    pub code_max_attempts: i32,
}

impl Options {
    /// # Errors
    /// Never fails for matches produced by [`with_args`]; kept fallible like the other option groups.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            request_timeout_seconds: matches
                .get_one::<u64>(ARG_REQUEST_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(30),
            session_cookie_name: matches
                .get_one::<String>(ARG_SESSION_COOKIE_NAME)
                .cloned()
                .unwrap_or_else(|| "SessionID".to_string()),
            session_ttl_seconds: matches
                .get_one::<u64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(31_536_000),
            code_cooldown_seconds: matches
                .get_one::<u64>(ARG_CODE_COOLDOWN_SECONDS)
                .copied()
                .unwrap_or(60),
            code_ttl_seconds: matches
                .get_one::<u64>(ARG_CODE_TTL_SECONDS)
                .copied()
                .unwrap_or(300),
            code_max_attempts: matches
                .get_one::<i32>(ARG_CODE_MAX_ATTEMPTS)
                .copied()
                .unwrap_or(5),
        })
    }
}
