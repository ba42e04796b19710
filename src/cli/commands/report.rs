use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_REPORT_BOT_TOKEN: &str = "report-bot-token";
pub const ARG_REPORT_CHAT_ID: &str = "report-chat-id";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REPORT_BOT_TOKEN)
                .long(ARG_REPORT_BOT_TOKEN)
                .help("Telegram bot token used to report internal errors")
                .env("SHEKEL_REPORT_BOT_TOKEN")
                .hide_env_values(true)
                .requires(ARG_REPORT_CHAT_ID),
        )
        .arg(
            Arg::new(ARG_REPORT_CHAT_ID)
                .long(ARG_REPORT_CHAT_ID)
                .help("Telegram chat receiving error reports")
                .env("SHEKEL_REPORT_CHAT_ID")
                .requires(ARG_REPORT_BOT_TOKEN),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    /// Bot token and chat id; reports are disabled when absent.
    pub telegram: Option<(SecretString, String)>,
}

impl Options {
    /// # Errors
    /// Never fails for matches produced by [`with_args`].
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let token = matches.get_one::<String>(ARG_REPORT_BOT_TOKEN);
        let chat_id = matches.get_one::<String>(ARG_REPORT_CHAT_ID);
        let telegram = match (token, chat_id) {
            (Some(token), Some(chat_id)) => {
                Some((SecretString::from(token.clone()), chat_id.clone()))
            }
            _ => None,
        };
        Ok(Self { telegram })
    }
}
