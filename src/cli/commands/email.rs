use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use url::Url;

pub const ARG_EMAIL_RELAY_URL: &str = "email-relay-url";
pub const ARG_EMAIL_RELAY_TOKEN: &str = "email-relay-token";
pub const ARG_EMAIL_FROM: &str = "email-from";
pub const ARG_EMAIL_FROM_NAME: &str = "email-from-name";
pub const ARG_EMAIL_SUBJECT: &str = "email-subject";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EMAIL_RELAY_URL)
                .long(ARG_EMAIL_RELAY_URL)
                .help("HTTP mail relay endpoint; codes are only logged when unset")
                .env("SHEKEL_EMAIL_RELAY_URL"),
        )
        .arg(
            Arg::new(ARG_EMAIL_RELAY_TOKEN)
                .long(ARG_EMAIL_RELAY_TOKEN)
                .help("Bearer token for the mail relay")
                .env("SHEKEL_EMAIL_RELAY_TOKEN")
                .hide_env_values(true)
                .requires(ARG_EMAIL_RELAY_URL),
        )
        .arg(
            Arg::new(ARG_EMAIL_FROM)
                .long(ARG_EMAIL_FROM)
                .help("Sender address for verification codes")
                .env("SHEKEL_EMAIL_FROM")
                .default_value("noreply@shekelrubl.co.il"),
        )
        .arg(
            Arg::new(ARG_EMAIL_FROM_NAME)
                .long(ARG_EMAIL_FROM_NAME)
                .help("Sender display name")
                .env("SHEKEL_EMAIL_FROM_NAME")
                .default_value("Shekel Rubl"),
        )
        .arg(
            Arg::new(ARG_EMAIL_SUBJECT)
                .long(ARG_EMAIL_SUBJECT)
                .help("Subject of verification code emails")
                .env("SHEKEL_EMAIL_SUBJECT")
                .default_value("Schekel Rubl Code"),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub relay_url: Option<Url>,
    pub relay_token: Option<SecretString>,
    pub from: String,
    pub from_name: String,
    pub subject: String,
}

impl Options {
    /// # Errors
    /// Returns an error if the relay URL does not parse.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let relay_url = matches
            .get_one::<String>(ARG_EMAIL_RELAY_URL)
            .map(|url| Url::parse(url).with_context(|| format!("invalid --{ARG_EMAIL_RELAY_URL}: {url}")))
            .transpose()?;
        let relay_token = matches
            .get_one::<String>(ARG_EMAIL_RELAY_TOKEN)
            .map(|token| SecretString::from(token.clone()));

        Ok(Self {
            relay_url,
            relay_token,
            from: matches
                .get_one::<String>(ARG_EMAIL_FROM)
                .cloned()
                .unwrap_or_default(),
            from_name: matches
                .get_one::<String>(ARG_EMAIL_FROM_NAME)
                .cloned()
                .unwrap_or_default(),
            subject: matches
                .get_one::<String>(ARG_EMAIL_SUBJECT)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn relay_is_optional() -> Result<()> {
        temp_env::with_vars(
            [
                ("SHEKEL_EMAIL_RELAY_URL", None::<&str>),
                ("SHEKEL_EMAIL_RELAY_TOKEN", None::<&str>),
            ],
            || -> Result<()> {
                let matches = with_args(Command::new("shekel")).try_get_matches_from(vec!["shekel"])?;
                let options = Options::parse(&matches)?;
                assert!(options.relay_url.is_none());
                assert!(options.relay_token.is_none());
                assert_eq!(options.from, "noreply@shekelrubl.co.il");
                assert_eq!(options.subject, "Schekel Rubl Code");
                Ok(())
            },
        )
    }

    #[test]
    fn relay_from_env() -> Result<()> {
        temp_env::with_vars(
            [
                ("SHEKEL_EMAIL_RELAY_URL", Some("https://mail.example.com/send")),
                ("SHEKEL_EMAIL_RELAY_TOKEN", Some("s3cret")),
            ],
            || -> Result<()> {
                let matches = with_args(Command::new("shekel")).try_get_matches_from(vec!["shekel"])?;
                let options = Options::parse(&matches)?;
                assert_eq!(
                    options.relay_url.map(String::from),
                    Some("https://mail.example.com/send".to_string())
                );
                assert_eq!(
                    options.relay_token.as_ref().map(ExposeSecret::expose_secret),
                    Some("s3cret")
                );
                Ok(())
            },
        )
    }

    #[test]
    fn invalid_relay_url_is_an_error() -> Result<()> {
        temp_env::with_vars([("SHEKEL_EMAIL_RELAY_URL", None::<&str>)], || -> Result<()> {
            let matches = with_args(Command::new("shekel"))
                .try_get_matches_from(vec!["shekel", "--email-relay-url", "not a url"])?;
            assert!(Options::parse(&matches).is_err());
            Ok(())
        })
    }
}
