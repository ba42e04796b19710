//! Failure reports to a Telegram chat.
//!
//! Internal errors and timeouts are posted to the configured chat from a detached
//! task. There is no retry and no completion signal; a failed report is logged
//! and dropped.

use anyhow::{anyhow, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info_span, warn, Instrument};
use url::Url;

use crate::APP_USER_AGENT;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// What the boundary knows about a failed request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FailureContext {
    pub message: String,
    pub method: String,
    pub uri: String,
    pub session_id: Option<String>,
    pub body: String,
}

impl FailureContext {
    /// Chat message text: error, request line, session id, raw body.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "{}\n{} {}\n{}\n{}\n",
            self.message,
            self.method,
            self.uri,
            self.session_id.as_deref().unwrap_or_default(),
            self.body
        )
    }
}

#[derive(Debug)]
struct TelegramTarget {
    client: reqwest::Client,
    api: Url,
    bot_token: SecretString,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug)]
pub struct ErrorReporter {
    target: Option<TelegramTarget>,
}

impl ErrorReporter {
    /// Reporter that only logs.
    #[must_use]
    pub fn disabled() -> Self {
        Self { target: None }
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn telegram(bot_token: SecretString, chat_id: String) -> Result<Self> {
        let api = Url::parse(TELEGRAM_API).context("invalid Telegram API url")?;
        Self::telegram_at(api, bot_token, chat_id)
    }

    /// Same as [`Self::telegram`] against a custom API base url.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn telegram_at(api: Url, bot_token: SecretString, chat_id: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build report client")?;
        Ok(Self {
            target: Some(TelegramTarget {
                client,
                api,
                bot_token,
                chat_id,
            }),
        })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    /// Send `failure` in the background. Never blocks the caller.
    pub fn dispatch(self: &Arc<Self>, failure: FailureContext) {
        if !self.is_enabled() {
            debug!(error = %failure.message, "error report skipped, reporter disabled");
            return;
        }
        let reporter = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = reporter.send(&failure).await {
                warn!("failed to send error report: {err:#}");
            }
        });
    }

    async fn send(&self, failure: &FailureContext) -> Result<()> {
        let Some(target) = &self.target else {
            return Ok(());
        };
        let endpoint = target.send_message_url()?;
        let text = failure.render();
        let payload = SendMessage {
            chat_id: &target.chat_id,
            text: &text,
        };

        // The bot token is part of the url, keep it out of error messages.
        target
            .client
            .post(endpoint)
            .json(&payload)
            .send()
            .instrument(info_span!("report.send"))
            .await
            .map_err(reqwest::Error::without_url)
            .context("failed to reach Telegram")?
            .error_for_status()
            .map_err(reqwest::Error::without_url)
            .context("Telegram rejected report")?;
        Ok(())
    }
}

impl TelegramTarget {
    /// `{api}/bot{token}/sendMessage`, built segment by segment so the
    /// `<id>:<secret>` token is never parsed as a scheme.
    fn send_message_url(&self) -> Result<Url> {
        let mut endpoint = self.api.clone();
        endpoint
            .path_segments_mut()
            .map_err(|()| anyhow!("Telegram API url cannot be a base"))?
            .pop_if_empty()
            .push(&format!("bot{}", self.bot_token.expose_secret()))
            .push("sendMessage");
        Ok(endpoint)
    }
}
