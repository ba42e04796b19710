//! Outbound email delivery.
//!
//! The code engine hands every issued code to an `EmailSender` and surfaces its
//! failure to the caller; the persisted code row is kept either way.
//!
//! The default sender for local dev is `LogEmailSender`, which logs and returns
//! `Ok(())`. Production deployments configure `RelayEmailSender`, which posts each
//! message as JSON to an HTTP mail relay.
use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, info_span, Instrument};
use url::Url;

use crate::APP_USER_AGENT;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Email delivery abstraction used by the code engine.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error describing why it was not accepted.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the message instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.body,
            "email send stub"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct RelayPayload<'a> {
    from: &'a str,
    from_name: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// Sender that hands messages to an HTTP mail relay.
#[derive(Clone, Debug)]
pub struct RelayEmailSender {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<SecretString>,
    from: String,
    from_name: String,
}

impl RelayEmailSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        endpoint: Url,
        token: Option<SecretString>,
        from: String,
        from_name: String,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build mail relay client")?;
        Ok(Self {
            client,
            endpoint,
            token,
            from,
            from_name,
        })
    }
}

#[async_trait]
impl EmailSender for RelayEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let payload = RelayPayload {
            from: &self.from,
            from_name: &self.from_name,
            to: &message.to,
            subject: &message.subject,
            text: &message.body,
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let span = info_span!("email.send", relay = %self.endpoint);
        request
            .send()
            .instrument(span)
            .await
            .context("failed to reach mail relay")?
            .error_for_status()
            .context("mail relay rejected message")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_sender_always_succeeds() -> Result<()> {
        let message = EmailMessage {
            to: "user@example.com".to_string(),
            subject: "Code".to_string(),
            body: "Code: 0417".to_string(),
        };
        LogEmailSender.send(&message).await
    }

    #[tokio::test]
    async fn relay_sender_surfaces_transport_failure() -> Result<()> {
        // Port 9 (discard) on loopback refuses connections in test environments.
        let endpoint = Url::parse("http://127.0.0.1:9/send")?;
        let sender = RelayEmailSender::new(
            endpoint,
            Some(SecretString::from("token".to_string())),
            "noreply@shekelrubl.co.il".to_string(),
            "Shekel Rubl".to_string(),
        )?;
        let message = EmailMessage {
            to: "user@example.com".to_string(),
            subject: "Code".to_string(),
            body: "Code: 0417".to_string(),
        };
        let err = sender
            .send(&message)
            .await
            .err()
            .map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("failed to reach mail relay"));
        Ok(())
    }

    #[test]
    fn relay_payload_shape() -> serde_json::Result<()> {
        let payload = RelayPayload {
            from: "noreply@shekelrubl.co.il",
            from_name: "Shekel Rubl",
            to: "user@example.com",
            subject: "Schekel Rubl Code",
            text: "Code: 0417",
        };
        let json = serde_json::to_value(&payload)?;
        assert_eq!(json["to"], "user@example.com");
        assert_eq!(json["from_name"], "Shekel Rubl");
        assert_eq!(json["text"], "Code: 0417");
        Ok(())
    }
}
