use crate::{
    api::{
        self,
        auth::{AuthConfig, CodePolicy},
        email::{EmailSender, LogEmailSender, RelayEmailSender},
        report::ErrorReporter,
    },
    cli::{
        commands::{auth, email, report},
        telemetry,
    },
};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub auth: auth::Options,
    pub email: email::Options,
    pub report: report::Options,
}

impl Args {
    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        let policy = CodePolicy::new()
            .with_cooldown_seconds(self.auth.code_cooldown_seconds)
            .with_ttl_seconds(self.auth.code_ttl_seconds)
            .with_max_attempts(self.auth.code_max_attempts);

        AuthConfig::new()
            .with_session_cookie_name(self.auth.session_cookie_name.clone())
            .with_session_ttl_seconds(self.auth.session_ttl_seconds)
            .with_request_timeout_seconds(self.auth.request_timeout_seconds)
            .with_code_policy(policy)
            .with_email_subject(self.email.subject.clone())
    }

    /// # Errors
    /// Returns an error if the relay client cannot be built.
    pub fn email_sender(&self) -> Result<Arc<dyn EmailSender>> {
        match &self.email.relay_url {
            Some(endpoint) => Ok(Arc::new(RelayEmailSender::new(
                endpoint.clone(),
                self.email.relay_token.clone(),
                self.email.from.clone(),
                self.email.from_name.clone(),
            )?)),
            None => Ok(Arc::new(LogEmailSender)),
        }
    }

    /// # Errors
    /// Returns an error if the report client cannot be built.
    pub fn reporter(&self) -> Result<Arc<ErrorReporter>> {
        match &self.report.telegram {
            Some((token, chat_id)) => Ok(Arc::new(ErrorReporter::telegram(
                token.clone(),
                chat_id.clone(),
            )?)),
            None => Ok(Arc::new(ErrorReporter::disabled())),
        }
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the collaborators cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let auth_config = args.auth_config();
    let sender = args.email_sender()?;
    let reporter = args.reporter()?;

    let result = api::new(args.port, args.dsn, auth_config, sender, reporter).await;

    telemetry::shutdown_tracer();

    result
}

fn log_startup_args(args: &Args) {
    info!(
        port = args.port,
        dsn = %redact_dsn(&args.dsn),
        session_cookie = %args.auth.session_cookie_name,
        request_timeout_seconds = args.auth.request_timeout_seconds,
        code_cooldown_seconds = args.auth.code_cooldown_seconds,
        code_ttl_seconds = args.auth.code_ttl_seconds,
        code_max_attempts = args.auth.code_max_attempts,
        email_relay = args.email.relay_url.as_ref().map_or("log", Url::as_str),
        error_reports = args.report.telegram.is_some(),
        "Startup configuration"
    );
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}
