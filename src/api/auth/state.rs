//! Auth configuration and the shared state handed to handlers.

use std::sync::Arc;
use std::time::Duration;

use super::{
    codes::{CodeEngine, CodePolicy},
    session::{SessionManager, DEFAULT_SESSION_COOKIE_NAME, DEFAULT_SESSION_TTL_SECONDS},
};
use crate::api::{email::EmailSender, report::ErrorReporter};

const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_EMAIL_SUBJECT: &str = "Schekel Rubl Code";
const DEFAULT_BODY_LIMIT_BYTES: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    session_cookie_name: String,
    session_ttl_seconds: u64,
    request_timeout_seconds: u64,
    body_limit_bytes: usize,
    code_policy: CodePolicy,
    email_subject: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_cookie_name: DEFAULT_SESSION_COOKIE_NAME.to_string(),
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            code_policy: CodePolicy::new(),
            email_subject: DEFAULT_EMAIL_SUBJECT.to_string(),
        }
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: String) -> Self {
        self.session_cookie_name = name;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_request_timeout_seconds(mut self, seconds: u64) -> Self {
        self.request_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_body_limit_bytes(mut self, bytes: usize) -> Self {
        self.body_limit_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_code_policy(mut self, policy: CodePolicy) -> Self {
        self.code_policy = policy;
        self
    }

    #[must_use]
    pub fn with_email_subject(mut self, subject: String) -> Self {
        self.email_subject = subject;
        self
    }

    #[must_use]
    pub fn session_cookie_name(&self) -> &str {
        &self.session_cookie_name
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    #[must_use]
    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_bytes
    }

    #[must_use]
    pub fn code_policy(&self) -> CodePolicy {
        self.code_policy
    }

    #[must_use]
    pub fn email_subject(&self) -> &str {
        &self.email_subject
    }
}

pub struct AuthState {
    config: AuthConfig,
    sessions: SessionManager,
    codes: CodeEngine,
    reporter: Arc<ErrorReporter>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        email_sender: Arc<dyn EmailSender>,
        reporter: Arc<ErrorReporter>,
    ) -> Self {
        let sessions = SessionManager::new(
            config.session_cookie_name().to_string(),
            Duration::from_secs(config.session_ttl_seconds()),
        );
        let codes = CodeEngine::new(
            config.code_policy(),
            email_sender,
            config.email_subject().to_string(),
        );
        Self {
            config,
            sessions,
            codes,
            reporter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn codes(&self) -> &CodeEngine {
        &self.codes
    }

    #[must_use]
    pub fn reporter(&self) -> &Arc<ErrorReporter> {
        &self.reporter
    }
}
