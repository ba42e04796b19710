//! One-time email verification codes.
//!
//! Codes are scoped by purpose and only the latest row per (email, purpose) is
//! consulted. Issuing inserts a new row, failed validations bump `attempts` on the
//! latest row, nothing else ever changes.
//!
//! Validation checks run in a fixed order: existence, attempts, expiry, value.
//! Each earlier check short-circuits before the attempts counter is touched.

use anyhow::Context;
use rand::Rng;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info_span, Instrument};

use super::transaction::UnitOfWork;
use crate::api::{
    email::{EmailMessage, EmailSender},
    error::ApiError,
};

const DEFAULT_COOLDOWN_SECONDS: u64 = 60;
const DEFAULT_CODE_TTL_SECONDS: u64 = 5 * 60;
const DEFAULT_MAX_ATTEMPTS: i32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeKind {
    Registration,
    Recovery,
}

impl CodeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Recovery => "recovery",
        }
    }
}

/// Latest stored code for an (email, kind) pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailCode {
    pub code_id: i64,
    pub email: String,
    pub code: String,
    pub kind: CodeKind,
    pub created_at_ms: i64,
    pub attempts: i32,
}

/// Outcome of checking a submitted value against the latest code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeCheck {
    Accepted,
    Missing,
    AttemptsExceeded,
    Expired,
    Mismatch,
}

impl CodeCheck {
    fn into_result(self) -> Result<(), ApiError> {
        match self {
            Self::Accepted => Ok(()),
            Self::Missing => Err(ApiError::NotFound("code does not exist".to_string())),
            Self::AttemptsExceeded => Err(ApiError::Forbidden(
                "number of attempts exceeded".to_string(),
            )),
            Self::Expired => Err(ApiError::Forbidden("code expired".to_string())),
            Self::Mismatch => Err(ApiError::Forbidden("wrong code".to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodePolicy {
    cooldown: Duration,
    ttl: Duration,
    max_attempts: i32,
}

impl Default for CodePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl CodePolicy {
    /// 60s cooldown between sends, 5 minute validity, more than 5 wrong attempts locks the code.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECONDS),
            ttl: Duration::from_secs(DEFAULT_CODE_TTL_SECONDS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_cooldown_seconds(mut self, seconds: u64) -> Self {
        self.cooldown = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: u64) -> Self {
        self.ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: i32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// True while `latest` is too young for another code to be issued.
    #[must_use]
    pub fn cooldown_active(&self, latest: Option<&EmailCode>, now_ms: i64) -> bool {
        latest.is_some_and(|code| now_ms < code.created_at_ms.saturating_add(millis(self.cooldown)))
    }

    /// Decide the outcome for `submitted` without touching storage.
    #[must_use]
    pub fn evaluate(&self, latest: Option<&EmailCode>, submitted: &str, now_ms: i64) -> CodeCheck {
        let Some(code) = latest else {
            return CodeCheck::Missing;
        };
        if code.attempts > self.max_attempts {
            return CodeCheck::AttemptsExceeded;
        }
        if now_ms > code.created_at_ms.saturating_add(millis(self.ttl)) {
            return CodeCheck::Expired;
        }
        if code.code != submitted {
            return CodeCheck::Mismatch;
        }
        CodeCheck::Accepted
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, millis)
}

/// Registration codes are 4 digits, recovery codes 16 (two 8-digit groups).
pub fn generate_code<R: Rng + ?Sized>(kind: CodeKind, rng: &mut R) -> String {
    match kind {
        CodeKind::Registration => format!("{:04}", rng.gen_range(0..10_000)),
        CodeKind::Recovery => format!(
            "{:08}{:08}",
            rng.gen_range(0..100_000_000),
            rng.gen_range(0..100_000_000)
        ),
    }
}

/// Issues and validates codes against `email_codes`.
#[derive(Clone)]
pub struct CodeEngine {
    policy: CodePolicy,
    sender: Arc<dyn EmailSender>,
    subject: String,
}

impl CodeEngine {
    #[must_use]
    pub fn new(policy: CodePolicy, sender: Arc<dyn EmailSender>, subject: String) -> Self {
        Self {
            policy,
            sender,
            subject,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &CodePolicy {
        &self.policy
    }

    /// Issue a new code and deliver it.
    ///
    /// # Errors
    /// `RateLimited` while the previous code is inside the cooldown, `Internal` on
    /// storage or delivery failure. A delivery failure leaves the row persisted.
    pub async fn request_code(
        &self,
        pool: &PgPool,
        email: &str,
        kind: CodeKind,
    ) -> Result<EmailCode, ApiError> {
        let latest = latest_code(pool, email, kind).await?;
        if self.policy.cooldown_active(latest.as_ref(), now_millis()) {
            return Err(ApiError::RateLimited(
                "code was sent less than a minute ago".to_string(),
            ));
        }

        let value = generate_code(kind, &mut rand::thread_rng());

        let mut uow = UnitOfWork::begin(pool).await?;
        let code = insert_code(uow.conn(), email, &value, kind).await?;
        uow.commit().await?;

        let message = EmailMessage {
            to: email.to_string(),
            subject: self.subject.clone(),
            body: format!("Code: {value}"),
        };
        self.sender
            .send(&message)
            .await
            .map_err(|err| ApiError::internal(format!("failed to send code: {err:#}")))?;

        debug!(email, kind = kind.as_str(), "verification code issued");
        Ok(code)
    }

    /// Check `submitted` against the latest code for (email, kind).
    ///
    /// Success does not consume the code; it stays valid until it expires or a
    /// newer code replaces it.
    ///
    /// # Errors
    /// `NotFound` when no code was ever issued, `Forbidden` for exceeded attempts,
    /// expiry or a wrong value, `Internal` on storage failure.
    pub async fn validate_code(
        &self,
        pool: &PgPool,
        email: &str,
        kind: CodeKind,
        submitted: &str,
    ) -> Result<(), ApiError> {
        let latest = latest_code(pool, email, kind).await?;
        let check = self.policy.evaluate(latest.as_ref(), submitted, now_millis());

        if let (CodeCheck::Mismatch, Some(code)) = (check, latest.as_ref()) {
            let mut uow = UnitOfWork::begin(pool).await?;
            increment_attempts(uow.conn(), code.code_id).await?;
            uow.commit().await?;
        }

        check.into_result()
    }
}

async fn latest_code(
    pool: &PgPool,
    email: &str,
    kind: CodeKind,
) -> Result<Option<EmailCode>, ApiError> {
    let query = r"
        SELECT code_id, email, code, attempts,
               (EXTRACT(EPOCH FROM ctime) * 1000)::BIGINT AS ctime_ms
        FROM email_codes
        WHERE email = $1 AND code_type = $2
        ORDER BY ctime DESC, code_id DESC
        LIMIT 1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(kind.as_str())
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup latest code")?;

    Ok(row.map(|row| EmailCode {
        code_id: row.get("code_id"),
        email: row.get("email"),
        code: row.get("code"),
        kind,
        created_at_ms: row.get("ctime_ms"),
        attempts: row.get("attempts"),
    }))
}

async fn insert_code(
    conn: &mut sqlx::PgConnection,
    email: &str,
    value: &str,
    kind: CodeKind,
) -> Result<EmailCode, ApiError> {
    let query = r"
        INSERT INTO email_codes (email, code, code_type)
        VALUES ($1, $2, $3)
        RETURNING code_id, attempts, (EXTRACT(EPOCH FROM ctime) * 1000)::BIGINT AS ctime_ms
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(value)
        .bind(kind.as_str())
        .fetch_one(&mut *conn)
        .instrument(span)
        .await
        .context("failed to insert code")?;

    Ok(EmailCode {
        code_id: row.get("code_id"),
        email: email.to_string(),
        code: value.to_string(),
        kind,
        created_at_ms: row.get("ctime_ms"),
        attempts: row.get("attempts"),
    })
}

// Single statement so concurrent wrong submissions cannot undercount.
async fn increment_attempts(conn: &mut sqlx::PgConnection, code_id: i64) -> Result<(), ApiError> {
    let query = "UPDATE email_codes SET attempts = attempts + 1 WHERE code_id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(code_id)
        .execute(&mut *conn)
        .instrument(span)
        .await
        .context("failed to increment code attempts")?;
    Ok(())
}
