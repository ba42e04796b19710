//! Cookie-bound anonymous sessions.
//!
//! Every request is served with a session. A request without a resolvable cookie
//! gets a fresh one, persisted in its own unit of work, and the response carries a
//! `Set-Cookie` for it. Identifiers are never rewritten; the only mutation is
//! binding a user id.

use anyhow::Context;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{
        header::{InvalidHeaderValue, COOKIE},
        request::Parts,
        HeaderMap, HeaderValue,
    },
};
use sqlx::{PgConnection, PgPool, Row};
use std::time::Duration;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use super::transaction::{is_unique_violation, UnitOfWork};
use crate::api::error::ApiError;

pub(crate) const DEFAULT_SESSION_COOKIE_NAME: &str = "SessionID";
pub(crate) const DEFAULT_SESSION_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;
const MAX_CREATE_ATTEMPTS: usize = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub user_id: Option<i64>,
    pub data: serde_json::Value,
    pub created_at_unix: i64,
}

impl Session {
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }
}

/// Session id of the request, stored in response extensions for failure reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionId(pub String);

/// Result of resolving the inbound cookie.
#[derive(Debug)]
pub struct ResolvedSession {
    pub session: Session,
    /// Present only when a new session was created.
    pub set_cookie: Option<HeaderValue>,
}

#[derive(Clone, Debug)]
pub struct SessionManager {
    cookie_name: String,
    ttl: Duration,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(
            DEFAULT_SESSION_COOKIE_NAME.to_string(),
            Duration::from_secs(DEFAULT_SESSION_TTL_SECONDS),
        )
    }
}

impl SessionManager {
    #[must_use]
    pub fn new(cookie_name: String, ttl: Duration) -> Self {
        Self { cookie_name, ttl }
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Return the session named by the cookie in `headers`, or create a new one.
    ///
    /// # Errors
    /// Returns `Internal` when the lookup or the insert fails. A failed lookup is
    /// never treated as "no session".
    pub async fn resolve_or_create(
        &self,
        pool: &PgPool,
        headers: &HeaderMap,
    ) -> Result<ResolvedSession, ApiError> {
        if let Some(token) = extract_session_token(headers, &self.cookie_name) {
            if let Some(session) = lookup_session(pool, &token).await? {
                return Ok(ResolvedSession {
                    session,
                    set_cookie: None,
                });
            }
            debug!("session cookie did not resolve, issuing a new session");
        }

        let session = self.create(pool).await?;
        let set_cookie = self
            .session_cookie(&session.session_id)
            .map_err(ApiError::internal)?;
        Ok(ResolvedSession {
            session,
            set_cookie: Some(set_cookie),
        })
    }

    async fn create(&self, pool: &PgPool) -> Result<Session, ApiError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let session_id = Uuid::new_v4().to_string();
            let mut uow = UnitOfWork::begin(pool).await?;
            match insert_session(uow.conn(), &session_id).await {
                Ok(session) => {
                    uow.commit().await?;
                    return Ok(session);
                }
                Err(err) if is_unique_violation(&err) && attempt < MAX_CREATE_ATTEMPTS => {
                    debug!("session id collision, retrying");
                }
                Err(err) => {
                    return Err(anyhow::Error::new(err)
                        .context("failed to insert session")
                        .into());
                }
            }
        }
    }

    /// Bind `user_id` to `session` on the caller's unit of work.
    ///
    /// # Errors
    /// Returns `Internal` on storage failure or when the session row is gone.
    pub async fn bind_user(
        &self,
        conn: &mut PgConnection,
        session: &mut Session,
        user_id: i64,
    ) -> Result<(), ApiError> {
        let query = "UPDATE sessions SET user_id = $1 WHERE session_id = $2";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(&session.session_id)
            .execute(&mut *conn)
            .instrument(span)
            .await
            .context("failed to bind user to session")?;

        if result.rows_affected() == 0 {
            return Err(ApiError::internal(format!(
                "session {} not found while binding user",
                session.session_id
            )));
        }
        session.user_id = Some(user_id);
        Ok(())
    }

    /// Build the long-lived `HttpOnly` cookie carrying `session_id`.
    pub fn session_cookie(&self, session_id: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        HeaderValue::from_str(&format!(
            "{}={session_id}; Path=/; Max-Age={}; HttpOnly; Secure; SameSite=Lax",
            self.cookie_name,
            self.ttl.as_secs()
        ))
    }
}

async fn lookup_session(pool: &PgPool, session_id: &str) -> Result<Option<Session>, ApiError> {
    let query = r"
        SELECT session_id, user_id, data, EXTRACT(EPOCH FROM ctime)::BIGINT AS ctime_unix
        FROM sessions
        WHERE session_id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(session_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    Ok(row.map(|row| Session {
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        data: row.get("data"),
        created_at_unix: row.get("ctime_unix"),
    }))
}

async fn insert_session(
    conn: &mut PgConnection,
    session_id: &str,
) -> Result<Session, sqlx::Error> {
    let query = r"
        INSERT INTO sessions (session_id, data)
        VALUES ($1, '{}'::jsonb)
        RETURNING data, EXTRACT(EPOCH FROM ctime)::BIGINT AS ctime_unix
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(session_id)
        .fetch_one(&mut *conn)
        .instrument(span)
        .await?;

    Ok(Session {
        session_id: session_id.to_string(),
        user_id: None,
        data: row.get("data"),
        created_at_unix: row.get("ctime_unix"),
    })
}

/// Value of the `cookie_name` cookie, if any.
pub(crate) fn extract_session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == cookie_name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or_else(|| ApiError::internal("session middleware not installed"))
    }
}
