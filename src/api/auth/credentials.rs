//! User accounts and their at-rest password representation.
//!
//! Passwords are turned into their stored form exactly once per create/update
//! by [`derive_password`], and login compares derived values inside a single
//! query. A wrong password and an unknown email therefore look the same to the
//! caller.

use anyhow::Context;
use serde::Serialize;
use sqlx::{postgres::PgRow, PgConnection, PgPool, Row};
use tracing::Instrument;
use utoipa::ToSchema;

use super::transaction::is_unique_violation;
use crate::api::error::ApiError;

const USER_COLUMNS: &str = r"
    user_id, email, phone, type, external_user_id, telegram_chat_id, name, role,
    EXTRACT(EPOCH FROM ctime)::BIGINT AS ctime_unix
";

/// A user account as exposed to clients. The password never leaves storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct User {
    #[serde(rename = "UserID")]
    pub user_id: i64,
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "Phone")]
    pub phone: String,
    #[serde(rename = "Type")]
    pub account_type: String,
    #[serde(rename = "ExternalUserID")]
    pub external_user_id: Option<i64>,
    #[serde(rename = "TelegramChatID")]
    pub telegram_chat_id: Option<i64>,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Role")]
    pub role: String,
    #[serde(rename = "CTime")]
    pub created_at_unix: i64,
}

impl User {
    fn from_row(row: &PgRow) -> Self {
        Self {
            user_id: row.get("user_id"),
            email: row.get("email"),
            phone: row.get("phone"),
            account_type: row.get("type"),
            external_user_id: row.get("external_user_id"),
            telegram_chat_id: row.get("telegram_chat_id"),
            name: row.get("name"),
            role: row.get("role"),
            created_at_unix: row.get("ctime_unix"),
        }
    }
}

/// Derive the stored form of a password.
///
/// This is a hex encoding of the raw bytes, kept for compatibility with rows
/// already in the `users` table. It is not a one-way hash; replacing it with a
/// salted keyed hash only requires changing this function.
#[must_use]
pub fn derive_password(plaintext: &str) -> String {
    hex::encode(plaintext.as_bytes())
}

/// Case-sensitive exact match on the stored email.
///
/// # Errors
/// Returns `Internal` on storage failure.
pub async fn exists(pool: &PgPool, email: &str) -> Result<bool, ApiError> {
    let query = "SELECT count(*) AS users FROM users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to check existing user")?;

    let users: i64 = row.get("users");
    Ok(users > 0)
}

/// Insert a new user inside the caller's unit of work.
///
/// # Errors
/// Returns `Conflict` when the email is already taken at the storage level
/// (callers check [`exists`] first; this covers the race between the two) and
/// `Internal` on any other storage failure.
pub async fn create(
    conn: &mut PgConnection,
    email: &str,
    name: &str,
    plaintext_password: &str,
) -> Result<User, ApiError> {
    let query = format!(
        r"
        INSERT INTO users (email, password, name)
        VALUES ($1, $2, $3)
        RETURNING {USER_COLUMNS}
        "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let result = sqlx::query(&query)
        .bind(email)
        .bind(derive_password(plaintext_password))
        .bind(name)
        .fetch_one(&mut *conn)
        .instrument(span)
        .await;

    match result {
        Ok(row) => Ok(User::from_row(&row)),
        Err(err) if is_unique_violation(&err) => {
            Err(ApiError::Conflict("user already exists".to_string()))
        }
        Err(err) => Err(anyhow::Error::new(err)
            .context("failed to insert user")
            .into()),
    }
}

/// Overwrite the stored password for `email`.
///
/// Existence of the account is not checked here; the recovery flow proves it
/// before calling.
///
/// # Errors
/// Returns `Internal` on storage failure.
pub async fn update_password(
    conn: &mut PgConnection,
    email: &str,
    plaintext_password: &str,
) -> Result<(), ApiError> {
    let query = "UPDATE users SET password = $1 WHERE email = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(derive_password(plaintext_password))
        .bind(email)
        .execute(&mut *conn)
        .instrument(span)
        .await
        .context("failed to update user password")?;
    Ok(())
}

/// Look up the user matching both email and password.
///
/// # Errors
/// Returns `NotFound` when either does not match and `Internal` on storage failure.
pub async fn authenticate(
    pool: &PgPool,
    email: &str,
    plaintext_password: &str,
) -> Result<User, ApiError> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND password = $2");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(email)
        .bind(derive_password(plaintext_password))
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user")?;

    row.map(|row| User::from_row(&row))
        .ok_or_else(|| ApiError::NotFound("wrong login or password".to_string()))
}
