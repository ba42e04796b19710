//! Registration: code issuance, code and user checks, account creation.

use axum::{
    body::Bytes,
    extract::{Extension, RawQuery},
    response::Json,
};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use super::{parse_body, require_field, valid_email, Params, StatusBody, Validate};
use crate::api::{
    auth::{credentials, AuthState, CodeKind, Session, UnitOfWork},
    error::{ApiError, ErrorBody, FieldError},
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RegistrationRequest {
    #[serde(rename = "Email", alias = "email", default)]
    pub email: String,
    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,
    #[serde(rename = "Password", alias = "password", default)]
    pub password: String,
    #[serde(rename = "Code", alias = "code", default)]
    pub code: String,
}

impl Validate for RegistrationRequest {
    fn validate(&self) -> Vec<FieldError> {
        let mut fields = Vec::new();
        require_field(&mut fields, "Email", &self.email);
        require_field(&mut fields, "Password", &self.password);
        require_field(&mut fields, "Code", &self.code);
        fields
    }
}

/// Send a registration code to `Email`.
#[utoipa::path(
    get,
    path = "/auth/send_code",
    params(("Email" = String, Query, description = "Address to verify")),
    responses(
        (status = 200, description = "Code sent", body = StatusBody),
        (status = 400, description = "Missing or malformed email", body = ErrorBody),
        (status = 429, description = "Previous code sent less than a minute ago", body = ErrorBody),
        (status = 500, description = "Storage or delivery failure", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn send_code(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    RawQuery(query): RawQuery,
) -> Result<Json<StatusBody>, ApiError> {
    let mut params = Params::parse(query.as_deref());
    let email = params.required("Email");
    params.finish()?;

    if !valid_email(&email) {
        return Err(ApiError::invalid_fields(vec![FieldError::new(
            "Email",
            "email is wrong",
        )]));
    }

    auth_state
        .codes()
        .request_code(&pool, &email, CodeKind::Registration)
        .await?;
    Ok(StatusBody::ok())
}

/// Validate a registration code without consuming it.
#[utoipa::path(
    get,
    path = "/auth/check_code",
    params(
        ("Email" = String, Query, description = "Verified address"),
        ("Code" = String, Query, description = "Code from the email")
    ),
    responses(
        (status = 200, description = "Code is valid", body = StatusBody),
        (status = 400, description = "Missing parameters", body = ErrorBody),
        (status = 403, description = "Wrong, expired or locked code", body = ErrorBody),
        (status = 404, description = "No code was sent", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn check_code(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    RawQuery(query): RawQuery,
) -> Result<Json<StatusBody>, ApiError> {
    let mut params = Params::parse(query.as_deref());
    let email = params.required("Email");
    let code = params.required("Code");
    params.finish()?;

    auth_state
        .codes()
        .validate_code(&pool, &email, CodeKind::Registration, &code)
        .await?;
    Ok(StatusBody::ok())
}

/// Fail with `Conflict` when an account already uses `Email`.
#[utoipa::path(
    get,
    path = "/auth/check_user",
    params(("Email" = String, Query, description = "Address to look up")),
    responses(
        (status = 200, description = "Address is free", body = StatusBody),
        (status = 400, description = "Missing parameters", body = ErrorBody),
        (status = 409, description = "User already exists", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn check_user(
    pool: Extension<PgPool>,
    RawQuery(query): RawQuery,
) -> Result<Json<StatusBody>, ApiError> {
    let mut params = Params::parse(query.as_deref());
    let email = params.required("Email");
    params.finish()?;

    ensure_new_user(&pool, &email).await?;
    Ok(StatusBody::ok())
}

/// Create the account and bind it to the caller's session in one transaction.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegistrationRequest,
    responses(
        (status = 200, description = "User created and logged in", body = StatusBody),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 403, description = "Wrong, expired or locked code", body = ErrorBody),
        (status = 404, description = "No code was sent", body = ErrorBody),
        (status = 409, description = "User already exists", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn register(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    mut session: Session,
    body: Bytes,
) -> Result<Json<StatusBody>, ApiError> {
    let request: RegistrationRequest = parse_body(&body)?;

    auth_state
        .codes()
        .validate_code(&pool, &request.email, CodeKind::Registration, &request.code)
        .await?;

    ensure_new_user(&pool, &request.email).await?;

    let mut uow = UnitOfWork::begin(&pool).await?;
    let user =
        credentials::create(uow.conn(), &request.email, &request.name, &request.password).await?;
    auth_state
        .sessions()
        .bind_user(uow.conn(), &mut session, user.user_id)
        .await?;
    uow.commit().await?;

    info!(user_id = user.user_id, "user registered");
    Ok(StatusBody::ok())
}

async fn ensure_new_user(pool: &PgPool, email: &str) -> Result<(), ApiError> {
    if credentials::exists(pool, email).await? {
        return Err(ApiError::Conflict("user already exists".to_string()));
    }
    Ok(())
}
