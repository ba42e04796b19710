//! Password recovery by emailed code.

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

use super::{parse_body, require_field, Params, StatusBody, Validate};
use crate::api::{
    auth::{credentials, AuthState, CodeKind, UnitOfWork},
    error::{ApiError, ErrorBody, FieldError},
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RecoveryRequest {
    #[serde(rename = "Email", alias = "email", default)]
    pub email: String,
    #[serde(rename = "Password", alias = "password", default)]
    pub password: String,
    #[serde(rename = "Code", alias = "code", default)]
    pub code: String,
}

impl Validate for RecoveryRequest {
    fn validate(&self) -> Vec<FieldError> {
        let mut fields = Vec::new();
        require_field(&mut fields, "Email", &self.email);
        require_field(&mut fields, "Password", &self.password);
        require_field(&mut fields, "Code", &self.code);
        fields
    }
}

/// Send a recovery code to an existing account.
#[utoipa::path(
    get,
    path = "/auth/send_recovery_code",
    params(("Email" = String, Query, description = "Account email")),
    responses(
        (status = 200, description = "Code sent", body = StatusBody),
        (status = 400, description = "Missing parameters", body = ErrorBody),
        (status = 404, description = "User does not exist", body = ErrorBody),
        (status = 429, description = "Previous code sent less than a minute ago", body = ErrorBody),
        (status = 500, description = "Storage or delivery failure", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn send_recovery_code(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    RawQuery(query): RawQuery,
) -> Result<Json<StatusBody>, ApiError> {
    let mut params = Params::parse(query.as_deref());
    let email = params.required("Email");
    params.finish()?;

    if !credentials::exists(&pool, &email).await? {
        return Err(ApiError::NotFound("user does not exist".to_string()));
    }

    auth_state
        .codes()
        .request_code(&pool, &email, CodeKind::Recovery)
        .await?;
    Ok(StatusBody::ok())
}

/// Validate a recovery code without consuming it.
#[utoipa::path(
    get,
    path = "/auth/check_recovery_code",
    params(
        ("Email" = String, Query, description = "Account email"),
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
pub async fn check_recovery_code(
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
        .validate_code(&pool, &email, CodeKind::Recovery, &code)
        .await?;
    Ok(StatusBody::ok())
}

/// Replace the password once the recovery code checks out.
#[utoipa::path(
    put,
    path = "/auth/change_password_by_code",
    request_body = RecoveryRequest,
    responses(
        (status = 200, description = "Password changed", body = StatusBody),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 403, description = "Wrong, expired or locked code", body = ErrorBody),
        (status = 404, description = "No code was sent", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn change_password_by_code(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    body: Bytes,
) -> Result<Json<StatusBody>, ApiError> {
    let request: RecoveryRequest = parse_body(&body)?;

    auth_state
        .codes()
        .validate_code(&pool, &request.email, CodeKind::Recovery, &request.code)
        .await?;

    let mut uow = UnitOfWork::begin(&pool).await?;
    credentials::update_password(uow.conn(), &request.email, &request.password).await?;
    uow.commit().await?;

    info!("password changed by recovery code");
    Ok(StatusBody::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{auth::AuthConfig, email::LogEmailSender, report::ErrorReporter};
    use anyhow::Result;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_state() -> Result<(Extension<PgPool>, Extension<Arc<AuthState>>)> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/shekel")?;
        let state = AuthState::new(
            AuthConfig::new(),
            Arc::new(LogEmailSender),
            Arc::new(ErrorReporter::disabled()),
        );
        Ok((Extension(pool), Extension(Arc::new(state))))
    }

    #[tokio::test]
    async fn send_recovery_code_requires_email() -> Result<()> {
        let (pool, state) = lazy_state()?;
        let result = send_recovery_code(pool, state, RawQuery(None)).await;
        assert!(matches!(result, Err(ApiError::InvalidInput { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn change_password_requires_every_field() -> Result<()> {
        let (pool, state) = lazy_state()?;
        let body = Bytes::from_static(br#"{"email":"user@example.com"}"#);
        match change_password_by_code(pool, state, body).await {
            Err(ApiError::InvalidInput { fields, .. }) => {
                let names: Vec<_> = fields.iter().map(|field| field.field.as_str()).collect();
                assert_eq!(names, vec!["Password", "Code"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }
}
