//! Email and password login.

use axum::{body::Bytes, extract::Extension, response::Json};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

use super::{parse_body, require_field, Validate};
use crate::api::{
    auth::{credentials, AuthState, Session, UnitOfWork, User},
    error::{ApiError, ErrorBody, FieldError},
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    #[serde(rename = "Email", alias = "email", default)]
    pub email: String,
    #[serde(rename = "Password", alias = "password", default)]
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Vec<FieldError> {
        let mut fields = Vec::new();
        require_field(&mut fields, "Email", &self.email);
        require_field(&mut fields, "Password", &self.password);
        fields
    }
}

/// Authenticate and bind the user to the caller's session.
#[utoipa::path(
    post,
    path = "/auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated user", body = User),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 404, description = "Wrong login or password", body = ErrorBody),
        (status = 500, description = "Internal error", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    mut session: Session,
    body: Bytes,
) -> Result<Json<User>, ApiError> {
    let request: LoginRequest = parse_body(&body)?;

    let user = credentials::authenticate(&pool, &request.email, &request.password).await?;

    let mut uow = UnitOfWork::begin(&pool).await?;
    auth_state
        .sessions()
        .bind_user(uow.conn(), &mut session, user.user_id)
        .await?;
    uow.commit().await?;

    debug!(user_id = user.user_id, "user logged in");
    Ok(Json(user))
}
