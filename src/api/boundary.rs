//! Request boundary: body capture, session resolution, watchdog and failure reports.
//!
//! The body is buffered up front so it can be replayed to the handler and quoted
//! in failure reports. Session resolution and the handler run together on a
//! spawned task bounded by the request timeout. When the bound is hit the client
//! gets `Timeout` and the task is abandoned, not cancelled.

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Request, State},
    http::{header::SET_COOKIE, request::Parts, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, Instrument, Span};

use super::{
    auth::{session::SessionId, AuthState},
    error::{ApiError, FailureReport},
    report::FailureContext,
};

#[derive(Clone)]
pub struct Boundary {
    pool: PgPool,
    auth: Arc<AuthState>,
}

impl Boundary {
    #[must_use]
    pub fn new(pool: PgPool, auth: Arc<AuthState>) -> Self {
        Self { pool, auth }
    }
}

/// Middleware wrapping every session-bound route.
pub async fn guard(State(boundary): State<Boundary>, request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let method = parts.method.to_string();
    let uri = parts.uri.to_string();

    let body = match to_bytes(body, boundary.auth.config().body_limit_bytes()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!("failed to read request body: {err}");
            return ApiError::invalid_input("request body is too large or unreadable")
                .into_response();
        }
    };

    let session_slot = Arc::new(OnceLock::new());
    let work = serve_with_session(
        boundary.clone(),
        parts,
        body.clone(),
        next,
        Arc::clone(&session_slot),
    )
    .instrument(Span::current());
    let response = watchdog(boundary.auth.config().request_timeout(), work).await;

    if let Some(report) = response.extensions().get::<FailureReport>() {
        let session_id = response
            .extensions()
            .get::<SessionId>()
            .map(|id| id.0.clone())
            .or_else(|| session_slot.get().cloned());
        boundary.auth.reporter().dispatch(FailureContext {
            message: report.message.clone(),
            method,
            uri,
            session_id,
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }

    response
}

async fn serve_with_session(
    boundary: Boundary,
    parts: Parts,
    body: Bytes,
    next: Next,
    session_slot: Arc<OnceLock<String>>,
) -> Response {
    let resolved = match boundary
        .auth
        .sessions()
        .resolve_or_create(&boundary.pool, &parts.headers)
        .await
    {
        Ok(resolved) => resolved,
        Err(err) => return err.into_response(),
    };
    let session_id = resolved.session.session_id.clone();
    let _ = session_slot.set(session_id.clone());

    let mut request = Request::from_parts(parts, Body::from(body));
    request.extensions_mut().insert(resolved.session);

    let mut response = next.run(request).await;
    response.extensions_mut().insert(SessionId(session_id));
    if let Some(cookie) = resolved.set_cookie {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

/// Run `work` on its own task and give up waiting after `limit`.
///
/// A panic inside `work` becomes `Internal`, an elapsed limit becomes `Timeout`.
pub(crate) async fn watchdog<F>(limit: Duration, work: F) -> Response
where
    F: Future<Output = Response> + Send + 'static,
{
    let task = tokio::spawn(work);
    match tokio::time::timeout(limit, task).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => ApiError::internal(format!("request handler failed: {err}")).into_response(),
        Err(_) => ApiError::Timeout.into_response(),
    }
}
