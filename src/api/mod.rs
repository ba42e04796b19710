use crate::api::{
    auth::{AuthConfig, AuthState},
    email::EmailSender,
    handlers::{health, login, rates, recovery, registration},
    report::ErrorReporter,
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::CONTENT_TYPE,
        HeaderName, HeaderValue, Method, Request,
    },
    middleware,
    routing::{get, post, put},
    Extension, Router,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, CorsLayer, ExposeHeaders},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

pub mod auth;
pub mod boundary;
pub mod email;
pub mod error;
pub mod handlers;
mod openapi;
pub mod report;

pub use openapi::openapi;

/// Why the server stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Signal,
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    auth_config: AuthConfig,
    email_sender: Arc<dyn EmailSender>,
    reporter: Arc<ErrorReporter>,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    spawn_signal_listener(tx);

    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(10)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let auth_state = Arc::new(AuthState::new(auth_config, email_sender, reporter));

    let app = app(pool, auth_state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            if let Some(reason) = rx.recv().await {
                info!(?reason, "Gracefully shutdown");
            }
        })
        .await?;

    Ok(())
}

/// Build the full application router.
pub fn app(pool: PgPool, auth_state: Arc<AuthState>) -> Router {
    // Session-bound routes: every request here resolves or creates a session.
    let session_routes = Router::new()
        .route("/auth", post(login::login))
        .route("/auth/send_code", get(registration::send_code))
        .route("/auth/check_code", get(registration::check_code))
        .route("/auth/check_user", get(registration::check_user))
        .route("/auth/register", post(registration::register))
        .route(
            "/auth/send_recovery_code",
            get(recovery::send_recovery_code),
        )
        .route(
            "/auth/check_recovery_code",
            get(recovery::check_recovery_code),
        )
        .route(
            "/auth/change_password_by_code",
            put(recovery::change_password_by_code),
        )
        .route("/public/rates", get(rates::rates))
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(
            boundary::Boundary::new(pool.clone(), auth_state.clone()),
            boundary::guard,
        ));

    // Credentialed CORS cannot use wildcards, so request headers are mirrored
    // and exposed headers are listed.
    let cors = CorsLayer::new()
        .allow_headers(AllowHeaders::mirror_request())
        .expose_headers(ExposeHeaders::list([
            CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
        ]))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health::health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .merge(session_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state))
                .layer(Extension(pool)),
        )
}

fn spawn_signal_listener(tx: mpsc::UnboundedSender<Shutdown>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {err}");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(err) => {
                    tracing::error!("Failed to listen for SIGTERM: {err}");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }

        let _ = tx.send(Shutdown::Signal);
    });
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
