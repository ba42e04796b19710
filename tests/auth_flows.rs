//! End-to-end flows against a real Postgres, see `support` for how the
//! database is provided.

mod support;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, Method, Request, StatusCode,
    },
    Router,
};
use shekel::api::{
    self,
    auth::{credentials, AuthConfig, AuthState, CodeEngine, CodeKind, CodePolicy, UnitOfWork},
    email::{EmailMessage, EmailSender},
    error::ApiError,
    report::ErrorReporter,
};
use sqlx::{PgPool, Row};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use ulid::Ulid;

fn unique_email() -> String {
    format!("{}@test.shekelrubl.co.il", Ulid::new().to_string().to_lowercase())
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingSender {
    fn last_code_for(&self, email: &str) -> Result<String> {
        let sent = self.sent.lock().map_err(|_| anyhow!("sender lock poisoned"))?;
        sent.iter()
            .rev()
            .find(|message| message.to == email)
            .and_then(|message| message.body.strip_prefix("Code: "))
            .map(str::to_string)
            .context("no code sent")
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow!("sender lock poisoned"))?
            .push(message.clone());
        Ok(())
    }
}

struct FailingSender;

#[async_trait]
impl EmailSender for FailingSender {
    async fn send(&self, _message: &EmailMessage) -> Result<()> {
        Err(anyhow!("relay unavailable"))
    }
}

fn engine(sender: Arc<dyn EmailSender>) -> CodeEngine {
    CodeEngine::new(CodePolicy::new(), sender, "Schekel Rubl Code".to_string())
}

async fn code_rows(pool: &PgPool, email: &str) -> Result<i64> {
    Ok(
        sqlx::query("SELECT COUNT(*) AS n FROM email_codes WHERE email = $1")
            .bind(email)
            .fetch_one(pool)
            .await?
            .get("n"),
    )
}

async fn backdate_codes(pool: &PgPool, email: &str, seconds: i32) -> Result<()> {
    sqlx::query(
        "UPDATE email_codes SET ctime = ctime - make_interval(secs => $2) WHERE email = $1",
    )
    .bind(email)
    .bind(f64::from(seconds))
    .execute(pool)
    .await?;
    Ok(())
}

fn forbidden_message(result: Result<(), ApiError>) -> Option<String> {
    match result {
        Err(ApiError::Forbidden(message)) => Some(message),
        _ => None,
    }
}

#[tokio::test]
async fn cooldown_keeps_a_single_code() -> Result<()> {
    let Some(pool) = support::test_pool().await? else {
        return Ok(());
    };
    let sender = Arc::new(RecordingSender::default());
    let codes = engine(sender.clone());
    let email = unique_email();

    codes
        .request_code(&pool, &email, CodeKind::Registration)
        .await?;
    let second = codes
        .request_code(&pool, &email, CodeKind::Registration)
        .await;
    assert!(matches!(second, Err(ApiError::RateLimited(_))));
    assert_eq!(code_rows(&pool, &email).await?, 1);

    // Cooldown is per purpose.
    codes.request_code(&pool, &email, CodeKind::Recovery).await?;
    assert_eq!(code_rows(&pool, &email).await?, 2);

    backdate_codes(&pool, &email, 61).await?;
    codes
        .request_code(&pool, &email, CodeKind::Registration)
        .await?;
    assert_eq!(code_rows(&pool, &email).await?, 3);
    Ok(())
}

#[tokio::test]
async fn wrong_attempts_lock_the_code() -> Result<()> {
    let Some(pool) = support::test_pool().await? else {
        return Ok(());
    };
    let sender = Arc::new(RecordingSender::default());
    let codes = engine(sender.clone());
    let email = unique_email();

    codes
        .request_code(&pool, &email, CodeKind::Registration)
        .await?;
    let code = sender.last_code_for(&email)?;

    for _ in 0..6 {
        let result = codes
            .validate_code(&pool, &email, CodeKind::Registration, "wrong")
            .await;
        assert_eq!(forbidden_message(result).as_deref(), Some("wrong code"));
    }

    let result = codes
        .validate_code(&pool, &email, CodeKind::Registration, &code)
        .await;
    assert_eq!(
        forbidden_message(result).as_deref(),
        Some("number of attempts exceeded")
    );

    let attempts: i32 = sqlx::query("SELECT attempts FROM email_codes WHERE email = $1")
        .bind(&email)
        .fetch_one(&pool)
        .await?
        .get("attempts");
    assert_eq!(attempts, 6);
    Ok(())
}

#[tokio::test]
async fn codes_expire_and_stay_replayable_until_then() -> Result<()> {
    let Some(pool) = support::test_pool().await? else {
        return Ok(());
    };
    let sender = Arc::new(RecordingSender::default());
    let codes = engine(sender.clone());
    let email = unique_email();

    let missing = codes
        .validate_code(&pool, &email, CodeKind::Registration, "0000")
        .await;
    assert!(matches!(missing, Err(ApiError::NotFound(_))));

    codes
        .request_code(&pool, &email, CodeKind::Registration)
        .await?;
    let code = sender.last_code_for(&email)?;
    assert_eq!(code.len(), 4);

    codes
        .validate_code(&pool, &email, CodeKind::Registration, &code)
        .await?;
    codes
        .validate_code(&pool, &email, CodeKind::Registration, &code)
        .await?;

    // A registration code never validates a recovery request.
    let other_purpose = codes
        .validate_code(&pool, &email, CodeKind::Recovery, &code)
        .await;
    assert!(matches!(other_purpose, Err(ApiError::NotFound(_))));

    backdate_codes(&pool, &email, 301).await?;
    let result = codes
        .validate_code(&pool, &email, CodeKind::Registration, &code)
        .await;
    assert_eq!(forbidden_message(result).as_deref(), Some("code expired"));
    Ok(())
}

#[tokio::test]
async fn delivery_failure_keeps_the_row() -> Result<()> {
    let Some(pool) = support::test_pool().await? else {
        return Ok(());
    };
    let codes = engine(Arc::new(FailingSender));
    let email = unique_email();

    let result = codes
        .request_code(&pool, &email, CodeKind::Registration)
        .await;
    assert!(matches!(result, Err(ApiError::Internal(_))));
    assert_eq!(code_rows(&pool, &email).await?, 1);
    Ok(())
}

#[tokio::test]
async fn sessions_resolve_by_cookie() -> Result<()> {
    let Some(pool) = support::test_pool().await? else {
        return Ok(());
    };
    let state = AuthState::new(
        AuthConfig::new(),
        Arc::new(RecordingSender::default()),
        Arc::new(ErrorReporter::disabled()),
    );

    let created = state
        .sessions()
        .resolve_or_create(&pool, &HeaderMap::new())
        .await?;
    assert!(created.set_cookie.is_some());
    assert!(created.session.is_anonymous());

    let mut headers = HeaderMap::new();
    headers.insert(
        COOKIE,
        HeaderValue::from_str(&format!("SessionID={}", created.session.session_id))?,
    );
    let resolved = state.sessions().resolve_or_create(&pool, &headers).await?;
    assert!(resolved.set_cookie.is_none());
    assert_eq!(resolved.session.session_id, created.session.session_id);

    headers.insert(COOKIE, HeaderValue::from_static("SessionID=forged"));
    let replaced = state.sessions().resolve_or_create(&pool, &headers).await?;
    assert!(replaced.set_cookie.is_some());
    assert_ne!(replaced.session.session_id, "forged");
    Ok(())
}

#[tokio::test]
async fn password_round_trip() -> Result<()> {
    let Some(pool) = support::test_pool().await? else {
        return Ok(());
    };
    let email = unique_email();

    let mut uow = UnitOfWork::begin(&pool).await?;
    credentials::create(uow.conn(), &email, "Dana", "pw1").await?;
    uow.commit().await?;

    let stored: String = sqlx::query("SELECT password FROM users WHERE email = $1")
        .bind(&email)
        .fetch_one(&pool)
        .await?
        .get("password");
    assert_eq!(stored, "707731");

    let user = credentials::authenticate(&pool, &email, "pw1").await?;
    assert_eq!(user.email, email);
    assert!(matches!(
        credentials::authenticate(&pool, &email, "pw2").await,
        Err(ApiError::NotFound(_))
    ));

    let mut uow = UnitOfWork::begin(&pool).await?;
    let duplicate = credentials::create(uow.conn(), &email, "Dana", "pw1").await;
    uow.rollback().await;
    assert!(matches!(duplicate, Err(ApiError::Conflict(_))));
    Ok(())
}

struct Harness {
    app: Router,
    pool: PgPool,
    sender: Arc<RecordingSender>,
}

impl Harness {
    fn new(pool: PgPool) -> Self {
        let sender = Arc::new(RecordingSender::default());
        let state = Arc::new(AuthState::new(
            AuthConfig::new(),
            sender.clone(),
            Arc::new(ErrorReporter::disabled()),
        ));
        Self {
            app: api::app(pool.clone(), state),
            pool,
            sender,
        }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Result<(StatusCode, Option<String>, serde_json::Value)> {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        let request = match body {
            Some(json) => request
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&json)?))?,
            None => request.body(Body::empty())?,
        };

        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, cookie, json))
    }

    async fn bound_user(&self, cookie: &str) -> Result<Option<i64>> {
        let session_id = cookie
            .strip_prefix("SessionID=")
            .context("unexpected cookie")?;
        Ok(
            sqlx::query("SELECT user_id FROM sessions WHERE session_id = $1")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?
                .get("user_id"),
        )
    }
}

#[tokio::test]
async fn registration_binds_the_new_user_to_the_session() -> Result<()> {
    let Some(pool) = support::test_pool().await? else {
        return Ok(());
    };
    let harness = Harness::new(pool);
    let email = unique_email();

    let (status, cookie, _) = harness
        .call(
            Method::GET,
            &format!("/auth/send_code?Email={email}"),
            None,
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    let cookie = cookie.context("anonymous session cookie")?;
    assert_eq!(harness.bound_user(&cookie).await?, None);

    let code = harness.sender.last_code_for(&email)?;
    let (status, _, _) = harness
        .call(
            Method::GET,
            &format!("/auth/check_code?Email={email}&Code={code}"),
            Some(&cookie),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, reissued, _) = harness
        .call(
            Method::POST,
            "/auth/register",
            Some(&cookie),
            Some(serde_json::json!({
                "Email": email,
                "Name": "Dana",
                "Password": "pw1",
                "Code": code,
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(reissued.is_none());

    let user = credentials::authenticate(&harness.pool, &email, "pw1").await?;
    assert_eq!(harness.bound_user(&cookie).await?, Some(user.user_id));

    let (status, _, json) = harness
        .call(
            Method::POST,
            "/auth",
            Some(&cookie),
            Some(serde_json::json!({ "Email": email, "Password": "pw1" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["Email"], serde_json::Value::String(email.clone()));
    assert!(json.get("Password").is_none());
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_leaves_the_session_anonymous() -> Result<()> {
    let Some(pool) = support::test_pool().await? else {
        return Ok(());
    };
    let harness = Harness::new(pool);
    let email = unique_email();

    let mut uow = UnitOfWork::begin(&harness.pool).await?;
    credentials::create(uow.conn(), &email, "Dana", "pw1").await?;
    uow.commit().await?;

    let (status, cookie, _) = harness
        .call(
            Method::GET,
            &format!("/auth/send_code?Email={email}"),
            None,
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    let cookie = cookie.context("anonymous session cookie")?;
    let code = harness.sender.last_code_for(&email)?;

    let (status, _, json) = harness
        .call(
            Method::POST,
            "/auth/register",
            Some(&cookie),
            Some(serde_json::json!({
                "Email": email,
                "Name": "Someone else",
                "Password": "pw2",
                "Code": code,
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["status"], "error");
    assert_eq!(harness.bound_user(&cookie).await?, None);
    Ok(())
}

#[tokio::test]
async fn recovery_changes_the_password() -> Result<()> {
    let Some(pool) = support::test_pool().await? else {
        return Ok(());
    };
    let harness = Harness::new(pool);
    let email = unique_email();

    let (status, _, _) = harness
        .call(
            Method::GET,
            &format!("/auth/send_recovery_code?Email={email}"),
            None,
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut uow = UnitOfWork::begin(&harness.pool).await?;
    credentials::create(uow.conn(), &email, "Dana", "old").await?;
    uow.commit().await?;

    let (status, _, _) = harness
        .call(
            Method::GET,
            &format!("/auth/send_recovery_code?Email={email}"),
            None,
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    let code = harness.sender.last_code_for(&email)?;
    assert_eq!(code.len(), 16);

    let (status, _, _) = harness
        .call(
            Method::PUT,
            "/auth/change_password_by_code",
            None,
            Some(serde_json::json!({ "Email": email, "Password": "new", "Code": code })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    credentials::authenticate(&harness.pool, &email, "new").await?;
    assert!(matches!(
        credentials::authenticate(&harness.pool, &email, "old").await,
        Err(ApiError::NotFound(_))
    ));
    Ok(())
}
