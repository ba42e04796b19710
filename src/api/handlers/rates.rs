//! Public exchange rates.

use anyhow::Context;
use axum::{extract::Extension, response::Json};
use serde::Serialize;
use sqlx::{PgPool, Row};
use tracing::{info_span, Instrument};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ErrorBody};

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct Rate {
    #[serde(rename = "RateID")]
    pub rate_id: i64,
    #[serde(rename = "CurrencyFrom")]
    pub currency_from: String,
    #[serde(rename = "CurrencyTo")]
    pub currency_to: String,
    #[serde(rename = "Rate")]
    pub rate: f64,
    #[serde(rename = "CTime")]
    pub created_at_unix: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct Rates {
    #[serde(rename = "RubToIls")]
    pub rub_to_ils: Rate,
    #[serde(rename = "IlsToRub")]
    pub ils_to_rub: Rate,
}

/// Latest RUB to ILS and ILS to RUB rates.
#[utoipa::path(
    get,
    path = "/public/rates",
    responses(
        (status = 200, description = "Current rates", body = Rates),
        (status = 404, description = "No rate recorded for a pair", body = ErrorBody),
        (status = 500, description = "Storage failure", body = ErrorBody)
    ),
    tag = "public"
)]
pub async fn rates(pool: Extension<PgPool>) -> Result<Json<Rates>, ApiError> {
    let rub_to_ils = latest_rate(&pool, "RUB", "ILS").await?;
    let ils_to_rub = latest_rate(&pool, "ILS", "RUB").await?;
    Ok(Json(Rates {
        rub_to_ils,
        ils_to_rub,
    }))
}

async fn latest_rate(pool: &PgPool, from: &str, to: &str) -> Result<Rate, ApiError> {
    let query = r"
        SELECT rate_id, currency_from, currency_to, rate,
               EXTRACT(EPOCH FROM ctime)::BIGINT AS ctime_unix
        FROM rates
        WHERE currency_from = $1 AND currency_to = $2
        ORDER BY ctime DESC
        LIMIT 1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(from)
        .bind(to)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup rate")?;

    row.map(|row| Rate {
        rate_id: row.get("rate_id"),
        currency_from: row.get("currency_from"),
        currency_to: row.get("currency_to"),
        rate: row.get("rate"),
        created_at_unix: row.get("ctime_unix"),
    })
    .ok_or_else(|| ApiError::NotFound(format!("no rate for {from}/{to}")))
}
