//! Unit of work over one exclusive Postgres transaction.
//!
//! Rollback is the default: a `UnitOfWork` that is dropped without `commit`
//! discards everything written through it. Multi-step flows (registration,
//! password change) run every write through one unit of work and commit as
//! their last step, so a partially applied flow is never observable.

use anyhow::Context;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, Instrument};

use crate::api::error::ApiError;

pub struct UnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl UnitOfWork {
    /// Acquire a pooled connection and open a transaction on it.
    ///
    /// # Errors
    /// Returns `Internal` if no connection can be acquired.
    pub async fn begin(pool: &PgPool) -> Result<Self, ApiError> {
        let span = tracing::info_span!("db.begin", db.system = "postgresql");
        let tx = pool
            .begin()
            .instrument(span)
            .await
            .context("failed to begin transaction")?;
        Ok(Self { tx })
    }

    /// Connection to run statements on inside this unit of work.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut *self.tx
    }

    /// Make every write of this unit of work visible.
    ///
    /// # Errors
    /// Returns `Internal` if the commit fails; nothing is applied in that case.
    pub async fn commit(self) -> Result<(), ApiError> {
        let span = tracing::info_span!("db.commit", db.system = "postgresql");
        self.tx
            .commit()
            .instrument(span)
            .await
            .context("failed to commit transaction")?;
        Ok(())
    }

    /// Discard the unit of work explicitly. Dropping it has the same effect.
    pub async fn rollback(self) {
        if let Err(err) = self.tx.rollback().await {
            debug!("rollback failed, connection will be discarded: {err}");
        }
    }
}

/// Postgres `unique_violation`.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}
