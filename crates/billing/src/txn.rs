//! Transaction helpers shared by every mutating billing operation
//!
//! Lock order inside a billing transaction is always:
//! team row -> current subscription row -> wallet row.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

pub(crate) type PgTx = Transaction<'static, Postgres>;

/// Open a transaction with a bounded statement timeout
///
/// A timed-out statement aborts the transaction, and dropping an
/// uncommitted `Transaction` rolls everything back.
pub(crate) async fn begin_billing_tx(pool: &PgPool, timeout_ms: u64) -> BillingResult<PgTx> {
    let mut tx = pool.begin().await?;

    sqlx::query(&format!("SET LOCAL statement_timeout = {}", timeout_ms))
        .execute(&mut *tx)
        .await?;

    Ok(tx)
}

/// Lock the team row, serializing all billing mutations for one team
pub(crate) async fn lock_team(tx: &mut PgTx, team_id: Uuid) -> BillingResult<()> {
    let found: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM teams WHERE id = $1 FOR UPDATE")
        .bind(team_id)
        .fetch_optional(&mut **tx)
        .await?;

    found
        .map(|_| ())
        .ok_or_else(|| BillingError::NotFound(format!("Team {} not found", team_id)))
}
