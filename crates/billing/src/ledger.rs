//! Ledger Transaction component
//!
//! Append-only record of every balance change. Entries are written inside
//! the same transaction as the wallet update they describe; the only later
//! mutation is back-filling `reference_id` once the caused row exists.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use teamwallet_shared::{PageParams, PaginatedResponse};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::sql_types::text_column;
use crate::txn::PgTx;
use crate::wallet::BalanceSnapshot;

const TRANSACTION_COLUMNS: &str = r#"
    id, wallet_id, transaction_type, amount, balance_before, balance_after,
    reference_type, reference_id, description, status, idempotency_key,
    metadata, created_at
"#;

/// Direction of a balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
        }
    }

    /// Balance after applying `amount` in this direction
    pub fn apply(&self, before: Decimal, amount: Decimal) -> Decimal {
        match self {
            TransactionType::Credit => before + amount,
            TransactionType::Debit => before - amount,
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(TransactionType::Credit),
            "debit" => Ok(TransactionType::Debit),
            other => Err(BillingError::InvalidInput(format!(
                "Unknown transaction type '{}'",
                other
            ))),
        }
    }
}

text_column!(TransactionType);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Reversed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Reversed => "reversed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "reversed" => Ok(TransactionStatus::Reversed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(BillingError::InvalidInput(format!(
                "Unknown transaction status '{}'",
                other
            ))),
        }
    }
}

text_column!(TransactionStatus);

/// Business event that caused a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    /// Initial purchase of a subscription
    Subscription,
    /// Additional charge for a plan or seat change
    SubscriptionChange,
    /// Unused value credited back on a plan or seat change
    SubscriptionRefund,
    /// Operator top-up
    Deposit,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Subscription => "subscription",
            ReferenceType::SubscriptionChange => "subscription_change",
            ReferenceType::SubscriptionRefund => "subscription_refund",
            ReferenceType::Deposit => "deposit",
        }
    }
}

impl std::str::FromStr for ReferenceType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(ReferenceType::Subscription),
            "subscription_change" => Ok(ReferenceType::SubscriptionChange),
            "subscription_refund" => Ok(ReferenceType::SubscriptionRefund),
            "deposit" => Ok(ReferenceType::Deposit),
            other => Err(BillingError::InvalidInput(format!(
                "Unknown reference type '{}'",
                other
            ))),
        }
    }
}

text_column!(ReferenceType);

/// Full ledger row, including internal metadata
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
    pub description: String,
    pub status: TransactionStatus,
    pub idempotency_key: Option<String>,
    pub metadata: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl WalletTransaction {
    /// `balance_after = balance_before ± amount`
    pub fn is_snapshot_consistent(&self) -> bool {
        self.transaction_type.apply(self.balance_before, self.amount) == self.balance_after
    }

    /// Signed effect on the balance (credits positive)
    pub fn signed_amount(&self) -> Decimal {
        match self.transaction_type {
            TransactionType::Credit => self.amount,
            TransactionType::Debit => -self.amount,
        }
    }
}

/// Team-facing ledger row; the metadata column is never exposed
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub transaction_type: TransactionType,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub balance_before: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub balance_after: Decimal,
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
    pub description: String,
    pub status: TransactionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<WalletTransaction> for LedgerEntry {
    fn from(tx: WalletTransaction) -> Self {
        Self {
            id: tx.id,
            transaction_type: tx.transaction_type,
            amount: tx.amount,
            balance_before: tx.balance_before,
            balance_after: tx.balance_after,
            reference_type: tx.reference_type,
            reference_id: tx.reference_id,
            description: tx.description,
            status: tx.status,
            created_at: tx.created_at,
        }
    }
}

/// Entry to append
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub wallet_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub snapshot: BalanceSnapshot,
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
    pub description: String,
    pub idempotency_key: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewLedgerEntry {
    fn validate(&self) -> BillingResult<()> {
        if self.amount <= Decimal::ZERO {
            return Err(BillingError::Internal(format!(
                "Ledger amount must be positive, got {}",
                self.amount
            )));
        }
        let expected = self.transaction_type.apply(self.snapshot.before, self.amount);
        if expected != self.snapshot.after {
            return Err(BillingError::Internal(format!(
                "Ledger snapshot mismatch: {} {} {} != {}",
                self.snapshot.before,
                self.transaction_type.as_str(),
                self.amount,
                self.snapshot.after
            )));
        }
        Ok(())
    }
}

/// Filters for the team-facing listing
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LedgerFilter {
    #[serde(alias = "type")]
    pub transaction_type: Option<TransactionType>,
    pub reference_type: Option<ReferenceType>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub from: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub to: Option<OffsetDateTime>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl LedgerFilter {
    pub fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            limit: self.limit,
        }
    }

    pub fn validate(&self) -> BillingResult<()> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(BillingError::InvalidInput(
                    "'from' must not be after 'to'".to_string(),
                ));
            }
        }
        let page = self.page_params();
        if page.offset().is_none() {
            return Err(BillingError::page_out_of_range(page.page()));
        }
        Ok(())
    }
}

/// Ledger service
#[derive(Clone)]
pub struct Ledger {
    pool: PgPool,
}

impl Ledger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one `completed` entry inside the caller's transaction
    pub(crate) async fn append(tx: &mut PgTx, entry: NewLedgerEntry) -> BillingResult<WalletTransaction> {
        entry.validate()?;

        let row = sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            INSERT INTO wallet_transactions (
                wallet_id, transaction_type, amount, balance_before, balance_after,
                reference_type, reference_id, description, status, idempotency_key, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'completed', $9, $10)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(entry.wallet_id)
        .bind(entry.transaction_type)
        .bind(entry.amount)
        .bind(entry.snapshot.before)
        .bind(entry.snapshot.after)
        .bind(entry.reference_type)
        .bind(entry.reference_id)
        .bind(&entry.description)
        .bind(&entry.idempotency_key)
        .bind(&entry.metadata)
        .fetch_one(&mut **tx)
        .await?;

        tracing::debug!(
            transaction_id = %row.id,
            wallet_id = %row.wallet_id,
            transaction_type = row.transaction_type.as_str(),
            amount = %row.amount,
            balance_after = %row.balance_after,
            "Appended ledger entry"
        );

        Ok(row)
    }

    /// Set the deferred reference id; only allowed while it is still NULL
    pub(crate) async fn attach_reference(
        tx: &mut PgTx,
        transaction_id: Uuid,
        reference_id: Uuid,
    ) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE wallet_transactions
            SET reference_id = $2
            WHERE id = $1 AND reference_id IS NULL
            "#,
        )
        .bind(transaction_id)
        .bind(reference_id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::InvalidState(format!(
                "Ledger entry {} already has a reference",
                transaction_id
            )));
        }

        Ok(())
    }

    /// Reject a key that was already used for this wallet
    ///
    /// Runs under the wallet lock, so the check and the later insert can't
    /// race; the unique index backs it up.
    pub(crate) async fn ensure_new_idempotency_key(
        tx: &mut PgTx,
        wallet_id: Uuid,
        key: &str,
    ) -> BillingResult<()> {
        if key.trim().is_empty() || key.len() > 255 {
            return Err(BillingError::InvalidInput(
                "Idempotency key must be 1-255 characters".to_string(),
            ));
        }

        let existing: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM wallet_transactions WHERE wallet_id = $1 AND idempotency_key = $2",
        )
        .bind(wallet_id)
        .bind(key)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some((transaction_id,)) = existing {
            tracing::warn!(
                wallet_id = %wallet_id,
                transaction_id = %transaction_id,
                "Rejected replayed idempotency key"
            );
            return Err(BillingError::Conflict(format!(
                "Request already processed as transaction {}",
                transaction_id
            )));
        }

        Ok(())
    }

    pub async fn get_transaction(&self, transaction_id: Uuid) -> BillingResult<WalletTransaction> {
        sqlx::query_as::<_, WalletTransaction>(&format!(
            "SELECT {} FROM wallet_transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("Transaction {} not found", transaction_id)))
    }

    /// Team ledger, newest first; empty if the team has no wallet yet
    pub async fn list_transactions(
        &self,
        team_id: Uuid,
        filter: LedgerFilter,
    ) -> BillingResult<PaginatedResponse<LedgerEntry>> {
        filter.validate()?;
        let page = filter.page_params();
        let offset = page
            .offset()
            .ok_or_else(|| BillingError::page_out_of_range(page.page()))?;

        let wallet: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM wallets WHERE team_id = $1")
            .bind(team_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some((wallet_id,)) = wallet else {
            return Ok(PaginatedResponse::new(Vec::new(), 0, page.page(), page.limit()));
        };

        let transaction_type = filter.transaction_type.map(|t| t.as_str());
        let reference_type = filter.reference_type.map(|r| r.as_str());

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM wallet_transactions
            WHERE wallet_id = $1
              AND ($2::text IS NULL OR transaction_type = $2)
              AND ($3::text IS NULL OR reference_type = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at <= $5)
            "#,
        )
        .bind(wallet_id)
        .bind(transaction_type)
        .bind(reference_type)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&self.pool)
        .await?;

        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, transaction_type, amount, balance_before, balance_after,
                   reference_type, reference_id, description, status, created_at
            FROM wallet_transactions
            WHERE wallet_id = $1
              AND ($2::text IS NULL OR transaction_type = $2)
              AND ($3::text IS NULL OR reference_type = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at <= $5)
            ORDER BY created_at DESC, id DESC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(wallet_id)
        .bind(transaction_type)
        .bind(reference_type)
        .bind(filter.from)
        .bind(filter.to)
        .bind(page.limit())
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(PaginatedResponse::new(entries, total, page.page(), page.limit()))
    }
}
