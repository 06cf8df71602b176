//! Wallet Store
//!
//! One prepaid balance per team. The balance only moves together with a
//! ledger entry, inside a transaction that holds the wallet row lock.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::ledger::{Ledger, NewLedgerEntry, ReferenceType, TransactionType, WalletTransaction};
use crate::sql_types::text_column;
use crate::txn::{begin_billing_tx, lock_team, PgTx};

const WALLET_COLUMNS: &str =
    "id, team_id, balance, currency, status, created_at, updated_at";

/// Wallet status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Active,
    Suspended,
    Closed,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Suspended => "suspended",
            WalletStatus::Closed => "closed",
        }
    }
}

impl std::str::FromStr for WalletStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(WalletStatus::Active),
            "suspended" => Ok(WalletStatus::Suspended),
            "closed" => Ok(WalletStatus::Closed),
            other => Err(BillingError::InvalidInput(format!(
                "Unknown wallet status '{}'",
                other
            ))),
        }
    }
}

text_column!(WalletStatus);

/// Balance before and after one mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceSnapshot {
    #[serde(with = "rust_decimal::serde::str")]
    pub before: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub after: Decimal,
}

/// Wallet record
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub team_id: Uuid,
    pub balance: Decimal,
    pub currency: String,
    pub status: WalletStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Wallet {
    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }

    pub fn has_sufficient_balance(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }

    pub fn ensure_active(&self) -> BillingResult<()> {
        if !self.is_active() {
            return Err(BillingError::InvalidState(format!(
                "Wallet for team {} is {}",
                self.team_id,
                self.status.as_str()
            )));
        }
        Ok(())
    }

    /// Decrease the in-memory balance, returning the snapshot
    ///
    /// Only the value changes; `WalletStore::debit` persists it.
    pub fn debit(&mut self, amount: Decimal) -> BillingResult<BalanceSnapshot> {
        ensure_positive(amount)?;
        self.ensure_active()?;
        if !self.has_sufficient_balance(amount) {
            return Err(BillingError::insufficient_balance(amount, self.balance));
        }

        let before = self.balance;
        self.balance -= amount;
        Ok(BalanceSnapshot {
            before,
            after: self.balance,
        })
    }

    /// Increase the in-memory balance, returning the snapshot
    ///
    /// Credits do not depend on the current balance.
    pub fn credit(&mut self, amount: Decimal) -> BillingResult<BalanceSnapshot> {
        ensure_positive(amount)?;
        self.ensure_active()?;

        let before = self.balance;
        self.balance += amount;
        Ok(BalanceSnapshot {
            before,
            after: self.balance,
        })
    }
}

fn ensure_positive(amount: Decimal) -> BillingResult<()> {
    if amount <= Decimal::ZERO {
        return Err(BillingError::InvalidInput(format!(
            "Amount must be positive, got {}",
            amount
        )));
    }
    if amount != amount.round_dp(2) {
        return Err(BillingError::InvalidInput(format!(
            "Amount must have at most 2 decimal places, got {}",
            amount
        )));
    }
    Ok(())
}

/// Team-facing balance view
#[derive(Debug, Clone, Serialize)]
pub struct WalletBalance {
    pub team_id: Uuid,
    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Decimal,
    pub currency: String,
    pub status: WalletStatus,
}

impl From<&Wallet> for WalletBalance {
    fn from(wallet: &Wallet) -> Self {
        Self {
            team_id: wallet.team_id,
            balance: wallet.balance,
            currency: wallet.currency.clone(),
            status: wallet.status,
        }
    }
}

/// Operator top-up
#[derive(Debug, Clone, Deserialize)]
pub struct DepositRequest {
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositResult {
    pub wallet: Wallet,
    pub transaction: WalletTransaction,
}

/// Wallet store
#[derive(Clone)]
pub struct WalletStore {
    pool: PgPool,
    config: BillingConfig,
}

impl WalletStore {
    pub fn new(pool: PgPool, config: BillingConfig) -> Self {
        Self { pool, config }
    }

    /// Get the team's wallet, creating it with balance 0, and lock it
    ///
    /// Concurrent first access is safe: the insert is a no-op when another
    /// transaction created the row, and the locked read waits for it.
    pub(crate) async fn lock_or_create(&self, tx: &mut PgTx, team_id: Uuid) -> BillingResult<Wallet> {
        sqlx::query(
            r#"
            INSERT INTO wallets (team_id, currency)
            VALUES ($1, $2)
            ON CONFLICT (team_id) DO NOTHING
            "#,
        )
        .bind(team_id)
        .bind(&self.config.default_currency)
        .execute(&mut **tx)
        .await?;

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE team_id = $1 FOR UPDATE",
            WALLET_COLUMNS
        ))
        .bind(team_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(wallet)
    }

    /// Lock an existing wallet without creating one
    pub(crate) async fn lock_existing(&self, tx: &mut PgTx, team_id: Uuid) -> BillingResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE team_id = $1 FOR UPDATE",
            WALLET_COLUMNS
        ))
        .bind(team_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(wallet)
    }

    /// Debit a locked wallet and persist the new balance
    pub(crate) async fn debit(
        &self,
        tx: &mut PgTx,
        wallet: &mut Wallet,
        amount: Decimal,
    ) -> BillingResult<BalanceSnapshot> {
        let snapshot = wallet.debit(amount)?;
        self.persist_balance(tx, wallet).await?;
        Ok(snapshot)
    }

    /// Credit a locked wallet and persist the new balance
    pub(crate) async fn credit(
        &self,
        tx: &mut PgTx,
        wallet: &mut Wallet,
        amount: Decimal,
    ) -> BillingResult<BalanceSnapshot> {
        let snapshot = wallet.credit(amount)?;
        self.persist_balance(tx, wallet).await?;
        Ok(snapshot)
    }

    async fn persist_balance(&self, tx: &mut PgTx, wallet: &mut Wallet) -> BillingResult<()> {
        let (updated_at,): (OffsetDateTime,) = sqlx::query_as(
            "UPDATE wallets SET balance = $2, updated_at = NOW() WHERE id = $1 RETURNING updated_at",
        )
        .bind(wallet.id)
        .bind(wallet.balance)
        .fetch_one(&mut **tx)
        .await?;

        wallet.updated_at = updated_at;
        Ok(())
    }

    /// Read-only lookup; `None` if the team never had a billing interaction
    pub async fn find_wallet(&self, team_id: Uuid) -> BillingResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE team_id = $1",
            WALLET_COLUMNS
        ))
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    /// Get the team's wallet, creating an empty one on first access
    pub async fn get_wallet(&self, team_id: Uuid) -> BillingResult<Wallet> {
        if let Some(wallet) = self.find_wallet(team_id).await? {
            return Ok(wallet);
        }

        let mut tx = begin_billing_tx(&self.pool, self.config.transaction_timeout_ms).await?;
        lock_team(&mut tx, team_id).await?;
        let wallet = self.lock_or_create(&mut tx, team_id).await?;
        tx.commit().await?;

        tracing::info!(team_id = %team_id, wallet_id = %wallet.id, "Created wallet");

        Ok(wallet)
    }

    pub async fn get_balance(&self, team_id: Uuid) -> BillingResult<WalletBalance> {
        let wallet = self.get_wallet(team_id).await?;
        Ok(WalletBalance::from(&wallet))
    }

    /// Operator top-up: credit the wallet with a `deposit` ledger entry
    pub async fn deposit(&self, team_id: Uuid, request: DepositRequest) -> BillingResult<DepositResult> {
        ensure_positive(request.amount)?;

        let mut tx = begin_billing_tx(&self.pool, self.config.transaction_timeout_ms).await?;
        lock_team(&mut tx, team_id).await?;
        let mut wallet = self.lock_or_create(&mut tx, team_id).await?;

        if let Some(key) = request.idempotency_key.as_deref() {
            Ledger::ensure_new_idempotency_key(&mut tx, wallet.id, key).await?;
        }

        let snapshot = self.credit(&mut tx, &mut wallet, request.amount).await?;

        let transaction = Ledger::append(
            &mut tx,
            NewLedgerEntry {
                wallet_id: wallet.id,
                transaction_type: TransactionType::Credit,
                amount: request.amount,
                snapshot,
                reference_type: ReferenceType::Deposit,
                reference_id: None,
                description: request
                    .description
                    .unwrap_or_else(|| "Wallet deposit".to_string()),
                idempotency_key: request.idempotency_key,
                metadata: serde_json::json!({}),
            },
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            team_id = %team_id,
            wallet_id = %wallet.id,
            amount = %request.amount,
            balance = %wallet.balance,
            "Deposited funds into wallet"
        );

        Ok(DepositResult { wallet, transaction })
    }

    /// Suspend, reactivate or close a wallet
    ///
    /// A wallet holding funds cannot be closed.
    pub async fn set_wallet_status(&self, team_id: Uuid, status: WalletStatus) -> BillingResult<Wallet> {
        let mut tx = begin_billing_tx(&self.pool, self.config.transaction_timeout_ms).await?;
        lock_team(&mut tx, team_id).await?;
        let wallet = self.lock_or_create(&mut tx, team_id).await?;

        if wallet.status == status {
            return Err(BillingError::NoOp(format!(
                "Wallet is already {}",
                status.as_str()
            )));
        }
        if wallet.status == WalletStatus::Closed {
            return Err(BillingError::InvalidState(
                "Closed wallets cannot be reopened".to_string(),
            ));
        }
        if status == WalletStatus::Closed && !wallet.balance.is_zero() {
            return Err(BillingError::InvalidState(format!(
                "Wallet still holds {} {}; it cannot be closed",
                wallet.balance, wallet.currency
            )));
        }

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "UPDATE wallets SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            WALLET_COLUMNS
        ))
        .bind(wallet.id)
        .bind(status)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            team_id = %team_id,
            wallet_id = %wallet.id,
            status = %status.as_str(),
            "Changed wallet status"
        );

        Ok(wallet)
    }
}
