//! Billing invariants
//!
//! Read-only SQL checks for the money invariants: every wallet reconciles
//! with its ledger, snapshots are consistent, balances are non-negative,
//! each team has at most one live subscription and the catalog has exactly
//! one default plan. Safe to run against production at any time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

const CHECKS: [&str; 5] = [
    "wallet_balance_reconciles",
    "single_active_subscription",
    "ledger_snapshots_consistent",
    "single_default_plan",
    "non_negative_balances",
];

/// One failed invariant instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub invariant: String,
    /// Teams affected (empty for catalog-wide checks)
    pub team_ids: Vec<Uuid>,
    pub description: String,
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Money is wrong or unaccounted for
    Critical,
    /// Data inconsistency that needs attention
    High,
    Medium,
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

impl InvariantCheckSummary {
    fn from_violations(checked_at: OffsetDateTime, checks_run: usize, violations: Vec<InvariantViolation>) -> Self {
        let checks_failed = violations
            .iter()
            .map(|v| v.invariant.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();

        Self {
            checked_at,
            checks_run,
            checks_passed: checks_run.saturating_sub(checks_failed),
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UnreconciledWalletRow {
    wallet_id: Uuid,
    team_id: Uuid,
    balance: Decimal,
    ledger_sum: Decimal,
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleSubsRow {
    team_id: Uuid,
    sub_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct BadSnapshotRow {
    transaction_id: Uuid,
    team_id: Uuid,
    transaction_type: String,
    amount: Decimal,
    balance_before: Decimal,
    balance_after: Decimal,
}

#[derive(Debug, sqlx::FromRow)]
struct NegativeBalanceRow {
    wallet_id: Uuid,
    team_id: Uuid,
    balance: Decimal,
}

/// Runs billing invariant checks
#[derive(Clone)]
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        for name in CHECKS {
            violations.extend(self.run_check(name).await?);
        }

        let summary = InvariantCheckSummary::from_violations(now, CHECKS.len(), violations);

        for violation in &summary.violations {
            tracing::error!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                team_ids = ?violation.team_ids,
                "Billing invariant violated: {}",
                violation.description
            );
        }

        Ok(summary)
    }

    /// Run one check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "wallet_balance_reconciles" => self.check_wallet_balance_reconciles().await,
            "single_active_subscription" => self.check_single_active_subscription().await,
            "ledger_snapshots_consistent" => self.check_ledger_snapshots_consistent().await,
            "single_default_plan" => self.check_single_default_plan().await,
            "non_negative_balances" => self.check_non_negative_balances().await,
            other => Err(BillingError::NotFound(format!("Unknown invariant check '{}'", other))),
        }
    }

    pub fn available_checks() -> Vec<&'static str> {
        CHECKS.to_vec()
    }

    /// balance = Σ credits − Σ debits over completed entries
    async fn check_wallet_balance_reconciles(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UnreconciledWalletRow> = sqlx::query_as(
            r#"
            SELECT w.id AS wallet_id, w.team_id, w.balance,
                   COALESCE(SUM(
                       CASE t.transaction_type WHEN 'credit' THEN t.amount ELSE -t.amount END
                   ) FILTER (WHERE t.status = 'completed'), 0) AS ledger_sum
            FROM wallets w
            LEFT JOIN wallet_transactions t ON t.wallet_id = w.id
            GROUP BY w.id, w.team_id, w.balance
            HAVING w.balance <> COALESCE(SUM(
                       CASE t.transaction_type WHEN 'credit' THEN t.amount ELSE -t.amount END
                   ) FILTER (WHERE t.status = 'completed'), 0)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "wallet_balance_reconciles".to_string(),
                team_ids: vec![row.team_id],
                description: format!(
                    "Wallet balance {} does not match ledger total {}",
                    row.balance, row.ledger_sum
                ),
                context: serde_json::json!({
                    "wallet_id": row.wallet_id,
                    "balance": row.balance.to_string(),
                    "ledger_sum": row.ledger_sum.to_string(),
                    "difference": (row.balance - row.ledger_sum).to_string(),
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// At most one active, unexpired subscription per team
    async fn check_single_active_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleSubsRow> = sqlx::query_as(
            r#"
            SELECT team_id, COUNT(*) AS sub_count
            FROM team_subscriptions
            WHERE status = 'active' AND expiry_date > NOW()
            GROUP BY team_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_active_subscription".to_string(),
                team_ids: vec![row.team_id],
                description: format!(
                    "Team has {} active subscriptions (expected at most 1)",
                    row.sub_count
                ),
                context: serde_json::json!({ "subscription_count": row.sub_count }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// balance_after = balance_before ± amount on every entry
    ///
    /// The table constraint enforces this; a hit means it was dropped.
    async fn check_ledger_snapshots_consistent(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<BadSnapshotRow> = sqlx::query_as(
            r#"
            SELECT t.id AS transaction_id, w.team_id, t.transaction_type,
                   t.amount, t.balance_before, t.balance_after
            FROM wallet_transactions t
            JOIN wallets w ON w.id = t.wallet_id
            WHERE NOT (
                (t.transaction_type = 'credit' AND t.balance_after = t.balance_before + t.amount)
                OR (t.transaction_type = 'debit' AND t.balance_after = t.balance_before - t.amount)
            )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "ledger_snapshots_consistent".to_string(),
                team_ids: vec![row.team_id],
                description: format!(
                    "Ledger entry {} has an inconsistent balance snapshot",
                    row.transaction_id
                ),
                context: serde_json::json!({
                    "transaction_id": row.transaction_id,
                    "transaction_type": row.transaction_type,
                    "amount": row.amount.to_string(),
                    "balance_before": row.balance_before.to_string(),
                    "balance_after": row.balance_after.to_string(),
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Exactly one default plan
    async fn check_single_default_plan(&self) -> BillingResult<Vec<InvariantViolation>> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM plans WHERE is_default AND deleted_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

        if count == 1 {
            return Ok(Vec::new());
        }

        Ok(vec![InvariantViolation {
            invariant: "single_default_plan".to_string(),
            team_ids: Vec::new(),
            description: format!("Catalog has {} default plans (expected 1)", count),
            context: serde_json::json!({ "default_plan_count": count }),
            severity: ViolationSeverity::Medium,
        }])
    }

    async fn check_non_negative_balances(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<NegativeBalanceRow> = sqlx::query_as(
            "SELECT id AS wallet_id, team_id, balance FROM wallets WHERE balance < 0",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "non_negative_balances".to_string(),
                team_ids: vec![row.team_id],
                description: format!("Wallet balance is negative ({})", row.balance),
                context: serde_json::json!({
                    "wallet_id": row.wallet_id,
                    "balance": row.balance.to_string(),
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }
}
