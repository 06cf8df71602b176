//! Subscription Lifecycle Manager
//!
//! Owns a team's subscription slot: subscribe, preview and apply plan/seat
//! changes, cancel, and the read paths. Every mutation runs in one database
//! transaction that locks, in order, the team row, the current subscription
//! row and the wallet row, then commits wallet, ledger and subscription
//! writes together or not at all.
//!
//! "Active" always means `status = 'active' AND expiry_date > now`; rows
//! past their expiry are inactive on read even before the sweeper marks them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use teamwallet_shared::{PageParams, PaginatedResponse};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::ledger::{Ledger, NewLedgerEntry, ReferenceType, TransactionType, WalletTransaction};
use crate::plans::{fetch_plan, Plan};
use crate::pricing::{self, ceil_days, BillingCycle, CostBreakdown};
use crate::proration::{calculate_proration, ProrationInput, ProrationResult};
use crate::sql_types::text_column;
use crate::txn::{begin_billing_tx, lock_team, PgTx};
use crate::wallet::{Wallet, WalletStore};

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, team_id, plan_id, member_count, amount_paid, billing_cycle, payment_source,
    subscription_date, started_at, expiry_date, status, wallet_transaction_id,
    previous_subscription_id, ended_at, cancelled_at, created_at, updated_at
"#;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
    /// Replaced by a plan or seat change
    Changed,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Changed => "changed",
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(SubscriptionStatus::Active),
            "expired" => Ok(SubscriptionStatus::Expired),
            "cancelled" | "canceled" => Ok(SubscriptionStatus::Cancelled),
            "changed" => Ok(SubscriptionStatus::Changed),
            other => Err(BillingError::InvalidInput(format!(
                "Unknown subscription status '{}'",
                other
            ))),
        }
    }
}

text_column!(SubscriptionStatus);

/// How a subscription was paid for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentSource {
    Wallet,
    /// Zero-cost subscription, no ledger entry
    Free,
}

impl PaymentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentSource::Wallet => "wallet",
            PaymentSource::Free => "free",
        }
    }

    pub fn for_amount(amount: Decimal) -> Self {
        if amount > Decimal::ZERO {
            PaymentSource::Wallet
        } else {
            PaymentSource::Free
        }
    }
}

impl std::str::FromStr for PaymentSource {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wallet" => Ok(PaymentSource::Wallet),
            "free" => Ok(PaymentSource::Free),
            other => Err(BillingError::InvalidInput(format!(
                "Unknown payment source '{}'",
                other
            ))),
        }
    }
}

text_column!(PaymentSource);

/// Kind of plan/seat change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Upgrade,
    Downgrade,
    IncreaseSeats,
    DecreaseSeats,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Upgrade => "upgrade",
            ChangeType::Downgrade => "downgrade",
            ChangeType::IncreaseSeats => "increase_seats",
            ChangeType::DecreaseSeats => "decrease_seats",
        }
    }

    /// Classify a change
    ///
    /// Same plan: seat direction. Different plan: compare per-seat price for
    /// the subscription's cycle; equal prices fall back to seat direction
    /// and default to an upgrade.
    pub fn classify(
        same_plan: bool,
        current_price: Decimal,
        new_price: Decimal,
        current_seats: i32,
        new_seats: i32,
    ) -> Self {
        if same_plan {
            return if new_seats > current_seats {
                ChangeType::IncreaseSeats
            } else {
                ChangeType::DecreaseSeats
            };
        }

        match new_price.cmp(&current_price) {
            std::cmp::Ordering::Greater => ChangeType::Upgrade,
            std::cmp::Ordering::Less => ChangeType::Downgrade,
            std::cmp::Ordering::Equal if new_seats < current_seats => ChangeType::Downgrade,
            std::cmp::Ordering::Equal => ChangeType::Upgrade,
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription record
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TeamSubscription {
    pub id: Uuid,
    pub team_id: Uuid,
    pub plan_id: Uuid,
    pub member_count: i32,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount_paid: Decimal,
    pub billing_cycle: BillingCycle,
    pub payment_source: PaymentSource,
    /// Start of the billing period; carried over on plan changes
    #[serde(with = "time::serde::rfc3339")]
    pub subscription_date: OffsetDateTime,
    /// When this row started covering the period
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry_date: OffsetDateTime,
    pub status: SubscriptionStatus,
    pub wallet_transaction_id: Option<Uuid>,
    pub previous_subscription_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TeamSubscription {
    /// Active status and not yet expired, evaluated at `now`
    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        self.status == SubscriptionStatus::Active && self.expiry_date > now
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(OffsetDateTime::now_utc())
    }

    /// Whole days left, rounded up, never negative
    pub fn days_remaining_at(&self, now: OffsetDateTime) -> i64 {
        ceil_days(self.expiry_date - now).max(0)
    }

    fn proration_input(&self, new_price_per_seat: Decimal, new_member_count: i32) -> ProrationInput {
        ProrationInput {
            period_start: self.subscription_date,
            coverage_start: self.started_at,
            expiry_date: self.expiry_date,
            amount_paid: self.amount_paid,
            new_price_per_seat,
            new_member_count,
        }
    }
}

/// Current subscription with read-time derived fields
#[derive(Debug, Clone, Serialize)]
pub struct CurrentSubscription {
    pub subscription: TeamSubscription,
    pub plan: Plan,
    pub days_remaining: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRequest {
    pub plan_id: Uuid,
    pub member_count: i32,
    pub billing_cycle: BillingCycle,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeResult {
    pub subscription: TeamSubscription,
    #[serde(with = "rust_decimal::serde::str")]
    pub wallet_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount_deducted: Decimal,
    pub transaction_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanChangeRequest {
    pub new_plan_id: Uuid,
    pub new_member_count: i32,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanChangePreview {
    pub current_subscription_id: Uuid,
    pub current_plan_id: Uuid,
    pub new_plan_id: Uuid,
    pub current_member_count: i32,
    pub new_member_count: i32,
    pub billing_cycle: BillingCycle,
    pub change_type: ChangeType,
    pub proration: ProrationResult,
    #[serde(with = "rust_decimal::serde::str")]
    pub current_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub projected_balance: Decimal,
    pub sufficient_balance: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry_date: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanChangeResult {
    pub change_type: ChangeType,
    pub previous_subscription: TeamSubscription,
    pub subscription: TeamSubscription,
    pub proration: ProrationResult,
    pub transaction_id: Option<Uuid>,
    #[serde(with = "rust_decimal::serde::str")]
    pub wallet_balance: Decimal,
}

/// Outcome of validating and pricing a requested change
#[derive(Debug, Clone)]
pub(crate) struct ChangeQuote {
    pub change_type: ChangeType,
    pub proration: ProrationResult,
}

/// Validate a change against the current subscription and price it
///
/// Shared by the preview and the real change so both quote the same figures.
pub(crate) fn quote_plan_change(
    current: &TeamSubscription,
    current_plan: &Plan,
    new_plan: &Plan,
    new_member_count: i32,
    now: OffsetDateTime,
) -> BillingResult<ChangeQuote> {
    pricing::validate_member_count(new_member_count)?;

    let same_plan = current.plan_id == new_plan.id;
    if same_plan && current.member_count == new_member_count {
        return Err(BillingError::NoOp(format!(
            "Team is already on plan '{}' with {} members",
            new_plan.slug, new_member_count
        )));
    }

    // A change keeps the billing cycle
    let cycle = current.billing_cycle;
    new_plan.ensure_purchasable()?;
    new_plan.ensure_cycle_supported(cycle)?;
    new_plan.ensure_seat_limit(new_member_count)?;

    let new_price = new_plan.price_per_seat(cycle);
    let change_type = ChangeType::classify(
        same_plan,
        current_plan.price_per_seat(cycle),
        new_price,
        current.member_count,
        new_member_count,
    );

    let proration = calculate_proration(&current.proration_input(new_price, new_member_count), now);

    Ok(ChangeQuote {
        change_type,
        proration,
    })
}

/// Balance check for a preview; mirrors what the real change will enforce
fn preview_sufficiency(wallet: Option<&Wallet>, proration: &ProrationResult) -> (Decimal, Decimal, bool) {
    let balance = wallet.map(|w| w.balance).unwrap_or(Decimal::ZERO);
    let projected = balance - proration.prorated_charge;

    let wallet_usable = wallet.map(Wallet::is_active).unwrap_or(true);
    let sufficient = if proration.prorated_charge.is_zero() {
        true
    } else {
        wallet_usable && balance >= proration.charge_amount()
    };

    (balance, projected, sufficient)
}

// =============================================================================
// Service
// =============================================================================

/// Subscription lifecycle service
#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
    config: BillingConfig,
    wallets: WalletStore,
}

impl SubscriptionService {
    pub fn new(pool: PgPool, config: BillingConfig) -> Self {
        let wallets = WalletStore::new(pool.clone(), config.clone());
        Self {
            pool,
            config,
            wallets,
        }
    }

    async fn begin(&self) -> BillingResult<PgTx> {
        begin_billing_tx(&self.pool, self.config.transaction_timeout_ms).await
    }

    /// Lock the team's active, unexpired subscription (if any)
    async fn lock_active_subscription(
        tx: &mut PgTx,
        team_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Option<TeamSubscription>> {
        let subscription = sqlx::query_as::<_, TeamSubscription>(&format!(
            r#"
            SELECT {}
            FROM team_subscriptions
            WHERE team_id = $1 AND status = 'active' AND expiry_date > $2
            ORDER BY expiry_date DESC
            LIMIT 1
            FOR UPDATE
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(team_id)
        .bind(now)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(subscription)
    }

    async fn find_active_subscription(
        &self,
        team_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Option<TeamSubscription>> {
        let subscription = sqlx::query_as::<_, TeamSubscription>(&format!(
            r#"
            SELECT {}
            FROM team_subscriptions
            WHERE team_id = $1 AND status = 'active' AND expiry_date > $2
            ORDER BY expiry_date DESC
            LIMIT 1
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(team_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_subscription(
        tx: &mut PgTx,
        team_id: Uuid,
        plan_id: Uuid,
        member_count: i32,
        amount_paid: Decimal,
        billing_cycle: BillingCycle,
        subscription_date: OffsetDateTime,
        started_at: OffsetDateTime,
        expiry_date: OffsetDateTime,
        wallet_transaction_id: Option<Uuid>,
        previous_subscription_id: Option<Uuid>,
    ) -> BillingResult<TeamSubscription> {
        let subscription = sqlx::query_as::<_, TeamSubscription>(&format!(
            r#"
            INSERT INTO team_subscriptions (
                team_id, plan_id, member_count, amount_paid, billing_cycle, payment_source,
                subscription_date, started_at, expiry_date, status,
                wallet_transaction_id, previous_subscription_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'active', $10, $11)
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(team_id)
        .bind(plan_id)
        .bind(member_count)
        .bind(amount_paid)
        .bind(billing_cycle)
        .bind(PaymentSource::for_amount(amount_paid))
        .bind(subscription_date)
        .bind(started_at)
        .bind(expiry_date)
        .bind(wallet_transaction_id)
        .bind(previous_subscription_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(subscription)
    }

    /// Start a subscription, charging the wallet for the full period
    pub async fn subscribe(&self, team_id: Uuid, request: SubscribeRequest) -> BillingResult<SubscribeResult> {
        pricing::validate_member_count(request.member_count)?;
        let mut tx = self.begin().await?;
        lock_team(&mut tx, team_id).await?;
        // Read the clock only once the team lock is held
        let now = OffsetDateTime::now_utc();

        if let Some(existing) = Self::lock_active_subscription(&mut tx, team_id, now).await? {
            tracing::warn!(
                team_id = %team_id,
                subscription_id = %existing.id,
                "Subscribe rejected: team already has an active subscription"
            );
            return Err(BillingError::Conflict(format!(
                "Team already has an active subscription ({}) until {}",
                existing.id, existing.expiry_date
            )));
        }

        let plan = fetch_plan(&mut *tx, request.plan_id).await?;
        let cost = pricing::calculate_cost(&plan, request.member_count, request.billing_cycle, now)?;

        let mut wallet = self.wallets.lock_or_create(&mut tx, team_id).await?;

        let mut ledger_entry: Option<WalletTransaction> = None;
        if cost.total_amount > Decimal::ZERO {
            if let Some(key) = request.idempotency_key.as_deref() {
                Ledger::ensure_new_idempotency_key(&mut tx, wallet.id, key).await?;
            }

            let snapshot = match self.wallets.debit(&mut tx, &mut wallet, cost.total_amount).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(
                        team_id = %team_id,
                        plan_id = %plan.id,
                        required = %cost.total_amount,
                        available = %wallet.balance,
                        error = %e,
                        "Subscribe rejected"
                    );
                    return Err(e);
                }
            };

            let entry = Ledger::append(
                &mut tx,
                NewLedgerEntry {
                    wallet_id: wallet.id,
                    transaction_type: TransactionType::Debit,
                    amount: cost.total_amount,
                    snapshot,
                    reference_type: ReferenceType::Subscription,
                    reference_id: None,
                    description: format!(
                        "Subscription to {} ({} members, {})",
                        plan.name, request.member_count, request.billing_cycle
                    ),
                    idempotency_key: request.idempotency_key.clone(),
                    metadata: serde_json::json!({
                        "plan_id": plan.id,
                        "plan_slug": plan.slug,
                        "price_per_seat": cost.price_per_seat.to_string(),
                        "member_count": request.member_count,
                        "billing_cycle": request.billing_cycle.as_str(),
                    }),
                },
            )
            .await?;
            ledger_entry = Some(entry);
        }

        let subscription = Self::insert_subscription(
            &mut tx,
            team_id,
            plan.id,
            request.member_count,
            cost.total_amount,
            request.billing_cycle,
            cost.subscription_date,
            now,
            cost.expiry_date,
            ledger_entry.as_ref().map(|e| e.id),
            None,
        )
        .await?;

        if let Some(entry) = &ledger_entry {
            Ledger::attach_reference(&mut tx, entry.id, subscription.id).await?;
        }

        tx.commit().await?;

        tracing::info!(
            team_id = %team_id,
            subscription_id = %subscription.id,
            plan_id = %plan.id,
            member_count = request.member_count,
            billing_cycle = request.billing_cycle.as_str(),
            amount = %cost.total_amount,
            balance = %wallet.balance,
            "Created subscription"
        );

        Ok(SubscribeResult {
            subscription,
            wallet_balance: wallet.balance,
            amount_deducted: cost.total_amount,
            transaction_id: ledger_entry.map(|e| e.id),
        })
    }

    /// Quote a plan/seat change without touching any state
    ///
    /// The real change re-validates everything under lock, so the figures
    /// here can go stale if the subscription changes in between.
    pub async fn preview_plan_change(
        &self,
        team_id: Uuid,
        new_plan_id: Uuid,
        new_member_count: i32,
    ) -> BillingResult<PlanChangePreview> {
        let now = OffsetDateTime::now_utc();

        let current = self
            .find_active_subscription(team_id, now)
            .await?
            .ok_or_else(|| BillingError::NotFound("No active subscription".to_string()))?;

        let current_plan = fetch_plan(&self.pool, current.plan_id).await?;
        let new_plan = fetch_plan(&self.pool, new_plan_id).await?;
        let quote = quote_plan_change(&current, &current_plan, &new_plan, new_member_count, now)?;

        let wallet = self.wallets.find_wallet(team_id).await?;
        let (current_balance, projected_balance, sufficient_balance) =
            preview_sufficiency(wallet.as_ref(), &quote.proration);

        Ok(PlanChangePreview {
            current_subscription_id: current.id,
            current_plan_id: current.plan_id,
            new_plan_id: new_plan.id,
            current_member_count: current.member_count,
            new_member_count,
            billing_cycle: current.billing_cycle,
            change_type: quote.change_type,
            proration: quote.proration,
            current_balance,
            projected_balance,
            sufficient_balance,
            expiry_date: current.expiry_date,
        })
    }

    /// Switch plan and/or seat count for the rest of the current period
    pub async fn change_plan(&self, team_id: Uuid, request: PlanChangeRequest) -> BillingResult<PlanChangeResult> {
        pricing::validate_member_count(request.new_member_count)?;
        let mut tx = self.begin().await?;
        lock_team(&mut tx, team_id).await?;
        // Read the clock only once the team lock is held
        let now = OffsetDateTime::now_utc();

        let current = Self::lock_active_subscription(&mut tx, team_id, now)
            .await?
            .ok_or_else(|| BillingError::NotFound("No active subscription".to_string()))?;

        let current_plan = fetch_plan(&mut *tx, current.plan_id).await?;
        let new_plan = fetch_plan(&mut *tx, request.new_plan_id).await?;
        let quote = quote_plan_change(&current, &current_plan, &new_plan, request.new_member_count, now)?;
        let proration = quote.proration;

        let mut wallet = self.wallets.lock_or_create(&mut tx, team_id).await?;

        let movement = if proration.is_charge() {
            Some((TransactionType::Debit, proration.charge_amount(), ReferenceType::SubscriptionChange))
        } else if proration.is_credit() {
            Some((TransactionType::Credit, proration.credit_amount(), ReferenceType::SubscriptionRefund))
        } else {
            None
        };

        let mut ledger_entry: Option<WalletTransaction> = None;
        if let Some((transaction_type, amount, reference_type)) = movement {
            if let Some(key) = request.idempotency_key.as_deref() {
                Ledger::ensure_new_idempotency_key(&mut tx, wallet.id, key).await?;
            }

            let applied = match transaction_type {
                TransactionType::Debit => self.wallets.debit(&mut tx, &mut wallet, amount).await,
                TransactionType::Credit => self.wallets.credit(&mut tx, &mut wallet, amount).await,
            };
            let snapshot = match applied {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(
                        team_id = %team_id,
                        subscription_id = %current.id,
                        new_plan_id = %new_plan.id,
                        amount = %amount,
                        available = %wallet.balance,
                        error = %e,
                        "Plan change rejected"
                    );
                    return Err(e);
                }
            };

            let entry = Ledger::append(
                &mut tx,
                NewLedgerEntry {
                    wallet_id: wallet.id,
                    transaction_type,
                    amount,
                    snapshot,
                    reference_type,
                    reference_id: None,
                    description: format!(
                        "{} to {} ({} members, {} days remaining)",
                        quote.change_type,
                        new_plan.name,
                        request.new_member_count,
                        proration.remaining_days
                    ),
                    idempotency_key: request.idempotency_key.clone(),
                    metadata: serde_json::json!({
                        "previous_subscription_id": current.id,
                        "previous_plan_id": current.plan_id,
                        "new_plan_id": new_plan.id,
                        "previous_member_count": current.member_count,
                        "new_member_count": request.new_member_count,
                        "change_type": quote.change_type.as_str(),
                        "remaining_days": proration.remaining_days,
                        "total_days": proration.total_days,
                        "unused_amount": proration.unused_amount.to_string(),
                        "new_period_amount": proration.new_period_amount.to_string(),
                    }),
                },
            )
            .await?;
            ledger_entry = Some(entry);
        }

        let previous = sqlx::query_as::<_, TeamSubscription>(&format!(
            r#"
            UPDATE team_subscriptions
            SET status = 'changed', ended_at = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(current.id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            BillingError::Internal(format!("Locked subscription {} is no longer active", current.id))
        })?;

        let subscription = Self::insert_subscription(
            &mut tx,
            team_id,
            new_plan.id,
            request.new_member_count,
            proration.new_period_amount,
            current.billing_cycle,
            current.subscription_date,
            now,
            current.expiry_date,
            ledger_entry.as_ref().map(|e| e.id),
            Some(current.id),
        )
        .await?;

        if let Some(entry) = &ledger_entry {
            Ledger::attach_reference(&mut tx, entry.id, subscription.id).await?;
        }

        tx.commit().await?;

        tracing::info!(
            team_id = %team_id,
            previous_subscription_id = %previous.id,
            subscription_id = %subscription.id,
            change_type = quote.change_type.as_str(),
            from_plan = %current.plan_id,
            to_plan = %new_plan.id,
            from_seats = current.member_count,
            to_seats = request.new_member_count,
            prorated_charge = %proration.prorated_charge,
            balance = %wallet.balance,
            "Changed subscription"
        );

        Ok(PlanChangeResult {
            change_type: quote.change_type,
            previous_subscription: previous,
            subscription,
            proration,
            transaction_id: ledger_entry.map(|e| e.id),
            wallet_balance: wallet.balance,
        })
    }

    /// Price a hypothetical new subscription
    pub async fn calculate_cost(
        &self,
        plan_id: Uuid,
        member_count: i32,
        billing_cycle: BillingCycle,
    ) -> BillingResult<CostBreakdown> {
        let plan = fetch_plan(&self.pool, plan_id).await?;
        pricing::calculate_cost(&plan, member_count, billing_cycle, OffsetDateTime::now_utc())
    }

    /// Cancel an active subscription; no refund is issued
    pub async fn cancel_subscription(&self, team_id: Uuid, subscription_id: Uuid) -> BillingResult<TeamSubscription> {
        let mut tx = self.begin().await?;
        lock_team(&mut tx, team_id).await?;
        // Read the clock only once the team lock is held
        let now = OffsetDateTime::now_utc();

        let subscription = sqlx::query_as::<_, TeamSubscription>(&format!(
            "SELECT {} FROM team_subscriptions WHERE id = $1 FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(subscription_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("Subscription {} not found", subscription_id)))?;

        if subscription.team_id != team_id {
            tracing::warn!(
                team_id = %team_id,
                subscription_id = %subscription_id,
                "Cancel rejected: subscription belongs to another team"
            );
            return Err(BillingError::Forbidden(
                "Subscription does not belong to this team".to_string(),
            ));
        }

        if !subscription.is_active_at(now) {
            return Err(BillingError::InvalidState(format!(
                "Subscription is {} and cannot be cancelled",
                if subscription.status == SubscriptionStatus::Active {
                    "expired"
                } else {
                    subscription.status.as_str()
                }
            )));
        }

        // Keep the subscription -> wallet lock order even though the balance is untouched
        self.wallets.lock_existing(&mut tx, team_id).await?;

        let cancelled = sqlx::query_as::<_, TeamSubscription>(&format!(
            r#"
            UPDATE team_subscriptions
            SET status = 'cancelled', cancelled_at = $2, ended_at = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(subscription_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            team_id = %team_id,
            subscription_id = %subscription_id,
            plan_id = %cancelled.plan_id,
            "Cancelled subscription"
        );

        Ok(cancelled)
    }

    pub async fn get_current_subscription(&self, team_id: Uuid) -> BillingResult<CurrentSubscription> {
        let now = OffsetDateTime::now_utc();

        let subscription = self
            .find_active_subscription(team_id, now)
            .await?
            .ok_or_else(|| BillingError::NotFound("No active subscription".to_string()))?;
        let plan = fetch_plan(&self.pool, subscription.plan_id).await?;

        Ok(CurrentSubscription {
            days_remaining: subscription.days_remaining_at(now),
            is_active: subscription.is_active_at(now),
            subscription,
            plan,
        })
    }

    /// All subscriptions of a team, newest first
    pub async fn get_subscription_history(
        &self,
        team_id: Uuid,
        page: PageParams,
        status: Option<SubscriptionStatus>,
    ) -> BillingResult<PaginatedResponse<TeamSubscription>> {
        let offset = page
            .offset()
            .ok_or_else(|| BillingError::page_out_of_range(page.page()))?;
        let status = status.map(|s| s.as_str());

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM team_subscriptions
            WHERE team_id = $1 AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(team_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, TeamSubscription>(&format!(
            r#"
            SELECT {}
            FROM team_subscriptions
            WHERE team_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(team_id)
        .bind(status)
        .bind(page.limit())
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(PaginatedResponse::new(rows, total, page.page(), page.limit()))
    }

    /// Mark lapsed `active` rows as `expired`
    ///
    /// Housekeeping only: the read path already treats them as inactive.
    pub async fn expire_stale_subscriptions(&self) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE team_subscriptions
            SET status = 'expired', ended_at = expiry_date, updated_at = NOW()
            WHERE status = 'active' AND expiry_date <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        let expired = result.rows_affected();
        if expired > 0 {
            tracing::info!(count = expired, "Marked lapsed subscriptions as expired");
        }

        Ok(expired)
    }
}
