// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! TeamWallet Billing Core
//!
//! Prepaid team wallets and seat-based subscriptions on PostgreSQL.
//!
//! ## Features
//!
//! - **Plan Catalog**: Tiers with monthly/yearly per-seat prices, single default plan, soft delete
//! - **Wallet Store**: One balance per team, never negative, created lazily
//! - **Ledger**: Append-only debit/credit entries with before/after snapshots
//! - **Subscriptions**: Subscribe, preview/apply plan and seat changes, cancel
//! - **Proration**: Day-based credit for the unused period against the new plan's cost
//! - **Invariants**: Read-only reconciliation checks
//!
//! All balance-moving operations run in a single transaction: wallet, ledger
//! and subscription rows are committed together or rolled back together.

pub mod config;
pub mod error;
pub mod invariants;
pub mod ledger;
pub mod plans;
pub mod pricing;
pub mod proration;
pub mod subscriptions;
pub mod wallet;

mod sql_types;
mod txn;


use sqlx::PgPool;

// Config
pub use config::BillingConfig;

// Error
pub use error::{BillingError, BillingResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Ledger
pub use ledger::{
    Ledger, LedgerEntry, LedgerFilter, ReferenceType, TransactionStatus, TransactionType,
    WalletTransaction,
};

// Plans
pub use plans::{NewPlan, Plan, PlanCatalog, PlanStatus, PlanUpdate};

// Pricing
pub use pricing::{BillingCycle, CostBreakdown, CycleSupport};

// Proration
pub use proration::{calculate_proration, ProrationInput, ProrationResult};

// Subscriptions
pub use subscriptions::{
    ChangeType, CurrentSubscription, PaymentSource, PlanChangePreview, PlanChangeRequest,
    PlanChangeResult, SubscribeRequest, SubscribeResult, SubscriptionService,
    SubscriptionStatus, TeamSubscription,
};

// Wallet
pub use wallet::{
    BalanceSnapshot, DepositRequest, DepositResult, Wallet, WalletBalance, WalletStatus,
    WalletStore,
};

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub plans: PlanCatalog,
    pub wallets: WalletStore,
    pub ledger: Ledger,
    pub subscriptions: SubscriptionService,
    pub invariants: InvariantChecker,
}

impl BillingService {
    pub fn new(pool: PgPool, config: BillingConfig) -> Self {
        Self {
            plans: PlanCatalog::new(pool.clone(), config.fallback_plan_slug.clone()),
            wallets: WalletStore::new(pool.clone(), config.clone()),
            ledger: Ledger::new(pool.clone()),
            subscriptions: SubscriptionService::new(pool.clone(), config),
            invariants: InvariantChecker::new(pool),
        }
    }
}
