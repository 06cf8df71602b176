//! Billing core configuration
//!
//! Built by the hosting binary (usually from environment variables) and
//! handed to `BillingService::new`; the core never reads the environment.

/// Default ISO 4217 currency for lazily created wallets
pub const DEFAULT_CURRENCY: &str = "USD";

/// Slug of the plan that can never be deleted
pub const DEFAULT_FALLBACK_PLAN_SLUG: &str = "free";

/// Default statement timeout for billing transactions
pub const DEFAULT_TX_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Currency assigned to newly created wallets
    pub default_currency: String,
    /// Plan slug protected from deletion
    pub fallback_plan_slug: String,
    /// `SET LOCAL statement_timeout` applied to every mutating transaction
    pub transaction_timeout_ms: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_currency: DEFAULT_CURRENCY.to_string(),
            fallback_plan_slug: DEFAULT_FALLBACK_PLAN_SLUG.to_string(),
            transaction_timeout_ms: DEFAULT_TX_TIMEOUT_MS,
        }
    }
}
