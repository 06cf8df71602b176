//! Proration Calculator
//!
//! Computes the credit for the unused part of the current period and the
//! charge for the same remaining days under a new plan/seat count.
//!
//! Days are whole days rounded up. The unused credit is amortized over the
//! days the current subscription row actually covers (`started_at` to
//! expiry), while the new period cost is amortized over the full billing
//! period (`subscription_date` to expiry). For a subscription that was never
//! changed both spans are the same. Both legs are rounded to cents before
//! they are netted, so a change and its exact reverse cancel out.

use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

use crate::pricing::{ceil_days, round_money};

/// Inputs describing the current subscription and the requested one
#[derive(Debug, Clone)]
pub struct ProrationInput {
    /// Start of the billing period (carried across changes)
    pub period_start: OffsetDateTime,
    /// When the current subscription row started covering the period
    pub coverage_start: OffsetDateTime,
    pub expiry_date: OffsetDateTime,
    /// What was paid for the current row
    pub amount_paid: Decimal,
    /// Per-seat price of the new plan for the subscription's cycle
    pub new_price_per_seat: Decimal,
    pub new_member_count: i32,
}

/// Outcome of a proration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProrationResult {
    pub remaining_days: i64,
    pub total_days: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub unused_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub new_period_amount: Decimal,
    /// Positive: the team pays. Negative: the team is credited.
    #[serde(with = "rust_decimal::serde::str")]
    pub prorated_charge: Decimal,
}

impl ProrationResult {
    fn zero(total_days: i64) -> Self {
        Self {
            remaining_days: 0,
            total_days,
            unused_amount: Decimal::ZERO,
            new_period_amount: Decimal::ZERO,
            prorated_charge: Decimal::ZERO,
        }
    }

    pub fn is_charge(&self) -> bool {
        self.prorated_charge > Decimal::ZERO
    }

    pub fn is_credit(&self) -> bool {
        self.prorated_charge < Decimal::ZERO
    }

    /// Amount to debit, zero unless this is a charge
    pub fn charge_amount(&self) -> Decimal {
        self.prorated_charge.max(Decimal::ZERO)
    }

    /// Amount to credit back, zero unless this is a credit
    pub fn credit_amount(&self) -> Decimal {
        (-self.prorated_charge).max(Decimal::ZERO)
    }
}

/// Compute the proration for switching at `now`
///
/// An already expired period yields an all-zero result. Spans shorter than
/// one day count as one day, so there is never a division by zero.
pub fn calculate_proration(input: &ProrationInput, now: OffsetDateTime) -> ProrationResult {
    let total_days = ceil_days(input.expiry_date - input.period_start).max(1);
    let remaining_days = ceil_days(input.expiry_date - now);

    if remaining_days <= 0 {
        return ProrationResult::zero(total_days);
    }

    let coverage_days = ceil_days(input.expiry_date - input.coverage_start).max(1);
    // Can't have more days left than the row covers (clock skew on a fresh row)
    let unused_days = remaining_days.min(coverage_days);

    let unused_amount =
        round_money(input.amount_paid * Decimal::from(unused_days) / Decimal::from(coverage_days));

    let new_period_total = input.new_price_per_seat * Decimal::from(input.new_member_count);
    let new_period_amount =
        round_money(new_period_total * Decimal::from(remaining_days) / Decimal::from(total_days));

    ProrationResult {
        remaining_days,
        total_days,
        unused_amount,
        new_period_amount,
        prorated_charge: new_period_amount - unused_amount,
    }
}
