//! Pricing primitives
//!
//! Billing cycles, per-seat price resolution, calendar-month expiry and
//! money rounding. Everything here is pure and synchronous so the
//! lifecycle manager and the preview endpoints share one code path.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use time::{Date, Duration, Month, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::plans::Plan;
use crate::sql_types::text_column;

/// Yearly price factor applied when a plan has no explicit yearly price
/// (12 months at a 20% discount).
pub const YEARLY_DISCOUNT_FACTOR: Decimal = Decimal::from_parts(8, 0, 0, false, 1);

/// Months in a yearly cycle
const MONTHS_PER_YEAR: u32 = 12;

/// Billing cycle chosen by a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Yearly => "yearly",
        }
    }

    /// Length of one period in calendar months
    pub fn months(&self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Yearly => MONTHS_PER_YEAR,
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BillingCycle {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => Ok(BillingCycle::Monthly),
            "yearly" => Ok(BillingCycle::Yearly),
            other => Err(BillingError::InvalidInput(format!(
                "Unknown billing cycle '{}'",
                other
            ))),
        }
    }
}

text_column!(BillingCycle);

/// Which billing cycles a plan can be bought with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CycleSupport {
    Monthly,
    Yearly,
    #[default]
    Both,
}

impl CycleSupport {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleSupport::Monthly => "monthly",
            CycleSupport::Yearly => "yearly",
            CycleSupport::Both => "both",
        }
    }

    pub fn supports(&self, cycle: BillingCycle) -> bool {
        matches!(
            (self, cycle),
            (CycleSupport::Both, _)
                | (CycleSupport::Monthly, BillingCycle::Monthly)
                | (CycleSupport::Yearly, BillingCycle::Yearly)
        )
    }
}

impl std::str::FromStr for CycleSupport {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => Ok(CycleSupport::Monthly),
            "yearly" => Ok(CycleSupport::Yearly),
            "both" => Ok(CycleSupport::Both),
            other => Err(BillingError::InvalidInput(format!(
                "Unknown billing cycle support '{}'",
                other
            ))),
        }
    }
}

text_column!(CycleSupport);

/// Round a monetary amount to cents (half away from zero)
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Yearly price derived from a monthly price when none is configured
pub fn derived_yearly_price(monthly_price: Decimal) -> Decimal {
    round_money(monthly_price * Decimal::from(MONTHS_PER_YEAR) * YEARLY_DISCOUNT_FACTOR)
}

/// Add calendar months, clamping the day to the target month's length
/// (Jan 31 + 1 month = Feb 28/29).
pub fn add_months(at: OffsetDateTime, months: u32) -> BillingResult<OffsetDateTime> {
    let index = at.year() as i64 * 12 + i64::from(u8::from(at.month())) - 1 + i64::from(months);
    let year = i32::try_from(index.div_euclid(12))
        .map_err(|_| BillingError::InvalidInput("Date out of range".to_string()))?;
    let month = Month::try_from((index.rem_euclid(12) + 1) as u8)
        .map_err(|e| BillingError::Internal(e.to_string()))?;

    let day = at.day().min(month.length(year));
    let date = Date::from_calendar_date(year, month, day)
        .map_err(|e| BillingError::InvalidInput(format!("Date out of range: {}", e)))?;

    Ok(at.replace_date(date))
}

/// End of the period that starts at `start`
pub fn calculate_expiry(start: OffsetDateTime, cycle: BillingCycle) -> BillingResult<OffsetDateTime> {
    add_months(start, cycle.months())
}

/// Whole days in a span, rounded up (a partial day counts as a day)
pub fn ceil_days(span: Duration) -> i64 {
    let whole = span.whole_days();
    if span > Duration::days(whole) {
        whole + 1
    } else {
        whole
    }
}

/// Quoted price for a fresh subscription
#[derive(Debug, Clone, Serialize)]
pub struct CostBreakdown {
    pub plan_id: Uuid,
    pub plan_slug: String,
    pub billing_cycle: BillingCycle,
    pub member_count: i32,
    #[serde(with = "rust_decimal::serde::str")]
    pub price_per_seat: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_amount: Decimal,
    pub is_free: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub subscription_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry_date: OffsetDateTime,
}

/// Validate a purchase and compute its cost
///
/// Fails with `InvalidState` if the plan cannot be bought, `InvalidInput`
/// for a bad seat count, unsupported cycle or exceeded seat limit.
pub fn calculate_cost(
    plan: &Plan,
    member_count: i32,
    billing_cycle: BillingCycle,
    now: OffsetDateTime,
) -> BillingResult<CostBreakdown> {
    validate_member_count(member_count)?;
    plan.ensure_purchasable()?;
    plan.ensure_cycle_supported(billing_cycle)?;
    plan.ensure_seat_limit(member_count)?;

    let price_per_seat = plan.price_per_seat(billing_cycle);
    let total_amount = round_money(price_per_seat * Decimal::from(member_count));

    Ok(CostBreakdown {
        plan_id: plan.id,
        plan_slug: plan.slug.clone(),
        billing_cycle,
        member_count,
        price_per_seat,
        total_amount,
        is_free: total_amount.is_zero(),
        subscription_date: now,
        expiry_date: calculate_expiry(now, billing_cycle)?,
    })
}

pub fn validate_member_count(member_count: i32) -> BillingResult<()> {
    if member_count < 1 {
        return Err(BillingError::InvalidInput(format!(
            "Member count must be at least 1, got {}",
            member_count
        )));
    }
    Ok(())
}
