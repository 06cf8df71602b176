//! Plan Catalog
//!
//! Subscription tiers with their per-seat prices and limits. Read-mostly:
//! the lifecycle manager only reads plans, while the admin operations below
//! maintain the catalog (single default, fallback protection, soft delete).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::pricing::{derived_yearly_price, BillingCycle, CycleSupport};
use crate::sql_types::text_column;

/// Maximum slug length
pub const MAX_SLUG_LEN: usize = 64;

const PLAN_COLUMNS: &str = r#"
    id, slug, name, description, monthly_price, yearly_price, billing_cycles,
    max_seats, storage_limit_gb, message_history_days, features, is_default,
    status, sort_order, deleted_at, created_at, updated_at
"#;

/// Whether a plan can currently be bought
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Active,
    Inactive,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Active => "active",
            PlanStatus::Inactive => "inactive",
        }
    }
}

impl std::str::FromStr for PlanStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PlanStatus::Active),
            "inactive" => Ok(PlanStatus::Inactive),
            other => Err(BillingError::InvalidInput(format!(
                "Unknown plan status '{}'",
                other
            ))),
        }
    }
}

text_column!(PlanStatus);

/// Plan record
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub monthly_price: Decimal,
    /// Explicit yearly per-seat price; derived from the monthly price when absent
    pub yearly_price: Option<Decimal>,
    pub billing_cycles: CycleSupport,
    pub max_seats: Option<i32>,
    pub storage_limit_gb: Option<i32>,
    pub message_history_days: Option<i32>,
    pub features: serde_json::Value,
    pub is_default: bool,
    pub status: PlanStatus,
    pub sort_order: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Plan {
    /// Effective yearly per-seat price
    pub fn effective_yearly_price(&self) -> Decimal {
        self.yearly_price
            .unwrap_or_else(|| derived_yearly_price(self.monthly_price))
    }

    /// Per-seat price for one period of the given cycle
    pub fn price_per_seat(&self, cycle: BillingCycle) -> Decimal {
        match cycle {
            BillingCycle::Monthly => self.monthly_price,
            BillingCycle::Yearly => self.effective_yearly_price(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Active and not soft-deleted
    pub fn is_purchasable(&self) -> bool {
        self.status == PlanStatus::Active && !self.is_deleted()
    }

    pub fn ensure_purchasable(&self) -> BillingResult<()> {
        if self.is_deleted() {
            return Err(BillingError::InvalidState(format!(
                "Plan '{}' has been deleted",
                self.slug
            )));
        }
        if self.status != PlanStatus::Active {
            return Err(BillingError::InvalidState(format!(
                "Plan '{}' is not active",
                self.slug
            )));
        }
        Ok(())
    }

    pub fn ensure_cycle_supported(&self, cycle: BillingCycle) -> BillingResult<()> {
        if !self.billing_cycles.supports(cycle) {
            return Err(BillingError::InvalidInput(format!(
                "Plan '{}' does not support {} billing",
                self.slug, cycle
            )));
        }
        Ok(())
    }

    pub fn ensure_seat_limit(&self, member_count: i32) -> BillingResult<()> {
        match self.max_seats {
            Some(max) if member_count > max => Err(BillingError::InvalidInput(format!(
                "Plan '{}' allows at most {} members, requested {}",
                self.slug, max, member_count
            ))),
            _ => Ok(()),
        }
    }
}

/// Validate a plan slug: lowercase alphanumeric groups joined by single hyphens
pub fn validate_slug(slug: &str) -> BillingResult<()> {
    let invalid = || {
        BillingError::InvalidInput(format!(
            "Invalid plan slug '{}': use lowercase letters, digits and single hyphens (max {} chars)",
            slug, MAX_SLUG_LEN
        ))
    };

    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return Err(invalid());
    }
    if slug.starts_with('-') || slug.ends_with('-') || slug.contains("--") {
        return Err(invalid());
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid());
    }
    Ok(())
}

fn validate_price(field: &str, price: Decimal) -> BillingResult<()> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(BillingError::InvalidInput(format!(
            "{} must not be negative",
            field
        )));
    }
    if price.scale() > 2 && price != price.round_dp(2) {
        return Err(BillingError::InvalidInput(format!(
            "{} must have at most 2 decimal places",
            field
        )));
    }
    Ok(())
}

fn validate_limit(field: &str, value: Option<i32>, min: i32) -> BillingResult<()> {
    match value {
        Some(v) if v < min => Err(BillingError::InvalidInput(format!(
            "{} must be at least {}",
            field, min
        ))),
        _ => Ok(()),
    }
}

fn validate_name(name: &str) -> BillingResult<()> {
    if name.trim().is_empty() {
        return Err(BillingError::InvalidInput(
            "Plan name is required".to_string(),
        ));
    }
    Ok(())
}

/// Input for creating a plan
#[derive(Debug, Clone, Deserialize)]
pub struct NewPlan {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(with = "rust_decimal::serde::str")]
    pub monthly_price: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub yearly_price: Option<Decimal>,
    #[serde(default)]
    pub billing_cycles: CycleSupport,
    pub max_seats: Option<i32>,
    pub storage_limit_gb: Option<i32>,
    pub message_history_days: Option<i32>,
    #[serde(default = "empty_features")]
    pub features: serde_json::Value,
    #[serde(default)]
    pub sort_order: i32,
}

fn empty_features() -> serde_json::Value {
    serde_json::json!({})
}

impl NewPlan {
    pub fn validate(&self) -> BillingResult<()> {
        validate_slug(&self.slug)?;
        validate_name(&self.name)?;
        validate_price("monthly_price", self.monthly_price)?;
        if let Some(yearly) = self.yearly_price {
            validate_price("yearly_price", yearly)?;
        }
        validate_limit("max_seats", self.max_seats, 1)?;
        validate_limit("storage_limit_gb", self.storage_limit_gb, 0)?;
        validate_limit("message_history_days", self.message_history_days, 0)?;
        if !self.features.is_object() {
            return Err(BillingError::InvalidInput(
                "features must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }

    /// Yearly price to store: explicit, or derived from the monthly price
    pub fn resolved_yearly_price(&self) -> Decimal {
        self.yearly_price
            .unwrap_or_else(|| derived_yearly_price(self.monthly_price))
    }
}

/// Partial update of a plan; `None` leaves the column unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub monthly_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub yearly_price: Option<Decimal>,
    pub billing_cycles: Option<CycleSupport>,
    pub max_seats: Option<i32>,
    pub storage_limit_gb: Option<i32>,
    pub message_history_days: Option<i32>,
    pub features: Option<serde_json::Value>,
    pub sort_order: Option<i32>,
}

impl PlanUpdate {
    pub fn validate(&self) -> BillingResult<()> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(price) = self.monthly_price {
            validate_price("monthly_price", price)?;
        }
        if let Some(price) = self.yearly_price {
            validate_price("yearly_price", price)?;
        }
        validate_limit("max_seats", self.max_seats, 1)?;
        validate_limit("storage_limit_gb", self.storage_limit_gb, 0)?;
        validate_limit("message_history_days", self.message_history_days, 0)?;
        if let Some(features) = &self.features {
            if !features.is_object() {
                return Err(BillingError::InvalidInput(
                    "features must be a JSON object".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Fetch a plan by id with any executor (pool or open transaction)
pub(crate) async fn fetch_plan<'e, E>(executor: E, plan_id: Uuid) -> BillingResult<Plan>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, Plan>(&format!("SELECT {} FROM plans WHERE id = $1", PLAN_COLUMNS))
        .bind(plan_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("Plan {} not found", plan_id)))
}

/// Plan catalog service
#[derive(Clone)]
pub struct PlanCatalog {
    pool: PgPool,
    fallback_slug: String,
}

impl PlanCatalog {
    pub fn new(pool: PgPool, fallback_slug: impl Into<String>) -> Self {
        Self {
            pool,
            fallback_slug: fallback_slug.into(),
        }
    }

    /// List plans ordered for display; soft-deleted plans are never listed
    pub async fn list_plans(&self, include_inactive: bool) -> BillingResult<Vec<Plan>> {
        let plans = sqlx::query_as::<_, Plan>(&format!(
            r#"
            SELECT {}
            FROM plans
            WHERE deleted_at IS NULL
              AND ($1 OR status = 'active')
            ORDER BY sort_order, monthly_price, slug
            "#,
            PLAN_COLUMNS
        ))
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }

    /// Soft-deleted plans, for the restore screen
    pub async fn list_deleted_plans(&self) -> BillingResult<Vec<Plan>> {
        let plans = sqlx::query_as::<_, Plan>(&format!(
            "SELECT {} FROM plans WHERE deleted_at IS NOT NULL ORDER BY deleted_at DESC",
            PLAN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> BillingResult<Plan> {
        fetch_plan(&self.pool, plan_id).await
    }

    pub async fn get_plan_by_slug(&self, slug: &str) -> BillingResult<Plan> {
        sqlx::query_as::<_, Plan>(&format!("SELECT {} FROM plans WHERE slug = $1", PLAN_COLUMNS))
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Plan '{}' not found", slug)))
    }

    pub async fn get_default_plan(&self) -> BillingResult<Plan> {
        sqlx::query_as::<_, Plan>(&format!(
            "SELECT {} FROM plans WHERE is_default AND deleted_at IS NULL",
            PLAN_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BillingError::NotFound("No default plan configured".to_string()))
    }

    pub async fn create_plan(&self, new_plan: NewPlan) -> BillingResult<Plan> {
        new_plan.validate()?;

        let plan = sqlx::query_as::<_, Plan>(&format!(
            r#"
            INSERT INTO plans (
                slug, name, description, monthly_price, yearly_price, billing_cycles,
                max_seats, storage_limit_gb, message_history_days, features, sort_order
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (slug) DO NOTHING
            RETURNING {}
            "#,
            PLAN_COLUMNS
        ))
        .bind(&new_plan.slug)
        .bind(new_plan.name.trim())
        .bind(&new_plan.description)
        .bind(new_plan.monthly_price)
        .bind(new_plan.resolved_yearly_price())
        .bind(new_plan.billing_cycles)
        .bind(new_plan.max_seats)
        .bind(new_plan.storage_limit_gb)
        .bind(new_plan.message_history_days)
        .bind(&new_plan.features)
        .bind(new_plan.sort_order)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            BillingError::Conflict(format!("A plan with slug '{}' already exists", new_plan.slug))
        })?;

        tracing::info!(
            plan_id = %plan.id,
            slug = %plan.slug,
            monthly_price = %plan.monthly_price,
            "Created plan"
        );

        Ok(plan)
    }

    /// Partial update; the slug is immutable once created
    pub async fn update_plan(&self, plan_id: Uuid, update: PlanUpdate) -> BillingResult<Plan> {
        update.validate()?;

        let plan = sqlx::query_as::<_, Plan>(&format!(
            r#"
            UPDATE plans SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                monthly_price = COALESCE($4, monthly_price),
                yearly_price = COALESCE($5, yearly_price),
                billing_cycles = COALESCE($6, billing_cycles),
                max_seats = COALESCE($7, max_seats),
                storage_limit_gb = COALESCE($8, storage_limit_gb),
                message_history_days = COALESCE($9, message_history_days),
                features = COALESCE($10, features),
                sort_order = COALESCE($11, sort_order),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .bind(update.name.as_deref().map(str::trim))
        .bind(&update.description)
        .bind(update.monthly_price)
        .bind(update.yearly_price)
        .bind(update.billing_cycles)
        .bind(update.max_seats)
        .bind(update.storage_limit_gb)
        .bind(update.message_history_days)
        .bind(&update.features)
        .bind(update.sort_order)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("Plan {} not found", plan_id)))?;

        tracing::info!(plan_id = %plan.id, slug = %plan.slug, "Updated plan");

        Ok(plan)
    }

    /// Make `plan_id` the single default plan
    ///
    /// Clears the flag on every other row first, then sets it on the target,
    /// inside one transaction.
    pub async fn set_default_plan(&self, plan_id: Uuid) -> BillingResult<Plan> {
        let mut tx = self.pool.begin().await?;

        let target = sqlx::query_as::<_, Plan>(&format!(
            "SELECT {} FROM plans WHERE id = $1 FOR UPDATE",
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("Plan {} not found", plan_id)))?;

        target.ensure_purchasable()?;

        sqlx::query("UPDATE plans SET is_default = false, updated_at = NOW() WHERE is_default AND id <> $1")
            .bind(plan_id)
            .execute(&mut *tx)
            .await?;

        let plan = sqlx::query_as::<_, Plan>(&format!(
            "UPDATE plans SET is_default = true, updated_at = NOW() WHERE id = $1 RETURNING {}",
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(plan_id = %plan.id, slug = %plan.slug, "Set default plan");

        Ok(plan)
    }

    /// Stop selling a plan; existing subscriptions keep running
    pub async fn deactivate_plan(&self, plan_id: Uuid) -> BillingResult<Plan> {
        let plan = self.get_plan(plan_id).await?;
        if plan.is_default {
            return Err(BillingError::InvalidState(format!(
                "Plan '{}' is the default plan; promote another plan first",
                plan.slug
            )));
        }

        // is_default re-checked in SQL in case the default moved meanwhile
        let plan = sqlx::query_as::<_, Plan>(&format!(
            r#"
            UPDATE plans SET status = 'inactive', updated_at = NOW()
            WHERE id = $1 AND NOT is_default
            RETURNING {}
            "#,
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            BillingError::InvalidState(format!("Plan {} became the default plan", plan_id))
        })?;

        tracing::info!(plan_id = %plan.id, slug = %plan.slug, "Deactivated plan");

        Ok(plan)
    }

    pub async fn activate_plan(&self, plan_id: Uuid) -> BillingResult<Plan> {
        let plan = self.get_plan(plan_id).await?;
        if plan.is_deleted() {
            return Err(BillingError::InvalidState(format!(
                "Plan '{}' is deleted; restore it first",
                plan.slug
            )));
        }

        let plan = sqlx::query_as::<_, Plan>(&format!(
            "UPDATE plans SET status = 'active', updated_at = NOW() WHERE id = $1 RETURNING {}",
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(plan_id = %plan.id, slug = %plan.slug, "Activated plan");

        Ok(plan)
    }

    fn ensure_deletable(&self, plan: &Plan) -> BillingResult<()> {
        if plan.slug == self.fallback_slug {
            return Err(BillingError::InvalidState(format!(
                "Plan '{}' is the fallback plan and cannot be deleted",
                plan.slug
            )));
        }
        if plan.is_default {
            return Err(BillingError::InvalidState(format!(
                "Plan '{}' is the default plan and cannot be deleted",
                plan.slug
            )));
        }
        Ok(())
    }

    /// Hide a plan from the catalog; it can be restored later
    pub async fn soft_delete_plan(&self, plan_id: Uuid) -> BillingResult<Plan> {
        let plan = self.get_plan(plan_id).await?;
        self.ensure_deletable(&plan)?;
        if plan.is_deleted() {
            return Err(BillingError::InvalidState(format!(
                "Plan '{}' is already deleted",
                plan.slug
            )));
        }

        let plan = sqlx::query_as::<_, Plan>(&format!(
            r#"
            UPDATE plans SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND NOT is_default
            RETURNING {}
            "#,
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            BillingError::InvalidState(format!("Plan {} became the default plan", plan_id))
        })?;

        tracing::info!(plan_id = %plan.id, slug = %plan.slug, "Soft-deleted plan");

        Ok(plan)
    }

    pub async fn restore_plan(&self, plan_id: Uuid) -> BillingResult<Plan> {
        let plan = sqlx::query_as::<_, Plan>(&format!(
            r#"
            UPDATE plans SET deleted_at = NULL, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NOT NULL
            RETURNING {}
            "#,
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        match plan {
            Some(plan) => {
                tracing::info!(plan_id = %plan.id, slug = %plan.slug, "Restored plan");
                Ok(plan)
            }
            None => {
                // Distinguish "missing" from "not deleted"
                let plan = self.get_plan(plan_id).await?;
                Err(BillingError::InvalidState(format!(
                    "Plan '{}' is not deleted",
                    plan.slug
                )))
            }
        }
    }

    /// Remove a plan for good; refused while any subscription references it
    pub async fn hard_delete_plan(&self, plan_id: Uuid) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        let plan = sqlx::query_as::<_, Plan>(&format!(
            "SELECT {} FROM plans WHERE id = $1 FOR UPDATE",
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("Plan {} not found", plan_id)))?;

        self.ensure_deletable(&plan)?;

        let (references,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM team_subscriptions WHERE plan_id = $1")
                .bind(plan_id)
                .fetch_one(&mut *tx)
                .await?;

        if references > 0 {
            return Err(BillingError::Conflict(format!(
                "Plan '{}' is referenced by {} subscription(s); soft-delete it instead",
                plan.slug, references
            )));
        }

        sqlx::query("DELETE FROM plans WHERE id = $1")
            .bind(plan_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::warn!(plan_id = %plan_id, slug = %plan.slug, "Permanently deleted plan");

        Ok(())
    }
}
