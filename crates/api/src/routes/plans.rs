//! Plan catalog routes (team-facing, read-only)

use axum::{
    extract::{Path, State},
    Json,
};
use teamwallet_billing::Plan;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Active plans, in display order
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<Plan>>> {
    let plans = state.billing.plans.list_plans(false).await?;
    Ok(Json(plans))
}

/// A single plan; deleted plans are hidden from teams
pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<Json<Plan>> {
    let plan = state.billing.plans.get_plan(plan_id).await?;
    if plan.is_deleted() {
        return Err(ApiError::NotFound(format!("Plan {} not found", plan_id)));
    }
    Ok(Json(plan))
}
