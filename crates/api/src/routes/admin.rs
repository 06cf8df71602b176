//! Operator routes: plan administration, wallet top-ups and invariant checks
//!
//! All handlers sit behind `require_admin`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use teamwallet_billing::{
    DepositRequest, DepositResult, InvariantCheckSummary, InvariantChecker, InvariantViolation,
    NewPlan, Plan, PlanUpdate, Wallet, WalletStatus,
};
use uuid::Uuid;

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct ListPlansQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
pub struct WalletStatusRequest {
    pub status: WalletStatus,
}

#[derive(Debug, Serialize)]
pub struct InvariantCheckResponse {
    pub check: String,
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

#[derive(Debug, Serialize)]
pub struct AvailableChecksResponse {
    pub checks: Vec<&'static str>,
}

// =============================================================================
// Plans
// =============================================================================

pub async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<ListPlansQuery>,
) -> ApiResult<Json<Vec<Plan>>> {
    let plans = state.billing.plans.list_plans(query.include_inactive).await?;
    Ok(Json(plans))
}

pub async fn list_deleted_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<Plan>>> {
    let plans = state.billing.plans.list_deleted_plans().await?;
    Ok(Json(plans))
}

pub async fn create_plan(
    State(state): State<AppState>,
    Json(new_plan): Json<NewPlan>,
) -> ApiResult<(StatusCode, Json<Plan>)> {
    let plan = state.billing.plans.create_plan(new_plan).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

/// Admin view includes deleted plans
pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<Json<Plan>> {
    let plan = state.billing.plans.get_plan(plan_id).await?;
    Ok(Json(plan))
}

pub async fn update_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
    Json(update): Json<PlanUpdate>,
) -> ApiResult<Json<Plan>> {
    let plan = state.billing.plans.update_plan(plan_id, update).await?;
    Ok(Json(plan))
}

pub async fn set_default_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<Json<Plan>> {
    let plan = state.billing.plans.set_default_plan(plan_id).await?;
    Ok(Json(plan))
}

pub async fn activate_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<Json<Plan>> {
    let plan = state.billing.plans.activate_plan(plan_id).await?;
    Ok(Json(plan))
}

pub async fn deactivate_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<Json<Plan>> {
    let plan = state.billing.plans.deactivate_plan(plan_id).await?;
    Ok(Json(plan))
}

pub async fn soft_delete_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<Json<Plan>> {
    let plan = state.billing.plans.soft_delete_plan(plan_id).await?;
    Ok(Json(plan))
}

pub async fn restore_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<Json<Plan>> {
    let plan = state.billing.plans.restore_plan(plan_id).await?;
    Ok(Json(plan))
}

pub async fn hard_delete_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.billing.plans.hard_delete_plan(plan_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Wallets
// =============================================================================

pub async fn get_team_wallet(
    State(state): State<AppState>,
    Path(team_id): Path<Uuid>,
) -> ApiResult<Json<Wallet>> {
    let wallet = state.billing.wallets.get_wallet(team_id).await?;
    Ok(Json(wallet))
}

/// Operator top-up of a team wallet
pub async fn deposit(
    State(state): State<AppState>,
    Path(team_id): Path<Uuid>,
    Json(request): Json<DepositRequest>,
) -> ApiResult<(StatusCode, Json<DepositResult>)> {
    let result = state.billing.wallets.deposit(team_id, request).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn set_wallet_status(
    State(state): State<AppState>,
    Path(team_id): Path<Uuid>,
    Json(request): Json<WalletStatusRequest>,
) -> ApiResult<Json<Wallet>> {
    let wallet = state
        .billing
        .wallets
        .set_wallet_status(team_id, request.status)
        .await?;
    Ok(Json(wallet))
}

// =============================================================================
// Invariants
// =============================================================================

pub async fn run_invariant_checks(
    State(state): State<AppState>,
) -> ApiResult<Json<InvariantCheckSummary>> {
    let summary = state.billing.invariants.run_all_checks().await?;
    Ok(Json(summary))
}

pub async fn list_invariant_checks() -> Json<AvailableChecksResponse> {
    Json(AvailableChecksResponse {
        checks: InvariantChecker::available_checks(),
    })
}

pub async fn run_invariant_check(
    State(state): State<AppState>,
    Path(check): Path<String>,
) -> ApiResult<Json<InvariantCheckResponse>> {
    let violations = state.billing.invariants.run_check(&check).await?;
    Ok(Json(InvariantCheckResponse {
        passed: violations.is_empty(),
        check,
        violations,
    }))
}
