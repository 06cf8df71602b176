//! Subscription routes

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use teamwallet_billing::{
    BillingCycle, CostBreakdown, CurrentSubscription, PlanChangePreview, PlanChangeRequest,
    PlanChangeResult, SubscribeRequest, SubscribeResult, SubscriptionStatus, TeamSubscription,
};
use teamwallet_shared::{PageParams, PaginatedResponse};
use uuid::Uuid;

use crate::{auth::TeamContext, error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct PreviewChangeRequest {
    pub new_plan_id: Uuid,
    pub new_member_count: i32,
}

#[derive(Debug, Deserialize)]
pub struct CalculateCostRequest {
    pub plan_id: Uuid,
    pub member_count: i32,
    pub billing_cycle: BillingCycle,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<SubscriptionStatus>,
}

/// Buy a new subscription, paid from the wallet
pub async fn subscribe(
    State(state): State<AppState>,
    Extension(team): Extension<TeamContext>,
    Json(request): Json<SubscribeRequest>,
) -> ApiResult<(StatusCode, Json<SubscribeResult>)> {
    let result = state
        .billing
        .subscriptions
        .subscribe(team.team_id.as_uuid(), request)
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn get_current_subscription(
    State(state): State<AppState>,
    Extension(team): Extension<TeamContext>,
) -> ApiResult<Json<CurrentSubscription>> {
    let current = state
        .billing
        .subscriptions
        .get_current_subscription(team.team_id.as_uuid())
        .await?;
    Ok(Json(current))
}

pub async fn get_subscription_history(
    State(state): State<AppState>,
    Extension(team): Extension<TeamContext>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<PaginatedResponse<TeamSubscription>>> {
    let page = PageParams {
        page: query.page,
        limit: query.limit,
    };
    let history = state
        .billing
        .subscriptions
        .get_subscription_history(team.team_id.as_uuid(), page, query.status)
        .await?;
    Ok(Json(history))
}

/// Quote a plan/seat change without applying it
pub async fn preview_plan_change(
    State(state): State<AppState>,
    Extension(team): Extension<TeamContext>,
    Json(request): Json<PreviewChangeRequest>,
) -> ApiResult<Json<PlanChangePreview>> {
    let preview = state
        .billing
        .subscriptions
        .preview_plan_change(team.team_id.as_uuid(), request.new_plan_id, request.new_member_count)
        .await?;
    Ok(Json(preview))
}

pub async fn change_plan(
    State(state): State<AppState>,
    Extension(team): Extension<TeamContext>,
    Json(request): Json<PlanChangeRequest>,
) -> ApiResult<Json<PlanChangeResult>> {
    let result = state
        .billing
        .subscriptions
        .change_plan(team.team_id.as_uuid(), request)
        .await?;
    Ok(Json(result))
}

/// Price a subscription without buying it; team context only gates access
pub async fn calculate_cost(
    State(state): State<AppState>,
    Extension(_team): Extension<TeamContext>,
    Json(request): Json<CalculateCostRequest>,
) -> ApiResult<Json<CostBreakdown>> {
    let cost = state
        .billing
        .subscriptions
        .calculate_cost(request.plan_id, request.member_count, request.billing_cycle)
        .await?;
    Ok(Json(cost))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(team): Extension<TeamContext>,
    Path(subscription_id): Path<Uuid>,
) -> ApiResult<Json<TeamSubscription>> {
    let cancelled = state
        .billing
        .subscriptions
        .cancel_subscription(team.team_id.as_uuid(), subscription_id)
        .await?;
    Ok(Json(cancelled))
}
