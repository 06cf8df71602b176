//! Wallet routes (team-facing, read-only)

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use teamwallet_billing::{LedgerEntry, LedgerFilter, Wallet, WalletBalance};
use teamwallet_shared::PaginatedResponse;

use crate::{auth::TeamContext, error::ApiResult, state::AppState};

/// Team wallet, created on first access
pub async fn get_wallet(
    State(state): State<AppState>,
    Extension(team): Extension<TeamContext>,
) -> ApiResult<Json<Wallet>> {
    let wallet = state.billing.wallets.get_wallet(team.team_id.as_uuid()).await?;
    Ok(Json(wallet))
}

pub async fn get_balance(
    State(state): State<AppState>,
    Extension(team): Extension<TeamContext>,
) -> ApiResult<Json<WalletBalance>> {
    let balance = state.billing.wallets.get_balance(team.team_id.as_uuid()).await?;
    Ok(Json(balance))
}

/// Ledger entries, newest first
pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(team): Extension<TeamContext>,
    Query(filter): Query<LedgerFilter>,
) -> ApiResult<Json<PaginatedResponse<LedgerEntry>>> {
    let entries = state
        .billing
        .ledger
        .list_transactions(team.team_id.as_uuid(), filter)
        .await?;
    Ok(Json(entries))
}
