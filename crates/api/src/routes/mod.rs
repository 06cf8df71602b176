//! API routes

pub mod admin;
pub mod health;
pub mod plans;
pub mod subscriptions;
pub mod wallet;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::{
    auth::{require_admin, require_team},
    state::AppState,
};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Team routes: X-Team-Id set by the upstream gateway
    let team_routes = Router::new()
        .route("/plans", get(plans::list_plans))
        .route("/plans/:plan_id", get(plans::get_plan))
        .route("/subscriptions", post(subscriptions::subscribe))
        .route("/subscriptions/current", get(subscriptions::get_current_subscription))
        .route("/subscriptions/history", get(subscriptions::get_subscription_history))
        .route("/subscriptions/preview-change", post(subscriptions::preview_plan_change))
        .route("/subscriptions/change", post(subscriptions::change_plan))
        .route("/subscriptions/calculate-cost", post(subscriptions::calculate_cost))
        .route(
            "/subscriptions/:subscription_id/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/balance", get(wallet::get_balance))
        .route("/wallet/transactions", get(wallet::list_transactions))
        .route_layer(middleware::from_fn(require_team));

    // Operator routes: bearer ADMIN_API_TOKEN
    let admin_routes = Router::new()
        .route("/plans", get(admin::list_plans).post(admin::create_plan))
        .route("/plans/deleted", get(admin::list_deleted_plans))
        .route(
            "/plans/:plan_id",
            get(admin::get_plan)
                .patch(admin::update_plan)
                .delete(admin::soft_delete_plan),
        )
        .route("/plans/:plan_id/permanent", delete(admin::hard_delete_plan))
        .route("/plans/:plan_id/default", post(admin::set_default_plan))
        .route("/plans/:plan_id/activate", post(admin::activate_plan))
        .route("/plans/:plan_id/deactivate", post(admin::deactivate_plan))
        .route("/plans/:plan_id/restore", post(admin::restore_plan))
        .route("/teams/:team_id/wallet", get(admin::get_team_wallet))
        .route("/teams/:team_id/wallet/deposit", post(admin::deposit))
        .route("/teams/:team_id/wallet/status", post(admin::set_wallet_status))
        .route("/invariants", get(admin::run_invariant_checks))
        .route("/invariants/checks", get(admin::list_invariant_checks))
        .route("/invariants/:check", get(admin::run_invariant_check))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let api_routes = Router::new()
        .merge(team_routes)
        .nest("/admin", admin_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_routes)
        .with_state(state)
}
