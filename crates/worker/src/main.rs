//! TeamWallet Background Worker
//!
//! Handles scheduled jobs:
//! - Expiry sweep of lapsed subscriptions (every 5 minutes)
//! - Billing invariant checks (hourly)
//! - Heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use teamwallet_billing::{BillingConfig, BillingService, InvariantCheckSummary};
use teamwallet_shared::create_pool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Number of jobs registered below
const SCHEDULED_JOBS: usize = 3;

/// Billing settings shared with the API server's environment
fn billing_config_from_env() -> BillingConfig {
    let defaults = BillingConfig::default();
    BillingConfig {
        default_currency: std::env::var("DEFAULT_CURRENCY")
            .map(|c| c.trim().to_ascii_uppercase())
            .unwrap_or(defaults.default_currency),
        fallback_plan_slug: std::env::var("FALLBACK_PLAN_SLUG")
            .unwrap_or(defaults.fallback_plan_slug),
        transaction_timeout_ms: std::env::var("BILLING_TX_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(defaults.transaction_timeout_ms),
    }
}

/// Log results of an invariant run
fn log_invariant_summary(summary: &InvariantCheckSummary) {
    if summary.healthy {
        info!(
            checks_run = summary.checks_run,
            "Billing invariants healthy"
        );
        return;
    }

    // Each violation was already logged at error by the checker
    warn!(
        checks_run = summary.checks_run,
        checks_failed = summary.checks_failed,
        violations = summary.violations.len(),
        "Billing invariant check found violations"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting TeamWallet Worker");

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = create_pool(&database_url, 5).await?;
    info!("Database pool created");

    let billing = Arc::new(BillingService::new(pool, billing_config_from_env()));

    let scheduler = JobScheduler::new().await?;

    // Job 1: Mark lapsed subscriptions as expired
    // Cron: every 5 minutes. Reads never depend on this; it keeps status tidy.
    let subscriptions = billing.subscriptions.clone();
    scheduler
        .add(Job::new_async("0 */5 * * * *", move |_uuid, _l| {
            let service = subscriptions.clone();
            Box::pin(async move {
                match service.expire_stale_subscriptions().await {
                    Ok(0) => {}
                    Ok(count) => info!(expired = count, "Expiry sweep complete"),
                    Err(e) => error!(error = %e, "Expiry sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Subscription expiry sweep (every 5 minutes)");

    // Job 2: Billing invariant checks
    // Cron: at minute 0 of every hour
    let invariants = billing.invariants.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let checker = invariants.clone();
            Box::pin(async move {
                info!("Running scheduled billing invariant checks");
                match checker.run_all_checks().await {
                    Ok(summary) => log_invariant_summary(&summary),
                    Err(e) => error!(error = %e, "Billing invariant check failed to run"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Billing invariant checks (hourly)");

    // Job 3: Heartbeat
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!(
        "TeamWallet Worker started successfully with {} scheduled jobs",
        SCHEDULED_JOBS
    );

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
