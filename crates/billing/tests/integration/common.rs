//! Shared setup for integration tests

use rust_decimal::Decimal;
use sqlx::PgPool;
use teamwallet_billing::{
    BillingConfig, BillingService, CycleSupport, DepositRequest, NewPlan, Plan, TeamSubscription,
};
use uuid::Uuid;

pub async fn setup() -> (BillingService, PgPool) {
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for integration tests");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    teamwallet_shared::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let billing = BillingService::new(pool.clone(), BillingConfig::default());
    (billing, pool)
}

pub async fn create_team(pool: &PgPool) -> Uuid {
    let team_id = Uuid::new_v4();
    sqlx::query("INSERT INTO teams (id, name) VALUES ($1, $2)")
        .bind(team_id)
        .bind(format!("Test Team {}", team_id))
        .execute(pool)
        .await
        .expect("Failed to create test team");
    team_id
}

pub fn unique_slug(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::new_v4().simple().to_string()[..12])
}

pub async fn create_plan(billing: &BillingService, prefix: &str, monthly_price: Decimal) -> Plan {
    billing
        .plans
        .create_plan(NewPlan {
            slug: unique_slug(prefix),
            name: prefix.to_string(),
            description: None,
            monthly_price,
            yearly_price: None,
            billing_cycles: CycleSupport::Both,
            max_seats: None,
            storage_limit_gb: None,
            message_history_days: None,
            features: serde_json::json!({}),
            sort_order: 100,
        })
        .await
        .expect("Failed to create test plan")
}

pub async fn deposit(billing: &BillingService, team_id: Uuid, amount: Decimal) {
    billing
        .wallets
        .deposit(
            team_id,
            DepositRequest {
                amount,
                description: Some("test funds".to_string()),
                idempotency_key: None,
            },
        )
        .await
        .expect("Failed to deposit test funds");
}

pub async fn balance(billing: &BillingService, team_id: Uuid) -> Decimal {
    billing
        .wallets
        .get_balance(team_id)
        .await
        .expect("Failed to read balance")
        .balance
}

/// Σ credits − Σ debits over the team's completed ledger entries
pub async fn ledger_sum(pool: &PgPool, team_id: Uuid) -> Decimal {
    let (sum,): (Decimal,) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(CASE t.transaction_type WHEN 'credit' THEN t.amount ELSE -t.amount END), 0)
        FROM wallet_transactions t
        JOIN wallets w ON w.id = t.wallet_id
        WHERE w.team_id = $1 AND t.status = 'completed'
        "#,
    )
    .bind(team_id)
    .fetch_one(pool)
    .await
    .expect("Failed to sum ledger");
    sum
}

pub async fn ledger_count(pool: &PgPool, team_id: Uuid) -> i64 {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM wallet_transactions t
        JOIN wallets w ON w.id = t.wallet_id
        WHERE w.team_id = $1
        "#,
    )
    .bind(team_id)
    .fetch_one(pool)
    .await
    .expect("Failed to count ledger entries");
    count
}

pub async fn active_subscription_count(pool: &PgPool, team_id: Uuid) -> i64 {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM team_subscriptions WHERE team_id = $1 AND status = 'active' AND expiry_date > NOW()",
    )
    .bind(team_id)
    .fetch_one(pool)
    .await
    .expect("Failed to count active subscriptions");
    count
}

/// Shift a subscription's period so that `elapsed_days` of `period_days` have passed
pub async fn backdate_subscription(
    pool: &PgPool,
    subscription: &TeamSubscription,
    elapsed_days: i32,
    period_days: i32,
) {
    sqlx::query(
        r#"
        UPDATE team_subscriptions
        SET subscription_date = NOW() - make_interval(days => $2),
            started_at = NOW() - make_interval(days => $2),
            expiry_date = NOW() - make_interval(days => $2) + make_interval(days => $3)
        WHERE id = $1
        "#,
    )
    .bind(subscription.id)
    .bind(elapsed_days)
    .bind(period_days)
    .execute(pool)
    .await
    .expect("Failed to backdate subscription");
}
