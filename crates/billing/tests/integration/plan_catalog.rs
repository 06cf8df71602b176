//! Plan catalog administration against a real database

use rust_decimal_macros::dec;
use serial_test::serial;
use teamwallet_billing::{
    BillingCycle, BillingError, CycleSupport, NewPlan, PlanStatus, PlanUpdate, SubscribeRequest,
};

use crate::common::*;

fn new_plan(slug: String) -> NewPlan {
    NewPlan {
        slug,
        name: "Starter".to_string(),
        description: Some("For small teams".to_string()),
        monthly_price: dec!(4.00),
        yearly_price: None,
        billing_cycles: CycleSupport::Both,
        max_seats: Some(10),
        storage_limit_gb: Some(5),
        message_history_days: Some(90),
        features: serde_json::json!({ "guests": false }),
        sort_order: 10,
    }
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_create_plan_derives_yearly_price_and_rejects_duplicates() {
    let (billing, _pool) = setup().await;
    let slug = unique_slug("starter");

    let plan = billing.plans.create_plan(new_plan(slug.clone())).await.unwrap();
    assert_eq!(plan.yearly_price, Some(dec!(38.40)));
    assert_eq!(plan.price_per_seat(BillingCycle::Yearly), dec!(38.40));
    assert_eq!(plan.status, PlanStatus::Active);
    assert!(!plan.is_default);

    let err = billing.plans.create_plan(new_plan(slug.clone())).await.unwrap_err();
    assert!(matches!(err, BillingError::Conflict(_)), "got {err:?}");

    let err = billing
        .plans
        .create_plan(new_plan("Not A Slug".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InvalidInput(_)), "got {err:?}");

    let fetched = billing.plans.get_plan_by_slug(&slug).await.unwrap();
    assert_eq!(fetched.id, plan.id);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_update_and_deactivate_plan() {
    let (billing, pool) = setup().await;
    let plan = billing
        .plans
        .create_plan(new_plan(unique_slug("starter")))
        .await
        .unwrap();

    let updated = billing
        .plans
        .update_plan(
            plan.id,
            PlanUpdate {
                monthly_price: Some(dec!(6.00)),
                max_seats: Some(20),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.monthly_price, dec!(6.00));
    assert_eq!(updated.max_seats, Some(20));
    assert_eq!(updated.name, "Starter");

    billing.plans.deactivate_plan(plan.id).await.unwrap();
    let listed = billing.plans.list_plans(false).await.unwrap();
    assert!(listed.iter().all(|p| p.id != plan.id));

    let team_id = create_team(&pool).await;
    let err = billing
        .subscriptions
        .subscribe(
            team_id,
            SubscribeRequest {
                plan_id: plan.id,
                member_count: 1,
                billing_cycle: BillingCycle::Monthly,
                idempotency_key: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InvalidState(_)), "got {err:?}");

    let reactivated = billing.plans.activate_plan(plan.id).await.unwrap();
    assert_eq!(reactivated.status, PlanStatus::Active);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_fallback_plan_cannot_be_deleted() {
    let (billing, _pool) = setup().await;
    let fallback = billing.plans.get_plan_by_slug("free").await.unwrap();

    let err = billing.plans.soft_delete_plan(fallback.id).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidState(_)), "got {err:?}");

    let err = billing.plans.hard_delete_plan(fallback.id).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidState(_)), "got {err:?}");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_soft_delete_restore_and_hard_delete() {
    let (billing, pool) = setup().await;
    let unused = create_plan(&billing, "temp", dec!(3.00)).await;
    let referenced = create_plan(&billing, "used", dec!(0)).await;

    let deleted = billing.plans.soft_delete_plan(unused.id).await.unwrap();
    assert!(deleted.deleted_at.is_some());
    let restored = billing.plans.restore_plan(unused.id).await.unwrap();
    assert!(restored.deleted_at.is_none());

    let err = billing.plans.restore_plan(unused.id).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidState(_)), "got {err:?}");

    billing.plans.hard_delete_plan(unused.id).await.unwrap();
    let err = billing.plans.get_plan(unused.id).await.unwrap_err();
    assert!(matches!(err, BillingError::NotFound(_)));

    let team_id = create_team(&pool).await;
    billing
        .subscriptions
        .subscribe(
            team_id,
            SubscribeRequest {
                plan_id: referenced.id,
                member_count: 1,
                billing_cycle: BillingCycle::Monthly,
                idempotency_key: None,
            },
        )
        .await
        .unwrap();

    let err = billing.plans.hard_delete_plan(referenced.id).await.unwrap_err();
    assert!(matches!(err, BillingError::Conflict(_)), "got {err:?}");
}

#[tokio::test]
#[serial]
#[ignore = "requires DATABASE_URL"]
async fn test_set_default_plan_keeps_single_default() {
    let (billing, pool) = setup().await;
    let fallback = billing.plans.get_plan_by_slug("free").await.unwrap();
    let candidate = create_plan(&billing, "basic", dec!(2.00)).await;

    let promoted = billing.plans.set_default_plan(candidate.id).await.unwrap();
    assert!(promoted.is_default);

    let (defaults,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM plans WHERE is_default")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(defaults, 1);

    let err = billing.plans.deactivate_plan(candidate.id).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidState(_)), "got {err:?}");

    // Put the seeded default back for the other tests
    billing.plans.set_default_plan(fallback.id).await.unwrap();
    assert!(!billing.plans.get_plan(candidate.id).await.unwrap().is_default);
    assert_eq!(billing.plans.get_default_plan().await.unwrap().id, fallback.id);
}
