//! Subscription lifecycle against a real database

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use teamwallet_billing::{
    BillingCycle, BillingError, ChangeType, PaymentSource, PlanChangeRequest, ReferenceType,
    SubscribeRequest, SubscriptionStatus, TransactionType,
};
use teamwallet_shared::PageParams;
use uuid::Uuid;

use crate::common::*;

fn subscribe_request(plan_id: Uuid, member_count: i32) -> SubscribeRequest {
    SubscribeRequest {
        plan_id,
        member_count,
        billing_cycle: BillingCycle::Monthly,
        idempotency_key: None,
    }
}

fn change_request(new_plan_id: Uuid, new_member_count: i32) -> PlanChangeRequest {
    PlanChangeRequest {
        new_plan_id,
        new_member_count,
        idempotency_key: None,
    }
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_subscribe_debits_wallet_and_links_ledger() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;
    let plan = create_plan(&billing, "pro", dec!(10.00)).await;
    deposit(&billing, team_id, dec!(100.00)).await;

    let result = billing
        .subscriptions
        .subscribe(team_id, subscribe_request(plan.id, 5))
        .await
        .unwrap();

    assert_eq!(result.amount_deducted, dec!(50.00));
    assert_eq!(result.wallet_balance, dec!(50.00));
    assert_eq!(result.subscription.payment_source, PaymentSource::Wallet);
    assert_eq!(result.subscription.status, SubscriptionStatus::Active);
    assert_eq!(result.subscription.amount_paid, dec!(50.00));

    let transaction_id = result.transaction_id.expect("paid subscription has a ledger entry");
    assert_eq!(result.subscription.wallet_transaction_id, Some(transaction_id));

    let entry = billing.ledger.get_transaction(transaction_id).await.unwrap();
    assert_eq!(entry.transaction_type, TransactionType::Debit);
    assert_eq!(entry.reference_type, ReferenceType::Subscription);
    assert_eq!(entry.reference_id, Some(result.subscription.id));
    assert_eq!(entry.balance_before, dec!(100.00));
    assert_eq!(entry.balance_after, dec!(50.00));

    assert_eq!(balance(&billing, team_id).await, ledger_sum(&pool, team_id).await);

    let current = billing.subscriptions.get_current_subscription(team_id).await.unwrap();
    assert_eq!(current.subscription.id, result.subscription.id);
    assert!(current.is_active);
    assert!(current.days_remaining >= 28 && current.days_remaining <= 31);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_second_subscribe_conflicts() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;
    let plan = create_plan(&billing, "pro", dec!(10.00)).await;
    deposit(&billing, team_id, dec!(100.00)).await;

    billing
        .subscriptions
        .subscribe(team_id, subscribe_request(plan.id, 2))
        .await
        .unwrap();

    let err = billing
        .subscriptions
        .subscribe(team_id, subscribe_request(plan.id, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Conflict(_)), "got {err:?}");
    assert_eq!(balance(&billing, team_id).await, dec!(80.00));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_free_plan_subscription_has_no_ledger_entry() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;
    let free = create_plan(&billing, "gratis", Decimal::ZERO).await;

    let result = billing
        .subscriptions
        .subscribe(team_id, subscribe_request(free.id, 12))
        .await
        .unwrap();

    assert_eq!(result.amount_deducted, Decimal::ZERO);
    assert_eq!(result.transaction_id, None);
    assert_eq!(result.subscription.payment_source, PaymentSource::Free);
    assert_eq!(result.subscription.wallet_transaction_id, None);
    assert_eq!(ledger_count(&pool, team_id).await, 0);
    assert_eq!(balance(&billing, team_id).await, Decimal::ZERO);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_insufficient_funds_changes_nothing() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;
    let plan = create_plan(&billing, "pro", dec!(10.00)).await;
    let expensive = create_plan(&billing, "enterprise", dec!(500.00)).await;
    deposit(&billing, team_id, dec!(60.00)).await;

    // Subscribe beyond the balance
    let err = billing
        .subscriptions
        .subscribe(team_id, subscribe_request(expensive.id, 1))
        .await
        .unwrap_err();
    match err {
        BillingError::InsufficientBalance {
            required,
            available,
            shortfall,
        } => {
            assert_eq!(required, dec!(500.00));
            assert_eq!(available, dec!(60.00));
            assert_eq!(shortfall, dec!(440.00));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(balance(&billing, team_id).await, dec!(60.00));
    assert_eq!(ledger_count(&pool, team_id).await, 1);
    assert_eq!(active_subscription_count(&pool, team_id).await, 0);

    // Change beyond the balance
    let subscribed = billing
        .subscriptions
        .subscribe(team_id, subscribe_request(plan.id, 5))
        .await
        .unwrap();
    let before_ledger = ledger_count(&pool, team_id).await;

    let err = billing
        .subscriptions
        .change_plan(team_id, change_request(expensive.id, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InsufficientBalance { .. }), "got {err:?}");

    assert_eq!(balance(&billing, team_id).await, dec!(10.00));
    assert_eq!(ledger_count(&pool, team_id).await, before_ledger);
    let current = billing.subscriptions.get_current_subscription(team_id).await.unwrap();
    assert_eq!(current.subscription.id, subscribed.subscription.id);
    assert_eq!(current.subscription.status, SubscriptionStatus::Active);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_upgrade_ten_days_into_thirty_day_period() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;
    let pro = create_plan(&billing, "pro", dec!(10.00)).await;
    let business = create_plan(&billing, "business", dec!(20.00)).await;
    deposit(&billing, team_id, dec!(150.00)).await;

    let subscribed = billing
        .subscriptions
        .subscribe(team_id, subscribe_request(pro.id, 5))
        .await
        .unwrap();
    assert_eq!(subscribed.wallet_balance, dec!(100.00));
    backdate_subscription(&pool, &subscribed.subscription, 10, 30).await;

    let preview = billing
        .subscriptions
        .preview_plan_change(team_id, business.id, 5)
        .await
        .unwrap();
    assert_eq!(preview.proration.prorated_charge, dec!(33.34));
    assert_eq!(preview.projected_balance, dec!(66.66));
    assert!(preview.sufficient_balance);

    let result = billing
        .subscriptions
        .change_plan(team_id, change_request(business.id, 5))
        .await
        .unwrap();

    assert_eq!(result.change_type, ChangeType::Upgrade);
    assert_eq!(result.proration.remaining_days, 20);
    assert_eq!(result.proration.total_days, 30);
    assert_eq!(result.proration.unused_amount, dec!(33.33));
    assert_eq!(result.proration.new_period_amount, dec!(66.67));
    assert_eq!(result.proration.prorated_charge, dec!(33.34));
    assert_eq!(result.wallet_balance, dec!(66.66));

    assert_eq!(result.previous_subscription.status, SubscriptionStatus::Changed);
    assert!(result.previous_subscription.ended_at.is_some());
    assert_eq!(result.subscription.previous_subscription_id, Some(subscribed.subscription.id));
    assert_eq!(result.subscription.amount_paid, dec!(66.67));
    assert_eq!(result.subscription.expiry_date, result.previous_subscription.expiry_date);
    assert_eq!(result.subscription.billing_cycle, BillingCycle::Monthly);

    let entry = billing
        .ledger
        .get_transaction(result.transaction_id.unwrap())
        .await
        .unwrap();
    assert_eq!(entry.reference_type, ReferenceType::SubscriptionChange);
    assert_eq!(entry.reference_id, Some(result.subscription.id));
    assert_eq!(entry.amount, dec!(33.34));

    assert_eq!(active_subscription_count(&pool, team_id).await, 1);
    assert_eq!(balance(&billing, team_id).await, ledger_sum(&pool, team_id).await);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_change_and_change_back_nets_zero() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;
    let pro = create_plan(&billing, "pro", dec!(10.00)).await;
    let business = create_plan(&billing, "business", dec!(20.00)).await;
    deposit(&billing, team_id, dec!(200.00)).await;

    let subscribed = billing
        .subscriptions
        .subscribe(team_id, subscribe_request(pro.id, 5))
        .await
        .unwrap();
    backdate_subscription(&pool, &subscribed.subscription, 10, 30).await;
    let before = balance(&billing, team_id).await;

    let up = billing
        .subscriptions
        .change_plan(team_id, change_request(business.id, 5))
        .await
        .unwrap();
    let down = billing
        .subscriptions
        .change_plan(team_id, change_request(pro.id, 5))
        .await
        .unwrap();

    assert_eq!(up.change_type, ChangeType::Upgrade);
    assert_eq!(down.change_type, ChangeType::Downgrade);
    assert!(down.proration.prorated_charge < Decimal::ZERO);

    let refund = billing
        .ledger
        .get_transaction(down.transaction_id.unwrap())
        .await
        .unwrap();
    assert_eq!(refund.transaction_type, TransactionType::Credit);
    assert_eq!(refund.reference_type, ReferenceType::SubscriptionRefund);

    let after = balance(&billing, team_id).await;
    assert!((after - before).abs() <= dec!(0.01), "net delta {}", after - before);
    assert_eq!(after, ledger_sum(&pool, team_id).await);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_identical_change_is_noop() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;
    let pro = create_plan(&billing, "pro", dec!(10.00)).await;
    deposit(&billing, team_id, dec!(50.00)).await;

    billing
        .subscriptions
        .subscribe(team_id, subscribe_request(pro.id, 3))
        .await
        .unwrap();
    let ledger_before = ledger_count(&pool, team_id).await;

    let err = billing
        .subscriptions
        .change_plan(team_id, change_request(pro.id, 3))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NoOp(_)), "got {err:?}");
    assert_eq!(ledger_count(&pool, team_id).await, ledger_before);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_replayed_idempotency_key_charges_once() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;
    let pro = create_plan(&billing, "pro", dec!(10.00)).await;
    let business = create_plan(&billing, "business", dec!(20.00)).await;
    deposit(&billing, team_id, dec!(500.00)).await;

    let subscribed = billing
        .subscriptions
        .subscribe(
            team_id,
            SubscribeRequest {
                idempotency_key: Some("subscribe-1".to_string()),
                ..subscribe_request(pro.id, 5)
            },
        )
        .await
        .unwrap();
    backdate_subscription(&pool, &subscribed.subscription, 10, 30).await;

    let changed = billing
        .subscriptions
        .change_plan(
            team_id,
            PlanChangeRequest {
                idempotency_key: Some("change-1".to_string()),
                ..change_request(business.id, 5)
            },
        )
        .await
        .unwrap();

    let ledger_before = ledger_count(&pool, team_id).await;
    let balance_before = balance(&billing, team_id).await;

    // Same key on a different change is still a replay
    let err = billing
        .subscriptions
        .change_plan(
            team_id,
            PlanChangeRequest {
                idempotency_key: Some("change-1".to_string()),
                ..change_request(pro.id, 5)
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Conflict(_)), "got {err:?}");
    assert_eq!(ledger_count(&pool, team_id).await, ledger_before);
    assert_eq!(balance(&billing, team_id).await, balance_before);

    let current = billing
        .subscriptions
        .get_current_subscription(team_id)
        .await
        .unwrap();
    assert_eq!(current.subscription.id, changed.subscription.id);
    assert_eq!(current.plan.id, business.id);

    billing
        .subscriptions
        .cancel_subscription(team_id, changed.subscription.id)
        .await
        .unwrap();

    let err = billing
        .subscriptions
        .subscribe(
            team_id,
            SubscribeRequest {
                idempotency_key: Some("subscribe-1".to_string()),
                ..subscribe_request(pro.id, 5)
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Conflict(_)), "got {err:?}");
    assert_eq!(ledger_count(&pool, team_id).await, ledger_before);
    assert_eq!(balance(&billing, team_id).await, balance_before);
    assert_eq!(active_subscription_count(&pool, team_id).await, 0);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_change_without_subscription_is_not_found() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;
    let pro = create_plan(&billing, "pro", dec!(10.00)).await;

    let err = billing
        .subscriptions
        .change_plan(team_id, change_request(pro.id, 3))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NotFound(_)), "got {err:?}");

    let err = billing
        .subscriptions
        .preview_plan_change(team_id, pro.id, 3)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_unknown_team_is_not_found() {
    let (billing, _pool) = setup().await;
    let err = billing
        .subscriptions
        .subscribe(Uuid::new_v4(), subscribe_request(Uuid::new_v4(), 1))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_cancel_rules() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;
    let other_team = create_team(&pool).await;
    let pro = create_plan(&billing, "pro", dec!(10.00)).await;
    deposit(&billing, team_id, dec!(30.00)).await;

    let subscribed = billing
        .subscriptions
        .subscribe(team_id, subscribe_request(pro.id, 3))
        .await
        .unwrap();
    let subscription_id = subscribed.subscription.id;

    let err = billing
        .subscriptions
        .cancel_subscription(other_team, subscription_id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Forbidden(_)), "got {err:?}");

    let cancelled = billing
        .subscriptions
        .cancel_subscription(team_id, subscription_id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    // No refund on cancellation
    assert_eq!(balance(&billing, team_id).await, Decimal::ZERO);

    let err = billing
        .subscriptions
        .cancel_subscription(team_id, subscription_id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InvalidState(_)), "got {err:?}");

    let err = billing
        .subscriptions
        .get_current_subscription(team_id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NotFound(_)));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_expired_subscription_is_inactive_on_read() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;
    let free = create_plan(&billing, "gratis", Decimal::ZERO).await;

    let first = billing
        .subscriptions
        .subscribe(team_id, subscribe_request(free.id, 1))
        .await
        .unwrap();
    backdate_subscription(&pool, &first.subscription, 40, 30).await;

    // Still stored as active, but past expiry
    let err = billing
        .subscriptions
        .get_current_subscription(team_id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NotFound(_)));

    let err = billing
        .subscriptions
        .cancel_subscription(team_id, first.subscription.id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InvalidState(_)));

    // A new subscription is allowed without the sweeper running
    billing
        .subscriptions
        .subscribe(team_id, subscribe_request(free.id, 1))
        .await
        .unwrap();

    let swept = billing.subscriptions.expire_stale_subscriptions().await.unwrap();
    assert!(swept >= 1);

    let history = billing
        .subscriptions
        .get_subscription_history(team_id, PageParams::default(), Some(SubscriptionStatus::Expired))
        .await
        .unwrap();
    assert_eq!(history.total, 1);
    assert_eq!(history.data[0].id, first.subscription.id);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_history_is_newest_first() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;
    let pro = create_plan(&billing, "pro", dec!(10.00)).await;
    deposit(&billing, team_id, dec!(100.00)).await;

    billing
        .subscriptions
        .subscribe(team_id, subscribe_request(pro.id, 2))
        .await
        .unwrap();
    let changed = billing
        .subscriptions
        .change_plan(team_id, change_request(pro.id, 4))
        .await
        .unwrap();
    assert_eq!(changed.change_type, ChangeType::IncreaseSeats);

    let history = billing
        .subscriptions
        .get_subscription_history(team_id, PageParams::new(1, 10), None)
        .await
        .unwrap();
    assert_eq!(history.total, 2);
    assert_eq!(history.data[0].id, changed.subscription.id);
    assert_eq!(history.data[1].status, SubscriptionStatus::Changed);
}
