//! Wallet and ledger behaviour against a real database

use rust_decimal_macros::dec;
use teamwallet_billing::{
    BillingCycle, BillingError, DepositRequest, LedgerFilter, ReferenceType, SubscribeRequest,
    TransactionType, WalletStatus,
};

use crate::common::*;

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_wallet_created_lazily_once() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;

    assert!(billing.wallets.find_wallet(team_id).await.unwrap().is_none());

    let first = billing.wallets.get_wallet(team_id).await.unwrap();
    let second = billing.wallets.get_wallet(team_id).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.balance, dec!(0));
    assert_eq!(first.currency, "USD");
    assert_eq!(first.status, WalletStatus::Active);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_deposit_idempotency_key_replay_conflicts() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;

    let request = DepositRequest {
        amount: dec!(25.00),
        description: None,
        idempotency_key: Some("topup-1".to_string()),
    };

    let first = billing.wallets.deposit(team_id, request.clone()).await.unwrap();
    assert_eq!(first.wallet.balance, dec!(25.00));
    assert_eq!(first.transaction.reference_type, ReferenceType::Deposit);

    let err = billing.wallets.deposit(team_id, request).await.unwrap_err();
    assert!(matches!(err, BillingError::Conflict(_)), "got {err:?}");

    assert_eq!(balance(&billing, team_id).await, dec!(25.00));
    assert_eq!(ledger_count(&pool, team_id).await, 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_suspended_wallet_cannot_be_charged() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;
    let plan = create_plan(&billing, "pro", dec!(10.00)).await;
    deposit(&billing, team_id, dec!(100.00)).await;

    billing
        .wallets
        .set_wallet_status(team_id, WalletStatus::Suspended)
        .await
        .unwrap();

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
    assert_eq!(balance(&billing, team_id).await, dec!(100.00));

    let err = billing
        .wallets
        .set_wallet_status(team_id, WalletStatus::Closed)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InvalidState(_)), "got {err:?}");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_ledger_rows_are_append_only() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;
    deposit(&billing, team_id, dec!(10.00)).await;

    let update = sqlx::query(
        r#"
        UPDATE wallet_transactions SET amount = 1
        WHERE wallet_id = (SELECT id FROM wallets WHERE team_id = $1)
        "#,
    )
    .bind(team_id)
    .execute(&pool)
    .await;
    assert!(update.is_err());

    let delete = sqlx::query(
        "DELETE FROM wallet_transactions WHERE wallet_id = (SELECT id FROM wallets WHERE team_id = $1)",
    )
    .bind(team_id)
    .execute(&pool)
    .await;
    assert!(delete.is_err());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_list_transactions_filters_and_pages() {
    let (billing, pool) = setup().await;
    let team_id = create_team(&pool).await;
    let plan = create_plan(&billing, "pro", dec!(10.00)).await;

    for _ in 0..3 {
        deposit(&billing, team_id, dec!(20.00)).await;
    }
    billing
        .subscriptions
        .subscribe(
            team_id,
            SubscribeRequest {
                plan_id: plan.id,
                member_count: 2,
                billing_cycle: BillingCycle::Monthly,
                idempotency_key: None,
            },
        )
        .await
        .unwrap();

    let all = billing
        .ledger
        .list_transactions(team_id, LedgerFilter::default())
        .await
        .unwrap();
    assert_eq!(all.total, 4);
    assert_eq!(all.data[0].transaction_type, TransactionType::Debit);

    let debits = billing
        .ledger
        .list_transactions(
            team_id,
            LedgerFilter {
                transaction_type: Some(TransactionType::Debit),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(debits.total, 1);
    assert_eq!(debits.data[0].amount, dec!(20.00));

    let deposits = billing
        .ledger
        .list_transactions(
            team_id,
            LedgerFilter {
                reference_type: Some(ReferenceType::Deposit),
                page: Some(2),
                limit: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(deposits.total, 3);
    assert_eq!(deposits.total_pages, 2);
    assert_eq!(deposits.data.len(), 1);

    let json = serde_json::to_value(&all.data[0]).unwrap();
    assert!(json.get("metadata").is_none());

    // Unknown team has an empty ledger rather than an error
    let empty = billing
        .ledger
        .list_transactions(create_team(&pool).await, LedgerFilter::default())
        .await
        .unwrap();
    assert_eq!(empty.total, 0);
}
