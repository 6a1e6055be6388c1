mod common;

use anyhow::Result;
use common::{open_eur, open_funded, test_service};
use walletd::application::WalletError;
use walletd::domain::TransactionStatus;

#[tokio::test]
async fn test_deposit_replay_applies_once() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = open_eur(&service, "alice").await?;

    let first = service.deposit(account.id, 10_000, "dep-1".into()).await?;
    let second = service.deposit(account.id, 10_000, "dep-1".into()).await?;

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(second.transaction_id, first.transaction_id);
    assert_eq!(second.balance_of(account.id), Some(10_000));

    // Exactly one balance change and one transaction.
    assert_eq!(service.get_balance(account.id).await?.balance_cents, 10_000);
    assert_eq!(service.repository().count_committed_transactions().await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_transfer_replay_returns_original_result() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = open_funded(&service, "alice", 10_000).await?;
    let b = open_eur(&service, "bob").await?;

    let first = service.transfer(a.id, b.id, 4_000, "tr-1".into()).await?;

    // A later transfer moves more money; the replay must still report the
    // balances as they were when the original committed.
    service.transfer(a.id, b.id, 1_000, "tr-2".into()).await?;

    let replay = service.transfer(a.id, b.id, 4_000, "tr-1".into()).await?;
    assert!(replay.replayed);
    assert_eq!(replay.transaction_id, first.transaction_id);
    assert_eq!(replay.balance_of(a.id), first.balance_of(a.id));
    assert_eq!(replay.balance_of(b.id), first.balance_of(b.id));

    // Current balances reflect both transfers exactly once.
    assert_eq!(service.get_balance(a.id).await?.balance_cents, 5_000);
    assert_eq!(service.get_balance(b.id).await?.balance_cents, 5_000);

    let entries = service
        .repository()
        .list_entries_for_transaction(first.transaction_id)
        .await?;
    assert_eq!(entries.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_same_key_with_different_payload_conflicts() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = open_funded(&service, "alice", 10_000).await?;
    let b = open_eur(&service, "bob").await?;

    service.transfer(a.id, b.id, 4_000, "tr-1".into()).await?;

    let err = service
        .transfer(a.id, b.id, 5_000, "tr-1".into())
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::ConflictingIdempotencyKey(_)));

    // The conflicting call left no trace.
    assert_eq!(service.get_balance(a.id).await?.balance_cents, 6_000);
    assert_eq!(service.repository().count_committed_transactions().await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_key_reuse_across_operation_kinds_conflicts() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = open_eur(&service, "alice").await?;

    service.deposit(account.id, 10_000, "op-1".into()).await?;

    let err = service
        .withdraw(account.id, 10_000, "op-1".into())
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::ConflictingIdempotencyKey(_)));
    assert_eq!(service.get_balance(account.id).await?.balance_cents, 10_000);
    Ok(())
}

#[tokio::test]
async fn test_replayed_transaction_is_committed_exactly_once() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = open_eur(&service, "alice").await?;

    let receipt = service.deposit(account.id, 2_500, "dep-1".into()).await?;
    service.deposit(account.id, 2_500, "dep-1".into()).await?;

    let transaction = service
        .repository()
        .get_transaction(receipt.transaction_id)
        .await?
        .expect("transaction should exist");
    assert_eq!(transaction.status, TransactionStatus::Committed);
    assert_eq!(transaction.idempotency_key, "dep-1");
    assert!(transaction.committed_at.is_some());

    let by_key = service
        .repository()
        .get_transaction_by_key("dep-1")
        .await?
        .expect("key should resolve");
    assert_eq!(by_key.id, transaction.id);
    Ok(())
}
