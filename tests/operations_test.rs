mod common;

use anyhow::Result;
use common::{open_eur, open_funded, test_service};
use walletd::application::WalletError;

#[tokio::test]
async fn test_deposit_increases_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = open_eur(&service, "alice").await?;

    let receipt = service.deposit(account.id, 10_000, "dep-1".into()).await?;
    assert!(!receipt.replayed);
    assert_eq!(receipt.balance_of(account.id), Some(10_000));

    let view = service.get_balance(account.id).await?;
    assert_eq!(view.balance_cents, 10_000);
    Ok(())
}

#[tokio::test]
async fn test_withdraw_within_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = open_funded(&service, "alice", 10_000).await?;

    service.withdraw(account.id, 2_500, "wd-1".into()).await?;

    let view = service.get_balance(account.id).await?;
    assert_eq!(view.balance_cents, 7_500);
    Ok(())
}

#[tokio::test]
async fn test_withdraw_beyond_balance_fails_without_side_effects() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = open_funded(&service, "alice", 10_000).await?;

    let err = service
        .withdraw(account.id, 15_000, "wd-over".into())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WalletError::InsufficientFunds { balance: 10_000, requested: 15_000, .. }
    ));

    // Balance unchanged, no ledger entries written.
    let view = service.get_balance(account.id).await?;
    assert_eq!(view.balance_cents, 10_000);
    let entries = service.list_entries(account.id).await?;
    assert_eq!(entries.len(), 1); // the funding deposit only
    Ok(())
}

#[tokio::test]
async fn test_overdraft_account_may_go_negative() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = service
        .open_account("credit".into(), "EUR", Some(true))
        .await?;

    service.withdraw(account.id, 5_000, "wd-neg".into()).await?;

    let view = service.get_balance(account.id).await?;
    assert_eq!(view.balance_cents, -5_000);
    Ok(())
}

#[tokio::test]
async fn test_transfer_moves_money_with_balanced_entries() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = open_funded(&service, "alice", 10_000).await?;
    let b = open_eur(&service, "bob").await?;

    let receipt = service.transfer(a.id, b.id, 4_000, "tr-1".into()).await?;
    assert_eq!(receipt.balance_of(a.id), Some(6_000));
    assert_eq!(receipt.balance_of(b.id), Some(4_000));

    assert_eq!(service.get_balance(a.id).await?.balance_cents, 6_000);
    assert_eq!(service.get_balance(b.id).await?.balance_cents, 4_000);

    // One transaction with exactly two entries summing to zero.
    let entries = service
        .repository()
        .list_entries_for_transaction(receipt.transaction_id)
        .await?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries.iter().map(|e| e.amount_cents).sum::<i64>(), 0);
    Ok(())
}

#[tokio::test]
async fn test_invalid_amounts_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = open_funded(&service, "alice", 10_000).await?;
    let b = open_eur(&service, "bob").await?;

    for amount in [0, -100] {
        assert!(matches!(
            service.deposit(a.id, amount, "k1".into()).await.unwrap_err(),
            WalletError::InvalidAmount(_)
        ));
        assert!(matches!(
            service.withdraw(a.id, amount, "k2".into()).await.unwrap_err(),
            WalletError::InvalidAmount(_)
        ));
        assert!(matches!(
            service
                .transfer(a.id, b.id, amount, "k3".into())
                .await
                .unwrap_err(),
            WalletError::InvalidAmount(_)
        ));
    }
    Ok(())
}

#[tokio::test]
async fn test_transfer_to_same_account_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = open_funded(&service, "alice", 10_000).await?;

    let err = service
        .transfer(a.id, a.id, 1_000, "tr-same".into())
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::SameAccount));
    Ok(())
}

#[tokio::test]
async fn test_transfer_across_currencies_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let eur = open_funded(&service, "alice", 10_000).await?;
    let usd = service.open_account("bob".into(), "USD", Some(false)).await?;

    let err = service
        .transfer(eur.id, usd.id, 1_000, "tr-fx".into())
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::CurrencyMismatch { .. }));
    Ok(())
}

#[tokio::test]
async fn test_unknown_account_rejected_before_any_write() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let ghost = uuid::Uuid::new_v4();

    let err = service.deposit(ghost, 1_000, "dep-ghost".into()).await.unwrap_err();
    assert!(matches!(err, WalletError::AccountNotFound(id) if id == ghost));

    let err = service.get_balance(ghost).await.unwrap_err();
    assert!(matches!(err, WalletError::AccountNotFound(_)));
    Ok(())
}

#[tokio::test]
async fn test_closed_account_refuses_mutations() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = open_funded(&service, "alice", 10_000).await?;
    let b = open_eur(&service, "bob").await?;

    let closed = service.close_account(b.id).await?;
    assert!(closed.is_closed());

    let err = service.deposit(b.id, 1_000, "dep-closed".into()).await.unwrap_err();
    assert!(matches!(err, WalletError::AccountClosed(id) if id == b.id));

    let err = service
        .transfer(a.id, b.id, 1_000, "tr-closed".into())
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::AccountClosed(_)));

    // Closing twice is refused, history stays readable.
    let err = service.close_account(b.id).await.unwrap_err();
    assert!(matches!(err, WalletError::AccountClosed(_)));
    assert_eq!(service.get_balance(b.id).await?.balance_cents, 0);
    Ok(())
}

#[tokio::test]
async fn test_currency_codes_normalized_and_validated() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let account = service.open_account("alice".into(), "eur", None).await?;
    assert_eq!(account.currency, "EUR");

    let err = service
        .open_account("bob".into(), "e1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidCurrency(_)));
    Ok(())
}

#[tokio::test]
async fn test_entries_record_running_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = open_eur(&service, "alice").await?;

    service.deposit(account.id, 10_000, "d1".into()).await?;
    service.withdraw(account.id, 3_000, "w1".into()).await?;
    service.deposit(account.id, 500, "d2".into()).await?;

    let entries = service.list_entries(account.id).await?;
    let snapshots: Vec<i64> = entries.iter().map(|e| e.balance_after_cents).collect();
    assert_eq!(snapshots, vec![10_000, 7_000, 7_500]);
    Ok(())
}
