// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use tempfile::TempDir;
use walletd::application::WalletService;
use walletd::domain::Account;
use walletd::Config;

/// Helper to create a test service backed by a temporary database.
pub async fn test_service() -> Result<(WalletService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("wallet.db");
    let config = Config::with_db_url(format!("sqlite:{}?mode=rwc", db_path.display()));
    let service = WalletService::init(&config).await?;
    Ok((service, temp_dir))
}

/// Open a EUR account without overdraft.
pub async fn open_eur(service: &WalletService, owner: &str) -> Result<Account> {
    Ok(service.open_account(owner.into(), "EUR", Some(false)).await?)
}

/// Open a EUR account and fund it (zero means open only).
pub async fn open_funded(
    service: &WalletService,
    owner: &str,
    amount_cents: i64,
) -> Result<Account> {
    let account = open_eur(service, owner).await?;
    if amount_cents > 0 {
        service
            .deposit(account.id, amount_cents, format!("fund-{}", account.id))
            .await?;
    }
    Ok(account)
}
