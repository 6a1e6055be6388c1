use crate::config::Config;
use crate::domain::{
    check_transaction_balance, normalize_currency, recompute_balances, reconcile_accounts,
    Account, AccountId, AuditFinding, AuditReport, Cents, LedgerEntry, TransactionReceipt,
};
use crate::storage::Repository;

use super::{BalanceEngine, WalletError};

/// The service boundary of the wallet: the only entry points into the
/// ledger core. Every mutating call takes a caller-supplied idempotency key
/// and either fully commits or leaves no trace.
pub struct WalletService {
    repo: Repository,
    default_allow_overdraft: bool,
}

/// A wallet balance snapshot.
#[derive(Debug)]
pub struct BalanceView {
    pub account: Account,
    pub balance_cents: Cents,
}

impl WalletService {
    pub fn new(repo: Repository, default_allow_overdraft: bool) -> Self {
        Self {
            repo,
            default_allow_overdraft,
        }
    }

    /// Connect and migrate per the given configuration.
    pub async fn init(config: &Config) -> Result<Self, WalletError> {
        let repo = Repository::connect(config).await?;
        repo.migrate().await?;
        Ok(Self::new(repo, config.allow_overdraft))
    }

    /// Connect without migrating; startup fails later if the schema is
    /// behind.
    pub async fn connect(config: &Config) -> Result<Self, WalletError> {
        let repo = Repository::connect(config).await?;
        Ok(Self::new(repo, config.allow_overdraft))
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // ========================
    // Account operations
    // ========================

    /// Open a new account. The per-currency system account is created first
    /// so that deposits always have a balanced counterpart.
    pub async fn open_account(
        &self,
        owner: String,
        currency: &str,
        allow_overdraft: Option<bool>,
    ) -> Result<Account, WalletError> {
        let currency = normalize_currency(currency)
            .ok_or_else(|| WalletError::InvalidCurrency(currency.to_string()))?;

        self.repo.ensure_system_account(&currency).await?;

        let account = Account::new(
            owner,
            currency,
            allow_overdraft.unwrap_or(self.default_allow_overdraft),
        );
        self.repo.save_account(&account).await?;

        tracing::info!(account_id = %account.id, currency = %account.currency, "opened account");
        Ok(account)
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account, WalletError> {
        self.repo
            .get_account(id)
            .await?
            .ok_or(WalletError::AccountNotFound(id))
    }

    pub async fn list_accounts(&self, include_closed: bool) -> Result<Vec<Account>, WalletError> {
        Ok(self.repo.list_accounts(include_closed).await?)
    }

    /// Deactivate an account. History stays; further mutations are refused.
    pub async fn close_account(&self, id: AccountId) -> Result<Account, WalletError> {
        let account = self.get_account(id).await?;
        if account.is_closed() {
            return Err(WalletError::AccountClosed(id));
        }
        self.repo.close_account(id).await?;
        self.get_account(id).await
    }

    // ========================
    // Ledger operations
    // ========================

    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Cents,
        idempotency_key: String,
    ) -> Result<TransactionReceipt, WalletError> {
        let account = self.get_account(account_id).await?;
        let system = self.repo.ensure_system_account(&account.currency).await?;
        let posting = BalanceEngine::plan_deposit(&account, &system, amount, idempotency_key)?;
        Ok(self.repo.apply_with_retry(&posting).await?)
    }

    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: Cents,
        idempotency_key: String,
    ) -> Result<TransactionReceipt, WalletError> {
        let account = self.get_account(account_id).await?;
        let system = self.repo.ensure_system_account(&account.currency).await?;
        let posting = BalanceEngine::plan_withdrawal(&account, &system, amount, idempotency_key)?;
        Ok(self.repo.apply_with_retry(&posting).await?)
    }

    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Cents,
        idempotency_key: String,
    ) -> Result<TransactionReceipt, WalletError> {
        if from == to {
            return Err(WalletError::SameAccount);
        }
        let from_account = self.get_account(from).await?;
        let to_account = self.get_account(to).await?;
        let posting =
            BalanceEngine::plan_transfer(&from_account, &to_account, amount, idempotency_key)?;
        Ok(self.repo.apply_with_retry(&posting).await?)
    }

    /// Single snapshot read of the cached balance. Never reflects a
    /// partially applied transaction.
    pub async fn get_balance(&self, account_id: AccountId) -> Result<BalanceView, WalletError> {
        let account = self.get_account(account_id).await?;
        let balance_cents = account.balance_cents;
        Ok(BalanceView {
            account,
            balance_cents,
        })
    }

    /// Committed entries for an account in application order.
    pub async fn list_entries(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<LedgerEntry>, WalletError> {
        // Surface a proper not-found instead of an empty list.
        self.get_account(account_id).await?;
        Ok(self.repo.list_entries_for_account(account_id).await?)
    }

    // ========================
    // Audit
    // ========================

    /// Replay the committed ledger and reconcile it against cached
    /// balances.
    pub async fn audit(&self) -> Result<AuditReport, WalletError> {
        let accounts = self.repo.list_accounts(true).await?;
        let entries = self.repo.list_committed_entries().await?;
        let orphaned = self.repo.count_orphaned_entries().await?;
        let transaction_count = self.repo.count_committed_transactions().await?;

        let recomputed = recompute_balances(&entries);
        let mut findings = reconcile_accounts(&accounts, &recomputed);
        findings.extend(check_transaction_balance(&entries));
        if orphaned > 0 {
            findings.push(AuditFinding::OrphanedEntries { count: orphaned });
        }

        Ok(AuditReport {
            account_count: accounts.len() as i64,
            transaction_count,
            entry_count: entries.len() as i64,
            findings,
        })
    }
}
