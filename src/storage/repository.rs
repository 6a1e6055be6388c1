use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{
    Account, AccountId, AccountKind, Cents, LedgerEntry, LedgerTransaction, Posting,
    TransactionId, TransactionKind, TransactionReceipt, TransactionStatus,
};

use super::{migrator, MigrationError, MIGRATIONS};

/// How long a single connection waits on the database writer lock before
/// reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded internal retry for contended postings.
const MAX_APPLY_ATTEMPTS: u32 = 4;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(10);

/// Failure modes of applying a posting. `VersionConflict` and `Busy` are
/// transient and retried internally; the rest surface to the caller.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("account is closed: {0}")]
    AccountClosed(AccountId),

    #[error("insufficient funds in account {account_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: Cents,
        requested: Cents,
    },

    #[error("idempotency key {0} was already used with a different payload")]
    ConflictingIdempotencyKey(String),

    #[error("account row version changed underneath the posting")]
    VersionConflict,

    #[error("database is busy")]
    Busy,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApplyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApplyError::VersionConflict | ApplyError::Busy)
    }
}

/// Persistence boundary for accounts, transactions and ledger entries.
/// Every mutating wallet operation maps onto exactly one database
/// transaction here.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a connection pool sized from the configuration.
    pub async fn connect(config: &Config) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.connection_url())
            .context("Invalid database URL")?
            .busy_timeout(BUSY_TIMEOUT)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Ok(Self::new(pool))
    }

    /// Run schema migrations. Fatal on history mismatch.
    pub async fn migrate(&self) -> Result<(), MigrationError> {
        migrator::run(&self.pool, MIGRATIONS).await
    }

    /// Connect and migrate in one step.
    pub async fn init(config: &Config) -> Result<Self> {
        let repo = Self::connect(config).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================
    // Account operations
    // ========================

    pub async fn save_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, owner, kind, currency, allow_overdraft, balance_cents, version, created_at, closed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(&account.owner)
        .bind(account.kind.as_str())
        .bind(&account.currency)
        .bind(account.allow_overdraft)
        .bind(account.balance_cents)
        .bind(account.version)
        .bind(account.created_at.to_rfc3339())
        .bind(account.closed_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await
        .context("Failed to save account")?;
        Ok(())
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, kind, currency, allow_overdraft, balance_cents, version, created_at, closed_at
            FROM accounts
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        row.as_ref().map(row_to_account).transpose()
    }

    /// The double-entry counterpart account for one currency, if any account
    /// has ever been opened in it.
    pub async fn get_system_account(&self, currency: &str) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, kind, currency, allow_overdraft, balance_cents, version, created_at, closed_at
            FROM accounts
            WHERE kind = 'system' AND currency = ?
            "#,
        )
        .bind(currency)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch system account")?;

        row.as_ref().map(row_to_account).transpose()
    }

    /// Fetch the system account for a currency, creating it on first use.
    /// Loses the creation race gracefully: the partial unique index keeps
    /// one row per currency and the loser re-reads.
    pub async fn ensure_system_account(&self, currency: &str) -> Result<Account> {
        if let Some(account) = self.get_system_account(currency).await? {
            return Ok(account);
        }

        let account = Account::new_system(currency.to_string());
        match self.save_account(&account).await {
            Ok(()) => Ok(account),
            Err(err) if is_unique_violation(&err) => self
                .get_system_account(currency)
                .await?
                .context("System account vanished after unique violation"),
            Err(err) => Err(err),
        }
    }

    pub async fn list_accounts(&self, include_closed: bool) -> Result<Vec<Account>> {
        let query = if include_closed {
            "SELECT id, owner, kind, currency, allow_overdraft, balance_cents, version, created_at, closed_at FROM accounts ORDER BY created_at, id"
        } else {
            "SELECT id, owner, kind, currency, allow_overdraft, balance_cents, version, created_at, closed_at FROM accounts WHERE closed_at IS NULL ORDER BY created_at, id"
        };

        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list accounts")?;

        rows.iter().map(row_to_account).collect()
    }

    /// Deactivate an account. Returns false when it was already closed.
    pub async fn close_account(&self, id: AccountId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET closed_at = ? WHERE id = ? AND closed_at IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to close account")?;

        Ok(result.rows_affected() > 0)
    }

    // ========================
    // Posting application
    // ========================

    /// Apply a posting with bounded internal retry on transient conflicts.
    /// Exhausted retries surface the last transient error; the service maps
    /// it to a retryable lock timeout.
    pub async fn apply_with_retry(&self, posting: &Posting) -> Result<TransactionReceipt, ApplyError> {
        let mut attempt = 0;
        loop {
            match self.apply_posting(posting).await {
                Err(err) if err.is_transient() && attempt + 1 < MAX_APPLY_ATTEMPTS => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        key = %posting.idempotency_key,
                        "posting conflicted, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Apply one posting inside a single scoped database transaction:
    /// idempotency claim, ordered balance updates under the version token,
    /// entry writes, then status flip to committed. Any failure rolls the
    /// whole transaction back; no partial entries are ever visible.
    pub async fn apply_posting(&self, posting: &Posting) -> Result<TransactionReceipt, ApplyError> {
        let request_hash = posting.request_hash();
        let transaction_id = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(map_sqlx_err)?;

        // The key claim is the first write of the transaction, so it takes
        // the writer lock up front and a duplicate key fails right here.
        let inserted = sqlx::query(
            r#"
            INSERT INTO transactions (id, idempotency_key, request_hash, kind, status, created_at, committed_at)
            VALUES (?, ?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(transaction_id.to_string())
        .bind(&posting.idempotency_key)
        .bind(&request_hash)
        .bind(posting.kind.as_str())
        .bind(TransactionStatus::Pending.as_str())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if is_sqlx_unique_violation(&err) {
                drop(tx);
                return self.replay_existing(posting, &request_hash).await;
            }
            return Err(map_sqlx_err(err));
        }

        // Lines are pre-sorted by account id, so two postings touching the
        // same pair of accounts always update them in the same order.
        let mut balances = Vec::with_capacity(posting.lines().len());
        for line in posting.lines() {
            let account = fetch_account_in_tx(&mut tx, line.account_id)
                .await?
                .ok_or(ApplyError::AccountNotFound(line.account_id))?;

            if account.is_closed() {
                return Err(ApplyError::AccountClosed(account.id));
            }
            if account.currency != line.currency {
                return Err(anyhow::anyhow!(
                    "posting line currency {} does not match account {} currency {}",
                    line.currency,
                    account.id,
                    account.currency
                )
                .into());
            }

            let new_balance = account.balance_cents + line.amount_cents;
            if new_balance < 0 && !account.allow_overdraft {
                return Err(ApplyError::InsufficientFunds {
                    account_id: account.id,
                    balance: account.balance_cents,
                    requested: -line.amount_cents,
                });
            }

            let updated = sqlx::query(
                "UPDATE accounts SET balance_cents = ?, version = version + 1 WHERE id = ? AND version = ?",
            )
            .bind(new_balance)
            .bind(account.id.to_string())
            .bind(account.version)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

            if updated.rows_affected() == 0 {
                return Err(ApplyError::VersionConflict);
            }

            sqlx::query(
                r#"
                INSERT INTO entries (id, transaction_id, account_id, amount_cents, currency, balance_after_cents, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(transaction_id.to_string())
            .bind(account.id.to_string())
            .bind(line.amount_cents)
            .bind(&line.currency)
            .bind(new_balance)
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

            balances.push((account.id, new_balance));
        }

        sqlx::query("UPDATE transactions SET status = ?, committed_at = ? WHERE id = ?")
            .bind(TransactionStatus::Committed.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(transaction_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;

        tracing::debug!(
            %transaction_id,
            kind = %posting.kind,
            lines = posting.lines().len(),
            "committed posting"
        );

        Ok(TransactionReceipt {
            transaction_id,
            kind: posting.kind,
            balances,
            replayed: false,
        })
    }

    /// Replay path: the idempotency key is already taken. When the stored
    /// payload matches and the transaction committed, rebuild the original
    /// receipt from its entries; a different payload is a caller bug.
    async fn replay_existing(
        &self,
        posting: &Posting,
        request_hash: &str,
    ) -> Result<TransactionReceipt, ApplyError> {
        let row = sqlx::query(
            "SELECT id, request_hash, status FROM transactions WHERE idempotency_key = ?",
        )
        .bind(&posting.idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        // The claiming writer rolled back between our insert and this read;
        // a retry will claim the key cleanly.
        .ok_or(ApplyError::VersionConflict)?;

        let stored_hash: String = row.get("request_hash");
        if stored_hash != request_hash {
            return Err(ApplyError::ConflictingIdempotencyKey(
                posting.idempotency_key.clone(),
            ));
        }

        let status_str: String = row.get("status");
        let status = TransactionStatus::from_str(&status_str)
            .with_context(|| format!("Invalid transaction status: {}", status_str))?;
        if status != TransactionStatus::Committed {
            return Err(anyhow::anyhow!(
                "idempotency key {} maps to a non-committed transaction",
                posting.idempotency_key
            )
            .into());
        }

        let id_str: String = row.get("id");
        let transaction_id = Uuid::parse_str(&id_str).context("Invalid transaction ID")?;

        let rows = sqlx::query(
            "SELECT account_id, balance_after_cents FROM entries WHERE transaction_id = ? ORDER BY account_id",
        )
        .bind(transaction_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut balances = Vec::with_capacity(rows.len());
        for row in rows {
            let id_str: String = row.get("account_id");
            let account_id = Uuid::parse_str(&id_str).context("Invalid account ID")?;
            balances.push((account_id, row.get::<Cents, _>("balance_after_cents")));
        }

        tracing::debug!(key = %posting.idempotency_key, %transaction_id, "replayed committed posting");
        Ok(TransactionReceipt {
            transaction_id,
            kind: posting.kind,
            balances,
            replayed: true,
        })
    }

    // ========================
    // Transaction and entry queries
    // ========================

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Option<LedgerTransaction>> {
        let row = sqlx::query(
            r#"
            SELECT id, idempotency_key, request_hash, kind, status, created_at, committed_at
            FROM transactions
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch transaction")?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    pub async fn get_transaction_by_key(&self, key: &str) -> Result<Option<LedgerTransaction>> {
        let row = sqlx::query(
            r#"
            SELECT id, idempotency_key, request_hash, kind, status, created_at, committed_at
            FROM transactions
            WHERE idempotency_key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch transaction by key")?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    pub async fn list_entries_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, transaction_id, account_id, amount_cents, currency, balance_after_cents, created_at
            FROM entries
            WHERE transaction_id = ?
            ORDER BY rowid
            "#,
        )
        .bind(transaction_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list entries for transaction")?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Committed entries for one account, in application order. The
    /// statement view.
    pub async fn list_entries_for_account(&self, account_id: AccountId) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.transaction_id, e.account_id, e.amount_cents, e.currency, e.balance_after_cents, e.created_at
            FROM entries e
            JOIN transactions t ON t.id = e.transaction_id
            WHERE e.account_id = ? AND t.status = 'committed'
            ORDER BY e.rowid
            "#,
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list entries for account")?;

        rows.iter().map(row_to_entry).collect()
    }

    /// All entries belonging to committed transactions.
    pub async fn list_committed_entries(&self) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.transaction_id, e.account_id, e.amount_cents, e.currency, e.balance_after_cents, e.created_at
            FROM entries e
            JOIN transactions t ON t.id = e.transaction_id
            WHERE t.status = 'committed'
            ORDER BY e.rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list committed entries")?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Entries whose parent transaction is missing or not committed. Zero on
    /// a healthy ledger.
    pub async fn count_orphaned_entries(&self) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM entries e
            LEFT JOIN transactions t ON t.id = e.transaction_id
            WHERE t.id IS NULL OR t.status != 'committed'
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count orphaned entries")?;

        Ok(row.get("count"))
    }

    pub async fn count_committed_transactions(&self) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) as count FROM transactions WHERE status = 'committed'")
                .fetch_one(&self.pool)
                .await
                .context("Failed to count transactions")?;
        Ok(row.get("count"))
    }

    /// Recompute one account's balance from committed entries with SQL
    /// aggregation. The audit-check counterpart of the cached balance.
    pub async fn recompute_balance(&self, account_id: AccountId) -> Result<Cents> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(e.amount_cents), 0) as balance
            FROM entries e
            JOIN transactions t ON t.id = e.transaction_id
            WHERE e.account_id = ? AND t.status = 'committed'
            "#,
        )
        .bind(account_id.to_string())
        .fetch_one(&self.pool)
        .await
        .context("Failed to recompute balance")?;

        Ok(row.get("balance"))
    }
}

// ========================
// Row mapping and error classification
// ========================

async fn fetch_account_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    id: AccountId,
) -> Result<Option<Account>, ApplyError> {
    let row = sqlx::query(
        r#"
        SELECT id, owner, kind, currency, allow_overdraft, balance_cents, version, created_at, closed_at
        FROM accounts
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_sqlx_err)?;

    Ok(row.as_ref().map(row_to_account).transpose()?)
}

fn row_to_account(row: &SqliteRow) -> Result<Account> {
    let id_str: String = row.get("id");
    let kind_str: String = row.get("kind");
    let created_at_str: String = row.get("created_at");
    let closed_at_str: Option<String> = row.get("closed_at");

    Ok(Account {
        id: Uuid::parse_str(&id_str).context("Invalid account ID")?,
        owner: row.get("owner"),
        kind: AccountKind::from_str(&kind_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid account kind: {}", kind_str))?,
        currency: row.get("currency"),
        allow_overdraft: row.get::<i32, _>("allow_overdraft") != 0,
        balance_cents: row.get("balance_cents"),
        version: row.get("version"),
        created_at: parse_timestamp(&created_at_str)?,
        closed_at: closed_at_str.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn row_to_transaction(row: &SqliteRow) -> Result<LedgerTransaction> {
    let id_str: String = row.get("id");
    let kind_str: String = row.get("kind");
    let status_str: String = row.get("status");
    let created_at_str: String = row.get("created_at");
    let committed_at_str: Option<String> = row.get("committed_at");

    Ok(LedgerTransaction {
        id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
        idempotency_key: row.get("idempotency_key"),
        request_hash: row.get("request_hash"),
        kind: TransactionKind::from_str(&kind_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind_str))?,
        status: TransactionStatus::from_str(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction status: {}", status_str))?,
        created_at: parse_timestamp(&created_at_str)?,
        committed_at: committed_at_str.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry> {
    let id_str: String = row.get("id");
    let transaction_id_str: String = row.get("transaction_id");
    let account_id_str: String = row.get("account_id");
    let created_at_str: String = row.get("created_at");

    Ok(LedgerEntry {
        id: Uuid::parse_str(&id_str).context("Invalid entry ID")?,
        transaction_id: Uuid::parse_str(&transaction_id_str).context("Invalid transaction ID")?,
        account_id: Uuid::parse_str(&account_id_str).context("Invalid account ID")?,
        amount_cents: row.get("amount_cents"),
        currency: row.get("currency"),
        balance_after_cents: row.get("balance_after_cents"),
        created_at: parse_timestamp(&created_at_str)?,
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .context("Invalid timestamp")?
        .with_timezone(&Utc))
}

fn map_sqlx_err(err: sqlx::Error) -> ApplyError {
    if is_sqlx_busy(&err) {
        ApplyError::Busy
    } else {
        ApplyError::Other(anyhow::Error::new(err).context("Database operation failed"))
    }
}

fn is_sqlx_busy(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("locked")
        || db.message().contains("busy"))
}

fn is_sqlx_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .is_some_and(is_sqlx_unique_violation)
    })
}
