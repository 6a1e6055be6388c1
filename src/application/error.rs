use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::{AccountId, Cents};
use crate::storage::{ApplyError, MigrationError};

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds in account {account_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: Cents,
        requested: Cents,
    },

    #[error("Source and destination accounts are the same")]
    SameAccount,

    #[error("Currency mismatch between accounts: {from_currency} vs {to_currency}")]
    CurrencyMismatch {
        from_currency: String,
        to_currency: String,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Account is closed: {0}")]
    AccountClosed(AccountId),

    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("Idempotency key already used with a different payload: {0}")]
    ConflictingIdempotencyKey(String),

    #[error("Operation timed out waiting for contended accounts; safe to retry")]
    LockTimeout,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Schema migration failure: {0}")]
    Migration(#[from] MigrationError),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl WalletError {
    /// Whether the caller may safely re-submit the same request (with the
    /// same idempotency key).
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::LockTimeout)
    }
}

impl From<ApplyError> for WalletError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::AccountNotFound(id) => WalletError::AccountNotFound(id),
            ApplyError::AccountClosed(id) => WalletError::AccountClosed(id),
            ApplyError::InsufficientFunds {
                account_id,
                balance,
                requested,
            } => WalletError::InsufficientFunds {
                account_id,
                balance,
                requested,
            },
            ApplyError::ConflictingIdempotencyKey(key) => {
                WalletError::ConflictingIdempotencyKey(key)
            }
            // Transient storage conflicts that survived the internal retry
            // budget surface as a retryable timeout.
            ApplyError::VersionConflict | ApplyError::Busy => WalletError::LockTimeout,
            ApplyError::Other(err) => WalletError::Database(err),
        }
    }
}
