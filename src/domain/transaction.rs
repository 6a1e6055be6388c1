use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{AccountId, Cents};

pub type TransactionId = Uuid;
pub type EntryId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deposit" => Some(TransactionKind::Deposit),
            "withdrawal" => Some(TransactionKind::Withdrawal),
            "transfer" => Some(TransactionKind::Transfer),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a ledger transaction. Transitions exactly once from Pending
/// to a terminal state; committed transactions are the only ones whose
/// entries count toward balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Committed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(TransactionStatus::Pending),
            "committed" => Some(TransactionStatus::Committed),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// An immutable signed movement on one account within one transaction.
/// Entries are never mutated or deleted; corrections are new transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub amount_cents: Cents,
    pub currency: String,
    /// Account balance immediately after this entry was applied, snapshotted
    /// under the account's version token.
    pub balance_after_cents: Cents,
    pub created_at: DateTime<Utc>,
}

/// A group of balanced ledger entries applied atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub idempotency_key: String,
    pub request_hash: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
}

/// One planned movement within a posting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingLine {
    pub account_id: AccountId,
    pub amount_cents: Cents,
    pub currency: String,
}

/// A validated plan for one ledger transaction: at least two lines, each
/// nonzero, summing to zero per currency. Lines are kept sorted by account
/// id so the repository applies balance updates in a deterministic order.
#[derive(Debug, Clone)]
pub struct Posting {
    pub kind: TransactionKind,
    pub idempotency_key: String,
    lines: Vec<PostingLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostingError {
    TooFewLines,
    ZeroAmountLine,
    Unbalanced { currency: String, sum: Cents },
    EmptyIdempotencyKey,
}

impl std::fmt::Display for PostingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostingError::TooFewLines => write!(f, "a posting requires at least two lines"),
            PostingError::ZeroAmountLine => write!(f, "posting lines must have nonzero amounts"),
            PostingError::Unbalanced { currency, sum } => {
                write!(f, "posting does not balance for {}: sum {}", currency, sum)
            }
            PostingError::EmptyIdempotencyKey => write!(f, "idempotency key must not be empty"),
        }
    }
}

impl std::error::Error for PostingError {}

impl Posting {
    pub fn new(
        kind: TransactionKind,
        idempotency_key: String,
        mut lines: Vec<PostingLine>,
    ) -> Result<Self, PostingError> {
        if idempotency_key.trim().is_empty() {
            return Err(PostingError::EmptyIdempotencyKey);
        }
        if lines.len() < 2 {
            return Err(PostingError::TooFewLines);
        }
        if lines.iter().any(|line| line.amount_cents == 0) {
            return Err(PostingError::ZeroAmountLine);
        }

        let mut sums: HashMap<&str, Cents> = HashMap::new();
        for line in &lines {
            *sums.entry(line.currency.as_str()).or_insert(0) += line.amount_cents;
        }
        if let Some((currency, sum)) = sums.into_iter().find(|(_, sum)| *sum != 0) {
            return Err(PostingError::Unbalanced {
                currency: currency.to_string(),
                sum,
            });
        }

        // Deterministic lock ordering: ascending account id.
        lines.sort_by(|a, b| a.account_id.cmp(&b.account_id));

        Ok(Self {
            kind,
            idempotency_key,
            lines,
        })
    }

    pub fn lines(&self) -> &[PostingLine] {
        &self.lines
    }

    /// Canonical hash of the posting payload. A replayed idempotency key is
    /// only honored when this hash matches the stored one; the same key with
    /// a different payload is a caller bug.
    pub fn request_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_str().as_bytes());
        for line in &self.lines {
            hasher.update(b"|");
            hasher.update(line.account_id.as_bytes());
            hasher.update(line.amount_cents.to_be_bytes());
            hasher.update(line.currency.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// The outcome of a mutating wallet operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_id: TransactionId,
    pub kind: TransactionKind,
    /// Resulting balance of each involved account, in line order.
    pub balances: Vec<(AccountId, Cents)>,
    /// True when an already-committed idempotency key was replayed and no
    /// new entries were written.
    pub replayed: bool,
}

impl TransactionReceipt {
    pub fn balance_of(&self, account_id: AccountId) -> Option<Cents> {
        self.balances
            .iter()
            .find(|(id, _)| *id == account_id)
            .map(|(_, balance)| *balance)
    }
}
