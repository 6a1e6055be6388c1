use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Account, AccountId, Cents, LedgerEntry};

/// A single reconciliation finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuditFinding {
    /// Cached balance disagrees with the sum of committed entries.
    BalanceMismatch {
        account_id: AccountId,
        cached: Cents,
        recomputed: Cents,
    },
    /// A committed transaction whose entries do not sum to zero per currency.
    UnbalancedTransaction {
        transaction_id: super::TransactionId,
        currency: String,
        sum: Cents,
    },
    /// Entries referencing a transaction that is not committed, or no
    /// transaction at all.
    OrphanedEntries { count: i64 },
}

/// Result of replaying the committed ledger against the cached balances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub account_count: i64,
    pub transaction_count: i64,
    pub entry_count: i64,
    pub findings: Vec<AuditFinding>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Recompute each account's balance from a list of committed entries.
pub fn recompute_balances(entries: &[LedgerEntry]) -> HashMap<AccountId, Cents> {
    let mut balances: HashMap<AccountId, Cents> = HashMap::new();
    for entry in entries {
        *balances.entry(entry.account_id).or_insert(0) += entry.amount_cents;
    }
    balances
}

/// Compare cached account balances against recomputed ones. Accounts with no
/// entries reconcile against zero.
pub fn reconcile_accounts(
    accounts: &[Account],
    recomputed: &HashMap<AccountId, Cents>,
) -> Vec<AuditFinding> {
    accounts
        .iter()
        .filter_map(|account| {
            let expected = recomputed.get(&account.id).copied().unwrap_or(0);
            if account.balance_cents != expected {
                Some(AuditFinding::BalanceMismatch {
                    account_id: account.id,
                    cached: account.balance_cents,
                    recomputed: expected,
                })
            } else {
                None
            }
        })
        .collect()
}

/// Verify the double-entry invariant: entries of each committed transaction
/// sum to zero per currency.
pub fn check_transaction_balance(entries: &[LedgerEntry]) -> Vec<AuditFinding> {
    let mut sums: HashMap<(super::TransactionId, &str), Cents> = HashMap::new();
    for entry in entries {
        *sums
            .entry((entry.transaction_id, entry.currency.as_str()))
            .or_insert(0) += entry.amount_cents;
    }

    let mut findings: Vec<AuditFinding> = sums
        .into_iter()
        .filter(|(_, sum)| *sum != 0)
        .map(|((transaction_id, currency), sum)| AuditFinding::UnbalancedTransaction {
            transaction_id,
            currency: currency.to_string(),
            sum,
        })
        .collect();
    // Stable output for display and tests.
    findings.sort_by_key(|f| match f {
        AuditFinding::UnbalancedTransaction { transaction_id, .. } => *transaction_id,
        _ => uuid::Uuid::nil(),
    });
    findings
}
