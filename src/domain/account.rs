use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type AccountId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// A customer-facing wallet account.
    Customer,
    /// The per-currency counterpart account that absorbs money entering or
    /// leaving the books. Deposits debit it, withdrawals credit it.
    System,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Customer => "customer",
            AccountKind::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "customer" => Some(AccountKind::Customer),
            "system" => Some(AccountKind::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A wallet account. The balance field is a denormalized cache of the sum of
/// committed ledger entries for this account; it is only ever written inside
/// a repository transaction holding the row's version token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    pub kind: AccountKind,
    pub currency: String,
    pub allow_overdraft: bool,
    pub balance_cents: Cents,
    /// Optimistic concurrency token, bumped on every balance write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    /// Accounts are never deleted, only closed.
    pub closed_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(owner: String, currency: String, allow_overdraft: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            kind: AccountKind::Customer,
            currency,
            allow_overdraft,
            balance_cents: 0,
            version: 0,
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    /// The double-entry counterpart for deposits and withdrawals in one
    /// currency. Always allowed to go negative: a positive customer balance
    /// is mirrored by a negative system balance.
    pub fn new_system(currency: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: format!("system:{}", currency),
            kind: AccountKind::System,
            currency,
            allow_overdraft: true,
            balance_cents: 0,
            version: 0,
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    pub fn is_system(&self) -> bool {
        self.kind == AccountKind::System
    }
}

/// Validate and normalize a currency code: non-empty, 2..=8 ASCII letters,
/// uppercased. Covers ISO-4217 codes without hardcoding a currency table.
pub fn normalize_currency(code: &str) -> Option<String> {
    let code = code.trim();
    if (2..=8).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code.to_ascii_uppercase())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_kind_roundtrip() {
        for kind in [AccountKind::Customer, AccountKind::System] {
            assert_eq!(AccountKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(AccountKind::from_str("checking"), None);
    }

    #[test]
    fn test_new_account_starts_empty_and_open() {
        let account = Account::new("alice".into(), "EUR".into(), false);
        assert_eq!(account.balance_cents, 0);
        assert_eq!(account.version, 0);
        assert!(!account.is_closed());
        assert!(!account.is_system());
    }

    #[test]
    fn test_system_account_allows_overdraft() {
        let system = Account::new_system("EUR".into());
        assert!(system.allow_overdraft);
        assert!(system.is_system());
        assert_eq!(system.owner, "system:EUR");
    }

    #[test]
    fn test_normalize_currency() {
        assert_eq!(normalize_currency("eur"), Some("EUR".to_string()));
        assert_eq!(normalize_currency(" USD "), Some("USD".to_string()));
        assert_eq!(normalize_currency(""), None);
        assert_eq!(normalize_currency("E"), None);
        assert_eq!(normalize_currency("EU1"), None);
    }
}
