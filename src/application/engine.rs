use crate::domain::{Account, Cents, Posting, PostingLine, TransactionKind};

use super::WalletError;

/// Pure validation and posting construction. Knows nothing about storage:
/// it checks what is statically checkable (amounts, account status,
/// currencies, same-account) and emits a balanced posting plan. The balance
/// floor is enforced later, inside the repository transaction, where the
/// row is locked.
pub struct BalanceEngine;

impl BalanceEngine {
    /// A deposit credits the account and debits the per-currency system
    /// account, keeping every transaction zero-sum.
    pub fn plan_deposit(
        account: &Account,
        system: &Account,
        amount: Cents,
        idempotency_key: String,
    ) -> Result<Posting, WalletError> {
        Self::require_positive(amount)?;
        Self::require_open(account)?;

        Self::build(
            TransactionKind::Deposit,
            idempotency_key,
            vec![
                line(system, -amount),
                line(account, amount),
            ],
        )
    }

    /// A withdrawal mirrors a deposit: the account is debited, the system
    /// account credited.
    pub fn plan_withdrawal(
        account: &Account,
        system: &Account,
        amount: Cents,
        idempotency_key: String,
    ) -> Result<Posting, WalletError> {
        Self::require_positive(amount)?;
        Self::require_open(account)?;

        Self::build(
            TransactionKind::Withdrawal,
            idempotency_key,
            vec![
                line(account, -amount),
                line(system, amount),
            ],
        )
    }

    pub fn plan_transfer(
        from: &Account,
        to: &Account,
        amount: Cents,
        idempotency_key: String,
    ) -> Result<Posting, WalletError> {
        Self::require_positive(amount)?;
        if from.id == to.id {
            return Err(WalletError::SameAccount);
        }
        Self::require_open(from)?;
        Self::require_open(to)?;
        if from.currency != to.currency {
            return Err(WalletError::CurrencyMismatch {
                from_currency: from.currency.clone(),
                to_currency: to.currency.clone(),
            });
        }

        Self::build(
            TransactionKind::Transfer,
            idempotency_key,
            vec![
                line(from, -amount),
                line(to, amount),
            ],
        )
    }

    fn require_positive(amount: Cents) -> Result<(), WalletError> {
        if amount <= 0 {
            return Err(WalletError::InvalidAmount(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        Ok(())
    }

    fn require_open(account: &Account) -> Result<(), WalletError> {
        if account.is_closed() {
            return Err(WalletError::AccountClosed(account.id));
        }
        Ok(())
    }

    fn build(
        kind: TransactionKind,
        idempotency_key: String,
        lines: Vec<PostingLine>,
    ) -> Result<Posting, WalletError> {
        // The engine only emits balanced pairs; a posting error here is a
        // bug, not caller input.
        Posting::new(kind, idempotency_key, lines)
            .map_err(|err| WalletError::Database(anyhow::Error::new(err)))
    }
}

fn line(account: &Account, amount: Cents) -> PostingLine {
    PostingLine {
        account_id: account.id,
        amount_cents: amount,
        currency: account.currency.clone(),
    }
}
