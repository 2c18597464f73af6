use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{Cents, RecordId, TransactionKind};

pub type AccountId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Savings,
    Current,
    Loan,
    FixedDeposit,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Savings => "savings",
            AccountType::Current => "current",
            AccountType::Loan => "loan",
            AccountType::FixedDeposit => "fixed_deposit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "savings" => Some(AccountType::Savings),
            "current" => Some(AccountType::Current),
            "loan" => Some(AccountType::Loan),
            "fixed_deposit" | "fd" => Some(AccountType::FixedDeposit),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AccountStatus::Active),
            "closed" => Some(AccountStatus::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A customer account held at a bank branch.
///
/// The balance is only ever changed by postings; `version` is bumped by every
/// write and is what concurrent writers compare against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    pub customer_id: RecordId,
    pub bank_id: RecordId,
    pub branch_id: RecordId,
    pub account_type: AccountType,
    pub balance_cents: Cents,
    pub status: AccountStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(
        customer_id: RecordId,
        bank_id: RecordId,
        branch_id: RecordId,
        account_type: AccountType,
        opening_balance: Cents,
    ) -> Result<Self, PostingError> {
        if opening_balance < 0 {
            return Err(PostingError::NegativeOpeningBalance(opening_balance));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            customer_id,
            bank_id,
            branch_id,
            account_type,
            balance_cents: opening_balance,
            status: AccountStatus::Active,
            version: 0,
            created_at: Utc::now(),
            closed_at: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Balance this account would hold after posting `amount` of `kind`.
    /// Debits may not take the balance below zero; credits are always allowed.
    pub fn balance_after(&self, kind: TransactionKind, amount: Cents) -> Result<Cents, PostingError> {
        if amount <= 0 {
            return Err(PostingError::NonPositiveAmount(amount));
        }
        if kind.is_credit() {
            self.balance_cents
                .checked_add(amount)
                .ok_or(PostingError::Overflow)
        } else if self.balance_cents < amount {
            Err(PostingError::InsufficientFunds {
                balance: self.balance_cents,
                required: amount,
            })
        } else {
            Ok(self.balance_cents - amount)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostingError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Cents),
    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Cents, required: Cents },
    #[error("balance would overflow")]
    Overflow,
    #[error("opening balance cannot be negative, got {0}")]
    NegativeOpeningBalance(Cents),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_with(balance: Cents) -> Account {
        Account::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            AccountType::Savings,
            balance,
        )
        .unwrap()
    }

    #[test]
    fn test_account_type_roundtrip() {
        for at in [
            AccountType::Savings,
            AccountType::Current,
            AccountType::Loan,
            AccountType::FixedDeposit,
        ] {
            assert_eq!(AccountType::from_str(at.as_str()), Some(at));
        }
        assert_eq!(AccountType::from_str("Fixed-Deposit"), Some(AccountType::FixedDeposit));
        assert_eq!(AccountType::from_str("brokerage"), None);
    }

    #[test]
    fn test_new_account_is_active() {
        let account = account_with(1000);
        assert!(account.is_active());
        assert_eq!(account.version, 0);
        assert_eq!(account.balance_cents, 1000);
    }

    #[test]
    fn test_negative_opening_balance_is_rejected() {
        let result = Account::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            AccountType::Savings,
            -1,
        );
        assert_eq!(result.unwrap_err(), PostingError::NegativeOpeningBalance(-1));
    }

    #[test]
    fn test_credit_always_allowed() {
        let account = account_with(0);
        assert_eq!(account.balance_after(TransactionKind::Deposit, 500), Ok(500));
        assert_eq!(account.balance_after(TransactionKind::TransferIn, 1), Ok(1));
    }

    #[test]
    fn test_debit_to_exactly_zero() {
        let account = account_with(300);
        assert_eq!(account.balance_after(TransactionKind::TransferOut, 300), Ok(0));
    }

    #[test]
    fn test_debit_beyond_balance_rejected() {
        let account = account_with(299);
        assert_eq!(
            account.balance_after(TransactionKind::Withdraw, 300),
            Err(PostingError::InsufficientFunds {
                balance: 299,
                required: 300
            })
        );
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let account = account_with(100);
        assert_eq!(
            account.balance_after(TransactionKind::Deposit, 0),
            Err(PostingError::NonPositiveAmount(0))
        );
    }

    #[test]
    fn test_credit_overflow_rejected() {
        let account = account_with(i64::MAX);
        assert_eq!(
            account.balance_after(TransactionKind::Deposit, 1),
            Err(PostingError::Overflow)
        );
    }
}
