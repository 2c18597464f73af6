use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Cents};

pub type TransactionId = Uuid;

/// Upper bound on free-text descriptions attached to postings.
pub const MAX_DESCRIPTION_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    TransferIn,
    TransferOut,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdraw => "withdraw",
            TransactionKind::TransferIn => "transfer_in",
            TransactionKind::TransferOut => "transfer_out",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionKind::Deposit),
            "withdraw" => Some(TransactionKind::Withdraw),
            "transfer_in" => Some(TransactionKind::TransferIn),
            "transfer_out" => Some(TransactionKind::TransferOut),
            _ => None,
        }
    }

    /// Returns true if this kind increases the account balance
    pub fn is_credit(&self) -> bool {
        matches!(self, TransactionKind::Deposit | TransactionKind::TransferIn)
    }

    pub fn is_transfer_leg(&self) -> bool {
        matches!(
            self,
            TransactionKind::TransferIn | TransactionKind::TransferOut
        )
    }

    /// Signed effect of `amount` on the balance
    pub fn signed(&self, amount: Cents) -> Cents {
        if self.is_credit() { amount } else { -amount }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One posting against one account. Immutable once recorded, except for the
/// description which may be corrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    /// Global posting order, assigned by the repository
    pub sequence: i64,
    pub account_id: AccountId,
    pub kind: TransactionKind,
    /// Always positive; direction comes from `kind`
    pub amount_cents: Cents,
    /// Account balance right after this posting
    pub balance_cents: Cents,
    pub description: String,
    /// Shared by both legs of a transfer
    pub reference_number: String,
    /// The other account of a transfer leg
    pub counterparty_account_id: Option<AccountId>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a new posting. Sequence number must be assigned by the repository.
    pub fn new(
        account_id: AccountId,
        kind: TransactionKind,
        amount_cents: Cents,
        balance_cents: Cents,
        description: impl Into<String>,
        reference_number: impl Into<String>,
    ) -> Self {
        assert!(amount_cents > 0, "Transaction amount must be positive");
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            account_id,
            kind,
            amount_cents,
            balance_cents,
            description: description.into(),
            reference_number: reference_number.into(),
            counterparty_account_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_counterparty(mut self, account_id: AccountId) -> Self {
        self.counterparty_account_id = Some(account_id);
        self
    }

    pub fn signed_amount(&self) -> Cents {
        self.kind.signed(self.amount_cents)
    }
}

/// Generate a collision-free reference number from 128 random bits.
pub fn new_reference_number() -> String {
    format!("TXN-{}", Uuid::new_v4().simple()).to_uppercase()
}
