use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use super::{Account, AccountId, Cents, Transaction, TransactionId, TransactionKind};

/// Something in the stored ledger that contradicts its invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum LedgerIssue {
    BalanceMismatch {
        account_id: AccountId,
        stored: Cents,
        replayed: Cents,
    },
    SnapshotMismatch {
        transaction_id: TransactionId,
        recorded: Cents,
        expected: Cents,
    },
    NonPositiveAmount {
        transaction_id: TransactionId,
        amount: Cents,
    },
    NegativeBalance {
        account_id: AccountId,
        balance: Cents,
    },
    UnpairedTransfer {
        reference_number: String,
        legs: usize,
    },
    MismatchedTransferLegs {
        reference_number: String,
    },
}

impl std::fmt::Display for LedgerIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerIssue::BalanceMismatch {
                account_id,
                stored,
                replayed,
            } => write!(
                f,
                "account {account_id}: stored balance {stored} but history sums to {replayed}"
            ),
            LedgerIssue::SnapshotMismatch {
                transaction_id,
                recorded,
                expected,
            } => write!(
                f,
                "transaction {transaction_id}: balance snapshot {recorded}, expected {expected}"
            ),
            LedgerIssue::NonPositiveAmount {
                transaction_id,
                amount,
            } => write!(f, "transaction {transaction_id}: non-positive amount {amount}"),
            LedgerIssue::NegativeBalance {
                account_id,
                balance,
            } => write!(f, "account {account_id}: negative balance {balance}"),
            LedgerIssue::UnpairedTransfer {
                reference_number,
                legs,
            } => write!(f, "transfer {reference_number}: {legs} leg(s) instead of 2"),
            LedgerIssue::MismatchedTransferLegs { reference_number } => write!(
                f,
                "transfer {reference_number}: legs disagree on amount, kind or accounts"
            ),
        }
    }
}

/// Result of auditing the whole ledger.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReport {
    pub accounts_checked: usize,
    pub transactions_checked: usize,
    pub issues: Vec<LedgerIssue>,
}

impl LedgerReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Replay one account's history (in posting order) against its stored state.
pub fn audit_account(account: &Account, history: &[Transaction]) -> Vec<LedgerIssue> {
    let mut issues = Vec::new();
    let mut running: Cents = 0;

    for txn in history {
        if txn.amount_cents <= 0 {
            issues.push(LedgerIssue::NonPositiveAmount {
                transaction_id: txn.id,
                amount: txn.amount_cents,
            });
        }
        running += txn.signed_amount();
        if txn.balance_cents != running {
            issues.push(LedgerIssue::SnapshotMismatch {
                transaction_id: txn.id,
                recorded: txn.balance_cents,
                expected: running,
            });
        }
    }

    if running != account.balance_cents {
        issues.push(LedgerIssue::BalanceMismatch {
            account_id: account.id,
            stored: account.balance_cents,
            replayed: running,
        });
    }
    if account.balance_cents < 0 {
        issues.push(LedgerIssue::NegativeBalance {
            account_id: account.id,
            balance: account.balance_cents,
        });
    }

    issues
}

/// Check that every transfer reference has exactly one outgoing and one
/// incoming leg of equal amount pointing at each other. A lone leg whose
/// counterparty account no longer exists is the expected residue of a
/// cascading account delete and is not reported.
pub fn audit_transfer_pairs(
    transactions: &[Transaction],
    live_accounts: &HashSet<AccountId>,
) -> Vec<LedgerIssue> {
    let mut by_reference: BTreeMap<&str, Vec<&Transaction>> = BTreeMap::new();
    for txn in transactions.iter().filter(|t| t.kind.is_transfer_leg()) {
        by_reference
            .entry(txn.reference_number.as_str())
            .or_default()
            .push(txn);
    }

    let mut issues = Vec::new();
    for (reference, legs) in by_reference {
        match legs.as_slice() {
            [a, b] => {
                let (out, inc) = if a.kind == TransactionKind::TransferOut { (a, b) } else { (b, a) };
                let paired = out.kind == TransactionKind::TransferOut
                    && inc.kind == TransactionKind::TransferIn
                    && out.amount_cents == inc.amount_cents
                    && out.counterparty_account_id == Some(inc.account_id)
                    && inc.counterparty_account_id == Some(out.account_id);
                if !paired {
                    issues.push(LedgerIssue::MismatchedTransferLegs {
                        reference_number: reference.to_string(),
                    });
                }
            }
            [lone] if lone
                .counterparty_account_id
                .is_some_and(|other| !live_accounts.contains(&other)) => {}
            _ => issues.push(LedgerIssue::UnpairedTransfer {
                reference_number: reference.to_string(),
                legs: legs.len(),
            }),
        }
    }
    issues
}
