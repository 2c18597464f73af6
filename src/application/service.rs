use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{LedgerConfig, StoreConfig};
use crate::domain::{
    audit_account, audit_transfer_pairs, format_cents, new_reference_number, Account, AccountId,
    AccountStatus, AccountType, Cents, FeeKind, LedgerReport, PostingError, Record, RecordId,
    RecordKind, Transaction, TransactionId, TransactionKind, MAX_DESCRIPTION_LEN,
};
use crate::storage::{BalanceWrite, IdempotencyRecord, PostOutcome, Repository};

use super::{AccountGuards, AccountLocks, AppError};

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Largest page `list_transactions_page` returns.
pub const MAX_PAGE_SIZE: u32 = 500;

const INITIAL_DEPOSIT_DESCRIPTION: &str = "Initial Deposit";

/// Application service providing the ledger operations.
/// This is the primary interface for any client (CLI, HTTP, etc.).
pub struct LedgerService {
    repo: Repository,
    locks: AccountLocks,
    config: LedgerConfig,
}

/// Request to open an account
#[derive(Debug, Clone)]
pub struct OpenAccount {
    pub customer_id: RecordId,
    pub bank_id: RecordId,
    pub branch_id: RecordId,
    pub account_type: AccountType,
    pub opening_balance: Cents,
}

/// Result of a deposit, withdrawal or fee
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostingResult {
    pub account: Account,
    pub transaction: Transaction,
    /// True if this answers an earlier request with the same idempotency key
    pub replayed: bool,
}

/// Result of a transfer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub from_account: Account,
    pub to_account: Account,
    pub debit: Transaction,
    pub credit: Transaction,
    pub replayed: bool,
}

/// What one posting does to one account.
#[derive(Debug, Clone, Copy)]
struct Leg {
    account_id: AccountId,
    kind: TransactionKind,
    counterparty: Option<AccountId>,
}

/// Accounts and transactions of a posting, leg by leg.
struct Posted {
    accounts: Vec<Account>,
    transactions: Vec<Transaction>,
    replayed: bool,
}

impl Posted {
    fn into_single(self) -> Result<PostingResult, AppError> {
        match (
            <[Account; 1]>::try_from(self.accounts),
            <[Transaction; 1]>::try_from(self.transactions),
        ) {
            (Ok([account]), Ok([transaction])) => Ok(PostingResult {
                account,
                transaction,
                replayed: self.replayed,
            }),
            _ => Err(AppError::Database(anyhow::anyhow!(
                "Posting does not have exactly one leg"
            ))),
        }
    }

    fn into_transfer(self) -> Result<TransferResult, AppError> {
        match (
            <[Account; 2]>::try_from(self.accounts),
            <[Transaction; 2]>::try_from(self.transactions),
        ) {
            (Ok([from_account, to_account]), Ok([debit, credit]))
                if debit.kind == TransactionKind::TransferOut =>
            {
                Ok(TransferResult {
                    from_account,
                    to_account,
                    debit,
                    credit,
                    replayed: self.replayed,
                })
            }
            _ => Err(AppError::Database(anyhow::anyhow!(
                "Transfer does not have a debit and a credit leg"
            ))),
        }
    }
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository, config: LedgerConfig) -> Self {
        Self {
            locks: AccountLocks::new(config.lock_timeout),
            repo,
            config,
        }
    }

    /// Initialize the database (create if missing + migrate) and start a service on it.
    pub async fn init(store: &StoreConfig, config: LedgerConfig) -> Result<Self, AppError> {
        let repo = Repository::init(store).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database.
    pub async fn connect(store: &StoreConfig, config: LedgerConfig) -> Result<Self, AppError> {
        let repo = Repository::connect(store).await?;
        Ok(Self::new(repo, config))
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        Ok(self.repo.ping().await?)
    }

    // ========================
    // Account operations
    // ========================

    /// Open an account, recording the opening balance as its first deposit.
    #[tracing::instrument(skip(self))]
    pub async fn open_account(&self, request: OpenAccount) -> Result<Account, AppError> {
        if request.opening_balance < 0 {
            return Err(AppError::InvalidAmount(
                "Opening balance cannot be negative".to_string(),
            ));
        }

        self.require_record(RecordKind::Customer, request.customer_id)
            .await?;
        let bank = self.require_record(RecordKind::Bank, request.bank_id).await?;
        let branch = self
            .require_record(RecordKind::Branch, request.branch_id)
            .await?;

        let branch_bank = branch
            .str_field("bankId")
            .and_then(|id| Uuid::parse_str(id).ok());
        if branch_bank != Some(bank.id) {
            return Err(AppError::Validation(format!(
                "Branch {} does not belong to bank {}",
                branch.id, bank.id
            )));
        }

        let account = Account::new(
            request.customer_id,
            request.bank_id,
            request.branch_id,
            request.account_type,
            request.opening_balance,
        )
        .map_err(|err| AppError::Validation(err.to_string()))?;

        let mut opening = (request.opening_balance > 0).then(|| {
            Transaction::new(
                account.id,
                TransactionKind::Deposit,
                request.opening_balance,
                request.opening_balance,
                INITIAL_DEPOSIT_DESCRIPTION,
                new_reference_number(),
            )
        });

        self.repo.create_account(&account, opening.as_mut()).await?;

        info!(account_id = %account.id, opening_balance = request.opening_balance, "Opened account");
        Ok(account)
    }

    /// Get an account by ID.
    pub async fn get_account(&self, account_id: AccountId) -> Result<Account, AppError> {
        self.repo
            .get_account(account_id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))
    }

    /// List all accounts.
    pub async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        Ok(self.repo.list_accounts().await?)
    }

    /// Get the current balance of an account.
    pub async fn get_balance(&self, account_id: AccountId) -> Result<Cents, AppError> {
        Ok(self.get_account(account_id).await?.balance_cents)
    }

    /// Close an empty account. Closed accounts accept no further postings.
    #[tracing::instrument(skip(self))]
    pub async fn close_account(&self, account_id: AccountId) -> Result<Account, AppError> {
        let _guards = self.lock_accounts(&[account_id]).await?;

        let mut conflicts = 0;
        loop {
            let mut account = self.get_account(account_id).await?;
            if !account.is_active() {
                return Err(AppError::AccountInactive(account_id.to_string()));
            }
            if account.balance_cents != 0 {
                return Err(AppError::Validation(format!(
                    "Account {} still holds {}; only an empty account can be closed",
                    account_id,
                    format_cents(account.balance_cents)
                )));
            }

            let closed_at = Utc::now();
            if self
                .repo
                .close_account(account_id, account.version, closed_at)
                .await?
            {
                account.status = AccountStatus::Closed;
                account.closed_at = Some(closed_at);
                account.version += 1;
                info!("Closed account");
                return Ok(account);
            }

            self.record_conflict(&mut conflicts, &[account_id])?;
        }
    }

    /// Delete an account together with its whole transaction history.
    /// Returns the number of transactions removed.
    #[tracing::instrument(skip(self))]
    pub async fn delete_account(&self, account_id: AccountId) -> Result<u64, AppError> {
        let _guards = self.lock_accounts(&[account_id]).await?;

        let removed = self
            .repo
            .delete_account(account_id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))?;

        info!(removed_transactions = removed, "Deleted account");
        Ok(removed)
    }

    // ========================
    // Posting operations
    // ========================

    /// Credit an account.
    #[tracing::instrument(skip(self, description, idempotency_key))]
    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount_cents: Cents,
        description: &str,
        idempotency_key: Option<&str>,
    ) -> Result<PostingResult, AppError> {
        validate_posting(amount_cents, description, idempotency_key)?;

        let leg = Leg {
            account_id,
            kind: TransactionKind::Deposit,
            counterparty: None,
        };
        self.post_legs("deposit", &[leg], amount_cents, description, idempotency_key)
            .await?
            .into_single()
    }

    /// Debit an account. Fails with no side effects if the balance is short.
    #[tracing::instrument(skip(self, description, idempotency_key))]
    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount_cents: Cents,
        description: &str,
        idempotency_key: Option<&str>,
    ) -> Result<PostingResult, AppError> {
        validate_posting(amount_cents, description, idempotency_key)?;

        let leg = Leg {
            account_id,
            kind: TransactionKind::Withdraw,
            counterparty: None,
        };
        self.post_legs("withdraw", &[leg], amount_cents, description, idempotency_key)
            .await?
            .into_single()
    }

    /// Charge a fee: a withdrawal described by the fee kind.
    #[tracing::instrument(skip(self, idempotency_key))]
    pub async fn charge_fee(
        &self,
        account_id: AccountId,
        fee: FeeKind,
        amount_cents: Cents,
        idempotency_key: Option<&str>,
    ) -> Result<PostingResult, AppError> {
        let description = fee.description();
        validate_posting(amount_cents, description, idempotency_key)?;

        let leg = Leg {
            account_id,
            kind: TransactionKind::Withdraw,
            counterparty: None,
        };
        self.post_legs("fee", &[leg], amount_cents, description, idempotency_key)
            .await?
            .into_single()
    }

    /// Move money between two accounts. Both legs are stored or neither is.
    #[tracing::instrument(skip(self, description, idempotency_key))]
    pub async fn transfer(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount_cents: Cents,
        description: &str,
        idempotency_key: Option<&str>,
    ) -> Result<TransferResult, AppError> {
        validate_posting(amount_cents, description, idempotency_key)?;
        if from_account_id == to_account_id {
            return Err(AppError::SameAccountTransfer(from_account_id.to_string()));
        }

        let legs = [
            Leg {
                account_id: from_account_id,
                kind: TransactionKind::TransferOut,
                counterparty: Some(to_account_id),
            },
            Leg {
                account_id: to_account_id,
                kind: TransactionKind::TransferIn,
                counterparty: Some(from_account_id),
            },
        ];
        self.post_legs("transfer", &legs, amount_cents, description, idempotency_key)
            .await?
            .into_transfer()
    }

    /// Shared posting path: replay check, locks, then read-compute-write
    /// with an optimistic version check, retried on conflict.
    async fn post_legs(
        &self,
        operation: &'static str,
        legs: &[Leg],
        amount_cents: Cents,
        description: &str,
        idempotency_key: Option<&str>,
    ) -> Result<Posted, AppError> {
        let account_ids: Vec<AccountId> = legs.iter().map(|leg| leg.account_id).collect();
        let fingerprint = request_fingerprint(operation, &account_ids, amount_cents, description);

        if let Some(key) = idempotency_key {
            if let Some(posted) = self.replay(key, operation, &fingerprint, legs.len()).await? {
                return Ok(posted);
            }
        }

        let _guards = self.lock_accounts(&account_ids).await?;

        let mut conflicts = 0;
        loop {
            let mut accounts = Vec::with_capacity(legs.len());
            for leg in legs {
                accounts.push(self.get_account(leg.account_id).await?);
            }
            if let Some(closed) = accounts.iter().find(|account| !account.is_active()) {
                return Err(AppError::AccountInactive(closed.id.to_string()));
            }

            let reference_number = new_reference_number();
            let mut writes = Vec::with_capacity(legs.len());
            let mut entries = Vec::with_capacity(legs.len());
            for (leg, account) in legs.iter().zip(&accounts) {
                let new_balance = account
                    .balance_after(leg.kind, amount_cents)
                    .map_err(|err| posting_error(account, err))?;

                writes.push(BalanceWrite {
                    account_id: account.id,
                    expected_version: account.version,
                    new_balance,
                });

                let mut entry = Transaction::new(
                    account.id,
                    leg.kind,
                    amount_cents,
                    new_balance,
                    description,
                    reference_number.clone(),
                );
                if let Some(other) = leg.counterparty {
                    entry = entry.with_counterparty(other);
                }
                entries.push(entry);
            }

            let idempotency = idempotency_key.map(|key| IdempotencyRecord {
                key: key.to_string(),
                operation: operation.to_string(),
                fingerprint: fingerprint.clone(),
                reference_number: reference_number.clone(),
                created_at: Utc::now(),
            });

            match self
                .repo
                .post(&writes, &mut entries, idempotency.as_ref())
                .await?
            {
                PostOutcome::Committed => {
                    for (account, write) in accounts.iter_mut().zip(&writes) {
                        account.balance_cents = write.new_balance;
                        account.version += 1;
                    }
                    info!(operation, %reference_number, amount_cents, "Posted");
                    return Ok(Posted {
                        accounts,
                        transactions: entries,
                        replayed: false,
                    });
                }
                PostOutcome::DuplicateKey => {
                    // Another request with the same key committed first.
                    let key = idempotency_key.unwrap_or_default();
                    return self
                        .replay(key, operation, &fingerprint, legs.len())
                        .await?
                        .ok_or_else(|| AppError::ConcurrencyConflict(join_ids(&account_ids)));
                }
                PostOutcome::VersionConflict => {
                    self.record_conflict(&mut conflicts, &account_ids)?;
                }
            }
        }
    }

    /// Answer a repeated request from what the first one stored. Once any
    /// leg's account has been deleted the original posting is gone.
    async fn replay(
        &self,
        key: &str,
        operation: &str,
        fingerprint: &str,
        expected_legs: usize,
    ) -> Result<Option<Posted>, AppError> {
        let Some(record) = self.repo.get_idempotency_record(key).await? else {
            return Ok(None);
        };
        if record.operation != operation || record.fingerprint != fingerprint {
            return Err(AppError::IdempotencyKeyReused(key.to_string()));
        }

        let transactions = self
            .repo
            .list_transactions_by_reference(&record.reference_number)
            .await?;
        if transactions.len() != expected_legs {
            return Err(AppError::TransactionNotFound(record.reference_number));
        }

        let mut accounts = Vec::with_capacity(transactions.len());
        for txn in &transactions {
            accounts.push(self.get_account(txn.account_id).await?);
        }

        info!(reference_number = %record.reference_number, "Replayed earlier request");
        Ok(Some(Posted {
            accounts,
            transactions,
            replayed: true,
        }))
    }

    async fn lock_accounts(&self, account_ids: &[AccountId]) -> Result<AccountGuards, AppError> {
        self.locks.acquire(account_ids).await.map_err(|err| {
            warn!(account_id = %err.account_id, waited_ms = err.waited.as_millis() as u64, "Account lock wait timed out");
            AppError::ConcurrencyConflict(err.account_id.to_string())
        })
    }

    fn record_conflict(&self, conflicts: &mut u32, account_ids: &[AccountId]) -> Result<(), AppError> {
        *conflicts += 1;
        if *conflicts > self.config.max_conflict_retries {
            warn!(attempts = *conflicts, "Giving up after repeated version conflicts");
            return Err(AppError::ConcurrencyConflict(join_ids(account_ids)));
        }
        warn!(attempt = *conflicts, "Version conflict, re-reading accounts");
        Ok(())
    }

    async fn require_record(&self, kind: RecordKind, id: RecordId) -> Result<Record, AppError> {
        self.repo
            .get_record(kind, id)
            .await?
            .ok_or_else(|| AppError::RecordNotFound {
                kind,
                id: id.to_string(),
            })
    }

    // ========================
    // Transaction queries
    // ========================

    /// An account's full history, oldest first.
    pub async fn list_transactions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>, AppError> {
        self.get_account(account_id).await?;
        Ok(self.repo.list_transactions_for_account(account_id).await?)
    }

    /// One page of an account's history. Pass the last seen `sequence` as
    /// `after_sequence` to continue where the previous page ended.
    pub async fn list_transactions_page(
        &self,
        account_id: AccountId,
        after_sequence: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Transaction>, AppError> {
        if limit == 0 {
            return Err(AppError::Validation("Page limit must be positive".to_string()));
        }
        self.get_account(account_id).await?;
        Ok(self
            .repo
            .list_transactions_page(account_id, after_sequence.unwrap_or(0), limit.min(MAX_PAGE_SIZE))
            .await?)
    }

    /// Every transaction in posting order.
    pub async fn list_all_transactions(&self) -> Result<Vec<Transaction>, AppError> {
        Ok(self.repo.list_transactions().await?)
    }

    /// Get a transaction by ID.
    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, AppError> {
        self.repo
            .get_transaction(id)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(id.to_string()))
    }

    /// Fix the description of a recorded transaction. Amounts, kinds,
    /// balances and references are never rewritten.
    #[tracing::instrument(skip(self, description))]
    pub async fn correct_transaction_description(
        &self,
        id: TransactionId,
        description: &str,
    ) -> Result<Transaction, AppError> {
        validate_description(description)?;
        if !self
            .repo
            .update_transaction_description(id, description)
            .await?
        {
            return Err(AppError::TransactionNotFound(id.to_string()));
        }
        info!("Corrected transaction description");
        self.get_transaction(id).await
    }

    // ========================
    // Integrity operations
    // ========================

    /// Replay every account's history and report anything that contradicts it.
    #[tracing::instrument(skip(self))]
    pub async fn verify_ledger(&self) -> Result<LedgerReport, AppError> {
        let (accounts, transactions) = self.repo.ledger_snapshot().await?;

        let mut by_account: HashMap<AccountId, Vec<Transaction>> = HashMap::new();
        for txn in &transactions {
            by_account
                .entry(txn.account_id)
                .or_default()
                .push(txn.clone());
        }

        let mut issues = Vec::new();
        for account in &accounts {
            let history = by_account
                .get(&account.id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            issues.extend(audit_account(account, history));
        }

        let live: HashSet<AccountId> = accounts.iter().map(|account| account.id).collect();
        issues.extend(audit_transfer_pairs(&transactions, &live));

        let report = LedgerReport {
            accounts_checked: accounts.len(),
            transactions_checked: transactions.len(),
            issues,
        };
        if report.is_healthy() {
            info!(accounts = report.accounts_checked, transactions = report.transactions_checked, "Ledger verified");
        } else {
            warn!(issues = report.issues.len(), "Ledger verification found issues");
        }
        Ok(report)
    }
}

fn validate_posting(
    amount_cents: Cents,
    description: &str,
    idempotency_key: Option<&str>,
) -> Result<(), AppError> {
    if amount_cents <= 0 {
        return Err(AppError::InvalidAmount(format!(
            "Amount must be positive, got {}",
            format_cents(amount_cents)
        )));
    }
    validate_description(description)?;
    if let Some(key) = idempotency_key {
        let valid = !key.is_empty()
            && key.len() <= MAX_IDEMPOTENCY_KEY_LEN
            && key.bytes().all(|b| b.is_ascii_graphic());
        if !valid {
            return Err(AppError::Validation(format!(
                "Idempotency key must be 1 to {} visible ASCII characters",
                MAX_IDEMPOTENCY_KEY_LEN
            )));
        }
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<(), AppError> {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(AppError::Validation(format!(
            "Description is longer than {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }
    Ok(())
}

fn posting_error(account: &Account, err: PostingError) -> AppError {
    match err {
        PostingError::InsufficientFunds { balance, required } => AppError::InsufficientFunds {
            account_id: account.id,
            balance,
            required,
        },
        PostingError::NonPositiveAmount(amount) => {
            AppError::InvalidAmount(format!("Amount must be positive, got {}", format_cents(amount)))
        }
        PostingError::Overflow => {
            AppError::Validation(format!("Balance of account {} would overflow", account.id))
        }
        PostingError::NegativeOpeningBalance(_) => AppError::Validation(err.to_string()),
    }
}

/// Identifies a request independent of its idempotency key.
fn request_fingerprint(
    operation: &str,
    account_ids: &[AccountId],
    amount_cents: Cents,
    description: &str,
) -> String {
    format!(
        "{}|{}|{}|{}",
        operation,
        join_ids(account_ids),
        amount_cents,
        description
    )
}

fn join_ids(account_ids: &[AccountId]) -> String {
    account_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_posting_order() {
        // amount is checked before anything else
        let long = "x".repeat(MAX_DESCRIPTION_LEN + 1);
        assert!(matches!(
            validate_posting(0, &long, Some("")),
            Err(AppError::InvalidAmount(_))
        ));
        assert!(matches!(
            validate_posting(100, &long, Some("")),
            Err(AppError::Validation(_))
        ));
        assert!(validate_posting(100, &"x".repeat(MAX_DESCRIPTION_LEN), None).is_ok());
    }

    #[test]
    fn test_idempotency_key_shape() {
        assert!(validate_posting(1, "", Some("order-42")).is_ok());
        assert!(validate_posting(1, "", Some(&"k".repeat(MAX_IDEMPOTENCY_KEY_LEN))).is_ok());
        assert!(validate_posting(1, "", Some(&"k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1))).is_err());
        assert!(validate_posting(1, "", Some("has space")).is_err());
        assert!(validate_posting(1, "", Some("")).is_err());
        assert!(validate_posting(1, "", Some("ключ")).is_err());
    }

    #[test]
    fn test_fingerprint_distinguishes_requests() {
        let a = Uuid::new_v4();
        let base = request_fingerprint("deposit", &[a], 500, "salary");
        assert_eq!(base, request_fingerprint("deposit", &[a], 500, "salary"));
        assert_ne!(base, request_fingerprint("deposit", &[a], 501, "salary"));
        assert_ne!(base, request_fingerprint("withdraw", &[a], 500, "salary"));
        assert_ne!(base, request_fingerprint("deposit", &[a], 500, "bonus"));
    }
}
