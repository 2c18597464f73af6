use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::domain::{
    Account, AccountId, AccountStatus, AccountType, Cents, Transaction, TransactionId,
    TransactionKind,
};

use super::{MIGRATION_001_RECORDS, MIGRATION_002_LEDGER};

const ACCOUNT_COLUMNS: &str = "id, customer_id, bank_id, branch_id, account_type, balance_cents, status, version, created_at, closed_at";

const TRANSACTION_COLUMNS: &str = "id, sequence, account_id, kind, amount_cents, balance_cents, description, reference_number, counterparty_account_id, created_at";

/// A conditional balance write: applied only if the account is still at
/// `expected_version` and active.
#[derive(Debug, Clone, Copy)]
pub struct BalanceWrite {
    pub account_id: AccountId,
    pub expected_version: i64,
    pub new_balance: Cents,
}

/// A stored idempotency key and the request it acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub operation: String,
    pub fingerprint: String,
    pub reference_number: String,
    pub created_at: DateTime<Utc>,
}

/// How an attempted posting ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Committed,
    /// An account moved on since it was read; nothing was written
    VersionConflict,
    /// The idempotency key was stored by a concurrent writer; nothing was written
    DuplicateKey,
}

/// Repository for persisting and querying accounts, transactions and records.
#[derive(Clone)]
pub struct Repository {
    pub(super) pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for callers that need raw SQL access.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn open(config: &StoreConfig, create: bool) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database_path)
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", config.database_path))?;
        Ok(Self::new(pool))
    }

    /// Connect to an existing SQLite database.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        Self::open(config, false).await
    }

    /// Run database migrations. Safe to run on an already migrated database.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_RECORDS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        sqlx::query(MIGRATION_002_LEDGER)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;

        Ok(())
    }

    /// Initialize the database (create if missing + migrate).
    pub async fn init(config: &StoreConfig) -> Result<Self> {
        let repo = Self::open(config, true).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Cheap round trip used by health checks.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database is unreachable")?;
        Ok(())
    }

    // ========================
    // Account operations
    // ========================

    /// Insert a new account together with its opening deposit, if any, as one unit.
    pub async fn create_account(
        &self,
        account: &Account,
        opening: Option<&mut Transaction>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(&format!(
            "INSERT INTO accounts ({ACCOUNT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(account.id.to_string())
        .bind(account.customer_id.to_string())
        .bind(account.bank_id.to_string())
        .bind(account.branch_id.to_string())
        .bind(account.account_type.as_str())
        .bind(account.balance_cents)
        .bind(account.status.as_str())
        .bind(account.version)
        .bind(account.created_at.to_rfc3339())
        .bind(account.closed_at.map(|dt| dt.to_rfc3339()))
        .execute(&mut *tx)
        .await
        .context("Failed to save account")?;

        if let Some(txn) = opening {
            txn.sequence = next_sequence(&mut tx).await?;
            insert_transaction(&mut tx, txn).await?;
        }

        tx.commit().await.context("Failed to commit new account")?;
        Ok(())
    }

    /// Get an account by ID.
    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    /// List all accounts, oldest first.
    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    /// Close an active, empty account still at `expected_version`.
    /// Returns false if any of those conditions no longer holds.
    pub async fn close_account(
        &self,
        id: AccountId,
        expected_version: i64,
        closed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET status = 'closed', closed_at = ?, version = version + 1
            WHERE id = ? AND version = ? AND status = 'active' AND balance_cents = 0
            "#,
        )
        .bind(closed_at.to_rfc3339())
        .bind(id.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .context("Failed to close account")?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete an account and all of its transactions as one unit.
    /// Returns the number of transactions removed, or None if the account does not exist.
    pub async fn delete_account(&self, id: AccountId) -> Result<Option<u64>> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let removed = sqlx::query("DELETE FROM transactions WHERE account_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to delete account transactions")?
            .rows_affected();

        let deleted = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to delete account")?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await.context("Failed to roll back delete")?;
            return Ok(None);
        }

        tx.commit().await.context("Failed to commit account delete")?;
        Ok(Some(removed))
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let account_type_str: String = row.get("account_type");
        let status_str: String = row.get("status");
        let closed_at_str: Option<String> = row.get("closed_at");

        Ok(Account {
            id: parse_id(row, "id")?,
            customer_id: parse_id(row, "customer_id")?,
            bank_id: parse_id(row, "bank_id")?,
            branch_id: parse_id(row, "branch_id")?,
            account_type: AccountType::from_str(&account_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid account type: {}", account_type_str))?,
            balance_cents: row.get("balance_cents"),
            status: AccountStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid account status: {}", status_str))?,
            version: row.get("version"),
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
            closed_at: closed_at_str.as_deref().map(parse_timestamp).transpose()?,
        })
    }

    // ========================
    // Posting operations
    // ========================

    /// Apply balance writes, the idempotency key and the new transactions as a
    /// single SQL transaction. Either everything is stored or nothing is.
    ///
    /// The first statement is always a write, so SQLite takes the write lock
    /// before anything is read and waits on `busy_timeout` instead of failing.
    pub async fn post(
        &self,
        writes: &[BalanceWrite],
        entries: &mut [Transaction],
        idempotency: Option<&IdempotencyRecord>,
    ) -> Result<PostOutcome> {
        let mut ordered = writes.to_vec();
        ordered.sort_by_key(|w| w.account_id);

        let mut tx = self.pool.begin().await.context("Failed to begin posting")?;

        for write in &ordered {
            let result = sqlx::query(
                r#"
                UPDATE accounts
                SET balance_cents = ?, version = version + 1
                WHERE id = ? AND version = ? AND status = 'active'
                "#,
            )
            .bind(write.new_balance)
            .bind(write.account_id.to_string())
            .bind(write.expected_version)
            .execute(&mut *tx)
            .await
            .context("Failed to update account balance")?;

            if result.rows_affected() == 0 {
                tx.rollback().await.context("Failed to roll back posting")?;
                return Ok(PostOutcome::VersionConflict);
            }
        }

        if let Some(record) = idempotency {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO idempotency_keys (key, operation, fingerprint, reference_number, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.key)
            .bind(&record.operation)
            .bind(&record.fingerprint)
            .bind(&record.reference_number)
            .bind(record.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .context("Failed to store idempotency key")?;

            if result.rows_affected() == 0 {
                tx.rollback().await.context("Failed to roll back posting")?;
                return Ok(PostOutcome::DuplicateKey);
            }
        }

        for entry in entries.iter_mut() {
            entry.sequence = next_sequence(&mut tx).await?;
            insert_transaction(&mut tx, entry).await?;
        }

        tx.commit().await.context("Failed to commit posting")?;
        Ok(PostOutcome::Committed)
    }

    /// Look up a previously acknowledged request.
    pub async fn get_idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT key, operation, fingerprint, reference_number, created_at
            FROM idempotency_keys
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch idempotency key")?;

        match row {
            Some(row) => Ok(Some(IdempotencyRecord {
                key: row.get("key"),
                operation: row.get("operation"),
                fingerprint: row.get("fingerprint"),
                reference_number: row.get("reference_number"),
                created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
            })),
            None => Ok(None),
        }
    }

    // ========================
    // Transaction queries
    // ========================

    /// Get a transaction by ID.
    pub async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch transaction")?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    /// List all transactions in posting order.
    pub async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions ORDER BY sequence"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// List one account's transactions in posting order.
    pub async fn list_transactions_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = ? ORDER BY sequence"
        ))
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions for account")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// One page of an account's history: postings with a sequence number
    /// strictly greater than `after_sequence`, oldest first.
    pub async fn list_transactions_page(
        &self,
        account_id: AccountId,
        after_sequence: i64,
        limit: u32,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM transactions
            WHERE account_id = ? AND sequence > ?
            ORDER BY sequence
            LIMIT ?
            "#
        ))
        .bind(account_id.to_string())
        .bind(after_sequence)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to page transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// All legs posted under one reference number, in posting order.
    pub async fn list_transactions_by_reference(&self, reference: &str) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE reference_number = ? ORDER BY sequence"
        ))
        .bind(reference)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions by reference")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Every account and every transaction, read from one consistent snapshot.
    pub async fn ledger_snapshot(&self) -> Result<(Vec<Account>, Vec<Transaction>)> {
        let mut tx = self.pool.begin().await.context("Failed to begin snapshot")?;

        let account_rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at, id"
        ))
        .fetch_all(&mut *tx)
        .await
        .context("Failed to read accounts")?;

        let transaction_rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions ORDER BY sequence"
        ))
        .fetch_all(&mut *tx)
        .await
        .context("Failed to read transactions")?;

        tx.commit().await.context("Failed to end snapshot")?;

        let accounts = account_rows
            .iter()
            .map(Self::row_to_account)
            .collect::<Result<Vec<_>>>()?;
        let transactions = transaction_rows
            .iter()
            .map(Self::row_to_transaction)
            .collect::<Result<Vec<_>>>()?;
        Ok((accounts, transactions))
    }

    /// Replace a transaction's description. Nothing else about a posting is writable.
    pub async fn update_transaction_description(
        &self,
        id: TransactionId,
        description: &str,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE transactions SET description = ? WHERE id = ?")
            .bind(description)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to update transaction description")?;

        Ok(result.rows_affected() == 1)
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let kind_str: String = row.get("kind");
        let counterparty_str: Option<String> = row.get("counterparty_account_id");

        Ok(Transaction {
            id: parse_id(row, "id")?,
            sequence: row.get("sequence"),
            account_id: parse_id(row, "account_id")?,
            kind: TransactionKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind_str))?,
            amount_cents: row.get("amount_cents"),
            balance_cents: row.get("balance_cents"),
            description: row.get("description"),
            reference_number: row.get("reference_number"),
            counterparty_account_id: counterparty_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid counterparty account ID")?,
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        })
    }
}

/// Get the next posting sequence number and increment the counter.
async fn next_sequence(conn: &mut SqliteConnection) -> Result<i64> {
    let row = sqlx::query(
        r#"
        UPDATE sequence_counter
        SET value = value + 1
        WHERE name = 'transaction_sequence'
        RETURNING value
        "#,
    )
    .fetch_one(conn)
    .await
    .context("Failed to get next sequence number")?;

    Ok(row.get("value"))
}

async fn insert_transaction(conn: &mut SqliteConnection, txn: &Transaction) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO transactions ({TRANSACTION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(txn.id.to_string())
    .bind(txn.sequence)
    .bind(txn.account_id.to_string())
    .bind(txn.kind.as_str())
    .bind(txn.amount_cents)
    .bind(txn.balance_cents)
    .bind(&txn.description)
    .bind(&txn.reference_number)
    .bind(txn.counterparty_account_id.map(|id| id.to_string()))
    .bind(txn.created_at.to_rfc3339())
    .execute(conn)
    .await
    .context("Failed to save transaction")?;
    Ok(())
}

pub(super) fn parse_id(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let value: String = row.get(column);
    Uuid::parse_str(&value).with_context(|| format!("Invalid {column}: {value}"))
}

pub(super) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp: {value}"))?
        .with_timezone(&Utc))
}
