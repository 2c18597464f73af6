mod records;
mod repository;

pub use repository::*;

/// SQL migration for the record store
pub const MIGRATION_001_RECORDS: &str = include_str!("migrations/001_records.sql");

/// SQL migration for accounts, transactions and idempotency keys
pub const MIGRATION_002_LEDGER: &str = include_str!("migrations/002_ledger.sql");
