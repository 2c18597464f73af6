use serde::Serialize;
use thiserror::Error;

use crate::domain::{AccountId, Cents, ParseCentsError, RecordError, RecordKind};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("{kind} not found: {id}")]
    RecordNotFound { kind: RecordKind, id: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Idempotency key '{0}' was already used for a different request")]
    IdempotencyKeyReused(String),

    #[error("Insufficient funds in account {account_id}: balance {balance}, required {required}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: Cents,
        required: Cents,
    },

    #[error("Account is closed: {0}")]
    AccountInactive(String),

    #[error("Cannot transfer from account {0} to itself")]
    SameAccountTransfer(String),

    #[error("Concurrent update on account {0}, retry the request")]
    ConcurrencyConflict(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

/// The failure categories callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    ValidationFailed,
    InsufficientFunds,
    AccountInactive,
    SameAccountTransfer,
    ConcurrencyConflict,
    PersistenceUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::AccountInactive => "account_inactive",
            ErrorKind::SameAccountTransfer => "same_account_transfer",
            ErrorKind::ConcurrencyConflict => "concurrency_conflict",
            ErrorKind::PersistenceUnavailable => "persistence_unavailable",
        }
    }

    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConcurrencyConflict | ErrorKind::PersistenceUnavailable
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::AccountNotFound(_)
            | AppError::TransactionNotFound(_)
            | AppError::RecordNotFound { .. } => ErrorKind::NotFound,
            AppError::InvalidAmount(_)
            | AppError::Validation(_)
            | AppError::IdempotencyKeyReused(_) => ErrorKind::ValidationFailed,
            AppError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            AppError::AccountInactive(_) => ErrorKind::AccountInactive,
            AppError::SameAccountTransfer(_) => ErrorKind::SameAccountTransfer,
            AppError::ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
            AppError::Database(_) => ErrorKind::PersistenceUnavailable,
        }
    }
}

impl From<RecordError> for AppError {
    fn from(err: RecordError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<ParseCentsError> for AppError {
    fn from(err: ParseCentsError) -> Self {
        AppError::InvalidAmount(err.to_string())
    }
}
