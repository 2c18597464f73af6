use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::AccountId;

#[derive(Debug, Error)]
#[error("Timed out after {waited:?} waiting for account {account_id}")]
pub struct LockTimeout {
    pub account_id: AccountId,
    pub waited: Duration,
}

/// Per-account mutual exclusion for postings within this process.
pub struct AccountLocks {
    table: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
    timeout: Duration,
}

/// Held locks; released together on drop.
#[must_use]
#[derive(Debug)]
pub struct AccountGuards {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl AccountLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Lock every listed account. Locks are always taken in ascending id
    /// order, so two callers locking the same pair cannot deadlock.
    pub async fn acquire(&self, accounts: &[AccountId]) -> Result<AccountGuards, LockTimeout> {
        let mut ids = accounts.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for account_id in ids {
            let lock = self.entry(account_id);
            let guard = tokio::time::timeout(self.timeout, lock.lock_owned())
                .await
                .map_err(|_| LockTimeout {
                    account_id,
                    waited: self.timeout,
                })?;
            guards.push(guard);
        }

        Ok(AccountGuards { _guards: guards })
    }

    fn entry(&self, account_id: AccountId) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Nobody outside the table holds an idle entry.
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            table
                .entry(account_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Number of accounts currently tracked.
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
