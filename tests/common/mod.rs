// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::time::Duration;

use anyhow::Result;
use bankops::application::{LedgerService, OpenAccount, RecordService};
use bankops::config::{LedgerConfig, StoreConfig};
use bankops::domain::{Account, AccountType, Cents, Fields, Record, RecordKind};
use serde_json::{json, Value};
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    test_service_with(LedgerConfig::default()).await
}

pub async fn test_service_with(config: LedgerConfig) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let service = LedgerService::init(&test_store(&temp_dir), config).await?;
    Ok((service, temp_dir))
}

/// A second service on the same database file, like another process would open
pub async fn connect_service(temp_dir: &TempDir, config: LedgerConfig) -> Result<LedgerService> {
    Ok(LedgerService::connect(&test_store(temp_dir), config).await?)
}

fn test_store(temp_dir: &TempDir) -> StoreConfig {
    let db_path = temp_dir.path().join("test.db");
    StoreConfig {
        database_path: db_path.to_str().unwrap().to_string(),
        max_connections: 8,
        busy_timeout: Duration::from_secs(5),
    }
}

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Test fixture: one bank with one branch and one customer
pub struct StandardBank {
    pub bank: Record,
    pub branch: Record,
    pub customer: Record,
}

impl StandardBank {
    pub async fn create(service: &LedgerService) -> Result<Self> {
        let records = RecordService::new(service.repository().clone());
        let bank = records
            .create(RecordKind::Bank, fields(json!({"name": "State Bank", "code": "SB"})))
            .await?;
        let branch = records
            .create(
                RecordKind::Branch,
                fields(json!({"bankId": bank.id.to_string(), "name": "Main Street"})),
            )
            .await?;
        let customer = records
            .create(
                RecordKind::Customer,
                fields(json!({"firstName": "Asha", "lastName": "Rao"})),
            )
            .await?;
        Ok(Self {
            bank,
            branch,
            customer,
        })
    }

    pub fn request(&self, account_type: AccountType, opening_balance: Cents) -> OpenAccount {
        OpenAccount {
            customer_id: self.customer.id,
            bank_id: self.bank.id,
            branch_id: self.branch.id,
            account_type,
            opening_balance,
        }
    }

    /// Open a savings account with the given opening balance
    pub async fn open(&self, service: &LedgerService, opening_balance: Cents) -> Result<Account> {
        Ok(service
            .open_account(self.request(AccountType::Savings, opening_balance))
            .await?)
    }
}
