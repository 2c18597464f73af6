use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::{LedgerService, RecordService};
use crate::domain::{format_cents, Account, AccountId, Record, RecordKind, Transaction};

/// Database snapshot for full export
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
    /// Keyed by collection name
    pub records: BTreeMap<&'static str, Vec<Record>>,
}

/// Exporter for converting ledger data to CSV or JSON
pub struct Exporter<'a> {
    ledger: &'a LedgerService,
    records: RecordService,
}

impl<'a> Exporter<'a> {
    pub fn new(ledger: &'a LedgerService) -> Self {
        Self {
            ledger,
            records: RecordService::new(ledger.repository().clone()),
        }
    }

    /// Export every transaction in posting order to CSV
    pub async fn export_transactions_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let transactions = self.ledger.list_all_transactions().await?;
        write_transactions(writer, &transactions)
    }

    /// Export one account's history to CSV
    pub async fn export_statement_csv<W: Write>(
        &self,
        writer: W,
        account_id: AccountId,
    ) -> Result<usize> {
        let transactions = self.ledger.list_transactions(account_id).await?;
        write_transactions(writer, &transactions)
    }

    /// Export account balances to CSV
    pub async fn export_accounts_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let accounts = self.ledger.list_accounts().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "customer_id",
            "bank_id",
            "branch_id",
            "type",
            "status",
            "balance",
            "created_at",
        ])?;

        for account in &accounts {
            csv_writer.write_record([
                account.id.to_string(),
                account.customer_id.to_string(),
                account.bank_id.to_string(),
                account.branch_id.to_string(),
                account.account_type.as_str().to_string(),
                account.status.as_str().to_string(),
                format_cents(account.balance_cents),
                account.created_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(accounts.len())
    }

    /// Export the whole database as one JSON document
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<DatabaseSnapshot> {
        let accounts = self.ledger.list_accounts().await?;
        let transactions = self.ledger.list_all_transactions().await?;

        let mut records = BTreeMap::new();
        for kind in RecordKind::ALL {
            records.insert(kind.collection(), self.records.list(kind).await?);
        }

        let snapshot = DatabaseSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            accounts,
            transactions,
            records,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}

fn write_transactions<W: Write>(writer: W, transactions: &[Transaction]) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record([
        "id",
        "sequence",
        "created_at",
        "account_id",
        "kind",
        "amount",
        "balance",
        "reference_number",
        "counterparty_account_id",
        "description",
    ])?;

    for txn in transactions {
        csv_writer.write_record([
            txn.id.to_string(),
            txn.sequence.to_string(),
            txn.created_at.to_rfc3339(),
            txn.account_id.to_string(),
            txn.kind.as_str().to_string(),
            format_cents(txn.amount_cents),
            format_cents(txn.balance_cents),
            txn.reference_number.clone(),
            txn.counterparty_account_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            txn.description.clone(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(transactions.len())
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::domain::TransactionKind;

    #[test]
    fn test_transactions_csv_layout() {
        let account = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut txn = Transaction::new(
            account,
            TransactionKind::TransferOut,
            1250,
            8750,
            "rent, march",
            "TXN-1",
        )
        .with_counterparty(other);
        txn.sequence = 7;

        let mut out = Vec::new();
        let count = write_transactions(&mut out, &[txn]).unwrap();
        assert_eq!(count, 1);

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("id,sequence,created_at"));
        let row = lines.next().unwrap();
        assert!(row.contains(",7,"));
        assert!(row.contains(",transfer_out,12.50,87.50,TXN-1,"));
        assert!(row.contains(&other.to_string()));
        // commas inside a field are quoted
        assert!(row.ends_with("\"rent, march\""));
    }
}
