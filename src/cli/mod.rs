use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use crate::application::{LedgerService, OpenAccount, RecordService};
use crate::config::{LedgerConfig, LogFormat, Settings, StoreConfig};
use crate::domain::{
    calculate_interest, format_cents, parse_cents, Account, AccountType, Fields, FeeKind,
    InterestPeriod, RecordKind, Transaction,
};
use crate::http::{self, AppState};
use crate::telemetry;

/// Bankops - bank operations ledger
#[derive(Parser)]
#[command(name = "bankops")]
#[command(about = "Accounts, postings and bank records with an auditable transaction ledger")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "BANKOPS_DATABASE", default_value = "bankops.db", global = true)]
    pub database: String,

    /// Maximum number of pooled SQLite connections
    #[arg(long, env = "BANKOPS_MAX_CONNECTIONS", default_value_t = 8, global = true)]
    pub max_connections: u32,

    /// How long SQLite waits on a locked database (milliseconds)
    #[arg(long, env = "BANKOPS_BUSY_TIMEOUT_MS", default_value_t = 5000, global = true)]
    pub busy_timeout_ms: u64,

    /// Upper bound on waiting for an account lock (milliseconds)
    #[arg(long, env = "BANKOPS_LOCK_TIMEOUT_MS", default_value_t = 5000, global = true)]
    pub lock_timeout_ms: u64,

    /// Re-reads after losing an optimistic version check
    #[arg(long, env = "BANKOPS_MAX_CONFLICT_RETRIES", default_value_t = 3, global = true)]
    pub max_conflict_retries: u32,

    /// Log format: text, json
    #[arg(long, env = "BANKOPS_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Start the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long, env = "BANKOPS_BIND", default_value = "127.0.0.1:5000")]
        bind: String,
    },

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Credit an account
    Deposit {
        /// Account ID
        account: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Description of the deposit
        #[arg(short, long, default_value = "")]
        description: String,

        /// Idempotency key; repeating the command with the same key posts once
        #[arg(long)]
        key: Option<String>,
    },

    /// Debit an account
    Withdraw {
        /// Account ID
        account: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Description of the withdrawal
        #[arg(short, long, default_value = "")]
        description: String,

        /// Idempotency key; repeating the command with the same key posts once
        #[arg(long)]
        key: Option<String>,
    },

    /// Charge a fee to an account
    Fee {
        /// Account ID
        account: String,

        /// Fee type: maintenance, overdraft, late_payment
        kind: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Idempotency key
        #[arg(long)]
        key: Option<String>,
    },

    /// Move money between two accounts
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Source account ID
        #[arg(long)]
        from: String,

        /// Destination account ID
        #[arg(long)]
        to: String,

        /// Description of the transfer
        #[arg(short, long, default_value = "")]
        description: String,

        /// Idempotency key
        #[arg(long)]
        key: Option<String>,
    },

    /// Show balance for an account or all accounts
    Balance {
        /// Account ID (omit for all accounts)
        account: Option<String>,
    },

    /// List an account's transactions, oldest first
    History {
        /// Account ID
        account: String,

        /// Only show postings after this sequence number
        #[arg(long)]
        after: Option<i64>,

        /// Maximum number of transactions to show
        #[arg(short, long, default_value_t = 100)]
        limit: u32,
    },

    /// Verify ledger integrity
    Check,

    /// Export data to CSV or JSON
    Export {
        /// What to export: transactions, statement, accounts, full
        export_type: String,

        /// Account ID (required for statement)
        #[arg(long)]
        account: Option<String>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Simple interest for one period
    Interest {
        /// Principal (e.g., "10000.00")
        principal: String,

        /// Annual rate in percent (e.g., "7.25")
        #[arg(short, long)]
        rate: String,

        /// Period: daily, monthly, yearly
        #[arg(short, long, default_value = "yearly")]
        period: String,
    },

    /// Bank, branch, customer, KYC and employee records
    #[command(subcommand)]
    Record(RecordCommands),
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account
    Open {
        /// Customer record ID
        #[arg(long)]
        customer: String,

        /// Bank record ID
        #[arg(long)]
        bank: String,

        /// Branch record ID
        #[arg(long)]
        branch: String,

        /// Account type: savings, current, loan, fixed_deposit
        #[arg(short = 't', long = "type", default_value = "savings")]
        account_type: String,

        /// Opening balance, recorded as the initial deposit
        #[arg(long, default_value = "0")]
        opening: String,
    },

    /// List all accounts
    List,

    /// Show account details
    Show {
        /// Account ID
        id: String,
    },

    /// Close an empty account
    Close {
        /// Account ID
        id: String,
    },

    /// Delete an account and its transactions
    Delete {
        /// Account ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum RecordCommands {
    /// List records of a collection
    List {
        /// Collection: banks, branches, customers, kyc, employees
        collection: String,
    },

    /// Show one record
    Show {
        collection: String,
        id: String,
    },

    /// Create a record from a JSON object
    Create {
        collection: String,

        /// Fields as JSON, e.g. '{"name": "State Bank"}'
        json: String,
    },

    /// Merge JSON fields into a record
    Update {
        collection: String,
        id: String,
        json: String,
    },

    /// Delete a record and its dependents
    Delete {
        collection: String,
        id: String,
    },
}

impl Cli {
    /// Collect flags and environment into runtime settings.
    pub fn settings(&self) -> Result<Settings> {
        let log_format = LogFormat::from_str(&self.log_format).ok_or_else(|| {
            anyhow::anyhow!(
                "Invalid log format '{}'. Valid formats: text, json",
                self.log_format
            )
        })?;

        Ok(Settings {
            store: StoreConfig {
                database_path: self.database.clone(),
                max_connections: self.max_connections,
                busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            },
            ledger: LedgerConfig {
                lock_timeout: Duration::from_millis(self.lock_timeout_ms),
                max_conflict_retries: self.max_conflict_retries,
            },
            log_format,
        })
    }

    pub async fn run(self) -> Result<()> {
        let settings = self.settings()?;
        let default_filter = if self.verbose || matches!(self.command, Commands::Serve { .. }) {
            "info"
        } else {
            "warn"
        };
        telemetry::init_tracing(settings.log_format, default_filter)?;

        match self.command {
            Commands::Init => {
                LedgerService::init(&settings.store, settings.ledger).await?;
                println!("Database initialized: {}", settings.store.database_path);
            }

            Commands::Serve { bind } => {
                let service = LedgerService::init(&settings.store, settings.ledger).await?;
                let listener = tokio::net::TcpListener::bind(&bind)
                    .await
                    .with_context(|| format!("Failed to bind {}", bind))?;
                http::serve(listener, AppState::new(service), http::shutdown_signal()).await?;
            }

            Commands::Account(account_cmd) => {
                let service = connect(&settings).await?;
                run_account_command(&service, account_cmd).await?;
            }

            Commands::Deposit {
                account,
                amount,
                description,
                key,
            } => {
                let service = connect(&settings).await?;
                let account_id = parse_uuid(&account, "account")?;
                let amount_cents = parse_amount(&amount)?;
                let result = service
                    .deposit(account_id, amount_cents, &description, key.as_deref())
                    .await?;
                print_posting("Deposited", &result.account, &result.transaction, result.replayed);
            }

            Commands::Withdraw {
                account,
                amount,
                description,
                key,
            } => {
                let service = connect(&settings).await?;
                let account_id = parse_uuid(&account, "account")?;
                let amount_cents = parse_amount(&amount)?;
                let result = service
                    .withdraw(account_id, amount_cents, &description, key.as_deref())
                    .await?;
                print_posting("Withdrew", &result.account, &result.transaction, result.replayed);
            }

            Commands::Fee {
                account,
                kind,
                amount,
                key,
            } => {
                let service = connect(&settings).await?;
                let account_id = parse_uuid(&account, "account")?;
                let fee = FeeKind::from_str(&kind).ok_or_else(|| {
                    anyhow::anyhow!(
                        "Invalid fee type '{}'. Valid types: maintenance, overdraft, late_payment",
                        kind
                    )
                })?;
                let amount_cents = parse_amount(&amount)?;
                let result = service
                    .charge_fee(account_id, fee, amount_cents, key.as_deref())
                    .await?;
                print_posting("Charged", &result.account, &result.transaction, result.replayed);
            }

            Commands::Transfer {
                amount,
                from,
                to,
                description,
                key,
            } => {
                let service = connect(&settings).await?;
                let from_id = parse_uuid(&from, "source account")?;
                let to_id = parse_uuid(&to, "destination account")?;
                let amount_cents = parse_amount(&amount)?;

                let result = service
                    .transfer(from_id, to_id, amount_cents, &description, key.as_deref())
                    .await?;

                println!(
                    "{} transfer: {} {} -> {} ({})",
                    if result.replayed { "Already recorded" } else { "Recorded" },
                    format_cents(result.debit.amount_cents),
                    result.from_account.id,
                    result.to_account.id,
                    result.debit.reference_number
                );
                println!(
                    "  {} balance: {}",
                    result.from_account.id,
                    format_cents(result.from_account.balance_cents)
                );
                println!(
                    "  {} balance: {}",
                    result.to_account.id,
                    format_cents(result.to_account.balance_cents)
                );
            }

            Commands::Balance { account } => {
                let service = connect(&settings).await?;
                run_balance_command(&service, account).await?;
            }

            Commands::History {
                account,
                after,
                limit,
            } => {
                let service = connect(&settings).await?;
                let account_id = parse_uuid(&account, "account")?;
                let transactions = service
                    .list_transactions_page(account_id, after, limit)
                    .await?;
                print_transactions(&transactions);
            }

            Commands::Check => {
                let service = connect(&settings).await?;
                run_check_command(&service).await?;
            }

            Commands::Export {
                export_type,
                account,
                output,
            } => {
                let service = connect(&settings).await?;
                run_export_command(&service, &export_type, account.as_deref(), output.as_deref())
                    .await?;
            }

            Commands::Interest {
                principal,
                rate,
                period,
            } => {
                let principal_cents = parse_amount(&principal)?;
                let rate_bps = parse_cents(&rate)
                    .with_context(|| format!("Invalid rate '{}'. Use a percentage like '7.25'", rate))?;
                let period = InterestPeriod::from_str(&period).ok_or_else(|| {
                    anyhow::anyhow!("Invalid period '{}'. Valid periods: daily, monthly, yearly", period)
                })?;

                let interest = calculate_interest(principal_cents, rate_bps, period);
                println!(
                    "Interest on {} at {}% ({}): {}",
                    format_cents(principal_cents),
                    format_cents(rate_bps),
                    period,
                    format_cents(interest)
                );
            }

            Commands::Record(record_cmd) => {
                let service = connect(&settings).await?;
                let records = RecordService::new(service.repository().clone());
                run_record_command(&records, record_cmd).await?;
            }
        }

        Ok(())
    }
}

async fn connect(settings: &Settings) -> Result<LedgerService> {
    Ok(LedgerService::connect(&settings.store, settings.ledger.clone()).await?)
}

async fn run_account_command(service: &LedgerService, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Open {
            customer,
            bank,
            branch,
            account_type,
            opening,
        } => {
            let account_type = AccountType::from_str(&account_type).ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid account type '{}'. Valid types: savings, current, loan, fixed_deposit",
                    account_type
                )
            })?;

            let account = service
                .open_account(OpenAccount {
                    customer_id: parse_uuid(&customer, "customer")?,
                    bank_id: parse_uuid(&bank, "bank")?,
                    branch_id: parse_uuid(&branch, "branch")?,
                    account_type,
                    opening_balance: parse_amount(&opening)?,
                })
                .await?;
            println!(
                "Opened {} account {} with balance {}",
                account.account_type,
                account.id,
                format_cents(account.balance_cents)
            );
        }

        AccountCommands::List => {
            let accounts = service.list_accounts().await?;
            if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                println!(
                    "{:<36}  {:<14} {:<8} {:>14}",
                    "ID", "TYPE", "STATUS", "BALANCE"
                );
                println!("{}", "-".repeat(76));
                for account in accounts {
                    println!(
                        "{:<36}  {:<14} {:<8} {:>14}",
                        account.id,
                        account.account_type.as_str(),
                        account.status.as_str(),
                        format_cents(account.balance_cents)
                    );
                }
            }
        }

        AccountCommands::Show { id } => {
            let account = service.get_account(parse_uuid(&id, "account")?).await?;
            let transactions = service.list_transactions(account.id).await?;

            println!("Account: {}", account.id);
            println!("  Type:           {}", account.account_type);
            println!("  Status:         {}", account.status);
            println!("  Customer:       {}", account.customer_id);
            println!("  Bank:           {}", account.bank_id);
            println!("  Branch:         {}", account.branch_id);
            println!(
                "  Opened:         {}",
                account.created_at.format("%Y-%m-%d %H:%M:%S")
            );
            if let Some(closed) = account.closed_at {
                println!("  Closed:         {}", closed.format("%Y-%m-%d %H:%M:%S"));
            }
            println!();
            println!("  Balance:        {}", format_cents(account.balance_cents));
            println!("  Transactions:   {}", transactions.len());
            if let Some(last) = transactions.last() {
                println!(
                    "  Last activity:  {}",
                    last.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        AccountCommands::Close { id } => {
            let account = service.close_account(parse_uuid(&id, "account")?).await?;
            println!("Closed account: {}", account.id);
        }

        AccountCommands::Delete { id } => {
            let account_id = parse_uuid(&id, "account")?;
            let removed = service.delete_account(account_id).await?;
            println!(
                "Deleted account {} and {} transaction(s)",
                account_id, removed
            );
        }
    }
    Ok(())
}

async fn run_balance_command(service: &LedgerService, account: Option<String>) -> Result<()> {
    match account {
        Some(id) => {
            let account_id = parse_uuid(&id, "account")?;
            let balance = service.get_balance(account_id).await?;
            println!("{}: {}", account_id, format_cents(balance));
        }
        None => {
            let accounts = service.list_accounts().await?;
            if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                println!("{:<36}  {:>14}", "ACCOUNT", "BALANCE");
                println!("{}", "-".repeat(52));
                let mut total = 0i128;
                for account in &accounts {
                    total += account.balance_cents as i128;
                    println!(
                        "{:<36}  {:>14}",
                        account.id,
                        format_cents(account.balance_cents)
                    );
                }
                println!("{}", "-".repeat(52));
                println!(
                    "{:<36}  {:>14}",
                    "Total:",
                    i64::try_from(total)
                        .map(format_cents)
                        .unwrap_or_else(|_| "overflow".to_string())
                );
            }
        }
    }
    Ok(())
}

async fn run_check_command(service: &LedgerService) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.verify_ledger().await?;

    println!("Accounts:     {}", report.accounts_checked);
    println!("Transactions: {}", report.transactions_checked);
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}

async fn run_export_command(
    service: &LedgerService,
    export_type: &str,
    account: Option<&str>,
    output: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{stdout, Write};

    let exporter = Exporter::new(service);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "transactions" => {
            let count = exporter.export_transactions_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        "statement" => {
            let id = account.context("--account is required for a statement export")?;
            let count = exporter
                .export_statement_csv(writer, parse_uuid(id, "account")?)
                .await?;
            if output.is_some() {
                eprintln!("Exported {} transactions for account {}", count, id);
            }
        }
        "accounts" => {
            let count = exporter.export_accounts_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} accounts", count);
            }
        }
        "full" => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported full database: {} accounts, {} transactions, {} records",
                    snapshot.accounts.len(),
                    snapshot.transactions.len(),
                    snapshot.records.values().map(Vec::len).sum::<usize>()
                );
            }
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: transactions, statement, accounts, full",
                export_type
            );
        }
    }

    Ok(())
}

async fn run_record_command(records: &RecordService, cmd: RecordCommands) -> Result<()> {
    match cmd {
        RecordCommands::List { collection } => {
            let kind = parse_kind(&collection)?;
            let list = records.list(kind).await?;
            if list.is_empty() {
                println!("No {} found.", kind.collection());
            } else {
                println!("{:<36}  {:<30} CREATED", "ID", "NAME");
                println!("{}", "-".repeat(88));
                for record in list {
                    println!(
                        "{:<36}  {:<30} {}",
                        record.id,
                        truncate(&display_name(&record.fields), 30),
                        record.created_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }

        RecordCommands::Show { collection, id } => {
            let kind = parse_kind(&collection)?;
            let record = records.get(kind, parse_uuid(&id, kind.as_str())?).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        RecordCommands::Create { collection, json } => {
            let kind = parse_kind(&collection)?;
            let record = records.create(kind, parse_fields(&json)?).await?;
            println!("Created {}: {}", kind, record.id);
        }

        RecordCommands::Update {
            collection,
            id,
            json,
        } => {
            let kind = parse_kind(&collection)?;
            let record = records
                .update(kind, parse_uuid(&id, kind.as_str())?, parse_fields(&json)?)
                .await?;
            println!("Updated {}: {}", kind, record.id);
        }

        RecordCommands::Delete { collection, id } => {
            let kind = parse_kind(&collection)?;
            let removed = records.delete(kind, parse_uuid(&id, kind.as_str())?).await?;
            println!("Deleted {} {} and {} dependent record(s)", kind, id, removed);
        }
    }
    Ok(())
}

fn print_posting(verb: &str, account: &Account, txn: &Transaction, replayed: bool) {
    if replayed {
        println!("Already recorded ({}), nothing posted again", txn.reference_number);
    } else {
        println!(
            "{} {} ({})",
            verb,
            format_cents(txn.amount_cents),
            txn.reference_number
        );
    }
    println!("  {} balance: {}", account.id, format_cents(account.balance_cents));
}

fn print_transactions(transactions: &[Transaction]) {
    if transactions.is_empty() {
        println!("No transactions found.");
        return;
    }

    println!(
        "{:>6} {:<20} {:<13} {:>12} {:>12} DESCRIPTION",
        "SEQ", "DATE", "KIND", "AMOUNT", "BALANCE"
    );
    println!("{}", "-".repeat(90));
    for txn in transactions {
        println!(
            "{:>6} {:<20} {:<13} {:>12} {:>12} {}",
            txn.sequence,
            txn.created_at.format("%Y-%m-%d %H:%M:%S"),
            txn.kind.as_str(),
            format_cents(txn.signed_amount()),
            format_cents(txn.balance_cents),
            truncate(&txn.description, 30)
        );
    }
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("Invalid {} ID format (expected UUID)", what))
}

fn parse_amount(raw: &str) -> Result<i64> {
    parse_cents(raw).with_context(|| format!("Invalid amount '{}'. Use '50.00' or '50'", raw))
}

fn parse_kind(collection: &str) -> Result<RecordKind> {
    RecordKind::from_str(collection).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown collection '{}'. Valid collections: banks, branches, customers, kyc, employees",
            collection
        )
    })
}

fn parse_fields(json: &str) -> Result<Fields> {
    match serde_json::from_str::<Value>(json).context("Invalid JSON")? {
        Value::Object(fields) => Ok(fields),
        _ => anyhow::bail!("Record fields must be a JSON object"),
    }
}

/// Best human label for a record: its name, or first and last name.
fn display_name(fields: &Fields) -> String {
    let get = |key: &str| fields.get(key).and_then(Value::as_str).unwrap_or("");
    let name = get("name");
    if !name.is_empty() {
        return name.to_string();
    }
    let full = format!("{} {}", get("firstName"), get("lastName"));
    if full.trim().is_empty() {
        get("documentType").to_string()
    } else {
        full.trim().to_string()
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_settings_from_flags() {
        let cli = Cli::try_parse_from([
            "bankops",
            "--database",
            "/tmp/x.db",
            "--lock-timeout-ms",
            "250",
            "--log-format",
            "json",
            "check",
        ])
        .unwrap();
        let settings = cli.settings().unwrap();
        assert_eq!(settings.store.database_path, "/tmp/x.db");
        assert_eq!(settings.ledger.lock_timeout, Duration::from_millis(250));
        assert_eq!(settings.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_log_format_is_rejected() {
        let cli = Cli::try_parse_from(["bankops", "--log-format", "xml", "check"]).unwrap();
        assert!(cli.settings().is_err());
    }

    #[test]
    fn test_display_name() {
        let bank = json!({"name": "State Bank"});
        let person = json!({"firstName": "Asha", "lastName": "Rao"});
        let kyc = json!({"documentType": "passport"});
        assert_eq!(display_name(bank.as_object().unwrap()), "State Bank");
        assert_eq!(display_name(person.as_object().unwrap()), "Asha Rao");
        assert_eq!(display_name(kyc.as_object().unwrap()), "passport");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long description", 10), "a long ...");
    }
}
