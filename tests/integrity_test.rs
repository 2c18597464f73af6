mod common;

use anyhow::Result;
use bankops::domain::LedgerIssue;
use common::{test_service, StandardBank};

#[tokio::test]
async fn test_verify_detects_tampered_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let bank = StandardBank::create(&service).await?;
    let account = bank.open(&service, 1000).await?;
    service.deposit(account.id, 500, "", None).await?;

    assert!(service.verify_ledger().await?.is_healthy());

    sqlx::query("UPDATE accounts SET balance_cents = 9999 WHERE id = ?")
        .bind(account.id.to_string())
        .execute(service.repository().pool())
        .await?;

    let report = service.verify_ledger().await?;
    assert!(!report.is_healthy());
    assert!(report.issues.iter().any(|issue| matches!(
        issue,
        LedgerIssue::BalanceMismatch { account_id, stored: 9999, replayed: 1500 }
            if *account_id == account.id
    )));

    Ok(())
}

#[tokio::test]
async fn test_verify_detects_missing_transfer_leg() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let bank = StandardBank::create(&service).await?;
    let a = bank.open(&service, 1000).await?;
    let b = bank.open(&service, 0).await?;
    let transfer = service.transfer(a.id, b.id, 400, "", None).await?;

    sqlx::query("DELETE FROM transactions WHERE id = ?")
        .bind(transfer.credit.id.to_string())
        .execute(service.repository().pool())
        .await?;

    let report = service.verify_ledger().await?;
    assert!(report.issues.iter().any(|issue| matches!(
        issue,
        LedgerIssue::UnpairedTransfer { legs: 1, .. }
    )));
    // b's stored balance no longer matches its history either
    assert!(report.issues.iter().any(|issue| matches!(
        issue,
        LedgerIssue::BalanceMismatch { account_id, .. } if *account_id == b.id
    )));

    Ok(())
}

#[tokio::test]
async fn test_deleted_counterparty_does_not_flag_surviving_leg() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let bank = StandardBank::create(&service).await?;
    let a = bank.open(&service, 1000).await?;
    let b = bank.open(&service, 0).await?;
    service.transfer(a.id, b.id, 400, "", None).await?;

    service.delete_account(b.id).await?;

    let report = service.verify_ledger().await?;
    assert!(report.is_healthy(), "issues: {:?}", report.issues);
    assert_eq!(report.accounts_checked, 1);

    Ok(())
}
