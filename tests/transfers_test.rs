mod common;

use anyhow::Result;
use bankops::application::{AppError, ErrorKind};
use bankops::domain::TransactionKind;
use common::{test_service, StandardBank};

#[tokio::test]
async fn test_transfer_moves_money_with_paired_legs() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let bank = StandardBank::create(&service).await?;
    let a = bank.open(&service, 30000).await?;
    let b = bank.open(&service, 0).await?;

    let result = service.transfer(a.id, b.id, 29900, "rent", None).await?;
    assert_eq!(result.from_account.balance_cents, 100);
    assert_eq!(result.to_account.balance_cents, 29900);
    assert!(!result.replayed);

    assert_eq!(result.debit.kind, TransactionKind::TransferOut);
    assert_eq!(result.credit.kind, TransactionKind::TransferIn);
    assert_eq!(result.debit.reference_number, result.credit.reference_number);
    assert!(result.debit.reference_number.starts_with("TXN-"));
    assert_eq!(result.debit.counterparty_account_id, Some(b.id));
    assert_eq!(result.credit.counterparty_account_id, Some(a.id));
    assert!(result.debit.sequence < result.credit.sequence);

    assert_eq!(service.get_balance(a.id).await?, 100);
    assert_eq!(service.get_balance(b.id).await?, 29900);

    Ok(())
}

#[tokio::test]
async fn test_short_transfer_leaves_both_accounts_untouched() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let bank = StandardBank::create(&service).await?;
    let a = bank.open(&service, 30000).await?;
    let b = bank.open(&service, 0).await?;

    service.transfer(a.id, b.id, 29900, "", None).await?;
    let err = service.transfer(a.id, b.id, 29900, "", None).await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientFunds { .. }));

    assert_eq!(service.get_balance(a.id).await?, 100);
    assert_eq!(service.get_balance(b.id).await?, 29900);
    // opening deposit plus one leg per account
    assert_eq!(service.list_all_transactions().await?.len(), 3);

    Ok(())
}

#[tokio::test]
async fn test_transfer_of_whole_balance_then_one_cent_short() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let bank = StandardBank::create(&service).await?;
    let a = bank.open(&service, 300).await?;
    let b = bank.open(&service, 50).await?;

    service.transfer(a.id, b.id, 300, "", None).await?;
    assert_eq!(service.get_balance(a.id).await?, 0);
    assert_eq!(service.get_balance(b.id).await?, 350);

    let c = bank.open(&service, 299).await?;
    let before = service.list_all_transactions().await?.len();
    let err = service.transfer(c.id, b.id, 300, "", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert_eq!(service.list_all_transactions().await?.len(), before);
    assert_eq!(service.get_balance(c.id).await?, 299);
    assert_eq!(service.get_balance(b.id).await?, 350);

    Ok(())
}

#[tokio::test]
async fn test_transfer_to_same_account_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let bank = StandardBank::create(&service).await?;
    let a = bank.open(&service, 1000).await?;

    let err = service.transfer(a.id, a.id, 100, "", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SameAccountTransfer);
    assert_eq!(service.get_balance(a.id).await?, 1000);

    Ok(())
}

#[tokio::test]
async fn test_transfer_into_closed_account_fails() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let bank = StandardBank::create(&service).await?;
    let a = bank.open(&service, 1000).await?;
    let b = bank.open(&service, 0).await?;
    service.close_account(b.id).await?;

    let err = service.transfer(a.id, b.id, 100, "", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccountInactive);
    assert_eq!(service.get_balance(a.id).await?, 1000);

    Ok(())
}

#[tokio::test]
async fn test_ledger_stays_consistent_after_transfers() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let bank = StandardBank::create(&service).await?;
    let a = bank.open(&service, 10000).await?;
    let b = bank.open(&service, 5000).await?;

    service.transfer(a.id, b.id, 2500, "", None).await?;
    service.transfer(b.id, a.id, 700, "", None).await?;
    service.withdraw(b.id, 300, "", None).await?;

    let report = service.verify_ledger().await?;
    assert!(report.is_healthy(), "issues: {:?}", report.issues);
    assert_eq!(report.accounts_checked, 2);
    assert_eq!(report.transactions_checked, 7);

    // money is conserved across transfers
    let total = service.get_balance(a.id).await? + service.get_balance(b.id).await?;
    assert_eq!(total, 15000 - 300);

    Ok(())
}
