use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::application::{AppError, OpenAccount, MAX_PAGE_SIZE};
use crate::domain::{
    calculate_interest, format_cents, parse_cents, AccountType, Cents, FeeKind, InterestPeriod,
    Transaction,
};

use super::extract::{idempotency_key, parse_id, AmountInput, JsonBody};
use super::{created, ApiResult, AppState};

const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OpenAccountBody {
    customer_id: String,
    bank_id: String,
    branch_id: String,
    account_type: String,
    #[serde(default, alias = "balance")]
    opening_balance: Option<AmountInput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PostingBody {
    amount: AmountInput,
    #[serde(default)]
    description: String,
    idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeeBody {
    #[serde(alias = "feeType")]
    kind: String,
    amount: AmountInput,
    idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransferBody {
    from_account_id: String,
    to_account_id: String,
    amount: AmountInput,
    #[serde(default)]
    description: String,
    idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DescriptionBody {
    description: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageQuery {
    after: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InterestQuery {
    principal: String,
    rate: String,
    period: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionPage {
    transactions: Vec<Transaction>,
    /// Pass as `after` to fetch the next page; absent on the last page
    #[serde(skip_serializing_if = "Option::is_none")]
    next_after: Option<i64>,
}

/// 201 for a fresh posting, 200 when answering a replayed request.
fn posting_response<T: Serialize>(value: T, replayed: bool) -> Response {
    if replayed {
        Json(value).into_response()
    } else {
        created(value).into_response()
    }
}

pub(crate) async fn list_accounts(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.ledger.list_accounts().await?))
}

pub(crate) async fn open_account(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<OpenAccountBody>,
) -> ApiResult<impl IntoResponse> {
    let account_type = AccountType::from_str(&body.account_type).ok_or_else(|| {
        AppError::Validation(format!("Unknown account type: {}", body.account_type))
    })?;
    let opening_balance = match &body.opening_balance {
        Some(amount) => amount.cents()?,
        None => 0,
    };

    let request = OpenAccount {
        customer_id: parse_id(&body.customer_id, "customer")?,
        bank_id: parse_id(&body.bank_id, "bank")?,
        branch_id: parse_id(&body.branch_id, "branch")?,
        account_type,
        opening_balance,
    };
    Ok(created(state.ledger.open_account(request).await?))
}

pub(crate) async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "account")?;
    Ok(Json(state.ledger.get_account(id).await?))
}

pub(crate) async fn delete_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "account")?;
    let removed = state.ledger.delete_account(id).await?;
    Ok(Json(json!({
        "message": "Account deleted successfully",
        "removedTransactions": removed,
    })))
}

pub(crate) async fn close_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "account")?;
    Ok(Json(state.ledger.close_account(id).await?))
}

pub(crate) async fn get_balance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "account")?;
    let balance = state.ledger.get_balance(id).await?;
    Ok(Json(json!({
        "accountId": id,
        "balanceCents": balance,
        "balance": format_cents(balance),
    })))
}

pub(crate) async fn list_transactions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "account")?;
    let after = query
        .after
        .as_deref()
        .map(|raw| {
            raw.parse::<i64>()
                .map_err(|_| AppError::Validation(format!("Invalid cursor: {raw}")))
        })
        .transpose()?;
    let limit = match query.limit.as_deref() {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| AppError::Validation(format!("Invalid limit: {raw}")))?
            .min(MAX_PAGE_SIZE),
        None => DEFAULT_PAGE_SIZE,
    };

    let transactions = state.ledger.list_transactions_page(id, after, limit).await?;
    let next_after = if transactions.len() as u32 == limit {
        transactions.last().map(|txn| txn.sequence)
    } else {
        None
    };
    Ok(Json(TransactionPage {
        transactions,
        next_after,
    }))
}

pub(crate) async fn deposit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<PostingBody>,
) -> ApiResult<Response> {
    let id = parse_id(&id, "account")?;
    let amount = body.amount.cents()?;
    let key = idempotency_key(&headers, body.idempotency_key)?;

    let result = state
        .ledger
        .deposit(id, amount, &body.description, key.as_deref())
        .await?;
    let replayed = result.replayed;
    Ok(posting_response(result, replayed))
}

pub(crate) async fn withdraw(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<PostingBody>,
) -> ApiResult<Response> {
    let id = parse_id(&id, "account")?;
    let amount = body.amount.cents()?;
    let key = idempotency_key(&headers, body.idempotency_key)?;

    let result = state
        .ledger
        .withdraw(id, amount, &body.description, key.as_deref())
        .await?;
    let replayed = result.replayed;
    Ok(posting_response(result, replayed))
}

pub(crate) async fn charge_fee(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<FeeBody>,
) -> ApiResult<Response> {
    let id = parse_id(&id, "account")?;
    let fee = FeeKind::from_str(&body.kind)
        .ok_or_else(|| AppError::Validation(format!("Unknown fee type: {}", body.kind)))?;
    let amount = body.amount.cents()?;
    let key = idempotency_key(&headers, body.idempotency_key)?;

    let result = state
        .ledger
        .charge_fee(id, fee, amount, key.as_deref())
        .await?;
    let replayed = result.replayed;
    Ok(posting_response(result, replayed))
}

pub(crate) async fn transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<TransferBody>,
) -> ApiResult<Response> {
    let from = parse_id(&body.from_account_id, "account")?;
    let to = parse_id(&body.to_account_id, "account")?;
    let amount = body.amount.cents()?;
    let key = idempotency_key(&headers, body.idempotency_key)?;

    let result = state
        .ledger
        .transfer(from, to, amount, &body.description, key.as_deref())
        .await?;
    let replayed = result.replayed;
    Ok(posting_response(result, replayed))
}

pub(crate) async fn list_all_transactions(
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.ledger.list_all_transactions().await?))
}

pub(crate) async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "transaction")?;
    Ok(Json(state.ledger.get_transaction(id).await?))
}

pub(crate) async fn correct_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<DescriptionBody>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "transaction")?;
    Ok(Json(
        state
            .ledger
            .correct_transaction_description(id, &body.description)
            .await?,
    ))
}

pub(crate) async fn verify_ledger(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.ledger.verify_ledger().await?))
}

pub(crate) async fn interest(Query(query): Query<InterestQuery>) -> ApiResult<impl IntoResponse> {
    let principal: Cents = parse_cents(&query.principal).map_err(AppError::from)?;
    // "7.25" percent is 725 basis points, the same text-to-hundredths rule as money
    let rate_bps = parse_cents(&query.rate)
        .map_err(|err| AppError::Validation(format!("Invalid rate {}: {}", query.rate, err)))?;
    let period = match query.period.as_deref() {
        Some(raw) => InterestPeriod::from_str(raw)
            .ok_or_else(|| AppError::Validation(format!("Unknown period: {raw}")))?,
        None => InterestPeriod::Yearly,
    };

    let interest = calculate_interest(principal, rate_bps, period);
    Ok(Json(json!({
        "principal": format_cents(principal),
        "rate": format_cents(rate_bps),
        "period": period,
        "interestCents": interest,
        "interest": format_cents(interest),
    })))
}
