use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::HeaderMap;
use axum::Json;
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use uuid::Uuid;

use crate::application::AppError;
use crate::domain::{parse_cents, Cents};

use super::ApiError;

pub(crate) const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// `Json<T>` whose rejections use the API error body.
pub(crate) struct JsonBody<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| AppError::Validation(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// A money amount as sent by clients: `"12.50"` or `12.5`.
/// Numbers are read through their decimal text, never as floats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AmountInput(String);

impl AmountInput {
    pub(crate) fn cents(&self) -> Result<Cents, AppError> {
        Ok(parse_cents(&self.0)?)
    }
}

impl<'de> Deserialize<'de> for AmountInput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(text) => Ok(Self(text)),
            Value::Number(number) => Ok(Self(number.to_string())),
            other => Err(de::Error::custom(format!(
                "amount must be a decimal string or number, got {other}"
            ))),
        }
    }
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::Validation(format!("Malformed {what} id: {raw}")))
}

/// The `Idempotency-Key` header if present, else the key from the body.
pub(crate) fn idempotency_key(
    headers: &HeaderMap,
    from_body: Option<String>,
) -> Result<Option<String>, AppError> {
    match headers.get(IDEMPOTENCY_KEY_HEADER) {
        Some(value) => value
            .to_str()
            .map(|key| Some(key.to_string()))
            .map_err(|_| AppError::Validation("Idempotency-Key must be visible ASCII".to_string())),
        None => Ok(from_body),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[derive(Deserialize)]
    struct Body {
        amount: AmountInput,
    }

    fn amount(json: &str) -> Result<Cents, AppError> {
        let body: Body = serde_json::from_str(json).unwrap();
        body.amount.cents()
    }

    #[test]
    fn test_amount_from_string_or_number() {
        assert_eq!(amount(r#"{"amount": "12.50"}"#).unwrap(), 1250);
        assert_eq!(amount(r#"{"amount": 12.5}"#).unwrap(), 1250);
        assert_eq!(amount(r#"{"amount": 300}"#).unwrap(), 30000);
        assert_eq!(amount(r#"{"amount": 0.1}"#).unwrap(), 10);
    }

    #[test]
    fn test_amount_rejects_sub_cent_precision() {
        assert!(matches!(
            amount(r#"{"amount": "1.005"}"#),
            Err(AppError::InvalidAmount(_))
        ));
        assert!(serde_json::from_str::<Body>(r#"{"amount": true}"#).is_err());
    }

    #[test]
    fn test_header_key_wins_over_body() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            idempotency_key(&headers, Some("body".into())).unwrap(),
            Some("body".to_string())
        );
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("header"));
        assert_eq!(
            idempotency_key(&headers, Some("body".into())).unwrap(),
            Some("header".to_string())
        );
    }

    #[test]
    fn test_malformed_id() {
        assert!(matches!(parse_id("42", "account"), Err(AppError::Validation(_))));
        assert!(parse_id(&Uuid::new_v4().to_string(), "account").is_ok());
    }
}
