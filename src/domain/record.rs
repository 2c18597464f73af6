use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

pub type RecordId = Uuid;

/// Free-form document body. Only the fields named by [`RecordKind`] rules
/// carry meaning; everything else is stored as given.
pub type Fields = Map<String, Value>;

/// Keys owned by the server; never accepted from callers.
const SERVER_STAMPED: [&str; 4] = ["id", "_id", "createdAt", "updatedAt"];

const VERIFICATION_STATUSES: [&str; 3] = ["pending", "verified", "rejected"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Bank,
    Branch,
    Customer,
    Kyc,
    Employee,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Bank,
        RecordKind::Branch,
        RecordKind::Customer,
        RecordKind::Kyc,
        RecordKind::Employee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Bank => "bank",
            RecordKind::Branch => "branch",
            RecordKind::Customer => "customer",
            RecordKind::Kyc => "kyc",
            RecordKind::Employee => "employee",
        }
    }

    /// Accepts both the singular kind and the collection name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bank" | "banks" => Some(RecordKind::Bank),
            "branch" | "branches" => Some(RecordKind::Branch),
            "customer" | "customers" => Some(RecordKind::Customer),
            "kyc" => Some(RecordKind::Kyc),
            "employee" | "employees" => Some(RecordKind::Employee),
            _ => None,
        }
    }

    pub fn collection(&self) -> &'static str {
        match self {
            RecordKind::Bank => "banks",
            RecordKind::Branch => "branches",
            RecordKind::Customer => "customers",
            RecordKind::Kyc => "kyc",
            RecordKind::Employee => "employees",
        }
    }

    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            RecordKind::Bank => &["name"],
            RecordKind::Branch => &["bankId", "name"],
            RecordKind::Customer => &["firstName", "lastName"],
            RecordKind::Kyc => &["customerId", "documentType"],
            RecordKind::Employee => &["firstName", "lastName", "bankId", "branchId"],
        }
    }

    /// Fields that must name an existing record of the given kind.
    pub fn references(&self) -> &'static [(&'static str, RecordKind)] {
        match self {
            RecordKind::Branch => &[("bankId", RecordKind::Bank)],
            RecordKind::Kyc => &[("customerId", RecordKind::Customer)],
            RecordKind::Employee => &[
                ("bankId", RecordKind::Bank),
                ("branchId", RecordKind::Branch),
            ],
            RecordKind::Bank | RecordKind::Customer => &[],
        }
    }

    /// Records removed together with a record of this kind, as
    /// (dependent kind, field pointing back here).
    pub fn dependents(&self) -> &'static [(RecordKind, &'static str)] {
        match self {
            RecordKind::Bank => &[
                (RecordKind::Branch, "bankId"),
                (RecordKind::Employee, "bankId"),
            ],
            RecordKind::Branch => &[(RecordKind::Employee, "branchId")],
            RecordKind::Customer => &[(RecordKind::Kyc, "customerId")],
            RecordKind::Kyc | RecordKind::Employee => &[],
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A bank, branch, customer, KYC or employee document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    #[serde(skip)]
    pub kind: RecordKind,
    #[serde(flatten)]
    pub fields: Fields,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(kind: RecordKind, fields: Fields) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            fields: strip_server_fields(fields),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Shallow-merge `changes` into this record, the way a `$set` would.
    pub fn merge(&mut self, changes: Fields) {
        for (key, value) in strip_server_fields(changes) {
            self.fields.insert(key, value);
        }
        self.updated_at = Some(Utc::now());
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

pub fn strip_server_fields(mut fields: Fields) -> Fields {
    for key in SERVER_STAMPED {
        fields.remove(key);
    }
    fields
}

/// Check the shape rules of a document. Reference existence is a storage
/// concern and is checked by the record service.
pub fn validate_fields(kind: RecordKind, fields: &Fields) -> Result<(), RecordError> {
    for &name in kind.required_fields() {
        match fields.get(name) {
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(Value::String(_)) | None | Some(Value::Null) => {
                return Err(RecordError::MissingField(name));
            }
            Some(_) => return Err(RecordError::NotAString(name)),
        }
    }

    for &(name, _) in kind.references() {
        if let Some(value) = fields.get(name) {
            let id = value.as_str().ok_or(RecordError::NotAString(name))?;
            Uuid::parse_str(id).map_err(|_| RecordError::InvalidReference {
                field: name,
                value: id.to_string(),
            })?;
        }
    }

    if kind == RecordKind::Kyc {
        if let Some(linked) = fields.get("linkedBanks") {
            let valid = linked
                .as_array()
                .is_some_and(|banks| banks.iter().all(Value::is_string));
            if !valid {
                return Err(RecordError::InvalidField {
                    field: "linkedBanks",
                    reason: "must be a list of bank ids".to_string(),
                });
            }
        }
        if let Some(status) = fields.get("verificationStatus") {
            let valid = status
                .as_str()
                .is_some_and(|s| VERIFICATION_STATUSES.contains(&s));
            if !valid {
                return Err(RecordError::InvalidField {
                    field: "verificationStatus",
                    reason: format!("must be one of {}", VERIFICATION_STATUSES.join(", ")),
                });
            }
        }
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{0}' must be a string")]
    NotAString(&'static str),
    #[error("field '{field}' is not a valid record id: {value}")]
    InvalidReference { field: &'static str, value: String },
    #[error("field '{field}' {reason}")]
    InvalidField { field: &'static str, reason: String },
}
