use tracing::info;
use uuid::Uuid;

use crate::domain::{validate_fields, Fields, Record, RecordId, RecordKind};
use crate::storage::Repository;

use super::AppError;

/// Generic store for banks, branches, customers, KYC records and employees.
#[derive(Clone)]
pub struct RecordService {
    repo: Repository,
}

impl RecordService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub async fn list(&self, kind: RecordKind) -> Result<Vec<Record>, AppError> {
        Ok(self.repo.list_records(kind).await?)
    }

    pub async fn get(&self, kind: RecordKind, id: RecordId) -> Result<Record, AppError> {
        self.repo
            .get_record(kind, id)
            .await?
            .ok_or_else(|| AppError::RecordNotFound {
                kind,
                id: id.to_string(),
            })
    }

    /// Validate and store a new record. Identity and creation time are
    /// assigned here; any supplied by the caller are dropped.
    #[tracing::instrument(skip(self, fields))]
    pub async fn create(&self, kind: RecordKind, fields: Fields) -> Result<Record, AppError> {
        let record = Record::new(kind, fields);
        self.check(&record).await?;
        self.repo.insert_record(&record).await?;
        info!(id = %record.id, "Created record");
        Ok(record)
    }

    /// Merge `changes` into an existing record and re-validate the result.
    #[tracing::instrument(skip(self, changes))]
    pub async fn update(
        &self,
        kind: RecordKind,
        id: RecordId,
        changes: Fields,
    ) -> Result<Record, AppError> {
        let mut record = self.get(kind, id).await?;
        record.merge(changes);
        self.check(&record).await?;

        if !self.repo.update_record(&record).await? {
            return Err(AppError::RecordNotFound {
                kind,
                id: id.to_string(),
            });
        }
        info!("Updated record");
        Ok(record)
    }

    /// Delete a record and everything that depends on it.
    /// Returns the number of dependent records removed.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, kind: RecordKind, id: RecordId) -> Result<u64, AppError> {
        let removed = self
            .repo
            .delete_record_cascade(kind, id)
            .await?
            .ok_or_else(|| AppError::RecordNotFound {
                kind,
                id: id.to_string(),
            })?;
        info!(removed_dependents = removed, "Deleted record");
        Ok(removed)
    }

    /// Shape rules, then every reference must name a live record of the right kind.
    async fn check(&self, record: &Record) -> Result<(), AppError> {
        validate_fields(record.kind, &record.fields)?;

        for &(field, target) in record.kind.references() {
            let Some(id) = reference(record, field) else {
                continue;
            };
            if self.repo.get_record(target, id).await?.is_none() {
                return Err(AppError::Validation(format!(
                    "Field '{}' refers to a {} that does not exist: {}",
                    field, target, id
                )));
            }
        }

        // An employee's branch must belong to the employee's bank.
        if record.kind == RecordKind::Employee {
            if let (Some(bank_id), Some(branch_id)) =
                (reference(record, "bankId"), reference(record, "branchId"))
            {
                let branch = self.get(RecordKind::Branch, branch_id).await?;
                if reference(&branch, "bankId") != Some(bank_id) {
                    return Err(AppError::Validation(format!(
                        "Branch {} does not belong to bank {}",
                        branch_id, bank_id
                    )));
                }
            }
        }

        Ok(())
    }
}

fn reference(record: &Record, field: &str) -> Option<Uuid> {
    record
        .str_field(field)
        .and_then(|value| Uuid::parse_str(value).ok())
}
