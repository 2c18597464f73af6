use anyhow::{Context, Result};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::domain::{Fields, Record, RecordId, RecordKind};

use super::repository::{parse_id, parse_timestamp};
use super::Repository;

impl Repository {
    // ========================
    // Record operations
    // ========================

    /// Save a new record.
    pub async fn insert_record(&self, record: &Record) -> Result<()> {
        let data = serde_json::to_string(&record.fields).context("Failed to encode record")?;

        sqlx::query(
            r#"
            INSERT INTO records (id, kind, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.kind.as_str())
        .bind(data)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await
        .context("Failed to save record")?;

        Ok(())
    }

    /// Get a record of the given kind by ID.
    pub async fn get_record(&self, kind: RecordKind, id: RecordId) -> Result<Option<Record>> {
        let row = sqlx::query(
            "SELECT id, kind, data, created_at, updated_at FROM records WHERE kind = ? AND id = ?",
        )
        .bind(kind.as_str())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch record")?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    /// List all records of a kind, oldest first.
    pub async fn list_records(&self, kind: RecordKind) -> Result<Vec<Record>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, data, created_at, updated_at
            FROM records
            WHERE kind = ?
            ORDER BY created_at, id
            "#,
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list records")?;

        rows.iter().map(Self::row_to_record).collect()
    }

    /// Overwrite a record's fields and update stamp.
    pub async fn update_record(&self, record: &Record) -> Result<bool> {
        let data = serde_json::to_string(&record.fields).context("Failed to encode record")?;

        let result = sqlx::query("UPDATE records SET data = ?, updated_at = ? WHERE kind = ? AND id = ?")
            .bind(data)
            .bind(record.updated_at.map(|dt| dt.to_rfc3339()))
            .bind(record.kind.as_str())
            .bind(record.id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to update record")?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete a record and, transitively, every record that depends on it.
    /// Returns the number of dependents removed, or None if the record does not exist.
    pub async fn delete_record_cascade(&self, kind: RecordKind, id: RecordId) -> Result<Option<u64>> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let deleted = sqlx::query("DELETE FROM records WHERE kind = ? AND id = ?")
            .bind(kind.as_str())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to delete record")?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await.context("Failed to roll back delete")?;
            return Ok(None);
        }

        let mut removed = 0;
        let mut pending = vec![(kind, id.to_string())];
        while let Some((parent_kind, parent_id)) = pending.pop() {
            for &(child_kind, field) in parent_kind.dependents() {
                let rows = sqlx::query(
                    "DELETE FROM records WHERE kind = ? AND json_extract(data, ?) = ? RETURNING id",
                )
                .bind(child_kind.as_str())
                .bind(format!("$.{field}"))
                .bind(&parent_id)
                .fetch_all(&mut *tx)
                .await
                .with_context(|| format!("Failed to delete dependent {} records", child_kind))?;

                removed += rows.len() as u64;
                for row in rows {
                    pending.push((child_kind, row.get::<String, _>("id")));
                }
            }
        }

        tx.commit().await.context("Failed to commit record delete")?;
        Ok(Some(removed))
    }

    fn row_to_record(row: &SqliteRow) -> Result<Record> {
        let kind_str: String = row.get("kind");
        let data: String = row.get("data");
        let updated_at_str: Option<String> = row.get("updated_at");

        let fields: Fields = serde_json::from_str(&data).context("Invalid record data")?;

        Ok(Record {
            id: parse_id(row, "id")?,
            kind: RecordKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid record kind: {}", kind_str))?,
            fields,
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
            updated_at: updated_at_str.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}
