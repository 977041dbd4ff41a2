//! Configuration entry repository

use crate::db::DatabasePool;
use crate::models::Entry;
use crate::store::KvStore;
use async_trait::async_trait;
use subroute_common::{Error, Result};
use tracing::{debug, info};

/// Database entry repository
pub struct DbEntryRepository {
    pool: DatabasePool,
}

impl DbEntryRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Fetch a full entry, including its modification time
    pub async fn find(&self, key: &str) -> Result<Option<Entry>> {
        sqlx::query_as::<_, Entry>("SELECT key, value, updated_at FROM entries WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }

    /// Insert or replace an entry
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entries (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now())
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

        debug!(key, "Stored entry");
        Ok(())
    }

    /// Delete an entry; returns whether it existed
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM entries WHERE key = ?")
            .bind(key)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// List all entries ordered by key
    pub async fn list(&self) -> Result<Vec<Entry>> {
        sqlx::query_as::<_, Entry>("SELECT key, value, updated_at FROM entries ORDER BY key")
            .fetch_all(self.pool.pool())
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }

    /// Bulk-load entries from a JSON object of string values.
    ///
    /// The whole import runs in one transaction; a non-string value rejects
    /// the import before anything is written.
    pub async fn import(&self, json: &str) -> Result<usize> {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)
            .map_err(|e| Error::Validation(format!("Import must be a JSON object: {}", e)))?;

        let mut entries = Vec::with_capacity(object.len());
        for (key, value) in object {
            match value {
                serde_json::Value::String(value) => entries.push((key, value)),
                other => {
                    return Err(Error::Validation(format!(
                        "Value for '{}' must be a string, got {}",
                        key, other
                    )))
                }
            }
        }

        let now = chrono::Utc::now();
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

        for (key, value) in &entries {
            sqlx::query(
                r#"
                INSERT INTO entries (key, value, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

        info!(count = entries.len(), "Imported entries");
        Ok(entries.len())
    }
}

#[async_trait]
impl KvStore for DbEntryRepository {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.find(key).await?.map(|entry| entry.value))
    }
}
