// src/vector/shadow.rs
// Embedded shadow store for messages: SQLite with vectors as BLOBs and
// in-process cosine scoring. Mirrors the authoritative `messages` collection
// only.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::info;

use super::MessageRecord;
use crate::embedding::EMBEDDING_DIM;

pub struct ShadowStore {
    pool: SqlitePool,
    table: String,
}

impl ShadowStore {
    /// Open (or create) the store under `db_path`. The schema is created
    /// explicitly here; there is no marker row.
    pub async fn open(db_path: &str, table: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("failed to create shadow store directory")?;
            }
        }

        let url = format!("sqlite://{db_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .context("failed to open shadow store")?;

        let store = Self {
            pool,
            table: table.to_string(),
        };
        store.ensure_schema().await?;
        info!("shadow store ready at {db_path} (table {table})");
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn open_in_memory(table: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("failed to open in-memory shadow store")?;
        let store = Self {
            pool,
            table: table.to_string(),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        let table = &self.table;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                external_message_id TEXT NOT NULL,
                room_id TEXT NOT NULL,
                sender_id TEXT,
                sender_name TEXT,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                vector BLOB NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await
        .context("failed to create shadow table")?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_room ON {table}(room_id)"
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_external ON {table}(external_message_id)"
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert(&self, record: &MessageRecord, vector: &[f32]) -> Result<()> {
        let table = &self.table;
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO {table}
             (id, external_message_id, room_id, sender_id, sender_name, text, created_at, vector)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ))
        .bind(&record.id)
        .bind(&record.external_message_id)
        .bind(&record.room_id)
        .bind(&record.sender_id)
        .bind(&record.sender_name)
        .bind(&record.text)
        .bind(record.created_at.to_rfc3339())
        .bind(vector_to_blob(vector))
        .execute(&self.pool)
        .await
        .context("failed to write to shadow store")?;
        Ok(())
    }

    /// Cosine search over the (optionally room-scoped) table. Vectors are
    /// loaded and scored in-process; the shadow table stays small enough for
    /// that by design.
    pub async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        room_id: Option<&str>,
    ) -> Result<Vec<(MessageRecord, f32)>> {
        let table = &self.table;
        let rows = match room_id {
            Some(room) => {
                sqlx::query(&format!(
                    "SELECT id, external_message_id, room_id, sender_id, sender_name,
                            text, created_at, vector
                     FROM {table} WHERE room_id = ?1"
                ))
                .bind(room)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT id, external_message_id, room_id, sender_id, sender_name,
                            text, created_at, vector
                     FROM {table}"
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("failed to read candidates from shadow store")?;

        let mut scored: Vec<(MessageRecord, f32)> = rows
            .into_iter()
            .filter_map(|row| {
                let record = row_to_record(&row)?;
                let blob: Vec<u8> = row.try_get("vector").ok()?;
                let candidate = blob_to_vector(&blob);
                let score = cosine_similarity(vector, &candidate);
                Some((record, score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    pub async fn delete_ids(&self, ids: &[String]) -> Result<u64> {
        let table = &self.table;
        let mut deleted = 0;
        for id in ids {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = ?1"))
                .bind(id)
                .execute(&self.pool)
                .await
                .context("failed to delete from shadow store")?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    pub async fn delete_room(&self, room_id: &str) -> Result<u64> {
        let table = &self.table;
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE room_id = ?1"))
            .bind(room_id)
            .execute(&self.pool)
            .await
            .context("failed to delete room from shadow store")?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self, room_id: Option<&str>) -> Result<u64> {
        let table = &self.table;
        let count: i64 = match room_id {
            Some(room) => {
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE room_id = ?1"))
                    .bind(room)
                    .fetch_one(&self.pool)
                    .await
            }
            None => {
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .context("failed to count shadow store rows")?;
        Ok(count as u64)
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

fn row_to_record(row: &SqliteRow) -> Option<MessageRecord> {
    let created_at: String = row.try_get("created_at").ok()?;
    Some(MessageRecord {
        id: row.try_get("id").ok()?,
        external_message_id: row.try_get("external_message_id").ok()?,
        room_id: row.try_get("room_id").ok()?,
        sender_id: row.try_get("sender_id").ok()?,
        sender_name: row.try_get("sender_name").ok()?,
        text: row.try_get("text").ok()?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .ok()?
            .with_timezone(&Utc),
    })
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, room: &str, text: &str) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            external_message_id: format!("ext-{id}"),
            room_id: room.to_string(),
            sender_id: Some("u1".to_string()),
            sender_name: None,
            text: text.to_string(),
            created_at: Utc::now(),
        }
    }

    fn unit_vector(hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn blob_round_trips() {
        let v = vec![0.25f32, -1.5, 3.25];
        assert_eq!(blob_to_vector(&vector_to_blob(&v)), v);
    }

    #[test]
    fn cosine_behaves() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0];
        let c = vec![0.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
    }

    #[tokio::test]
    async fn upsert_search_and_delete_round_trip() {
        let store = ShadowStore::open_in_memory("messages").await.unwrap();

        store.upsert(&record("a", "r1", "first"), &unit_vector(0)).await.unwrap();
        store.upsert(&record("b", "r1", "second"), &unit_vector(1)).await.unwrap();
        store.upsert(&record("c", "r2", "other room"), &unit_vector(0)).await.unwrap();

        assert_eq!(store.count(None).await.unwrap(), 3);
        assert_eq!(store.count(Some("r1")).await.unwrap(), 2);

        // Query near the first basis vector, scoped to r1: "first" must win.
        let hits = store.search(&unit_vector(0), 5, Some("r1")).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.text, "first");
        assert!(hits[0].1 > hits[1].1);

        let deleted = store.delete_room("r1").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_same_id_replaces() {
        let store = ShadowStore::open_in_memory("messages").await.unwrap();
        store.upsert(&record("a", "r1", "old"), &unit_vector(0)).await.unwrap();
        store.upsert(&record("a", "r1", "new"), &unit_vector(0)).await.unwrap();

        assert_eq!(store.count(None).await.unwrap(), 1);
        let hits = store.search(&unit_vector(0), 1, None).await.unwrap();
        assert_eq!(hits[0].0.text, "new");
    }

    #[tokio::test]
    async fn delete_ids_reports_rows() {
        let store = ShadowStore::open_in_memory("messages").await.unwrap();
        store.upsert(&record("a", "r1", "x"), &unit_vector(0)).await.unwrap();
        let deleted = store.delete_ids(&["a".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(deleted, 1);
    }
}
