//! SQLite-backed [`VectorStore`] and [`ContentStore`].
//!
//! Vectors are little-endian `f32` BLOBs (see
//! [`vec_to_blob`](crate::embedding::vec_to_blob)); metadata is stored as
//! JSON next to the few columns queries filter on. Vector search loads the
//! candidate rows of the project (or all rows without a project filter) and
//! ranks them by brute-force cosine similarity.
//!
//! Call [`run_migrations`](crate::migrate::run_migrations) on the pool
//! before use.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::{rank_hits, ContentStore, VectorHit, VectorStore};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Chunk, ChunkMetadata, ContentMetadata, IndexEntry, KnowledgeBase, SearchFilters};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn store(
        &self,
        index_id: &str,
        chunks: &[Chunk],
        metadata: &ContentMetadata,
    ) -> Result<()> {
        let metadata_json = serde_json::to_string(metadata)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_vectors WHERE index_id = ?")
            .bind(index_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO vector_entries (index_id, project_id, metadata_json)
            VALUES (?, ?, ?)
            ON CONFLICT(index_id) DO UPDATE SET
                project_id = excluded.project_id,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(index_id)
        .bind(&metadata.project_id)
        .bind(&metadata_json)
        .execute(&mut *tx)
        .await?;

        for chunk in chunks {
            let Some(vector) = &chunk.embedding else {
                continue;
            };
            sqlx::query(
                "INSERT INTO chunk_vectors (index_id, chunk_id, content, embedding) VALUES (?, ?, ?, ?)",
            )
            .bind(index_id)
            .bind(&chunk.id)
            .bind(&chunk.text)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        threshold: f32,
        filters: &SearchFilters,
    ) -> Result<Vec<VectorHit>> {
        let rows = sqlx::query(
            r#"
            SELECT cv.index_id, cv.chunk_id, cv.content, cv.embedding, ve.metadata_json
            FROM chunk_vectors cv
            JOIN vector_entries ve ON ve.index_id = cv.index_id
            WHERE ?1 IS NULL OR ve.project_id = ?1
            "#,
        )
        .bind(filters.project_id.as_deref())
        .fetch_all(&self.pool)
        .await?;

        // Filter verdicts per entry; each entry's metadata is parsed once.
        let mut allowed: HashMap<String, bool> = HashMap::new();
        let mut hits = Vec::new();
        for row in &rows {
            let index_id: String = row.get("index_id");
            let keep = match allowed.get(&index_id) {
                Some(keep) => *keep,
                None => {
                    let metadata_json: String = row.get("metadata_json");
                    let keep = serde_json::from_str::<ContentMetadata>(&metadata_json)
                        .map(|m| filters.matches(&m))
                        .unwrap_or(false);
                    allowed.insert(index_id.clone(), keep);
                    keep
                }
            };
            if !keep {
                continue;
            }

            let blob: Vec<u8> = row.get("embedding");
            hits.push(VectorHit {
                index_id,
                chunk_id: row.get("chunk_id"),
                content: row.get("content"),
                score: cosine_similarity(embedding, &blob_to_vec(&blob)),
            });
        }

        Ok(rank_hits(hits, top_k, threshold))
    }

    async fn remove(&self, index_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunk_vectors WHERE index_id = ?")
            .bind(index_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM vector_entries WHERE index_id = ?")
            .bind(index_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn save_entry(&self, entry: &IndexEntry) -> Result<()> {
        let metadata = &entry.metadata;
        let metadata_json = serde_json::to_string(metadata)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE index_id = ?")
            .bind(&entry.index_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO index_entries (index_id, project_id, content_id, content_type, created_at, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(index_id) DO UPDATE SET
                project_id = excluded.project_id,
                content_id = excluded.content_id,
                content_type = excluded.content_type,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(&entry.index_id)
        .bind(&metadata.project_id)
        .bind(&metadata.id)
        .bind(metadata.content_type.as_str())
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(&metadata_json)
        .execute(&mut *tx)
        .await?;

        for chunk in &entry.chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (index_id, chunk_id, chunk_number, start_index, end_index, text, metadata_json)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.index_id)
            .bind(&chunk.id)
            .bind(chunk.metadata.chunk_number as i64)
            .bind(chunk.start_index as i64)
            .bind(chunk.end_index as i64)
            .bind(&chunk.text)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_metadata(&self, index_id: &str) -> Result<Option<ContentMetadata>> {
        let row = sqlx::query("SELECT metadata_json FROM index_entries WHERE index_id = ?")
            .bind(index_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("metadata_json");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn get_chunks(&self, index_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, start_index, end_index, text, metadata_json
            FROM chunks
            WHERE index_id = ?
            ORDER BY chunk_number ASC
            "#,
        )
        .bind(index_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Chunk> {
                let metadata_json: String = row.get("metadata_json");
                let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)?;
                Ok(Chunk {
                    id: row.get("chunk_id"),
                    text: row.get("text"),
                    start_index: row.get::<i64, _>("start_index") as usize,
                    end_index: row.get::<i64, _>("end_index") as usize,
                    embedding: None,
                    metadata,
                })
            })
            .collect()
    }

    async fn delete_entry(&self, index_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE index_id = ?")
            .bind(index_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_entries WHERE index_id = ?")
            .bind(index_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_entries(&self, project_id: &str) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT index_id, metadata_json
            FROM index_entries
            WHERE project_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let index_id: String = row.get("index_id");
            let metadata_json: String = row.get("metadata_json");
            let chunks = self.get_chunks(&index_id).await?;
            entries.push(IndexEntry {
                index_id,
                metadata: serde_json::from_str(&metadata_json)?,
                chunks,
            });
        }
        Ok(entries)
    }

    async fn save_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_bases (project_id, version, last_updated, kb_json)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id) DO UPDATE SET
                version = excluded.version,
                last_updated = excluded.last_updated,
                kb_json = excluded.kb_json
            "#,
        )
        .bind(&kb.project_id)
        .bind(kb.version as i64)
        .bind(kb.last_updated.timestamp())
        .bind(serde_json::to_string(kb)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_knowledge_base(&self, project_id: &str) -> Result<Option<KnowledgeBase>> {
        let row = sqlx::query("SELECT kb_json FROM knowledge_bases WHERE project_id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("kb_json");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }
}
