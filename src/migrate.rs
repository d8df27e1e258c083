use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema used by [`SqliteStore`](crate::store::SqliteStore).
/// Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Content side: one row per index entry, its chunks, and the
    // per-project knowledge-base aggregate.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_entries (
            index_id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            content_id TEXT NOT NULL,
            content_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            metadata_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            index_id TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            chunk_number INTEGER NOT NULL,
            start_index INTEGER NOT NULL,
            end_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL,
            PRIMARY KEY (index_id, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_bases (
            project_id TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            last_updated INTEGER NOT NULL,
            kb_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector side: kept apart from the content tables so either can be
    // rebuilt alone.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_entries (
            index_id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            metadata_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            index_id TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (index_id, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_index_entries_project ON index_entries(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_index_id ON chunks(index_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vector_entries_project ON vector_entries(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_vectors_index_id ON chunk_vectors(index_id)")
        .execute(pool)
        .await?;

    Ok(())
}
