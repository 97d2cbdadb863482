/// Vector store backed by PostgreSQL + pgvector
///
/// The database owns indexing and similarity ranking; this module only
/// creates the table, writes chunks and asks for the nearest ones.

use anyhow::{Context, Result};
use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{PgPool, Row};

use crate::config::Config;

/// Source of the book passages closest to a query embedding
#[async_trait]
pub trait ChunkRetriever: Send + Sync {
    async fn nearest_chunks(&self, embedding: Vec<f32>, k: usize) -> Result<Vec<String>>;
}

/// HNSW needs no training data, so it can be built before the first insert
fn create_index_sql(table: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {}_embedding_hnsw_idx ON {} USING hnsw (embedding vector_cosine_ops)",
        table, table
    )
}

pub struct VectorStore {
    db_pool: PgPool,
    table: String,
    dimension: usize,
}

impl VectorStore {
    /// Connect to the database holding the book embeddings
    pub async fn connect(config: &Config, dimension: usize) -> Result<Self> {
        let database_url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set")?;

        // Check if using connection pooler (pgBouncer)
        let use_pooler = database_url.contains(":6543") || database_url.contains("pgbouncer=true");

        let mut pool_options = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10);

        if use_pooler {
            log::info!("Using connection pooler - disabling statement timeout");
            pool_options = pool_options.after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("SET statement_timeout = 0")
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            });
        }

        let db_pool = pool_options
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            db_pool,
            table: config.embeddings_table.clone(),
            dimension,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the pgvector extension, table and index if they don't exist
    pub async fn initialize_collection(&self) -> Result<()> {
        log::info!("Initializing table {}...", self.table);

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.db_pool)
            .await
            .context("Failed to create vector extension")?;

        let create_table_query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                embedding vector({}),
                metadata JSONB,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            self.table, self.dimension
        );

        sqlx::query(&create_table_query)
            .execute(&self.db_pool)
            .await
            .context("Failed to create embeddings table")?;

        // ivfflat index from earlier versions, built on an empty table
        sqlx::query(&format!("DROP INDEX IF EXISTS {}_embedding_idx", self.table))
            .execute(&self.db_pool)
            .await
            .context("Failed to drop old vector index")?;

        sqlx::query(&create_index_sql(&self.table))
            .execute(&self.db_pool)
            .await
            .context("Failed to create vector index")?;

        log::info!("Table {} initialized successfully", self.table);
        Ok(())
    }

    /// Remove every stored chunk
    pub async fn reset(&self) -> Result<u64> {
        let result = sqlx::query(&format!("DELETE FROM {}", self.table))
            .execute(&self.db_pool)
            .await
            .context("Failed to clear embeddings table")?;

        log::info!("Removed {} chunks from {}", result.rows_affected(), self.table);
        Ok(result.rows_affected())
    }

    /// Insert a chunk, replacing any earlier version with the same id
    pub async fn upsert_chunk(
        &self,
        id: &str,
        content: &str,
        embedding: Vec<f32>,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let insert_query = format!(
            r#"
            INSERT INTO {} (id, content, embedding, metadata)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET content = $2, embedding = $3, metadata = $4
            "#,
            self.table
        );

        sqlx::query(&insert_query)
            .bind(id)
            .bind(content)
            .bind(Vector::from(embedding))
            .bind(metadata)
            .execute(&self.db_pool)
            .await
            .with_context(|| format!("Failed to insert chunk {}", id))?;

        Ok(())
    }

    /// Contents of the `k` chunks closest to `embedding` by cosine distance
    pub async fn similarity_search(&self, embedding: Vec<f32>, k: usize) -> Result<Vec<String>> {
        let search_query = format!(
            r#"
            SELECT content
            FROM {}
            ORDER BY embedding <=> $1
            LIMIT $2
            "#,
            self.table
        );

        let rows = sqlx::query(&search_query)
            .bind(Vector::from(embedding))
            .bind(k as i64)
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to search for similar vectors")?;

        let chunks: Vec<String> = rows
            .into_iter()
            .map(|row| row.get::<String, _>("content"))
            .collect();

        log::debug!("Retrieved {} relevant chunks", chunks.len());
        Ok(chunks)
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS total FROM {}", self.table))
            .fetch_one(&self.db_pool)
            .await
            .context("Failed to count stored chunks")?;

        Ok(row.get::<i64, _>("total"))
    }

    /// True when the table exists and holds at least one chunk
    pub async fn is_populated(&self) -> Result<bool> {
        let row = sqlx::query("SELECT to_regclass($1)::text AS name")
            .bind(&self.table)
            .fetch_one(&self.db_pool)
            .await
            .context("Failed to look up embeddings table")?;

        if row.get::<Option<String>, _>("name").is_none() {
            return Ok(false);
        }

        Ok(self.count().await? > 0)
    }
}

#[async_trait]
impl ChunkRetriever for VectorStore {
    async fn nearest_chunks(&self, embedding: Vec<f32>, k: usize) -> Result<Vec<String>> {
        self.similarity_search(embedding, k).await
    }
}
