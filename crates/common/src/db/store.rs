//! Primary store retrieval calls
//!
//! Similarity search goes through sqlx with a typed `pgvector::Vector` bind;
//! text search uses a SeaORM raw statement over `to_tsvector('simple', ..)`
//! with an `ILIKE` fallback so short or non-Latin queries still match.

use super::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Row returned by similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRow {
    pub id: String,
    pub content: String,
    pub category: Option<String>,
    pub similarity: f32,
}

/// Row returned by text search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRow {
    pub id: String,
    pub content: String,
    pub category: Option<String>,
    /// Full-text rank, absent when the row only matched the substring scan
    pub rank: Option<f32>,
}

/// Async client over the primary persistent store
#[async_trait]
pub trait RetrievalStore: Send + Sync {
    /// Rows whose cosine similarity to `embedding` is at least `threshold`,
    /// optionally restricted to one category
    async fn similarity_search(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<VectorRow>>;

    /// Keyword search, optionally restricted to one category
    async fn text_search(
        &self,
        query: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<TextRow>>;

    /// Connectivity probe
    async fn ping(&self) -> Result<()>;
}

/// PostgreSQL + pgvector implementation
pub struct PgRetrievalStore {
    pool: DbPool,
    table: String,
}

impl PgRetrievalStore {
    /// Wrap a pool; the table name is interpolated into SQL so it is checked here
    pub fn new(pool: DbPool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            return Err(AppError::Configuration {
                message: format!("Invalid documents table name: {:?}", table),
            });
        }
        Ok(Self { pool, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

/// `name` or `schema.name`, each part an SQL identifier
fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return false;
    }
    parts.iter().all(|part| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

#[async_trait]
impl RetrievalStore for PgRetrievalStore {
    #[instrument(skip(self, embedding), fields(dim = embedding.len()))]
    async fn similarity_search(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<VectorRow>> {
        let category_filter = category.map(|_| "AND category = $4").unwrap_or("");

        let sql = format!(
            r#"
            SELECT id::text AS id,
                   content,
                   category,
                   (1 - (embedding <=> $1))::float8 AS similarity
            FROM {table}
            WHERE embedding IS NOT NULL
              AND 1 - (embedding <=> $1) >= $2
            {category_filter}
            ORDER BY embedding <=> $1
            LIMIT $3
            "#,
            table = self.table,
            category_filter = category_filter
        );

        let vector = pgvector::Vector::from(embedding.to_vec());
        let mut query = sqlx::query_as::<_, (String, String, Option<String>, f64)>(&sql)
            .bind(vector)
            .bind(threshold as f64)
            .bind(limit as i64);
        if let Some(cat) = category {
            query = query.bind(cat);
        }
        let rows = query
            .fetch_all(self.pool.read().get_postgres_connection_pool())
            .await?;

        debug!(rows = rows.len(), "Similarity search completed");

        Ok(rows
            .into_iter()
            .map(|(id, content, category, similarity)| VectorRow {
                id,
                content,
                category,
                similarity: similarity as f32,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn text_search(
        &self,
        query: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<TextRow>> {
        let category_filter = category.map(|_| "AND category = $3").unwrap_or("");

        let sql = format!(
            r#"
            SELECT id::text AS id,
                   content,
                   category,
                   CASE WHEN to_tsvector('simple', content) @@ plainto_tsquery('simple', $1)
                        THEN ts_rank(to_tsvector('simple', content), plainto_tsquery('simple', $1))::float4
                        ELSE NULL
                   END AS rank
            FROM {table}
            WHERE (to_tsvector('simple', content) @@ plainto_tsquery('simple', $1)
                   OR content ILIKE '%' || $1 || '%')
            {category_filter}
            ORDER BY rank DESC NULLS LAST
            LIMIT $2
            "#,
            table = self.table,
            category_filter = category_filter
        );

        let mut values: Vec<sea_orm::Value> = vec![query.into(), (limit as i64).into()];
        if let Some(cat) = category {
            values.push(cat.into());
        }

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, values);
        let results = self.pool.read().query_all(stmt).await?;

        let rows = results
            .into_iter()
            .map(|row| {
                Ok(TextRow {
                    id: row.try_get("", "id")?,
                    content: row.try_get("", "content")?,
                    category: row.try_get("", "category")?,
                    rank: row.try_get("", "rank")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sea_orm::DbErr>>()?;

        debug!(rows = rows.len(), "Text search completed");
        Ok(rows)
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_validation() {
        assert!(is_valid_table_name("command_documents"));
        assert!(is_valid_table_name("ops.command_documents"));
        assert!(is_valid_table_name("_docs2"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("2docs"));
        assert!(!is_valid_table_name("docs; DROP TABLE x"));
        assert!(!is_valid_table_name("a.b.c"));
        assert!(!is_valid_table_name("docs."));
    }
}
