//! pgvector (PostgreSQL) secondary vector store and relational document store.
//!
//! Provides [`PgVectorStore`], the fallback [`VectorStoreAdapter`], and
//! [`PgDocumentStore`], the [`DocumentStore`] over the authoritative
//! `documents` / `document_chunks` tables. Both use
//! [sqlx](https://docs.rs/sqlx) with the
//! [pgvector](https://github.com/pgvector/pgvector) extension.
//!
//! # Prerequisites
//!
//! - PostgreSQL with the `pgvector` extension installed
//! - [`PgVectorStore::initialize`] run once at startup
//!
//! # Example
//!
//! ```rust,ignore
//! use govcon_search::pgvector::{PgDocumentStore, PgVectorStore};
//!
//! let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
//! let store = PgVectorStore::new(pool.clone(), 1536);
//! store.initialize().await?;
//! let documents = PgDocumentStore::new(pool);
//! ```

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, info, warn};

use crate::docstore::DocumentStore;
use crate::document::{ChunkRecord, DocumentChunk};
use crate::error::{Result, SearchError};
use crate::filter::SearchFilters;
use crate::maintenance::{BackendStats, CleanupReport, HealthLevel, OptimizeReport};
use crate::namespace::Namespace;
use crate::vectorstore::{VectorMatch, VectorQuery, VectorStoreAdapter, sort_matches};

const BACKEND: &str = "pgvector";

fn map_err(e: sqlx::Error) -> SearchError {
    SearchError::VectorStoreError { backend: BACKEND.to_string(), message: e.to_string() }
}

fn map_doc_err(e: sqlx::Error) -> SearchError {
    SearchError::DocumentStoreError(e.to_string())
}

/// Restrict a table name to `[A-Za-z0-9_]`.
fn sanitize_identifier(name: &str) -> Result<String> {
    let sanitized: String =
        name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
    if sanitized.is_empty() || sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(SearchError::ConfigError(format!("invalid table name '{name}'")));
    }
    Ok(sanitized)
}

/// pgvector text literal, e.g. `[1,0.5,0]`.
fn vector_literal(vector: &[f32]) -> String {
    format!("[{}]", vector.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","))
}

/// A value bound to a numbered placeholder of a filter clause.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterBind {
    /// A single text value.
    Text(String),
    /// A text array, used with `= ANY` and `&&`.
    TextArray(Vec<String>),
    /// A timestamp.
    Timestamp(DateTime<Utc>),
}

/// A SQL `WHERE` fragment and the values for its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSql {
    /// Conditions joined with `AND`.
    pub clause: String,
    /// Values in placeholder order.
    pub binds: Vec<FilterBind>,
}

/// Translate typed filters into SQL with placeholders starting at
/// `$start_idx`. Column names are fixed, values are always bound.
pub fn build_filter_sql(filters: &SearchFilters, start_idx: usize) -> FilterSql {
    let mut conditions = Vec::new();
    let mut binds = Vec::new();
    let mut push = |template: &str, bind: FilterBind| {
        let idx = start_idx + binds.len();
        conditions.push(template.replace("{}", &format!("${idx}")));
        binds.push(bind);
    };

    push("organization_id = {}", FilterBind::Text(filters.organization_id.clone()));
    match filters.effective_document_ids() {
        Some(mut ids) if ids.len() == 1 => {
            push("document_id = {}", FilterBind::Text(ids.remove(0)));
        }
        Some(ids) => push("document_id = ANY({})", FilterBind::TextArray(ids)),
        None => {}
    }
    if !filters.document_types.is_empty() {
        push("document_type = ANY({})", FilterBind::TextArray(filters.document_types.clone()));
    }
    if !filters.naics_codes.is_empty() {
        push("naics_codes && {}", FilterBind::TextArray(filters.naics_codes.clone()));
    }
    if !filters.tags.is_empty() {
        push("tags && {}", FilterBind::TextArray(filters.tags.clone()));
    }
    if let Some(range) = &filters.date_range {
        if let Some(from) = range.from {
            push("published_at >= {}", FilterBind::Timestamp(from));
        }
        if let Some(to) = range.to {
            push("published_at <= {}", FilterBind::Timestamp(to));
        }
    }

    FilterSql { clause: conditions.join(" AND "), binds }
}

/// Nearest-neighbour query over `table`. `$1` is the query vector, `$2` the
/// minimum similarity and `$3` the limit; filter placeholders start at `$4`.
///
/// Ordering is by distance alone so the HNSW index can serve the scan; ties
/// are broken after the fetch.
fn search_sql(table: &str, filter_clause: &str) -> String {
    // <=> is cosine distance, so similarity = 1 - distance.
    format!(
        "SELECT id, document_id, document_title, chunk_index, content, metadata, \
                1 - (embedding <=> $1::vector) AS score \
         FROM {table} \
         WHERE {filter_clause} AND 1 - (embedding <=> $1::vector) >= $2 \
         ORDER BY embedding <=> $1::vector \
         LIMIT $3"
    )
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    binds: &'q [FilterBind],
) -> Query<'q, Postgres, PgArguments> {
    for bind in binds {
        query = match bind {
            FilterBind::Text(value) => query.bind(value),
            FilterBind::TextArray(values) => query.bind(values),
            FilterBind::Timestamp(at) => query.bind(at),
        };
    }
    query
}

/// A [`VectorStoreAdapter`] backed by PostgreSQL with the pgvector extension.
///
/// All organizations share one table with an `organization_id` column;
/// every query is restricted to the requesting organization. The full
/// chunk text is stored, so matches never carry previews.
pub struct PgVectorStore {
    pool: PgPool,
    dimensions: usize,
    table: String,
    documents_table: String,
}

impl PgVectorStore {
    /// Create a store using the `document_chunk_embeddings` table and the
    /// authoritative `documents` table.
    pub fn new(pool: PgPool, dimensions: usize) -> Self {
        Self {
            pool,
            dimensions,
            table: "document_chunk_embeddings".to_string(),
            documents_table: "documents".to_string(),
        }
    }

    /// Use a different embeddings table.
    pub fn with_table(mut self, table: &str) -> Result<Self> {
        self.table = sanitize_identifier(table)?;
        Ok(self)
    }

    /// Use a different authoritative documents table for orphan detection.
    pub fn with_documents_table(mut self, table: &str) -> Result<Self> {
        self.documents_table = sanitize_identifier(table)?;
        Ok(self)
    }

    fn index_name(&self) -> String {
        format!("{}_embedding_hnsw", self.table)
    }

    /// Create the extension, the embeddings table and its indexes.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        let table = &self.table;
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
                id TEXT PRIMARY KEY, \
                organization_id TEXT NOT NULL, \
                document_id TEXT NOT NULL, \
                document_title TEXT NOT NULL DEFAULT '', \
                chunk_index INTEGER NOT NULL, \
                content TEXT NOT NULL, \
                embedding vector({dims}) NOT NULL, \
                document_type TEXT, \
                naics_codes TEXT[] NOT NULL DEFAULT '{{}}', \
                tags TEXT[] NOT NULL DEFAULT '{{}}', \
                published_at TIMESTAMPTZ, \
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb\
            )",
            dims = self.dimensions
        );
        sqlx::query(&create_table).execute(&self.pool).await.map_err(map_err)?;

        let statements = [
            format!(
                "CREATE INDEX IF NOT EXISTS {index} ON {table} \
                 USING hnsw (embedding vector_cosine_ops) WITH (m = 16, ef_construction = 64)",
                index = self.index_name()
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {table}_org_doc_idx ON {table} (organization_id, document_id)"
            ),
            format!("CREATE INDEX IF NOT EXISTS {table}_naics_idx ON {table} USING gin (naics_codes)"),
            format!("CREATE INDEX IF NOT EXISTS {table}_tags_idx ON {table} USING gin (tags)"),
        ];
        for statement in &statements {
            sqlx::query(statement).execute(&self.pool).await.map_err(map_err)?;
        }

        info!(table = %self.table, dimensions = self.dimensions, "pgvector store initialized");
        Ok(())
    }

    fn to_match(row: &PgRow) -> Result<VectorMatch> {
        let chunk_index: i32 = row.try_get("chunk_index").map_err(map_err)?;
        let score: f64 = row.try_get("score").map_err(map_err)?;
        let metadata: serde_json::Value = row.try_get("metadata").map_err(map_err)?;
        let metadata: HashMap<String, serde_json::Value> = match metadata {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        Ok(VectorMatch {
            chunk_id: row.try_get("id").map_err(map_err)?,
            document_id: row.try_get("document_id").map_err(map_err)?,
            document_title: row.try_get("document_title").map_err(map_err)?,
            chunk_index: u32::try_from(chunk_index).unwrap_or(0),
            text: row.try_get("content").map_err(map_err)?,
            text_is_preview: false,
            score: (score as f32).clamp(0.0, 1.0),
            metadata,
        })
    }
}

#[async_trait]
impl VectorStoreAdapter for PgVectorStore {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn create_namespace(&self, namespace: &Namespace, _dimensions: usize) -> Result<()> {
        // One shared table; namespaces are an organization_id predicate.
        debug!(namespace = %namespace.name, "pgvector uses a shared table, nothing to create");
        Ok(())
    }

    async fn upsert(&self, namespace: &Namespace, records: &[ChunkRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(record) = records.iter().find(|r| r.organization_id != namespace.organization_id)
        {
            return Err(SearchError::VectorStoreError {
                backend: BACKEND.to_string(),
                message: format!(
                    "record '{}' belongs to '{}', not '{}'",
                    record.id, record.organization_id, namespace.organization_id
                ),
            });
        }

        let upsert_sql = format!(
            "INSERT INTO {} (id, organization_id, document_id, document_title, chunk_index, content, \
                             embedding, document_type, naics_codes, tags, published_at, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7::vector, $8, $9, $10, $11, $12::jsonb) \
             ON CONFLICT (id) DO UPDATE SET \
                organization_id = EXCLUDED.organization_id, \
                document_id = EXCLUDED.document_id, \
                document_title = EXCLUDED.document_title, \
                chunk_index = EXCLUDED.chunk_index, \
                content = EXCLUDED.content, \
                embedding = EXCLUDED.embedding, \
                document_type = EXCLUDED.document_type, \
                naics_codes = EXCLUDED.naics_codes, \
                tags = EXCLUDED.tags, \
                published_at = EXCLUDED.published_at, \
                metadata = EXCLUDED.metadata",
            self.table
        );

        let mut tx = self.pool.begin().await.map_err(map_err)?;
        for record in records {
            let metadata_json =
                serde_json::to_string(&record.metadata).unwrap_or_else(|_| "{}".to_string());
            sqlx::query(&upsert_sql)
                .bind(&record.id)
                .bind(&record.organization_id)
                .bind(&record.document_id)
                .bind(&record.document_title)
                .bind(i32::try_from(record.chunk_index).unwrap_or(i32::MAX))
                .bind(&record.text)
                .bind(vector_literal(&record.embedding))
                .bind(&record.document_type)
                .bind(&record.naics_codes)
                .bind(&record.tags)
                .bind(record.published_at)
                .bind(metadata_json)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
        }
        tx.commit().await.map_err(map_err)?;

        debug!(organization_id = %namespace.organization_id, count = records.len(), "upserted chunks to pgvector");
        Ok(())
    }

    async fn delete(&self, namespace: &Namespace, ids: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let delete_sql =
            format!("DELETE FROM {} WHERE organization_id = $1 AND id = ANY($2)", self.table);
        let id_vec: Vec<String> = ids.iter().map(|s| s.to_string()).collect();

        sqlx::query(&delete_sql)
            .bind(&namespace.organization_id)
            .bind(&id_vec)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        debug!(organization_id = %namespace.organization_id, count = ids.len(), "deleted chunks from pgvector");
        Ok(())
    }

    async fn query(&self, _namespace: &Namespace, query: &VectorQuery<'_>) -> Result<Vec<VectorMatch>> {
        let filter = build_filter_sql(query.filters, 4);

        let statement = search_sql(&self.table, &filter.clause);
        let sql = sqlx::query(&statement)
            .bind(vector_literal(query.vector))
            .bind(f64::from(query.min_score))
            .bind(i64::try_from(query.top_k).unwrap_or(i64::MAX));
        let rows = bind_all(sql, &filter.binds).fetch_all(&self.pool).await.map_err(map_err)?;

        let mut matches = rows.iter().map(Self::to_match).collect::<Result<Vec<_>>>()?;
        matches.retain(|m| m.score >= query.min_score);
        sort_matches(&mut matches);
        Ok(matches)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(map_err)?;
        Ok(())
    }

    async fn stats(&self, _documents: &dyn DocumentStore) -> Result<BackendStats> {
        let sql = format!(
            "SELECT COUNT(*) AS total, \
                    COUNT(DISTINCT c.organization_id) AS organizations, \
                    COUNT(DISTINCT c.document_id) AS documents, \
                    COUNT(*) FILTER (WHERE d.id IS NULL) AS orphans \
             FROM {} c LEFT JOIN {} d ON d.id = c.document_id",
            self.table, self.documents_table
        );
        let row = sqlx::query(&sql).fetch_one(&self.pool).await.map_err(map_err)?;
        let count = |column: &str| -> Result<u64> {
            let value: i64 = row.try_get(column).map_err(map_err)?;
            Ok(u64::try_from(value).unwrap_or(0))
        };
        let total_vectors = count("total")?;
        let orphaned_vectors = count("orphans")?;

        Ok(BackendStats {
            backend: BACKEND.to_string(),
            available: true,
            total_vectors,
            organizations: count("organizations")?,
            documents: count("documents")?,
            orphaned_vectors,
            health: HealthLevel::from_orphans(orphaned_vectors, total_vectors),
        })
    }

    async fn cleanup_orphans(&self, _documents: &dyn DocumentStore) -> Result<CleanupReport> {
        let scanned_sql = format!("SELECT COUNT(DISTINCT document_id) AS documents FROM {}", self.table);
        let scanned: i64 = sqlx::query(&scanned_sql)
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get("documents"))
            .map_err(map_err)?;

        // Set difference against the authoritative table in one statement.
        let delete_sql = format!(
            "WITH removed AS (\
                DELETE FROM {table} c \
                WHERE NOT EXISTS (SELECT 1 FROM {docs} d WHERE d.id = c.document_id) \
                RETURNING c.document_id\
             ) \
             SELECT COUNT(*) AS vectors, COUNT(DISTINCT document_id) AS documents FROM removed",
            table = self.table,
            docs = self.documents_table
        );
        let row = sqlx::query(&delete_sql).fetch_one(&self.pool).await.map_err(map_err)?;
        let vectors: i64 = row.try_get("vectors").map_err(map_err)?;
        let documents: i64 = row.try_get("documents").map_err(map_err)?;

        debug!(removed_vectors = vectors, orphaned_documents = documents, "pgvector orphan sweep finished");
        Ok(CleanupReport {
            backend: BACKEND.to_string(),
            scanned_documents: u64::try_from(scanned).unwrap_or(0),
            orphaned_documents: u64::try_from(documents).unwrap_or(0),
            removed_vectors: u64::try_from(vectors).unwrap_or(0),
            failed_documents: Vec::new(),
        })
    }

    async fn optimize(&self) -> Result<OptimizeReport> {
        let mut report = OptimizeReport {
            backend: BACKEND.to_string(),
            actions: Vec::new(),
            recommendations: Vec::new(),
            errors: Vec::new(),
        };

        for statement in [format!("REINDEX INDEX {}", self.index_name()), format!("ANALYZE {}", self.table)]
        {
            match sqlx::query(&statement).execute(&self.pool).await {
                Ok(_) => report.actions.push(statement),
                Err(e) => {
                    warn!(statement = %statement, error = %e, "pgvector optimize step failed");
                    report.errors.push(format!("{statement}: {e}"));
                }
            }
        }
        if !report.errors.is_empty() {
            report
                .recommendations
                .push(format!("run {} initialize before optimizing", self.table));
        }
        Ok(report)
    }
}

/// A [`DocumentStore`] over the authoritative PostgreSQL tables.
///
/// Expects `documents (id TEXT PRIMARY KEY, ...)` and
/// `document_chunks (document_id TEXT, chunk_index INTEGER, content TEXT)`.
pub struct PgDocumentStore {
    pool: PgPool,
    documents_table: String,
    chunks_table: String,
}

impl PgDocumentStore {
    /// Create a store over the default `documents` and `document_chunks` tables.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            documents_table: "documents".to_string(),
            chunks_table: "document_chunks".to_string(),
        }
    }

    /// Use different table names.
    pub fn with_tables(mut self, documents: &str, chunks: &str) -> Result<Self> {
        self.documents_table = sanitize_identifier(documents)?;
        self.chunks_table = sanitize_identifier(chunks)?;
        Ok(self)
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get_document_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let sql = format!(
            "SELECT chunk_index, content FROM {} WHERE document_id = $1 ORDER BY chunk_index",
            self.chunks_table
        );
        let rows = sqlx::query(&sql)
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_doc_err)?;

        rows.iter()
            .map(|row| {
                let chunk_index: i32 = row.try_get("chunk_index").map_err(map_doc_err)?;
                Ok(DocumentChunk {
                    chunk_index: u32::try_from(chunk_index).unwrap_or(0),
                    content: row.try_get("content").map_err(map_doc_err)?,
                })
            })
            .collect()
    }

    async fn existing_document_ids(&self, document_ids: &[String]) -> Result<HashSet<String>> {
        if document_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let sql = format!("SELECT id FROM {} WHERE id = ANY($1)", self.documents_table);
        let rows = sqlx::query(&sql)
            .bind(document_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_doc_err)?;
        rows.iter().map(|row| row.try_get::<String, _>("id").map_err(map_doc_err)).collect()
    }
}
