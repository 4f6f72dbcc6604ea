//! In-memory vector store using cosine similarity.
//!
//! This module provides [`InMemoryVectorStore`], a dependency-free
//! [`VectorStoreAdapter`] backed by a `HashMap` protected by a
//! `tokio::sync::RwLock`. It is suitable for development, testing, and
//! small-scale use cases, and implements the same filter, threshold and
//! maintenance semantics as the networked backends.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::docstore::{DocumentStore, missing_documents};
use crate::document::ChunkRecord;
use crate::error::{Result, SearchError};
use crate::maintenance::{BackendStats, CleanupReport, HealthLevel, OptimizeReport};
use crate::namespace::Namespace;
use crate::vectorstore::{VectorMatch, VectorQuery, VectorStoreAdapter, preview, sort_matches};

/// An in-memory vector store using cosine similarity for search.
///
/// Namespaces are stored as nested `HashMap`s: namespace name → chunk ID → record.
/// All operations are async-safe via `tokio::sync::RwLock`.
///
/// With [`with_previews`](Self::with_previews) the store keeps only a text
/// preview per chunk, like a managed index would.
///
/// # Example
///
/// ```rust,ignore
/// use govcon_search::{InMemoryVectorStore, Namespace, VectorStoreAdapter};
///
/// let store = InMemoryVectorStore::new();
/// store.create_namespace(&Namespace::for_organization("org", "acme"), 384).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    name: Option<String>,
    store_previews: bool,
    namespaces: RwLock<HashMap<String, HashMap<String, ChunkRecord>>>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store reporting `name` as its backend name.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..Self::default() }
    }

    /// Keep only a preview of each chunk's text.
    pub fn with_previews(mut self) -> Self {
        self.store_previews = true;
        self
    }

    /// Total number of stored vectors across all namespaces.
    pub async fn len(&self) -> usize {
        self.namespaces.read().await.values().map(HashMap::len).sum()
    }

    /// Whether the store holds no vectors.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Vector counts per document, for each namespace.
    async fn namespace_document_counts(&self) -> Vec<(String, HashMap<String, u64>)> {
        let namespaces = self.namespaces.read().await;
        namespaces
            .iter()
            .map(|(name, records)| {
                let mut counts = HashMap::new();
                for record in records.values() {
                    *counts.entry(record.document_id.clone()).or_insert(0) += 1;
                }
                (name.clone(), counts)
            })
            .collect()
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStoreAdapter for InMemoryVectorStore {
    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("in-memory")
    }

    async fn create_namespace(&self, namespace: &Namespace, _dimensions: usize) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        namespaces.entry(namespace.name.clone()).or_default();
        Ok(())
    }

    async fn upsert(&self, namespace: &Namespace, records: &[ChunkRecord]) -> Result<()> {
        if let Some(record) = records.iter().find(|r| r.organization_id != namespace.organization_id)
        {
            return Err(SearchError::VectorStoreError {
                backend: self.name().to_string(),
                message: format!(
                    "record '{}' belongs to '{}', not namespace '{}'",
                    record.id, record.organization_id, namespace.name
                ),
            });
        }

        let mut namespaces = self.namespaces.write().await;
        let store = namespaces.entry(namespace.name.clone()).or_default();
        for record in records {
            store.insert(record.id.clone(), record.clone());
        }
        debug!(namespace = %namespace.name, count = records.len(), "upserted records in memory");
        Ok(())
    }

    async fn delete(&self, namespace: &Namespace, ids: &[&str]) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        if let Some(store) = namespaces.get_mut(&namespace.name) {
            for id in ids {
                store.remove(*id);
            }
        }
        Ok(())
    }

    async fn query(&self, namespace: &Namespace, query: &VectorQuery<'_>) -> Result<Vec<VectorMatch>> {
        let namespaces = self.namespaces.read().await;
        let Some(store) = namespaces.get(&namespace.name) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<VectorMatch> = store
            .values()
            .filter(|record| query.filters.matches(record))
            .filter_map(|record| {
                let score = cosine_similarity(&record.embedding, query.vector).clamp(0.0, 1.0);
                if score < query.min_score {
                    return None;
                }
                let (text, text_is_preview) = if self.store_previews {
                    preview(&record.text)
                } else {
                    (record.text.clone(), false)
                };
                Some(VectorMatch {
                    chunk_id: record.id.clone(),
                    document_id: record.document_id.clone(),
                    document_title: record.document_title.clone(),
                    chunk_index: record.chunk_index,
                    text,
                    text_is_preview,
                    score,
                    metadata: record.metadata.clone(),
                })
            })
            .collect();

        sort_matches(&mut matches);
        matches.truncate(query.top_k);
        Ok(matches)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn stats(&self, documents: &dyn DocumentStore) -> Result<BackendStats> {
        let mut total_vectors = 0u64;
        let mut orphaned_vectors = 0u64;
        let mut document_ids = HashSet::new();

        for (name, counts) in self.namespace_document_counts().await {
            total_vectors += counts.values().sum::<u64>();
            let ids: Vec<String> = counts.keys().cloned().collect();
            match missing_documents(documents, &ids, ids.len()).await {
                Ok(missing) => {
                    orphaned_vectors += missing.iter().filter_map(|id| counts.get(id)).sum::<u64>();
                }
                Err(e) => warn!(namespace = %name, error = %e, "orphan check skipped"),
            }
            document_ids.extend(ids);
        }

        let namespaces = self.namespaces.read().await;
        let organizations: HashSet<&str> = namespaces
            .values()
            .flat_map(HashMap::values)
            .map(|r| r.organization_id.as_str())
            .collect();

        Ok(BackendStats {
            backend: self.name().to_string(),
            available: true,
            total_vectors,
            organizations: organizations.len() as u64,
            documents: document_ids.len() as u64,
            orphaned_vectors,
            health: HealthLevel::from_orphans(orphaned_vectors, total_vectors),
        })
    }

    async fn cleanup_orphans(&self, documents: &dyn DocumentStore) -> Result<CleanupReport> {
        let mut report = CleanupReport {
            backend: self.name().to_string(),
            scanned_documents: 0,
            orphaned_documents: 0,
            removed_vectors: 0,
            failed_documents: Vec::new(),
        };

        for (name, counts) in self.namespace_document_counts().await {
            report.scanned_documents += counts.len() as u64;
            let ids: Vec<String> = counts.into_keys().collect();
            let missing = match missing_documents(documents, &ids, ids.len()).await {
                Ok(missing) => missing,
                Err(e) => {
                    warn!(namespace = %name, error = %e, "document lookup failed");
                    report.failed_documents.push(format!("{name}: {e}"));
                    continue;
                }
            };
            if missing.is_empty() {
                continue;
            }
            report.orphaned_documents += missing.len() as u64;
            let missing: HashSet<String> = missing.into_iter().collect();

            let mut namespaces = self.namespaces.write().await;
            if let Some(records) = namespaces.get_mut(&name) {
                let before = records.len();
                records.retain(|_, record| !missing.contains(&record.document_id));
                report.removed_vectors += (before - records.len()) as u64;
            }
        }

        debug!(removed_vectors = report.removed_vectors, "in-memory orphan sweep finished");
        Ok(report)
    }

    async fn optimize(&self) -> Result<OptimizeReport> {
        Ok(OptimizeReport {
            backend: self.name().to_string(),
            actions: Vec::new(),
            recommendations: vec!["in-memory store scans every vector; nothing to optimize".into()],
            errors: Vec::new(),
        })
    }
}
