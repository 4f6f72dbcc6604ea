//! Access to the authoritative document store.
//!
//! The relational database that owns documents and their chunks is an
//! external collaborator. Search only needs two things from it: the full
//! text of a document's chunks (indexes keep a preview) and which document
//! IDs still exist (for orphan detection).

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::DocumentChunk;
use crate::error::Result;

/// The source of truth for documents and their chunk text.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Return the chunks of a document ordered by `chunk_index`.
    ///
    /// An unknown document yields an empty list rather than an error.
    async fn get_document_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>>;

    /// Return the subset of `document_ids` that still exist.
    async fn existing_document_ids(&self, document_ids: &[String]) -> Result<HashSet<String>>;
}

/// A [`DocumentStore`] held in memory. Suitable for tests and local development.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, Vec<DocumentChunk>>>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document's chunks.
    pub async fn insert_document(&self, document_id: impl Into<String>, chunks: Vec<DocumentChunk>) {
        let mut chunks = chunks;
        chunks.sort_by_key(|c| c.chunk_index);
        self.documents.write().await.insert(document_id.into(), chunks);
    }

    /// Remove a document. Returns whether it existed.
    pub async fn remove_document(&self, document_id: &str) -> bool {
        self.documents.write().await.remove(document_id).is_some()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        Ok(self.documents.read().await.get(document_id).cloned().unwrap_or_default())
    }

    async fn existing_document_ids(&self, document_ids: &[String]) -> Result<HashSet<String>> {
        let documents = self.documents.read().await;
        Ok(document_ids.iter().filter(|id| documents.contains_key(*id)).cloned().collect())
    }
}

/// The IDs in `document_ids` the store no longer has, looked up
/// `batch_size` IDs at a time.
pub async fn missing_documents(
    documents: &dyn DocumentStore,
    document_ids: &[String],
    batch_size: usize,
) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for batch in document_ids.chunks(batch_size.max(1)) {
        let existing = documents.existing_document_ids(batch).await?;
        missing.extend(batch.iter().filter(|id| !existing.contains(*id)).cloned());
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunks_come_back_in_index_order() {
        let store = InMemoryDocumentStore::new();
        store
            .insert_document(
                "doc-1",
                vec![
                    DocumentChunk { chunk_index: 1, content: "second".into() },
                    DocumentChunk { chunk_index: 0, content: "first".into() },
                ],
            )
            .await;

        let chunks = store.get_document_chunks("doc-1").await.unwrap();
        assert_eq!(chunks[0].content, "first");
        assert!(store.get_document_chunks("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reports_which_documents_exist() {
        let store = InMemoryDocumentStore::new();
        store.insert_document("doc-1", Vec::new()).await;

        let existing = store
            .existing_document_ids(&["doc-1".to_string(), "doc-2".to_string()])
            .await
            .unwrap();
        assert_eq!(existing, HashSet::from(["doc-1".to_string()]));

        assert!(store.remove_document("doc-1").await);
        assert!(!store.remove_document("doc-1").await);
    }

    #[tokio::test]
    async fn missing_documents_checks_every_batch() {
        let store = InMemoryDocumentStore::new();
        store.insert_document("doc-2", Vec::new()).await;
        let ids: Vec<String> = ["doc-1", "doc-2", "doc-3"].map(String::from).to_vec();

        let missing = missing_documents(&store, &ids, 2).await.unwrap();
        assert_eq!(missing, ["doc-1", "doc-3"]);
        assert_eq!(missing_documents(&store, &ids, 0).await.unwrap().len(), 2);
    }
}
