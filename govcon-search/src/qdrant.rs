//! Qdrant primary vector store backend.
//!
//! Provides [`QdrantVectorStore`] which implements [`VectorStoreAdapter`]
//! using the [qdrant-client](https://docs.rs/qdrant-client) crate over gRPC.
//! Each organization namespace maps to its own Qdrant collection. Payloads
//! keep only a text preview; full text is resolved from the document store.
//!
//! # Example
//!
//! ```rust,ignore
//! use govcon_search::qdrant::QdrantVectorStore;
//!
//! let store = QdrantVectorStore::new("http://localhost:6334", "org")?;
//! let ns = Namespace::for_organization("org", "acme");
//! store.create_namespace(&ns, 1536).await?;
//! store.upsert(&ns, &records).await?;
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, PointId, PointStruct, PointsIdsList, Range,
    ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::docstore::{DocumentStore, missing_documents};
use crate::document::ChunkRecord;
use crate::error::{Result, SearchError};
use crate::filter::SearchFilters;
use crate::maintenance::{BackendStats, CleanupReport, HealthLevel, OptimizeReport};
use crate::namespace::Namespace;
use crate::vectorstore::{VectorMatch, VectorQuery, VectorStoreAdapter, preview, sort_matches};

const BACKEND: &str = "qdrant";
const SCROLL_PAGE: u32 = 256;
const EXISTENCE_BATCH: usize = 500;

/// Payload fields that get a keyword index so filters stay cheap.
const KEYWORD_FIELDS: [&str; 5] = ["organization_id", "document_id", "document_type", "naics_codes", "tags"];

/// A [`VectorStoreAdapter`] backed by [Qdrant](https://qdrant.tech/).
///
/// Collections use cosine distance. Point IDs are UUIDv5 values derived from
/// the chunk ID, which is also kept in the payload.
pub struct QdrantVectorStore {
    client: Qdrant,
    prefix: String,
}

impl QdrantVectorStore {
    /// Connect to Qdrant at `url`. `prefix` must match the namespace prefix
    /// of the resolver so maintenance can find the organization collections.
    pub fn new(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = Qdrant::from_url(url).build().map_err(Self::map_err)?;
        Ok(Self { client, prefix: prefix.into() })
    }

    /// Create a store from an existing client.
    pub fn from_client(client: Qdrant, prefix: impl Into<String>) -> Self {
        Self { client, prefix: prefix.into() }
    }

    fn map_err(e: qdrant_client::QdrantError) -> SearchError {
        SearchError::VectorStoreError { backend: BACKEND.to_string(), message: e.to_string() }
    }

    /// Stable point ID for a chunk.
    pub fn point_id(chunk_id: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
    }

    fn payload(record: &ChunkRecord) -> Payload {
        let (text, text_is_preview) = preview(&record.text);
        let mut payload = serde_json::json!({
            "chunk_id": record.id,
            "organization_id": record.organization_id,
            "document_id": record.document_id,
            "document_title": record.document_title,
            "chunk_index": record.chunk_index,
            "text": text,
            "text_is_preview": text_is_preview,
            "naics_codes": record.naics_codes,
            "tags": record.tags,
            "metadata": record.metadata,
        });
        if let Some(obj) = payload.as_object_mut() {
            if let Some(document_type) = &record.document_type {
                obj.insert("document_type".into(), document_type.clone().into());
            }
            if let Some(at) = record.published_at {
                obj.insert("published_at".into(), at.timestamp().into());
            }
        }
        Payload::try_from(payload).unwrap_or_default()
    }

    async fn organization_collections(&self) -> Result<Vec<String>> {
        let prefix = format!("{}_", self.prefix);
        let collections = self.client.list_collections().await.map_err(Self::map_err)?;
        Ok(collections
            .collections
            .into_iter()
            .map(|c| c.name)
            .filter(|name| name.starts_with(&prefix))
            .collect())
    }

    /// Vector counts per document in one collection, by paging through
    /// every point.
    async fn document_counts(&self, collection: &str) -> Result<HashMap<String, u64>> {
        let mut counts = HashMap::new();
        let mut offset: Option<PointId> = None;
        loop {
            let mut request = ScrollPointsBuilder::new(collection).limit(SCROLL_PAGE).with_payload(true);
            if let Some(offset) = offset.take() {
                request = request.offset(offset);
            }
            let page = self.client.scroll(request).await.map_err(Self::map_err)?;
            for point in &page.result {
                if let Some(document_id) = point.payload.get("document_id").and_then(as_string) {
                    *counts.entry(document_id).or_insert(0) += 1;
                }
            }
            match page.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(counts)
    }
}

/// Translate typed filters into a Qdrant filter. All conditions are ANDed.
pub fn build_filter(filters: &SearchFilters) -> Filter {
    let mut must = vec![Condition::matches("organization_id", filters.organization_id.clone())];
    match filters.effective_document_ids() {
        Some(ids) if ids.len() == 1 => {
            must.push(Condition::matches("document_id", ids[0].clone()));
        }
        Some(ids) => must.push(Condition::matches("document_id", ids)),
        None => {}
    }
    if !filters.document_types.is_empty() {
        must.push(Condition::matches("document_type", filters.document_types.clone()));
    }
    if !filters.naics_codes.is_empty() {
        must.push(Condition::matches("naics_codes", filters.naics_codes.clone()));
    }
    if !filters.tags.is_empty() {
        must.push(Condition::matches("tags", filters.tags.clone()));
    }
    if let Some(range) = &filters.date_range {
        must.push(Condition::range(
            "published_at",
            Range {
                gte: range.from.map(|at| at.timestamp() as f64),
                lte: range.to.map(|at| at.timestamp() as f64),
                ..Default::default()
            },
        ));
    }
    Filter::must(must)
}

fn as_string(value: &QdrantValue) -> Option<String> {
    match &value.kind {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn to_json(value: &QdrantValue) -> serde_json::Value {
    match &value.kind {
        Some(Kind::StringValue(s)) => serde_json::Value::String(s.clone()),
        Some(Kind::IntegerValue(i)) => (*i).into(),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(*d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(Kind::BoolValue(b)) => (*b).into(),
        Some(Kind::StructValue(s)) => {
            serde_json::Value::Object(s.fields.iter().map(|(k, v)| (k.clone(), to_json(v))).collect())
        }
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.iter().map(to_json).collect())
        }
        Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
    }
}

fn to_match(payload: &HashMap<String, QdrantValue>, score: f32) -> VectorMatch {
    let get_str = |key: &str| payload.get(key).and_then(as_string).unwrap_or_default();
    let chunk_index = match payload.get("chunk_index").and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(i)) => u32::try_from(*i).unwrap_or(0),
        Some(Kind::DoubleValue(d)) => *d as u32,
        _ => 0,
    };
    let text_is_preview =
        matches!(payload.get("text_is_preview").and_then(|v| v.kind.as_ref()), Some(Kind::BoolValue(true)));
    let metadata = match payload.get("metadata").and_then(|v| v.kind.as_ref()) {
        Some(Kind::StructValue(s)) => s.fields.iter().map(|(k, v)| (k.clone(), to_json(v))).collect(),
        _ => HashMap::new(),
    };
    VectorMatch {
        chunk_id: get_str("chunk_id"),
        document_id: get_str("document_id"),
        document_title: get_str("document_title"),
        chunk_index,
        text: get_str("text"),
        text_is_preview,
        score: score.clamp(0.0, 1.0),
        metadata,
    }
}

#[async_trait]
impl VectorStoreAdapter for QdrantVectorStore {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn create_namespace(&self, namespace: &Namespace, dimensions: usize) -> Result<()> {
        let exists = self.client.collection_exists(namespace.name.clone()).await.map_err(Self::map_err)?;
        if exists {
            debug!(collection = %namespace.name, "qdrant collection already exists, skipping creation");
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&namespace.name)
                    .vectors_config(VectorParamsBuilder::new(dimensions as u64, Distance::Cosine)),
            )
            .await
            .map_err(Self::map_err)?;

        for field in KEYWORD_FIELDS {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &namespace.name,
                    field,
                    FieldType::Keyword,
                ))
                .await
                .map_err(Self::map_err)?;
        }
        self.client
            .create_field_index(CreateFieldIndexCollectionBuilder::new(
                &namespace.name,
                "published_at",
                FieldType::Integer,
            ))
            .await
            .map_err(Self::map_err)?;

        debug!(collection = %namespace.name, dimensions, "created qdrant collection");
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
                    "record '{}' belongs to '{}', not collection '{}'",
                    record.id, record.organization_id, namespace.name
                ),
            });
        }

        let points: Vec<PointStruct> = records
            .iter()
            .map(|r| PointStruct::new(Self::point_id(&r.id), r.embedding.clone(), Self::payload(r)))
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&namespace.name, points).wait(true))
            .await
            .map_err(Self::map_err)?;

        debug!(collection = %namespace.name, count = records.len(), "upserted chunks to qdrant");
        Ok(())
    }

    async fn delete(&self, namespace: &Namespace, ids: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let point_ids: Vec<PointId> = ids.iter().map(|id| Self::point_id(id).into()).collect();

        self.client
            .delete_points(
                DeletePointsBuilder::new(&namespace.name)
                    .points(PointsIdsList { ids: point_ids })
                    .wait(true),
            )
            .await
            .map_err(Self::map_err)?;

        debug!(collection = %namespace.name, count = ids.len(), "deleted points from qdrant");
        Ok(())
    }

    async fn query(&self, namespace: &Namespace, query: &VectorQuery<'_>) -> Result<Vec<VectorMatch>> {
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&namespace.name, query.vector.to_vec(), query.top_k as u64)
                    .filter(build_filter(query.filters))
                    .score_threshold(query.min_score)
                    .with_payload(true),
            )
            .await
            .map_err(Self::map_err)?;

        let mut matches: Vec<VectorMatch> = response
            .result
            .into_iter()
            .map(|scored| to_match(&scored.payload, scored.score))
            .filter(|m| m.score >= query.min_score)
            .collect();
        sort_matches(&mut matches);
        matches.truncate(query.top_k);
        Ok(matches)
    }

    async fn health_check(&self) -> Result<()> {
        self.client.health_check().await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn stats(&self, documents: &dyn DocumentStore) -> Result<BackendStats> {
        let mut total_vectors = 0u64;
        let mut organizations = 0u64;
        let mut all_documents = 0u64;
        let mut orphaned_vectors = 0u64;

        for collection in self.organization_collections().await? {
            let count = self
                .client
                .count(CountPointsBuilder::new(&collection).exact(true))
                .await
                .map_err(Self::map_err)?;
            let points = count.result.map(|r| r.count).unwrap_or(0);
            if points == 0 {
                continue;
            }
            total_vectors += points;
            organizations += 1;

            let counts = self.document_counts(&collection).await?;
            all_documents += counts.len() as u64;
            let ids: Vec<String> = counts.keys().cloned().collect();
            match missing_documents(documents, &ids, EXISTENCE_BATCH).await {
                Ok(missing) => {
                    orphaned_vectors +=
                        missing.iter().filter_map(|id| counts.get(id)).sum::<u64>();
                }
                Err(e) => {
                    warn!(collection = %collection, error = %e, "orphan check skipped");
                }
            }
        }

        Ok(BackendStats {
            backend: BACKEND.to_string(),
            available: true,
            total_vectors,
            organizations,
            documents: all_documents,
            orphaned_vectors,
            health: HealthLevel::from_orphans(orphaned_vectors, total_vectors),
        })
    }

    async fn cleanup_orphans(&self, documents: &dyn DocumentStore) -> Result<CleanupReport> {
        let mut report = CleanupReport {
            backend: BACKEND.to_string(),
            scanned_documents: 0,
            orphaned_documents: 0,
            removed_vectors: 0,
            failed_documents: Vec::new(),
        };

        for collection in self.organization_collections().await? {
            let counts = match self.document_counts(&collection).await {
                Ok(counts) => counts,
                Err(e) => {
                    warn!(collection = %collection, error = %e, "failed to scan collection");
                    report.failed_documents.push(format!("{collection}: {e}"));
                    continue;
                }
            };
            report.scanned_documents += counts.len() as u64;
            let ids: Vec<String> = counts.keys().cloned().collect();

            let missing = match missing_documents(documents, &ids, EXISTENCE_BATCH).await {
                Ok(missing) => missing,
                Err(e) => {
                    warn!(collection = %collection, error = %e, "document lookup failed");
                    report.failed_documents.push(format!("{collection}: {e}"));
                    continue;
                }
            };
            for document_id in missing {
                report.orphaned_documents += 1;
                let filter = Filter::must([Condition::matches("document_id", document_id.clone())]);
                let deleted = self
                    .client
                    .delete_points(DeletePointsBuilder::new(&collection).points(filter).wait(true))
                    .await;
                match deleted {
                    Ok(_) => {
                        report.removed_vectors += counts.get(&document_id).copied().unwrap_or(0);
                    }
                    Err(e) => {
                        warn!(
                            collection = %collection,
                            document_id = %document_id,
                            error = %e,
                            "failed to delete orphaned vectors"
                        );
                        report.failed_documents.push(format!("{document_id}: {e}"));
                    }
                }
            }
        }

        debug!(
            removed_vectors = report.removed_vectors,
            failed = report.failed_documents.len(),
            "qdrant orphan sweep finished"
        );
        Ok(report)
    }

    async fn optimize(&self) -> Result<OptimizeReport> {
        let collections = self.organization_collections().await?;
        Ok(OptimizeReport {
            backend: BACKEND.to_string(),
            actions: Vec::new(),
            recommendations: vec![
                format!(
                    "qdrant optimizes segments in the background; {} organization collections checked",
                    collections.len()
                ),
                "run orphan cleanup before relying on point counts".to_string(),
            ],
            errors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::filter::DateRange;

    #[test]
    fn organization_only_filter_has_one_condition() {
        let filter = build_filter(&SearchFilters::for_organization("acme"));
        assert_eq!(filter.must.len(), 1);
    }

    #[test]
    fn every_restriction_adds_a_condition() {
        let filters = SearchFilters::for_organization("acme")
            .with_document_ids(["d1", "d2"])
            .with_document_types(["rfp"])
            .with_naics_codes(["541512"])
            .with_tags(["cloud"])
            .with_date_range(DateRange {
                from: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
                to: None,
            });
        assert_eq!(build_filter(&filters).must.len(), 6);
    }

    #[test]
    fn point_ids_are_stable_uuids() {
        let a = QdrantVectorStore::point_id("doc-1_0");
        assert_eq!(a, QdrantVectorStore::point_id("doc-1_0"));
        assert_ne!(a, QdrantVectorStore::point_id("doc-1_1"));
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn payload_values_convert_to_json() {
        let payload = Payload::try_from(serde_json::json!({
            "chunk_id": "doc-1_2",
            "document_id": "doc-1",
            "document_title": "Cloud RFP",
            "chunk_index": 2,
            "text": "preview",
            "text_is_preview": true,
            "metadata": {"agency": "GSA", "value": 1.5},
        }))
        .unwrap();
        let payload: HashMap<String, QdrantValue> = payload.into();
        let m = to_match(&payload, 0.8);
        assert_eq!(m.chunk_id, "doc-1_2");
        assert_eq!(m.chunk_index, 2);
        assert!(m.text_is_preview);
        assert_eq!(m.metadata["agency"], serde_json::json!("GSA"));
    }
}
