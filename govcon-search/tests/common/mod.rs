//! Shared test doubles: a bag-of-words embedder and a scriptable store.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use govcon_search::{
    BackendStats, ChunkRecord, CleanupReport, DocumentChunk, DocumentStore, EmbeddingProvider,
    InMemoryDocumentStore, InMemoryVectorStore, Namespace, OptimizeReport, Result, SearchConfig,
    SearchError, SearchOrchestrator, VectorMatch, VectorQuery, VectorStoreAdapter,
};

pub const PREFIX: &str = "org";

pub const VOCAB: [&str; 16] = [
    "fisma",
    "compliance",
    "audit",
    "cloud",
    "systems",
    "cybersecurity",
    "migration",
    "construction",
    "bridge",
    "medical",
    "supplies",
    "software",
    "development",
    "training",
    "logistics",
    "security",
];

/// Term counts over [`VOCAB`].
pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; VOCAB.len()];
    for word in text.split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
        if let Some(idx) = VOCAB.iter().position(|v| *v == word) {
            vector[idx] += 1.0;
        }
    }
    vector
}

pub fn config() -> SearchConfig {
    SearchConfig::builder().embedding_dimensions(VOCAB.len()).build().unwrap()
}

/// Embeds with [`bag_of_words`], counting calls. Aliases let a query embed
/// exactly like some other text.
#[derive(Default)]
pub struct TestEmbedder {
    calls: AtomicUsize,
    aliases: HashMap<String, String>,
    delay: Option<Duration>,
}

impl TestEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alias(mut self, query: &str, text: &str) -> Self {
        self.aliases.insert(query.to_string(), text.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for TestEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let text = self.aliases.get(text).map(String::as_str).unwrap_or(text);
        Ok(bag_of_words(text))
    }

    fn dimensions(&self) -> usize {
        VOCAB.len()
    }

    fn name(&self) -> &str {
        "test"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Healthy,
    /// Queries never complete.
    Hang,
    /// Reads fail with a backend error.
    Fail,
}

/// An in-memory store whose read path can be switched to hang or fail.
pub struct ScriptedStore {
    inner: InMemoryVectorStore,
    behaviour: AtomicU8,
    queries: AtomicUsize,
    last_top_k: AtomicUsize,
    namespaces_created: AtomicUsize,
    namespace_creation_fails: AtomicBool,
}

impl ScriptedStore {
    pub fn new(name: &str) -> Self {
        Self {
            inner: InMemoryVectorStore::named(name),
            behaviour: AtomicU8::new(0),
            queries: AtomicUsize::new(0),
            last_top_k: AtomicUsize::new(0),
            namespaces_created: AtomicUsize::new(0),
            namespace_creation_fails: AtomicBool::new(false),
        }
    }

    pub fn with_previews(name: &str) -> Self {
        Self { inner: InMemoryVectorStore::named(name).with_previews(), ..Self::new(name) }
    }

    pub fn behaving(self, behaviour: Behaviour) -> Self {
        self.set_behaviour(behaviour);
        self
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        let value = match behaviour {
            Behaviour::Healthy => 0,
            Behaviour::Hang => 1,
            Behaviour::Fail => 2,
        };
        self.behaviour.store(value, Ordering::SeqCst);
    }

    fn behaviour(&self) -> Behaviour {
        match self.behaviour.load(Ordering::SeqCst) {
            1 => Behaviour::Hang,
            2 => Behaviour::Fail,
            _ => Behaviour::Healthy,
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// `top_k` of the most recent vector query.
    pub fn last_top_k(&self) -> usize {
        self.last_top_k.load(Ordering::SeqCst)
    }

    pub fn namespaces_created(&self) -> usize {
        self.namespaces_created.load(Ordering::SeqCst)
    }

    pub fn fail_namespace_creation(&self, fail: bool) {
        self.namespace_creation_fails.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }

    fn failure(&self) -> SearchError {
        SearchError::VectorStoreError {
            backend: self.inner.name().to_string(),
            message: "connection refused".to_string(),
        }
    }

    async fn gate(&self) -> Result<()> {
        match self.behaviour() {
            Behaviour::Healthy => Ok(()),
            Behaviour::Hang => std::future::pending().await,
            Behaviour::Fail => Err(self.failure()),
        }
    }
}

#[async_trait]
impl VectorStoreAdapter for ScriptedStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn create_namespace(&self, namespace: &Namespace, dimensions: usize) -> Result<()> {
        self.namespaces_created.fetch_add(1, Ordering::SeqCst);
        // Widen the race window for concurrent resolution.
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.namespace_creation_fails.load(Ordering::SeqCst) {
            return Err(self.failure());
        }
        self.inner.create_namespace(namespace, dimensions).await
    }

    async fn upsert(&self, namespace: &Namespace, records: &[ChunkRecord]) -> Result<()> {
        self.inner.upsert(namespace, records).await
    }

    async fn delete(&self, namespace: &Namespace, ids: &[&str]) -> Result<()> {
        self.inner.delete(namespace, ids).await
    }

    async fn query(&self, namespace: &Namespace, query: &VectorQuery<'_>) -> Result<Vec<VectorMatch>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.last_top_k.store(query.top_k, Ordering::SeqCst);
        self.gate().await?;
        self.inner.query(namespace, query).await
    }

    async fn health_check(&self) -> Result<()> {
        self.gate().await
    }

    async fn stats(&self, documents: &dyn DocumentStore) -> Result<BackendStats> {
        self.gate().await?;
        self.inner.stats(documents).await
    }

    async fn cleanup_orphans(&self, documents: &dyn DocumentStore) -> Result<CleanupReport> {
        self.gate().await?;
        self.inner.cleanup_orphans(documents).await
    }

    async fn optimize(&self) -> Result<OptimizeReport> {
        self.gate().await?;
        self.inner.optimize().await
    }
}

pub fn record(org: &str, doc: &str, idx: u32, text: &str) -> ChunkRecord {
    ChunkRecord {
        id: format!("{org}:{doc}_{idx}"),
        organization_id: org.to_string(),
        document_id: doc.to_string(),
        document_title: format!("{doc} title"),
        chunk_index: idx,
        text: text.to_string(),
        embedding: bag_of_words(text),
        document_type: None,
        naics_codes: Vec::new(),
        tags: Vec::new(),
        published_at: None,
        metadata: HashMap::new(),
    }
}

/// Write `records` into every store and register their documents.
pub async fn seed(
    stores: &[&dyn VectorStoreAdapter],
    documents: &InMemoryDocumentStore,
    records: &[ChunkRecord],
) {
    let mut by_org: BTreeMap<&str, Vec<ChunkRecord>> = BTreeMap::new();
    let mut by_doc: BTreeMap<&str, Vec<DocumentChunk>> = BTreeMap::new();
    for r in records {
        by_org.entry(&r.organization_id).or_default().push(r.clone());
        by_doc
            .entry(&r.document_id)
            .or_default()
            .push(DocumentChunk { chunk_index: r.chunk_index, content: r.text.clone() });
    }
    for store in stores {
        for (org, records) in &by_org {
            store.upsert(&Namespace::for_organization(PREFIX, org), records).await.unwrap();
        }
    }
    for (doc, chunks) in by_doc {
        documents.insert_document(doc, chunks).await;
    }
}

pub fn orchestrator(
    config: SearchConfig,
    embedder: Arc<TestEmbedder>,
    primary: Arc<ScriptedStore>,
    secondary: Option<Arc<ScriptedStore>>,
    documents: Arc<InMemoryDocumentStore>,
) -> SearchOrchestrator {
    let mut builder = SearchOrchestrator::builder()
        .config(config)
        .embedding_provider(embedder)
        .primary_store(primary)
        .document_store(documents);
    if let Some(secondary) = secondary {
        builder = builder.secondary_store(secondary);
    }
    builder.build().unwrap()
}

/// A small procurement corpus for one or two organizations.
pub fn corpus(org: &str) -> Vec<ChunkRecord> {
    vec![
        record(org, "rfp-cloud", 0, "Cloud migration of legacy systems. Security review required."),
        record(org, "rfp-cloud", 1, "FISMA compliance audit for cloud systems."),
        record(org, "rfp-cyber", 0, "Cybersecurity training and security audit support."),
        record(org, "rfp-bridge", 0, "Bridge construction and logistics."),
        record(org, "rfp-med", 0, "Medical supplies logistics."),
        record(org, "rfp-soft", 0, "Software development for cloud systems security."),
    ]
}
