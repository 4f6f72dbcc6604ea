//! Index statistics, orphan cleanup and optimization across both stores.

mod common;

use std::sync::Arc;

use common::{Behaviour, ScriptedStore, TestEmbedder, config, corpus, orchestrator, seed};
use govcon_search::{
    HealthLevel, InMemoryDocumentStore, IndexMaintenance, NamespaceResolver, SearchFilters,
    SearchOptions, VectorStoreAdapter,
};

async fn seeded(
    secondary_behaviour: Behaviour,
) -> (Arc<ScriptedStore>, Arc<ScriptedStore>, Arc<InMemoryDocumentStore>) {
    let primary = Arc::new(ScriptedStore::new("primary"));
    let secondary = Arc::new(ScriptedStore::new("secondary"));
    let documents = Arc::new(InMemoryDocumentStore::new());
    seed(
        &[primary.as_ref() as &dyn VectorStoreAdapter, secondary.as_ref() as &dyn VectorStoreAdapter],
        &documents,
        &corpus("acme"),
    )
    .await;
    secondary.set_behaviour(secondary_behaviour);
    (primary, secondary, documents)
}

fn maintenance(
    primary: &Arc<ScriptedStore>,
    secondary: &Arc<ScriptedStore>,
    documents: &Arc<InMemoryDocumentStore>,
) -> IndexMaintenance {
    IndexMaintenance::new(
        Arc::clone(primary) as Arc<dyn VectorStoreAdapter>,
        Some(Arc::clone(secondary) as Arc<dyn VectorStoreAdapter>),
        Arc::clone(documents) as Arc<dyn govcon_search::DocumentStore>,
    )
}

#[tokio::test]
async fn stats_sum_vectors_and_take_worst_health() {
    let (primary, secondary, documents) = seeded(Behaviour::Healthy).await;
    let maintenance = maintenance(&primary, &secondary, &documents);

    let stats = maintenance.get_stats().await;
    assert_eq!(stats.total_vectors, 12);
    assert_eq!(stats.organizations, 1);
    assert_eq!(stats.documents, 5);
    assert_eq!(stats.orphaned_vectors, 0);
    assert_eq!(stats.health, HealthLevel::Healthy);
    assert_eq!(stats.backends.len(), 2);

    // Two of six vectors per backend now point at a deleted document.
    documents.remove_document("rfp-cloud").await;
    let stats = maintenance.get_stats().await;
    assert_eq!(stats.orphaned_vectors, 4);
    assert_eq!(stats.health, HealthLevel::Critical);
}

#[tokio::test]
async fn orphan_cleanup_is_idempotent() {
    let (primary, secondary, documents) = seeded(Behaviour::Healthy).await;
    let maintenance = maintenance(&primary, &secondary, &documents);
    documents.remove_document("rfp-cloud").await;

    let first = maintenance.cleanup_orphans().await;
    assert_eq!(first.removed_vectors, 4);
    assert_eq!(first.reports.len(), 2);
    assert!(first.failed_backends.is_empty());
    assert!(first.reports.iter().all(|r| r.orphaned_documents == 1));

    let second = maintenance.cleanup_orphans().await;
    assert_eq!(second.removed_vectors, 0);

    assert_eq!(primary.len().await, 4);
    assert_eq!(secondary.len().await, 4);
    let stats = maintenance.get_stats().await;
    assert_eq!(stats.orphaned_vectors, 0);
    assert_eq!(stats.health, HealthLevel::Healthy);
}

#[tokio::test]
async fn failing_backend_does_not_stop_maintenance() {
    let (primary, secondary, documents) = seeded(Behaviour::Fail).await;
    let maintenance = maintenance(&primary, &secondary, &documents);
    documents.remove_document("rfp-med").await;

    let stats = maintenance.get_stats().await;
    assert_eq!(stats.total_vectors, 6);
    assert_eq!(stats.health, HealthLevel::Critical);
    let down = stats.backends.iter().find(|b| b.backend == "secondary").unwrap();
    assert!(!down.available);

    let summary = maintenance.cleanup_orphans().await;
    assert_eq!(summary.removed_vectors, 1);
    assert_eq!(summary.reports.len(), 1);
    assert_eq!(summary.failed_backends.len(), 1);
    assert!(summary.failed_backends[0].contains("secondary"));

    let reports = maintenance.optimize().await;
    assert_eq!(reports.len(), 2);
    assert!(reports[0].errors.is_empty());
    assert!(!reports[1].errors.is_empty());
}

#[tokio::test]
async fn cleanup_through_orchestrator_drops_cached_results() {
    let (primary, secondary, documents) = seeded(Behaviour::Healthy).await;
    let search = orchestrator(
        config(),
        Arc::new(TestEmbedder::new()),
        Arc::clone(&primary),
        Some(Arc::clone(&secondary)),
        Arc::clone(&documents),
    );
    let filters = SearchFilters::for_organization("acme");
    search.search("cloud systems security", &filters, &SearchOptions::default()).await.unwrap();
    assert_eq!(search.cache().len().await, 1);

    // Nothing to remove: the cache survives.
    assert_eq!(search.cleanup_orphaned_vectors().await.removed_vectors, 0);
    assert_eq!(search.cache().len().await, 1);

    documents.remove_document("rfp-cloud").await;
    assert_eq!(search.cleanup_orphaned_vectors().await.removed_vectors, 4);
    assert!(search.cache().is_empty().await);

    let stats = search.get_index_stats().await;
    assert_eq!(stats.total_vectors, 8);
    assert_eq!(search.optimize_indexes().await.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resolution_creates_namespace_once() {
    let store = Arc::new(ScriptedStore::new("primary"));
    let resolver = Arc::new(NamespaceResolver::new(
        Arc::clone(&store) as Arc<dyn VectorStoreAdapter>,
        "org",
        common::VOCAB.len(),
    ));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let resolver = Arc::clone(&resolver);
            let org = if i % 2 == 0 { "acme" } else { "globex" };
            tokio::spawn(async move { resolver.resolve(org).await })
        })
        .collect();

    for task in tasks {
        let namespace = task.await.unwrap().unwrap();
        assert!(namespace.name == "org_acme" || namespace.name == "org_globex");
    }
    assert_eq!(store.namespaces_created(), 2);
    assert_eq!(resolver.len().await, 2);
    assert_eq!(resolver.pending().await, 0);
}

#[tokio::test]
async fn failed_namespace_creation_is_retried_and_not_leaked() {
    let store = Arc::new(ScriptedStore::new("primary"));
    let resolver = NamespaceResolver::new(
        Arc::clone(&store) as Arc<dyn VectorStoreAdapter>,
        "org",
        common::VOCAB.len(),
    );

    store.fail_namespace_creation(true);
    assert!(resolver.resolve("acme").await.is_err());
    assert!(resolver.is_empty().await);
    assert_eq!(resolver.pending().await, 0);

    store.fail_namespace_creation(false);
    let namespace = resolver.resolve("acme").await.unwrap();
    assert_eq!(namespace.name, "org_acme");
    assert_eq!(store.namespaces_created(), 2);
    assert_eq!(resolver.pending().await, 0);
}
