//! Out-of-band index maintenance: statistics, orphan cleanup, optimization.
//!
//! These entry points are meant for scheduled jobs. They report partial
//! failures instead of aborting so one unreachable backend or one bad
//! document does not stop the rest of the sweep.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::docstore::DocumentStore;
use crate::vectorstore::VectorStoreAdapter;

/// Orphan ratio at or below which a backend is healthy.
const HEALTHY_ORPHAN_RATIO: f64 = 0.01;
/// Orphan ratio at or below which a backend is only a warning.
const WARNING_ORPHAN_RATIO: f64 = 0.10;

/// Derived health of an index. Ordered from best to worst.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    /// Few or no orphans.
    Healthy,
    /// Orphans are accumulating; schedule a cleanup.
    Warning,
    /// Backend unreachable or heavily polluted with orphans.
    Critical,
}

impl HealthLevel {
    /// Health from the share of orphaned vectors.
    pub fn from_orphans(orphaned: u64, total: u64) -> Self {
        if total == 0 || orphaned == 0 {
            return Self::Healthy;
        }
        let ratio = orphaned as f64 / total as f64;
        if ratio <= HEALTHY_ORPHAN_RATIO {
            Self::Healthy
        } else if ratio <= WARNING_ORPHAN_RATIO {
            Self::Warning
        } else {
            Self::Critical
        }
    }
}

/// Statistics for one backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendStats {
    /// Backend name.
    pub backend: String,
    /// Whether the backend answered.
    pub available: bool,
    /// Number of stored vectors.
    pub total_vectors: u64,
    /// Number of organizations with at least one vector.
    pub organizations: u64,
    /// Number of documents with at least one vector.
    pub documents: u64,
    /// Vectors whose document no longer exists.
    pub orphaned_vectors: u64,
    /// Derived health.
    pub health: HealthLevel,
}

impl BackendStats {
    /// Stats for a backend that could not be queried.
    pub fn unavailable(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            available: false,
            total_vectors: 0,
            organizations: 0,
            documents: 0,
            orphaned_vectors: 0,
            health: HealthLevel::Critical,
        }
    }
}

/// Combined statistics across both backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexStats {
    /// Sum of vectors across backends.
    pub total_vectors: u64,
    /// Organizations represented (largest count of any backend).
    pub organizations: u64,
    /// Documents represented (largest count of any backend).
    pub documents: u64,
    /// Sum of orphaned vectors across backends.
    pub orphaned_vectors: u64,
    /// Worst health of any backend.
    pub health: HealthLevel,
    /// Per-backend breakdown.
    pub backends: Vec<BackendStats>,
}

impl IndexStats {
    /// Aggregate per-backend stats: totals are summed, health is worst-of.
    pub fn combine(backends: Vec<BackendStats>) -> Self {
        Self {
            total_vectors: backends.iter().map(|b| b.total_vectors).sum(),
            organizations: backends.iter().map(|b| b.organizations).max().unwrap_or(0),
            documents: backends.iter().map(|b| b.documents).max().unwrap_or(0),
            orphaned_vectors: backends.iter().map(|b| b.orphaned_vectors).sum(),
            health: backends.iter().map(|b| b.health).max().unwrap_or(HealthLevel::Healthy),
            backends,
        }
    }
}

/// Outcome of an orphan sweep on one backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupReport {
    /// Backend name.
    pub backend: String,
    /// Documents whose existence was checked.
    pub scanned_documents: u64,
    /// Documents found to be missing from the source of truth.
    pub orphaned_documents: u64,
    /// Vectors deleted.
    pub removed_vectors: u64,
    /// Documents whose vectors could not be removed, with the reason.
    pub failed_documents: Vec<String>,
}

/// Outcome of [`IndexMaintenance::cleanup_orphans`] across backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CleanupSummary {
    /// Total vectors removed.
    pub removed_vectors: u64,
    /// Per-backend reports for backends that could be swept.
    pub reports: Vec<CleanupReport>,
    /// Backends whose sweep failed outright, with the reason.
    pub failed_backends: Vec<String>,
}

/// Outcome of an optimize request on one backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizeReport {
    /// Backend name.
    pub backend: String,
    /// Operations actually performed.
    pub actions: Vec<String>,
    /// Advice for operators where nothing could be done automatically.
    pub recommendations: Vec<String>,
    /// Operations that were attempted and failed.
    pub errors: Vec<String>,
}

/// Statistics, orphan cleanup and optimization over the primary and
/// (optional) secondary stores.
#[derive(Clone)]
pub struct IndexMaintenance {
    primary: Arc<dyn VectorStoreAdapter>,
    secondary: Option<Arc<dyn VectorStoreAdapter>>,
    documents: Arc<dyn DocumentStore>,
}

impl IndexMaintenance {
    /// Create a maintenance service.
    pub fn new(
        primary: Arc<dyn VectorStoreAdapter>,
        secondary: Option<Arc<dyn VectorStoreAdapter>>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self { primary, secondary, documents }
    }

    fn backends(&self) -> impl Iterator<Item = &Arc<dyn VectorStoreAdapter>> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }

    /// Query every backend for counts and health and combine them.
    ///
    /// An unreachable backend is reported as unavailable and critical rather
    /// than failing the call.
    pub async fn get_stats(&self) -> IndexStats {
        let documents = self.documents.as_ref();
        let results = futures::future::join_all(self.backends().map(|store| async move {
            match store.stats(documents).await {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(backend = store.name(), error = %e, "failed to collect index stats");
                    BackendStats::unavailable(store.name())
                }
            }
        }))
        .await;

        let stats = IndexStats::combine(results);
        info!(
            total_vectors = stats.total_vectors,
            orphaned_vectors = stats.orphaned_vectors,
            health = ?stats.health,
            "collected index stats"
        );
        stats
    }

    /// Remove orphaned vectors from every backend.
    pub async fn cleanup_orphans(&self) -> CleanupSummary {
        let mut summary = CleanupSummary::default();
        for store in self.backends() {
            match store.cleanup_orphans(self.documents.as_ref()).await {
                Ok(report) => {
                    info!(
                        backend = store.name(),
                        removed_vectors = report.removed_vectors,
                        orphaned_documents = report.orphaned_documents,
                        failed = report.failed_documents.len(),
                        "orphan cleanup finished"
                    );
                    summary.removed_vectors += report.removed_vectors;
                    summary.reports.push(report);
                }
                Err(e) => {
                    error!(backend = store.name(), error = %e, "orphan cleanup failed");
                    summary.failed_backends.push(format!("{}: {e}", store.name()));
                }
            }
        }
        summary
    }

    /// Ask every backend to optimize its indexes.
    pub async fn optimize(&self) -> Vec<OptimizeReport> {
        let mut reports = Vec::new();
        for store in self.backends() {
            let report = match store.optimize().await {
                Ok(report) => report,
                Err(e) => {
                    error!(backend = store.name(), error = %e, "optimize failed");
                    OptimizeReport {
                        backend: store.name().to_string(),
                        actions: Vec::new(),
                        recommendations: Vec::new(),
                        errors: vec![e.to_string()],
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}
