//! Organization-to-namespace resolution for the primary vector store.
//!
//! Each organization gets its own namespace in the primary index so one
//! tenant's query can never match another tenant's vectors. Namespaces are
//! created lazily on first use and the mapping is remembered in process.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::Result;
use crate::vectorstore::VectorStoreAdapter;

/// An isolated partition of the primary index owned by one organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// Backend-safe namespace name.
    pub name: String,
    /// The organization this namespace belongs to.
    pub organization_id: String,
}

impl Namespace {
    /// Derive the namespace for an organization: `{prefix}_{organization_id}`
    /// with every character outside `[A-Za-z0-9_-]` replaced by `_`.
    pub fn for_organization(prefix: &str, organization_id: &str) -> Self {
        let sanitized: String = organization_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        Self { name: format!("{prefix}_{sanitized}"), organization_id: organization_id.to_string() }
    }
}

/// Resolves organization IDs to namespaces, creating them on first use.
///
/// Lookups after the first are served from an in-process map. Concurrent
/// first calls for the same organization serialize on a per-organization
/// lock so the namespace is created once; calls for different organizations
/// never wait on each other. The map locks are only held for lookups and
/// inserts, never across the backend call.
pub struct NamespaceResolver {
    store: Arc<dyn VectorStoreAdapter>,
    prefix: String,
    dimensions: usize,
    resolved: RwLock<HashMap<String, Namespace>>,
    creating: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NamespaceResolver {
    /// Create a resolver backed by the given primary store.
    pub fn new(store: Arc<dyn VectorStoreAdapter>, prefix: impl Into<String>, dimensions: usize) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            dimensions,
            resolved: RwLock::new(HashMap::new()),
            creating: Mutex::new(HashMap::new()),
        }
    }

    /// The namespace name an organization maps to, without touching the backend.
    pub fn namespace_for(&self, organization_id: &str) -> Namespace {
        Namespace::for_organization(&self.prefix, organization_id)
    }

    /// Resolve the namespace for `organization_id`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Propagates the store error if namespace creation fails; nothing is
    /// cached in that case so the next call retries creation.
    pub async fn resolve(&self, organization_id: &str) -> Result<Namespace> {
        if let Some(ns) = self.resolved.read().await.get(organization_id) {
            return Ok(ns.clone());
        }

        let key_lock = {
            let mut creating = self.creating.lock().await;
            Arc::clone(creating.entry(organization_id.to_string()).or_default())
        };
        let _guard = key_lock.lock().await;

        // Another caller may have finished creation while we waited.
        if let Some(ns) = self.resolved.read().await.get(organization_id) {
            return Ok(ns.clone());
        }

        let namespace = self.namespace_for(organization_id);
        debug!(organization_id, namespace = %namespace.name, "creating namespace");
        let created = self.store.create_namespace(&namespace, self.dimensions).await;
        if created.is_ok() {
            self.resolved.write().await.insert(organization_id.to_string(), namespace.clone());
        }
        self.creating.lock().await.remove(organization_id);
        created?;

        info!(organization_id, namespace = %namespace.name, "namespace ready");
        Ok(namespace)
    }

    /// Number of organizations whose namespace is being created right now.
    pub async fn pending(&self) -> usize {
        self.creating.lock().await.len()
    }

    /// Number of organizations with a resolved namespace.
    pub async fn len(&self) -> usize {
        self.resolved.read().await.len()
    }

    /// Whether no namespace has been resolved yet.
    pub async fn is_empty(&self) -> bool {
        self.resolved.read().await.is_empty()
    }
}
