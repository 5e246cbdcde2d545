//! URI to aggregate index.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use redfishd_events::{AggregateId, Event, EventObserver};
use tracing::debug;

use crate::events::ResourceEvent;
use crate::plugin::PluginRegistry;

/// Strip one trailing slash, keeping `/` itself.
#[must_use]
pub fn normalize_uri(uri: &str) -> &str {
    match uri.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => uri,
    }
}

/// Parent of a URI: everything before the last segment.
#[must_use]
pub fn parent_uri(uri: &str) -> Option<&str> {
    let uri = normalize_uri(uri);
    uri.rfind('/')
        .filter(|&idx| idx > 0)
        .and_then(|idx| uri.get(..idx))
}

/// Maps live resource URIs to their aggregates.
///
/// Uniqueness is enforced here: [`claim`](Self::claim) is an atomic
/// insert-if-absent.
#[derive(Default)]
pub struct ResourceTree {
    index: RwLock<HashMap<String, AggregateId>>,
    plugins: Option<Arc<PluginRegistry>>,
}

impl ResourceTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A tree that unregisters URI-scoped plugins when their resource goes.
    #[must_use]
    pub fn with_plugins(plugins: Arc<PluginRegistry>) -> Self {
        Self {
            index: RwLock::default(),
            plugins: Some(plugins),
        }
    }

    /// Reserve `uri` for `id`. Returns false if another aggregate holds it.
    pub fn claim(&self, uri: &str, id: AggregateId) -> bool {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        match index.get(normalize_uri(uri)) {
            Some(existing) => *existing == id,
            None => {
                index.insert(normalize_uri(uri).to_string(), id);
                true
            }
        }
    }

    /// Drop the mapping if `id` still holds it.
    pub fn release(&self, uri: &str, id: AggregateId) {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        if index.get(normalize_uri(uri)) == Some(&id) {
            index.remove(normalize_uri(uri));
        }
    }

    #[must_use]
    pub fn lookup(&self, uri: &str) -> Option<AggregateId> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(normalize_uri(uri))
            .copied()
    }

    #[must_use]
    pub fn contains(&self, uri: &str) -> bool {
        self.lookup(uri).is_some()
    }

    /// All indexed URIs, sorted.
    #[must_use]
    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        uris.sort();
        uris
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventObserver<ResourceEvent> for ResourceTree {
    fn notify(&self, event: &Event<ResourceEvent>) {
        match &event.payload {
            ResourceEvent::Created(created) => {
                self.claim(&created.resource_uri, event.aggregate_id);
            }
            ResourceEvent::Removed(removed) => {
                self.release(&removed.resource_uri, event.aggregate_id);
                if let Some(plugins) = &self.plugins {
                    plugins.unregister(&removed.resource_uri);
                }
                debug!(uri = %removed.resource_uri, "Detached removed resource");
            }
            _ => {}
        }
    }
}
