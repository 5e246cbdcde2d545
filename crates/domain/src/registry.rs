//! Command registry and the search path used to route HTTP verbs.
//!
//! HTTP commands are keyed `<selector>:<VERB>`, where the selector is a
//! resource URI, an OData type or context, a plugin type, or the
//! `http:RedfishResource` fallback. Internal commands are keyed by name
//! and decoded straight from JSON.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::command::Command;
use crate::commands::{
    AddCollectionMember, CreateRedfishResource, DeleteRedfishResource, GetRedfishResource,
    OptionsRedfishResource, PatchRedfishResource, RemoveCollectionMember, RemoveRedfishResource,
    RemoveRedfishResourceProperty, UpdateRedfishResourcePrivileges,
    UpdateRedfishResourceProperties, default_key,
};
use crate::error::{DomainError, Result};
use crate::privileges::HttpVerb;

pub type HttpCommandFactory = Arc<dyn Fn() -> Box<dyn Command> + Send + Sync>;
type InternalDecoder = Arc<dyn Fn(Value) -> Result<Box<dyn Command>> + Send + Sync>;

/// Ordered candidate keys for `verb` on a resource, most specific first.
/// Absent selectors are skipped; the fallback is always last.
#[must_use]
pub fn search_path(
    uri: &str,
    odata_type: Option<&str>,
    odata_context: Option<&str>,
    plugin: Option<&str>,
    verb: HttpVerb,
) -> Vec<String> {
    [Some(uri), odata_type, odata_context, plugin]
        .into_iter()
        .flatten()
        .filter(|selector| !selector.is_empty())
        .map(|selector| format!("{selector}:{verb}"))
        .chain(std::iter::once(default_key(verb)))
        .collect()
}

#[derive(Default)]
pub struct CommandRegistry {
    http: RwLock<HashMap<String, HttpCommandFactory>>,
    internal: RwLock<HashMap<String, InternalDecoder>>,
}

impl CommandRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the default verb commands and every internal
    /// resource command.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();

        registry.register_http(default_key(HttpVerb::Get), || Box::new(GetRedfishResource::get()));
        registry.register_http(default_key(HttpVerb::Head), || Box::new(GetRedfishResource::head()));
        registry.register_http(default_key(HttpVerb::Options), || {
            Box::new(OptionsRedfishResource::default())
        });
        registry.register_http(default_key(HttpVerb::Patch), || {
            Box::new(PatchRedfishResource::default())
        });
        registry.register_http(default_key(HttpVerb::Delete), || {
            Box::new(DeleteRedfishResource::default())
        });

        registry.register_internal::<CreateRedfishResource>(CreateRedfishResource::NAME);
        registry.register_internal::<UpdateRedfishResourceProperties>(
            UpdateRedfishResourceProperties::NAME,
        );
        registry.register_internal::<RemoveRedfishResourceProperty>(
            RemoveRedfishResourceProperty::NAME,
        );
        registry.register_internal::<RemoveRedfishResource>(RemoveRedfishResource::NAME);
        registry.register_internal::<UpdateRedfishResourcePrivileges>(
            UpdateRedfishResourcePrivileges::NAME,
        );
        registry.register_internal::<AddCollectionMember>(AddCollectionMember::NAME);
        registry.register_internal::<RemoveCollectionMember>(RemoveCollectionMember::NAME);

        registry
    }

    /// Register (or replace) the command built for `key`.
    pub fn register_http<F>(&self, key: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Command> + Send + Sync + 'static,
    {
        let key = key.into();
        let replaced = self
            .http
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), Arc::new(factory))
            .is_some();
        info!(key = %key, replaced, "Registered HTTP command");
    }

    /// Register a command decodable by name from a JSON body.
    pub fn register_internal<C>(&self, name: &str)
    where
        C: Command + DeserializeOwned + 'static,
    {
        let decoder: InternalDecoder = Arc::new(|body| {
            serde_json::from_value::<C>(body)
                .map(|cmd| Box::new(cmd) as Box<dyn Command>)
                .map_err(|e| DomainError::parse(e.to_string()))
        });
        self.internal
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), decoder);
    }

    /// First registered key on the path, with a fresh command for it.
    #[must_use]
    pub fn resolve(&self, candidates: &[String]) -> Option<(String, Box<dyn Command>)> {
        let http = self.http.read().unwrap_or_else(PoisonError::into_inner);
        candidates.iter().find_map(|key| {
            http.get(key).map(|factory| {
                debug!(key = %key, "Resolved command");
                (key.clone(), factory())
            })
        })
    }

    /// Decode the internal command `name` from `body`.
    ///
    /// # Errors
    ///
    /// `CommandNotFound` for an unknown name, `Parse` for a body that does
    /// not fit the command.
    pub fn decode_internal(&self, name: &str, body: Value) -> Result<Box<dyn Command>> {
        let decoder = self
            .internal
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| DomainError::CommandNotFound {
                candidates: vec![name.to_string()],
            })?;
        decoder(body)
    }

    #[must_use]
    pub fn http_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .http
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn internal_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .internal
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
