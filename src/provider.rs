//! Provider Runtime State
//!
//! Providers are materialized once at configuration load and shared across
//! requests for the process lifetime. Each carries a credential cell: the
//! currently effective key, a lazily captured snapshot of the original key,
//! and a stack of temporary overrides. The cell is mutated only by the
//! overlay operations in [`crate::overlay`].
//!
//! [`collect_targets`] builds the per-request registry view: providers
//! grouped by name, duplicates across the two declared lists collapsed into
//! one logical target with multiple physical references.

use crate::config::{Config, ProviderConfig};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// One temporary credential override, tagged by the request that applied it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideEntry {
    pub request_id: String,
    pub new_key: String,
}

/// Mutable credential cell of a provider.
#[derive(Debug, Default)]
pub(crate) struct CredentialState {
    /// Key currently visible through the provider's credential field.
    pub(crate) current: Option<String>,
    /// Original key, captured once before the first override.
    pub(crate) original: Option<String>,
    /// Whether `original` has been captured.
    pub(crate) snapshotted: bool,
    /// Override stack; the top always matches `current` once non-empty.
    pub(crate) stack: Vec<OverrideEntry>,
}

/// A configured provider.
#[derive(Debug)]
pub struct Provider {
    pub name: String,
    pub models: Vec<String>,
    pub api_base_url: Option<String>,
    extra: Map<String, Value>,
    state: Mutex<CredentialState>,
}

impl Provider {
    /// Build the runtime provider from a parsed configuration entry.
    pub fn from_config(cfg: ProviderConfig) -> Self {
        Self {
            name: cfg.name,
            models: cfg.models,
            api_base_url: cfg.api_base_url,
            extra: cfg.extra,
            state: Mutex::new(CredentialState {
                current: cfg.api_key,
                ..CredentialState::default()
            }),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, CredentialState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Key currently visible through the credential field.
    pub fn current_key(&self) -> Option<String> {
        self.lock_state().current.clone()
    }

    /// Effective credential: top of the override stack, else the raw field.
    pub fn effective_key(&self) -> Option<String> {
        let state = self.lock_state();
        state
            .stack
            .last()
            .map(|entry| entry.new_key.clone())
            .or_else(|| state.current.clone())
    }

    /// Number of overrides currently stacked.
    pub fn override_depth(&self) -> usize {
        self.lock_state().stack.len()
    }

    /// Wire representation. The credential is emitted under both accepted
    /// spellings so either consumer convention sees the same value.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".to_string(), Value::String(self.name.clone()));
        if let Some(base_url) = &self.api_base_url {
            map.insert("api_base_url".to_string(), Value::String(base_url.clone()));
        }
        if let Some(key) = self.current_key() {
            map.insert("api_key".to_string(), Value::String(key.clone()));
            map.insert("apiKey".to_string(), Value::String(key));
        }
        if !self.models.is_empty() {
            map.insert(
                "models".to_string(),
                Value::Array(self.models.iter().cloned().map(Value::String).collect()),
            );
        }
        for (k, v) in &self.extra {
            map.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Value::Object(map)
    }
}

/// Per-request grouping of every physical provider sharing a name.
/// `primary` is the first-seen entry and is always a member of
/// `references`.
#[derive(Debug, Clone)]
pub struct ProviderTarget {
    pub name: String,
    pub primary: Arc<Provider>,
    pub references: Vec<Arc<Provider>>,
}

/// Group the configured providers by name, in first-seen order across the
/// primary-cased list and then the alternate-cased list. References are
/// deduplicated by object identity, not value equality.
pub fn collect_targets(config: &Config) -> Vec<ProviderTarget> {
    let mut targets: Vec<ProviderTarget> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for provider in config.providers.iter().chain(config.compat_providers.iter()) {
        if provider.name.is_empty() {
            continue;
        }
        match index.get(provider.name.as_str()) {
            Some(&at) => {
                let target = &mut targets[at];
                if !target.references.iter().any(|r| Arc::ptr_eq(r, provider)) {
                    target.references.push(Arc::clone(provider));
                }
            }
            None => {
                index.insert(provider.name.clone(), targets.len());
                targets.push(ProviderTarget {
                    name: provider.name.clone(),
                    primary: Arc::clone(provider),
                    references: vec![Arc::clone(provider)],
                });
            }
        }
    }

    targets
}
