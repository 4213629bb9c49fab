//! Credential Overlay
//!
//! Applies caller-supplied bearer tokens as temporary per-provider
//! credential overrides, and unwinds them later by request id. Overrides
//! stack: concurrent requests may each push one, and each is restored
//! independently. The original credential is captured once, before the
//! first override, and is what the last restore falls back to.
//!
//! All mutation happens under the target primary's lock, including the
//! rewrite of every physical reference, so readers never observe a stack
//! top that disagrees with the visible credential. Reference sets of
//! distinct targets are disjoint, which keeps the primary-then-reference
//! lock order free of cycles.
//!
//! Nothing here returns an error: blank tokens and already-effective
//! tokens are no-ops, and a missing provider-service collaborator just
//! means there is nothing further to notify.

use crate::provider::{OverrideEntry, Provider, ProviderTarget};
use std::sync::Arc;

/// Collaborator notified when a live provider's credential changes.
/// Notification is best-effort: it only happens for providers the service
/// already knows about.
pub trait ProviderService: Send + Sync {
    /// Look up a live provider by name.
    fn get_provider(&self, name: &str) -> Option<Arc<Provider>>;

    /// Push a credential change for a live provider.
    fn update_provider(&self, name: &str, api_key: Option<&str>);
}

/// Record of one applied override; carries everything a later restore
/// needs.
#[derive(Debug, Clone)]
pub struct AppliedOverride {
    pub target: ProviderTarget,
    pub request_id: String,
}

/// Apply `token` as a credential override on one target. Returns whether
/// anything changed: blank tokens and tokens already effective for the
/// provider are no-ops, which keeps repeated application within one
/// request from stacking duplicates.
pub fn apply_override(
    target: &ProviderTarget,
    token: &str,
    request_id: &str,
    service: Option<&dyn ProviderService>,
) -> bool {
    let token = token.trim();
    if token.is_empty() {
        return false;
    }

    {
        let mut state = target.primary.lock_state();
        let effective = state
            .stack
            .last()
            .map(|entry| entry.new_key.as_str())
            .or(state.current.as_deref());
        if effective == Some(token) {
            return false;
        }

        if !state.snapshotted {
            state.original = state.current.clone();
            state.snapshotted = true;
        }
        state.stack.push(OverrideEntry {
            request_id: request_id.to_string(),
            new_key: token.to_string(),
        });
        state.current = Some(token.to_string());

        for reference in &target.references {
            if Arc::ptr_eq(reference, &target.primary) {
                continue;
            }
            reference.lock_state().current = Some(token.to_string());
        }
    }

    notify_service(service, &target.name, Some(token));
    true
}

/// The overlay pass: apply one bearer token across every target, returning
/// the records needed to restore each affected provider later.
pub fn apply_overrides(
    targets: &[ProviderTarget],
    token: &str,
    request_id: &str,
    service: Option<&dyn ProviderService>,
) -> Vec<AppliedOverride> {
    let mut applied = Vec::new();
    for target in targets {
        if apply_override(target, token, request_id, service) {
            applied.push(AppliedOverride {
                target: target.clone(),
                request_id: request_id.to_string(),
            });
        }
    }
    if !applied.is_empty() {
        tracing::info!(
            request_id,
            providers = applied.len(),
            "applied credential override"
        );
    }
    applied
}

/// Remove every override entry tagged with `request_id` from one target
/// and re-expose the next effective credential (new stack top, else the
/// captured original). Returns the number of entries removed.
pub fn restore_override(
    target: &ProviderTarget,
    request_id: &str,
    service: Option<&dyn ProviderService>,
) -> usize {
    let (removed, restored_key) = {
        let mut state = target.primary.lock_state();
        let before = state.stack.len();
        state.stack.retain(|entry| entry.request_id != request_id);
        let removed = before - state.stack.len();
        if removed == 0 {
            return 0;
        }

        let restored = state
            .stack
            .last()
            .map(|entry| entry.new_key.clone())
            .or_else(|| state.original.clone());
        state.current = restored.clone();

        for reference in &target.references {
            if Arc::ptr_eq(reference, &target.primary) {
                continue;
            }
            reference.lock_state().current = restored.clone();
        }
        (removed, restored)
    };

    notify_service(service, &target.name, restored_key.as_deref());
    removed
}

/// Unwind a request's overrides across every target. Returns the total
/// number of entries removed; zero when the request id is unknown.
pub fn restore_overrides(
    targets: &[ProviderTarget],
    request_id: &str,
    service: Option<&dyn ProviderService>,
) -> usize {
    let mut removed = 0;
    for target in targets {
        removed += restore_override(target, request_id, service);
    }
    if removed > 0 {
        tracing::info!(request_id, entries = removed, "restored credential overrides");
    }
    removed
}

fn notify_service(service: Option<&dyn ProviderService>, name: &str, api_key: Option<&str>) {
    let Some(service) = service else {
        return;
    };
    if service.get_provider(name).is_some() {
        service.update_provider(name, api_key);
    }
}
