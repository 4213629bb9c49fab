//! Session Tracking
//!
//! - Recovers the session id a client folded into `metadata.user_id`.
//! - Keeps a TTL cache of the most recent reported token usage per
//!   session, which the long-context rule reads on the next request.
//!
//! Entries expire 30 minutes after their last write; reads of expired
//! entries remove them, and each write sweeps whatever else has lapsed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::models::Metadata;

/// Delimiter between the caller id and the session id inside
/// `metadata.user_id`.
pub const SESSION_DELIMITER: &str = "_session_";

/// Pull the session id out of request metadata, if the client folded one
/// into `user_id`. An empty remainder after the delimiter counts as
/// absent.
pub fn resolve_session_id(metadata: Option<&Metadata>) -> Option<String> {
    let user_id = metadata?.user_id.as_deref()?;
    let (_, session_id) = user_id.split_once(SESSION_DELIMITER)?;
    if session_id.is_empty() {
        return None;
    }
    Some(session_id.to_string())
}

/// Reported usage for one completed request, as delivered by the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionUsage {
    #[serde(default)]
    pub input_tokens: u64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

struct CacheEntry {
    usage: SessionUsage,
    expires_at: Instant,
}

/// TTL cache of last-known usage per session id.
#[derive(Clone)]
pub struct SessionUsageCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

impl Default for SessionUsageCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(30 * 60))
    }
}

impl SessionUsageCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Last reported usage for a session, if it has not expired.
    pub fn get(&self, session_id: &str) -> Option<SessionUsage> {
        let mut entries = self.entries.lock().ok()?;
        if let Some(entry) = entries.get(session_id) {
            if entry.expires_at > Instant::now() {
                return Some(entry.usage.clone());
            }
            entries.remove(session_id);
        }
        None
    }

    /// Record usage for a session, refreshing its expiry.
    pub fn put(&self, session_id: &str, usage: SessionUsage) {
        if let Ok(mut entries) = self.entries.lock() {
            let now = Instant::now();
            entries.retain(|_, entry| entry.expires_at > now);
            entries.insert(
                session_id.to_string(),
                CacheEntry {
                    usage,
                    expires_at: now + self.ttl,
                },
            );
        }
    }

    /// Drop every expired entry.
    pub fn evict_expired(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            let now = Instant::now();
            entries.retain(|_, entry| entry.expires_at > now);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
