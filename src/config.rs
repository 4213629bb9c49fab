//! Configuration
//!
//! JSON configuration for the routing service: the router policy (which
//! models the built-in rules select) and the provider catalog. Two
//! case-variant provider lists (`Providers` and `providers`) are honored;
//! entries that are not objects or have no name are skipped with a warning
//! rather than failing the load. The only hard requirement is a non-empty
//! default model.

use crate::provider::Provider;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Long-context threshold used when the configuration does not set one.
pub const DEFAULT_LONG_CONTEXT_THRESHOLD: u64 = 60_000;

/// Configuration errors. Provider-level problems never surface here; they
/// degrade to skipped entries or rule fall-through at routing time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Router.default model is required")]
    MissingDefault,
}

/// Router policy: the model identifiers the built-in rules resolve to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterPolicy {
    /// Model used when no other rule matches.
    #[serde(default)]
    pub default: String,

    /// Model for background-class traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,

    /// Model for requests with extended thinking enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub think: Option<String>,

    /// Model for requests declaring a web-search tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_search: Option<String>,

    /// Model for long-context requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_context: Option<String>,

    /// Token threshold for the long-context rule.
    #[serde(default = "default_long_context_threshold")]
    pub long_context_threshold: u64,

    /// Custom router: a script path, or an `http(s)://` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_router_path: Option<String>,

    /// Replacement text file for the system-prompt rewrite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_path: Option<String>,

    /// Policy keys this router does not interpret, preserved round-trip.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_long_context_threshold() -> u64 {
    DEFAULT_LONG_CONTEXT_THRESHOLD
}

impl Default for RouterPolicy {
    fn default() -> Self {
        Self {
            default: String::new(),
            background: None,
            think: None,
            web_search: None,
            long_context: None,
            long_context_threshold: DEFAULT_LONG_CONTEXT_THRESHOLD,
            custom_router_path: None,
            system_prompt_path: None,
            extra: Map::new(),
        }
    }
}

/// One provider entry as written in the configuration file. The credential
/// is accepted under either spelling (`api_key` or `apiKey`) and normalized
/// to a single internal field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default, alias = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Raw file shape. Provider lists stay untyped here so that malformed
/// entries can be skipped individually instead of failing the whole file.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(rename = "Router", default)]
    router: RouterPolicy,

    #[serde(rename = "Providers", default, deserialize_with = "lenient_array")]
    providers: Vec<Value>,

    #[serde(rename = "providers", default, deserialize_with = "lenient_array")]
    compat_providers: Vec<Value>,

    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// A list value, or an empty list when the key holds something else.
fn lenient_array<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(entries) => Ok(entries),
        _ => Ok(Vec::new()),
    }
}

/// Validated runtime configuration. Providers are materialized once here
/// and shared for the process lifetime, so credential overrides survive
/// across requests.
#[derive(Debug)]
pub struct Config {
    pub router: RouterPolicy,
    /// Providers from the primary-cased list.
    pub providers: Vec<Arc<Provider>>,
    /// Providers from the alternate-cased list.
    pub compat_providers: Vec<Arc<Provider>>,
    /// Top-level keys this service does not interpret.
    pub extra: Map<String, Value>,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Parse and validate configuration from a JSON string.
    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(contents)?;
        let config = Self {
            router: file.router,
            providers: parse_provider_list(&file.providers, "Providers"),
            compat_providers: parse_provider_list(&file.compat_providers, "providers"),
            extra: file.extra,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.router.default.trim().is_empty() {
            return Err(ConfigError::MissingDefault);
        }
        Ok(())
    }

    /// Case-insensitive provider lookup across both lists, primary-cased
    /// list first.
    pub fn find_provider(&self, name: &str) -> Option<&Arc<Provider>> {
        self.providers
            .iter()
            .chain(self.compat_providers.iter())
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Total number of configured provider entries.
    pub fn provider_count(&self) -> usize {
        self.providers.len() + self.compat_providers.len()
    }

    /// Wire representation with every credential redacted, for the
    /// configuration endpoint.
    pub fn redacted(&self) -> Value {
        let mut root = Map::new();
        root.insert(
            "Router".to_string(),
            serde_json::to_value(&self.router).unwrap_or(Value::Null),
        );
        if !self.providers.is_empty() {
            root.insert(
                "Providers".to_string(),
                Value::Array(self.providers.iter().map(|p| redact_provider(p)).collect()),
            );
        }
        if !self.compat_providers.is_empty() {
            root.insert(
                "providers".to_string(),
                Value::Array(
                    self.compat_providers
                        .iter()
                        .map(|p| redact_provider(p))
                        .collect(),
                ),
            );
        }
        for (k, v) in &self.extra {
            root.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Value::Object(root)
    }
}

fn parse_provider_list(entries: &[Value], list: &str) -> Vec<Arc<Provider>> {
    let mut providers = Vec::new();
    for entry in entries {
        if !entry.is_object() {
            tracing::warn!(list, "skipping non-object provider entry");
            continue;
        }
        let parsed: ProviderConfig = match serde_json::from_value(entry.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(list, error = %e, "skipping malformed provider entry");
                continue;
            }
        };
        if parsed.name.trim().is_empty() {
            tracing::warn!(list, "skipping provider entry without a name");
            continue;
        }
        providers.push(Arc::new(Provider::from_config(parsed)));
    }
    providers
}

fn redact_provider(provider: &Provider) -> Value {
    let mut value = provider.to_value();
    if let Some(map) = value.as_object_mut() {
        for field in ["api_key", "apiKey"] {
            if let Some(Value::String(key)) = map.get_mut(field) {
                *key = redact_key(key);
            }
        }
    }
    value
}

/// Mask a credential for display. Environment-variable references are left
/// readable; short keys are fully masked.
pub fn redact_key(key: &str) -> String {
    if key.starts_with('$') {
        return key.to_string();
    }
    if key.chars().count() <= 12 {
        return "***".to_string();
    }
    let head: String = key.chars().take(4).collect();
    let tail_rev: Vec<char> = key.chars().rev().take(4).collect();
    let tail: String = tail_rev.into_iter().rev().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_both_lists_and_credential_spellings() {
        let config = Config::from_json_str(
            &json!({
                "Router": {
                    "default": "openai,gpt-4",
                    "longContext": "anthropic,claude-long",
                    "longContextThreshold": 80000
                },
                "Providers": [
                    {"name": "openai", "api_key": "sk-under", "models": ["gpt-4"]}
                ],
                "providers": [
                    {"name": "anthropic", "apiKey": "sk-camel", "models": ["claude-long"]}
                ]
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(config.router.default, "openai,gpt-4");
        assert_eq!(config.router.long_context_threshold, 80_000);
        assert_eq!(config.providers.len(), 1);
        assert_eq!(
            config.compat_providers[0].current_key().as_deref(),
            Some("sk-camel")
        );
    }

    #[test]
    fn threshold_defaults_when_missing() {
        let config =
            Config::from_json_str(&json!({"Router": {"default": "m"}}).to_string()).unwrap();
        assert_eq!(
            config.router.long_context_threshold,
            DEFAULT_LONG_CONTEXT_THRESHOLD
        );
    }

    #[test]
    fn skips_unusable_provider_entries() {
        let config = Config::from_json_str(
            &json!({
                "Router": {"default": "m"},
                "Providers": [
                    "not-an-object",
                    {"models": ["orphan"]},
                    {"name": "   "},
                    {"name": "kept", "models": ["a"]},
                    {"name": "bad-models", "models": "not-a-list"}
                ],
                "providers": "ignored-entirely"
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].name, "kept");
        assert!(config.compat_providers.is_empty());
    }

    #[test]
    fn missing_default_model_is_rejected() {
        let err = Config::from_json_str(&json!({"Router": {"default": "  "}}).to_string())
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingDefault));
    }

    #[test]
    fn load_from_file_reports_path_on_read_error() {
        let err = Config::load_from_file("/definitely/not/here.json").unwrap_err();
        match err {
            ConfigError::Read { path, .. } => assert!(path.contains("not/here.json")),
            other => panic!("expected read error, got {other}"),
        }
    }

    #[test]
    fn load_from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            json!({
                "Router": {"default": "openai,gpt-4"},
                "Providers": [{"name": "openai", "api_key": "sk-x", "models": ["gpt-4"]}]
            })
            .to_string(),
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.provider_count(), 1);
    }

    #[test]
    fn find_provider_is_case_insensitive_and_prefers_primary_list() {
        let config = Config::from_json_str(
            &json!({
                "Router": {"default": "m"},
                "Providers": [{"name": "OpenAI", "api_key": "sk-primary"}],
                "providers": [{"name": "openai", "api_key": "sk-compat"}]
            })
            .to_string(),
        )
        .unwrap();

        let found = config.find_provider("OPENAI").unwrap();
        assert_eq!(found.current_key().as_deref(), Some("sk-primary"));
    }

    #[test]
    fn redaction_masks_keys_under_both_spellings() {
        let config = Config::from_json_str(
            &json!({
                "Router": {"default": "m"},
                "Providers": [
                    {"name": "long", "api_key": "sk-abcdefghijklmnop"},
                    {"name": "short", "api_key": "sk-tiny"},
                    {"name": "env", "api_key": "$OPENAI_API_KEY"}
                ]
            })
            .to_string(),
        )
        .unwrap();

        let value = config.redacted();
        let entries = value["Providers"].as_array().unwrap();
        assert_eq!(entries[0]["api_key"], json!("sk-a...mnop"));
        assert_eq!(entries[0]["apiKey"], json!("sk-a...mnop"));
        assert_eq!(entries[1]["api_key"], json!("***"));
        assert_eq!(entries[2]["api_key"], json!("$OPENAI_API_KEY"));
    }
}
