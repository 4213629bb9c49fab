//! Routing Engine
//!
//! Decides which provider/model serves a chat-completion request. A
//! configured custom router gets the first word; otherwise the built-in
//! rules run in a fixed order, first match wins:
//!
//! 1. explicit `"provider,model"` in the requested model
//! 2. long context (by estimated size, or recent session usage)
//! 3. subagent directive embedded in the system prompt
//! 4. background-class model names
//! 5. extended thinking requested
//! 6. a declared web-search tool
//! 7. the configured default
//!
//! Routing also applies bearer-token credential overrides on the way in
//! and performs the system-prompt environment rewrite on the way out, so
//! one call carries a request from "as received" to "ready to forward".

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::config::Config;
use crate::custom::CustomRouter;
use crate::models::{ChatRequest, SystemPrompt, SystemText, ToolDecl};
use crate::overlay::{apply_overrides, restore_overrides, AppliedOverride, ProviderService};
use crate::provider::collect_targets;
use crate::session::{resolve_session_id, SessionUsage, SessionUsageCache};
use crate::tokens::TokenEstimator;

/// Request size above which heavy recent session usage promotes to the
/// long-context model.
pub const LONG_CONTEXT_TOKEN_FLOOR: u64 = 20_000;

/// Model-name prefix that marks background-class traffic.
pub const BACKGROUND_MODEL_PREFIX: &str = "claude-3-5-haiku";

/// Tool-type prefix that marks a web-search capable request.
pub const WEB_SEARCH_TOOL_PREFIX: &str = "web_search";

const SUBAGENT_OPEN: &str = "<CCR-SUBAGENT-MODEL>";
const ENV_MARKER: &str = "<env>";

static SUBAGENT_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<CCR-SUBAGENT-MODEL>(.*?)</CCR-SUBAGENT-MODEL>")
        .expect("subagent directive pattern is valid")
});

/// Which rule produced a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteRule {
    Custom,
    Explicit,
    LongContext,
    Subagent,
    Background,
    Think,
    WebSearch,
    Default,
}

impl RouteRule {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteRule::Custom => "custom",
            RouteRule::Explicit => "explicit",
            RouteRule::LongContext => "long_context",
            RouteRule::Subagent => "subagent",
            RouteRule::Background => "background",
            RouteRule::Think => "think",
            RouteRule::WebSearch => "web_search",
            RouteRule::Default => "default",
        }
    }
}

impl std::fmt::Display for RouteRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one routing pass decided.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    /// Final model identifier, also written back into the request.
    pub model: String,

    /// The rule that picked it.
    pub rule: RouteRule,

    /// Session id recovered from request metadata.
    pub session_id: Option<String>,

    /// Estimated prompt size in tokens.
    pub token_count: u64,

    /// Credential overrides applied on the way in.
    pub overrides: Vec<AppliedOverride>,
}

/// The routing engine. Holds the policy, a token estimator, the
/// per-session usage cache, and the optional custom router and
/// provider-service collaborators.
pub struct RequestRouter {
    config: Arc<Config>,
    estimator: TokenEstimator,
    usage_cache: SessionUsageCache,
    custom: Option<Arc<dyn CustomRouter>>,
    provider_service: Option<Arc<dyn ProviderService>>,
}

impl RequestRouter {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            estimator: TokenEstimator::default(),
            usage_cache: SessionUsageCache::default(),
            custom: None,
            provider_service: None,
        }
    }

    pub fn with_custom_router(mut self, custom: Option<Arc<dyn CustomRouter>>) -> Self {
        self.custom = custom;
        self
    }

    pub fn with_provider_service(mut self, service: Option<Arc<dyn ProviderService>>) -> Self {
        self.provider_service = service;
        self
    }

    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_usage_cache(mut self, cache: SessionUsageCache) -> Self {
        self.usage_cache = cache;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn usage_cache(&self) -> &SessionUsageCache {
        &self.usage_cache
    }

    /// Record reported usage for a session, feeding the long-context rule
    /// on that session's next request.
    pub fn record_usage(&self, session_id: &str, usage: SessionUsage) {
        self.usage_cache.put(session_id, usage);
    }

    /// Unwind every credential override tagged with `request_id`. Returns
    /// the number of override entries removed.
    pub fn restore(&self, request_id: &str) -> usize {
        let targets = collect_targets(&self.config);
        restore_overrides(&targets, request_id, self.provider_service.as_deref())
    }

    /// Route one request: resolve its session, apply any bearer override,
    /// pick a model, write it into `request.model`, and run the
    /// system-prompt rewrite. The request is left ready to forward.
    pub async fn route(
        &self,
        request: &mut ChatRequest,
        bearer: Option<&str>,
        request_id: &str,
    ) -> RouteOutcome {
        let session_id = resolve_session_id(request.metadata.as_ref());
        request.session_id = session_id.clone();

        let overrides = match bearer {
            Some(token) => {
                let targets = collect_targets(&self.config);
                apply_overrides(
                    &targets,
                    token,
                    request_id,
                    self.provider_service.as_deref(),
                )
            }
            None => Vec::new(),
        };

        let token_count = self.estimator.estimate_request(request);
        let last_usage = session_id
            .as_deref()
            .and_then(|id| self.usage_cache.get(id));

        let decided = match &self.custom {
            Some(custom) => match custom.decide(request, &self.config.router).await {
                Ok(Some(model)) => {
                    let model = model.trim();
                    if model.is_empty() {
                        None
                    } else {
                        Some(model.to_string())
                    }
                }
                Ok(None) => None,
                Err(error) => {
                    tracing::warn!(request_id, %error, "custom router failed, using built-in rules");
                    None
                }
            },
            None => None,
        };

        let (model, rule) = match decided {
            Some(model) => (model, RouteRule::Custom),
            None => self.select_model(request, token_count, last_usage.as_ref()),
        };

        request.model = model.clone();
        self.rewrite_system_prompt(request).await;

        RouteOutcome {
            model,
            rule,
            session_id,
            token_count,
            overrides,
        }
    }

    /// The built-in rule chain.
    fn select_model(
        &self,
        request: &mut ChatRequest,
        token_count: u64,
        last_usage: Option<&SessionUsage>,
    ) -> (String, RouteRule) {
        let policy = &self.config.router;

        if request.model.contains(',') {
            return self.resolve_explicit(&request.model);
        }

        let threshold = policy.long_context_threshold;
        let session_over = last_usage
            .map(|usage| usage.input_tokens > threshold)
            .unwrap_or(false);
        if (session_over && token_count > LONG_CONTEXT_TOKEN_FLOOR) || token_count > threshold {
            if let Some(model) = configured(policy.long_context.as_deref()) {
                tracing::info!(token_count, threshold, "routing to long-context model");
                return (model.to_string(), RouteRule::LongContext);
            }
        }

        if let Some(model) = take_subagent_directive(request) {
            return (model, RouteRule::Subagent);
        }

        if request.model.starts_with(BACKGROUND_MODEL_PREFIX) {
            if let Some(model) = configured(policy.background.as_deref()) {
                tracing::info!(requested = %request.model, "routing to background model");
                return (model.to_string(), RouteRule::Background);
            }
        }

        if request.thinking.is_some() {
            if let Some(model) = configured(policy.think.as_deref()) {
                tracing::info!("routing to think model");
                return (model.to_string(), RouteRule::Think);
            }
        }

        if declares_web_search(request.tools.as_deref()) {
            if let Some(model) = configured(policy.web_search.as_deref()) {
                return (model.to_string(), RouteRule::WebSearch);
            }
        }

        (policy.default.clone(), RouteRule::Default)
    }

    /// Resolve an explicit `"provider,model"` selection against the
    /// registry. Both halves match case-insensitively and come back in
    /// the configuration's casing; an unmatched selection passes through
    /// unchanged, and in both cases no later rule runs.
    fn resolve_explicit(&self, raw: &str) -> (String, RouteRule) {
        let mut parts = raw.split(',');
        let provider_part = parts.next().unwrap_or("");
        let model_part = parts.next().unwrap_or("");

        if let Some(provider) = self.config.find_provider(provider_part) {
            if let Some(model) = provider
                .models
                .iter()
                .find(|model| model.eq_ignore_ascii_case(model_part))
            {
                return (format!("{},{}", provider.name, model), RouteRule::Explicit);
            }
        }
        (raw.to_string(), RouteRule::Explicit)
    }

    /// When a replacement system prompt is configured and the second
    /// system segment carries an `<env>` block, swap everything before
    /// the marker for the file's content. Read failures log and leave
    /// the prompt alone.
    async fn rewrite_system_prompt(&self, request: &mut ChatRequest) {
        let Some(path) = configured(self.config.router.system_prompt_path.as_deref()) else {
            return;
        };
        let Some(SystemPrompt::Segments(segments)) = request.system.as_mut() else {
            return;
        };
        let Some(segment) = segments.get_mut(1) else {
            return;
        };
        let SystemText::One(text) = &mut segment.text else {
            return;
        };
        let Some(marker) = text.find(ENV_MARKER) else {
            return;
        };

        match tokio::fs::read_to_string(path).await {
            Ok(replacement) => {
                let mut rebuilt = replacement;
                rebuilt.push_str(&text[marker..]);
                *text = rebuilt;
            }
            Err(error) => {
                tracing::warn!(path, %error, "failed to read system prompt replacement");
            }
        }
    }
}

/// A model slot counts as configured only when it holds a non-blank name.
fn configured(slot: Option<&str>) -> Option<&str> {
    slot.map(str::trim).filter(|slot| !slot.is_empty())
}

/// Pull a subagent directive out of the second system segment. The
/// segment must start with the directive marker; the directive is removed
/// from the prompt and its payload returned. An empty payload counts as
/// no directive and leaves the prompt untouched.
fn take_subagent_directive(request: &mut ChatRequest) -> Option<String> {
    let Some(SystemPrompt::Segments(segments)) = request.system.as_mut() else {
        return None;
    };
    let segment = segments.get_mut(1)?;
    let SystemText::One(text) = &mut segment.text else {
        return None;
    };
    if !text.starts_with(SUBAGENT_OPEN) {
        return None;
    }

    let (model, directive) = {
        let captures = SUBAGENT_DIRECTIVE.captures(text)?;
        let model = captures.get(1)?.as_str().to_string();
        let directive = captures.get(0)?.as_str().to_string();
        (model, directive)
    };
    if model.is_empty() {
        return None;
    }

    *text = text.replacen(&directive, "", 1);
    Some(model)
}

fn declares_web_search(tools: Option<&[ToolDecl]>) -> bool {
    let Some(tools) = tools else {
        return false;
    };
    tools.iter().any(|tool| match tool {
        ToolDecl::Tool(tool) => tool
            .kind
            .as_deref()
            .map(|kind| kind.starts_with(WEB_SEARCH_TOOL_PREFIX))
            .unwrap_or(false),
        ToolDecl::Other(_) => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterPolicy;
    use crate::custom::CustomRouterError;
    use crate::tokens::TokenEncoder;
    use async_trait::async_trait;
    use serde_json::json;

    struct WordEncoder;

    impl TokenEncoder for WordEncoder {
        fn encoded_len(&self, text: &str) -> u64 {
            text.split_whitespace().count() as u64
        }
    }

    fn full_policy() -> serde_json::Value {
        json!({
            "Router": {
                "default": "deepseek,deepseek-chat",
                "background": "ollama,qwen2.5-coder:latest",
                "think": "deepseek,deepseek-reasoner",
                "webSearch": "gemini,gemini-2.5-flash",
                "longContext": "openrouter,google/gemini-2.5-pro-preview",
                "longContextThreshold": 60000
            },
            "Providers": [
                {"name": "openai", "api_key": "sk-static", "models": ["gpt-4", "gpt-4o"]},
                {"name": "deepseek", "api_key": "sk-ds", "models": ["deepseek-chat", "deepseek-reasoner"]}
            ]
        })
    }

    fn router_for(mut config: serde_json::Value, patch: serde_json::Value) -> RequestRouter {
        if let (Some(router), Some(patch)) = (
            config.get_mut("Router").and_then(|r| r.as_object_mut()),
            patch.as_object(),
        ) {
            for (key, value) in patch {
                router.insert(key.clone(), value.clone());
            }
        }
        let config = Arc::new(Config::from_json_str(&config.to_string()).unwrap());
        RequestRouter::new(config).with_estimator(TokenEstimator::new(Arc::new(WordEncoder)))
    }

    fn router() -> RequestRouter {
        router_for(full_policy(), json!({}))
    }

    fn request(body: serde_json::Value) -> ChatRequest {
        serde_json::from_value(body).unwrap()
    }

    fn simple_request(model: &str, text: &str) -> ChatRequest {
        request(json!({
            "model": model,
            "messages": [{"role": "user", "content": text}]
        }))
    }

    #[tokio::test]
    async fn default_rule_rewrites_the_model() {
        let router = router();
        let mut req = simple_request("claude-sonnet-4-20250514", "hello there");

        let outcome = router.route(&mut req, None, "req-1").await;

        assert_eq!(outcome.model, "deepseek,deepseek-chat");
        assert_eq!(outcome.rule, RouteRule::Default);
        assert_eq!(req.model, "deepseek,deepseek-chat");
        assert_eq!(outcome.token_count, 2);
    }

    #[tokio::test]
    async fn explicit_selection_is_canonicalized() {
        let router = router();
        let mut req = simple_request("OpenAI,GPT-4", "hi");

        let outcome = router.route(&mut req, None, "req-1").await;

        assert_eq!(outcome.model, "openai,gpt-4");
        assert_eq!(outcome.rule, RouteRule::Explicit);
    }

    #[tokio::test]
    async fn unmatched_explicit_selection_passes_through() {
        let router = router();

        let mut req = simple_request("openai,no-such-model", "hi");
        let outcome = router.route(&mut req, None, "req-1").await;
        assert_eq!(outcome.model, "openai,no-such-model");

        let mut req = simple_request("unknown,gpt-4", "hi");
        let outcome = router.route(&mut req, None, "req-2").await;
        assert_eq!(outcome.model, "unknown,gpt-4");
        assert_eq!(outcome.rule, RouteRule::Explicit);
    }

    #[tokio::test]
    async fn explicit_selection_preempts_every_other_rule() {
        let router = router();
        let mut req = request(json!({
            "model": "openai,gpt-4o",
            "thinking": {"type": "enabled", "budget_tokens": 1024},
            "messages": [{"role": "user", "content": "hi"}]
        }));

        let outcome = router.route(&mut req, None, "req-1").await;

        assert_eq!(outcome.model, "openai,gpt-4o");
        assert_eq!(outcome.rule, RouteRule::Explicit);
    }

    #[tokio::test]
    async fn token_count_above_threshold_routes_long_context() {
        let router = router_for(full_policy(), json!({"longContextThreshold": 10}));

        let mut req = simple_request("claude-sonnet-4-20250514", &"word ".repeat(11));
        let outcome = router.route(&mut req, None, "req-1").await;
        assert_eq!(outcome.rule, RouteRule::LongContext);
        assert_eq!(outcome.model, "openrouter,google/gemini-2.5-pro-preview");

        // Exactly at the threshold stays on the default model.
        let mut req = simple_request("claude-sonnet-4-20250514", &"word ".repeat(10));
        let outcome = router.route(&mut req, None, "req-2").await;
        assert_eq!(outcome.rule, RouteRule::Default);
    }

    #[tokio::test]
    async fn heavy_session_usage_routes_long_context_above_the_floor() {
        let router = router_for(full_policy(), json!({"longContextThreshold": 100_000}));
        router.record_usage(
            "sess-1",
            serde_json::from_value(json!({"input_tokens": 200_000})).unwrap(),
        );

        // 20_001 words: above the floor, but well under the threshold.
        let mut req = request(json!({
            "model": "claude-sonnet-4-20250514",
            "metadata": {"user_id": "acct_session_sess-1"},
            "messages": [{"role": "user", "content": "w ".repeat(20_001)}]
        }));
        let outcome = router.route(&mut req, None, "req-1").await;
        assert_eq!(outcome.rule, RouteRule::LongContext);
        assert_eq!(outcome.session_id.as_deref(), Some("sess-1"));

        // Below the floor the session usage alone is not enough.
        let mut req = request(json!({
            "model": "claude-sonnet-4-20250514",
            "metadata": {"user_id": "acct_session_sess-1"},
            "messages": [{"role": "user", "content": "small request"}]
        }));
        let outcome = router.route(&mut req, None, "req-2").await;
        assert_eq!(outcome.rule, RouteRule::Default);
    }

    #[tokio::test]
    async fn subagent_directive_wins_and_is_stripped() {
        let router = router();
        let mut req = request(json!({
            "model": "claude-sonnet-4-20250514",
            "system": [
                {"type": "text", "text": "You are Claude Code."},
                {"type": "text", "text": "<CCR-SUBAGENT-MODEL>openai,gpt-4o</CCR-SUBAGENT-MODEL> Review the diff."}
            ],
            "messages": [{"role": "user", "content": "go"}]
        }));

        let outcome = router.route(&mut req, None, "req-1").await;

        assert_eq!(outcome.model, "openai,gpt-4o");
        assert_eq!(outcome.rule, RouteRule::Subagent);
        let Some(SystemPrompt::Segments(segments)) = &req.system else {
            panic!("system prompt shape changed");
        };
        let SystemText::One(text) = &segments[1].text else {
            panic!("segment text shape changed");
        };
        assert_eq!(text, " Review the diff.");
    }

    #[tokio::test]
    async fn subagent_directive_matches_across_lines() {
        let router = router();
        let mut req = request(json!({
            "model": "m",
            "system": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "<CCR-SUBAGENT-MODEL>line1\nline2</CCR-SUBAGENT-MODEL>"}
            ]
        }));

        let outcome = router.route(&mut req, None, "req-1").await;
        assert_eq!(outcome.model, "line1\nline2");
    }

    #[tokio::test]
    async fn subagent_directive_requires_second_segment_prefix() {
        let router = router();

        // Directive not at the start of the segment.
        let mut req = request(json!({
            "model": "m",
            "system": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "note <CCR-SUBAGENT-MODEL>x</CCR-SUBAGENT-MODEL>"}
            ]
        }));
        let outcome = router.route(&mut req, None, "req-1").await;
        assert_eq!(outcome.rule, RouteRule::Default);

        // Directive in the first segment only.
        let mut req = request(json!({
            "model": "m",
            "system": [{"type": "text", "text": "<CCR-SUBAGENT-MODEL>x</CCR-SUBAGENT-MODEL>"}]
        }));
        let outcome = router.route(&mut req, None, "req-2").await;
        assert_eq!(outcome.rule, RouteRule::Default);
    }

    #[tokio::test]
    async fn empty_subagent_directive_is_ignored_and_kept() {
        let router = router();
        let original = "<CCR-SUBAGENT-MODEL></CCR-SUBAGENT-MODEL> prompt";
        let mut req = request(json!({
            "model": "m",
            "system": [{"type": "text", "text": "first"}, {"type": "text", "text": original}]
        }));

        let outcome = router.route(&mut req, None, "req-1").await;

        assert_eq!(outcome.rule, RouteRule::Default);
        let Some(SystemPrompt::Segments(segments)) = &req.system else {
            panic!("system prompt shape changed");
        };
        let SystemText::One(text) = &segments[1].text else {
            panic!("segment text shape changed");
        };
        assert_eq!(text, original);
    }

    #[tokio::test]
    async fn haiku_models_route_to_background() {
        let router = router();
        let mut req = simple_request("claude-3-5-haiku-20241022", "ping");

        let outcome = router.route(&mut req, None, "req-1").await;

        assert_eq!(outcome.model, "ollama,qwen2.5-coder:latest");
        assert_eq!(outcome.rule, RouteRule::Background);
    }

    #[tokio::test]
    async fn thinking_routes_to_think_model() {
        let router = router();
        let mut req = request(json!({
            "model": "claude-sonnet-4-20250514",
            "thinking": {"type": "enabled", "budget_tokens": 2048},
            "messages": [{"role": "user", "content": "prove it"}]
        }));

        let outcome = router.route(&mut req, None, "req-1").await;

        assert_eq!(outcome.model, "deepseek,deepseek-reasoner");
        assert_eq!(outcome.rule, RouteRule::Think);
    }

    #[tokio::test]
    async fn web_search_tools_route_to_web_search_model() {
        let router = router();
        let mut req = request(json!({
            "model": "claude-sonnet-4-20250514",
            "tools": [
                {"name": "calculator", "type": "custom"},
                {"name": "web_search", "type": "web_search_20250305"}
            ],
            "messages": [{"role": "user", "content": "latest news"}]
        }));

        let outcome = router.route(&mut req, None, "req-1").await;

        assert_eq!(outcome.model, "gemini,gemini-2.5-flash");
        assert_eq!(outcome.rule, RouteRule::WebSearch);
    }

    #[tokio::test]
    async fn unconfigured_slots_fall_through_to_default() {
        let router = router_for(
            full_policy(),
            json!({"background": null, "think": "", "webSearch": null}),
        );

        let mut req = simple_request("claude-3-5-haiku-20241022", "ping");
        let outcome = router.route(&mut req, None, "req-1").await;
        assert_eq!(outcome.rule, RouteRule::Default);

        let mut req = request(json!({
            "model": "m",
            "thinking": {"type": "enabled"},
            "messages": [{"role": "user", "content": "x"}]
        }));
        let outcome = router.route(&mut req, None, "req-2").await;
        assert_eq!(outcome.rule, RouteRule::Default);
    }

    #[tokio::test]
    async fn rule_order_is_stable() {
        // Long context beats a subagent directive, and the directive is
        // left in place for the downstream model.
        let long_router = router_for(full_policy(), json!({"longContextThreshold": 3}));
        let directive = "<CCR-SUBAGENT-MODEL>openai,gpt-4</CCR-SUBAGENT-MODEL> rest";
        let mut req = request(json!({
            "model": "claude-sonnet-4-20250514",
            "system": [{"type": "text", "text": "first"}, {"type": "text", "text": directive}],
            "messages": [{"role": "user", "content": "one two three four five"}]
        }));
        let outcome = long_router.route(&mut req, None, "req-1").await;
        assert_eq!(outcome.rule, RouteRule::LongContext);
        let Some(SystemPrompt::Segments(segments)) = &req.system else {
            panic!("system prompt shape changed");
        };
        let SystemText::One(text) = &segments[1].text else {
            panic!("segment text shape changed");
        };
        assert_eq!(text, directive);

        // Subagent beats background.
        let router = router();
        let mut req = request(json!({
            "model": "claude-3-5-haiku-20241022",
            "system": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "<CCR-SUBAGENT-MODEL>openai,gpt-4</CCR-SUBAGENT-MODEL>"}
            ]
        }));
        let outcome = router.route(&mut req, None, "req-2").await;
        assert_eq!(outcome.rule, RouteRule::Subagent);

        // Background beats think.
        let mut req = request(json!({
            "model": "claude-3-5-haiku-20241022",
            "thinking": {"type": "enabled"}
        }));
        let outcome = router.route(&mut req, None, "req-3").await;
        assert_eq!(outcome.rule, RouteRule::Background);

        // Think beats web search.
        let mut req = request(json!({
            "model": "claude-sonnet-4-20250514",
            "thinking": {"type": "enabled"},
            "tools": [{"name": "web_search", "type": "web_search_20250305"}]
        }));
        let outcome = router.route(&mut req, None, "req-4").await;
        assert_eq!(outcome.rule, RouteRule::Think);
    }

    struct FixedDecision(Option<String>);

    #[async_trait]
    impl CustomRouter for FixedDecision {
        async fn decide(
            &self,
            _request: &ChatRequest,
            _policy: &RouterPolicy,
        ) -> Result<Option<String>, CustomRouterError> {
            Ok(self.0.clone())
        }
    }

    struct FailingDecision;

    #[async_trait]
    impl CustomRouter for FailingDecision {
        async fn decide(
            &self,
            _request: &ChatRequest,
            _policy: &RouterPolicy,
        ) -> Result<Option<String>, CustomRouterError> {
            Err(CustomRouterError::Failed("no backend".to_string()))
        }
    }

    #[tokio::test]
    async fn custom_router_decision_preempts_builtin_rules() {
        let router = router().with_custom_router(Some(Arc::new(FixedDecision(Some(
            "openrouter,custom-model".to_string(),
        )))));
        let mut req = request(json!({
            "model": "claude-3-5-haiku-20241022",
            "thinking": {"type": "enabled"}
        }));

        let outcome = router.route(&mut req, None, "req-1").await;

        assert_eq!(outcome.model, "openrouter,custom-model");
        assert_eq!(outcome.rule, RouteRule::Custom);
        assert_eq!(req.model, "openrouter,custom-model");
    }

    #[tokio::test]
    async fn silent_or_failing_custom_router_falls_through() {
        let mut req = simple_request("claude-sonnet-4-20250514", "hi");
        let silent = router().with_custom_router(Some(Arc::new(FixedDecision(None))));
        let outcome = silent.route(&mut req, None, "req-1").await;
        assert_eq!(outcome.rule, RouteRule::Default);

        let mut req = simple_request("claude-sonnet-4-20250514", "hi");
        let blank = router().with_custom_router(Some(Arc::new(FixedDecision(Some(
            "   ".to_string(),
        )))));
        let outcome = blank.route(&mut req, None, "req-2").await;
        assert_eq!(outcome.rule, RouteRule::Default);

        let mut req = simple_request("claude-sonnet-4-20250514", "hi");
        let failing = router().with_custom_router(Some(Arc::new(FailingDecision)));
        let outcome = failing.route(&mut req, None, "req-3").await;
        assert_eq!(outcome.rule, RouteRule::Default);
    }

    #[tokio::test]
    async fn bearer_token_overrides_and_restores_credentials() {
        let router = router();
        let mut req = simple_request("claude-sonnet-4-20250514", "hi");

        let outcome = router.route(&mut req, Some("sk-live"), "req-1").await;

        assert_eq!(outcome.overrides.len(), 2);
        let provider = router.config().find_provider("openai").unwrap();
        assert_eq!(provider.current_key().as_deref(), Some("sk-live"));

        assert_eq!(router.restore("req-1"), 2);
        let provider = router.config().find_provider("openai").unwrap();
        assert_eq!(provider.current_key().as_deref(), Some("sk-static"));
        assert_eq!(router.restore("req-1"), 0);
    }

    #[tokio::test]
    async fn system_prompt_env_block_is_rewritten_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let prompt_path = dir.path().join("prompt.txt");
        std::fs::write(&prompt_path, "You are a release bot.\n").unwrap();

        let router = router_for(
            full_policy(),
            json!({"systemPromptPath": prompt_path.to_str().unwrap()}),
        );
        let mut req = request(json!({
            "model": "m",
            "system": [
                {"type": "text", "text": "identity"},
                {"type": "text", "text": "house rules <env>OS: linux</env>"}
            ]
        }));

        router.route(&mut req, None, "req-1").await;

        let Some(SystemPrompt::Segments(segments)) = &req.system else {
            panic!("system prompt shape changed");
        };
        let SystemText::One(text) = &segments[1].text else {
            panic!("segment text shape changed");
        };
        assert_eq!(text, "You are a release bot.\n<env>OS: linux</env>");
    }

    #[tokio::test]
    async fn prompt_rewrite_skips_when_marker_or_file_is_missing() {
        let router = router_for(
            full_policy(),
            json!({"systemPromptPath": "/nonexistent/prompt.txt"}),
        );
        let mut req = request(json!({
            "model": "m",
            "system": [
                {"type": "text", "text": "identity"},
                {"type": "text", "text": "rules <env>x</env>"}
            ]
        }));
        router.route(&mut req, None, "req-1").await;
        let Some(SystemPrompt::Segments(segments)) = &req.system else {
            panic!("system prompt shape changed");
        };
        let SystemText::One(text) = &segments[1].text else {
            panic!("segment text shape changed");
        };
        assert_eq!(text, "rules <env>x</env>");
    }
}
