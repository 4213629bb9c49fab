#![forbid(unsafe_code)]
#![doc = r#"
Switchpoint

Routing decision engine for chat-completion traffic: picks the provider and
model each request should be forwarded to, based on request shape, estimated
prompt size, and per-session usage history.

Crate highlights
- Library: `RequestRouter::route` takes a request from "as received" to
  "ready to forward" (model rewritten, session id attached, credential
  overrides applied, system prompt env block swapped in).
- HTTP server (in `server`): `/v1/route` plus restore/usage/config/health
  endpoints for running the engine as a sidecar.
- Custom routers: script or HTTP decision hooks consulted before the
  built-in rules.

Modules
- `config`: Configuration file loading, validation, redaction.
- `models`: Lenient chat-completion request model.
- `tokens`: Prompt size estimation (o200k tokenizer).
- `provider`: Provider registry and identity-deduplicated targets.
- `overlay`: Stacked per-request credential overrides.
- `session`: Session id recovery and the usage TTL cache.
- `custom`: Script/HTTP custom router transports.
- `router`: The rule chain itself.
- `server`: Actix-web handlers and route configuration.
- `util`: Shared helpers (tracing, env, CORS, HTTP client).
"#]

pub mod config;
pub mod custom;
pub mod models;
pub mod overlay;
pub mod provider;
pub mod router;
pub mod server;
pub mod session;
pub mod tokens;
pub mod util;

// Re-export the primary types for ergonomic library use.
pub use crate::config::{Config, ConfigError, ProviderConfig, RouterPolicy};
pub use crate::custom::{
    load_custom_router, CustomRouter, CustomRouterError, HttpRouter, ScriptRouter,
};
pub use crate::models::ChatRequest;
pub use crate::overlay::{
    apply_overrides, restore_overrides, AppliedOverride, ProviderService,
};
pub use crate::provider::{collect_targets, Provider, ProviderTarget};
pub use crate::router::{RequestRouter, RouteOutcome, RouteRule};
pub use crate::session::{resolve_session_id, SessionUsage, SessionUsageCache};
pub use crate::tokens::{preload_tokenizer, TokenEncoder, TokenEstimator};
