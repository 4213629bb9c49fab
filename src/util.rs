use actix_web::HttpResponse;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize dotenv and structured tracing based on RUST_LOG.
pub fn init_tracing() {
    let env_loaded = dotenvy::dotenv().is_ok();

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let subscriber = fmt().with_env_filter(EnvFilter::new(filter)).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    if env_loaded {
        tracing::info!("environment loaded from .env");
    }
}

/// Shared application state used by the HTTP server and handlers.
pub struct AppState {
    pub router: std::sync::Arc<crate::router::RequestRouter>,
    pub http: reqwest::Client,
}

impl AppState {
    /// Wire up the routing stack for one loaded configuration.
    pub fn from_config(config: crate::config::Config) -> Self {
        let http = build_http_client_from_env();
        let config = std::sync::Arc::new(config);
        let custom = crate::custom::load_custom_router(&config.router, &http);
        let router = crate::router::RequestRouter::new(config).with_custom_router(custom);
        Self {
            router: std::sync::Arc::new(router),
            http,
        }
    }
}

/// Build an HTTP client honoring proxy and timeout environment variables.
///
/// Environment:
/// - SWITCHPOINT_NO_PROXY = 1|true|yes|on  -> disable all proxies
/// - SWITCHPOINT_PROXY_URL = <url>         -> proxy for all schemes
/// - SWITCHPOINT_HTTP_TIMEOUT_SECONDS      -> overall request timeout (u64)
pub fn build_http_client_from_env() -> reqwest::Client {
    let mut builder = reqwest::Client::builder();

    if let Ok(secs) = std::env::var("SWITCHPOINT_HTTP_TIMEOUT_SECONDS") {
        if let Ok(n) = secs.trim().parse::<u64>() {
            builder = builder.timeout(std::time::Duration::from_secs(n));
        }
    }

    let no_proxy = std::env::var("SWITCHPOINT_NO_PROXY")
        .map(|v| v.trim().to_ascii_lowercase())
        .map(|v| v == "1" || v == "true" || v == "yes" || v == "on")
        .unwrap_or(false);
    if no_proxy {
        builder = builder.no_proxy();
    } else if let Ok(url) = std::env::var("SWITCHPOINT_PROXY_URL") {
        let url = url.trim();
        if !url.is_empty() {
            if let Ok(proxy) = reqwest::Proxy::all(url) {
                builder = builder.proxy(proxy);
            }
        }
    }

    builder = builder.user_agent(format!("switchpoint/{}", env!("CARGO_PKG_VERSION")));
    builder.build().unwrap_or_else(|_| reqwest::Client::new())
}

/// Build a JSON error response with the given HTTP status and message.
pub fn error_response(status: actix_web::http::StatusCode, msg: &str) -> HttpResponse {
    let body = serde_json::json!({ "error": { "message": msg } });
    HttpResponse::build(status).json(body)
}

/// Build a CORS configuration from CORS_ALLOWED_ORIGINS ("*" or a
/// comma-separated origin list). Permissive when not configured.
pub fn cors_config_from_env() -> actix_cors::Cors {
    let mut cors = actix_cors::Cors::default()
        .allow_any_method()
        .allow_any_header();

    match std::env::var("CORS_ALLOWED_ORIGINS") {
        Ok(origins) if origins.trim() != "*" => {
            for part in origins.split(',') {
                let origin = part.trim();
                if !origin.is_empty() {
                    cors = cors.allowed_origin(origin);
                }
            }
        }
        _ => {
            cors = cors.allow_any_origin();
        }
    }

    cors
}
