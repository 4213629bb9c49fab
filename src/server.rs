use actix_web::http::header;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, HttpResponseBuilder, Responder};

use crate::models::ChatRequest;
use crate::router::RouteOutcome;
use crate::session::SessionUsage;
use crate::util::{error_response, AppState};

/// Inbound body cap. Long-context prompts run to megabytes of JSON,
/// well past actix's 256KB default payload limit.
const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Extract the bearer token from the Authorization header, if any. The
/// scheme must be followed by a space; `Bearerish` prefixes do not count.
fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| {
            let s = s.trim();
            if s.len() >= 7 && s[..7].eq_ignore_ascii_case("bearer ") {
                Some(s[7..].trim().to_string())
            } else {
                None
            }
        })
}

/// Request id from the x-request-id header, else a fresh v4 uuid.
fn request_id(req: &HttpRequest) -> String {
    req.headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn insert_header_if_valid(builder: &mut HttpResponseBuilder, name: &'static str, value: &str) {
    if let Ok(value) = header::HeaderValue::from_str(value) {
        builder.insert_header((name, value));
    }
}

fn insert_route_headers(
    builder: &mut HttpResponseBuilder,
    outcome: &RouteOutcome,
    request_id: &str,
) {
    builder.insert_header(("x-request-id", request_id.to_string()));
    builder.insert_header(("x-route-rule", outcome.rule.as_str()));
    builder.insert_header(("x-token-count", outcome.token_count.to_string()));
    insert_header_if_valid(builder, "x-routed-model", &outcome.model);
    if let Some(session_id) = outcome.session_id.as_deref() {
        insert_header_if_valid(builder, "x-session-id", session_id);
    }
}

/// Route one chat-completion request. Responds with the request body,
/// `model` (and possibly `system`) rewritten in place, plus decision
/// headers describing what was chosen and why.
async fn route_chat(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let mut chat: ChatRequest = match serde_json::from_slice(&body) {
        Ok(chat) => chat,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("invalid request body: {e}"));
        }
    };

    let request_id = request_id(&req);
    let bearer = bearer_token(&req);

    let outcome = state
        .router
        .route(&mut chat, bearer.as_deref(), &request_id)
        .await;

    tracing::info!(
        request_id,
        model = %outcome.model,
        rule = %outcome.rule,
        token_count = outcome.token_count,
        overrides = outcome.overrides.len(),
        "routing decision"
    );

    let mut builder = HttpResponse::Ok();
    insert_route_headers(&mut builder, &outcome, &request_id);
    builder.json(chat)
}

/// Unwind the credential overrides a request applied on its way in.
async fn restore_request(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let request_id = path.into_inner();
    let restored = state.router.restore(&request_id);
    HttpResponse::Ok().json(serde_json::json!({
        "request_id": request_id,
        "restored": restored,
    }))
}

/// Record reported token usage for a session.
async fn record_usage(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let usage: SessionUsage = match serde_json::from_slice(&body) {
        Ok(usage) => usage,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("invalid usage payload: {e}"));
        }
    };

    let session_id = path.into_inner();
    state.router.record_usage(&session_id, usage);
    HttpResponse::NoContent().finish()
}

/// Current configuration with every credential redacted.
async fn get_config(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.router.config().redacted())
}

async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Configure Actix-web routes with AppState.
pub fn config_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_PAYLOAD_BYTES));
    cfg.service(
        web::scope("")
            .route("/healthz", web::get().to(health))
            .route("/v1/route", web::post().to(route_chat))
            .route(
                "/v1/requests/{request_id}/restore",
                web::post().to(restore_request),
            )
            .route(
                "/v1/sessions/{session_id}/usage",
                web::post().to(record_usage),
            )
            .route("/v1/config", web::get().to(get_config)),
    );
}
