//! Custom Router
//!
//! Optional caller-provided decision hook consulted before the built-in
//! rules. Two transports:
//!
//! - [`ScriptRouter`]: runs an executable, feeds it the request and the
//!   routing policy as JSON on stdin, and reads the chosen model from
//!   stdout.
//! - [`HttpRouter`]: POSTs the same payload to an `http(s)://` endpoint
//!   and reads the chosen model from the response body.
//!
//! An empty decision means "no opinion" and falls through to the built-in
//! rules. Failures are surfaced as errors so the caller can log them and
//! fall through as well.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::RouterPolicy;
use crate::models::ChatRequest;

/// How long a custom router may take before it is abandoned.
pub const DEFAULT_CUSTOM_ROUTER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum CustomRouterError {
    #[error("custom router timed out after {0:?}")]
    Timeout(Duration),

    #[error("custom router failed: {0}")]
    Failed(String),

    #[error("custom router io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("custom router request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to encode custom router payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A pluggable routing decision source.
#[async_trait]
pub trait CustomRouter: Send + Sync {
    /// Decide a model for `request`, or `None` to defer to the built-in
    /// rules.
    async fn decide(
        &self,
        request: &ChatRequest,
        policy: &RouterPolicy,
    ) -> Result<Option<String>, CustomRouterError>;
}

fn payload_value(request: &ChatRequest, policy: &RouterPolicy) -> serde_json::Value {
    serde_json::json!({
        "request": request,
        "router": policy,
    })
}

fn payload(request: &ChatRequest, policy: &RouterPolicy) -> Result<Vec<u8>, CustomRouterError> {
    Ok(serde_json::to_vec(&payload_value(request, policy))?)
}

fn decision_from(text: &str) -> Option<String> {
    let decision = text.trim();
    if decision.is_empty() {
        None
    } else {
        Some(decision.to_string())
    }
}

/// Custom router backed by a local executable.
pub struct ScriptRouter {
    path: PathBuf,
    timeout: Duration,
}

impl ScriptRouter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_CUSTOM_ROUTER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CustomRouter for ScriptRouter {
    async fn decide(
        &self,
        request: &ChatRequest,
        policy: &RouterPolicy,
    ) -> Result<Option<String>, CustomRouterError> {
        let payload = payload(request, policy)?;

        let mut child = Command::new(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CustomRouterError::Timeout(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let mut message = output.status.to_string();
            if !stderr.is_empty() {
                message.push_str(": ");
                message.push_str(stderr);
            }
            return Err(CustomRouterError::Failed(message));
        }

        Ok(decision_from(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Custom router backed by an HTTP endpoint.
pub struct HttpRouter {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpRouter {
    pub fn new(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
            timeout: DEFAULT_CUSTOM_ROUTER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CustomRouter for HttpRouter {
    async fn decide(
        &self,
        request: &ChatRequest,
        policy: &RouterPolicy,
    ) -> Result<Option<String>, CustomRouterError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload_value(request, policy))
            .send()
            .await?
            .error_for_status()?;

        Ok(decision_from(&response.text().await?))
    }
}

/// Build the custom router the policy names, if any. URLs become an
/// [`HttpRouter`]; anything else is treated as a script path and checked
/// for existence up front, so a stale path degrades to the built-in rules
/// instead of failing every request.
pub fn load_custom_router(
    policy: &RouterPolicy,
    client: &reqwest::Client,
) -> Option<Arc<dyn CustomRouter>> {
    let path = policy.custom_router_path.as_deref()?.trim();
    if path.is_empty() {
        return None;
    }
    if path.starts_with("http://") || path.starts_with("https://") {
        return Some(Arc::new(HttpRouter::new(path, client.clone())));
    }
    if !Path::new(path).is_file() {
        tracing::warn!(path, "custom router script not found, using built-in rules");
        return None;
    }
    Some(Arc::new(ScriptRouter::new(path)))
}
