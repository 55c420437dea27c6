//! Remote-execution adapter.
//!
//! Triggers remote MCP providers and workflows over HTTP, injecting the
//! message/task/session context into each payload and retrying transient
//! failures with exponential backoff (`2^attempt` seconds).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::error::RemoteError;
use crate::domain::models::config::RemoteConfig;
use crate::domain::ports::provider::InvocationContext;

/// What kind of remote target is being triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteKind {
    Mcp,
    Workflow,
}

impl RemoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mcp => "mcp",
            Self::Workflow => "workflow",
        }
    }
}

/// A registered remote endpoint.
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    pub name: String,
    pub kind: RemoteKind,
    pub url: String,
    pub headers: HashMap<String, String>,
}

/// Response from a remote trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteResponse {
    pub success: bool,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Adapter for remote MCP/workflow execution.
pub struct RemoteAdapter {
    client: reqwest::Client,
    endpoints: RwLock<HashMap<String, RemoteEndpoint>>,
    config: RemoteConfig,
}

impl RemoteAdapter {
    pub fn new(config: RemoteConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoints: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register a remote endpoint under a name. Later registrations with the
    /// same name replace the earlier entry.
    pub async fn register_endpoint(&self, endpoint: RemoteEndpoint) {
        let mut endpoints = self.endpoints.write().await;
        endpoints.insert(endpoint.name.clone(), endpoint);
    }

    /// Trigger a remote target by name.
    ///
    /// The invocation context is injected into the payload under `_context`.
    /// Transient failures are retried with `2^attempt` second backoff up to
    /// `max_retries`.
    pub async fn trigger(
        &self,
        kind: RemoteKind,
        name: &str,
        payload: serde_json::Value,
        ctx: &InvocationContext,
    ) -> RemoteResponse {
        let started = std::time::Instant::now();

        let endpoint = {
            let endpoints = self.endpoints.read().await;
            endpoints.get(name).cloned()
        };

        let Some(endpoint) = endpoint else {
            return RemoteResponse {
                success: false,
                status_code: 404,
                data: None,
                error: Some(RemoteError::EndpointNotFound(name.to_string()).to_string()),
                duration_ms: elapsed_ms(started),
            };
        };

        if endpoint.kind != kind {
            return RemoteResponse {
                success: false,
                status_code: 400,
                data: None,
                error: Some(format!(
                    "Endpoint {name} is registered as {}, not {}",
                    endpoint.kind.as_str(),
                    kind.as_str()
                )),
                duration_ms: elapsed_ms(started),
            };
        }

        let mut body = match payload {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        body.insert(
            "_context".to_string(),
            serde_json::json!({
                "message_id": ctx.message_id,
                "task_id": ctx.task_id,
                "session_id": ctx.session_id,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
        let body = serde_json::Value::Object(body);

        let mut last_error: Option<RemoteError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_secs(2u64.saturating_pow(attempt));
                debug!(endpoint = name, attempt, ?backoff, "Retrying remote trigger");
                tokio::time::sleep(backoff).await;
            }

            match self.send(&endpoint, &body).await {
                Ok((status, data)) => {
                    return RemoteResponse {
                        success: true,
                        status_code: status,
                        data,
                        error: None,
                        duration_ms: elapsed_ms(started),
                    };
                }
                Err(err) => {
                    if !err.is_transient() {
                        let status = match &err {
                            RemoteError::HttpStatus { status, .. } => *status,
                            _ => 0,
                        };
                        return RemoteResponse {
                            success: false,
                            status_code: status,
                            data: None,
                            error: Some(err.to_string()),
                            duration_ms: elapsed_ms(started),
                        };
                    }
                    warn!(endpoint = name, attempt, error = %err, "Remote trigger failed");
                    last_error = Some(err);
                }
            }
        }

        let err = last_error.unwrap_or(RemoteError::RequestFailed("no attempts made".to_string()));
        let status = match &err {
            RemoteError::HttpStatus { status, .. } => *status,
            _ => 0,
        };
        RemoteResponse {
            success: false,
            status_code: status,
            data: None,
            error: Some(err.to_string()),
            duration_ms: elapsed_ms(started),
        }
    }

    async fn send(
        &self,
        endpoint: &RemoteEndpoint,
        body: &serde_json::Value,
    ) -> Result<(u16, Option<serde_json::Value>), RemoteError> {
        let mut request = self.client.post(&endpoint.url).json(body);
        for (key, value) in &endpoint.headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(self.config.timeout_seconds)
            } else {
                RemoteError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RemoteError::HttpStatus {
                status,
                message: message.chars().take(200).collect(),
            });
        }

        let data = response.json::<serde_json::Value>().await.ok();
        Ok((status, data))
    }
}

fn elapsed_ms(started: std::time::Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
