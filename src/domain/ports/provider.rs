//! Capability-provider port.
//!
//! Every concrete provider (managed external service, local skill, HTTP
//! fallback, LLM CLI) implements this single-operation interface. The engine
//! and resolver dispatch through it and never inspect provider internals.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::models::capability::ExecutionMethod;

/// Execution context threaded through every provider invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvocationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub session_id: String,
    pub iteration: u32,
}

/// Result of a provider invocation.
///
/// Providers report configuration gaps (`needs_api_key`, `needs_setup`)
/// instead of erroring so the resolver can surface them to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub needs_api_key: bool,
    #[serde(default)]
    pub needs_setup: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,
    /// Budget consumed by this invocation
    #[serde(default)]
    pub cost: f64,
}

impl ProviderResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn needs_setup(error: impl Into<String>, install_command: Option<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            needs_setup: true,
            install_command,
            ..Self::default()
        }
    }

    pub fn needs_api_key(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            needs_api_key: true,
            ..Self::default()
        }
    }
}

/// A concrete provider of one or more capabilities.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Stable provider name (also the `method_used` tag in results).
    fn name(&self) -> &str;

    /// Keywords this provider volunteers for (matched against requests).
    fn keywords(&self) -> Vec<String>;

    /// How invocations of this provider execute.
    fn method(&self) -> ExecutionMethod;

    /// 1-10; higher is tried first.
    fn priority(&self) -> u8;

    /// Whether the provider is currently installed/usable.
    fn installed(&self) -> bool {
        true
    }

    /// Shell command that installs this provider, when one is registered.
    fn install_command(&self) -> Option<String> {
        None
    }

    /// Execute an action. Must not panic; failures are reported in the
    /// response.
    async fn execute(
        &self,
        action: &str,
        params: &serde_json::Map<String, serde_json::Value>,
        ctx: &InvocationContext,
    ) -> ProviderResponse;
}
