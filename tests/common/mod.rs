//! Shared test fixtures: scripted capability providers.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use conductor::domain::models::capability::ExecutionMethod;
use conductor::domain::ports::provider::{CapabilityProvider, InvocationContext, ProviderResponse};

/// A provider that plays back scripted responses, then repeats a default.
pub struct ScriptedProvider {
    name: String,
    keywords: Vec<String>,
    priority: u8,
    scripted: Mutex<VecDeque<ProviderResponse>>,
    default: ProviderResponse,
    pub calls: AtomicU32,
    pub last_params: Mutex<Option<serde_json::Map<String, serde_json::Value>>>,
}

impl ScriptedProvider {
    pub fn ok(name: &str, keywords: &[&str], priority: u8, data: serde_json::Value) -> Arc<Self> {
        Self::with_default(name, keywords, priority, ProviderResponse::ok(data))
    }

    pub fn with_default(
        name: &str,
        keywords: &[&str],
        priority: u8,
        default: ProviderResponse,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|s| (*s).to_string()).collect(),
            priority,
            scripted: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicU32::new(0),
            last_params: Mutex::new(None),
        })
    }

    /// Queue a response played before the default kicks in.
    pub async fn script(&self, response: ProviderResponse) {
        let mut scripted = self.scripted.lock().await;
        scripted.push_back(response);
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn keywords(&self) -> Vec<String> {
        self.keywords.clone()
    }

    fn method(&self) -> ExecutionMethod {
        ExecutionMethod::ManagedProvider
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    async fn execute(
        &self,
        _action: &str,
        params: &serde_json::Map<String, serde_json::Value>,
        _ctx: &InvocationContext,
    ) -> ProviderResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut last = self.last_params.lock().await;
            *last = Some(params.clone());
        }
        let mut scripted = self.scripted.lock().await;
        scripted.pop_front().unwrap_or_else(|| self.default.clone())
    }
}
