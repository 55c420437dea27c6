//! Capability resolver.
//!
//! For a requested capability, produces a priority-ordered list of concrete
//! providers and tries them in order until one succeeds. Discovery results
//! are cached and refreshed on a TTL; configuration gaps reported by
//! providers are surfaced verbatim to the caller.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::domain::models::capability::{ExecutionMethod, ResolvedCapability};
use crate::domain::models::config::Config;
use crate::domain::ports::provider::{CapabilityProvider, InvocationContext, ProviderResponse};
use crate::services::audit_log::{AuditEventKind, AuditLog, NewAuditEvent};

/// Name of the capability consulted when every provider fails.
const GAP_ANALYSER: &str = "capability-analyser";

/// Aggregate result of a resolve-and-execute pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_used: Option<String>,
    /// One entry per failed provider, in attempt order
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_capability: Option<String>,
    /// Configuration gaps discovered during fall-through
    #[serde(default)]
    pub needs_configuration: Vec<String>,
    /// Budget consumed by the winning invocation
    #[serde(default)]
    pub cost: f64,
}

/// Cached discovery results.
#[derive(Debug, Clone)]
pub struct DiscoverySnapshot {
    pub installed: Vec<String>,
    pub discovered_at: DateTime<Utc>,
}

/// Priority-ordered provider resolution with fall-through execution.
pub struct CapabilityResolver {
    providers: RwLock<Vec<Arc<dyn CapabilityProvider>>>,
    discovery: RwLock<Option<DiscoverySnapshot>>,
    installed_overrides: RwLock<HashSet<String>>,
    audit: Arc<AuditLog>,
    discovery_ttl: ChronoDuration,
    capability_timeout: Duration,
    install_timeout: Duration,
    allow_auto_install: bool,
}

impl CapabilityResolver {
    pub fn new(config: &Config, audit: Arc<AuditLog>) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            discovery: RwLock::new(None),
            installed_overrides: RwLock::new(HashSet::new()),
            audit,
            discovery_ttl: ChronoDuration::seconds(
                i64::try_from(config.resolver.discovery_ttl_seconds).unwrap_or(300),
            ),
            capability_timeout: Duration::from_secs(config.engine.capability_timeout_seconds),
            install_timeout: Duration::from_secs(config.engine.install_timeout_seconds),
            allow_auto_install: config.safety.allow_auto_install,
        }
    }

    /// Register a provider. The registry only ever grows.
    pub async fn register_provider(&self, provider: Arc<dyn CapabilityProvider>) {
        let mut providers = self.providers.write().await;
        providers.push(provider);
        // Invalidate the discovery cache so the next resolve sees the addition
        let mut discovery = self.discovery.write().await;
        *discovery = None;
    }

    /// Scan the registry for installed providers, refreshing the cache.
    pub async fn discover(&self) -> DiscoverySnapshot {
        let installed = {
            let providers = self.providers.read().await;
            let overrides = self.installed_overrides.read().await;
            providers
                .iter()
                .filter(|p| p.installed() || overrides.contains(p.name()))
                .map(|p| p.name().to_string())
                .collect()
        };
        let snapshot = DiscoverySnapshot {
            installed,
            discovered_at: Utc::now(),
        };
        let mut discovery = self.discovery.write().await;
        *discovery = Some(snapshot.clone());
        snapshot
    }

    async fn fresh_discovery(&self) -> DiscoverySnapshot {
        {
            let discovery = self.discovery.read().await;
            if let Some(snapshot) = discovery.as_ref() {
                if Utc::now() - snapshot.discovered_at < self.discovery_ttl {
                    return snapshot.clone();
                }
            }
        }
        self.discover().await
    }

    /// Rank candidates for a request by keyword match, highest priority
    /// first. Equal priorities keep registration order.
    pub async fn resolve(&self, request: &str) -> Vec<ResolvedCapability> {
        let _ = self.fresh_discovery().await;
        let request_lower = request.to_lowercase();

        let providers = self.providers.read().await;
        let mut candidates: Vec<ResolvedCapability> = providers
            .iter()
            .filter(|p| {
                p.keywords()
                    .iter()
                    .any(|kw| request_lower.contains(&kw.to_lowercase()))
            })
            .map(|p| ResolvedCapability {
                name: p.name().to_string(),
                provider_id: (p.method() == ExecutionMethod::ManagedProvider)
                    .then(|| p.name().to_string()),
                method: p.method(),
                priority: p.priority(),
                config: serde_json::Map::new(),
            })
            .collect();

        // Stable sort preserves registration order between equal priorities
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
        candidates
    }

    /// Try candidates in order until one succeeds.
    ///
    /// Failures are aggregated; configuration gaps are collected and
    /// surfaced. When every candidate fails, the analyser capability is
    /// consulted (best-effort) for what is missing.
    #[instrument(skip(self, params, ctx), fields(session_id = %ctx.session_id))]
    pub async fn execute_with_fallback(
        &self,
        request: &str,
        action: &str,
        params: &serde_json::Map<String, serde_json::Value>,
        ctx: &InvocationContext,
    ) -> ResolutionOutcome {
        let candidates = self.resolve(request).await;
        if candidates.is_empty() {
            debug!(request, "No providers matched request");
            let mut outcome = ResolutionOutcome {
                errors: vec![format!("no providers matched request: {request}")],
                ..ResolutionOutcome::default()
            };
            outcome.missing_capability = self.consult_analyser(request, ctx).await;
            return outcome;
        }

        let mut outcome = ResolutionOutcome::default();

        for candidate in candidates {
            let Some(provider) = self.provider_by_name(&candidate.name).await else {
                continue;
            };

            let mut response = self.invoke(provider.as_ref(), action, params, ctx).await;

            if !response.success && response.needs_setup {
                if let Some(installed) = self.try_auto_install(provider.as_ref()).await {
                    if installed {
                        response = self.invoke(provider.as_ref(), action, params, ctx).await;
                    }
                }
            }

            let mut event =
                NewAuditEvent::new(AuditEventKind::SkillExecution, ctx.session_id.clone(), action)
                    .agent(provider.name())
                    .detail("request", serde_json::json!(request))
                    .detail("method", serde_json::json!(provider.method().as_str()));
            if !response.success {
                event = event.failed(
                    response
                        .error
                        .clone()
                        .unwrap_or_else(|| "provider failed without detail".to_string()),
                );
            }
            self.audit.record(event).await;

            if response.needs_api_key {
                outcome
                    .needs_configuration
                    .push(format!("{}: needs_api_key", provider.name()));
            }
            if response.needs_setup {
                outcome
                    .needs_configuration
                    .push(format!("{}: needs_setup", provider.name()));
            }

            if response.success {
                let mut data = response.data.unwrap_or(serde_json::Value::Null);
                if let serde_json::Value::Object(ref mut map) = data {
                    map.insert(
                        "method".to_string(),
                        serde_json::json!(provider.name()),
                    );
                }
                outcome.success = true;
                outcome.data = Some(data);
                outcome.method_used = Some(provider.name().to_string());
                outcome.cost = response.cost;
                return outcome;
            }

            let error = response
                .error
                .unwrap_or_else(|| "provider failed without detail".to_string());
            warn!(provider = provider.name(), error = %error, "Provider failed, falling through");
            outcome.errors.push(format!("{}: {error}", provider.name()));
        }

        outcome.missing_capability = self.consult_analyser(request, ctx).await;
        outcome
    }

    async fn invoke(
        &self,
        provider: &dyn CapabilityProvider,
        action: &str,
        params: &serde_json::Map<String, serde_json::Value>,
        ctx: &InvocationContext,
    ) -> ProviderResponse {
        match tokio::time::timeout(self.capability_timeout, provider.execute(action, params, ctx))
            .await
        {
            Ok(response) => response,
            Err(_) => ProviderResponse::fail(format!(
                "timed out after {} seconds",
                self.capability_timeout.as_secs()
            )),
        }
    }

    async fn provider_by_name(&self, name: &str) -> Option<Arc<dyn CapabilityProvider>> {
        let providers = self.providers.read().await;
        providers.iter().find(|p| p.name() == name).cloned()
    }

    /// Run a provider's registered install command, when permitted.
    ///
    /// Returns `None` when auto-install is not applicable, `Some(true)` when
    /// the install succeeded.
    async fn try_auto_install(&self, provider: &dyn CapabilityProvider) -> Option<bool> {
        if !self.allow_auto_install {
            debug!(provider = provider.name(), "Auto-install disabled by configuration");
            return None;
        }
        let command = provider.install_command()?;

        info!(provider = provider.name(), command = %command, "Auto-installing provider");
        let result = tokio::time::timeout(
            self.install_timeout,
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&command)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => {
                let mut overrides = self.installed_overrides.write().await;
                overrides.insert(provider.name().to_string());
                info!(provider = provider.name(), "Provider installed");
                Some(true)
            }
            Ok(Ok(output)) => {
                warn!(
                    provider = provider.name(),
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "Install command failed"
                );
                Some(false)
            }
            Ok(Err(e)) => {
                warn!(provider = provider.name(), error = %e, "Install command could not start");
                Some(false)
            }
            Err(_) => {
                warn!(provider = provider.name(), "Install command timed out");
                Some(false)
            }
        }
    }

    /// Ask the analyser capability what is missing. Best-effort; may return
    /// nothing.
    async fn consult_analyser(&self, request: &str, ctx: &InvocationContext) -> Option<String> {
        let provider = self.provider_by_name(GAP_ANALYSER).await?;
        let mut params = serde_json::Map::new();
        params.insert("request".to_string(), serde_json::json!(request));

        let response = self.invoke(provider.as_ref(), "identify-missing", &params, ctx).await;
        if !response.success {
            return None;
        }
        response
            .data
            .as_ref()
            .and_then(|d| d.get("missing_capability"))
            .and_then(|v| v.as_str())
            .map(String::from)
    }
}
