//! Pre-step hook.
//!
//! Validates conditions before each step executes: dry-run enforcement,
//! per-agent permission sets, a budget pre-check, and per-agent rate
//! limits.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::models::hook::{HookContext, HookOutcome, HookTrigger};
use crate::domain::ports::hook::Hook;
use crate::infrastructure::rate_limiter::RateLimiter;

/// Validates conditions before each step execution.
pub struct PreStepHook {
    dry_run: bool,
    estimated_step_cost: f64,
    required_permissions: RwLock<HashMap<String, Vec<String>>>,
    rate_limiter: RateLimiter,
}

impl PreStepHook {
    pub fn new(dry_run: bool, estimated_step_cost: f64, rate_limit_per_minute: u32) -> Self {
        Self {
            dry_run,
            estimated_step_cost,
            required_permissions: RwLock::new(HashMap::new()),
            rate_limiter: RateLimiter::per_minute(rate_limit_per_minute),
        }
    }

    /// Require `permissions` for an agent before its steps may run.
    pub async fn require_permissions(&self, agent_id: &str, permissions: &[&str]) {
        let mut required = self.required_permissions.write().await;
        required.insert(
            agent_id.to_string(),
            permissions.iter().map(|s| (*s).to_string()).collect(),
        );
    }
}

#[async_trait]
impl Hook for PreStepHook {
    fn name(&self) -> &str {
        "pre-step"
    }

    fn trigger(&self) -> HookTrigger {
        HookTrigger::Before
    }

    fn priority(&self) -> u8 {
        10
    }

    async fn evaluate(&self, ctx: &HookContext) -> HookOutcome {
        if self.dry_run {
            return HookOutcome::skip("dry_run_mode");
        }

        // Permission check
        {
            let required = self.required_permissions.read().await;
            if let Some(needed) = required.get(&ctx.agent_id) {
                let missing: Vec<&String> = needed
                    .iter()
                    .filter(|p| !ctx.permissions.contains(p))
                    .collect();
                if !missing.is_empty() {
                    return HookOutcome::terminate("permission_denied").with_data(json!({
                        "agent_id": ctx.agent_id,
                        "missing_permissions": missing,
                    }));
                }
            }
        }

        // Budget pre-check
        let remaining = ctx.budget_limit - ctx.budget_spent;
        if remaining < self.estimated_step_cost {
            return HookOutcome::escalate("insufficient_budget", 0.95).with_data(json!({
                "budget_remaining": remaining,
                "estimated_cost": self.estimated_step_cost,
            }));
        }

        // Rate limit
        if let Err(wait_seconds) = self.rate_limiter.try_acquire(&ctx.agent_id).await {
            return HookOutcome::retry("rate_limit_exceeded", 1.0).with_data(json!({
                "wait_seconds": wait_seconds.ceil(),
            }));
        }

        HookOutcome::proceed("pre_step_checks_passed", 1.0)
    }
}
