//! Hook registry and chain execution.

pub mod approval;
pub mod post_step;
pub mod pre_step;
pub mod stop;

pub use approval::{ApprovalHook, ApprovalStatus};
pub use post_step::PostStepHook;
pub use pre_step::PreStepHook;
pub use stop::StopHook;

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::models::hook::{HookContext, HookOutcome, HookTrigger};
use crate::domain::ports::hook::Hook;

/// Registry of hooks. Hooks are registered at startup and never removed.
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<dyn Hook>>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub async fn register(&self, hook: Arc<dyn Hook>) {
        let mut hooks = self.hooks.write().await;
        hooks.push(hook);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Hook>> {
        let hooks = self.hooks.read().await;
        hooks.iter().find(|h| h.name() == name).cloned()
    }

    /// Fire the named hooks matching `trigger`, serially, priority
    /// descending. Equal priorities fire in registration order. Unknown
    /// names are skipped.
    pub async fn fire(
        &self,
        trigger: HookTrigger,
        names: &[String],
        ctx: &HookContext,
    ) -> Vec<(String, HookOutcome)> {
        let selected: Vec<Arc<dyn Hook>> = {
            let hooks = self.hooks.read().await;
            let mut selected: Vec<Arc<dyn Hook>> = hooks
                .iter()
                .filter(|h| h.trigger() == trigger && names.iter().any(|n| n == h.name()))
                .cloned()
                .collect();
            // Stable: equal priorities keep registration order
            selected.sort_by(|a, b| b.priority().cmp(&a.priority()));
            selected
        };

        let mut results = Vec::with_capacity(selected.len());
        for hook in selected {
            let outcome = hook.evaluate(ctx).await;
            debug!(
                hook = hook.name(),
                decision = outcome.decision.as_str(),
                reason = %outcome.reason,
                "Hook fired"
            );
            results.push((hook.name().to_string(), outcome));
        }
        results
    }

    /// Fire every registered hook for a trigger, priority descending.
    pub async fn fire_all(&self, trigger: HookTrigger, ctx: &HookContext) -> Vec<(String, HookOutcome)> {
        let names: Vec<String> = {
            let hooks = self.hooks.read().await;
            hooks
                .iter()
                .filter(|h| h.trigger() == trigger)
                .map(|h| h.name().to_string())
                .collect()
        };
        self.fire(trigger, &names, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::hook::HookDecision;
    use async_trait::async_trait;

    struct StaticHook {
        name: String,
        trigger: HookTrigger,
        priority: u8,
    }

    #[async_trait]
    impl Hook for StaticHook {
        fn name(&self) -> &str {
            &self.name
        }
        fn trigger(&self) -> HookTrigger {
            self.trigger
        }
        fn priority(&self) -> u8 {
            self.priority
        }
        async fn evaluate(&self, _ctx: &HookContext) -> HookOutcome {
            HookOutcome::proceed(format!("{} ran", self.name), 1.0)
        }
    }

    fn hook(name: &str, trigger: HookTrigger, priority: u8) -> Arc<dyn Hook> {
        Arc::new(StaticHook {
            name: name.to_string(),
            trigger,
            priority,
        })
    }

    #[tokio::test]
    async fn test_fire_filters_by_trigger_and_name() {
        let registry = HookRegistry::new();
        registry.register(hook("before-a", HookTrigger::Before, 5)).await;
        registry.register(hook("after-a", HookTrigger::After, 5)).await;

        let ctx = HookContext::new("sess_1", "agent");
        let names = vec!["before-a".to_string(), "after-a".to_string(), "ghost".to_string()];

        let results = registry.fire(HookTrigger::Before, &names, &ctx).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "before-a");
    }

    #[tokio::test]
    async fn test_priority_descending_stable() {
        let registry = HookRegistry::new();
        registry.register(hook("low", HookTrigger::Before, 2)).await;
        registry.register(hook("high", HookTrigger::Before, 9)).await;
        registry.register(hook("mid-first", HookTrigger::Before, 5)).await;
        registry.register(hook("mid-second", HookTrigger::Before, 5)).await;

        let ctx = HookContext::new("sess_1", "agent");
        let names: Vec<String> = ["low", "high", "mid-first", "mid-second"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();

        let results = registry.fire(HookTrigger::Before, &names, &ctx).await;
        let order: Vec<&str> = results.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(order, vec!["high", "mid-first", "mid-second", "low"]);
    }

    #[tokio::test]
    async fn test_fire_all() {
        let registry = HookRegistry::new();
        registry.register(hook("a", HookTrigger::OnComplete, 5)).await;
        registry.register(hook("b", HookTrigger::OnComplete, 5)).await;
        registry.register(hook("c", HookTrigger::Before, 5)).await;

        let ctx = HookContext::new("sess_1", "agent");
        let results = registry.fire_all(HookTrigger::OnComplete, &ctx).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, o)| o.decision == HookDecision::Continue));
    }
}
