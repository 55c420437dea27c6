//! Hook port.

use async_trait::async_trait;

use crate::domain::models::hook::{HookContext, HookOutcome, HookTrigger};

/// A policy gate fired around execution.
///
/// Hooks run outside agent logic and cannot be bypassed by agents; the
/// engine interprets their outcomes through its decision table.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Stable hook name, referenced by steps and routing rules.
    fn name(&self) -> &str;

    /// Lifecycle point this hook fires at.
    fn trigger(&self) -> HookTrigger;

    /// 1-10; higher fires first. Equal priorities fire in registration order.
    fn priority(&self) -> u8 {
        5
    }

    /// Evaluate the gate against the current context.
    async fn evaluate(&self, ctx: &HookContext) -> HookOutcome;
}
