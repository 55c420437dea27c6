//! Conductor - Autonomous Task Orchestration Core
//!
//! Converts free-form user intents into executable plans and drives those
//! plans through an iterative retry loop until each step's post-conditions
//! hold or a hard limit is reached:
//! - Pattern-table routing of intents to capabilities
//! - Retry-driven execution engine with test gating
//! - Hook chain with a termination-gate stop hook
//! - Single-writer task ledger (JSON + Markdown serialisations)
//! - Priority-ordered capability resolution with fall-through

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::models::config::Config;
pub use services::orchestrator::Orchestrator;
