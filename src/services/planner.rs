//! Planner: expands an intent into an ordered step list.
//!
//! Prepends context/search/database steps according to the route, derives
//! middle steps from the planning capability's analysis, and appends test
//! and completion-verification steps. Never fails hard: when reasoning is
//! unavailable the plan degrades to a single step mapping the intent to the
//! route's primary capability.

use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::capability::{CapabilityKind, RouteDecision};
use crate::domain::models::plan::{Complexity, Plan, Step};
use crate::domain::ports::provider::InvocationContext;
use crate::services::resolver::CapabilityResolver;

/// Intent keywords exempt from synthesised testing steps.
const TEST_EXEMPT_KEYWORDS: &[&str] = &[
    "scrape", "search", "find", "extract", "fetch", "headlines", "news",
];

const SIMPLE_KEYWORDS: &[&str] = &["simple", "basic", "quick", "small"];
const COMPLEX_KEYWORDS: &[&str] = &["complex", "full", "complete", "entire", "comprehensive"];

/// Turns intents plus router output into sealed plans.
pub struct Planner {
    resolver: Arc<CapabilityResolver>,
    plans_dir: Option<PathBuf>,
    test_exempt: Vec<String>,
}

impl Planner {
    pub fn new(resolver: Arc<CapabilityResolver>, plans_dir: Option<PathBuf>) -> Self {
        Self {
            resolver,
            plans_dir,
            test_exempt: TEST_EXEMPT_KEYWORDS.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Override the testing-exemption keyword set.
    pub fn with_test_exemptions(mut self, keywords: &[&str]) -> Self {
        self.test_exempt = keywords.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Build and persist a plan for an intent.
    pub async fn build_plan(
        &self,
        intent: &str,
        route: &RouteDecision,
        context: Option<&serde_json::Value>,
        session_id: &str,
    ) -> Plan {
        let task_id = format!("task_{}", Uuid::new_v4().simple());
        let mut plan = Plan::new(task_id, intent);
        plan.category = route.category;
        plan.max_iterations = route.max_iterations;
        plan.complexity = classify_complexity(intent);

        let analysis = self.analyse(intent, context, session_id).await;
        if let Some(ref analysis) = analysis {
            if let Some(goal) = analysis.get("understood_goal").and_then(|v| v.as_str()) {
                plan.understood_goal = goal.to_string();
            }
            if let Some(complexity) = analysis.get("complexity").and_then(|v| v.as_str()) {
                plan.complexity = match complexity {
                    "simple" => Complexity::Simple,
                    "complex" => Complexity::Complex,
                    _ => Complexity::Medium,
                };
            }
            if let Some(questions) = analysis.get("questions_to_ask").and_then(|v| v.as_array()) {
                plan.clarifying_questions = questions
                    .iter()
                    .filter_map(|q| q.as_str().map(String::from))
                    .collect();
            }
        }

        // Context load comes first for anything non-trivial
        if plan.complexity != Complexity::Simple {
            plan.steps.push(
                Step::new(0, "Load project context and understand existing state", "load-context", CapabilityKind::Hook),
            );
        }

        if route.search_web_first {
            plan.steps.push(
                Step::new(0, "Search the web for current information", "web-search", CapabilityKind::Skill)
                    .with_input("query", json!(intent)),
            );
        }

        if route.check_db_first {
            plan.steps.push(
                Step::new(0, "Inspect the database for existing data and schema", "postgres-mcp", CapabilityKind::Mcp),
            );
        }

        // Main steps come from the analysis; the route's primary capability
        // executes each one
        let suggested: Vec<String> = analysis
            .as_ref()
            .and_then(|a| a.get("suggested_steps"))
            .and_then(|v| v.as_array())
            .map(|steps| {
                steps
                    .iter()
                    .filter_map(|s| s.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        if suggested.is_empty() {
            // Reasoning unavailable: single step mapping the intent to the
            // primary capability
            plan.steps.push(
                Step::new(0, intent, route.primary_capability.clone(), route.primary_kind)
                    .with_input("query", json!(intent))
                    .with_test_criteria(&["no error"])
                    .with_hooks(
                        &route.hooks_before.iter().map(String::as_str).collect::<Vec<_>>(),
                        &route.hooks_after.iter().map(String::as_str).collect::<Vec<_>>(),
                    ),
            );
        } else {
            for description in suggested {
                plan.steps.push(
                    Step::new(0, description, route.primary_capability.clone(), route.primary_kind)
                        .with_test_criteria(&["no error"])
                        .with_hooks(
                            &route.hooks_before.iter().map(String::as_str).collect::<Vec<_>>(),
                            &route.hooks_after.iter().map(String::as_str).collect::<Vec<_>>(),
                        ),
                );
            }
        }

        if route.requires_testing && !self.is_test_exempt(intent) {
            plan.steps.push(
                Step::new(0, "Run tests to verify the work", "testing-agent", CapabilityKind::Agent)
                    .with_test_criteria(&["all tests pass"]),
            );
        }

        // Completion verification always closes the plan
        plan.steps.push(Step::new(
            0,
            "Verify every task in the ledger is complete",
            "verify-completion",
            CapabilityKind::Skill,
        ));

        plan.renumber();
        self.persist(&plan).await;

        info!(
            task_id = %plan.task_id,
            steps = plan.steps.len(),
            complexity = plan.complexity.as_str(),
            "Plan sealed"
        );
        plan
    }

    /// Ask the planning capability to analyse the intent. Best-effort.
    async fn analyse(
        &self,
        intent: &str,
        context: Option<&serde_json::Value>,
        session_id: &str,
    ) -> Option<serde_json::Value> {
        let mut params = serde_json::Map::new();
        params.insert("intent".to_string(), json!(intent));
        if let Some(context) = context {
            params.insert("context".to_string(), context.clone());
        }

        let ctx = InvocationContext {
            session_id: session_id.to_string(),
            ..InvocationContext::default()
        };

        let outcome = self
            .resolver
            .execute_with_fallback("plan analyze intent", "analyze", &params, &ctx)
            .await;

        if !outcome.success {
            debug!("Planning analysis unavailable, degrading to single-step plan");
            return None;
        }
        outcome.data
    }

    fn is_test_exempt(&self, intent: &str) -> bool {
        let lowered = intent.to_lowercase();
        self.test_exempt.iter().any(|kw| lowered.contains(kw))
    }

    async fn persist(&self, plan: &Plan) {
        let Some(ref dir) = self.plans_dir else { return };
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(error = %e, "Failed to create plans directory");
            return;
        }
        let path = dir.join(format!("{}.json", plan.task_id));
        match serde_json::to_string_pretty(plan) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(&path, json).await {
                    warn!(error = %e, path = %path.display(), "Failed to persist plan");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize plan"),
        }
    }
}

fn classify_complexity(intent: &str) -> Complexity {
    let lowered = intent.to_lowercase();
    if SIMPLE_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        Complexity::Simple
    } else if COMPLEX_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        Complexity::Complex
    } else {
        Complexity::Medium
    }
}
