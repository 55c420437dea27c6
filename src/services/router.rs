//! Intent router: the system's source of truth.
//!
//! Holds the capability table and routing rules, registered at startup and
//! expanded (never shrunk) at runtime. Routing is a pure first-match walk
//! over the rules in registration order.

use regex::Regex;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::models::capability::{
    Capability, CapabilityKind, GapReport, RouteDecision, RoutingRule, TaskCategory,
};

struct CompiledRule {
    rule: RoutingRule,
    regex: Regex,
}

struct Registry {
    capabilities: Vec<Capability>,
    by_name: HashMap<String, usize>,
    rules: Vec<CompiledRule>,
}

/// Routes free-text intents to capabilities and hook sets.
pub struct Router {
    registry: RwLock<Registry>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// An empty router with no capabilities or rules.
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry {
                capabilities: Vec::new(),
                by_name: HashMap::new(),
                rules: Vec::new(),
            }),
        }
    }

    /// A router populated with the default capability table and routing
    /// rules.
    pub async fn with_defaults() -> Self {
        let router = Self::new();
        router.register_default_capabilities().await;
        router.register_default_rules().await;
        router
    }

    /// Register (or replace) a capability. Entries are never removed.
    pub async fn register_capability(&self, capability: Capability) {
        let mut registry = self.registry.write().await;
        match registry.by_name.get(&capability.name) {
            Some(&idx) => registry.capabilities[idx] = capability,
            None => {
                let idx = registry.capabilities.len();
                registry.by_name.insert(capability.name.clone(), idx);
                registry.capabilities.push(capability);
            }
        }
    }

    /// Append a routing rule. Rules match in registration order; registering
    /// the same rule twice has no routing effect because first-match wins.
    pub async fn add_rule(&self, rule: RoutingRule) {
        let regex = match Regex::new(&format!("(?i){}", rule.pattern)) {
            Ok(re) => re,
            Err(e) => {
                warn!(pattern = %rule.pattern, error = %e, "Invalid rule pattern, matching literally");
                // Fall back to a literal match so registration cannot fail
                Regex::new(&format!("(?i){}", regex::escape(&rule.pattern)))
                    .unwrap_or_else(|_| Regex::new("$^").unwrap())
            }
        };
        let mut registry = self.registry.write().await;
        registry.rules.push(CompiledRule { rule, regex });
    }

    pub async fn capability(&self, name: &str) -> Option<Capability> {
        let registry = self.registry.read().await;
        registry
            .by_name
            .get(name)
            .map(|&idx| registry.capabilities[idx].clone())
    }

    /// Route an intent to an execution skeleton.
    ///
    /// Pure: cannot fail. Falls through to the planning agent with a warning
    /// when no rule matches.
    pub async fn route(&self, intent: &str) -> RouteDecision {
        let registry = self.registry.read().await;
        let lowered = intent.to_lowercase();

        let matched: Option<&RoutingRule> = registry
            .rules
            .iter()
            .find(|c| c.regex.is_match(&lowered))
            .map(|c| &c.rule);

        let rule = match matched {
            Some(rule) => {
                debug!(category = rule.category.as_str(), primary = %rule.primary_capability, "Routed intent");
                rule.clone()
            }
            None => {
                warn!(intent = %intent, "No routing rule matched, falling back to planning agent");
                RoutingRule::new(".*", TaskCategory::Unknown, "planning-agent").search_web()
            }
        };

        let primary = registry
            .by_name
            .get(&rule.primary_capability)
            .map(|&idx| &registry.capabilities[idx]);

        let mut hooks_before: Vec<String> = rule.hooks_to_trigger.clone();
        if let Some(cap) = primary {
            hooks_before.extend(cap.hooks_before.iter().cloned());
        }
        let hooks_before = dedup_first_seen(hooks_before);

        let hooks_after = dedup_first_seen(
            primary
                .map(|cap| cap.hooks_after.clone())
                .unwrap_or_default(),
        );

        RouteDecision {
            category: rule.category,
            primary_capability: rule.primary_capability.clone(),
            primary_kind: primary.map_or(CapabilityKind::Agent, |cap| cap.kind),
            fallback_capabilities: rule.fallback_capabilities.clone(),
            search_web_first: rule.always_search_web
                || primary.is_some_and(|cap| cap.requires_web_search),
            check_db_first: rule.always_check_db
                || primary.is_some_and(|cap| cap.requires_db_check),
            check_cache_first: primary.is_some_and(|cap| cap.requires_cache_check),
            hooks_before,
            hooks_after,
            requires_planning: rule.requires_planning,
            requires_testing: rule.requires_testing,
            max_iterations: rule.max_iterations,
            auto_test: primary.is_none_or(|cap| cap.auto_test),
            dependencies: primary.map(|cap| cap.dependencies.clone()).unwrap_or_default(),
        }
    }

    /// Report whether an intent has no registered capability to handle it.
    ///
    /// `missing` lets upstream create new capabilities rather than fail.
    pub async fn capability_gap(&self, intent: &str) -> GapReport {
        let decision = self.route(intent).await;

        if decision.category == TaskCategory::Unknown {
            return GapReport {
                missing: true,
                reason: "Intent does not match any routing rule".to_string(),
            };
        }

        let registry = self.registry.read().await;
        if !registry.by_name.contains_key(&decision.primary_capability) {
            return GapReport {
                missing: true,
                reason: format!(
                    "Primary capability '{}' is not registered",
                    decision.primary_capability
                ),
            };
        }

        GapReport {
            missing: false,
            reason: "Existing capabilities can handle this intent".to_string(),
        }
    }

    async fn register_default_capabilities(&self) {
        let agents = [
            Capability::new("planning-agent", CapabilityKind::Agent, "Analyzes intents, creates plans, understands dependencies")
                .with_triggers(&["plan", "analyze", "understand", "design", "architect"])
                .with_hooks(&["load-context"], &["save-plan", "update-ledger"])
                .requires_web_search()
                .with_priority(10),
            Capability::new("code-agent", CapabilityKind::Agent, "Writes, modifies, and reviews code")
                .with_triggers(&["code", "implement", "create", "build", "fix", "refactor"])
                .with_hooks(&["load-context", "check-design-patterns"], &["run-tests", "update-ledger"])
                .requires_db_check()
                .with_priority(8),
            Capability::new("testing-agent", CapabilityKind::Agent, "Writes and runs tests, verifies functionality")
                .with_triggers(&["test", "verify", "check", "validate"])
                .with_hooks(&["load-test-config"], &["report-results", "update-ledger"])
                .no_auto_test()
                .with_priority(9),
            Capability::new("ui-design-agent", CapabilityKind::Agent, "Designs and implements UI following the design system")
                .with_triggers(&["ui", "frontend", "design", "page", "component", "responsive"])
                .with_hooks(&["load-design-system", "check-ui-patterns"], &["screenshot-test", "update-ledger"])
                .with_priority(7),
            Capability::new("database-agent", CapabilityKind::Agent, "Handles database operations, schema, migrations")
                .with_triggers(&["database", "db", "sql", "schema", "migration", "query"])
                .with_dependencies(&["postgres-mcp"])
                .with_hooks(&["backup-db"], &["verify-migration", "update-ledger"])
                .requires_db_check()
                .with_priority(8),
            Capability::new("workflow-executor", CapabilityKind::Agent, "Drives deployment and automation workflows end to end")
                .with_triggers(&["deploy", "workflow", "pipeline", "run"])
                .with_hooks(&["load-context"], &["update-ledger"])
                .with_priority(8),
        ];

        let skills = [
            Capability::new("web-search", CapabilityKind::Skill, "Searches the web for information")
                .with_triggers(&["search", "find", "lookup", "latest", "current"])
                .requires_web_search()
                .with_priority(7),
            Capability::new("web-scrape", CapabilityKind::Skill, "Scrapes websites for data")
                .with_triggers(&["scrape", "extract", "crawl", "fetch from"])
                .with_dependencies(&["browser-mcp"])
                .with_priority(6),
            Capability::new("api-integration", CapabilityKind::Skill, "Integrates with external APIs")
                .with_triggers(&["api", "endpoint", "rest", "graphql", "webhook"])
                .with_hooks(&[], &["cache-response"])
                .requires_cache_check()
                .with_priority(7),
            Capability::new("file-operations", CapabilityKind::Skill, "File system operations")
                .with_triggers(&["file", "read", "write", "create file", "delete file"])
                .with_dependencies(&["filesystem-mcp"])
                .with_priority(5),
            Capability::new("verify-completion", CapabilityKind::Skill, "Verifies every ledger task is complete")
                .with_triggers(&["verify completion"])
                .no_auto_test()
                .with_priority(9),
        ];

        let hooks = [
            Capability::new("update-ledger", CapabilityKind::Hook, "Updates the task ledger after each step")
                .with_triggers(&["task-complete", "step-done"])
                .with_priority(10),
            Capability::new("check-design-patterns", CapabilityKind::Hook, "Verifies code follows design patterns")
                .with_triggers(&["before-code", "review"])
                .with_priority(8),
            Capability::new("load-context", CapabilityKind::Hook, "Loads project context before work starts")
                .with_triggers(&["before-step"])
                .with_priority(9),
            Capability::new("run-tests", CapabilityKind::Hook, "Runs tests after code changes")
                .with_triggers(&["after-code", "verify"])
                .with_priority(10),
            Capability::new("check-cache", CapabilityKind::Hook, "Checks the cache before expensive operations")
                .with_triggers(&["api-call", "db-query", "expensive-operation"])
                .with_priority(7),
            Capability::new("backup-db", CapabilityKind::Hook, "Creates a DB backup before migrations")
                .with_triggers(&["before-migration", "schema-change"])
                .with_priority(10),
        ];

        let managed = [
            Capability::new("postgres-mcp", CapabilityKind::Mcp, "PostgreSQL database operations")
                .with_triggers(&["postgres", "postgresql", "sql database"])
                .with_priority(8),
            Capability::new("browser-mcp", CapabilityKind::Mcp, "Browser automation for scraping")
                .with_triggers(&["browser", "scrape javascript"])
                .with_priority(7),
            Capability::new("search-mcp", CapabilityKind::Mcp, "Managed web search provider")
                .with_triggers(&["web search", "search online"])
                .with_priority(7),
            Capability::new("filesystem-mcp", CapabilityKind::Mcp, "File system operations")
                .with_triggers(&["file", "directory", "filesystem"])
                .with_priority(6),
        ];

        for cap in agents.into_iter().chain(skills).chain(hooks).chain(managed) {
            self.register_capability(cap).await;
        }
    }

    async fn register_default_rules(&self) {
        let rules = [
            RoutingRule::new(r"(plan|design|architect|analyze)", TaskCategory::Planning, "planning-agent")
                .search_web()
                .with_hooks(&["load-context"])
                .no_planning(),
            RoutingRule::new(r"(deploy|workflow|pipeline)", TaskCategory::Deployment, "workflow-executor")
                .with_hooks(&["load-context"]),
            RoutingRule::new(r"(scrape|crawl|extract from|get from website|headlines)", TaskCategory::WebScraping, "web-scrape")
                .with_fallbacks(&["web-search"])
                .with_hooks(&["check-cache"]),
            RoutingRule::new(r"(search|find|lookup|what is|how to|fetch)", TaskCategory::WebSearch, "web-search")
                .search_web(),
            RoutingRule::new(r"(database|db|sql|query|migration|schema)", TaskCategory::Database, "database-agent")
                .check_db()
                .with_hooks(&["backup-db", "check-cache"]),
            RoutingRule::new(r"(ui|frontend|page|component|responsive)", TaskCategory::UiDesign, "ui-design-agent")
                .with_hooks(&["load-design-system", "check-design-patterns"]),
            RoutingRule::new(r"(test|verify|check|validate|assert)", TaskCategory::Testing, "testing-agent")
                .no_testing(),
            RoutingRule::new(r"(api|endpoint|rest|graphql)", TaskCategory::ApiCall, "api-integration")
                .check_db()
                .with_hooks(&["check-cache"]),
            RoutingRule::new(r"(code|implement|create|build|fix|refactor)", TaskCategory::CodeGeneration, "code-agent")
                .with_hooks(&["check-design-patterns", "run-tests"]),
        ];

        for rule in rules {
            self.add_rule(rule).await;
        }
    }
}

fn dedup_first_seen(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
