//! Capability and routing domain models.
//!
//! The capability table and routing rules are the system's content table:
//! they tell the router which unit of behaviour handles each intent, which
//! hooks to fire around it, and what pre-execution checks apply.

use serde::{Deserialize, Serialize};

/// Kind of a registered capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Stateful reasoning unit
    Agent,
    /// Stateless atomic action
    Skill,
    /// Policy gate
    Hook,
    /// Managed external provider
    Mcp,
    /// Shell execution
    Command,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Skill => "skill",
            Self::Hook => "hook",
            Self::Mcp => "mcp",
            Self::Command => "command",
        }
    }
}

/// Category a routed intent falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    WebScraping,
    WebSearch,
    Database,
    FileOperation,
    ApiCall,
    CodeGeneration,
    Testing,
    Deployment,
    UiDesign,
    Planning,
    Notification,
    Unknown,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebScraping => "web_scraping",
            Self::WebSearch => "web_search",
            Self::Database => "database",
            Self::FileOperation => "file_operation",
            Self::ApiCall => "api_call",
            Self::CodeGeneration => "code_generation",
            Self::Testing => "testing",
            Self::Deployment => "deployment",
            Self::UiDesign => "ui_design",
            Self::Planning => "planning",
            Self::Notification => "notification",
            Self::Unknown => "unknown",
        }
    }
}

/// A registered capability entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub kind: CapabilityKind,
    pub description: String,
    /// Keywords/patterns that suggest this capability
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Other capabilities this one depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Hooks fired before this capability by default
    #[serde(default)]
    pub hooks_before: Vec<String>,
    /// Hooks fired after this capability by default
    #[serde(default)]
    pub hooks_after: Vec<String>,
    #[serde(default)]
    pub requires_web_search: bool,
    #[serde(default)]
    pub requires_db_check: bool,
    #[serde(default)]
    pub requires_cache_check: bool,
    #[serde(default = "default_auto_test")]
    pub auto_test: bool,
    /// 1-10, higher wins ties
    #[serde(default = "default_priority")]
    pub priority: u8,
}

fn default_auto_test() -> bool {
    true
}

fn default_priority() -> u8 {
    5
}

impl Capability {
    pub fn new(name: impl Into<String>, kind: CapabilityKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            triggers: Vec::new(),
            dependencies: Vec::new(),
            hooks_before: Vec::new(),
            hooks_after: Vec::new(),
            requires_web_search: false,
            requires_db_check: false,
            requires_cache_check: false,
            auto_test: true,
            priority: 5,
        }
    }

    pub fn with_triggers(mut self, triggers: &[&str]) -> Self {
        self.triggers = triggers.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn with_hooks(mut self, before: &[&str], after: &[&str]) -> Self {
        self.hooks_before = before.iter().map(|s| (*s).to_string()).collect();
        self.hooks_after = after.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn requires_web_search(mut self) -> Self {
        self.requires_web_search = true;
        self
    }

    pub fn requires_db_check(mut self) -> Self {
        self.requires_db_check = true;
        self
    }

    pub fn requires_cache_check(mut self) -> Self {
        self.requires_cache_check = true;
        self
    }

    pub fn no_auto_test(mut self) -> Self {
        self.auto_test = false;
        self
    }
}

/// A rule mapping intent text to a capability choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Regex pattern matched against the lowered intent
    pub pattern: String,
    pub category: TaskCategory,
    pub primary_capability: String,
    #[serde(default)]
    pub fallback_capabilities: Vec<String>,
    #[serde(default)]
    pub always_search_web: bool,
    #[serde(default)]
    pub always_check_db: bool,
    #[serde(default)]
    pub hooks_to_trigger: Vec<String>,
    #[serde(default = "default_true")]
    pub requires_planning: bool,
    #[serde(default = "default_true")]
    pub requires_testing: bool,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_true() -> bool {
    true
}

fn default_max_iterations() -> u32 {
    10
}

impl RoutingRule {
    pub fn new(
        pattern: impl Into<String>,
        category: TaskCategory,
        primary_capability: impl Into<String>,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            category,
            primary_capability: primary_capability.into(),
            fallback_capabilities: Vec::new(),
            always_search_web: false,
            always_check_db: false,
            hooks_to_trigger: Vec::new(),
            requires_planning: true,
            requires_testing: true,
            max_iterations: 10,
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: &[&str]) -> Self {
        self.fallback_capabilities = fallbacks.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn with_hooks(mut self, hooks: &[&str]) -> Self {
        self.hooks_to_trigger = hooks.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn search_web(mut self) -> Self {
        self.always_search_web = true;
        self
    }

    pub fn check_db(mut self) -> Self {
        self.always_check_db = true;
        self
    }

    pub fn no_planning(mut self) -> Self {
        self.requires_planning = false;
        self
    }

    pub fn no_testing(mut self) -> Self {
        self.requires_testing = false;
        self
    }
}

/// Execution skeleton produced by the router for an intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub category: TaskCategory,
    pub primary_capability: String,
    /// Kind of the primary capability; Agent when unregistered
    pub primary_kind: CapabilityKind,
    pub fallback_capabilities: Vec<String>,
    pub search_web_first: bool,
    pub check_db_first: bool,
    pub check_cache_first: bool,
    /// Deduplicated, first-seen order preserved
    pub hooks_before: Vec<String>,
    pub hooks_after: Vec<String>,
    pub requires_planning: bool,
    pub requires_testing: bool,
    pub max_iterations: u32,
    pub auto_test: bool,
    pub dependencies: Vec<String>,
}

/// Result of the capability-gap check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapReport {
    pub missing: bool,
    pub reason: String,
}

/// How a resolved capability is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMethod {
    /// A managed external provider
    ManagedProvider,
    /// An in-process skill
    LocalSkill,
    /// Plain HTTP fallback
    DirectHttp,
    /// LLM command-line fallback
    LlmCli,
}

impl ExecutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManagedProvider => "managed_provider",
            Self::LocalSkill => "local_skill",
            Self::DirectHttp => "direct_http",
            Self::LlmCli => "llm_cli",
        }
    }
}

/// A ranked concrete candidate for a requested capability.
///
/// Built on demand by the resolver; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCapability {
    pub name: String,
    pub provider_id: Option<String>,
    pub method: ExecutionMethod,
    pub priority: u8,
    pub config: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_builder() {
        let cap = Capability::new("web-scrape", CapabilityKind::Skill, "Scrapes websites")
            .with_triggers(&["scrape", "extract", "crawl"])
            .with_dependencies(&["playwright-mcp"])
            .with_priority(6);

        assert_eq!(cap.kind, CapabilityKind::Skill);
        assert_eq!(cap.triggers.len(), 3);
        assert_eq!(cap.priority, 6);
        assert!(cap.auto_test);
    }

    #[test]
    fn test_priority_clamped() {
        let cap = Capability::new("x", CapabilityKind::Agent, "").with_priority(42);
        assert_eq!(cap.priority, 10);
        let cap = Capability::new("x", CapabilityKind::Agent, "").with_priority(0);
        assert_eq!(cap.priority, 1);
    }

    #[test]
    fn test_routing_rule_defaults() {
        let rule = RoutingRule::new(r"(test|verify)", TaskCategory::Testing, "testing-agent");
        assert!(rule.requires_planning);
        assert!(rule.requires_testing);
        assert_eq!(rule.max_iterations, 10);

        let rule = rule.no_testing();
        assert!(!rule.requires_testing);
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&CapabilityKind::Mcp).unwrap(),
            r#""mcp""#
        );
        assert_eq!(
            serde_json::to_string(&ExecutionMethod::ManagedProvider).unwrap(),
            r#""managed_provider""#
        );
    }

    #[test]
    fn test_routing_rule_json_round_trip() {
        let rule = RoutingRule::new(r"(scrape|crawl)", TaskCategory::WebScraping, "web-scrape")
            .with_fallbacks(&["web-search"])
            .with_hooks(&["check-cache"]);
        let json = serde_json::to_string(&rule).unwrap();
        let back: RoutingRule = serde_json::from_str(&json).unwrap();
        assert_eq!(rule, back);
    }
}
