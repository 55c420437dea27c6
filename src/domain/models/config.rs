//! Runtime configuration model.
//!
//! All sections have serde defaults so a bare `Config::default()` is a
//! working development configuration. Loading and validation live in
//! `infrastructure::config`.

use serde::{Deserialize, Serialize};

/// Safety limits enforced by the stop hook and pre-step hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Hard iteration ceiling per session
    pub max_iterations: u32,
    /// Hard wall-clock ceiling per session, in seconds
    pub max_time_seconds: u64,
    /// Hard budget ceiling per session
    pub max_budget: f64,
    /// Remediation retries allowed per (session, error pattern)
    pub max_retries_per_pattern: u32,
    /// Escalate when a single step would cost more than this
    pub require_approval_above_cost: f64,
    /// Estimated cost of one step, used by the pre-step budget check
    pub estimated_step_cost: f64,
    /// Whether the resolver may run provider install commands
    pub allow_auto_install: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            max_time_seconds: 3600,
            max_budget: 100.0,
            max_retries_per_pattern: 5,
            require_approval_above_cost: 50.0,
            estimated_step_cost: 0.10,
            allow_auto_install: false,
        }
    }
}

/// Engine and provider execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout for a single capability invocation, in seconds
    pub capability_timeout_seconds: u64,
    /// Timeout for a provider install command, in seconds
    pub install_timeout_seconds: u64,
    /// Default per-step retry budget when neither plan nor step override it
    pub default_step_iterations: u32,
    /// Sessions that may execute in parallel
    pub max_concurrent_sessions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capability_timeout_seconds: 60,
            install_timeout_seconds: 300,
            default_step_iterations: 10,
            max_concurrent_sessions: 10,
        }
    }
}

/// Hook chain settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    pub stop_hook_enabled: bool,
    pub pre_step_hook_enabled: bool,
    pub post_step_hook_enabled: bool,
    /// How long the approval hook waits for a decision, in seconds
    pub approval_timeout_seconds: u64,
    /// Polling interval while awaiting approval, in seconds
    pub approval_poll_seconds: u64,
    /// Dry-run mode makes the pre-step hook skip every step
    pub dry_run: bool,
    /// Per-agent capability invocations allowed per minute
    pub rate_limit_per_minute: u32,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            stop_hook_enabled: true,
            pre_step_hook_enabled: true,
            post_step_hook_enabled: true,
            approval_timeout_seconds: 3600,
            approval_poll_seconds: 1,
            dry_run: false,
            rate_limit_per_minute: 100,
        }
    }
}

/// On-disk layout of the state stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Root directory for all persisted state
    pub data_dir: String,
    /// Machine-readable task ledger (authoritative)
    pub tasks_json: String,
    /// Human-readable task ledger rendering
    pub task_ledger_markdown: String,
    /// Append-only NDJSON audit log
    pub audit_log: String,
    /// Directory plans are persisted into, one JSON file per task id
    pub plans_dir: String,
    pub sessions_json: String,
    pub messages_json: String,
    pub memory_json: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: ".conductor".to_string(),
            tasks_json: ".conductor/tasks.json".to_string(),
            task_ledger_markdown: ".conductor/to-do.md".to_string(),
            audit_log: ".conductor/audit.log".to_string(),
            plans_dir: ".conductor/plans".to_string(),
            sessions_json: ".conductor/sessions.json".to_string(),
            messages_json: ".conductor/messages.json".to_string(),
            memory_json: ".conductor/memory.json".to_string(),
        }
    }
}

/// Capability-resolver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Seconds between provider-registry discovery scans
    pub discovery_ttl_seconds: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            discovery_ttl_seconds: 300,
        }
    }
}

/// Remote-execution adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            max_retries: 3,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// json | pretty
    pub format: String,
    /// When set, also log to daily-rotated files under this directory
    pub log_dir: Option<String>,
    pub enable_stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_dir: None,
            enable_stdout: true,
        }
    }
}

/// Master configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub safety: SafetyConfig,
    pub engine: EngineConfig,
    pub hooks: HookConfig,
    pub state: StateConfig,
    pub resolver: ResolverConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
    /// Deployment environment tag (development, staging, production)
    pub environment: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            safety: SafetyConfig::default(),
            engine: EngineConfig::default(),
            hooks: HookConfig::default(),
            state: StateConfig::default(),
            resolver: ResolverConfig::default(),
            remote: RemoteConfig::default(),
            logging: LoggingConfig::default(),
            environment: "development".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.safety.max_iterations, 100);
        assert_eq!(config.safety.max_time_seconds, 3600);
        assert!((config.safety.max_budget - 100.0).abs() < f64::EPSILON);
        assert!(!config.safety.allow_auto_install);
        assert_eq!(config.engine.capability_timeout_seconds, 60);
        assert_eq!(config.hooks.approval_timeout_seconds, 3600);
        assert_eq!(config.resolver.discovery_ttl_seconds, 300);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"safety": {"max_iterations": 5}}"#).unwrap();
        assert_eq!(config.safety.max_iterations, 5);
        // Unspecified fields fall back to defaults
        assert_eq!(config.safety.max_time_seconds, 3600);
        assert_eq!(config.engine.default_step_iterations, 10);
    }
}
