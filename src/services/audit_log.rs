//! Append-only audit logging.
//!
//! Every action in the system lands here: the newline-delimited JSON file is
//! the durable ground truth, and a bounded in-memory ring supports
//! structured querying for post-hoc analysis and tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::warn;

/// Configuration for the audit log.
#[derive(Debug, Clone)]
pub struct AuditLogConfig {
    /// Maximum entries to keep in memory.
    pub max_entries: usize,
    /// NDJSON file path; None keeps the log in memory only.
    pub path: Option<PathBuf>,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            path: None,
        }
    }
}

/// Kind of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    SessionStart,
    SessionEnd,
    IntentReceived,
    PlanCreated,
    AgentStep,
    SkillExecution,
    HookDecision,
    ApprovalRequest,
    ApprovalResponse,
    TaskUpdate,
    ScheduleFired,
    Error,
    SecurityEvent,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::IntentReceived => "intent_received",
            Self::PlanCreated => "plan_created",
            Self::AgentStep => "agent_step",
            Self::SkillExecution => "skill_execution",
            Self::HookDecision => "hook_decision",
            Self::ApprovalRequest => "approval_request",
            Self::ApprovalResponse => "approval_response",
            Self::TaskUpdate => "task_update",
            Self::ScheduleFired => "schedule_fired",
            Self::Error => "error",
            Self::SecurityEvent => "security_event",
        }
    }
}

/// An immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub kind: AuditEventKind,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub action: String,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parameters for a new audit event.
#[derive(Debug, Clone, Default)]
pub struct NewAuditEvent {
    pub kind: Option<AuditEventKind>,
    pub session_id: String,
    pub user_id: String,
    pub agent_id: Option<String>,
    pub action: String,
    pub details: serde_json::Map<String, serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
}

impl NewAuditEvent {
    pub fn new(kind: AuditEventKind, session_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            session_id: session_id.into(),
            action: action.into(),
            success: true,
            ..Self::default()
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Append-only audit log service.
pub struct AuditLog {
    config: AuditLogConfig,
    ring: RwLock<VecDeque<AuditEvent>>,
    counter: AtomicU64,
    /// Total events ever appended; length only increases.
    appended: AtomicU64,
}

impl AuditLog {
    pub fn new(config: AuditLogConfig) -> Self {
        Self {
            config,
            ring: RwLock::new(VecDeque::new()),
            counter: AtomicU64::new(0),
            appended: AtomicU64::new(0),
        }
    }

    /// Append an event. The log is append-only; events cannot be modified.
    pub async fn record(&self, new: NewAuditEvent) -> AuditEvent {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let event = AuditEvent {
            event_id: format!("evt_{}_{seq:06}", Utc::now().format("%Y%m%d%H%M%S")),
            kind: new.kind.unwrap_or(AuditEventKind::Error),
            timestamp: Utc::now(),
            session_id: new.session_id,
            user_id: new.user_id,
            agent_id: new.agent_id,
            action: new.action,
            details: new.details,
            success: new.success,
            error: new.error,
        };

        if let Some(ref path) = self.config.path {
            if let Err(e) = append_line(path, &event).await {
                warn!(error = %e, "Failed to append audit event to file");
            }
        }

        let mut ring = self.ring.write().await;
        ring.push_back(event.clone());
        while ring.len() > self.config.max_entries {
            ring.pop_front();
        }
        self.appended.fetch_add(1, Ordering::SeqCst);

        event
    }

    /// Total number of events appended over the log's lifetime.
    pub fn len(&self) -> u64 {
        self.appended.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events for a session, oldest first (in-memory window).
    pub async fn events_for_session(&self, session_id: &str) -> Vec<AuditEvent> {
        let ring = self.ring.read().await;
        ring.iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Count of events of a kind for a session (in-memory window).
    pub async fn count_kind(&self, session_id: &str, kind: AuditEventKind) -> usize {
        let ring = self.ring.read().await;
        ring.iter()
            .filter(|e| e.session_id == session_id && e.kind == kind)
            .count()
    }

    /// The most recent `n` events (in-memory window), oldest first.
    pub async fn recent(&self, n: usize) -> Vec<AuditEvent> {
        let ring = self.ring.read().await;
        let start = ring.len().saturating_sub(n);
        ring.iter().skip(start).cloned().collect()
    }
}

async fn append_line(path: &PathBuf, event: &AuditEvent) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(event).map_err(std::io::Error::other)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
