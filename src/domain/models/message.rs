//! Message and conversation domain models.
//!
//! Messages are first-class: every user message carries a non-empty set of
//! linked tasks before it may be processed, and cannot be completed until
//! every linked task is completed. This makes user messages a gate on
//! session termination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Kind of message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    UserText,
    UserVoice,
    SystemResponse,
    AgentUpdate,
    TaskUpdate,
    ApprovalRequest,
    ApprovalResponse,
    Error,
    Info,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserText => "user_text",
            Self::UserVoice => "user_voice",
            Self::SystemResponse => "system_response",
            Self::AgentUpdate => "agent_update",
            Self::TaskUpdate => "task_update",
            Self::ApprovalRequest => "approval_request",
            Self::ApprovalResponse => "approval_response",
            Self::Error => "error",
            Self::Info => "info",
        }
    }

    /// Whether this kind originates from the user and therefore gates
    /// termination through its linked tasks.
    pub fn is_user(&self) -> bool {
        matches!(self, Self::UserText | Self::UserVoice)
    }
}

/// Processing status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Default for MessageStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// A first-class message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub message_id: String,

    pub timestamp: DateTime<Utc>,

    /// Author (user id or agent name)
    pub user_id: String,

    pub content: String,

    pub kind: MessageKind,

    /// Session this message belongs to
    pub session_id: String,

    /// Parent message for threading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Thread identifier; equals the message's own id when it has no parent
    pub thread_id: String,

    #[serde(default)]
    pub status: MessageStatus,

    /// Tasks generated from this message
    #[serde(default)]
    pub linked_tasks: Vec<String>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Message {
    /// Create a new root message (its own thread).
    pub fn new(
        user_id: impl Into<String>,
        content: impl Into<String>,
        kind: MessageKind,
        session_id: impl Into<String>,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            message_id: id.clone(),
            timestamp: Utc::now(),
            user_id: user_id.into(),
            content: content.into(),
            kind,
            session_id: session_id.into(),
            parent_id: None,
            thread_id: id,
            status: MessageStatus::Pending,
            linked_tasks: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Create a reply within an existing thread.
    pub fn reply_to(parent: &Message, user_id: impl Into<String>, content: impl Into<String>, kind: MessageKind) -> Self {
        let mut msg = Self::new(user_id, content, kind, parent.session_id.clone());
        msg.parent_id = Some(parent.message_id.clone());
        msg.thread_id = parent.thread_id.clone();
        msg
    }

    /// Link a ledger task to this message.
    pub fn link_task(&mut self, task_id: impl Into<String>) {
        let task_id = task_id.into();
        if !self.linked_tasks.contains(&task_id) {
            self.linked_tasks.push(task_id);
        }
    }
}

/// State of a conversation thread view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Active,
    Paused,
    Completed,
    Archived,
}

/// A thread view over messages and their linked tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub user_id: String,
    pub session_id: String,
    pub message_ids: Vec<String>,
    pub linked_task_ids: Vec<String>,
    pub state: ConversationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            message_ids: Vec::new(),
            linked_task_ids: Vec::new(),
            state: ConversationState::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a message and its linked tasks in the thread view.
    pub fn record(&mut self, message: &Message) {
        self.message_ids.push(message.message_id.clone());
        for task_id in &message.linked_tasks {
            if !self.linked_task_ids.contains(task_id) {
                self.linked_task_ids.push(task_id.clone());
            }
        }
        self.updated_at = Utc::now();
    }
}
