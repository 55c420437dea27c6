//! Message and conversation store.
//!
//! Messages are first-class: a user message cannot enter processing without
//! a linked task, and can only be completed once every linked task is
//! completed. The stop hook reads `messages_with_incomplete_tasks` to gate
//! termination on user messages.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::error::MessageError;
use crate::domain::models::message::{Conversation, Message, MessageStatus};

#[derive(Debug, Default, Serialize, Deserialize)]
struct MessagesDocument {
    messages: Vec<Message>,
}

/// Process-wide message store.
pub struct MessageStore {
    messages: RwLock<Vec<Message>>,
    conversations: RwLock<HashMap<String, Conversation>>,
    path: Option<PathBuf>,
}

impl MessageStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            conversations: RwLock::new(HashMap::new()),
            path: path.map(Into::into),
        }
    }

    /// Record a message and fold it into its session's conversation view.
    pub async fn record(&self, message: Message) -> Message {
        {
            let mut messages = self.messages.write().await;
            messages.push(message.clone());
        }
        {
            let mut conversations = self.conversations.write().await;
            conversations
                .entry(message.session_id.clone())
                .or_insert_with(|| Conversation::new(message.user_id.clone(), message.session_id.clone()))
                .record(&message);
        }
        self.persist().await;
        message
    }

    pub async fn get(&self, message_id: &str) -> Option<Message> {
        let messages = self.messages.read().await;
        messages.iter().find(|m| m.message_id == message_id).cloned()
    }

    /// All messages for a session, in arrival order.
    pub async fn for_session(&self, session_id: &str) -> Vec<Message> {
        let messages = self.messages.read().await;
        messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect()
    }

    pub async fn conversation(&self, session_id: &str) -> Option<Conversation> {
        let conversations = self.conversations.read().await;
        conversations.get(session_id).cloned()
    }

    /// Link a ledger task to an existing message.
    pub async fn link_task(&self, message_id: &str, task_id: &str) -> Result<(), MessageError> {
        let session_id = {
            let mut messages = self.messages.write().await;
            let message = messages
                .iter_mut()
                .find(|m| m.message_id == message_id)
                .ok_or_else(|| MessageError::NotFound(message_id.to_string()))?;
            message.link_task(task_id);
            message.session_id.clone()
        };
        {
            let mut conversations = self.conversations.write().await;
            if let Some(convo) = conversations.get_mut(&session_id) {
                if !convo.linked_task_ids.contains(&task_id.to_string()) {
                    convo.linked_task_ids.push(task_id.to_string());
                }
            }
        }
        self.persist().await;
        Ok(())
    }

    /// Move a message to Processing.
    ///
    /// User messages must carry at least one linked task first.
    pub async fn mark_processing(&self, message_id: &str) -> Result<(), MessageError> {
        {
            let mut messages = self.messages.write().await;
            let message = messages
                .iter_mut()
                .find(|m| m.message_id == message_id)
                .ok_or_else(|| MessageError::NotFound(message_id.to_string()))?;

            if message.kind.is_user() && message.linked_tasks.is_empty() {
                return Err(MessageError::NoLinkedTasks(message_id.to_string()));
            }
            message.status = MessageStatus::Processing;
        }
        self.persist().await;
        Ok(())
    }

    /// Complete a message.
    ///
    /// `is_task_completed` answers whether a linked task id is completed in
    /// the ledger; completion is refused while any linked task is not.
    pub async fn complete(
        &self,
        message_id: &str,
        is_task_completed: impl Fn(&str) -> bool,
    ) -> Result<(), MessageError> {
        {
            let mut messages = self.messages.write().await;
            let message = messages
                .iter_mut()
                .find(|m| m.message_id == message_id)
                .ok_or_else(|| MessageError::NotFound(message_id.to_string()))?;

            let incomplete = message
                .linked_tasks
                .iter()
                .filter(|t| !is_task_completed(t))
                .count();
            if incomplete > 0 {
                return Err(MessageError::LinkedTasksIncomplete {
                    message_id: message_id.to_string(),
                    incomplete,
                });
            }
            message.status = MessageStatus::Completed;
        }
        self.persist().await;
        Ok(())
    }

    /// Mark a message failed.
    pub async fn mark_failed(&self, message_id: &str) -> Result<(), MessageError> {
        {
            let mut messages = self.messages.write().await;
            let message = messages
                .iter_mut()
                .find(|m| m.message_id == message_id)
                .ok_or_else(|| MessageError::NotFound(message_id.to_string()))?;
            message.status = MessageStatus::Failed;
        }
        self.persist().await;
        Ok(())
    }

    /// Messages that are not completed and have at least one linked task
    /// not completed in the ledger. This feeds the stop hook's
    /// message-linked-task check.
    pub async fn messages_with_incomplete_tasks(
        &self,
        is_task_completed: impl Fn(&str) -> bool,
    ) -> Vec<Message> {
        let messages = self.messages.read().await;
        messages
            .iter()
            .filter(|m| m.status != MessageStatus::Completed)
            .filter(|m| m.linked_tasks.iter().any(|t| !is_task_completed(t)))
            .cloned()
            .collect()
    }

    async fn persist(&self) {
        let Some(ref path) = self.path else { return };
        let doc = {
            let messages = self.messages.read().await;
            MessagesDocument {
                messages: messages.clone(),
            }
        };
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_json::to_string_pretty(&doc) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(path, json).await {
                    warn!(error = %e, "Failed to persist messages");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize messages"),
        }
    }
}
