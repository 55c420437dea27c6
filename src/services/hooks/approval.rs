//! Approval hook.
//!
//! On escalation, pauses the session, publishes an approval request, and
//! polls for a decision up to a configured timeout. Grants continue
//! execution; rejections and timeouts terminate. Both sides of the exchange
//! are audit-logged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::models::hook::{HookContext, HookOutcome, HookTrigger};
use crate::domain::models::message::{Message, MessageKind};
use crate::domain::ports::hook::Hook;
use crate::services::audit_log::{AuditEventKind, AuditLog, NewAuditEvent};
use crate::services::message_store::MessageStore;

/// State of a pending approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone)]
struct ApprovalRequest {
    session_id: String,
    status: ApprovalStatus,
    reason: String,
    responder: Option<String>,
    created_at: DateTime<Utc>,
}

/// Blocks execution pending a human decision.
pub struct ApprovalHook {
    timeout: Duration,
    poll_interval: Duration,
    pending: RwLock<HashMap<String, ApprovalRequest>>,
    audit: Arc<AuditLog>,
    messages: Option<Arc<MessageStore>>,
}

impl ApprovalHook {
    pub fn new(
        timeout_seconds: u64,
        poll_seconds: u64,
        audit: Arc<AuditLog>,
        messages: Option<Arc<MessageStore>>,
    ) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_seconds),
            // The polling interval is at least one second
            poll_interval: Duration::from_secs(poll_seconds.max(1)),
            pending: RwLock::new(HashMap::new()),
            audit,
            messages,
        }
    }

    /// Publish an approval request and wait for a decision.
    ///
    /// Returns `continue` on grant, `terminate` on rejection or timeout. A
    /// zero timeout rejects immediately.
    pub async fn await_decision(&self, ctx: &HookContext, reason: &str) -> HookOutcome {
        let request_id = format!("approval_{}_{}", ctx.session_id, ctx.iteration);

        {
            let mut pending = self.pending.write().await;
            pending.insert(
                request_id.clone(),
                ApprovalRequest {
                    session_id: ctx.session_id.clone(),
                    status: ApprovalStatus::Pending,
                    reason: reason.to_string(),
                    responder: None,
                    created_at: Utc::now(),
                },
            );
        }

        self.audit
            .record(
                NewAuditEvent::new(AuditEventKind::ApprovalRequest, ctx.session_id.clone(), "request_approval")
                    .detail("request_id", json!(request_id))
                    .detail("reason", json!(reason)),
            )
            .await;

        if let Some(ref messages) = self.messages {
            messages
                .record(Message::new(
                    "system",
                    format!("Approval needed: {reason}"),
                    MessageKind::ApprovalRequest,
                    ctx.session_id.clone(),
                ))
                .await;
        }

        let started = tokio::time::Instant::now();
        let outcome = loop {
            if started.elapsed() >= self.timeout {
                break self
                    .settle(&request_id, &ctx.session_id, "approval_timeout", None)
                    .await;
            }

            let status = {
                let pending = self.pending.read().await;
                pending.get(&request_id).map(|r| (r.status, r.responder.clone()))
            };

            match status {
                Some((ApprovalStatus::Approved, responder)) => {
                    break self
                        .settle(&request_id, &ctx.session_id, "approval_granted", responder)
                        .await;
                }
                Some((ApprovalStatus::Rejected, responder)) => {
                    break self
                        .settle(&request_id, &ctx.session_id, "approval_rejected", responder)
                        .await;
                }
                _ => {}
            }

            let remaining = self.timeout.saturating_sub(started.elapsed());
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        };

        let mut pending = self.pending.write().await;
        pending.remove(&request_id);
        outcome
    }

    async fn settle(
        &self,
        request_id: &str,
        session_id: &str,
        decision: &str,
        responder: Option<String>,
    ) -> HookOutcome {
        info!(request_id, decision, "Approval settled");
        self.audit
            .record(
                NewAuditEvent::new(AuditEventKind::ApprovalResponse, session_id, "approval_decision")
                    .detail("request_id", json!(request_id))
                    .detail("decision", json!(decision))
                    .detail("responder", json!(responder)),
            )
            .await;

        if let Some(ref messages) = self.messages {
            messages
                .record(Message::new(
                    responder.clone().unwrap_or_else(|| "system".to_string()),
                    decision.to_string(),
                    MessageKind::ApprovalResponse,
                    session_id.to_string(),
                ))
                .await;
        }

        match decision {
            "approval_granted" => HookOutcome::proceed("approval_granted", 1.0),
            other => HookOutcome::terminate(other),
        }
    }

    /// Grant a pending request.
    pub async fn approve(&self, request_id: &str, responder: &str) -> bool {
        let mut pending = self.pending.write().await;
        match pending.get_mut(request_id) {
            Some(request) if request.status == ApprovalStatus::Pending => {
                request.status = ApprovalStatus::Approved;
                request.responder = Some(responder.to_string());
                true
            }
            _ => false,
        }
    }

    /// Reject a pending request.
    pub async fn reject(&self, request_id: &str, responder: &str) -> bool {
        let mut pending = self.pending.write().await;
        match pending.get_mut(request_id) {
            Some(request) if request.status == ApprovalStatus::Pending => {
                request.status = ApprovalStatus::Rejected;
                request.responder = Some(responder.to_string());
                true
            }
            _ => false,
        }
    }

    /// Ids of requests still awaiting a decision, with their reasons.
    pub async fn pending_requests(&self) -> Vec<(String, String)> {
        let pending = self.pending.read().await;
        let mut list: Vec<(String, String, DateTime<Utc>)> = pending
            .iter()
            .filter(|(_, r)| r.status == ApprovalStatus::Pending)
            .map(|(id, r)| (id.clone(), r.reason.clone(), r.created_at))
            .collect();
        list.sort_by(|a, b| a.2.cmp(&b.2));
        list.into_iter().map(|(id, reason, _)| (id, reason)).collect()
    }

    /// Pending request ids for one session.
    pub async fn pending_for_session(&self, session_id: &str) -> Vec<String> {
        let pending = self.pending.read().await;
        pending
            .iter()
            .filter(|(_, r)| r.status == ApprovalStatus::Pending && r.session_id == session_id)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl Hook for ApprovalHook {
    fn name(&self) -> &str {
        "approval"
    }

    fn trigger(&self) -> HookTrigger {
        HookTrigger::AfterIteration
    }

    fn priority(&self) -> u8 {
        9
    }

    async fn evaluate(&self, ctx: &HookContext) -> HookOutcome {
        self.await_decision(ctx, "escalation_requested").await
    }
}
