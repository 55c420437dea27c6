//! Time-based task scheduler.
//!
//! Runs registered scheduled tasks on one-shot, interval, daily, weekly, or
//! cron schedules and dispatches them through the remote adapter
//! (workflows, managed providers) or the resolver (skills). Due tasks run
//! concurrently, but each task serialises with itself.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::error::ScheduleError;
use crate::domain::ports::provider::InvocationContext;
use crate::infrastructure::remote::{RemoteAdapter, RemoteKind};
use crate::services::audit_log::{AuditEventKind, AuditLog, NewAuditEvent};
use crate::services::resolver::CapabilityResolver;

/// When a scheduled task fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Fire once at a specific time
    Once { run_at: DateTime<Utc> },
    /// Fire every `seconds`
    Interval { seconds: u64 },
    /// Fire once a day
    Daily,
    /// Fire once a week
    Weekly,
    /// Fire per a cron expression
    Cron { expression: String },
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once { .. } => "once",
            Self::Interval { .. } => "interval",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Cron { .. } => "cron",
        }
    }
}

/// What a scheduled task dispatches to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleTarget {
    /// A remote workflow by name
    Workflow { name: String },
    /// A managed provider action
    Mcp { name: String, action: String },
    /// A local skill through the resolver
    Skill { name: String },
}

/// A registered scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: Uuid,
    pub name: String,
    pub kind: ScheduleKind,
    pub target: ScheduleTarget,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
}

/// Aggregate scheduler statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_tasks: usize,
    pub enabled_tasks: usize,
    pub total_runs: u64,
    pub total_successes: u64,
    pub running: bool,
}

/// Polling scheduler with per-task self-serialisation.
pub struct Scheduler {
    tasks: Arc<RwLock<HashMap<Uuid, ScheduledTask>>>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    running: Arc<AtomicBool>,
    remote: Arc<RemoteAdapter>,
    resolver: Arc<CapabilityResolver>,
    audit: Arc<AuditLog>,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        remote: Arc<RemoteAdapter>,
        resolver: Arc<CapabilityResolver>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            running: Arc::new(AtomicBool::new(false)),
            remote,
            resolver,
            audit,
            tick_interval: Duration::from_secs(1),
        }
    }

    /// Register a task. Returns its id.
    pub async fn schedule(
        &self,
        name: &str,
        kind: ScheduleKind,
        target: ScheduleTarget,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Uuid, ScheduleError> {
        let next_run = initial_next_run(&kind, Utc::now())?;
        let task = ScheduledTask {
            task_id: Uuid::new_v4(),
            name: name.to_string(),
            kind,
            target,
            payload,
            enabled: true,
            next_run: Some(next_run),
            last_run: None,
            user_id: None,
            session_id: None,
            run_count: 0,
            success_count: 0,
            failure_count: 0,
        };
        let id = task.task_id;

        let mut tasks = self.tasks.write().await;
        tasks.insert(id, task);
        info!(name, %id, "Scheduled task registered");
        Ok(id)
    }

    /// Disable a task. Returns false when unknown.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&id) {
            Some(task) => {
                task.enabled = false;
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<ScheduledTask> {
        let tasks = self.tasks.read().await;
        tasks.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<ScheduledTask> {
        let tasks = self.tasks.read().await;
        let mut list: Vec<ScheduledTask> = tasks.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn stats(&self) -> SchedulerStats {
        let tasks = self.tasks.read().await;
        SchedulerStats {
            total_tasks: tasks.len(),
            enabled_tasks: tasks.values().filter(|t| t.enabled).count(),
            total_runs: tasks.values().map(|t| t.run_count).sum(),
            total_successes: tasks.values().map(|t| t.success_count).sum(),
            running: self.running.load(Ordering::SeqCst),
        }
    }

    /// Start the polling loop. Returns its join handle.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let scheduler = Arc::clone(self);

        tokio::spawn(async move {
            while scheduler.running.load(Ordering::SeqCst) {
                tokio::time::sleep(scheduler.tick_interval).await;
                scheduler.run_due_tasks().await;
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Dispatch every due task. Exposed for deterministic testing; the tick
    /// loop calls this once per second.
    pub async fn run_due_tasks(&self) {
        let now = Utc::now();
        let due: Vec<ScheduledTask> = {
            let tasks = self.tasks.read().await;
            tasks
                .values()
                .filter(|t| t.enabled && t.next_run.is_some_and(|at| at <= now))
                .cloned()
                .collect()
        };

        let mut handles = Vec::with_capacity(due.len());
        for task in due {
            // Each task serialises with itself: skip if a prior run is still
            // in flight.
            {
                let mut in_flight = self.in_flight.lock().await;
                if !in_flight.insert(task.task_id) {
                    debug!(name = %task.name, "Skipping overlapping run");
                    continue;
                }
            }
            handles.push(self.dispatch(task));
        }
        futures::future::join_all(handles).await;
    }

    async fn dispatch(&self, task: ScheduledTask) {
        let ctx = InvocationContext {
            message_id: None,
            task_id: Some(task.task_id.to_string()),
            session_id: task.session_id.clone().unwrap_or_else(|| "scheduler".to_string()),
            iteration: 0,
        };

        let success = match &task.target {
            ScheduleTarget::Workflow { name } => {
                self.remote
                    .trigger(
                        RemoteKind::Workflow,
                        name,
                        serde_json::Value::Object(task.payload.clone()),
                        &ctx,
                    )
                    .await
                    .success
            }
            ScheduleTarget::Mcp { name, action } => {
                let mut payload = task.payload.clone();
                payload.insert("action".to_string(), serde_json::json!(action));
                self.remote
                    .trigger(RemoteKind::Mcp, name, serde_json::Value::Object(payload), &ctx)
                    .await
                    .success
            }
            ScheduleTarget::Skill { name } => {
                self.resolver
                    .execute_with_fallback(name, name, &task.payload, &ctx)
                    .await
                    .success
            }
        };

        self.audit
            .record(
                NewAuditEvent::new(AuditEventKind::ScheduleFired, ctx.session_id.clone(), task.name.clone())
                    .detail("task_id", serde_json::json!(task.task_id))
                    .detail("success", serde_json::json!(success)),
            )
            .await;

        if !success {
            warn!(name = %task.name, "Scheduled task failed");
        }

        let now = Utc::now();
        {
            let mut tasks = self.tasks.write().await;
            if let Some(stored) = tasks.get_mut(&task.task_id) {
                stored.last_run = Some(now);
                stored.run_count += 1;
                if success {
                    stored.success_count += 1;
                } else {
                    stored.failure_count += 1;
                }
                advance(stored, now);
            }
        }

        let mut in_flight = self.in_flight.lock().await;
        in_flight.remove(&task.task_id);
    }
}

/// Compute the first firing time for a schedule.
fn initial_next_run(kind: &ScheduleKind, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
    match kind {
        ScheduleKind::Once { run_at } => Ok(*run_at),
        ScheduleKind::Interval { seconds } => {
            if *seconds == 0 {
                return Err(ScheduleError::InvalidInterval(0));
            }
            Ok(now + ChronoDuration::seconds(i64::try_from(*seconds).unwrap_or(i64::MAX)))
        }
        ScheduleKind::Daily => Ok(now + ChronoDuration::days(1)),
        ScheduleKind::Weekly => Ok(now + ChronoDuration::weeks(1)),
        ScheduleKind::Cron { expression } => {
            let schedule = cron::Schedule::from_str(expression)
                .map_err(|_| ScheduleError::InvalidCron(expression.clone()))?;
            schedule
                .after(&now)
                .next()
                .ok_or_else(|| ScheduleError::InvalidCron(expression.clone()))
        }
    }
}

/// Advance a task's `next_run` after a firing.
fn advance(task: &mut ScheduledTask, now: DateTime<Utc>) {
    match &task.kind {
        ScheduleKind::Once { .. } => {
            task.enabled = false;
            task.next_run = None;
        }
        ScheduleKind::Interval { seconds } => {
            task.next_run =
                Some(now + ChronoDuration::seconds(i64::try_from(*seconds).unwrap_or(i64::MAX)));
        }
        ScheduleKind::Daily => task.next_run = Some(now + ChronoDuration::days(1)),
        ScheduleKind::Weekly => task.next_run = Some(now + ChronoDuration::weeks(1)),
        ScheduleKind::Cron { expression } => {
            task.next_run = cron::Schedule::from_str(expression)
                .ok()
                .and_then(|s| s.after(&now).next());
            if task.next_run.is_none() {
                task.enabled = false;
            }
        }
    }
}
