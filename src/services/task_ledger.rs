//! Task manager: sole custodian of the task ledger.
//!
//! All other components request transitions; they do not perform them. Every
//! mutation flushes both serialisations before the exclusive lock is
//! released: the machine-readable JSON document (authoritative, read by the
//! stop hook) and the human-readable Markdown rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::error::TaskError;
use crate::domain::models::task::{Task, TaskState};

/// The authoritative on-disk ledger document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub session_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
}

/// Read-only view of the ledger at a point in time.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    pub session_id: Option<String>,
    pub tasks: Vec<Task>,
    completed: HashSet<String>,
}

impl LedgerSnapshot {
    pub fn is_completed(&self, task_id: &str) -> bool {
        self.completed.contains(task_id)
    }

    /// Tasks not yet completed, in ledger order.
    pub fn remaining(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.state != TaskState::Completed)
            .collect()
    }
}

/// Result of the completion-verification operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub all_complete: bool,
    pub incomplete_ids: Vec<String>,
    pub blocked_ids: Vec<String>,
}

/// Per-state counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub blocked: usize,
}

struct Inner {
    session_id: Option<String>,
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
    next_id: u32,
}

impl Inner {
    fn get_mut(&mut self, task_id: &str) -> Result<&mut Task, TaskError> {
        let idx = *self
            .index
            .get(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
        Ok(&mut self.tasks[idx])
    }
}

/// Single-writer task manager.
///
/// Strict mode (the default) makes blocked tasks forbid completion in
/// [`TaskManager::verify_completion`].
pub struct TaskManager {
    inner: Mutex<Inner>,
    json_path: Option<PathBuf>,
    markdown_path: Option<PathBuf>,
    strict: bool,
}

impl TaskManager {
    pub fn new(json_path: Option<PathBuf>, markdown_path: Option<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                session_id: None,
                tasks: Vec::new(),
                index: HashMap::new(),
                next_id: 1,
            }),
            json_path,
            markdown_path,
            strict: true,
        }
    }

    /// Disable strict mode: blocked tasks no longer forbid completion.
    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Bind the ledger to a session. Recorded in both serialisations.
    pub async fn bind_session(&self, session_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.session_id = Some(session_id.to_string());
        self.flush(&inner).await;
    }

    /// Load an existing ledger document from disk, replacing in-memory state.
    pub async fn load(&self) -> Result<(), TaskError> {
        let Some(ref path) = self.json_path else {
            return Ok(());
        };
        let Ok(raw) = tokio::fs::read_to_string(path).await else {
            return Ok(());
        };
        let doc: LedgerDocument = serde_json::from_str(&raw)
            .map_err(|e| TaskError::NotFound(format!("ledger unreadable: {e}")))?;

        let mut inner = self.inner.lock().await;
        inner.session_id = doc.session_id;
        inner.index = doc
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        inner.next_id = u32::try_from(doc.tasks.len()).unwrap_or(u32::MAX).saturating_add(1);
        inner.tasks = doc.tasks;
        Ok(())
    }

    /// Create one task per description. Returns the assigned ids.
    pub async fn create_tasks(&self, descriptions: &[String]) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        let mut ids = Vec::with_capacity(descriptions.len());
        for description in descriptions {
            let id = format!("task_{}", inner.next_id);
            inner.next_id += 1;
            let idx = inner.tasks.len();
            inner.index.insert(id.clone(), idx);
            inner.tasks.push(Task::new(id.clone(), description.clone()));
            ids.push(id);
        }
        info!(count = descriptions.len(), "Task ledger expanded");
        self.flush(&inner).await;
        ids
    }

    /// Add a single task. The ledger is expand-only; there is no removal.
    pub async fn add_task(&self, description: &str) -> String {
        self.create_tasks(&[description.to_string()]).await.remove(0)
    }

    /// `pending -> in_progress` (also recovers `blocked -> in_progress`).
    pub async fn start(&self, task_id: &str) -> Result<(), TaskError> {
        let mut inner = self.inner.lock().await;
        let task = inner.get_mut(task_id)?;
        task.validate_transition(TaskState::InProgress, None, None)?;
        task.state = TaskState::InProgress;
        task.blocked_reason = None;
        task.updated_at = Some(Utc::now());
        debug!(task_id, "Task started");
        self.flush(&inner).await;
        Ok(())
    }

    /// `in_progress -> completed`. Requires evidence of at least
    /// [`crate::domain::models::task::MIN_EVIDENCE_CHARS`] characters.
    pub async fn complete(&self, task_id: &str, evidence: &str) -> Result<(), TaskError> {
        let mut inner = self.inner.lock().await;
        let task = inner.get_mut(task_id)?;
        task.validate_transition(TaskState::Completed, Some(evidence), None)?;
        task.state = TaskState::Completed;
        task.evidence = Some(evidence.to_string());
        task.updated_at = Some(Utc::now());
        info!(task_id, "Task completed");
        self.flush(&inner).await;
        Ok(())
    }

    /// `any -> blocked`. Requires a non-empty reason.
    pub async fn block(&self, task_id: &str, reason: &str) -> Result<(), TaskError> {
        let mut inner = self.inner.lock().await;
        let task = inner.get_mut(task_id)?;
        task.validate_transition(TaskState::Blocked, None, Some(reason))?;
        task.state = TaskState::Blocked;
        task.blocked_reason = Some(reason.to_string());
        task.updated_at = Some(Utc::now());
        warn!(task_id, reason, "Task blocked");
        self.flush(&inner).await;
        Ok(())
    }

    /// Append a progress note.
    pub async fn add_note(&self, task_id: &str, note: &str) -> Result<(), TaskError> {
        let mut inner = self.inner.lock().await;
        let task = inner.get_mut(task_id)?;
        task.notes.push(note.to_string());
        task.updated_at = Some(Utc::now());
        self.flush(&inner).await;
        Ok(())
    }

    pub async fn get(&self, task_id: &str) -> Option<Task> {
        let inner = self.inner.lock().await;
        inner
            .index
            .get(task_id)
            .map(|&idx| inner.tasks[idx].clone())
    }

    /// Atomic point-in-time view of the ledger.
    pub async fn snapshot(&self) -> LedgerSnapshot {
        let inner = self.inner.lock().await;
        let completed = inner
            .tasks
            .iter()
            .filter(|t| t.state == TaskState::Completed)
            .map(|t| t.id.clone())
            .collect();
        LedgerSnapshot {
            session_id: inner.session_id.clone(),
            tasks: inner.tasks.clone(),
            completed,
        }
    }

    /// The operation the stop hook's ledger check consults.
    ///
    /// In strict mode blocked tasks also forbid completion.
    pub async fn verify_completion(&self) -> CompletionReport {
        let inner = self.inner.lock().await;
        let mut incomplete_ids = Vec::new();
        let mut blocked_ids = Vec::new();

        for task in &inner.tasks {
            match task.state {
                TaskState::Blocked => blocked_ids.push(task.id.clone()),
                TaskState::Completed => {}
                _ => incomplete_ids.push(task.id.clone()),
            }
        }

        let all_complete = incomplete_ids.is_empty() && (!self.strict || blocked_ids.is_empty());
        CompletionReport {
            all_complete,
            incomplete_ids,
            blocked_ids,
        }
    }

    /// Per-state counts.
    pub async fn summary(&self) -> LedgerSummary {
        let inner = self.inner.lock().await;
        let mut summary = LedgerSummary {
            total: inner.tasks.len(),
            ..LedgerSummary::default()
        };
        for task in &inner.tasks {
            match task.state {
                TaskState::Pending => summary.pending += 1,
                TaskState::InProgress => summary.in_progress += 1,
                TaskState::Completed => summary.completed += 1,
                TaskState::Blocked => summary.blocked += 1,
            }
        }
        summary
    }

    /// Flush both serialisations. Called with the lock held so readers never
    /// observe a half-written pair.
    async fn flush(&self, inner: &Inner) {
        let doc = LedgerDocument {
            session_id: inner.session_id.clone(),
            updated_at: Utc::now(),
            tasks: inner.tasks.clone(),
        };

        if let Some(ref path) = self.json_path {
            match serde_json::to_string_pretty(&doc) {
                Ok(json) => write_atomic(path, &json).await,
                Err(e) => warn!(error = %e, "Failed to serialize task ledger"),
            }
        }

        if let Some(ref path) = self.markdown_path {
            let markdown = render_markdown(&doc);
            write_atomic(path, &markdown).await;
        }
    }
}

/// Write via a temp file in the same directory, then rename into place.
async fn write_atomic(path: &PathBuf, content: &str) {
    if let Some(parent) = path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    let tmp = path.with_extension("tmp");
    if let Err(e) = tokio::fs::write(&tmp, content).await {
        warn!(error = %e, path = %path.display(), "Failed to write ledger file");
        return;
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        warn!(error = %e, path = %path.display(), "Failed to move ledger file into place");
    }
}

fn render_markdown(doc: &LedgerDocument) -> String {
    let mut lines = vec![
        "# Task Ledger".to_string(),
        format!("Session: {}", doc.session_id.as_deref().unwrap_or("unknown")),
        format!("Updated: {}", doc.updated_at.to_rfc3339()),
        String::new(),
        "## Tasks".to_string(),
    ];

    for task in &doc.tasks {
        lines.push(format!(
            "{} {}: {}",
            task.state.marker(),
            task.id,
            task.description
        ));
        if let Some(ref evidence) = task.evidence {
            lines.push(format!("    Evidence: {evidence}"));
        }
        if let Some(ref reason) = task.blocked_reason {
            lines.push(format!("    Blocked: {reason}"));
        }
        for note in &task.notes {
            lines.push(format!("    - {note}"));
        }
    }

    lines.extend([
        String::new(),
        "## Notes".to_string(),
        "- Tasks may be expanded but never deleted".to_string(),
        "- Completed tasks must include evidence".to_string(),
        String::new(),
    ]);

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptions(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_create_start_complete() {
        let manager = TaskManager::new(None, None);
        let ids = manager
            .create_tasks(&descriptions(&["load context", "run workflow"]))
            .await;
        assert_eq!(ids, vec!["task_1", "task_2"]);

        manager.start("task_1").await.unwrap();
        manager
            .complete("task_1", "workflow output captured in artifacts")
            .await
            .unwrap();

        let task = manager.get("task_1").await.unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert!(task.evidence.is_some());
    }

    #[tokio::test]
    async fn test_completion_rules_enforced() {
        let manager = TaskManager::new(None, None);
        manager.create_tasks(&descriptions(&["a"])).await;

        // Pending cannot complete directly
        assert!(manager.complete("task_1", "plenty of evidence here").await.is_err());

        manager.start("task_1").await.unwrap();
        assert_eq!(
            manager.complete("task_1", "short").await,
            Err(TaskError::EvidenceTooShort { len: 5, min: 10 })
        );
    }

    #[tokio::test]
    async fn test_completed_is_immutable() {
        let manager = TaskManager::new(None, None);
        manager.create_tasks(&descriptions(&["a"])).await;
        manager.start("task_1").await.unwrap();
        manager.complete("task_1", "all checks green").await.unwrap();

        assert_eq!(
            manager.block("task_1", "should not work").await,
            Err(TaskError::CompletedIsFinal("task_1".to_string()))
        );
        assert_eq!(
            manager.start("task_1").await,
            Err(TaskError::CompletedIsFinal("task_1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_blocked_recoverable_and_strict_verification() {
        let manager = TaskManager::new(None, None);
        manager.create_tasks(&descriptions(&["a", "b"])).await;

        manager.start("task_1").await.unwrap();
        manager.complete("task_1", "verified by test run").await.unwrap();
        manager.block("task_2", "upstream outage").await.unwrap();

        let report = manager.verify_completion().await;
        assert!(!report.all_complete);
        assert!(report.incomplete_ids.is_empty());
        assert_eq!(report.blocked_ids, vec!["task_2"]);

        // Recover and finish
        manager.start("task_2").await.unwrap();
        manager.complete("task_2", "outage resolved, rerun ok").await.unwrap();
        assert!(manager.verify_completion().await.all_complete);
    }

    #[tokio::test]
    async fn test_lenient_mode_ignores_blocked() {
        let manager = TaskManager::new(None, None).lenient();
        manager.create_tasks(&descriptions(&["a"])).await;
        manager.block("task_1", "stuck").await.unwrap();

        let report = manager.verify_completion().await;
        assert!(report.all_complete);
        assert_eq!(report.blocked_ids, vec!["task_1"]);
    }

    #[tokio::test]
    async fn test_ledger_only_blocked_strict() {
        let manager = TaskManager::new(None, None);
        manager.create_tasks(&descriptions(&["a", "b"])).await;
        manager.block("task_1", "stuck").await.unwrap();
        manager.block("task_2", "also stuck").await.unwrap();

        let report = manager.verify_completion().await;
        assert!(!report.all_complete);
    }

    #[tokio::test]
    async fn test_json_round_trip_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("tasks.json");
        let manager = TaskManager::new(Some(json_path.clone()), None);
        manager.bind_session("sess_1").await;
        manager.create_tasks(&descriptions(&["a", "b"])).await;
        manager.start("task_1").await.unwrap();
        manager.complete("task_1", "output validated").await.unwrap();

        let raw = tokio::fs::read_to_string(&json_path).await.unwrap();
        let doc: LedgerDocument = serde_json::from_str(&raw).unwrap();
        let reserialized = serde_json::to_string_pretty(&doc).unwrap();
        assert_eq!(raw, reserialized);
    }

    #[tokio::test]
    async fn test_markdown_rendering_markers() {
        let dir = tempfile::tempdir().unwrap();
        let md_path = dir.path().join("to-do.md");
        let manager = TaskManager::new(None, Some(md_path.clone()));
        manager.bind_session("sess_1").await;
        manager.create_tasks(&descriptions(&["first", "second", "third"])).await;
        manager.start("task_1").await.unwrap();
        manager.complete("task_1", "done with proof attached").await.unwrap();
        manager.start("task_2").await.unwrap();
        manager.block("task_3", "waiting on approval").await.unwrap();

        let md = tokio::fs::read_to_string(&md_path).await.unwrap();
        assert!(md.contains("[x] task_1: first"));
        assert!(md.contains("[~] task_2: second"));
        assert!(md.contains("[!] task_3: third"));
        assert!(md.contains("    Evidence: done with proof attached"));
        assert!(md.contains("    Blocked: waiting on approval"));
    }

    #[tokio::test]
    async fn test_load_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("tasks.json");
        {
            let manager = TaskManager::new(Some(json_path.clone()), None);
            manager.bind_session("sess_1").await;
            manager.create_tasks(&descriptions(&["a"])).await;
            manager.start("task_1").await.unwrap();
        }

        let manager = TaskManager::new(Some(json_path), None);
        manager.load().await.unwrap();
        let task = manager.get("task_1").await.unwrap();
        assert_eq!(task.state, TaskState::InProgress);

        // New tasks continue the id sequence
        let id = manager.add_task("b").await;
        assert_eq!(id, "task_2");
    }

    #[tokio::test]
    async fn test_snapshot_is_atomic_view() {
        let manager = TaskManager::new(None, None);
        manager.create_tasks(&descriptions(&["a", "b"])).await;
        manager.start("task_1").await.unwrap();
        manager.complete("task_1", "evidence recorded here").await.unwrap();

        let snapshot = manager.snapshot().await;
        assert!(snapshot.is_completed("task_1"));
        assert!(!snapshot.is_completed("task_2"));
        assert_eq!(snapshot.remaining().len(), 1);
    }
}
