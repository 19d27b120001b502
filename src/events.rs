//! Progress & Event Bus (component C11): a process-scoped observable
//! publishing indexing progress, task-queue transitions (C8), and log
//! records to any interested subscriber (CLI tail, daemon metrics
//! endpoint, RPC stream).
//!
//! Grounded on `daemon/state.rs`'s `SyncProgress` (atomics snapshot +
//! `broadcast::Sender<String>`), generalized to the full `IndexingProgress`
//! entity and to a typed event instead of a plain string.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::taskqueue::TaskEvent;

const CURRENT_FILES_CAP: usize = 20;
const COMPLETED_FILES_CAP: usize = 20;
const RECENT_LOG_CAP: usize = 100;
const EVENT_CHANNEL_CAPACITY: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexingStatus {
    Idle,
    Indexing,
    Paused,
    Stopping,
    Stopped,
    Completed,
    CompletedWithErrors,
    Error(String),
}

/// Mirrors SPEC_FULL §3's `IndexingProgress` entity: the single global
/// in-flight indexing run's state. `indexFolder` (C7) refuses to start a
/// second run while `active` is true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingProgress {
    pub active: bool,
    pub project_name: String,
    pub total_files: usize,
    pub processed_files: usize,
    pub failed_files: usize,
    pub failed_paths: Vec<String>,
    pub skipped_files: usize,
    pub status: IndexingStatus,
    /// Files currently being processed by a pipeline worker, bounded so a
    /// wide-concurrency run doesn't grow this list unboundedly.
    pub current_files: VecDeque<String>,
    /// Most recently finished files, newest first, capped at 20.
    pub completed_files: VecDeque<String>,
}

impl IndexingProgress {
    fn idle() -> Self {
        Self {
            active: false,
            project_name: String::new(),
            total_files: 0,
            processed_files: 0,
            failed_files: 0,
            failed_paths: Vec::new(),
            skipped_files: 0,
            status: IndexingStatus::Idle,
            current_files: VecDeque::new(),
            completed_files: VecDeque::new(),
        }
    }

    fn start(project_name: String, total_files: usize) -> Self {
        Self {
            active: true,
            project_name,
            total_files,
            processed_files: 0,
            failed_files: 0,
            failed_paths: Vec::new(),
            skipped_files: 0,
            status: IndexingStatus::Indexing,
            current_files: VecDeque::new(),
            completed_files: VecDeque::new(),
        }
    }

    fn file_started(&mut self, path: &str) {
        if self.current_files.len() >= CURRENT_FILES_CAP {
            self.current_files.pop_front();
        }
        self.current_files.push_back(path.to_string());
    }

    fn file_completed(&mut self, path: &str) {
        self.current_files.retain(|p| p != path);
        self.completed_files.push_front(path.to_string());
        if self.completed_files.len() > COMPLETED_FILES_CAP {
            self.completed_files.pop_back();
        }
        self.processed_files += 1;
    }

    fn file_failed(&mut self, path: &str) {
        self.current_files.retain(|p| p != path);
        self.failed_files += 1;
        self.failed_paths.push(path.to_string());
    }

    fn file_skipped(&mut self, path: &str) {
        self.current_files.retain(|p| p != path);
        self.skipped_files += 1;
    }

    fn finish(&mut self, status: IndexingStatus) {
        self.active = false;
        self.status = status;
        self.current_files.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Progress(IndexingProgress),
    Task(TaskEvent),
    Log(LogRecord),
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Process-wide publisher for indexing progress, task transitions, and
/// log records. Delivery is best-effort: `broadcast::Sender::send`
/// returning an error (no active subscribers) is swallowed rather than
/// propagated, since nothing downstream depends on a subscriber existing.
pub struct EventBus {
    progress: std::sync::Mutex<IndexingProgress>,
    recent_logs: std::sync::Mutex<VecDeque<LogRecord>>,
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            progress: std::sync::Mutex::new(IndexingProgress::idle()),
            recent_logs: std::sync::Mutex::new(VecDeque::new()),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    fn publish_progress(&self, progress: IndexingProgress) {
        let _ = self.sender.send(Event::Progress(progress));
    }

    /// Returns `false` without mutating state if a run is already active,
    /// so callers can surface the precondition failure SPEC_FULL §4.7
    /// requires ("reject if global IndexingProgress.active").
    pub fn start_indexing(&self, project_name: impl Into<String>, total_files: usize) -> bool {
        let mut guard = self.progress.lock().expect("progress mutex poisoned");
        if guard.active {
            return false;
        }
        *guard = IndexingProgress::start(project_name.into(), total_files);
        let snapshot = guard.clone();
        drop(guard);
        self.publish_progress(snapshot);
        true
    }

    pub fn file_started(&self, path: &str) {
        let mut guard = self.progress.lock().expect("progress mutex poisoned");
        guard.file_started(path);
        let snapshot = guard.clone();
        drop(guard);
        self.publish_progress(snapshot);
    }

    pub fn file_completed(&self, path: &str) {
        let mut guard = self.progress.lock().expect("progress mutex poisoned");
        guard.file_completed(path);
        let snapshot = guard.clone();
        drop(guard);
        self.publish_progress(snapshot);
    }

    pub fn file_failed(&self, path: &str) {
        let mut guard = self.progress.lock().expect("progress mutex poisoned");
        guard.file_failed(path);
        let snapshot = guard.clone();
        drop(guard);
        self.publish_progress(snapshot);
    }

    pub fn file_skipped(&self, path: &str) {
        let mut guard = self.progress.lock().expect("progress mutex poisoned");
        guard.file_skipped(path);
        let snapshot = guard.clone();
        drop(guard);
        self.publish_progress(snapshot);
    }

    pub fn finish_indexing(&self, status: IndexingStatus) {
        let mut guard = self.progress.lock().expect("progress mutex poisoned");
        guard.finish(status);
        let snapshot = guard.clone();
        drop(guard);
        self.publish_progress(snapshot);
    }

    /// Updates `status` in place without touching `active` or any file
    /// counters — used by the pause/stop control surface to reflect an
    /// intermediate state (`Paused`, `Stopping`) while a run stays active.
    pub fn set_status(&self, status: IndexingStatus) {
        let mut guard = self.progress.lock().expect("progress mutex poisoned");
        guard.status = status;
        let snapshot = guard.clone();
        drop(guard);
        self.publish_progress(snapshot);
    }

    pub fn snapshot(&self) -> IndexingProgress {
        self.progress.lock().expect("progress mutex poisoned").clone()
    }

    pub fn publish_task_event(&self, event: TaskEvent) {
        let _ = self.sender.send(Event::Task(event));
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let record = LogRecord {
            level,
            message: message.into(),
            timestamp_ms: now_millis(),
        };
        let mut recent = self.recent_logs.lock().expect("log buffer poisoned");
        recent.push_back(record.clone());
        if recent.len() > RECENT_LOG_CAP {
            recent.pop_front();
        }
        drop(recent);
        let _ = self.sender.send(Event::Log(record));
    }

    pub fn recent_logs(&self) -> Vec<LogRecord> {
        self.recent_logs.lock().expect("log buffer poisoned").iter().cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_indexing_rejects_concurrent_run() {
        let bus = EventBus::new();
        assert!(bus.start_indexing("proj", 10));
        assert!(!bus.start_indexing("proj2", 5));
        assert_eq!(bus.snapshot().project_name, "proj");
    }

    #[test]
    fn finishing_allows_a_new_run_to_start() {
        let bus = EventBus::new();
        bus.start_indexing("proj", 1);
        bus.finish_indexing(IndexingStatus::Completed);
        assert!(bus.start_indexing("proj2", 1));
    }

    #[test]
    fn current_files_bounded_at_twenty() {
        let bus = EventBus::new();
        bus.start_indexing("proj", 100);
        for i in 0..30 {
            bus.file_started(&format!("f{i}.rs"));
        }
        assert_eq!(bus.snapshot().current_files.len(), CURRENT_FILES_CAP);
    }

    #[test]
    fn completed_files_bounded_and_newest_first() {
        let bus = EventBus::new();
        bus.start_indexing("proj", 100);
        for i in 0..25 {
            let path = format!("f{i}.rs");
            bus.file_started(&path);
            bus.file_completed(&path);
        }
        let snap = bus.snapshot();
        assert_eq!(snap.completed_files.len(), COMPLETED_FILES_CAP);
        assert_eq!(snap.completed_files[0], "f24.rs");
        assert_eq!(snap.processed_files, 25);
    }

    #[test]
    fn failed_files_are_tracked_with_paths() {
        let bus = EventBus::new();
        bus.start_indexing("proj", 2);
        bus.file_started("bad.rs");
        bus.file_failed("bad.rs");
        let snap = bus.snapshot();
        assert_eq!(snap.failed_files, 1);
        assert_eq!(snap.failed_paths, vec!["bad.rs".to_string()]);
        assert!(snap.current_files.is_empty());
    }

    #[test]
    fn set_status_leaves_active_and_counters_untouched() {
        let bus = EventBus::new();
        bus.start_indexing("proj", 10);
        bus.file_completed("a.rs");
        bus.set_status(IndexingStatus::Paused);

        let snap = bus.snapshot();
        assert_eq!(snap.status, IndexingStatus::Paused);
        assert!(snap.active);
        assert_eq!(snap.processed_files, 1);
    }

    #[test]
    fn recent_logs_bounded_at_one_hundred() {
        let bus = EventBus::new();
        for i in 0..150 {
            bus.log(LogLevel::Info, format!("message {i}"));
        }
        assert_eq!(bus.recent_logs().len(), RECENT_LOG_CAP);
    }
}
