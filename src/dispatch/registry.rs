use super::engine::{EngineReport, EngineStatus, StatusSnapshot};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub type TaskId = u64;

/// Finished reports kept after their entries are removed.
pub const DEFAULT_HISTORY_LIMIT: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no task with id {0}")]
    NotFound(TaskId),
}

struct RegistryEntry {
    status: Arc<EngineStatus>,
    shutdown: CancellationToken,
    done: watch::Receiver<bool>,
}

struct RegistryInner {
    next_id: TaskId,
    entries: BTreeMap<TaskId, RegistryEntry>,
    history: VecDeque<EngineReport>,
}

/// Handed to whoever runs the registered engine.
pub struct TaskRegistration {
    pub id: TaskId,
    pub shutdown: CancellationToken,
    done: watch::Sender<bool>,
}

impl TaskRegistration {
    /// Signals waiters that the shutdown sequence for this task has finished.
    pub fn complete(self) {
        let _ = self.done.send(true);
    }
}

/// Resolves once a task's shutdown sequence (workers stopped, session closed, entry removed)
/// has finished.
#[derive(Clone)]
pub struct TaskCompletion {
    id: TaskId,
    done: watch::Receiver<bool>,
}

impl TaskCompletion {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub async fn wait(mut self) {
        // A dropped sender also means the supervisor is gone.
        let _ = self.done.wait_for(|done| *done).await;
    }
}

/// Process-wide index of running engines.
///
/// Ids start at 1 and increase for the lifetime of the registry; they are never reused.
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
    history_limit: usize,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl TaskRegistry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_id: 1,
                entries: BTreeMap::new(),
                history: VecDeque::new(),
            }),
            history_limit,
        }
    }

    pub fn register(&self, status: Arc<EngineStatus>) -> TaskRegistration {
        let shutdown = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(
            id,
            RegistryEntry {
                status,
                shutdown: shutdown.clone(),
                done: done_rx,
            },
        );

        TaskRegistration {
            id,
            shutdown,
            done: done_tx,
        }
    }

    /// Signals one task to stop. The returned handle resolves when its shutdown finished.
    pub fn cancel(&self, id: TaskId) -> Result<TaskCompletion, RegistryError> {
        let inner = self.lock();
        let entry = inner.entries.get(&id).ok_or(RegistryError::NotFound(id))?;
        entry.shutdown.cancel();
        tracing::info!(task_id = id, "stop requested");
        Ok(TaskCompletion {
            id,
            done: entry.done.clone(),
        })
    }

    /// Signals every registered task to stop. Safe to call repeatedly and while tasks finish.
    pub fn cancel_all(&self) -> Vec<TaskCompletion> {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .map(|(id, entry)| {
                entry.shutdown.cancel();
                TaskCompletion {
                    id: *id,
                    done: entry.done.clone(),
                }
            })
            .collect()
    }

    /// Active entries ordered by id.
    pub fn list(&self) -> Vec<StatusSnapshot> {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .map(|(id, entry)| entry.status.snapshot(*id))
            .collect()
    }

    /// Status of an active task, or the final report of a recently finished one.
    pub fn status(&self, id: TaskId) -> Option<StatusSnapshot> {
        let inner = self.lock();
        if let Some(entry) = inner.entries.get(&id) {
            return Some(entry.status.snapshot(id));
        }
        inner
            .history
            .iter()
            .rev()
            .find(|report| report.status.id == id)
            .map(|report| report.status.clone())
    }

    /// Removes the entry and keeps its final report in the bounded history.
    pub fn finish(&self, report: EngineReport) {
        let mut inner = self.lock();
        inner.entries.remove(&report.status.id);
        if self.history_limit == 0 {
            return;
        }
        while inner.history.len() >= self.history_limit {
            inner.history.pop_front();
        }
        inner.history.push_back(report);
    }

    /// Recently finished reports, oldest first.
    pub fn history(&self) -> Vec<EngineReport> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("task registry mutex poisoned")
    }
}
