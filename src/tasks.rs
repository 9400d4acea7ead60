//! Task records and the business rules around them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::container::{Hook, Module, Provider};
use crate::logger::Logger;
use crate::metrics::Metrics;
use crate::storage::Storage;

/// Status given to every new task.
pub const STATUS_PENDING: &str = "pending";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field changes for [`TaskManager::update`]. Empty strings leave the field
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub title: String,
    pub description: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total_tasks: usize,
    pub total_requests: u64,
    pub total_errors: u64,
    pub by_status: BTreeMap<String, usize>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("title is required")]
    InvalidArgument,

    #[error("task not found")]
    NotFound,

    /// The in-memory store cannot fail today; kept for backends that can.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Hands out `task-<nanos>` ids that never repeat within the process, even
/// when the clock does not move between two calls.
#[derive(Debug, Default)]
struct IdSequence {
    last: AtomicI64,
}

impl IdSequence {
    fn next(&self, now: DateTime<Utc>) -> String {
        let stamp = now.timestamp_nanos_opt().unwrap_or(i64::MAX);
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(stamp.max(last.saturating_add(1)))
            })
            .unwrap_or(stamp);
        format!("task-{}", stamp.max(previous.saturating_add(1)))
    }
}

pub struct TaskManager {
    storage: Arc<dyn Storage<Task>>,
    metrics: Arc<Metrics>,
    ids: IdSequence,
    log: Logger,
}

impl TaskManager {
    pub fn new(storage: Arc<dyn Storage<Task>>, metrics: Arc<Metrics>, log: Logger) -> Self {
        Self {
            storage,
            metrics,
            ids: IdSequence::default(),
            log,
        }
    }

    /// Count a business error and hand it back.
    fn fail(&self, err: TaskError) -> TaskError {
        self.metrics.increment_errors();
        err
    }

    pub async fn create(&self, title: &str, description: &str) -> Result<Task, TaskError> {
        if title.is_empty() {
            return Err(self.fail(TaskError::InvalidArgument));
        }
        let now = Utc::now();
        let task = Task {
            id: self.ids.next(now),
            title: title.to_string(),
            description: description.to_string(),
            status: STATUS_PENDING.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.storage.set(task.id.clone(), task.clone()).await;
        self.log
            .in_scope(|| info!(task_id = %task.id, title = %task.title, "task created"));
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> Result<Task, TaskError> {
        match self.storage.get(id).await {
            Some(task) => Ok(task),
            None => Err(self.fail(TaskError::NotFound)),
        }
    }

    /// All tasks, in no particular order.
    pub async fn list(&self) -> Vec<Task> {
        self.storage.list().await.into_values().collect()
    }

    pub async fn update(&self, id: &str, changes: TaskUpdate) -> Result<Task, TaskError> {
        let TaskUpdate {
            title,
            description,
            status,
        } = changes;
        let apply = move |task: &mut Task| {
            if !title.is_empty() {
                task.title = title;
            }
            if !description.is_empty() {
                task.description = description;
            }
            if !status.is_empty() {
                task.status = status;
            }
            // Strictly later than the previous stamp, even on a coarse clock.
            let floor = task.updated_at + chrono::Duration::nanoseconds(1);
            task.updated_at = Utc::now().max(floor);
        };

        let Some(task) = self.storage.update(id, Box::new(apply)).await else {
            return Err(self.fail(TaskError::NotFound));
        };
        self.log
            .in_scope(|| info!(task_id = %task.id, status = %task.status, "task updated"));
        Ok(task)
    }

    pub async fn delete(&self, id: &str) -> Result<(), TaskError> {
        if self.storage.remove(id).await.is_none() {
            return Err(self.fail(TaskError::NotFound));
        }
        self.log.in_scope(|| info!(task_id = %id, "task deleted"));
        Ok(())
    }

    pub async fn get_stats(&self) -> TaskStats {
        let tasks = self.storage.list().await;
        let mut by_status = BTreeMap::new();
        for task in tasks.values() {
            *by_status.entry(task.status.clone()).or_insert(0) += 1;
        }
        let snapshot = self.metrics.snapshot();
        debug!(tasks = tasks.len(), "stats computed");
        TaskStats {
            total_tasks: tasks.len(),
            total_requests: snapshot.requests,
            total_errors: snapshot.errors,
            by_status,
        }
    }
}

pub fn module() -> Module {
    Module::new("tasks", "Task Management").provide(Provider::new(
        "new_task_manager",
        |lc, (log, storage, metrics): (Logger, Arc<dyn Storage<Task>>, Arc<Metrics>)| {
            let log = log.with_component("tasks");
            let manager = Arc::new(TaskManager::new(storage, metrics, log.clone()));
            let counting = Arc::clone(&manager);
            lc.append(
                Hook::new("task manager")
                    .instrument(log.span())
                    .on_start(move |_ctx| async move {
                        info!("task manager started");
                        anyhow::Ok(())
                    })
                    .on_stop(move |_ctx| async move {
                        let active = counting.storage.count().await;
                        info!(active_tasks = active, "task manager stopping");
                        anyhow::Ok(())
                    }),
            );
            Ok(manager)
        },
    ))
}
