//! # Task Supervisor Module
//!
//! Named periodic background jobs with per-iteration statistics.
//!
//! Each registered job owns one tokio task that runs the job immediately,
//! then on a fixed interval. Iteration failures (including panics) are
//! recorded and logged but never stop the loop; only unregistration or
//! supervisor shutdown does, and both wait for an in-progress iteration
//! rather than interrupting it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::PacerResult;

/// Sliding window of iteration durations kept per task for averaging.
pub const DEFAULT_DURATION_WINDOW: usize = 50;

/// A unit of recurring work.
///
/// Implementations must tolerate being re-run after a failed iteration;
/// the supervisor restarts nothing and carries no state between runs.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    async fn run(&self) -> PacerResult<()>;
}

struct FnJob {
    f: Box<dyn Fn() -> BoxFuture<'static, PacerResult<()>> + Send + Sync>,
}

#[async_trait]
impl PeriodicJob for FnJob {
    async fn run(&self) -> PacerResult<()> {
        (self.f)().await
    }
}

/// Wrap an async closure as a [`PeriodicJob`].
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn PeriodicJob>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PacerResult<()>> + Send + 'static,
{
    Arc::new(FnJob {
        f: Box::new(move || f().boxed()),
    })
}

/// Accumulated statistics for one supervised task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub name: String,
    pub interval: Duration,
    /// Successful iterations. Failures count only toward `error_count`.
    pub run_count: u64,
    /// Failed or panicked iterations.
    pub error_count: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Mean duration over the most recent successful iterations
    /// (sliding window).
    pub avg_duration_ms: f64,
    #[serde(skip)]
    durations: VecDeque<Duration>,
}

impl TaskRecord {
    fn new(name: String, interval: Duration) -> Self {
        Self {
            name,
            interval,
            run_count: 0,
            error_count: 0,
            last_run_at: None,
            last_error: None,
            avg_duration_ms: 0.0,
            durations: VecDeque::new(),
        }
    }

    fn record_iteration(&mut self, elapsed: Duration, error: Option<String>, window: usize) {
        self.last_run_at = Some(Utc::now());
        match error {
            Some(e) => {
                self.error_count += 1;
                self.last_error = Some(e);
            }
            None => {
                self.run_count += 1;
                if self.durations.len() >= window {
                    self.durations.pop_front();
                }
                self.durations.push_back(elapsed);
                let total: Duration = self.durations.iter().sum();
                self.avg_duration_ms = total.as_secs_f64() * 1_000.0 / self.durations.len() as f64;
            }
        }
    }
}

struct SupervisedTask {
    record: Arc<Mutex<TaskRecord>>,
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Registry of named periodic jobs.
pub struct TaskSupervisor {
    tasks: DashMap<String, SupervisedTask>,
    duration_window: usize,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::with_duration_window(DEFAULT_DURATION_WINDOW)
    }

    pub fn with_duration_window(duration_window: usize) -> Self {
        Self {
            tasks: DashMap::new(),
            duration_window: duration_window.max(1),
        }
    }

    /// Start running `job` every `interval`, beginning immediately.
    ///
    /// Registering a name that is already taken stops the previous task
    /// and replaces it. Must be called within a Tokio runtime.
    pub fn register(&self, name: &str, interval: Duration, job: Arc<dyn PeriodicJob>) {
        let record = Arc::new(Mutex::new(TaskRecord::new(name.to_string(), interval)));
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run_loop(
            name.to_string(),
            interval,
            job,
            record.clone(),
            shutdown.clone(),
            self.duration_window,
        ));

        let task = SupervisedTask {
            record,
            shutdown,
            handle,
        };
        if let Some(previous) = self.tasks.insert(name.to_string(), task) {
            warn!(task = name, "Replacing already-registered periodic task");
            previous.shutdown.notify_one();
        }
    }

    /// Stop a task cooperatively. Returns false when the name is unknown.
    pub fn unregister(&self, name: &str) -> bool {
        match self.tasks.remove(name) {
            Some((_, task)) => {
                task.shutdown.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn stats(&self, name: &str) -> Option<TaskRecord> {
        self.tasks.get(name).map(|task| task.record.lock().clone())
    }

    pub fn stats_all(&self) -> HashMap<String, TaskRecord> {
        self.tasks
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().record.lock().clone()))
            .collect()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every task and wait for in-progress iterations to finish.
    pub async fn shutdown_all(&self) {
        let names: Vec<String> = self.tasks.iter().map(|entry| entry.key().clone()).collect();
        for name in names {
            if let Some((_, task)) = self.tasks.remove(&name) {
                task.shutdown.notify_one();
                if let Err(e) = task.handle.await {
                    debug!(task = name.as_str(), error = %e, "Periodic task join failed");
                }
            }
        }
        info!("Task supervisor stopped");
    }
}

impl std::fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("tasks", &self.tasks.len())
            .field("duration_window", &self.duration_window)
            .finish()
    }
}

async fn run_loop(
    name: String,
    interval: Duration,
    job: Arc<dyn PeriodicJob>,
    record: Arc<Mutex<TaskRecord>>,
    shutdown: Arc<Notify>,
    window: usize,
) {
    info!(
        task = name.as_str(),
        interval_ms = interval.as_millis() as u64,
        "Periodic task started"
    );
    loop {
        let started = Instant::now();
        let error = match AssertUnwindSafe(job.run()).catch_unwind().await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                error!(task = name.as_str(), error = %e, "Periodic task iteration failed");
                Some(e.to_string())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    task = name.as_str(),
                    panic = message.as_str(),
                    "Periodic task iteration panicked"
                );
                Some(format!("panicked: {message}"))
            }
        };
        record
            .lock()
            .record_iteration(started.elapsed(), error, window);

        // A stop requested mid-iteration lands here as a stored permit.
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.notified() => {
                info!(task = name.as_str(), "Periodic task stopped");
                return;
            }
        }
    }
}
