//! The worker pool executing independent compute tasks.
//!
//! Tasks are enqueued, scheduled either statically (contiguous chunks, one
//! per worker) or dynamically (workers pull batches from a shared queue),
//! run to completion on a bounded thread pool, and handed back in submission
//! order. A task failure never disappears: the first one is returned from
//! [`WorkerPool::start_and_wait`] after every task has finished.

use super::error::EngineError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::debug;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// A unit of independent work.
///
/// Implementations must not share mutable state; the pool provides a
/// happens-before edge from [`WorkerPool::add_task`] to `execute` and from
/// `execute` to the [`WorkerPool::finished`] iteration.
pub trait Task: Send {
    fn execute(&mut self) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    Static,
    Dynamic { batch: usize },
}

/// A fixed-width pool over an ordered task list.
pub struct WorkerPool<T: Task> {
    tasks: Vec<T>,
    threads: usize,
    schedule: Schedule,
}

impl<T: Task> Default for WorkerPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Task> WorkerPool<T> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            threads: 1,
            schedule: Schedule::Static,
        }
    }

    /// Enqueues a task at the back of the submission order.
    pub fn add_task(&mut self, task: T) {
        self.tasks.push(task);
    }

    /// Sets the worker count; values below one are clamped to one.
    pub fn set_active_threads(&mut self, threads: usize) {
        self.threads = threads.max(1);
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Partitions the task list into roughly equal contiguous chunks, one
    /// per worker, each processed sequentially.
    pub fn run_static(&mut self) {
        self.schedule = Schedule::Static;
    }

    /// Workers pull `batch` tasks at a time from the shared queue until it
    /// drains.
    pub fn run_dynamic(&mut self, batch: usize) {
        self.schedule = Schedule::Dynamic { batch: batch.max(1) };
    }

    /// Launches the pool and blocks until every task has run.
    ///
    /// All tasks are executed even when one fails; the first failure in
    /// submission order is returned after the join. A panicking task
    /// surfaces as [`EngineError::Internal`].
    pub fn start_and_wait(&mut self) -> Result<(), EngineError> {
        debug!(
            tasks = self.tasks.len(),
            threads = self.threads,
            schedule = ?self.schedule,
            "Starting worker pool"
        );
        let results = self.execute_all()?;
        results.into_iter().collect()
    }

    /// The completed tasks, in submission order.
    pub fn finished(&self) -> impl Iterator<Item = &T> {
        self.tasks.iter()
    }

    /// Consumes the pool, yielding the completed tasks in submission order.
    pub fn into_finished(self) -> Vec<T> {
        self.tasks
    }

    fn run_one(task: &mut T) -> Result<(), EngineError> {
        catch_unwind(AssertUnwindSafe(|| task.execute()))
            .unwrap_or_else(|_| Err(EngineError::Internal("worker task panicked".to_string())))
    }

    #[cfg(feature = "parallel")]
    fn execute_all(&mut self) -> Result<Vec<Result<(), EngineError>>, EngineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| EngineError::Internal(format!("thread pool construction: {e}")))?;

        let granularity = match self.schedule {
            Schedule::Static => self.tasks.len().div_ceil(self.threads).max(1),
            Schedule::Dynamic { batch } => batch,
        };
        let schedule = self.schedule;
        let tasks = &mut self.tasks;

        Ok(pool.install(move || match schedule {
            Schedule::Static => tasks
                .par_iter_mut()
                .with_min_len(granularity)
                .map(Self::run_one)
                .collect(),
            Schedule::Dynamic { .. } => tasks
                .par_iter_mut()
                .with_max_len(granularity)
                .map(Self::run_one)
                .collect(),
        }))
    }

    #[cfg(not(feature = "parallel"))]
    fn execute_all(&mut self) -> Result<Vec<Result<(), EngineError>>, EngineError> {
        Ok(self.tasks.iter_mut().map(Self::run_one).collect())
    }
}
