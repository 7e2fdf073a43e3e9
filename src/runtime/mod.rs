//! Task runtime (§2, §5): chain (sequential), group (parallel fan-out), and
//! chord (group + callback on all-complete) composition primitives over
//! soft/hard wall-clock-limited tasks.
//!
//! Grounded on `job_scheduling/job_queue.rs` and `job_scheduling/job_queue_runner.rs`
//! (priority/concurrency bookkeeping, `tokio_util::sync::CancellationToken`
//! threaded through a `run()` loop) but generalized to the chain/group/chord
//! primitives named in §2/§9, which the teacher's job scheduler does not
//! have — it only executes individual jobs one at a time. `chain` itself
//! needs no special type in Rust: it is just sequential `.await`s in the
//! caller (§4.2's `chain(Scrape, Dispatch)` is exactly that in
//! `refresh::run_refresh_pipeline`). `group`/`chord` are the composition
//! primitives that actually need runtime support, so that is what this
//! module provides.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::RuntimeError;

#[derive(Debug, Clone, Copy)]
pub struct TaskLimits {
    pub soft: Duration,
    pub hard: Duration,
}

/// Outcome of one task in a group (§4.2.3/§4.5: soft/hard wall-clock limits,
/// cooperative cancellation).
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// The hard limit elapsed before the task finished; it has been
    /// aborted. §7: "Chunk-level exception: logged, chunk result is `[]`,
    /// aggregator proceeds" — callers should treat this the same way.
    HardTimedOut,
    Panicked(String),
}

impl<T> TaskOutcome<T> {
    pub fn into_completed(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }
}

/// Tokio-task-spawning executor (§10.4). `group` runs every task
/// concurrently via `JoinSet`; `chord` is `group` followed by an aggregator
/// callback invoked exactly once with every group member's outcome.
pub struct InMemoryTaskRuntime {
    cancellation: CancellationToken,
}

impl Default for InMemoryTaskRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskRuntime {
    pub fn new() -> Self {
        Self { cancellation: CancellationToken::new() }
    }

    /// Liveness check for the orchestrator's health-check loop (§4.1: "worker
    /// runtime via a control-plane ping").
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        if self.cancellation.is_cancelled() {
            return Err(RuntimeError::Unreachable);
        }
        Ok(())
    }

    /// A SIGINT/SIGTERM cancels every in-flight soft-limit check (§5:
    /// "Cancellation is cooperative").
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }

    /// Runs `tasks` concurrently (§2 `group`). Each task gets its own
    /// soft/hard limit: a task still running past `soft` logs a warning
    /// (cooperative — it is expected to notice its own cancellation token
    /// and flush state) but is only forcibly aborted at `hard`.
    pub async fn group<T, F, Fut>(&self, name: &str, limits: TaskLimits, tasks: Vec<F>) -> Vec<TaskOutcome<T>>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut joinset: JoinSet<(usize, TaskOutcome<T>)> = JoinSet::new();
        let total = tasks.len();

        for (index, task) in tasks.into_iter().enumerate() {
            let token = self.cancellation.child_token();
            let task_name = format!("{name}[{index}]");
            let soft = limits.soft;
            let hard = limits.hard;

            joinset.spawn(async move {
                let outcome = run_with_limits(&task_name, soft, hard, token, task).await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<TaskOutcome<T>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = joinset.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(join_err) => {
                    warn!(name, error = %join_err, "group member task join error");
                }
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| TaskOutcome::Panicked("task dropped without completing".to_string())))
            .collect()
    }

    /// `group` followed by invoking `callback` exactly once with every
    /// member's outcome (§2 `chord`).
    pub async fn chord<T, F, Fut, A, Cb, FutA>(
        &self,
        name: &str,
        limits: TaskLimits,
        tasks: Vec<F>,
        callback: Cb,
    ) -> A
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        Cb: FnOnce(Vec<TaskOutcome<T>>) -> FutA,
        FutA: Future<Output = A>,
    {
        let outcomes = self.group(name, limits, tasks).await;
        debug!(name, members = outcomes.len(), "chord group complete, invoking aggregator");
        callback(outcomes).await
    }
}

async fn run_with_limits<T, F, Fut>(name: &str, soft: Duration, hard: Duration, token: CancellationToken, task: F) -> TaskOutcome<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = T>,
{
    let task_token = token.clone();
    let work = task(task_token);
    tokio::pin!(work);

    // Both sleeps are pinned once, outside the loop: the hard deadline is
    // absolute from task start, not "hard after whatever soft consumed".
    let soft_sleep = tokio::time::sleep(soft);
    tokio::pin!(soft_sleep);
    let hard_sleep = tokio::time::sleep(hard);
    tokio::pin!(hard_sleep);

    let mut soft_elapsed = false;
    loop {
        tokio::select! {
            result = &mut work => {
                return TaskOutcome::Completed(result);
            }
            _ = &mut soft_sleep, if !soft_elapsed => {
                soft_elapsed = true;
                warn!(name, "task exceeded soft time limit, requesting cooperative cancellation");
                token.cancel();
            }
            _ = &mut hard_sleep => {
                warn!(name, "task exceeded hard time limit, aborting");
                return TaskOutcome::HardTimedOut;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn group_runs_all_tasks_concurrently_and_preserves_order() {
        let runtime = InMemoryTaskRuntime::new();
        let limits = TaskLimits { soft: Duration::from_secs(5), hard: Duration::from_secs(5) };
        let tasks: Vec<_> = (0..5)
            .map(|i| move |_token: CancellationToken| async move { i * 10 })
            .collect();

        let outcomes = runtime.group("test", limits, tasks).await;
        let values: Vec<i32> = outcomes.into_iter().map(|o| o.into_completed().unwrap()).collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn hard_limit_aborts_slow_task() {
        let runtime = InMemoryTaskRuntime::new();
        let limits = TaskLimits { soft: Duration::from_millis(5), hard: Duration::from_millis(20) };
        let tasks = vec![|_token: CancellationToken| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            "never"
        }];

        let outcomes = runtime.group("slow", limits, tasks).await;
        assert!(matches!(outcomes[0], TaskOutcome::HardTimedOut));
    }

    #[tokio::test]
    async fn hard_limit_is_absolute_not_soft_plus_hard() {
        let runtime = InMemoryTaskRuntime::new();
        let limits = TaskLimits { soft: Duration::from_millis(10), hard: Duration::from_millis(30) };
        // Ignores cancellation, so the soft branch fires and does nothing to
        // stop the task; only the hard deadline can end it.
        let tasks = vec![|_token: CancellationToken| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            "never"
        }];

        let started = std::time::Instant::now();
        let outcomes = runtime.group("uncooperative", limits, tasks).await;
        let elapsed = started.elapsed();

        assert!(matches!(outcomes[0], TaskOutcome::HardTimedOut));
        assert!(
            elapsed < Duration::from_millis(60),
            "hard limit must be absolute from task start (soft=10ms, hard=30ms), took {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn soft_limit_cancels_cooperative_task_without_aborting() {
        let runtime = InMemoryTaskRuntime::new();
        let limits = TaskLimits { soft: Duration::from_millis(10), hard: Duration::from_secs(5) };
        let cancelled = Arc::new(AtomicUsize::new(0));
        let cancelled_clone = Arc::clone(&cancelled);

        let tasks = vec![move |token: CancellationToken| {
            let cancelled = Arc::clone(&cancelled_clone);
            async move {
                token.cancelled().await;
                cancelled.fetch_add(1, Ordering::SeqCst);
                "flushed"
            }
        }];

        let outcomes = runtime.group("coop", limits, tasks).await;
        assert!(matches!(outcomes[0], TaskOutcome::Completed("flushed")));
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chord_invokes_callback_once_with_all_outcomes() {
        let runtime = InMemoryTaskRuntime::new();
        let limits = TaskLimits { soft: Duration::from_secs(5), hard: Duration::from_secs(5) };
        let tasks: Vec<_> = (0..3).map(|i| move |_t: CancellationToken| async move { i }).collect();

        let total: i32 = runtime
            .chord("chord-test", limits, tasks, |outcomes| async move {
                outcomes.into_iter().filter_map(|o| o.into_completed()).sum()
            })
            .await;
        assert_eq!(total, 0 + 1 + 2);
    }
}
