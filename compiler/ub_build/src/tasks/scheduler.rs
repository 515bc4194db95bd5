//! Dependency-aware parallel execution of a [`TaskGraph`].
//!
//! Workers take ready tasks from a shared [`ExecutionPlan`] guarded by a
//! mutex and sleep on a condition variable while every remaining task waits
//! on a producer. Completing a task may release its dependents; failing one
//! skips all of its transitive dependents. Independent tasks keep running.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use ub_diagnostic::{Diagnostic, ErrorCode};

use super::{BuildTask, ExecutionReport, TaskError, TaskGraph, TaskId, TaskOutcome, TaskStats};

/// Scheduling state of one graph execution.
#[derive(Debug, Default)]
pub struct ExecutionPlan {
    /// Tasks whose producers have all completed.
    ready: VecDeque<TaskId>,
    /// Tasks still waiting on a producer.
    pending: FxHashSet<TaskId>,
    completed: usize,
    failed: FxHashSet<TaskId>,
    /// Reverse edges: producer -> consumers.
    dependents: Vec<Vec<TaskId>>,
    /// Producers not yet completed, per task.
    unsatisfied: Vec<usize>,
}

impl ExecutionPlan {
    pub fn from_graph(graph: &TaskGraph) -> Self {
        let len = graph.len();
        let mut plan = ExecutionPlan {
            dependents: vec![Vec::new(); len],
            unsatisfied: vec![0; len],
            ..Self::default()
        };
        for (idx, task) in graph.tasks().iter().enumerate() {
            let id = TaskId(idx);
            for dep in &task.depends_on {
                plan.dependents[dep.0].push(id);
            }
            plan.unsatisfied[idx] = task.depends_on.len();
            if task.depends_on.is_empty() {
                plan.ready.push_back(id);
            } else {
                plan.pending.insert(id);
            }
        }
        plan
    }

    pub fn take_next(&mut self) -> Option<TaskId> {
        self.ready.pop_front()
    }

    /// Mark a task as completed, releasing consumers whose producers are
    /// now all done.
    pub fn complete(&mut self, id: TaskId) {
        self.completed += 1;
        let Some(consumers) = self.dependents.get(id.0) else {
            return;
        };
        for &consumer in consumers {
            let count = &mut self.unsatisfied[consumer.0];
            if *count > 0 {
                *count -= 1;
                if *count == 0 && self.pending.remove(&consumer) {
                    self.ready.push_back(consumer);
                }
            }
        }
    }

    /// Mark a task as failed and withdraw every transitive dependent.
    ///
    /// Returns the dependents that will now never run.
    pub fn mark_failed(&mut self, id: TaskId) -> Vec<TaskId> {
        self.failed.insert(id);
        self.pending.remove(&id);
        self.ready.retain(|&t| t != id);

        let mut skipped = self.transitive_dependents(id);
        skipped.retain(|&dep| self.failed.insert(dep));
        for &dep in &skipped {
            self.pending.remove(&dep);
            self.ready.retain(|&t| t != dep);
        }
        skipped
    }

    /// Every task that directly or indirectly consumes `id`, breadth first.
    pub fn transitive_dependents(&self, id: TaskId) -> Vec<TaskId> {
        let mut result = Vec::new();
        let mut visited = FxHashSet::default();
        let mut queue = VecDeque::new();
        visited.insert(id);
        queue.push_back(id);

        while let Some(current) = queue.pop_front() {
            let Some(consumers) = self.dependents.get(current.0) else {
                continue;
            };
            for &consumer in consumers {
                if visited.insert(consumer) {
                    result.push(consumer);
                    queue.push_back(consumer);
                }
            }
        }
        result
    }

    /// No task is ready or waiting. Tasks may still be running.
    pub fn is_complete(&self) -> bool {
        self.ready.is_empty() && self.pending.is_empty()
    }

    pub fn is_failed(&self, id: TaskId) -> bool {
        self.failed.contains(&id)
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed
    }

    pub fn len(&self) -> usize {
        self.unsatisfied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unsatisfied.is_empty()
    }
}

/// Worker count for a configured job count; 0 means one per core.
pub fn effective_jobs(jobs: usize) -> usize {
    if jobs == 0 {
        thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(1)
    } else {
        jobs
    }
}

/// Shared between the workers of one execution.
struct SharedState {
    plan: Mutex<ExecutionPlan>,
    condvar: Condvar,
    results: Mutex<Results>,
}

#[derive(Default)]
struct Results {
    stats: TaskStats,
    errors: Vec<(TaskId, TaskError)>,
}

impl Results {
    fn record(
        &mut self,
        id: TaskId,
        task: &BuildTask,
        result: Result<TaskOutcome, Vec<Diagnostic>>,
    ) -> bool {
        match result {
            Ok(TaskOutcome::Ran) => {
                self.stats.run += 1;
                true
            }
            Ok(TaskOutcome::Fresh) => {
                self.stats.fresh += 1;
                true
            }
            Err(diagnostics) => {
                self.stats.failed += 1;
                self.errors.push((
                    id,
                    TaskError {
                        arch: task.arch.clone(),
                        module: task.module.clone(),
                        kind: task.kind,
                        diagnostics,
                    },
                ));
                false
            }
        }
    }

    fn into_report(mut self) -> ExecutionReport {
        self.errors.sort_by_key(|(id, _)| *id);
        ExecutionReport {
            stats: self.stats,
            errors: self.errors.into_iter().map(|(_, e)| e).collect(),
        }
    }
}

/// Run one task, turning a panic into a failure.
fn run_guarded<F>(run: &F, task: &BuildTask) -> Result<TaskOutcome, Vec<Diagnostic>>
where
    F: Fn(&BuildTask) -> Result<TaskOutcome, Vec<Diagnostic>>,
{
    panic::catch_unwind(AssertUnwindSafe(|| run(task))).unwrap_or_else(|_| {
        Err(vec![Diagnostic::error(ErrorCode::E9002).with_message(
            format!("A worker panicked while running {}", task.output.display()),
        )])
    })
}

/// Execute every task of `graph` on up to `jobs` workers (0 = one per core).
///
/// Blocks until every task has completed, failed or been skipped.
pub fn execute<F>(graph: &TaskGraph, jobs: usize, run: F) -> ExecutionReport
where
    F: Fn(&BuildTask) -> Result<TaskOutcome, Vec<Diagnostic>> + Sync,
{
    let jobs = effective_jobs(jobs);
    let plan = ExecutionPlan::from_graph(graph);
    tracing::debug!(tasks = graph.len(), jobs, "executing task graph");

    if jobs == 1 || graph.len() <= 1 {
        return execute_sequential(graph, plan, &run);
    }

    let state = SharedState {
        plan: Mutex::new(plan),
        condvar: Condvar::new(),
        results: Mutex::new(Results::default()),
    };
    let workers = jobs.min(graph.len());

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| worker(graph, &state, &run));
        }
    });

    state.results.into_inner().into_report()
}

fn worker<F>(graph: &TaskGraph, state: &SharedState, run: &F)
where
    F: Fn(&BuildTask) -> Result<TaskOutcome, Vec<Diagnostic>>,
{
    loop {
        let next = {
            let mut plan = state.plan.lock();
            loop {
                if let Some(id) = plan.take_next() {
                    break Some(id);
                }
                if plan.is_complete() {
                    break None;
                }
                state.condvar.wait(&mut plan);
            }
        };
        let Some(id) = next else {
            state.condvar.notify_all();
            return;
        };
        let Some(task) = graph.get(id) else {
            continue;
        };

        let result = run_guarded(run, task);
        let succeeded = state.results.lock().record(id, task, result);

        let mut plan = state.plan.lock();
        if succeeded {
            plan.complete(id);
        } else {
            let skipped = plan.mark_failed(id);
            if !skipped.is_empty() {
                tracing::debug!(task = %id, skipped = skipped.len(), "skipping dependents of failed task");
                state.results.lock().stats.skipped += skipped.len();
            }
        }
        drop(plan);
        state.condvar.notify_all();
    }
}

fn execute_sequential<F>(graph: &TaskGraph, mut plan: ExecutionPlan, run: &F) -> ExecutionReport
where
    F: Fn(&BuildTask) -> Result<TaskOutcome, Vec<Diagnostic>>,
{
    let mut results = Results::default();
    while let Some(id) = plan.take_next() {
        let Some(task) = graph.get(id) else {
            continue;
        };
        let result = run_guarded(run, task);
        if results.record(id, task, result) {
            plan.complete(id);
        } else {
            results.stats.skipped += plan.mark_failed(id).len();
        }
    }
    results.into_report()
}
