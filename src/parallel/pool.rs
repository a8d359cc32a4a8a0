use anyhow::anyhow;
use crossbeam::channel::{Receiver, Sender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::error::{BatchError, FailureKind, TaskFailure, render_trace};
use super::panic;
use super::store::{ResultStore, TaskResult};
use super::task::{TaskContext, TaskDescriptor};

const DETACH_POLL: Duration = Duration::from_millis(5);

/// Naming and diagnostics callbacks invoked from worker threads.
///
/// Every method has a no-op default. Hooks run outside the task's own failure capture, so a
/// hook that panics is reported as a [`FailureKind::Harness`] failure of the task in hand.
pub trait WorkerObserver: Send + Sync {
    fn worker_name(&self, base: &str, worker_id: usize) -> String {
        format!("{}-worker-{}", base, worker_id)
    }

    fn on_worker_started(&self, _worker: &str) {}

    fn on_task_started(&self, _worker: &str, _task: &TaskDescriptor) {}

    fn on_task_finished(&self, _worker: &str, _index: usize, _success: bool) {}

    /// A failure escaped the task boundary and was recorded for the task the worker was handling
    fn on_uncaught(&self, _worker: &str, _failure: &TaskFailure) {}

    fn on_worker_stopped(&self, _worker: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl WorkerObserver for NoopObserver {}

/// Context for worker threads to avoid too many function parameters
struct WorkerContext {
    name: String,
    work_rx: Receiver<TaskDescriptor>,
    done_tx: Sender<usize>,
    store: Arc<ResultStore>,
    cancelled: Arc<AtomicBool>,
    observer: Arc<dyn WorkerObserver>,
    span: tracing::Span,
}

/// Fixed-size set of named worker threads pulling tasks from a shared queue.
///
/// Submissions beyond the worker count queue until a worker frees up. Each finished task is
/// written to the [`ResultStore`] and its index sent on the completion channel.
pub struct WorkerPool {
    work_tx: Option<Sender<TaskDescriptor>>,
    workers: Vec<JoinHandle<()>>,
    names: Vec<String>,
    cancelled: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn spawn(
        size: usize,
        base_name: &str,
        store: Arc<ResultStore>,
        done_tx: Sender<usize>,
        observer: Arc<dyn WorkerObserver>,
        span: &tracing::Span,
    ) -> Result<Self, BatchError> {
        let (work_tx, work_rx) = unbounded();
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(size);
        let mut names = Vec::with_capacity(size);

        for worker_id in 0..size {
            let name = observer.worker_name(base_name, worker_id);
            let ctx = WorkerContext {
                name: name.clone(),
                work_rx: work_rx.clone(),
                done_tx: done_tx.clone(),
                store: store.clone(),
                cancelled: cancelled.clone(),
                observer: observer.clone(),
                span: span.clone(),
            };

            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_worker(ctx))
                .map_err(|source| BatchError::Spawn {
                    name: name.clone(),
                    source,
                })?;

            workers.push(handle);
            names.push(name);
        }

        tracing::debug!("Spawned {} workers for {}", size, base_name);

        Ok(Self {
            work_tx: Some(work_tx),
            workers,
            names,
            cancelled,
        })
    }

    /// Queue a task. Returns false once the pool is closed.
    pub fn submit(&self, task: TaskDescriptor) -> bool {
        match &self.work_tx {
            Some(work_tx) => work_tx.send(task).is_ok(),
            None => false,
        }
    }

    /// Stop accepting submissions; workers exit once the queue is drained
    pub fn close(&mut self) {
        self.work_tx.take();
    }

    /// Abandon queued tasks and raise the cancellation flag seen by running ones
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_names(&self) -> &[String] {
        &self.names
    }

    /// Close the pool and wait for every worker thread to exit
    pub fn join(mut self) {
        self.close();
        for (handle, name) in self.workers.drain(..).zip(&self.names) {
            if handle.join().is_err() {
                tracing::error!("Worker {} terminated abnormally", name);
            }
        }
    }

    /// Close the pool and give workers up to `grace` to exit before letting them go.
    ///
    /// Returns how many workers were still running when the grace period ended. Those finish
    /// their current task in the background and exit.
    pub fn detach(mut self, grace: Duration) -> usize {
        self.close();
        let deadline = Instant::now().checked_add(grace);

        loop {
            self.workers.retain(|handle| !handle.is_finished());
            if self.workers.is_empty() {
                return 0;
            }
            match deadline {
                Some(deadline) if Instant::now() < deadline => thread::sleep(DETACH_POLL),
                _ => break,
            }
        }

        let running = self.workers.len();
        self.workers.clear();
        running
    }
}

fn run_worker(ctx: WorkerContext) {
    panic::capture_on_this_thread();
    let span = tracing::debug_span!(parent: &ctx.span, "worker", worker = %ctx.name);
    let _entered = span.enter();

    if let Err(report) = panic::catch(|| ctx.observer.on_worker_started(&ctx.name)) {
        tracing::error!("Worker start hook panicked: {}", report.message);
    }

    while let Ok(task) = ctx.work_rx.recv() {
        let index = task.index();
        if ctx.cancelled.load(Ordering::Acquire) {
            tracing::trace!("Skipping task {} after cancellation", index);
            continue;
        }

        // Anything that escapes here failed outside the task's own capture
        if let Err(report) = panic::catch(|| process_task(&ctx, &task)) {
            let failure = TaskFailure::new(
                index,
                FailureKind::Harness,
                anyhow!(
                    "worker `{}` failed outside task {}: {}",
                    ctx.name,
                    index,
                    report.message
                ),
                report.render(),
            );
            tracing::error!("{}", failure);
            if panic::catch(|| ctx.observer.on_uncaught(&ctx.name, &failure)).is_err() {
                tracing::error!("Uncaught-failure hook panicked on {}", ctx.name);
            }
            record(&ctx, index, TaskResult::Failure(failure));
        }
    }

    if let Err(report) = panic::catch(|| ctx.observer.on_worker_stopped(&ctx.name)) {
        tracing::error!("Worker stop hook panicked: {}", report.message);
    }
    tracing::trace!("Worker exiting");
}

fn process_task(ctx: &WorkerContext, task: &TaskDescriptor) {
    ctx.observer.on_task_started(&ctx.name, task);
    tracing::trace!("Running {}", task.describe());

    let task_ctx = TaskContext::new(task.index(), ctx.name.clone(), ctx.cancelled.clone());
    let result = invoke(task, &task_ctx);
    let success = result.is_success();
    record(ctx, task.index(), result);

    ctx.observer.on_task_finished(&ctx.name, task.index(), success);
}

/// Call the task's callable, capturing both returned errors and panics
pub(crate) fn invoke(task: &TaskDescriptor, task_ctx: &TaskContext) -> TaskResult {
    let index = task.index();
    match panic::catch(|| task.callable().call(task_ctx, task.args())) {
        Ok(Ok(value)) => TaskResult::Success(value),
        Ok(Err(error)) => {
            tracing::debug!("Task {} returned an error: {:#}", index, error);
            let trace = render_trace(&error);
            TaskResult::Failure(TaskFailure::new(index, FailureKind::Error, error, trace))
        }
        Err(report) => {
            tracing::debug!("Task {} panicked: {}", index, report.message);
            TaskResult::Failure(TaskFailure::new(
                index,
                FailureKind::Panic,
                anyhow!("task panicked: {}", report.message),
                report.render(),
            ))
        }
    }
}

fn record(ctx: &WorkerContext, index: usize, result: TaskResult) {
    if ctx.store.record(index, result) {
        // The coordinator stops listening after a timeout
        let _ = ctx.done_tx.send(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::task::{Arguments, callable};
    use serde_json::json;
    use std::time::Duration;

    fn doubler() -> Arc<dyn crate::parallel::Callable> {
        callable("tests.double", |_, args| Ok(json!(args.i64(0, "x")? * 2)))
    }

    #[test]
    fn test_pool_processes_all_tasks() {
        let store = Arc::new(ResultStore::new(5));
        let (done_tx, done_rx) = unbounded();
        let mut pool = WorkerPool::spawn(
            2,
            "tests.double",
            store.clone(),
            done_tx,
            Arc::new(NoopObserver),
            &tracing::Span::none(),
        )
        .unwrap();

        let double = doubler();
        for index in 0..5 {
            let task = TaskDescriptor::new(
                index,
                double.clone(),
                Arguments::Positional(vec![json!(index)]),
            );
            assert!(pool.submit(task));
        }
        pool.close();
        assert!(!pool.submit(TaskDescriptor::new(9, double, Arguments::None)));

        let mut seen: Vec<usize> = (0..5)
            .map(|_| done_rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        pool.join();

        for index in 0..5 {
            match store.take(index) {
                Some(TaskResult::Success(value)) => assert_eq!(value, json!(index * 2)),
                other => panic!("task {} produced {:?}", index, other),
            }
        }
    }

    #[test]
    fn test_worker_names_derive_from_base() {
        let store = Arc::new(ResultStore::new(0));
        let (done_tx, _done_rx) = unbounded();
        let pool = WorkerPool::spawn(
            3,
            "reports.build",
            store,
            done_tx,
            Arc::new(NoopObserver),
            &tracing::Span::none(),
        )
        .unwrap();

        assert_eq!(pool.size(), 3);
        assert_eq!(pool.worker_names()[2], "reports.build-worker-2");
        pool.join();
    }

    #[test]
    fn test_cancelled_pool_skips_queued_tasks() {
        let store = Arc::new(ResultStore::new(3));
        let (done_tx, done_rx) = unbounded();
        let mut pool = WorkerPool::spawn(
            1,
            "tests.double",
            store.clone(),
            done_tx,
            Arc::new(NoopObserver),
            &tracing::Span::none(),
        )
        .unwrap();

        pool.cancel();
        assert!(pool.is_cancelled());
        let double = doubler();
        for index in 0..3 {
            pool.submit(TaskDescriptor::new(
                index,
                double.clone(),
                Arguments::Positional(vec![json!(1)]),
            ));
        }
        pool.close();
        pool.join();

        assert!(done_rx.try_recv().is_err());
        assert!(store.drain().iter().all(Option::is_none));
    }

    #[test]
    fn test_detach_waits_for_cancelled_workers() {
        let store = Arc::new(ResultStore::new(1));
        let (done_tx, _done_rx) = unbounded();
        let mut pool = WorkerPool::spawn(
            1,
            "tests.poll",
            store,
            done_tx,
            Arc::new(NoopObserver),
            &tracing::Span::none(),
        )
        .unwrap();

        let polling = callable("tests.poll", |ctx, _| {
            let started = Instant::now();
            while !ctx.is_cancelled() && started.elapsed() < Duration::from_secs(5) {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(json!(null))
        });
        pool.submit(TaskDescriptor::new(0, polling, Arguments::None));
        pool.close();
        thread::sleep(Duration::from_millis(50));

        pool.cancel();
        assert_eq!(pool.detach(Duration::from_secs(2)), 0);
    }

    #[test]
    fn test_invoke_captures_errors_and_panics() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let ctx = TaskContext::new(0, "inline", cancelled);

        let failing = TaskDescriptor::new(0, doubler(), Arguments::Positional(vec![json!("x")]));
        match invoke(&failing, &ctx) {
            TaskResult::Failure(failure) => {
                assert_eq!(failure.kind, FailureKind::Error);
                assert!(failure.trace.contains("expected an integer"));
            }
            TaskResult::Success(value) => panic!("unexpected success: {}", value),
        }

        let panicking = TaskDescriptor::new(
            0,
            callable("tests.explode", |_, _| panic!("kaboom")),
            Arguments::None,
        );
        match invoke(&panicking, &ctx) {
            TaskResult::Failure(failure) => {
                assert_eq!(failure.kind, FailureKind::Panic);
                assert!(failure.error.to_string().contains("kaboom"));
            }
            TaskResult::Success(value) => panic!("unexpected success: {}", value),
        }
    }
}
