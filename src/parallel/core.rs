use crossbeam::channel::{Receiver, RecvTimeoutError, unbounded};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::error::{BatchError, UsageError};
use super::pool::{NoopObserver, WorkerObserver, WorkerPool};
use super::report::{self, Completion};
use super::store::ResultStore;
use super::task::{ArgSource, Callable, TaskDescriptor, build_tasks};
use crate::config::ExecutorSettings;
use crate::registry::{CallableRef, SymbolResolver};

/// Deadline applied to a whole batch when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest pool an unbounded request may create
pub const DEFAULT_WORKER_CEILING: usize = 256;

/// How long a timed-out batch waits for cancelled workers before detaching them
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::ZERO;

/// Progress callback: `(completed, total)`
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// Lifecycle of a batch. `Completed` and `TimedOut` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Running,
    Completed,
    TimedOut,
}

/// Every task submitted by one call, with its identity and state
pub struct Batch {
    id: Uuid,
    callable: Arc<dyn Callable>,
    tasks: Vec<TaskDescriptor>,
    len: usize,
    state: BatchState,
}

impl Batch {
    pub fn new(callable: Arc<dyn Callable>, source: ArgSource) -> Self {
        let tasks = build_tasks(&callable, source);
        Self {
            id: Uuid::new_v4(),
            len: tasks.len(),
            callable,
            tasks,
            state: BatchState::Pending,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn callable(&self) -> &Arc<dyn Callable> {
        &self.callable
    }

    pub fn tasks(&self) -> &[TaskDescriptor] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    fn transition(&mut self, next: BatchState) {
        tracing::debug!("Batch {} {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }
}

/// Fans one callable out over a set of arguments on a bounded, per-batch worker pool.
///
/// Results come back in submission order. Any task failure turns the whole batch into a
/// [`BatchError::Failed`] listing every failure; missing the deadline turns it into
/// [`BatchError::Timeout`] regardless of what individual tasks did.
#[derive(Clone)]
pub struct BatchExecutor {
    max_workers: usize,
    timeout: Duration,
    worker_ceiling: usize,
    progress_every: usize,
    cancel_grace: Duration,
    resolver: Option<Arc<dyn SymbolResolver>>,
    observer: Arc<dyn WorkerObserver>,
    progress: Option<Arc<ProgressFn>>,
    span: Option<tracing::Span>,
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchExecutor {
    pub fn new() -> Self {
        Self {
            max_workers: 0,
            timeout: DEFAULT_TIMEOUT,
            worker_ceiling: DEFAULT_WORKER_CEILING,
            progress_every: 1,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            resolver: None,
            observer: Arc::new(NoopObserver),
            progress: None,
            span: None,
        }
    }

    pub fn from_settings(settings: &ExecutorSettings) -> Self {
        Self::new()
            .with_max_workers(settings.max_workers)
            .with_timeout(settings.timeout())
            .with_worker_ceiling(settings.worker_ceiling)
            .with_progress_every(settings.progress_every)
    }

    /// Upper bound on concurrently running tasks; `0` sizes the pool to the batch
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_worker_ceiling(mut self, worker_ceiling: usize) -> Self {
        self.worker_ceiling = worker_ceiling.max(1);
        self
    }

    pub fn with_progress_every(mut self, progress_every: usize) -> Self {
        self.progress_every = progress_every.max(1);
        self
    }

    /// After a timeout, wait up to `grace` for workers to notice the cancellation and stop
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SymbolResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn WorkerObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Parent span for batch and worker logging; defaults to the caller's current span
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Pool size for a batch of `batch_len` tasks
    pub fn worker_count(&self, batch_len: usize) -> usize {
        if batch_len == 0 {
            return 0;
        }

        if self.max_workers > 0 {
            return self.max_workers.min(batch_len);
        }

        if batch_len > self.worker_ceiling {
            tracing::warn!(
                "Unbounded batch of {} tasks capped at {} workers",
                batch_len,
                self.worker_ceiling
            );
        }
        batch_len.min(self.worker_ceiling)
    }

    /// Validate the configuration and build a pending batch without running it
    pub fn prepare(
        &self,
        target: impl Into<CallableRef>,
        source: ArgSource,
    ) -> Result<Batch, BatchError> {
        if self.timeout.is_zero() {
            return Err(UsageError::ZeroTimeout.into());
        }

        let callable = self.resolve(target.into())?;
        Ok(Batch::new(callable, source))
    }

    /// Run `target` once per argument set and return the values in submission order
    pub fn execute(
        &self,
        target: impl Into<CallableRef>,
        source: ArgSource,
    ) -> Result<Vec<Value>, BatchError> {
        let batch = self.prepare(target, source)?;
        self.run(batch)
    }

    /// Run a prepared batch to its terminal state
    pub fn run(&self, mut batch: Batch) -> Result<Vec<Value>, BatchError> {
        let total = batch.len();
        let name = batch.callable().qualified_name().to_string();

        if total == 0 {
            tracing::debug!("Batch {} for {} has no tasks", batch.id(), name);
            batch.transition(BatchState::Completed);
            return Ok(Vec::new());
        }

        let workers = self.worker_count(total);
        let parent = self.span.clone().unwrap_or_else(tracing::Span::current);
        let span = tracing::info_span!(
            parent: &parent,
            "batch",
            id = %batch.id(),
            callable = %name,
            tasks = total,
            workers
        );
        let _entered = span.enter();

        let started = Instant::now();
        let store = Arc::new(ResultStore::new(total));
        let (done_tx, done_rx) = unbounded();
        let mut pool = WorkerPool::spawn(
            workers,
            &name,
            store.clone(),
            done_tx,
            self.observer.clone(),
            &span,
        )?;

        batch.transition(BatchState::Running);
        // A timeout too large to represent as an instant never expires
        let deadline = started.checked_add(self.timeout);
        for task in batch.tasks.drain(..) {
            if !pool.submit(task) {
                tracing::error!("Worker pool closed before every task was submitted");
                break;
            }
        }
        pool.close();

        let completion = self.wait(&done_rx, total, deadline);
        match completion {
            Completion::Completed => {
                pool.join();
                batch.transition(BatchState::Completed);
                tracing::info!(
                    "Batch of {} tasks finished in {:.2?} on {} workers",
                    total,
                    started.elapsed(),
                    workers
                );
            }
            Completion::TimedOut { completed } => {
                pool.cancel();
                let lingering = pool.detach(self.cancel_grace);
                if lingering > 0 {
                    tracing::debug!("{} workers still busy after cancellation", lingering);
                }
                batch.transition(BatchState::TimedOut);
                tracing::warn!(
                    "Batch timed out after {:?} with {}/{} tasks completed",
                    self.timeout,
                    completed,
                    total
                );
            }
        }

        let outcome = report::assemble(&store, completion, self.timeout);
        if let Err(BatchError::Failed(aggregate)) = &outcome {
            tracing::warn!("{}", aggregate);
        }
        outcome
    }

    fn resolve(&self, target: CallableRef) -> Result<Arc<dyn Callable>, UsageError> {
        match target {
            CallableRef::Direct(callable) => Ok(callable),
            CallableRef::Named(name) => match &self.resolver {
                Some(resolver) => Ok(resolver.resolve(&name)?),
                None => Err(UsageError::NoResolver(name)),
            },
        }
    }

    fn wait(
        &self,
        done_rx: &Receiver<usize>,
        total: usize,
        deadline: Option<Instant>,
    ) -> Completion {
        let mut completed = 0;

        while completed < total {
            let received = match deadline {
                Some(deadline) => done_rx.recv_deadline(deadline),
                None => done_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(index) => {
                    completed += 1;
                    tracing::trace!("Task {} reported ({}/{})", index, completed, total);
                    self.report_progress(completed, total);
                }
                Err(RecvTimeoutError::Timeout) => return Completion::TimedOut { completed },
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::error!(
                        "Every worker exited with {}/{} tasks reported",
                        completed,
                        total
                    );
                    break;
                }
            }
        }

        Completion::Completed
    }

    fn report_progress(&self, completed: usize, total: usize) {
        if let Some(progress) = &self.progress {
            if completed % self.progress_every == 0 || completed == total {
                progress(completed, total);
            }
        }
    }
}

/// Convenience function for a batch with default settings
pub fn execute(
    callable: Arc<dyn Callable>,
    source: ArgSource,
) -> Result<Vec<Value>, BatchError> {
    BatchExecutor::new().execute(callable, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::callable;
    use crate::registry::Registry;
    use serde_json::json;

    fn constant() -> Arc<dyn Callable> {
        callable("tests.constant", |_, _| Ok(json!("ok")))
    }

    #[test]
    fn test_worker_count_policy() {
        let unbounded = BatchExecutor::new().with_worker_ceiling(8);
        assert_eq!(unbounded.worker_count(0), 0);
        assert_eq!(unbounded.worker_count(3), 3);
        assert_eq!(unbounded.worker_count(50), 8);

        let bounded = BatchExecutor::new().with_max_workers(4);
        assert_eq!(bounded.worker_count(2), 2);
        assert_eq!(bounded.worker_count(10), 4);
    }

    #[test]
    fn test_default_source_runs_once() {
        let values = execute(constant(), ArgSource::default()).unwrap();
        assert_eq!(values, vec![json!("ok")]);
    }

    #[test]
    fn test_empty_source_returns_empty() {
        let values = execute(constant(), ArgSource::Positional(Vec::new())).unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn test_prepare_is_pending() {
        let batch = BatchExecutor::new()
            .prepare(constant(), ArgSource::Positional(vec![vec![], vec![]]))
            .unwrap();
        assert_eq!(batch.state(), BatchState::Pending);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.tasks()[1].index(), 1);
    }

    #[test]
    fn test_zero_timeout_is_usage_error() {
        let result = BatchExecutor::new()
            .with_timeout(Duration::ZERO)
            .execute(constant(), ArgSource::default());
        assert!(matches!(
            result,
            Err(BatchError::Usage(UsageError::ZeroTimeout))
        ));
    }

    #[test]
    fn test_named_callable_needs_resolver() {
        let result = BatchExecutor::new().execute("tests.constant", ArgSource::default());
        assert!(matches!(
            result,
            Err(BatchError::Usage(UsageError::NoResolver(_)))
        ));

        let registry = Registry::new().with(constant()).unwrap();
        let values = BatchExecutor::new()
            .with_resolver(Arc::new(registry))
            .execute("tests.constant", ArgSource::default())
            .unwrap();
        assert_eq!(values, vec![json!("ok")]);
    }

    #[test]
    fn test_from_settings() {
        let settings = ExecutorSettings {
            timeout_secs: 3.0,
            max_workers: 2,
            worker_ceiling: 16,
            progress_every: 5,
        };
        let executor = BatchExecutor::from_settings(&settings);
        assert_eq!(executor.timeout(), Duration::from_secs(3));
        assert_eq!(executor.max_workers(), 2);
        assert_eq!(executor.worker_count(100), 2);
    }

    #[test]
    fn test_unrepresentable_timeout_never_expires() {
        let values = BatchExecutor::new()
            .with_timeout(Duration::MAX)
            .execute(constant(), ArgSource::Positional(vec![vec![]; 3]))
            .unwrap();
        assert_eq!(values, vec![json!("ok"); 3]);

        let settings = ExecutorSettings {
            timeout_secs: 1e19,
            ..ExecutorSettings::default()
        };
        let values = BatchExecutor::from_settings(&settings)
            .execute(constant(), ArgSource::default())
            .unwrap();
        assert_eq!(values, vec![json!("ok")]);
    }

    #[test]
    fn test_cancel_grace_lets_workers_stop() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        let polling = callable("tests.polling", move |ctx, _| {
            let started = Instant::now();
            while !ctx.is_cancelled() && started.elapsed() < Duration::from_secs(5) {
                std::thread::sleep(Duration::from_millis(5));
            }
            flag.store(true, Ordering::SeqCst);
            Ok(Value::Null)
        });

        let result = BatchExecutor::new()
            .with_timeout(Duration::from_millis(100))
            .with_cancel_grace(Duration::from_secs(2))
            .execute(polling, ArgSource::default());

        assert!(matches!(result, Err(BatchError::Timeout { .. })));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_progress_reports_final_count() {
        use std::sync::Mutex;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let executor = BatchExecutor::new()
            .with_progress_every(2)
            .with_progress(move |completed, total| {
                recorder.lock().unwrap().push((completed, total));
            });

        let source = ArgSource::Positional(vec![vec![]; 5]);
        executor.execute(constant(), source).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![(2, 5), (4, 5), (5, 5)]);
    }
}
