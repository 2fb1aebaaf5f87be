//! Fixed-size worker pool.
//!
//! Bounds how many jobs (remote tenant-service calls, in practice) run at
//! once. A semaphore with one permit per worker gates admission, so a caller
//! submitting to a saturated pool waits until a worker frees up instead of
//! queueing unboundedly.
//!
//! Panics inside a job are caught at the job boundary and surface as
//! [`PoolError::JobPanicked`]; the worker keeps running.

use arbor_core::{
    ConfigError, HierarchyContext, HierarchyError, HierarchyResult, PoolError,
};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch, Mutex, Semaphore};
use tracing::Instrument;

type Task = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Per-job submission options.
#[derive(Debug, Clone)]
pub struct JobOptions {
    context: Option<HierarchyContext>,
    name: Cow<'static, str>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            context: None,
            name: Cow::Borrowed("job"),
        }
    }
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the job with `ctx` instead of the pool's context. The caller's
    /// wait for a worker honors its cancellation.
    pub fn with_context(mut self, ctx: HierarchyContext) -> Self {
        self.context = Some(ctx);
        self
    }

    /// Label used for the job's tracing span and panic reports.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }
}

/// Pending result of a scheduled job.
#[derive(Debug)]
pub struct JobHandle<T> {
    result: oneshot::Receiver<HierarchyResult<T>>,
}

impl<T> JobHandle<T> {
    /// Wait for the job to finish.
    pub async fn wait(self) -> HierarchyResult<T> {
        match self.result.await {
            Ok(result) => result,
            Err(_) => Err(PoolError::NoJobResult.into()),
        }
    }
}

struct PoolInner {
    jobs: mpsc::Sender<Task>,
    permits: Arc<Semaphore>,
    stop: watch::Sender<bool>,
    context: HierarchyContext,
    size: usize,
}

/// Parallel work queue with a fixed number of workers.
///
/// Cloning is cheap and shares the same workers. Workers exit when the
/// pool's context is cancelled, on [`WorkerPool::shutdown`], or once every
/// handle has been dropped.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Start `workers` workers on the current tokio runtime.
    pub fn new(ctx: &HierarchyContext, workers: usize) -> HierarchyResult<Self> {
        let runtime = Handle::try_current().map_err(|_| ConfigError::MissingRequired {
            field: "tokio runtime".to_string(),
        })?;
        Self::spawn_on(ctx, workers, &runtime)
    }

    /// Start `workers` workers on `runtime`.
    ///
    /// The pool keeps working only while `runtime` is alive, whichever
    /// runtime its callers run on.
    pub fn spawn_on(
        ctx: &HierarchyContext,
        workers: usize,
        runtime: &Handle,
    ) -> HierarchyResult<Self> {
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool_size".to_string(),
                value: workers.to_string(),
                reason: "minimum pool size is 1".to_string(),
            }
            .into());
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<Task>(workers);
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));
        let (stop_tx, stop_rx) = watch::channel(false);

        for worker in 0..workers {
            runtime.spawn(pump(
                worker,
                Arc::clone(&jobs_rx),
                ctx.clone(),
                stop_rx.clone(),
            ));
        }

        tracing::debug!(workers, "Worker pool started");

        Ok(Self {
            inner: Arc::new(PoolInner {
                jobs: jobs_tx,
                permits: Arc::new(Semaphore::new(workers)),
                stop: stop_tx,
                context: ctx.clone(),
                size: workers,
            }),
        })
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Workers not currently reserved by a submitted job.
    pub fn idle_workers(&self) -> usize {
        self.inner.permits.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    /// Stop accepting jobs and let workers exit once idle.
    ///
    /// Jobs already running finish; jobs still queued report
    /// [`PoolError::NoJobResult`].
    pub fn shutdown(&self) {
        self.inner.permits.close();
        let _ = self.inner.stop.send(true);
        tracing::debug!(workers = self.inner.size, "Worker pool shut down");
    }

    /// Submit a job and wait for its result.
    ///
    /// Cancellation of the job's context is honored only while waiting for
    /// admission. Once admitted, `run` waits for the job to finish so the
    /// caller never outlives work it started.
    pub async fn run<T, F, Fut>(&self, job: F, options: JobOptions) -> HierarchyResult<T>
    where
        T: Send + 'static,
        F: FnOnce(HierarchyContext) -> Fut + Send + 'static,
        Fut: Future<Output = HierarchyResult<T>> + Send + 'static,
    {
        self.schedule(job, options).await?.wait().await
    }

    /// Submit a job without waiting for it to finish.
    ///
    /// Waits only for admission: if every worker is reserved, this waits
    /// until one frees up (or the job's context is cancelled).
    pub async fn schedule<T, F, Fut>(
        &self,
        job: F,
        options: JobOptions,
    ) -> HierarchyResult<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(HierarchyContext) -> Fut + Send + 'static,
        Fut: Future<Output = HierarchyResult<T>> + Send + 'static,
    {
        let context = self.job_context(&options);
        let name = options.name;

        if context.is_cancelled() {
            return Err(HierarchyError::Cancelled);
        }

        let permit = tokio::select! {
            permit = Arc::clone(&self.inner.permits).acquire_owned() => {
                permit.map_err(|_| PoolError::Closed)?
            }
            _ = context.cancelled() => return Err(HierarchyError::Cancelled),
        };

        let (result_tx, result_rx) = oneshot::channel();
        let span = tracing::debug_span!("pool_job", job = %name);

        let task: Task = Box::new(move || {
            async move {
                let _permit = permit;
                let result = if context.is_cancelled() {
                    tracing::warn!(job = %name, "Skipping job for cancelled context");
                    Err(HierarchyError::Cancelled)
                } else {
                    execute(&name, job, context).await
                };
                let _ = result_tx.send(result);
            }
            .instrument(span)
            .boxed()
        });

        self.inner
            .jobs
            .send(task)
            .await
            .map_err(|_| PoolError::Closed)?;

        Ok(JobHandle { result: result_rx })
    }

    fn job_context(&self, options: &JobOptions) -> HierarchyContext {
        options
            .context
            .clone()
            .unwrap_or_else(|| self.inner.context.clone())
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.inner.size)
            .field("idle_workers", &self.idle_workers())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn pump(
    worker: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Task>>>,
    context: HierarchyContext,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let task = {
            let mut jobs = jobs.lock().await;
            tokio::select! {
                biased;
                _ = context.cancelled() => None,
                // Also fires when the pool handle is dropped.
                _ = stop.wait_for(|stopped| *stopped) => None,
                task = jobs.recv() => task,
            }
        };

        match task {
            Some(task) => task().await,
            None => break,
        }
    }

    tracing::debug!(worker, "Pool worker stopped");
}

async fn execute<T, F, Fut>(name: &str, job: F, context: HierarchyContext) -> HierarchyResult<T>
where
    F: FnOnce(HierarchyContext) -> Fut,
    Fut: Future<Output = HierarchyResult<T>>,
{
    match AssertUnwindSafe(async move { job(context).await })
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(job = %name, panic = %message, "Recovered panic in pool job");
            Err(PoolError::JobPanicked {
                job: name.to_string(),
                message,
            }
            .into())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
