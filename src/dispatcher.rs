//! Bounded background worker pool.
//!
//! Jobs are fire-and-forget: `submit` never blocks, jobs run in no particular
//! order, and a failing or panicking job is logged and forgotten. Nothing is
//! retried and nothing can be cancelled.

use crate::context::AppContext;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info_span, Instrument};

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: AppContext,
    runtime: Handle,
    permits: Arc<Semaphore>,
    workers: usize,
    next_id: AtomicU64,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl Dispatcher {
    /// Create a pool running at most `workers` jobs at once. Must be called
    /// from within a Tokio runtime; jobs run on that runtime.
    pub fn new(ctx: AppContext, workers: usize) -> Self {
        let workers = workers.max(1);
        debug!(workers, "initializing background pool");
        Self {
            inner: Arc::new(Inner {
                ctx,
                runtime: Handle::current(),
                permits: Arc::new(Semaphore::new(workers)),
                workers,
                next_id: AtomicU64::new(1),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Pool sized from `background.max_worker_threads`.
    pub fn from_config(ctx: AppContext) -> Self {
        let workers = ctx.config.background.worker_count();
        Self::new(ctx, workers)
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    pub fn context(&self) -> &AppContext {
        &self.inner.ctx
    }

    /// Queue a job. The job receives its own copy of the application context.
    pub fn submit<F, Fut>(&self, name: &'static str, job: F)
    where
        F: FnOnce(AppContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let span = info_span!("job", name, id);

        let runtime = inner.runtime.clone();
        runtime.spawn(
            async move {
                let ctx = inner.ctx.clone();
                if let Ok(_permit) = Arc::clone(&inner.permits).acquire_owned().await {
                    debug!("running job");
                    match AssertUnwindSafe(async move { job(ctx).await })
                        .catch_unwind()
                        .await
                    {
                        Ok(Ok(())) => debug!("job finished"),
                        Ok(Err(err)) => error!(?err, "job failed"),
                        Err(panic) => error!(panic = %panic_message(&*panic), "job panicked"),
                    }
                }
                if inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                    inner.idle.notify_waiters();
                }
            }
            .instrument(span),
        );
    }

    /// Number of submitted jobs that have not finished yet.
    pub fn pending(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Wait until every submitted job has finished, including jobs submitted
    /// by other jobs while waiting.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.inner.workers)
            .field("pending", &self.pending())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
