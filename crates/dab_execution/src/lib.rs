use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use dab_protocol::{DabRequest, RenderedDab};
use dab_queue::{
    DabCachePolicy, DabQueueConfig, DabQueueError, DabRenderer, DabRenderingJob,
    DabRenderingQueue, DabResources, ResourcesCreateError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DabExecutionConfigError {
    #[error("dab worker count must be greater than zero")]
    WorkerCountZero,
    #[error("max pending dabs must be greater than zero")]
    MaxPendingDabsZero,
    #[error("dab worker thread name must not contain NUL bytes")]
    WorkerThreadNameInvalid,
}

#[derive(Debug, thiserror::Error)]
pub enum DabExecutionStartError {
    #[error(transparent)]
    Config(#[from] DabExecutionConfigError),
    #[error("failed to spawn dab worker {index}")]
    SpawnWorker {
        index: usize,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DabExecutionConfig {
    pub worker_count: usize,
    /// Submitted dabs the consumer has not drained yet, above which
    /// [`DabRenderingExecutor::can_accept_dabs`] reports back-pressure.
    pub max_pending_dabs: usize,
    pub worker_thread_name: String,
    pub queue: DabQueueConfig,
}

impl Default for DabExecutionConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            max_pending_dabs: 16,
            worker_thread_name: "dab_worker".to_owned(),
            queue: DabQueueConfig::default(),
        }
    }
}

impl DabExecutionConfig {
    pub fn validate(&self) -> Result<(), DabExecutionConfigError> {
        if self.worker_count == 0 {
            return Err(DabExecutionConfigError::WorkerCountZero);
        }
        if self.max_pending_dabs == 0 {
            return Err(DabExecutionConfigError::MaxPendingDabsZero);
        }
        if self.worker_thread_name.contains('\0') {
            return Err(DabExecutionConfigError::WorkerThreadNameInvalid);
        }
        Ok(())
    }
}

/// Drives a [`DabRenderingQueue`] against a pool of worker threads.
///
/// The executor is the only owner of the ledger. Workers receive runnable jobs over a
/// channel and send them back once rendered; completions are folded into the ledger
/// whenever the owning thread polls, waits or drains.
pub struct DabRenderingExecutor<R> {
    queue: DabRenderingQueue<R>,
    job_sender: Option<Sender<DabRenderingJob<R>>>,
    finished_receiver: Receiver<DabRenderingJob<R>>,
    workers: Vec<JoinHandle<()>>,
    in_flight_jobs: usize,
    max_pending_dabs: usize,
}

impl<R> DabRenderingExecutor<R>
where
    R: DabResources + Send + 'static,
{
    pub fn start<Factory, Renderer>(
        config: DabExecutionConfig,
        resources_factory: Factory,
        renderer: Renderer,
    ) -> Result<Self, DabExecutionStartError>
    where
        Factory: FnMut() -> Result<R, ResourcesCreateError> + Send + 'static,
        Renderer: DabRenderer<R> + 'static,
    {
        config.validate()?;

        let renderer = Arc::new(renderer);
        let (job_sender, job_receiver) = unbounded::<DabRenderingJob<R>>();
        let (finished_sender, finished_receiver) = unbounded::<DabRenderingJob<R>>();
        let mut workers = Vec::with_capacity(config.worker_count);
        for index in 0..config.worker_count {
            let worker_renderer = Arc::clone(&renderer);
            let worker_job_receiver = job_receiver.clone();
            let worker_finished_sender = finished_sender.clone();
            let spawn_result = std::thread::Builder::new()
                .name(format!("{}_{index}", config.worker_thread_name))
                .spawn(move || {
                    dab_worker_loop(
                        index,
                        worker_renderer,
                        worker_job_receiver,
                        worker_finished_sender,
                    )
                });
            match spawn_result {
                Ok(join_handle) => workers.push(join_handle),
                Err(source) => {
                    // workers already running exit once the job channel closes
                    drop(job_sender);
                    join_dab_workers(workers);
                    return Err(DabExecutionStartError::SpawnWorker { index, source });
                }
            }
        }
        tracing::debug!(worker_count = workers.len(), "dab workers started");

        Ok(Self {
            queue: DabRenderingQueue::with_config(config.queue, resources_factory),
            job_sender: Some(job_sender),
            finished_receiver,
            workers,
            in_flight_jobs: 0,
            max_pending_dabs: config.max_pending_dabs,
        })
    }

    pub fn set_cache_policy(&mut self, policy: Box<dyn DabCachePolicy<R>>) {
        self.queue.set_cache_policy(policy);
    }

    pub fn add_dab(&mut self, request: DabRequest) -> Result<(), DabQueueError> {
        if let Some(job) = self.queue.add_dab(request)? {
            self.dispatch(job);
        }
        Ok(())
    }

    /// Folds every completion already reported by the workers into the ledger.
    pub fn process_finished_jobs(&mut self) -> usize {
        let mut processed = 0;
        loop {
            match self.finished_receiver.try_recv() {
                Ok(job) => {
                    self.handle_finished_job(job);
                    processed += 1;
                }
                Err(TryRecvError::Empty) => return processed,
                Err(TryRecvError::Disconnected) => {
                    if self.in_flight_jobs > 0 {
                        tracing::error!(
                            in_flight_jobs = self.in_flight_jobs,
                            "all dab workers exited with jobs in flight"
                        );
                    }
                    return processed;
                }
            }
        }
    }

    pub fn take_ready_dabs(&mut self) -> Vec<RenderedDab> {
        self.process_finished_jobs();
        self.queue.take_ready_dabs()
    }

    pub fn has_prepared_dabs(&mut self) -> bool {
        self.process_finished_jobs();
        self.queue.has_prepared_dabs()
    }

    pub fn can_accept_dabs(&self) -> bool {
        self.queue.pending_dabs_len() < self.max_pending_dabs
    }

    /// Blocks until the next dab in sequence is ready to paint, or `timeout` passes.
    pub fn wait_for_prepared_dabs(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.has_prepared_dabs() {
                return true;
            }
            if self.in_flight_jobs == 0 {
                return false;
            }
            if !self.wait_for_finished_job(deadline) {
                return self.queue.has_prepared_dabs();
            }
        }
    }

    /// Blocks until no dispatched job is left running, or `timeout` passes.
    pub fn wait_for_done(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.process_finished_jobs();
        while self.in_flight_jobs > 0 {
            if !self.wait_for_finished_job(deadline) {
                return false;
            }
        }
        true
    }

    pub fn recycle_rendered_dabs(&mut self, dabs: impl IntoIterator<Item = RenderedDab>) {
        self.queue.recycle_rendered_dabs(dabs);
    }

    pub fn in_flight_jobs(&self) -> usize {
        self.in_flight_jobs
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn queue(&self) -> &DabRenderingQueue<R> {
        &self.queue
    }

    fn wait_for_finished_job(&mut self, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.finished_receiver.recv_timeout(remaining) {
            Ok(job) => {
                self.handle_finished_job(job);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::error!(
                    in_flight_jobs = self.in_flight_jobs,
                    "dab workers disconnected while waiting for completion"
                );
                false
            }
        }
    }

    fn handle_finished_job(&mut self, job: DabRenderingJob<R>) {
        self.in_flight_jobs = self.in_flight_jobs.saturating_sub(1);
        for dependent_job in self.queue.notify_job_finished(job) {
            self.dispatch(dependent_job);
        }
    }

    fn dispatch(&mut self, job: DabRenderingJob<R>) {
        let Some(job_sender) = &self.job_sender else {
            tracing::error!(seq_no = job.seq_no(), "dab dispatched after shutdown");
            return;
        };
        let seq_no = job.seq_no();
        match job_sender.send(job) {
            Ok(()) => {
                self.in_flight_jobs += 1;
                tracing::trace!(seq_no, in_flight_jobs = self.in_flight_jobs, "dab dispatched");
            }
            Err(_) => {
                tracing::error!(seq_no, "no dab worker left to run job");
            }
        }
    }
}

impl<R> Drop for DabRenderingExecutor<R> {
    fn drop(&mut self) {
        // closing the job channel lets workers finish queued jobs and exit
        self.job_sender.take();
        join_dab_workers(self.workers.drain(..));
    }
}

fn join_dab_workers(workers: impl IntoIterator<Item = JoinHandle<()>>) {
    for join_handle in workers {
        if join_handle.join().is_err() {
            tracing::error!("dab worker panicked");
        }
    }
}

fn dab_worker_loop<R, Renderer>(
    worker_index: usize,
    renderer: Arc<Renderer>,
    job_receiver: Receiver<DabRenderingJob<R>>,
    finished_sender: Sender<DabRenderingJob<R>>,
) where
    Renderer: DabRenderer<R> + ?Sized,
{
    let _span = tracing::debug_span!("dab_worker", worker_index).entered();
    while let Ok(mut job) = job_receiver.recv() {
        // a panicking renderer still hands the job back so the ledger can complete it
        match panic::catch_unwind(AssertUnwindSafe(|| job.execute(renderer.as_ref()))) {
            Ok(()) => tracing::trace!(
                seq_no = job.seq_no(),
                execution_micros = job.execution_micros(),
                "dab rendered"
            ),
            Err(payload) => tracing::error!(
                seq_no = job.seq_no(),
                panic_message = panic_message(payload.as_ref()),
                "dab renderer panicked"
            ),
        }
        if finished_sender.send(job).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
