use std::collections::VecDeque;
use std::sync::Arc;

use dab_protocol::{DabBuffer, DabRequest, DabSeqNo, RenderedDab, SharedDabBuffer};

use crate::cache::{AlwaysFullPolicy, DabCachePolicy};
use crate::error::{DabQueueError, ResourcesCreateError};
use crate::job::{DabGenerationInfo, DabJobKind, DabJobStatus, DabRenderingJob, SpareBuffers};
use crate::pool::{DabBufferPool, DabResources, ResourcePool};
use crate::stats::DabRenderingStatistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DabQueueConfig {
    pub start_seq_no: DabSeqNo,
    pub statistics_window: usize,
}

impl Default for DabQueueConfig {
    fn default() -> Self {
        Self {
            start_seq_no: 0,
            statistics_window: 50,
        }
    }
}

#[derive(Debug)]
struct LedgerEntry<R> {
    seq_no: DabSeqNo,
    kind: DabJobKind,
    status: DabJobStatus,
    generation: DabGenerationInfo,
    // Held only while the entry waits for its full dab.
    resources: Option<R>,
    original: Option<SharedDabBuffer>,
    postprocessed: Option<SharedDabBuffer>,
}

/// Ordered ledger of dab jobs.
///
/// Entry `i` always has sequence number `start_seq_no + i`. Jobs may finish in any
/// order, but [`DabRenderingQueue::take_ready_dabs`] only yields the completed prefix.
/// The queue is driven from a single thread; workers only ever see the
/// [`DabRenderingJob`] values it hands out.
pub struct DabRenderingQueue<R> {
    jobs: VecDeque<LedgerEntry<R>>,
    start_seq_no: DabSeqNo,
    delivered_count: usize,
    cache_policy: Box<dyn DabCachePolicy<R>>,
    resources: ResourcePool<R>,
    buffers: DabBufferPool,
    statistics: DabRenderingStatistics,
}

impl<R> DabRenderingQueue<R>
where
    R: DabResources,
{
    pub fn new<Factory>(factory: Factory) -> Self
    where
        Factory: FnMut() -> Result<R, ResourcesCreateError> + Send + 'static,
    {
        Self::with_config(DabQueueConfig::default(), factory)
    }

    pub fn with_config<Factory>(config: DabQueueConfig, factory: Factory) -> Self
    where
        Factory: FnMut() -> Result<R, ResourcesCreateError> + Send + 'static,
    {
        Self {
            jobs: VecDeque::new(),
            start_seq_no: config.start_seq_no,
            delivered_count: 0,
            cache_policy: Box::new(AlwaysFullPolicy),
            resources: ResourcePool::new(Box::new(factory)),
            buffers: DabBufferPool::new(),
            statistics: DabRenderingStatistics::new(config.statistics_window),
        }
    }

    pub fn set_cache_policy(&mut self, policy: Box<dyn DabCachePolicy<R>>) {
        self.cache_policy = policy;
    }

    pub fn cache_policy_mut(&mut self) -> &mut dyn DabCachePolicy<R> {
        self.cache_policy.as_mut()
    }

    /// Registers a new dab and returns the job to run, if any.
    ///
    /// `Ok(None)` means the dab needs no work right now: it either reused a finished
    /// full dab, or it waits for a running one and will come back from
    /// [`DabRenderingQueue::notify_job_finished`].
    pub fn add_dab(
        &mut self,
        request: DabRequest,
    ) -> Result<Option<DabRenderingJob<R>>, DabQueueError> {
        request
            .validate()
            .map_err(|reason| DabQueueError::InvalidRequest { reason })?;

        let seq_no = self.next_seq_no();
        let mut resources = self
            .resources
            .acquire()
            .map_err(|source| DabQueueError::ResourcesUnavailable { seq_no, source })?;
        resources.sync_to_seq_no(seq_no);

        let last_full_index = self.find_last_full_index(None);
        let classification =
            self.cache_policy
                .classify_dab(last_full_index.is_some(), &resources, &request);
        let kind = classification.kind;
        let generation = DabGenerationInfo {
            request,
            needs_postprocessing: classification.needs_postprocessing,
        };
        let mut entry = LedgerEntry {
            seq_no,
            kind,
            status: DabJobStatus::New,
            generation,
            resources: None,
            original: None,
            postprocessed: None,
        };

        let mut job_to_run = None;
        match kind {
            DabJobKind::Full => {
                entry.status = DabJobStatus::Running;
                job_to_run = Some(self.runnable_job(seq_no, kind, generation, resources, None));
            }
            DabJobKind::Derived | DabJobKind::Identical => {
                let Some(source_index) = last_full_index else {
                    self.resources.recycle(resources);
                    return Err(DabQueueError::MissingFullDependency { seq_no, kind });
                };
                let source = &self.jobs[source_index];
                if source.status != DabJobStatus::Completed {
                    entry.resources = Some(resources);
                } else if kind == DabJobKind::Derived {
                    let original = source.original.clone();
                    entry.original = original.clone();
                    entry.status = DabJobStatus::Running;
                    job_to_run =
                        Some(self.runnable_job(seq_no, kind, generation, resources, original));
                } else {
                    entry.original = source.original.clone();
                    entry.postprocessed = source.postprocessed.clone();
                    entry.status = DabJobStatus::Completed;
                    self.resources.recycle(resources);
                }
            }
        }

        tracing::trace!(seq_no, ?kind, status = ?entry.status, "dab added");
        self.jobs.push_back(entry);
        debug_assert_eq!(
            self.jobs.front().map(|entry| entry.seq_no),
            Some(self.start_seq_no)
        );

        if kind == DabJobKind::Full {
            self.clean_painted_dabs();
        }

        Ok(job_to_run)
    }

    /// Records a job finished by a worker and returns the derived jobs it unblocked.
    pub fn notify_job_finished(&mut self, mut job: DabRenderingJob<R>) -> Vec<DabRenderingJob<R>> {
        let mut dependent_jobs = Vec::new();

        let Some(index) = self.index_of(job.seq_no) else {
            tracing::warn!(
                seq_no = job.seq_no,
                start_seq_no = self.start_seq_no,
                queue_len = self.jobs.len(),
                "finished dab job is outside of the queue window"
            );
            return dependent_jobs;
        };
        let entry = &self.jobs[index];
        if entry.status != DabJobStatus::Running || entry.kind != job.kind {
            tracing::warn!(
                seq_no = job.seq_no,
                kind = ?job.kind,
                ledger_kind = ?entry.kind,
                ledger_status = ?entry.status,
                "finished dab job does not match a running ledger entry"
            );
            return dependent_jobs;
        }

        match job.resources.take() {
            Some(resources) => self.resources.recycle(resources),
            None => tracing::warn!(seq_no = job.seq_no, "finished dab job lost its resources"),
        }
        for buffer in job.spare_buffers.drain(..) {
            self.buffers.recycle(buffer);
        }

        if job.postprocessed.is_none() {
            tracing::error!(
                seq_no = job.seq_no,
                kind = ?job.kind,
                "finished dab job carries no post-processed buffer"
            );
        }
        let postprocessed = match job.postprocessed.take().or_else(|| job.original.clone()) {
            Some(postprocessed) => postprocessed,
            None => Arc::new(DabBuffer::new()),
        };
        let original = job
            .original
            .take()
            .unwrap_or_else(|| Arc::clone(&postprocessed));
        self.statistics
            .record(job.execution_micros, postprocessed.pixel_count());

        let entry = &mut self.jobs[index];
        entry.status = DabJobStatus::Completed;
        entry.original = Some(Arc::clone(&original));
        entry.postprocessed = Some(Arc::clone(&postprocessed));

        if job.kind != DabJobKind::Full {
            return dependent_jobs;
        }

        for dependent_index in index + 1..self.jobs.len() {
            let dependent = &mut self.jobs[dependent_index];
            match dependent.kind {
                // next full dab closes the chain
                DabJobKind::Full => break,
                _ if dependent.status != DabJobStatus::New => {
                    tracing::error!(
                        seq_no = dependent.seq_no,
                        status = ?dependent.status,
                        "dependent dab job started before its full dab completed"
                    );
                }
                DabJobKind::Identical => {
                    dependent.original = Some(Arc::clone(&original));
                    dependent.postprocessed = Some(Arc::clone(&postprocessed));
                    dependent.status = DabJobStatus::Completed;
                    if let Some(resources) = dependent.resources.take() {
                        self.resources.recycle(resources);
                    }
                }
                DabJobKind::Derived => {
                    let Some(resources) = dependent.resources.take() else {
                        tracing::error!(
                            seq_no = dependent.seq_no,
                            "dormant derived dab job has no resources"
                        );
                        continue;
                    };
                    dependent.original = Some(Arc::clone(&original));
                    dependent.status = DabJobStatus::Running;
                    let (seq_no, generation) = (dependent.seq_no, dependent.generation);
                    dependent_jobs.push(self.runnable_job(
                        seq_no,
                        DabJobKind::Derived,
                        generation,
                        resources,
                        Some(Arc::clone(&original)),
                    ));
                }
            }
        }

        dependent_jobs
    }

    /// Drains completed dabs in sequence order, stopping at the first unfinished one.
    pub fn take_ready_dabs(&mut self) -> Vec<RenderedDab> {
        let mut rendered_dabs = Vec::new();
        debug_assert!(
            self.jobs
                .front()
                .is_none_or(|entry| entry.kind == DabJobKind::Full)
        );

        for (index, entry) in self.jobs.iter().enumerate() {
            if entry.status != DabJobStatus::Completed {
                break;
            }
            if index < self.delivered_count {
                continue;
            }
            let Some(buffer) = entry.postprocessed.clone() else {
                tracing::error!(seq_no = entry.seq_no, "completed dab has no output buffer");
                break;
            };
            rendered_dabs.push(RenderedDab {
                seq_no: entry.seq_no,
                buffer,
                offset: entry.generation.request.dst_offset(),
            });
            self.delivered_count = index + 1;
        }

        self.clean_painted_dabs();
        rendered_dabs
    }

    pub fn has_prepared_dabs(&self) -> bool {
        self.jobs
            .get(self.delivered_count)
            .is_some_and(|entry| entry.status == DabJobStatus::Completed)
    }

    /// Gives the buffers of painted dabs back to the pool. Buffers still referenced
    /// by the ledger stay where they are.
    pub fn recycle_rendered_dabs(&mut self, dabs: impl IntoIterator<Item = RenderedDab>) {
        for dab in dabs {
            self.buffers.release(dab.buffer);
        }
    }

    pub fn fetch_cached_buffer(&mut self) -> DabBuffer {
        self.buffers.fetch()
    }

    pub fn average_execution_micros(&self) -> Option<u64> {
        self.statistics.average_execution_micros()
    }

    pub fn average_dab_pixels(&self) -> Option<u64> {
        self.statistics.average_dab_pixels()
    }

    pub fn queue_len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Dabs submitted but not yet handed out by [`DabRenderingQueue::take_ready_dabs`].
    pub fn pending_dabs_len(&self) -> usize {
        self.jobs.len() - self.delivered_count
    }

    pub fn start_seq_no(&self) -> DabSeqNo {
        self.start_seq_no
    }

    pub fn job_status(&self, seq_no: DabSeqNo) -> Option<DabJobStatus> {
        self.index_of(seq_no).map(|index| self.jobs[index].status)
    }

    pub fn job_kind(&self, seq_no: DabSeqNo) -> Option<DabJobKind> {
        self.index_of(seq_no).map(|index| self.jobs[index].kind)
    }

    pub fn cached_resources_len(&self) -> usize {
        self.resources.cached_len()
    }

    pub fn cached_buffers_len(&self) -> usize {
        self.buffers.cached_len()
    }

    fn next_seq_no(&self) -> DabSeqNo {
        self.jobs
            .back()
            .map_or(self.start_seq_no, |entry| entry.seq_no + 1)
    }

    fn index_of(&self, seq_no: DabSeqNo) -> Option<usize> {
        let index = usize::try_from(seq_no.checked_sub(self.start_seq_no)?).ok()?;
        (index < self.jobs.len()).then_some(index)
    }

    fn find_last_full_index(&self, start_search_index: Option<usize>) -> Option<usize> {
        let end = match start_search_index {
            Some(index) => index.checked_add(1)?.min(self.jobs.len()),
            None => self.jobs.len(),
        };
        self.jobs
            .range(..end)
            .rposition(|entry| entry.kind == DabJobKind::Full)
    }

    fn runnable_job(
        &mut self,
        seq_no: DabSeqNo,
        kind: DabJobKind,
        generation: DabGenerationInfo,
        resources: R,
        original: Option<SharedDabBuffer>,
    ) -> DabRenderingJob<R> {
        let buffer_count = match kind {
            DabJobKind::Full if generation.needs_postprocessing => 2,
            DabJobKind::Full | DabJobKind::Derived => 1,
            DabJobKind::Identical => 0,
        };
        let spare_buffers: SpareBuffers = (0..buffer_count).map(|_| self.buffers.fetch()).collect();
        DabRenderingJob {
            seq_no,
            kind,
            generation,
            resources: Some(resources),
            original,
            postprocessed: None,
            spare_buffers,
            execution_micros: None,
        }
    }

    /// Evicts everything before the newest full dab that the next undelivered dab
    /// could still depend on.
    fn clean_painted_dabs(&mut self) {
        let Some(last_index) = self.jobs.len().checked_sub(1) else {
            return;
        };
        let next_to_paint = self.delivered_count.min(last_index);
        let Some(source_index) = self.find_last_full_index(Some(next_to_paint)) else {
            return;
        };
        if source_index == 0 {
            return;
        }

        let buffers = &mut self.buffers;
        let resources = &mut self.resources;
        for entry in self.jobs.drain(..source_index) {
            debug_assert_eq!(entry.status, DabJobStatus::Completed);
            if let Some(entry_resources) = entry.resources {
                resources.recycle(entry_resources);
            }
            if let Some(original) = entry.original {
                buffers.release(original);
            }
            if let Some(postprocessed) = entry.postprocessed {
                buffers.release(postprocessed);
            }
        }

        self.delivered_count -= source_index;
        if let Some(front) = self.jobs.front() {
            self.start_seq_no = front.seq_no;
        }
        tracing::trace!(
            evicted = source_index,
            start_seq_no = self.start_seq_no,
            "painted dabs evicted"
        );
    }
}
