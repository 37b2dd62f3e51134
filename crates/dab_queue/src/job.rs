use std::sync::Arc;
use std::time::Instant;

use dab_protocol::{
    DabBuffer, DabBufferSizeError, DabOffset, DabRequest, DabSeqNo, SharedDabBuffer,
};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DabJobKind {
    /// Rendered from scratch.
    Full,
    /// Post-processed from the original buffer of the nearest preceding full dab.
    Derived,
    /// Reuses the post-processed output of the nearest preceding full dab as is.
    Identical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DabJobStatus {
    New,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DabGenerationInfo {
    pub request: DabRequest,
    pub needs_postprocessing: bool,
}

/// Rasterizer invoked by a worker for the expensive part of a dab.
pub trait DabRenderer<R>: Send + Sync {
    fn render_dab(&self, resources: &mut R, request: &DabRequest, target: &mut DabBuffer);

    fn postprocess_dab(
        &self,
        resources: &mut R,
        request: &DabRequest,
        original: &DabBuffer,
        target: &mut DabBuffer,
    );
}

pub(crate) type SpareBuffers = SmallVec<[DabBuffer; 2]>;

/// A runnable unit handed to a worker pool.
///
/// The worker calls [`DabRenderingJob::execute`] (or fills the outputs itself through
/// [`DabRenderingJob::set_outputs`]) and passes the job back to the queue unchanged
/// otherwise.
#[derive(Debug)]
pub struct DabRenderingJob<R> {
    pub(crate) seq_no: DabSeqNo,
    pub(crate) kind: DabJobKind,
    pub(crate) generation: DabGenerationInfo,
    pub(crate) resources: Option<R>,
    pub(crate) original: Option<SharedDabBuffer>,
    pub(crate) postprocessed: Option<SharedDabBuffer>,
    pub(crate) spare_buffers: SpareBuffers,
    pub(crate) execution_micros: Option<u64>,
}

impl<R> DabRenderingJob<R> {
    pub fn seq_no(&self) -> DabSeqNo {
        self.seq_no
    }

    pub fn kind(&self) -> DabJobKind {
        self.kind
    }

    pub fn request(&self) -> &DabRequest {
        &self.generation.request
    }

    pub fn needs_postprocessing(&self) -> bool {
        self.generation.needs_postprocessing
    }

    pub fn dst_offset(&self) -> DabOffset {
        self.generation.request.dst_offset()
    }

    pub fn resources(&self) -> Option<&R> {
        self.resources.as_ref()
    }

    pub fn resources_mut(&mut self) -> Option<&mut R> {
        self.resources.as_mut()
    }

    /// For a derived job this is the dependency's original buffer, bound at dispatch.
    pub fn original(&self) -> Option<&SharedDabBuffer> {
        self.original.as_ref()
    }

    pub fn postprocessed(&self) -> Option<&SharedDabBuffer> {
        self.postprocessed.as_ref()
    }

    pub fn execution_micros(&self) -> Option<u64> {
        self.execution_micros
    }

    /// Hands out a recycled buffer attached by the queue, or a fresh one.
    pub fn take_buffer(&mut self) -> DabBuffer {
        self.spare_buffers.pop().unwrap_or_default()
    }

    pub fn set_outputs(&mut self, original: SharedDabBuffer, postprocessed: SharedDabBuffer) {
        self.original = Some(original);
        self.postprocessed = Some(postprocessed);
    }

    pub fn execute<Renderer>(&mut self, renderer: &Renderer)
    where
        Renderer: DabRenderer<R> + ?Sized,
    {
        let started = Instant::now();
        let Some(mut resources) = self.resources.take() else {
            tracing::error!(seq_no = self.seq_no, "dab job executed without resources");
            return;
        };

        if let Err(error) = self.render_outputs(renderer, &mut resources) {
            tracing::error!(
                seq_no = self.seq_no,
                width = error.width,
                height = error.height,
                "dab buffer cannot be sized for job"
            );
        }

        self.resources = Some(resources);
        self.execution_micros = Some(started.elapsed().as_micros() as u64);
    }

    fn render_outputs<Renderer>(
        &mut self,
        renderer: &Renderer,
        resources: &mut R,
    ) -> Result<(), DabBufferSizeError>
    where
        Renderer: DabRenderer<R> + ?Sized,
    {
        let request = self.generation.request;
        let extent = request.dab_extent();
        match self.kind {
            DabJobKind::Full => {
                let mut original = self.take_sized_buffer(extent)?;
                renderer.render_dab(resources, &request, &mut original);
                let original = Arc::new(original);
                let postprocessed = if self.generation.needs_postprocessing {
                    let mut target = self.take_sized_buffer(extent)?;
                    renderer.postprocess_dab(resources, &request, &original, &mut target);
                    Arc::new(target)
                } else {
                    Arc::clone(&original)
                };
                self.set_outputs(original, postprocessed);
            }
            DabJobKind::Derived => match self.original.clone() {
                Some(original) => {
                    let mut target = self.take_sized_buffer(extent)?;
                    renderer.postprocess_dab(resources, &request, &original, &mut target);
                    self.postprocessed = Some(Arc::new(target));
                }
                None => {
                    tracing::error!(
                        seq_no = self.seq_no,
                        "derived dab job dispatched without its source buffer"
                    );
                }
            },
            DabJobKind::Identical => {
                tracing::warn!(
                    seq_no = self.seq_no,
                    "identical dab job has nothing to execute"
                );
            }
        }
        Ok(())
    }

    fn take_sized_buffer(&mut self, extent: u32) -> Result<DabBuffer, DabBufferSizeError> {
        let mut buffer = self.take_buffer();
        match buffer.reset(extent, extent) {
            Ok(()) => Ok(buffer),
            Err(error) => {
                self.spare_buffers.push(buffer);
                Err(error)
            }
        }
    }
}
