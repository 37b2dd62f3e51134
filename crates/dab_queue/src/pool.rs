use std::fmt;
use std::sync::Arc;

use dab_protocol::{DabBuffer, DabSeqNo, SharedDabBuffer};

use crate::error::ResourcesCreateError;

/// Per-job scratch state (sampling caches, transforms) owned by one in-flight job at a time.
pub trait DabResources {
    /// Brings cached brush state up to date with the dab about to be rendered.
    fn sync_to_seq_no(&mut self, seq_no: DabSeqNo);
}

pub type ResourcesFactory<R> = Box<dyn FnMut() -> Result<R, ResourcesCreateError> + Send>;

pub struct ResourcePool<R> {
    cached: Vec<R>,
    factory: ResourcesFactory<R>,
}

impl<R> ResourcePool<R> {
    pub fn new(factory: ResourcesFactory<R>) -> Self {
        Self {
            cached: Vec::new(),
            factory,
        }
    }

    /// Pops a cached instance; the factory only runs when the pool is empty.
    pub fn acquire(&mut self) -> Result<R, ResourcesCreateError> {
        match self.cached.pop() {
            Some(resources) => Ok(resources),
            None => (self.factory)(),
        }
    }

    pub fn recycle(&mut self, resources: R) {
        self.cached.push(resources);
    }

    pub fn cached_len(&self) -> usize {
        self.cached.len()
    }
}

impl<R> fmt::Debug for ResourcePool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("cached", &self.cached.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct DabBufferPool {
    cached: Vec<DabBuffer>,
}

impl DabBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetch(&mut self) -> DabBuffer {
        self.cached.pop().unwrap_or_default()
    }

    pub fn recycle(&mut self, buffer: DabBuffer) {
        self.cached.push(buffer);
    }

    /// Drops one handle to a shared buffer. The storage comes back to the pool only
    /// when this was the last handle, so a buffer still visible anywhere else is
    /// never handed out again.
    pub fn release(&mut self, buffer: SharedDabBuffer) -> bool {
        match Arc::try_unwrap(buffer) {
            Ok(buffer) => {
                self.recycle(buffer);
                true
            }
            Err(_still_shared) => false,
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cached.len()
    }
}
