//! Ordered dab job ledger.
//!
//! Dabs are classified per request as full, derived or identical, dispatched to a
//! worker pool out of order, and drained back strictly in sequence. Scratch
//! resources and pixel buffers are recycled between dabs.

pub mod cache;
pub mod error;
pub mod job;
pub mod pool;
pub mod queue;
mod stats;


pub use cache::{AlwaysFullPolicy, DabCachePolicy, DabClassification, ParameterCachePolicy};
pub use error::{DabQueueError, ResourcesCreateError};
pub use job::{DabGenerationInfo, DabJobKind, DabJobStatus, DabRenderer, DabRenderingJob};
pub use pool::{DabBufferPool, DabResources, ResourcePool, ResourcesFactory};
pub use queue::{DabQueueConfig, DabRenderingQueue};
