use dab_protocol::{DabRequestError, DabSeqNo};

use crate::job::DabJobKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to create dab rendering resources: {message}")]
pub struct ResourcesCreateError {
    pub message: String,
}

impl ResourcesCreateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DabQueueError {
    #[error("invalid dab request: {reason:?}")]
    InvalidRequest { reason: DabRequestError },

    #[error("dab {seq_no} was classified as {kind:?} but no full dab precedes it")]
    MissingFullDependency { seq_no: DabSeqNo, kind: DabJobKind },

    #[error("no rendering resources available for dab {seq_no}")]
    ResourcesUnavailable {
        seq_no: DabSeqNo,
        #[source]
        source: ResourcesCreateError,
    },
}
