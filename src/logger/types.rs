use crate::classifier::BlockReason;
use serde::Serialize;

/// Published for every DNS query the sinkhole answers with `0.0.0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedDomainEvent {
    pub domain: String,
    /// Local wall-clock time, `HH:MM:SS`.
    pub timestamp: String,
    #[serde(skip)]
    pub reason: Option<BlockReason>,
}

pub trait BlockEventSink: Send + Sync {
    fn log(&self, event: &BlockedDomainEvent);
}
