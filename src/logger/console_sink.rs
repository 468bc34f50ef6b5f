use crate::logger::types::{BlockEventSink, BlockedDomainEvent};
use tracing::info;

pub struct ConsoleBlockSink;

impl BlockEventSink for ConsoleBlockSink {
    fn log(&self, event: &BlockedDomainEvent) {
        info!(
            target: "kidguard::block",
            domain = %event.domain,
            reason = ?event.reason,
            at = %event.timestamp,
            "Sinkholed DNS query"
        );
    }
}
