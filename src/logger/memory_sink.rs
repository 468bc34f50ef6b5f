use super::{BlockEventSink, BlockedDomainEvent};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

/// Bounded buffer of the latest blocked queries, shared with the API.
#[derive(Clone)]
pub struct RecentBlocks {
    buffer: Arc<RwLock<VecDeque<BlockedDomainEvent>>>,
    capacity: usize,
}

impl RecentBlocks {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Oldest first.
    pub fn get_recent(&self) -> Vec<BlockedDomainEvent> {
        match self.buffer.read() {
            Ok(buffer) => buffer.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl BlockEventSink for RecentBlocks {
    fn log(&self, event: &BlockedDomainEvent) {
        let Ok(mut buffer) = self.buffer.write() else {
            return;
        };
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(event.clone());
    }
}
