pub mod console_sink;
pub mod memory_sink;
pub mod types;

pub use self::console_sink::ConsoleBlockSink;
pub use self::memory_sink::RecentBlocks;
pub use self::types::{BlockEventSink, BlockedDomainEvent};

use crate::classifier::BlockReason;
use crate::config::LoggingConfig;
use chrono::Local;
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Fans blocked-query events out to the configured sinks and to any live
/// subscribers. Callable from any thread; never blocks.
pub struct BlockNotifier {
    sinks: Vec<Box<dyn BlockEventSink>>,
    recent: RecentBlocks,
    tx: broadcast::Sender<BlockedDomainEvent>,
}

impl BlockNotifier {
    pub fn new(config: &LoggingConfig) -> Arc<Self> {
        let mut sinks: Vec<Box<dyn BlockEventSink>> = Vec::new();
        if config.log_blocked {
            sinks.push(Box::new(ConsoleBlockSink));
        }
        let recent = RecentBlocks::new(config.recent_capacity);
        sinks.push(Box::new(recent.clone()));

        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Arc::new(Self { sinks, recent, tx })
    }

    pub fn notify(&self, domain: &str, reason: BlockReason) {
        let event = BlockedDomainEvent {
            domain: domain.to_string(),
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            reason: Some(reason),
        };
        for sink in &self.sinks {
            sink.log(&event);
        }
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BlockedDomainEvent> {
        self.tx.subscribe()
    }

    pub fn recent(&self) -> Vec<BlockedDomainEvent> {
        self.recent.get_recent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_without_listener() {
        let notifier = BlockNotifier::new(&LoggingConfig::default());
        notifier.notify("bet365.com", BlockReason::Blacklist);
        assert_eq!(notifier.recent().len(), 1);
        assert_eq!(notifier.recent()[0].domain, "bet365.com");
    }

    #[test]
    fn test_subscriber_receives_event() {
        let notifier = BlockNotifier::new(&LoggingConfig::default());
        let mut rx = notifier.subscribe();
        notifier.notify("pornhub.com", BlockReason::DefaultKeyword);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.domain, "pornhub.com");
        assert_eq!(event.timestamp.len(), 8);
        assert_eq!(event.timestamp.as_bytes()[2], b':');

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 2);
    }
}
