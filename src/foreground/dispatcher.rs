use super::{FocusEvent, ForegroundEngine, ScheduledCheck};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::time::DelayQueue;
use tracing::{debug, info};

/// Single task that owns the engine: focus events and due checks are handled
/// one at a time, in arrival order.
pub struct ForegroundDispatcher {
    engine: ForegroundEngine,
    events: mpsc::Receiver<FocusEvent>,
    pending: DelayQueue<ScheduledCheck>,
}

impl ForegroundDispatcher {
    pub fn new(engine: ForegroundEngine, events: mpsc::Receiver<FocusEvent>) -> Self {
        Self {
            engine,
            events,
            pending: DelayQueue::new(),
        }
    }

    /// Runs until the event channel closes and every pending check has fired.
    pub async fn run(mut self) {
        info!("Foreground dispatcher started");
        let mut open = true;

        loop {
            tokio::select! {
                maybe = self.events.recv(), if open => match maybe {
                    Some(event) => self.dispatch(event),
                    None => open = false,
                },
                Some(expired) = self.pending.next(), if !self.pending.is_empty() => {
                    let check = expired.into_inner();
                    let outcome = self.engine.run_check(&check);
                    debug!(package = %check.package, kind = ?check.kind, outcome = ?outcome, "Delayed check done");
                }
                else => break,
            }
        }

        info!("Foreground dispatcher stopped");
    }

    fn dispatch(&mut self, event: FocusEvent) {
        let decision = self.engine.handle_event(event);
        if decision.outcome.is_block() {
            debug!(outcome = ?decision.outcome, "Focus event enforced");
        }
        for check in decision.checks {
            let delay = check.delay;
            self.pending.insert(check, delay);
        }
    }
}

/// Spawns the dispatcher; dropping every returned sender stops it once the
/// checks already scheduled have run.
pub fn spawn_dispatcher(
    engine: ForegroundEngine,
    buffer: usize,
) -> (mpsc::Sender<FocusEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let handle = tokio::spawn(ForegroundDispatcher::new(engine, rx).run());
    (tx, handle)
}
