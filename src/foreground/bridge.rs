//! Host collaborators for running the engine as a daemon: actions are queued
//! for the host bridge to poll, screen content is pushed in by the bridge.

use super::host::{HostActions, ScreenNode, ScreenSource};
use anyhow::anyhow;
use arc_swap::ArcSwapOption;
use chrono::Local;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostAction {
    GoHome,
    BringToFront,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedAction {
    pub action: HostAction,
    pub timestamp: String,
}

/// Ring buffer of the most recent actions.
pub struct ActionFeed {
    buffer: RwLock<VecDeque<IssuedAction>>,
    capacity: usize,
}

impl ActionFeed {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn recent(&self) -> Vec<IssuedAction> {
        match self.buffer.read() {
            Ok(buffer) => buffer.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn push(&self, action: HostAction) -> anyhow::Result<()> {
        let mut buffer = self
            .buffer
            .write()
            .map_err(|_| anyhow!("action feed lock poisoned"))?;
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(IssuedAction {
            action,
            timestamp: Local::now().format("%H:%M:%S").to_string(),
        });
        Ok(())
    }
}

impl HostActions for ActionFeed {
    fn go_home(&self) -> anyhow::Result<()> {
        self.push(HostAction::GoHome)
    }

    fn bring_to_front(&self) -> anyhow::Result<()> {
        self.push(HostAction::BringToFront)
    }
}

/// Latest screen snapshot pushed by the host.
#[derive(Default)]
pub struct SnapshotScreen {
    current: ArcSwapOption<ScreenNode>,
}

impl SnapshotScreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, root: ScreenNode) {
        self.current.store(Some(Arc::new(root)));
    }

    pub fn clear(&self) {
        self.current.store(None);
    }
}

impl ScreenSource for SnapshotScreen {
    fn root(&self) -> anyhow::Result<Option<Arc<ScreenNode>>> {
        Ok(self.current.load_full())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_feed_is_bounded() {
        let feed = ActionFeed::new(2);
        feed.go_home().unwrap();
        feed.bring_to_front().unwrap();
        feed.go_home().unwrap();

        let actions: Vec<HostAction> = feed.recent().into_iter().map(|a| a.action).collect();
        assert_eq!(actions, vec![HostAction::BringToFront, HostAction::GoHome]);
    }

    #[test]
    fn test_snapshot_screen() {
        let screen = SnapshotScreen::new();
        assert!(screen.root().unwrap().is_none());

        screen.replace(ScreenNode {
            text: Some("hello".into()),
            ..Default::default()
        });
        assert_eq!(screen.root().unwrap().unwrap().text(), Some("hello"));

        screen.clear();
        assert!(screen.root().unwrap().is_none());
    }
}
