use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Traversal limits for screen-content trees.
pub const MAX_DEPTH: usize = 64;
pub const MAX_NODES: usize = 4096;

/// Side effects the engine can ask of the host.
pub trait HostActions: Send + Sync {
    /// Sends the user to the home screen.
    fn go_home(&self) -> anyhow::Result<()>;
    /// Brings the controlling app to the front.
    fn bring_to_front(&self) -> anyhow::Result<()>;
}

/// Access to whatever is currently on screen.
pub trait ScreenSource: Send + Sync {
    fn root(&self) -> anyhow::Result<Option<Arc<ScreenNode>>>;
}

/// One node of an opaque on-screen content tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ScreenNode>,
}

impl ScreenNode {
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn children(&self) -> &[ScreenNode] {
        &self.children
    }

    /// Pre-order, depth-first walk bounded by [`MAX_DEPTH`] and [`MAX_NODES`].
    pub fn iter(&self) -> Nodes<'_> {
        Nodes {
            stack: vec![(self, 0)],
            visited: 0,
        }
    }

    /// Text and description of every visited node, space separated.
    pub fn gather_text(&self) -> String {
        let mut out = String::new();
        for node in self.iter() {
            for part in [node.text(), node.description()].into_iter().flatten() {
                if !part.is_empty() {
                    out.push_str(part);
                    out.push(' ');
                }
            }
        }
        out
    }
}

pub struct Nodes<'a> {
    stack: Vec<(&'a ScreenNode, usize)>,
    visited: usize,
}

impl<'a> Iterator for Nodes<'a> {
    type Item = &'a ScreenNode;

    fn next(&mut self) -> Option<Self::Item> {
        if self.visited >= MAX_NODES {
            return None;
        }
        let (node, depth) = self.stack.pop()?;
        self.visited += 1;
        if depth + 1 < MAX_DEPTH {
            self.stack
                .extend(node.children.iter().rev().map(|child| (child, depth + 1)));
        }
        Some(node)
    }
}
