//! Diagnostics sink
//!
//! Every recoverable problem found while compiling is recorded once against
//! the graph node that caused it, and mirrored to `tracing`.

use crate::graph::NodeId;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub node: Option<NodeId>,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, message: impl Into<String>, node: Option<NodeId>, severity: Severity) {
        let message = message.into();
        let node_id = node.map(|n| n.0);
        match severity {
            Severity::Info => tracing::info!(node = ?node_id, "{}", message),
            Severity::Warning => tracing::warn!(node = ?node_id, "{}", message),
            Severity::Error => tracing::error!(node = ?node_id, "{}", message),
        }
        self.entries.push(Diagnostic {
            message,
            node,
            severity,
        });
    }

    pub fn warn(&mut self, message: impl Into<String>, node: Option<NodeId>) {
        self.log(message, node, Severity::Warning);
    }

    pub fn error(&mut self, message: impl Into<String>, node: Option<NodeId>) {
        self.log(message, node, Severity::Error);
    }

    pub fn info(&mut self, message: impl Into<String>, node: Option<NodeId>) {
        self.log(message, node, Severity::Info);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Diagnostics attached to one node
    pub fn for_node(&self, node: NodeId) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.node == Some(node))
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_attach_to_nodes() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.warn("first", Some(NodeId(3)));
        diagnostics.error("second", None);
        diagnostics.info("third", Some(NodeId(3)));

        assert_eq!(diagnostics.len(), 3);
        assert_eq!(diagnostics.for_node(NodeId(3)).count(), 2);
        assert_eq!(diagnostics.count(Severity::Error), 1);
    }
}
