use std::fmt::Write as _;

use cairn_graph::{GraphDiff, ResourceGraph};

use super::{Reporter, ReporterError};
use crate::Stack;

/// Reports what changed relative to a previously composed graph.
#[derive(Clone, Debug)]
pub struct DiffReporter {
    previous: ResourceGraph,
}

impl DiffReporter {
    pub fn new(previous: ResourceGraph) -> Self {
        Self { previous }
    }
}

impl Reporter for DiffReporter {
    type Artifact = GraphDiff;

    fn emit(&self, stack: &Stack) -> Result<Self::Artifact, ReporterError> {
        Ok(cairn_graph::diff(&self.previous, stack.graph()))
    }
}

/// One line per touched resource: `+ id`, `- id` or `~ id (fields)`.
pub fn render_diff(diff: &GraphDiff) -> String {
    if diff.is_empty() {
        return "no changes\n".to_string();
    }

    let mut out = String::new();
    for id in &diff.added {
        let _ = writeln!(out, "+ {id}");
    }
    for id in &diff.removed {
        let _ = writeln!(out, "- {id}");
    }
    for change in &diff.changed {
        let _ = writeln!(out, "~ {} ({})", change.id, change.fields.join(", "));
    }
    out
}
