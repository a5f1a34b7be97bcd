use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Write as _,
};

use cairn_graph::{AttrValue, ResourceGraph, ResourceKind};

use super::{Reporter, ReporterError};
use crate::Stack;

#[derive(Clone, Copy, Debug, Default)]
pub struct DotReporter;

impl Reporter for DotReporter {
    type Artifact = String;

    fn emit(&self, stack: &Stack) -> Result<Self::Artifact, ReporterError> {
        Ok(render_dot(stack.graph(), stack.outputs().entries()))
    }
}

fn tier(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Network | ResourceKind::Subnet | ResourceKind::Gateway => "network",
        ResourceKind::Database | ResourceKind::GeneratedSecret => "data",
        ResourceKind::SecretRef | ResourceKind::Role => "identity",
        ResourceKind::SecurityRule => "security",
        _ => "compute",
    }
}

/// Render the graph as a Graphviz DOT diagram. Edges point from a resource to
/// the resources that depend on it; outputs hang off the resources they read.
pub fn render_dot(graph: &ResourceGraph, outputs: &BTreeMap<String, AttrValue>) -> String {
    let mut tiers: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (pos, resource) in graph.iter().enumerate() {
        tiers.entry(tier(resource.kind)).or_default().push(pos);
    }

    let mut out = String::new();
    let _ = writeln!(out, "digraph stack {{");
    let _ = writeln!(out, "  rankdir=LR;");
    let _ = writeln!(out, "  compound=true;");

    for (name, members) in &tiers {
        let _ = writeln!(out, "  subgraph cluster_{name} {{");
        let _ = writeln!(out, "    label=\"{name}\";");
        for &pos in members {
            let resource = &graph.resources()[pos];
            let _ = write!(out, "    r{pos} [label=\"");
            write_escaped_label(&mut out, &format!("{}\n{}", resource.id, resource.kind));
            let _ = writeln!(out, "\"];");
        }
        let _ = writeln!(out, "  }}");
    }

    for (pos, resource) in graph.iter().enumerate() {
        for dependency in &resource.depends_on {
            if let Some(from) = graph.position(dependency) {
                let _ = writeln!(out, "  r{from} -> r{pos};");
            }
        }
    }

    for (i, (key, value)) in outputs.iter().enumerate() {
        let _ = write!(out, "  o{i} [label=\"");
        write_escaped_label(&mut out, key);
        let _ = writeln!(out, "\", shape=box];");

        let mut references = BTreeSet::new();
        value.collect_references(&mut references);
        for id in references {
            if let Some(from) = graph.position(&id) {
                let _ = writeln!(out, "  r{from} -> o{i} [style=dashed];");
            }
        }
    }

    let _ = writeln!(out, "}}");
    out
}

fn write_escaped_label(out: &mut String, label: &str) {
    for ch in label.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
}
