use std::collections::BTreeSet;

use serde::Serialize;

use super::{Resource, ResourceGraph, ResourceId};

/// Structural difference between two graphs, keyed by resource id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GraphDiff {
    pub added: Vec<ResourceId>,
    pub removed: Vec<ResourceId>,
    pub changed: Vec<ResourceChange>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResourceChange {
    pub id: ResourceId,
    /// Attribute names that differ, plus `kind`, `dependsOn` or `retention`
    /// when those changed.
    pub fields: Vec<String>,
}

impl GraphDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Number of resources the provisioning engine has to touch.
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }
}

/// Compare `previous` against `next`. Added and changed ids are reported in
/// `next`'s build order, removed ids in `previous`'s.
pub fn diff(previous: &ResourceGraph, next: &ResourceGraph) -> GraphDiff {
    let mut out = GraphDiff::default();

    for resource in next {
        match previous.get(&resource.id) {
            None => out.added.push(resource.id.clone()),
            Some(before) => {
                let fields = changed_fields(before, resource);
                if !fields.is_empty() {
                    out.changed.push(ResourceChange {
                        id: resource.id.clone(),
                        fields,
                    });
                }
            }
        }
    }

    for resource in previous {
        if !next.contains(&resource.id) {
            out.removed.push(resource.id.clone());
        }
    }

    out
}

fn changed_fields(before: &Resource, after: &Resource) -> Vec<String> {
    let mut fields = Vec::new();
    if before.kind != after.kind {
        fields.push("kind".to_string());
    }
    let names: BTreeSet<&String> = before
        .attributes
        .keys()
        .chain(after.attributes.keys())
        .collect();
    for name in names {
        if before.attributes.get(name) != after.attributes.get(name) {
            fields.push(name.clone());
        }
    }
    if before.depends_on != after.depends_on {
        fields.push("dependsOn".to_string());
    }
    if before.retention != after.retention {
        fields.push("retention".to_string());
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ResourceKind, Retention};

    fn id(s: &str) -> ResourceId {
        ResourceId::new(s).unwrap()
    }

    fn graph(storage: i64, with_role: bool) -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph
            .insert(Resource::new(id("vpc"), ResourceKind::Network).attr("cidr", "10.0.0.0/16"))
            .unwrap();
        graph
            .insert(
                Resource::new(id("database"), ResourceKind::Database)
                    .attr("allocatedStorageGiB", storage)
                    .retention(Retention::Snapshot),
            )
            .unwrap();
        if with_role {
            graph
                .insert(Resource::new(id("role"), ResourceKind::Role))
                .unwrap();
        }
        graph
    }

    #[test]
    fn identical_graphs_have_empty_diff() {
        let d = diff(&graph(20, true), &graph(20, true));
        assert!(d.is_empty());
        assert_eq!(d.len(), 0);
    }

    #[test]
    fn diff_reports_only_touched_resources() {
        let d = diff(&graph(20, true), &graph(50, false));
        assert!(d.added.is_empty());
        assert_eq!(d.removed, vec![id("role")]);
        assert_eq!(
            d.changed,
            vec![ResourceChange {
                id: id("database"),
                fields: vec!["allocatedStorageGiB".to_string()],
            }]
        );
        assert_eq!(d.len(), 2);
    }
}
