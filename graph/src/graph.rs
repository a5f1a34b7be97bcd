use std::collections::{BTreeSet, HashMap};

use super::{Resource, ResourceGraph, ResourceId};

#[derive(Clone, Debug, thiserror::Error)]
#[error("resource graph contains a dependency cycle: {}", display_cycle(.cycle))]
pub struct CycleError {
    pub cycle: Vec<ResourceId>,
}

fn display_cycle(cycle: &[ResourceId]) -> String {
    cycle
        .iter()
        .map(ResourceId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Topologically sort resources by their dependencies: a dependency always
/// comes before its dependents.
///
/// Ties are broken by original position, so an already valid order is
/// returned unchanged.
pub(crate) fn topo_order_of(
    resources: &[Resource],
    index: &HashMap<ResourceId, usize>,
) -> Result<Vec<usize>, CycleError> {
    let n = resources.len();
    let mut indeg = vec![0usize; n];
    let mut out: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (v, resource) in resources.iter().enumerate() {
        for dependency in resource.references() {
            if let Some(&u) = index.get(&dependency)
                && u != v
            {
                out[u].push(v);
            }
        }
    }

    for out in &mut out {
        out.sort_unstable();
        out.dedup();
        for &v in out.iter() {
            indeg[v] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indeg[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(u) = ready.pop_first() {
        order.push(u);
        for &v in &out[u] {
            indeg[v] -= 1;
            if indeg[v] == 0 {
                ready.insert(v);
            }
        }
    }

    if order.len() == n {
        return Ok(order);
    }

    let cycle = find_cycle(&out, &indeg)
        .into_iter()
        .map(|pos| resources[pos].id.clone())
        .collect();
    Err(CycleError { cycle })
}

/// Ids in build order. Insertion order is a topological order by
/// construction, so this never fails on a built graph.
pub fn topo_order(graph: &ResourceGraph) -> Vec<ResourceId> {
    graph.iter().map(|r| r.id.clone()).collect()
}

/// Group resources into waves: every resource in a wave depends only on
/// resources from earlier waves, so members of one wave can be realized
/// concurrently.
pub fn levels(graph: &ResourceGraph) -> Vec<Vec<ResourceId>> {
    let mut depth: HashMap<&ResourceId, usize> = HashMap::with_capacity(graph.len());
    let mut waves: Vec<Vec<ResourceId>> = Vec::new();

    for resource in graph {
        let level = resource
            .depends_on
            .iter()
            .filter_map(|dep| depth.get(dep))
            .map(|d| d + 1)
            .max()
            .unwrap_or(0);
        depth.insert(&resource.id, level);
        if waves.len() <= level {
            waves.resize_with(level + 1, Vec::new);
        }
        waves[level].push(resource.id.clone());
    }

    waves
}

/// Direct dependencies of a resource.
pub fn providers_of(graph: &ResourceGraph, id: &ResourceId) -> BTreeSet<ResourceId> {
    graph
        .get(id)
        .map(|r| r.depends_on.clone())
        .unwrap_or_default()
}

/// Resources that directly depend on `id`.
pub fn dependents_of(graph: &ResourceGraph, id: &ResourceId) -> BTreeSet<ResourceId> {
    graph
        .iter()
        .filter(|r| r.depends_on.contains(id))
        .map(|r| r.id.clone())
        .collect()
}

/// Resources that depend on `id`, directly or through other resources.
pub fn transitive_dependents(graph: &ResourceGraph, id: &ResourceId) -> BTreeSet<ResourceId> {
    let mut affected = BTreeSet::new();
    let Some(start) = graph.position(id) else {
        return affected;
    };
    let mut frontier = BTreeSet::from([id.clone()]);
    for resource in &graph.resources()[start + 1..] {
        if resource.depends_on.iter().any(|dep| frontier.contains(dep)) {
            frontier.insert(resource.id.clone());
            affected.insert(resource.id.clone());
        }
    }
    affected
}

fn find_cycle(out: &[Vec<usize>], indeg: &[usize]) -> Vec<usize> {
    let n = out.len();
    let mut state = vec![0u8; n];
    let mut stack = Vec::new();

    fn dfs(
        u: usize,
        out: &[Vec<usize>],
        indeg: &[usize],
        state: &mut [u8],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        state[u] = 1;
        stack.push(u);

        for &v in &out[u] {
            if indeg[v] == 0 {
                continue;
            }
            match state[v] {
                0 => {
                    if let Some(cycle) = dfs(v, out, indeg, state, stack) {
                        return Some(cycle);
                    }
                }
                1 => {
                    let start = stack.iter().position(|&node| node == v)?;
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(v);
                    return Some(cycle);
                }
                _ => {}
            }
        }

        stack.pop();
        state[u] = 2;
        None
    }

    for u in 0..n {
        if indeg[u] == 0 || state[u] != 0 {
            continue;
        }
        if let Some(cycle) = dfs(u, out, indeg, &mut state, &mut stack) {
            return cycle;
        }
    }

    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttrRef, ResourceKind};

    fn id(s: &str) -> ResourceId {
        ResourceId::new(s).unwrap()
    }

    fn sample() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        let vpc = graph
            .insert(Resource::new(id("vpc"), ResourceKind::Network))
            .unwrap();
        let role = graph
            .insert(Resource::new(id("role"), ResourceKind::Role))
            .unwrap();
        let subnet = graph
            .insert(
                Resource::new(id("subnet"), ResourceKind::Subnet)
                    .attr("network", AttrRef::new(&vpc, "id")),
            )
            .unwrap();
        graph
            .insert(
                Resource::new(id("service"), ResourceKind::Service)
                    .depends_on(&subnet)
                    .depends_on(&role),
            )
            .unwrap();
        graph
    }

    #[test]
    fn levels_group_independent_branches() {
        let waves = levels(&sample());
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0], vec![id("vpc"), id("role")]);
        assert_eq!(waves[1], vec![id("subnet")]);
        assert_eq!(waves[2], vec![id("service")]);
    }

    #[test]
    fn dependents_and_providers() {
        let graph = sample();
        assert_eq!(
            providers_of(&graph, &id("service")),
            BTreeSet::from([id("subnet"), id("role")])
        );
        assert_eq!(
            dependents_of(&graph, &id("vpc")),
            BTreeSet::from([id("subnet")])
        );
        assert_eq!(
            transitive_dependents(&graph, &id("vpc")),
            BTreeSet::from([id("subnet"), id("service")])
        );
        assert!(transitive_dependents(&graph, &id("missing")).is_empty());
    }

    #[test]
    fn topo_order_reports_cycle_path() {
        let resources = vec![
            Resource::new(id("a"), ResourceKind::Role).depends_on(&id("c")),
            Resource::new(id("b"), ResourceKind::Role).depends_on(&id("a")),
            Resource::new(id("c"), ResourceKind::Role).depends_on(&id("b")),
            Resource::new(id("d"), ResourceKind::Role),
        ];
        let index = resources
            .iter()
            .enumerate()
            .map(|(pos, r)| (r.id.clone(), pos))
            .collect();

        let cycle = topo_order_of(&resources, &index).unwrap_err().cycle;
        assert!(cycle.len() > 1);
        assert_eq!(cycle.first(), cycle.last());
        for pair in cycle.windows(2) {
            let (from, to) = (&pair[0], &pair[1]);
            let dependent = resources.iter().find(|r| &r.id == to).unwrap();
            assert!(
                dependent.depends_on.contains(from),
                "missing edge {from} -> {to}"
            );
        }
    }
}
