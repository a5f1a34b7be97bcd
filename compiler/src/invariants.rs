//! Cross-resource checks run on the finished graph before outputs are
//! emitted. A failure here is a composer defect, never a user error.

use cairn_graph::{AttrValue, ResourceGraph, ResourceId, ResourceKind};

use crate::{
    IncompleteGraphError,
    compute::ServiceHandles,
    datastore::DataStore,
    identity::{GrantAction, IdentityRoles},
};

pub(crate) fn verify(
    graph: &ResourceGraph,
    roles: &IdentityRoles,
    service: &ServiceHandles,
    store: &DataStore,
) -> Result<(), IncompleteGraphError> {
    graph.assert_invariants();
    secrets_are_granted(graph, roles, &service.service)?;
    roles_stay_in_their_lane(roles)?;
    database_is_private(graph, store)?;
    database_has_one_path(graph, service, store)?;
    probe_matches_container(graph, service)?;
    Ok(())
}

fn integer(graph: &ResourceGraph, id: &ResourceId, name: &str) -> Option<i64> {
    graph.get(id)?.attribute(name)?.as_integer()
}

fn secrets_are_granted(
    graph: &ResourceGraph,
    roles: &IdentityRoles,
    service: &ResourceId,
) -> Result<(), IncompleteGraphError> {
    let env = graph
        .get(service)
        .and_then(|resource| resource.attribute("env"))
        .and_then(AttrValue::as_map)
        .ok_or_else(|| IncompleteGraphError::invariant("service has no environment"))?;
    for (name, value) in env {
        let Some(reference) = value.as_secret() else {
            continue;
        };
        if !roles.task.allows(GrantAction::SecretRead, &reference.secret) {
            return Err(IncompleteGraphError::invariant(format!(
                "`{name}` reads secret `{}` but the task role has no grant for it",
                reference.secret
            )));
        }
    }
    Ok(())
}

fn roles_stay_in_their_lane(roles: &IdentityRoles) -> Result<(), IncompleteGraphError> {
    let lanes = [
        (&roles.execution, [GrantAction::ImagePull, GrantAction::LogWrite]),
        (&roles.task, [GrantAction::SecretRead, GrantAction::KeyDecrypt]),
    ];
    for (role, allowed) in lanes {
        if let Some(grant) = role.grants.iter().find(|g| !allowed.contains(&g.action)) {
            return Err(IncompleteGraphError::invariant(format!(
                "role `{}` holds a `{}` grant",
                role.id, grant.action
            )));
        }
    }
    Ok(())
}

fn database_is_private(
    graph: &ResourceGraph,
    store: &DataStore,
) -> Result<(), IncompleteGraphError> {
    let database = graph
        .get(&store.database)
        .ok_or_else(|| IncompleteGraphError::invariant("database is not in the graph"))?;
    if database.attribute("publiclyAccessible") != Some(&AttrValue::Bool(false)) {
        return Err(IncompleteGraphError::invariant(
            "database is publicly accessible",
        ));
    }
    let subnets = database
        .attribute("subnets")
        .and_then(AttrValue::as_list)
        .filter(|subnets| !subnets.is_empty())
        .ok_or_else(|| IncompleteGraphError::invariant("database has no subnets"))?;
    for subnet in subnets {
        let subnet = subnet.as_attr_ref().ok_or_else(|| {
            IncompleteGraphError::invariant(format!(
                "database subnet `{subnet}` is not a resource reference"
            ))
        })?;
        let tier = graph
            .get(&subnet.resource)
            .and_then(|resource| resource.attribute("tier"))
            .and_then(AttrValue::as_str);
        if tier != Some("private") {
            return Err(IncompleteGraphError::invariant(format!(
                "database placed in non-private subnet `{}`",
                subnet.resource
            )));
        }
    }
    Ok(())
}

fn database_has_one_path(
    graph: &ResourceGraph,
    service: &ServiceHandles,
    store: &DataStore,
) -> Result<(), IncompleteGraphError> {
    let endpoint = |value: Option<&AttrValue>| {
        value
            .and_then(AttrValue::as_attr_ref)
            .map(|r| r.resource.clone())
    };
    let inbound: Vec<_> = graph
        .of_kind(ResourceKind::SecurityRule)
        .filter(|rule| endpoint(rule.attribute("destination")).as_ref() == Some(&store.database))
        .collect();
    let [rule] = inbound.as_slice() else {
        return Err(IncompleteGraphError::invariant(format!(
            "database has {} inbound rules, expected exactly one",
            inbound.len()
        )));
    };
    if endpoint(rule.attribute("source")).as_ref() != Some(&service.service) {
        return Err(IncompleteGraphError::invariant(
            "database rule does not originate at the service",
        ));
    }
    let port = rule.attribute("port").and_then(AttrValue::as_integer);
    if port != Some(i64::from(store.port)) {
        return Err(IncompleteGraphError::invariant(format!(
            "database rule opens port {port:?}, expected {}",
            store.port
        )));
    }
    Ok(())
}

fn probe_matches_container(
    graph: &ResourceGraph,
    service: &ServiceHandles,
) -> Result<(), IncompleteGraphError> {
    let expected = Some(i64::from(service.container_port));
    let probe = graph
        .of_kind(ResourceKind::HealthCheck)
        .next()
        .ok_or_else(|| IncompleteGraphError::invariant("service has no health check"))?;
    let checks = [
        ("health check", probe.attribute("port").and_then(AttrValue::as_integer)),
        ("target group", integer(graph, &service.target_group, "port")),
        ("service", integer(graph, &service.service, "containerPort")),
    ];
    for (what, port) in checks {
        if port != expected {
            return Err(IncompleteGraphError::invariant(format!(
                "{what} port {port:?} differs from container port {}",
                service.container_port
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use cairn_graph::{AttrRef, Resource};

    use super::*;

    fn store_with(subnets: Option<AttrValue>) -> (ResourceGraph, DataStore) {
        let mut graph = ResourceGraph::new();
        let subnet = graph
            .insert(
                Resource::new(
                    ResourceId::new("private-subnet-0").unwrap(),
                    ResourceKind::Subnet,
                )
                .attr("tier", "private"),
            )
            .unwrap();
        let mut database = Resource::new(
            ResourceId::new("database").unwrap(),
            ResourceKind::Database,
        )
        .attr("publiclyAccessible", false);
        if let Some(subnets) = subnets {
            database = database.attr("subnets", subnets);
        }
        database = database.depends_on(&subnet);
        let database = graph.insert(database).unwrap();
        let store = DataStore {
            database,
            credentials: ResourceId::new("database-credentials").unwrap(),
            port: 5432,
        };
        (graph, store)
    }

    fn private_subnet() -> AttrValue {
        AttrValue::from(AttrRef::new(&ResourceId::new("private-subnet-0").unwrap(), "id"))
    }

    #[test]
    fn private_placement_passes() {
        let (graph, store) = store_with(Some(AttrValue::List(vec![private_subnet()])));
        database_is_private(&graph, &store).unwrap();
    }

    #[test]
    fn database_without_placement_is_rejected() {
        for subnets in [
            None,
            Some(AttrValue::List(Vec::new())),
            Some(AttrValue::List(vec![AttrValue::from("private-subnet-0")])),
        ] {
            let (graph, store) = store_with(subnets.clone());
            let err = database_is_private(&graph, &store).unwrap_err();
            assert!(
                matches!(err, IncompleteGraphError::Invariant { .. }),
                "{subnets:?}: {err}"
            );
        }
    }
}
