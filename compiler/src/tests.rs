use std::collections::BTreeMap;

use cairn_config::{
    ConfigError, HealthCheckOptions, NetworkOptions, ScalingOptions, SecretInputs, ServiceOptions,
};
use cairn_graph::{AttrValue, ResourceId, ResourceKind, graph};

use super::*;
use crate::{
    compute::EnvValue,
    identity::GrantAction,
    reporter::{DiffReporter, DotReporter, Reporter, StackIrReporter, diff::render_diff},
};

fn secrets() -> SecretInputs {
    SecretInputs::builder()
        .app_secret("app/newscurator/NEXTAUTH_SECRET")
        .api_key("app/newscurator/OPENAI_API_KEY")
        .database_url("app/newscurator/DATABASE_URL")
        .build()
}

fn inputs() -> StackInputs {
    StackInputs::builder()
        .image("registry.example/app:1.0")
        .secrets(secrets())
        .build()
}

fn id(value: &str) -> ResourceId {
    ResourceId::new(value).unwrap()
}

fn config_error(result: Result<Stack, Error>) -> ConfigurationError {
    match result {
        Err(Error::Configuration(err)) => err,
        Err(other) => panic!("expected a configuration error, got {other}"),
        Ok(_) => panic!("expected a configuration error, got a stack"),
    }
}

#[test]
fn composes_reference_stack() {
    let stack = compose(&inputs()).unwrap();
    let graph = stack.graph();
    graph.assert_invariants();

    let kinds = |kind| graph.of_kind(kind).count();
    assert_eq!(kinds(ResourceKind::Subnet), 4);
    assert_eq!(kinds(ResourceKind::Database), 1);
    assert_eq!(kinds(ResourceKind::SecretRef), 3);
    assert_eq!(kinds(ResourceKind::Role), 2);
    assert_eq!(kinds(ResourceKind::Service), 1);
    assert_eq!(kinds(ResourceKind::HealthCheck), 1);
    assert_eq!(kinds(ResourceKind::ScalingPolicy), 1);

    let rules: Vec<_> = graph.of_kind(ResourceKind::SecurityRule).collect();
    assert_eq!(rules.len(), 1);
    let rule = rules[0];
    assert_eq!(rule.attribute("port"), Some(&AttrValue::Integer(5432)));
    assert_eq!(
        rule.attribute("source")
            .and_then(AttrValue::as_attr_ref)
            .map(|r| r.resource.as_str()),
        Some("service")
    );
    assert_eq!(
        rule.attribute("destination")
            .and_then(AttrValue::as_attr_ref)
            .map(|r| r.resource.as_str()),
        Some("database")
    );

    let keys: Vec<_> = stack.outputs().iter().map(|(key, _)| key).collect();
    assert_eq!(
        keys,
        ["clusterId", "databaseEndpoint", "publicEndpoint", "serviceId"]
    );
    assert!(stack.outputs().iter().all(|(_, value)| !value.is_blank()));
    assert_eq!(
        stack.outputs().get("publicEndpoint").unwrap().to_string(),
        "http://${load-balancer.dnsName}"
    );
}

#[test]
fn every_dependency_precedes_its_dependent() {
    let stack = compose(&inputs()).unwrap();
    let graph = stack.graph();
    for (pos, resource) in graph.iter().enumerate() {
        for dependency in &resource.depends_on {
            assert!(graph.position(dependency).unwrap() < pos, "{}", resource.id);
        }
    }
    let order: Vec<_> = graph.iter().map(|r| r.id.clone()).collect();
    assert_eq!(graph::topo_order(graph), order);
}

#[test]
fn database_is_reached_only_through_its_rule() {
    let stack = compose(&inputs()).unwrap();
    let graph = stack.graph();
    let dependents = graph::dependents_of(graph, &id("database"));
    assert_eq!(
        dependents,
        [id("allow-service-to-database-5432")].into_iter().collect()
    );
}

#[test]
fn missing_image_is_rejected_without_a_graph() {
    let inputs = StackInputs::builder().image("").secrets(secrets()).build();
    assert!(matches!(
        config_error(compose(&inputs)),
        ConfigurationError::MissingImage
    ));

    let inputs = StackInputs::builder()
        .image("app:latest")
        .secrets(secrets())
        .build();
    assert!(matches!(
        config_error(compose(&inputs)),
        ConfigurationError::InvalidImage { .. }
    ));
}

#[test]
fn identical_inputs_give_identical_stacks() {
    let first = compose(&inputs()).unwrap();
    let second = compose(&inputs()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.digest(), second.digest());

    let diff = DiffReporter::new(first.graph().clone())
        .emit(&second)
        .unwrap();
    assert!(diff.is_empty());
    assert_eq!(render_diff(&diff), "no changes\n");
}

#[test]
fn changing_bounds_only_touches_the_scaling_policy() {
    let before = compose(&inputs()).unwrap();
    let mut changed = inputs();
    changed.scaling = ScalingOptions::builder().min_replicas(2).max_replicas(10).build();
    let after = compose(&changed).unwrap();

    let diff = cairn_graph::diff(before.graph(), after.graph());
    assert!(diff.added.is_empty());
    assert!(diff.removed.is_empty());
    assert_eq!(diff.changed.len(), 1);
    assert_eq!(diff.changed[0].id.as_str(), "scaling-policy");
    assert_eq!(diff.changed[0].fields, ["maxCapacity"]);
    assert_ne!(before.digest(), after.digest());
}

#[test]
fn scaling_bounds() {
    let mut fixed = inputs();
    fixed.scaling = ScalingOptions::builder().min_replicas(3).max_replicas(3).build();
    let stack = compose(&fixed).unwrap();
    let service = stack.graph().get(&id("service")).unwrap();
    assert_eq!(service.attribute("desiredCount"), Some(&AttrValue::Integer(3)));

    let mut inverted = inputs();
    inverted.scaling = ScalingOptions::builder().min_replicas(4).max_replicas(2).build();
    assert!(matches!(
        config_error(compose(&inverted)),
        ConfigurationError::ScalingBounds { min: 4, max: 2 }
    ));

    let mut outside = inputs();
    outside.service = ServiceOptions::builder().desired_replicas(9).build();
    assert!(matches!(
        config_error(compose(&outside)),
        ConfigurationError::ReplicasOutOfBounds { desired: 9, .. }
    ));
}

#[test]
fn probe_timeout_must_undercut_interval() {
    let mut slow = inputs();
    slow.health_check = HealthCheckOptions::builder()
        .interval_seconds(5)
        .timeout_seconds(5)
        .build();
    assert!(matches!(
        config_error(compose(&slow)),
        ConfigurationError::ProbeTiming { .. }
    ));
}

#[test]
fn probe_and_target_group_use_the_container_port() {
    let mut custom = inputs();
    custom.service = ServiceOptions::builder().container_port(8080).build();
    let stack = compose(&custom).unwrap();
    let graph = stack.graph();
    for (resource, attribute) in [
        ("health-check", "port"),
        ("target-group", "port"),
        ("service", "containerPort"),
    ] {
        assert_eq!(
            graph.get(&id(resource)).unwrap().attribute(attribute),
            Some(&AttrValue::Integer(8080)),
            "{resource}"
        );
    }
}

#[test]
fn secrets_are_bound_and_granted() {
    let stack = compose(&inputs()).unwrap();
    let graph = stack.graph();
    let env = graph
        .get(&id("service"))
        .unwrap()
        .attribute("env")
        .and_then(AttrValue::as_map)
        .unwrap();

    assert_eq!(env.get("NODE_ENV"), Some(&AttrValue::from("production")));
    let task = graph.get(&id("task-role")).unwrap();
    for name in ["NEXTAUTH_SECRET", "OPENAI_API_KEY", "DATABASE_URL"] {
        let secret = env[name].as_secret().unwrap();
        assert!(task.depends_on.contains(&secret.secret), "{name}");
    }
}

#[test]
fn callback_url_is_merged_only_when_present() {
    let stack = compose(&inputs()).unwrap();
    let env = |stack: &Stack| {
        stack
            .graph()
            .get(&id("service"))
            .and_then(|service| service.attribute("env"))
            .and_then(AttrValue::as_map)
            .cloned()
            .unwrap()
    };
    assert!(!env(&stack).contains_key("NEXTAUTH_URL"));

    let mut with_url = inputs();
    with_url.callback_url = Some("https://news.example".to_string());
    let stack = compose(&with_url).unwrap();
    assert_eq!(
        env(&stack).get("NEXTAUTH_URL"),
        Some(&AttrValue::from("https://news.example"))
    );

    with_url.callback_url = Some("not a url".to_string());
    assert!(matches!(
        config_error(compose(&with_url)),
        ConfigurationError::InvalidCallbackUrl { .. }
    ));
}

#[test]
fn secret_may_not_shadow_a_literal() {
    let mut shadowing = inputs();
    shadowing.secrets.extra = BTreeMap::from([("NODE_ENV".to_string(), "app/env".to_string())]);
    assert!(matches!(
        config_error(compose(&shadowing)),
        ConfigurationError::EnvCollision { .. }
    ));

    let mut duplicate = inputs();
    duplicate.secrets.extra =
        BTreeMap::from([("DATABASE_URL".to_string(), "app/other".to_string())]);
    assert!(matches!(
        config_error(compose(&duplicate)),
        ConfigurationError::DuplicateSecretBinding { .. }
    ));
}

#[test]
fn extra_secrets_get_their_own_grants() {
    let mut extra = inputs();
    extra.secrets.extra = BTreeMap::from([("SENTRY_DSN".to_string(), "app/sentry".to_string())]);
    let stack = compose(&extra).unwrap();
    let secret = id("secret-sentry-dsn");
    assert!(stack.graph().contains(&secret));
    let task = stack.graph().get(&id("task-role")).unwrap();
    assert!(task.depends_on.contains(&secret));
}

#[test]
fn wildcard_secret_scope_requires_opt_in() {
    let stack = compose(&inputs()).unwrap();
    let grants = |stack: &Stack| {
        stack
            .graph()
            .get(&id("task-role"))
            .and_then(|role| role.attribute("grants"))
            .cloned()
            .unwrap()
            .to_string()
    };
    assert!(!grants(&stack).contains("scope: *"));

    let mut legacy = inputs();
    legacy.secrets.allow_wildcard_scope = true;
    let stack = compose(&legacy).unwrap();
    assert!(grants(&stack).contains("scope: *"));
    assert!(grants(&stack).contains(GrantAction::SecretRead.as_str()));
}

#[test]
fn network_variants() {
    let mut single = inputs();
    single.network = NetworkOptions::builder().zones(1).nat_gateways(0).build();
    let stack = compose(&single).unwrap();
    assert_eq!(stack.graph().of_kind(ResourceKind::Subnet).count(), 2);

    let mut too_many_nat = inputs();
    too_many_nat.network = NetworkOptions::builder().zones(2).nat_gateways(3).build();
    let stack = compose(&too_many_nat).unwrap();
    let nat_gateways = stack
        .graph()
        .of_kind(ResourceKind::Gateway)
        .filter(|gateway| gateway.attribute("gatewayType") == Some(&AttrValue::from("nat")))
        .count();
    assert_eq!(nat_gateways, 2);
}

#[test]
fn compose_context_reports_missing_inputs() {
    let mut context = Context::new();
    context.set("imageUri", "registry.example/app:1.0").unwrap();
    assert!(matches!(
        config_error(compose_context(context.clone())),
        ConfigurationError::Input(ConfigError::Missing(_))
    ));

    context.set("appSecretId", "app/secret").unwrap();
    context.set("apiKeySecretId", "app/key").unwrap();
    context.set("databaseUrlSecretId", "app/db").unwrap();
    context.set("maxReplicas", "4").unwrap();
    let stack = compose_context(context).unwrap();
    let policy = stack.graph().get(&id("scaling-policy")).unwrap();
    assert_eq!(policy.attribute("maxCapacity"), Some(&AttrValue::Integer(4)));
}

#[test]
fn service_env_rewrite_happens_before_insertion() {
    let mut service = ComputeService::new(
        "registry.example/app:1.0".parse().unwrap(),
        &ServiceOptions::default(),
        2,
    )
    .unwrap();
    let mut graph = ResourceGraph::new();
    let set = secrets::declare(
        &mut graph,
        &[("DATABASE_URL".to_string(), "app/db".to_string())],
    )
    .unwrap();
    secrets::bind(&mut service, &set).unwrap();
    // Binding twice is a no-op.
    secrets::bind(&mut service, &set).unwrap();
    assert!(matches!(
        service.env.get("DATABASE_URL"),
        Some(EnvValue::Secret(reference)) if reference.secret.as_str() == "secret-database-url"
    ));
}

#[test]
fn reporters_render_the_stack() {
    let stack = compose(&inputs()).unwrap();

    let json = StackIrReporter.emit(&stack).unwrap();
    let ir: cairn_graph::StackIr = serde_json::from_str(&json).unwrap();
    let (graph, outputs) = ir.into_parts().unwrap();
    assert_eq!(&graph, stack.graph());
    assert_eq!(&outputs, stack.outputs().entries());

    let dot = DotReporter.emit(&stack).unwrap();
    assert!(dot.contains("subgraph cluster_data {"));
    assert!(dot.contains("shape=box"));
}
