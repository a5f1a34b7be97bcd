#[cfg(test)]
mod tests;

use cairn_config::{CALLBACK_URL_ENV, Context, StackInputs};
use cairn_graph::{GraphDigest, ResourceGraph, StackIr};

pub mod autoscaling;
pub mod compute;
pub mod datastore;
mod error;
pub mod health;
pub mod identity;
pub mod image;
mod invariants;
mod names;
pub mod network;
pub mod outputs;
pub mod reporter;
pub mod secrets;
pub mod security;

pub use error::{ConfigurationError, Error, IncompleteGraphError};
pub use image::{ImageRef, ImageRefError};
pub use outputs::OutputSet;

use crate::{
    autoscaling::ScalingPolicy, compute::ComputeService, health::HealthCheckConfig,
    security::SecurityRuleLinker,
};

/// A composed deployment: the resource graph in build order and its outputs.
#[derive(Clone, Debug, PartialEq)]
pub struct Stack {
    graph: ResourceGraph,
    outputs: OutputSet,
}

impl Stack {
    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    pub fn outputs(&self) -> &OutputSet {
        &self.outputs
    }

    pub fn digest(&self) -> GraphDigest {
        self.graph.digest()
    }

    pub fn to_ir(&self) -> StackIr {
        StackIr::new(&self.graph, self.outputs.entries())
    }

    pub fn into_parts(self) -> (ResourceGraph, OutputSet) {
        (self.graph, self.outputs)
    }
}

/// Resolve a layered input context and compose it.
pub fn compose_context(context: Context) -> Result<Stack, Error> {
    let inputs = context.into_inputs()?;
    compose(&inputs)
}

/// Compose the full deployment graph for `inputs`.
///
/// Every build starts from an empty graph; identical inputs produce
/// structurally identical stacks. Any error aborts the build and no graph is
/// returned.
pub fn compose(inputs: &StackInputs) -> Result<Stack, Error> {
    let span = tracing::info_span!("compose", image = %inputs.image);
    let _guard = span.enter();

    // Resolve every standalone value before touching the graph.
    let image = compute::parse_image(&inputs.image)?;
    let callback_url = inputs
        .callback_url
        .as_deref()
        .map(compute::check_callback_url)
        .transpose()?;
    let scaling = ScalingPolicy::new(&inputs.scaling)?;
    let desired = inputs
        .service
        .desired_replicas
        .unwrap_or(scaling.min_replicas);
    let mut service = ComputeService::new(image, &inputs.service, desired)?;
    scaling.check_desired(service.desired_replicas)?;
    service.merge_optional_env(CALLBACK_URL_ENV, callback_url)?;
    let probe = HealthCheckConfig::new(&inputs.health_check, service.container_port)?;

    let mut graph = ResourceGraph::new();
    let topology = network::build(&mut graph, &inputs.network)?;
    let store = datastore::provision(&mut graph, &topology, &inputs.database)?;
    let secret_set = secrets::declare(&mut graph, &inputs.secrets.bindings())?;
    let log_group = compute::declare_log_group(&mut graph, &inputs.service)?;
    let roles = identity::compose(
        &mut graph,
        &service.image,
        &log_group,
        &secret_set,
        inputs.secrets.allow_wildcard_scope,
    )?;
    secrets::bind(&mut service, &secret_set)?;
    let handles = compute::compose(&mut graph, &service, &topology, &roles, &log_group)?;

    let mut linker = SecurityRuleLinker::new();
    linker.link(&mut graph, &handles.service, &store.database, store.port)?;
    health::configure(&mut graph, &handles, &probe)?;
    autoscaling::attach(&mut graph, &handles, &scaling)?;

    invariants::verify(&graph, &roles, &handles, &store)?;
    let outputs = outputs::emit(&graph, &handles, &store)?;

    let stack = Stack { graph, outputs };
    tracing::info!(
        resources = stack.graph.len(),
        digest = %stack.digest(),
        "composed stack"
    );
    Ok(stack)
}
