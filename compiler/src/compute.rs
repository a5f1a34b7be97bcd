use std::collections::BTreeMap;

use cairn_config::ServiceOptions;
use cairn_graph::{AttrRef, AttrValue, Resource, ResourceGraph, ResourceId, ResourceKind, SecretRef};
use url::Url;

use crate::{
    ConfigurationError, Error, identity::IdentityRoles, image::ImageRef, names,
    network::NetworkTopology, secrets,
};

pub const LISTENER_PORT: u16 = 80;
pub const LAUNCH_TYPE: &str = "FARGATE";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvValue {
    Literal(String),
    Secret(SecretRef),
}

impl From<&EnvValue> for AttrValue {
    fn from(value: &EnvValue) -> Self {
        match value {
            EnvValue::Literal(value) => AttrValue::String(value.clone()),
            EnvValue::Secret(reference) => AttrValue::Secret(reference.clone()),
        }
    }
}

/// The container workload before it is placed in the graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputeService {
    pub image: ImageRef,
    pub desired_replicas: u32,
    pub cpu_units: u32,
    pub memory_mib: u32,
    pub container_port: u16,
    pub env: BTreeMap<String, EnvValue>,
    pub log_stream_prefix: String,
    pub health_check_grace_seconds: u32,
}

impl ComputeService {
    pub fn new(
        image: ImageRef,
        options: &ServiceOptions,
        desired_replicas: u32,
    ) -> Result<Self, ConfigurationError> {
        if desired_replicas < 1 {
            return Err(ConfigurationError::ReplicaCount {
                replicas: desired_replicas,
            });
        }
        if !is_supported_task_size(options.cpu, options.memory_mib) {
            return Err(ConfigurationError::TaskSize {
                cpu: options.cpu,
                memory_mib: options.memory_mib,
            });
        }
        if options.container_port == 0 {
            return Err(ConfigurationError::WildcardPort {
                what: "container",
                port: 0,
            });
        }
        if !is_stream_prefix(&options.log_stream_prefix) {
            return Err(ConfigurationError::LogStreamPrefix {
                prefix: options.log_stream_prefix.clone(),
            });
        }

        let mut env = BTreeMap::new();
        for (name, value) in &options.environment {
            if !secrets::is_env_name(name) {
                return Err(ConfigurationError::InvalidEnvName { name: name.clone() });
            }
            env.insert(name.clone(), EnvValue::Literal(value.clone()));
        }

        Ok(Self {
            image,
            desired_replicas,
            cpu_units: options.cpu,
            memory_mib: options.memory_mib,
            container_port: options.container_port,
            env,
            log_stream_prefix: options.log_stream_prefix.clone(),
            health_check_grace_seconds: options.health_check_grace_seconds,
        })
    }

    /// Add a literal entry only when a value is present. An absent value
    /// leaves the environment untouched.
    pub fn merge_optional_env(
        &mut self,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), ConfigurationError> {
        let Some(value) = value else {
            return Ok(());
        };
        if !secrets::is_env_name(name) {
            return Err(ConfigurationError::InvalidEnvName {
                name: name.to_string(),
            });
        }
        if matches!(self.env.get(name), Some(EnvValue::Secret(_))) {
            return Err(ConfigurationError::EnvCollision {
                name: name.to_string(),
            });
        }
        self.env
            .insert(name.to_string(), EnvValue::Literal(value.to_string()));
        Ok(())
    }

    pub fn secret_refs(&self) -> impl Iterator<Item = (&str, &SecretRef)> {
        self.env.iter().filter_map(|(name, value)| match value {
            EnvValue::Secret(reference) => Some((name.as_str(), reference)),
            EnvValue::Literal(_) => None,
        })
    }
}

/// Parse the image input. A blank value is a missing image, not a malformed
/// one.
pub fn parse_image(raw: &str) -> Result<ImageRef, ConfigurationError> {
    if raw.trim().is_empty() {
        return Err(ConfigurationError::MissingImage);
    }
    raw.parse::<ImageRef>()
        .map_err(|err| ConfigurationError::InvalidImage {
            image: raw.to_string(),
            reason: err.reason().to_string(),
        })
}

/// Accept an absolute http(s) URL with a host. The input is returned
/// verbatim, not normalized.
pub fn check_callback_url(raw: &str) -> Result<&str, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidCallbackUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(raw)
}

/// Supported Fargate CPU units and memory pairs.
pub fn is_supported_task_size(cpu: u32, memory_mib: u32) -> bool {
    let (min, max, step) = match cpu {
        256 => return matches!(memory_mib, 512 | 1024 | 2048),
        512 => (1024, 4096, 1024),
        1024 => (2048, 8192, 1024),
        2048 => (4096, 16384, 1024),
        4096 => (8192, 30720, 1024),
        8192 => (16384, 61440, 4096),
        16384 => (32768, 122880, 8192),
        _ => return false,
    };
    (min..=max).contains(&memory_mib) && (memory_mib - min) % step == 0
}

fn is_stream_prefix(prefix: &str) -> bool {
    !prefix.is_empty() && !prefix.contains([':', '*'])
}

/// Declare the log group the service writes to. It precedes the roles so the
/// execution role can be scoped to it.
pub fn declare_log_group(
    graph: &mut ResourceGraph,
    options: &ServiceOptions,
) -> Result<ResourceId, Error> {
    if options.log_retention_days < 1 {
        return Err(ConfigurationError::LogRetention {
            days: options.log_retention_days,
        }
        .into());
    }
    Ok(graph.insert(
        Resource::new(names::id(names::LOG_GROUP), ResourceKind::LogGroup)
            .attr("retentionDays", options.log_retention_days),
    )?)
}

/// Handles to the compute tier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceHandles {
    pub cluster: ResourceId,
    pub load_balancer: ResourceId,
    pub target_group: ResourceId,
    pub service: ResourceId,
    pub container_port: u16,
}

/// Declare the cluster, the internet-facing load balancer and its target
/// group, and the service itself.
///
/// Replicas run in the private subnets without public addresses; only the
/// load balancer sits in the public subnets.
pub fn compose(
    graph: &mut ResourceGraph,
    service: &ComputeService,
    topology: &NetworkTopology,
    roles: &IdentityRoles,
    log_group: &ResourceId,
) -> Result<ServiceHandles, Error> {
    let cluster = graph.insert(
        Resource::new(names::id(names::CLUSTER), ResourceKind::Cluster)
            .attr("network", AttrRef::new(&topology.network, "id")),
    )?;

    let target_group = graph.insert(
        Resource::new(names::id(names::TARGET_GROUP), ResourceKind::TargetGroup)
            .attr("network", AttrRef::new(&topology.network, "id"))
            .attr("port", service.container_port)
            .attr("protocol", "HTTP")
            .attr("targetType", "ip"),
    )?;

    let listener: BTreeMap<String, AttrValue> = [
        ("port".to_string(), AttrValue::from(LISTENER_PORT)),
        ("protocol".to_string(), "HTTP".into()),
        (
            "forwardTo".to_string(),
            AttrRef::new(&target_group, "arn").into(),
        ),
    ]
    .into();
    let load_balancer = graph.insert(
        Resource::new(names::id(names::LOAD_BALANCER), ResourceKind::LoadBalancer)
            .attr("scheme", "internet-facing")
            .attr("subnets", NetworkTopology::subnet_refs(&topology.public_subnets))
            .attr("listener", listener),
    )?;

    let env: BTreeMap<String, AttrValue> = service
        .env
        .iter()
        .map(|(name, value)| (name.clone(), AttrValue::from(value)))
        .collect();
    let logging: BTreeMap<String, AttrValue> = [
        ("group".to_string(), AttrRef::new(log_group, "name").into()),
        (
            "streamPrefix".to_string(),
            service.log_stream_prefix.as_str().into(),
        ),
    ]
    .into();

    let service_id = graph.insert(
        Resource::new(names::id(names::SERVICE), ResourceKind::Service)
            .attr("cluster", AttrRef::new(&cluster, "arn"))
            .attr("launchType", LAUNCH_TYPE)
            .attr("image", service.image.to_string())
            .attr("cpu", service.cpu_units)
            .attr("memoryMiB", service.memory_mib)
            .attr("desiredCount", service.desired_replicas)
            .attr("containerPort", service.container_port)
            .attr("env", env)
            .attr("executionRole", AttrRef::new(&roles.execution.id, "arn"))
            .attr("taskRole", AttrRef::new(&roles.task.id, "arn"))
            .attr("subnets", NetworkTopology::subnet_refs(&topology.private_subnets))
            .attr("assignPublicIp", false)
            .attr("targetGroup", AttrRef::new(&target_group, "arn"))
            .attr("logging", logging)
            .attr(
                "healthCheckGracePeriodSeconds",
                service.health_check_grace_seconds,
            )
            .depends_on(&load_balancer),
    )?;

    Ok(ServiceHandles {
        cluster,
        load_balancer,
        target_group,
        service: service_id,
        container_port: service.container_port,
    })
}
