use std::time::Duration;

use cairn_config::HealthCheckOptions;
use cairn_graph::{AttrRef, Resource, ResourceGraph, ResourceId, ResourceKind};

use crate::{ConfigurationError, Error, compute::ServiceHandles, names};

/// A validated HTTP probe definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthCheckConfig {
    pub path: String,
    pub port: u16,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    pub interval: Duration,
    pub timeout: Duration,
}

impl HealthCheckConfig {
    /// Probe `port`, which must be the container port the target group
    /// forwards to.
    pub fn new(options: &HealthCheckOptions, port: u16) -> Result<Self, ConfigurationError> {
        if !options.path.starts_with('/') || options.path.chars().any(char::is_whitespace) {
            return Err(ConfigurationError::ProbePath {
                path: options.path.clone(),
            });
        }
        for (which, value) in [
            ("healthy", options.healthy_threshold),
            ("unhealthy", options.unhealthy_threshold),
        ] {
            if value < 1 {
                return Err(ConfigurationError::ProbeThreshold { which, value });
            }
        }
        if options.timeout_seconds < 1 || options.timeout_seconds >= options.interval_seconds {
            return Err(ConfigurationError::ProbeTiming {
                timeout_seconds: options.timeout_seconds,
                interval_seconds: options.interval_seconds,
            });
        }
        if port == 0 {
            return Err(ConfigurationError::WildcardPort {
                what: "health check",
                port,
            });
        }

        Ok(Self {
            path: options.path.clone(),
            port,
            healthy_threshold: options.healthy_threshold,
            unhealthy_threshold: options.unhealthy_threshold,
            interval: Duration::from_secs(options.interval_seconds.into()),
            timeout: Duration::from_secs(options.timeout_seconds.into()),
        })
    }

    /// Classify one probe: a 2xx or 3xx answer within the timeout succeeds,
    /// anything else (including no answer) fails.
    pub fn classify(&self, status: Option<u16>, elapsed: Duration) -> ProbeOutcome {
        match status {
            Some(status) if (200..400).contains(&status) && elapsed <= self.timeout => {
                ProbeOutcome::Success
            }
            _ => ProbeOutcome::Failure,
        }
    }
}

/// Attach the probe to the service's target group.
pub fn configure(
    graph: &mut ResourceGraph,
    handles: &ServiceHandles,
    config: &HealthCheckConfig,
) -> Result<ResourceId, Error> {
    Ok(graph.insert(
        Resource::new(names::id(names::HEALTH_CHECK), ResourceKind::HealthCheck)
            .attr("targetGroup", AttrRef::new(&handles.target_group, "arn"))
            .attr("protocol", "HTTP")
            .attr("path", config.path.as_str())
            .attr("port", config.port)
            .attr("healthyThreshold", config.healthy_threshold)
            .attr("unhealthyThreshold", config.unhealthy_threshold)
            .attr("intervalSeconds", config.interval.as_secs() as i64)
            .attr("timeoutSeconds", config.timeout.as_secs() as i64)
            .depends_on(&handles.service),
    )?)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TargetHealth {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

/// Health of one replica as seen by the load balancer.
///
/// A target moves to `Healthy` after `healthy_threshold` consecutive
/// successes and to `Unhealthy` after `unhealthy_threshold` consecutive
/// failures, from any state. Only healthy targets receive traffic.
#[derive(Clone, Debug)]
pub struct TargetHealthTracker {
    healthy_threshold: u32,
    unhealthy_threshold: u32,
    state: TargetHealth,
    successes: u32,
    failures: u32,
}

impl TargetHealthTracker {
    pub fn new(config: &HealthCheckConfig) -> Self {
        Self {
            healthy_threshold: config.healthy_threshold,
            unhealthy_threshold: config.unhealthy_threshold,
            state: TargetHealth::Unknown,
            successes: 0,
            failures: 0,
        }
    }

    pub fn state(&self) -> TargetHealth {
        self.state
    }

    pub fn receives_traffic(&self) -> bool {
        self.state == TargetHealth::Healthy
    }

    pub fn observe(&mut self, outcome: ProbeOutcome) -> TargetHealth {
        match outcome {
            ProbeOutcome::Success => {
                self.failures = 0;
                self.successes = self.successes.saturating_add(1);
                if self.state != TargetHealth::Healthy && self.successes >= self.healthy_threshold
                {
                    tracing::debug!(from = ?self.state, "target became healthy");
                    self.state = TargetHealth::Healthy;
                }
            }
            ProbeOutcome::Failure => {
                self.successes = 0;
                self.failures = self.failures.saturating_add(1);
                if self.state != TargetHealth::Unhealthy
                    && self.failures >= self.unhealthy_threshold
                {
                    tracing::debug!(from = ?self.state, "target became unhealthy");
                    self.state = TargetHealth::Unhealthy;
                }
            }
        }
        self.state
    }
}
