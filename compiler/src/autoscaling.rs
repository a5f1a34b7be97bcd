use std::time::Duration;

use cairn_config::{ScalingMetric, ScalingOptions};
use cairn_graph::{AttrRef, Resource, ResourceGraph, ResourceId, ResourceKind};

use crate::{ConfigurationError, Error, compute::ServiceHandles, names};

const MAX_METRIC_NAME_LEN: usize = 255;

/// A validated target-tracking policy.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalingPolicy {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub metric: ScalingMetric,
    pub target: f64,
    pub scale_in_cooldown: Duration,
    pub scale_out_cooldown: Duration,
}

impl ScalingPolicy {
    pub fn new(options: &ScalingOptions) -> Result<Self, ConfigurationError> {
        let (min, max) = (options.min_replicas, options.max_replicas);
        if min < 1 {
            return Err(ConfigurationError::ScalingMin { min });
        }
        if max < min {
            return Err(ConfigurationError::ScalingBounds { min, max });
        }

        let target = options.target;
        if !target.is_finite() || target <= 0.0 {
            return Err(ConfigurationError::ScalingTarget {
                target,
                reason: "target must be a positive number",
            });
        }
        match &options.metric {
            ScalingMetric::CpuUtilization if target > 100.0 => {
                return Err(ConfigurationError::ScalingTarget {
                    target,
                    reason: "CPU utilization targets are percentages",
                });
            }
            ScalingMetric::Custom { name } if !is_metric_name(name) => {
                return Err(ConfigurationError::ScalingMetric { name: name.clone() });
            }
            _ => {}
        }

        Ok(Self {
            min_replicas: min,
            max_replicas: max,
            metric: options.metric.clone(),
            target,
            scale_in_cooldown: Duration::from_secs(options.scale_in_cooldown_seconds.into()),
            scale_out_cooldown: Duration::from_secs(options.scale_out_cooldown_seconds.into()),
        })
    }

    /// A policy whose bounds coincide never changes the replica count.
    pub fn is_fixed(&self) -> bool {
        self.min_replicas == self.max_replicas
    }

    pub fn check_desired(&self, desired: u32) -> Result<(), ConfigurationError> {
        if (self.min_replicas..=self.max_replicas).contains(&desired) {
            Ok(())
        } else {
            Err(ConfigurationError::ReplicasOutOfBounds {
                desired,
                min: self.min_replicas,
                max: self.max_replicas,
            })
        }
    }

    /// Replica count that brings the per-replica metric back to target,
    /// clamped to the bounds.
    pub fn desired_replicas(&self, current: u32, value: f64) -> u32 {
        if !value.is_finite() || value < 0.0 {
            return current.clamp(self.min_replicas, self.max_replicas);
        }
        let wanted = (f64::from(current) * value / self.target).ceil();
        let wanted = if wanted >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            wanted as u32
        };
        wanted.clamp(self.min_replicas, self.max_replicas)
    }
}

fn is_metric_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name.len() <= MAX_METRIC_NAME_LEN
        && !name.chars().any(char::is_control)
}

fn metric_kind(metric: &ScalingMetric) -> &'static str {
    match metric {
        ScalingMetric::CpuUtilization => "cpuUtilization",
        ScalingMetric::RequestCount => "requestCount",
        ScalingMetric::Custom { .. } => "custom",
    }
}

/// Attach the policy to the service.
pub fn attach(
    graph: &mut ResourceGraph,
    handles: &ServiceHandles,
    policy: &ScalingPolicy,
) -> Result<ResourceId, Error> {
    let mut resource = Resource::new(names::id(names::SCALING_POLICY), ResourceKind::ScalingPolicy)
        .attr("cluster", AttrRef::new(&handles.cluster, "name"))
        .attr("service", AttrRef::new(&handles.service, "name"))
        .attr("minCapacity", policy.min_replicas)
        .attr("maxCapacity", policy.max_replicas)
        .attr("metricKind", metric_kind(&policy.metric))
        .attr("targetValue", policy.target)
        .attr("scaleInCooldownSeconds", policy.scale_in_cooldown.as_secs() as i64)
        .attr("scaleOutCooldownSeconds", policy.scale_out_cooldown.as_secs() as i64);
    match &policy.metric {
        ScalingMetric::Custom { name } => {
            resource = resource.attr("metricName", name.as_str());
        }
        ScalingMetric::RequestCount => {
            resource = resource.attr("targetGroup", AttrRef::new(&handles.target_group, "arn"));
        }
        ScalingMetric::CpuUtilization => {}
    }
    if policy.is_fixed() {
        tracing::debug!(replicas = policy.min_replicas, "scaling bounds pin the replica count");
    }
    Ok(graph.insert(resource)?)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalingDecision {
    Hold,
    ScaleOut { from: u32, to: u32 },
    ScaleIn { from: u32, to: u32 },
}

/// Runs a policy against a stream of metric samples.
///
/// Each adjustment starts that direction's cooldown; further adjustments in
/// the same direction wait it out, while the opposite direction stays free.
#[derive(Clone, Debug)]
pub struct ScalingController {
    policy: ScalingPolicy,
    replicas: u32,
    last_scale_out: Option<Duration>,
    last_scale_in: Option<Duration>,
}

impl ScalingController {
    pub fn new(policy: ScalingPolicy, initial_replicas: u32) -> Self {
        let replicas = initial_replicas.clamp(policy.min_replicas, policy.max_replicas);
        Self {
            policy,
            replicas,
            last_scale_out: None,
            last_scale_in: None,
        }
    }

    pub fn replicas(&self) -> u32 {
        self.replicas
    }

    /// Evaluate one sample taken at `now`, measured from any fixed origin.
    pub fn evaluate(&mut self, value: f64, now: Duration) -> ScalingDecision {
        let from = self.replicas;
        let to = self.policy.desired_replicas(from, value);
        let cooling = |last: Option<Duration>, cooldown: Duration| {
            last.is_some_and(|at| now.saturating_sub(at) < cooldown)
        };

        if to > from {
            if cooling(self.last_scale_out, self.policy.scale_out_cooldown) {
                return ScalingDecision::Hold;
            }
            self.last_scale_out = Some(now);
            self.replicas = to;
            ScalingDecision::ScaleOut { from, to }
        } else if to < from {
            if cooling(self.last_scale_in, self.policy.scale_in_cooldown) {
                return ScalingDecision::Hold;
            }
            self.last_scale_in = Some(now);
            self.replicas = to;
            ScalingDecision::ScaleIn { from, to }
        } else {
            ScalingDecision::Hold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(min: u32, max: u32) -> ScalingPolicy {
        ScalingPolicy::new(
            &ScalingOptions::builder()
                .min_replicas(min)
                .max_replicas(max)
                .build(),
        )
        .unwrap()
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn rejects_invalid_bounds_and_targets() {
        let cases = [
            ScalingOptions::builder().min_replicas(0).build(),
            ScalingOptions::builder().min_replicas(4).max_replicas(3).build(),
            ScalingOptions::builder().target(0.0).build(),
            ScalingOptions::builder().target(f64::NAN).build(),
            ScalingOptions::builder().target(120.0).build(),
            ScalingOptions::builder()
                .metric(ScalingMetric::Custom {
                    name: " ".to_string(),
                })
                .build(),
        ];
        for options in cases {
            assert!(ScalingPolicy::new(&options).is_err(), "{options:?}");
        }
    }

    #[test]
    fn request_count_targets_may_exceed_one_hundred() {
        let options = ScalingOptions::builder()
            .metric(ScalingMetric::RequestCount)
            .target(1000.0)
            .build();
        assert!(ScalingPolicy::new(&options).is_ok());
    }

    #[test]
    fn desired_replicas_must_sit_within_bounds() {
        let policy = policy(2, 6);
        assert!(policy.check_desired(2).is_ok());
        assert!(policy.check_desired(6).is_ok());
        assert!(matches!(
            policy.check_desired(7),
            Err(ConfigurationError::ReplicasOutOfBounds { .. })
        ));
        assert!(policy.check_desired(1).is_err());
    }

    #[test]
    fn target_tracking_is_proportional_and_clamped() {
        let policy = policy(2, 6);
        assert_eq!(policy.desired_replicas(2, 50.0), 2);
        assert_eq!(policy.desired_replicas(2, 80.0), 4);
        assert_eq!(policy.desired_replicas(4, 90.0), 6);
        assert_eq!(policy.desired_replicas(4, 10.0), 2);
        assert_eq!(policy.desired_replicas(4, f64::NAN), 4);
        assert_eq!(policy.desired_replicas(6, 1e12), 6);
    }

    #[test]
    fn fixed_policy_never_moves() {
        let policy = policy(3, 3);
        assert!(policy.is_fixed());
        let mut controller = ScalingController::new(policy, 3);
        assert_eq!(controller.evaluate(99.0, secs(0)), ScalingDecision::Hold);
        assert_eq!(controller.evaluate(1.0, secs(600)), ScalingDecision::Hold);
        assert_eq!(controller.replicas(), 3);
    }

    #[test]
    fn cooldown_applies_per_direction() {
        let mut controller = ScalingController::new(policy(2, 6), 2);

        assert_eq!(
            controller.evaluate(75.0, secs(0)),
            ScalingDecision::ScaleOut { from: 2, to: 3 }
        );
        // Still hot, but the scale-out cooldown has not elapsed.
        assert_eq!(controller.evaluate(100.0, secs(30)), ScalingDecision::Hold);
        // Scale-in is not blocked by a recent scale-out.
        assert_eq!(
            controller.evaluate(10.0, secs(31)),
            ScalingDecision::ScaleIn { from: 3, to: 2 }
        );
        assert_eq!(
            controller.evaluate(100.0, secs(60)),
            ScalingDecision::ScaleOut { from: 2, to: 4 }
        );
        assert_eq!(controller.evaluate(10.0, secs(61)), ScalingDecision::Hold);
        assert_eq!(
            controller.evaluate(10.0, secs(91)),
            ScalingDecision::ScaleIn { from: 4, to: 2 }
        );
    }

    #[test]
    fn initial_replicas_are_clamped() {
        assert_eq!(ScalingController::new(policy(2, 6), 10).replicas(), 6);
        assert_eq!(ScalingController::new(policy(2, 6), 0).replicas(), 2);
    }
}
