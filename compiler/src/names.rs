//! Fixed resource ids. Every build of the same inputs uses the same ids, which
//! is what makes rebuilt graphs comparable.

use cairn_graph::ResourceId;

pub(crate) const NETWORK: &str = "network";
pub(crate) const INTERNET_GATEWAY: &str = "internet-gateway";
pub(crate) const PUBLIC_SUBNET: &str = "public-subnet";
pub(crate) const PRIVATE_SUBNET: &str = "private-subnet";
pub(crate) const NAT_GATEWAY: &str = "nat-gateway";
pub(crate) const DATABASE: &str = "database";
pub(crate) const DATABASE_CREDENTIALS: &str = "database-credentials";
pub(crate) const SECRET: &str = "secret";
pub(crate) const LOG_GROUP: &str = "log-group";
pub(crate) const EXECUTION_ROLE: &str = "execution-role";
pub(crate) const TASK_ROLE: &str = "task-role";
pub(crate) const CLUSTER: &str = "cluster";
pub(crate) const LOAD_BALANCER: &str = "load-balancer";
pub(crate) const TARGET_GROUP: &str = "target-group";
pub(crate) const SERVICE: &str = "service";
pub(crate) const HEALTH_CHECK: &str = "health-check";
pub(crate) const SCALING_POLICY: &str = "scaling-policy";

pub(crate) fn id(name: &str) -> ResourceId {
    ResourceId::sanitized(name)
}

/// `base-n`, cutting `base` so the suffix survives the id length limit.
pub(crate) fn suffixed(base: &ResourceId, n: usize) -> ResourceId {
    let suffix = format!("-{n}");
    let keep = ResourceId::MAX_LEN.saturating_sub(suffix.len());
    let head = base.as_str().get(..keep).unwrap_or(base.as_str());
    ResourceId::sanitized(&format!("{}{suffix}", head.trim_end_matches('-')))
}

pub(crate) fn indexed(prefix: &str, index: u32) -> ResourceId {
    ResourceId::sanitized(&format!("{prefix}-{index}"))
}
