use std::collections::BTreeMap;

use cairn_graph::{AttrRef, Resource, ResourceGraph, ResourceId, ResourceKind};

use crate::{ConfigurationError, Error};

pub const PROTOCOL: &str = "tcp";

/// Authorizes traffic between two resources, one rule per
/// `(source, destination, port)`.
#[derive(Clone, Debug, Default)]
pub struct SecurityRuleLinker {
    rules: BTreeMap<(ResourceId, ResourceId, u16), ResourceId>,
}

impl SecurityRuleLinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `source` to reach `destination` on `port`.
    ///
    /// Linking the same path again returns the rule declared the first time.
    pub fn link(
        &mut self,
        graph: &mut ResourceGraph,
        source: &ResourceId,
        destination: &ResourceId,
        port: u16,
    ) -> Result<ResourceId, Error> {
        if port == 0 {
            return Err(ConfigurationError::WildcardPort {
                what: "security rule",
                port,
            }
            .into());
        }

        let key = (source.clone(), destination.clone(), port);
        if let Some(existing) = self.rules.get(&key) {
            tracing::debug!(rule = %existing, "security rule already linked");
            return Ok(existing.clone());
        }

        let id = graph.insert(
            Resource::new(
                ResourceId::sanitized(&format!("allow-{source}-to-{destination}-{port}")),
                ResourceKind::SecurityRule,
            )
            .attr("source", AttrRef::new(source, "securityGroup"))
            .attr("destination", AttrRef::new(destination, "securityGroup"))
            .attr("port", port)
            .attr("protocol", PROTOCOL)
            .attr(
                "description",
                format!("{source} to {destination} on {PROTOCOL}/{port}"),
            ),
        )?;
        self.rules.insert(key, id.clone());
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules that allow traffic into `destination`, with their ports.
    pub fn inbound(&self, destination: &ResourceId) -> Vec<(&ResourceId, u16)> {
        self.rules
            .iter()
            .filter(|((_, to, _), _)| to == destination)
            .map(|((_, _, port), rule)| (rule, *port))
            .collect()
    }
}
