use std::collections::{BTreeMap, BTreeSet};

use cairn_graph::{AttrRef, AttrValue, ResourceGraph};
use serde::Serialize;

use crate::{IncompleteGraphError, compute::ServiceHandles, datastore::DataStore};

pub const PUBLIC_ENDPOINT: &str = "publicEndpoint";
pub const DATABASE_ENDPOINT: &str = "databaseEndpoint";
pub const CLUSTER_ID: &str = "clusterId";
pub const SERVICE_ID: &str = "serviceId";

/// The complete output contract, in emission order.
pub const OUTPUT_KEYS: [&str; 4] = [PUBLIC_ENDPOINT, DATABASE_ENDPOINT, CLUSTER_ID, SERVICE_ID];

/// Externally consumable identifiers of a composed stack. Values resolve when
/// the graph is realized. Immutable once emitted.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct OutputSet {
    entries: BTreeMap<String, AttrValue>,
}

impl OutputSet {
    /// Check `entries` against the output contract and the graph: exactly the
    /// contract keys, none blank, every referenced resource present.
    pub fn verified(
        graph: &ResourceGraph,
        entries: BTreeMap<String, AttrValue>,
    ) -> Result<Self, IncompleteGraphError> {
        if let Some(key) = entries.keys().find(|key| !OUTPUT_KEYS.contains(&key.as_str())) {
            return Err(IncompleteGraphError::UnexpectedOutput { key: key.clone() });
        }
        for key in OUTPUT_KEYS {
            let Some(value) = entries.get(key) else {
                return Err(IncompleteGraphError::MissingOutput { key });
            };
            if value.is_blank() {
                return Err(IncompleteGraphError::EmptyOutput {
                    key: key.to_string(),
                });
            }
            let mut references = BTreeSet::new();
            value.collect_references(&mut references);
            if let Some(resource) = references.into_iter().find(|id| !graph.contains(id)) {
                return Err(IncompleteGraphError::DanglingOutput {
                    key: key.to_string(),
                    resource,
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, AttrValue> {
        &self.entries
    }
}

/// Emit the four stack outputs.
pub fn emit(
    graph: &ResourceGraph,
    service: &ServiceHandles,
    store: &DataStore,
) -> Result<OutputSet, IncompleteGraphError> {
    let entries = BTreeMap::from([
        (
            PUBLIC_ENDPOINT.to_string(),
            AttrValue::Join(vec![
                "http://".into(),
                AttrRef::new(&service.load_balancer, "dnsName").into(),
            ]),
        ),
        (DATABASE_ENDPOINT.to_string(), store.endpoint().into()),
        (
            CLUSTER_ID.to_string(),
            AttrRef::new(&service.cluster, "name").into(),
        ),
        (
            SERVICE_ID.to_string(),
            AttrRef::new(&service.service, "name").into(),
        ),
    ]);
    OutputSet::verified(graph, entries)
}
