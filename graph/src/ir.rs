use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{AttrValue, GraphDigest, GraphError, Resource, ResourceGraph, ResourceId};

pub const STACK_IR_SCHEMA: &str = "cairn.stack.ir";
pub const STACK_IR_VERSION: u32 = 1;

/// Stable JSON form of a composed stack, handed to the provisioning engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StackIr {
    pub schema: String,
    pub version: u32,
    pub digest: GraphDigest,
    pub resources: Vec<Resource>,
    pub outputs: BTreeMap<String, AttrValue>,
}

impl StackIr {
    pub fn new(graph: &ResourceGraph, outputs: &BTreeMap<String, AttrValue>) -> Self {
        Self {
            schema: STACK_IR_SCHEMA.to_string(),
            version: STACK_IR_VERSION,
            digest: graph.digest(),
            resources: graph.resources().to_vec(),
            outputs: outputs.clone(),
        }
    }

    /// Validate the document and rebuild the graph it describes.
    pub fn into_parts(
        self,
    ) -> Result<(ResourceGraph, BTreeMap<String, AttrValue>), StackIrError> {
        if self.schema != STACK_IR_SCHEMA {
            return Err(StackIrError::SchemaMismatch {
                expected: STACK_IR_SCHEMA,
                actual: self.schema,
            });
        }
        if self.version != STACK_IR_VERSION {
            return Err(StackIrError::VersionMismatch {
                expected: STACK_IR_VERSION,
                actual: self.version,
            });
        }

        let graph = ResourceGraph::from_unordered(self.resources)?;
        let actual = graph.digest();
        if actual != self.digest {
            return Err(StackIrError::DigestMismatch {
                recorded: self.digest,
                actual,
            });
        }

        for (name, value) in &self.outputs {
            let mut refs = BTreeSet::new();
            value.collect_references(&mut refs);
            if let Some(missing) = refs.into_iter().find(|id| !graph.contains(id)) {
                return Err(StackIrError::MissingOutputResource {
                    output: name.clone(),
                    resource: missing,
                });
            }
        }

        Ok((graph, self.outputs))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StackIrError {
    #[error("stack IR schema mismatch: expected {expected}, got {actual}")]
    SchemaMismatch {
        expected: &'static str,
        actual: String,
    },
    #[error("stack IR version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("stack IR digest {recorded} does not match its resources ({actual})")]
    DigestMismatch {
        recorded: GraphDigest,
        actual: GraphDigest,
    },
    #[error("stack IR output `{output}` references missing resource `{resource}`")]
    MissingOutputResource { output: String, resource: ResourceId },
    #[error(transparent)]
    Graph(#[from] GraphError),
}
