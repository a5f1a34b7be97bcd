use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod diff;
mod digest;
pub mod graph;
pub mod ir;

pub use diff::{GraphDiff, ResourceChange, diff};
pub use digest::{GraphDigest, InvalidDigest};
pub use graph::CycleError;
pub use ir::{STACK_IR_SCHEMA, STACK_IR_VERSION, StackIr, StackIrError};

const MAX_ID_LEN: usize = 63;

/// Identifier of a resource, unique within one graph.
///
/// Ids are DNS-label shaped: lowercase ASCII alphanumerics and `-`, at most 63
/// characters, never starting or ending with `-`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(Arc<str>);

impl ResourceId {
    pub const MAX_LEN: usize = MAX_ID_LEN;

    pub fn new(value: impl AsRef<str>) -> Result<Self, GraphError> {
        let value = value.as_ref();
        if is_valid_id(value) {
            Ok(Self(Arc::from(value)))
        } else {
            Err(GraphError::InvalidId {
                id: value.to_string(),
            })
        }
    }

    /// Build an id from arbitrary text by lowercasing it, replacing anything
    /// outside `[a-z0-9]` with `-` and collapsing runs of `-`.
    pub fn sanitized(value: &str) -> Self {
        let mut out = String::with_capacity(value.len());
        let mut last_hyphen = true;
        for ch in value.chars() {
            let ch = ch.to_ascii_lowercase();
            if ch.is_ascii_alphanumeric() {
                out.push(ch);
                last_hyphen = false;
            } else if !last_hyphen {
                out.push('-');
                last_hyphen = true;
            }
        }
        let mut out = out.trim_end_matches('-').to_string();
        if out.len() > MAX_ID_LEN {
            out.truncate(MAX_ID_LEN);
            out = out.trim_end_matches('-').to_string();
        }
        if out.is_empty() {
            out.push_str("resource");
        }
        Self(Arc::from(out))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_ID_LEN
        && !value.starts_with('-')
        && !value.ends_with('-')
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

impl TryFrom<String> for ResourceId {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResourceId> for String {
    fn from(value: ResourceId) -> Self {
        value.0.to_string()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ResourceKind {
    Network,
    Subnet,
    Gateway,
    Database,
    GeneratedSecret,
    SecretRef,
    Role,
    LogGroup,
    Cluster,
    LoadBalancer,
    TargetGroup,
    Service,
    SecurityRule,
    HealthCheck,
    ScalingPolicy,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "Network",
            Self::Subnet => "Subnet",
            Self::Gateway => "Gateway",
            Self::Database => "Database",
            Self::GeneratedSecret => "GeneratedSecret",
            Self::SecretRef => "SecretRef",
            Self::Role => "Role",
            Self::LogGroup => "LogGroup",
            Self::Cluster => "Cluster",
            Self::LoadBalancer => "LoadBalancer",
            Self::TargetGroup => "TargetGroup",
            Self::Service => "Service",
            Self::SecurityRule => "SecurityRule",
            Self::HealthCheck => "HealthCheck",
            Self::ScalingPolicy => "ScalingPolicy",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the provisioning engine should do with the underlying resource when
/// it disappears from the graph.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    #[default]
    Delete,
    Retain,
    Snapshot,
}

impl Retention {
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

/// A value only known once the referenced resource has been realized, such as
/// a load balancer's DNS name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttrRef {
    pub resource: ResourceId,
    pub attribute: String,
}

impl AttrRef {
    pub fn new(resource: &ResourceId, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.clone(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.attribute)
    }
}

/// Indirection to sensitive data held by a secret resource. The graph never
/// carries the secret material itself.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SecretRef {
    pub secret: ResourceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl SecretRef {
    pub fn whole(secret: &ResourceId) -> Self {
        Self {
            secret: secret.clone(),
            field: None,
        }
    }

    pub fn field(secret: &ResourceId, field: impl Into<String>) -> Self {
        Self {
            secret: secret.clone(),
            field: Some(field.into()),
        }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "secret:{}#{}", self.secret, field),
            None => write!(f, "secret:{}", self.secret),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    String(String),
    Integer(i64),
    Number(f64),
    Bool(bool),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
    Ref(AttrRef),
    Secret(SecretRef),
    /// String concatenation of the parts, resolved at realization time.
    Join(Vec<AttrValue>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttrValue]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, AttrValue>> {
        match self {
            Self::Map(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_attr_ref(&self) -> Option<&AttrRef> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_secret(&self) -> Option<&SecretRef> {
        match self {
            Self::Secret(r) => Some(r),
            _ => None,
        }
    }

    /// True if the value renders to nothing, even after realization.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::String(value) => value.trim().is_empty(),
            Self::List(values) | Self::Join(values) => values.iter().all(Self::is_blank),
            Self::Map(values) => values.is_empty(),
            Self::Ref(r) => r.attribute.is_empty(),
            Self::Integer(_) | Self::Number(_) | Self::Bool(_) | Self::Secret(_) => false,
        }
    }

    /// Collect every resource id this value points at.
    pub fn collect_references(&self, out: &mut BTreeSet<ResourceId>) {
        match self {
            Self::Ref(r) => {
                out.insert(r.resource.clone());
            }
            Self::Secret(r) => {
                out.insert(r.secret.clone());
            }
            Self::List(values) | Self::Join(values) => {
                for value in values {
                    value.collect_references(out);
                }
            }
            Self::Map(values) => {
                for value in values.values() {
                    value.collect_references(out);
                }
            }
            Self::String(_) | Self::Integer(_) | Self::Number(_) | Self::Bool(_) => {}
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => f.write_str(value),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Ref(r) => write!(f, "{r}"),
            Self::Secret(r) => write!(f, "{r}"),
            Self::Join(parts) => {
                for part in parts {
                    write!(f, "{part}")?;
                }
                Ok(())
            }
            Self::List(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            Self::Map(values) => {
                f.write_str("{")?;
                for (i, (key, value)) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for AttrValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u16> for AttrValue {
    fn from(value: u16) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<AttrRef> for AttrValue {
    fn from(value: AttrRef) -> Self {
        Self::Ref(value)
    }
}

impl From<SecretRef> for AttrValue {
    fn from(value: SecretRef) -> Self {
        Self::Secret(value)
    }
}

impl<T: Into<AttrValue>> From<Vec<T>> for AttrValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<AttrValue>> From<BTreeMap<String, T>> for AttrValue {
    fn from(values: BTreeMap<String, T>) -> Self {
        Self::Map(values.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttrValue>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<ResourceId>,
    #[serde(default, skip_serializing_if = "Retention::is_delete")]
    pub retention: Retention,
}

impl Resource {
    pub fn new(id: ResourceId, kind: ResourceKind) -> Self {
        Self {
            id,
            kind,
            attributes: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            retention: Retention::Delete,
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn depends_on(mut self, id: &ResourceId) -> Self {
        self.depends_on.insert(id.clone());
        self
    }

    pub fn retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// Every id this resource needs to exist first: explicit dependencies plus
    /// anything referenced from its attributes.
    pub fn references(&self) -> BTreeSet<ResourceId> {
        let mut out = self.depends_on.clone();
        for value in self.attributes.values() {
            value.collect_references(&mut out);
        }
        out
    }
}

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum GraphError {
    #[error("invalid resource id `{id}`")]
    #[diagnostic(
        code(graph::invalid_id),
        help("Resource ids are lowercase alphanumerics and `-`, at most 63 characters.")
    )]
    InvalidId { id: String },

    #[error("resource `{id}` is declared more than once")]
    #[diagnostic(code(graph::duplicate_id))]
    DuplicateId { id: ResourceId },

    #[error("resource `{resource}` depends on `{dependency}`, which has not been declared")]
    #[diagnostic(code(graph::unknown_dependency))]
    UnknownDependency {
        resource: ResourceId,
        dependency: ResourceId,
    },

    #[error("resource `{resource}` depends on itself")]
    #[diagnostic(code(graph::self_dependency))]
    SelfDependency { resource: ResourceId },

    #[error(transparent)]
    #[diagnostic(code(graph::cycle))]
    Cycle(#[from] CycleError),
}

/// An acyclic, insertion-ordered set of resources.
///
/// Insertion only accepts resources whose dependencies are already present,
/// so the insertion order is always a valid topological order.
#[derive(Clone, Debug, Default)]
pub struct ResourceGraph {
    resources: Vec<Resource>,
    index: HashMap<ResourceId, usize>,
}

impl PartialEq for ResourceGraph {
    fn eq(&self, other: &Self) -> bool {
        self.resources == other.resources
    }
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resource. Its dependency set is widened to include every
    /// resource referenced from its attributes.
    pub fn insert(&mut self, mut resource: Resource) -> Result<ResourceId, GraphError> {
        if self.index.contains_key(&resource.id) {
            return Err(GraphError::DuplicateId { id: resource.id });
        }
        let references = resource.references();
        for dependency in &references {
            if dependency == &resource.id {
                return Err(GraphError::SelfDependency {
                    resource: resource.id,
                });
            }
            if !self.index.contains_key(dependency) {
                return Err(GraphError::UnknownDependency {
                    resource: resource.id,
                    dependency: dependency.clone(),
                });
            }
        }
        resource.depends_on = references;

        tracing::debug!(id = %resource.id, kind = %resource.kind, "declared resource");

        let id = resource.id.clone();
        self.index.insert(id.clone(), self.resources.len());
        self.resources.push(resource);
        Ok(id)
    }

    /// Build a graph from resources in arbitrary order, rejecting duplicates,
    /// dangling references and cycles. The result is stored in a topological
    /// order that keeps the given order wherever it is already valid.
    pub fn from_unordered(resources: Vec<Resource>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(resources.len());
        for (pos, resource) in resources.iter().enumerate() {
            if index.insert(resource.id.clone(), pos).is_some() {
                return Err(GraphError::DuplicateId {
                    id: resource.id.clone(),
                });
            }
        }
        for resource in &resources {
            for dependency in resource.references() {
                if dependency == resource.id {
                    return Err(GraphError::SelfDependency {
                        resource: resource.id.clone(),
                    });
                }
                if !index.contains_key(&dependency) {
                    return Err(GraphError::UnknownDependency {
                        resource: resource.id.clone(),
                        dependency,
                    });
                }
            }
        }

        let order = graph::topo_order_of(&resources, &index)?;
        let mut slots: Vec<Option<Resource>> = resources.into_iter().map(Some).collect();
        let mut graph = Self::new();
        for pos in order {
            if let Some(resource) = slots[pos].take() {
                graph.insert(resource)?;
            }
        }
        Ok(graph)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.index.get(id).map(|&pos| &self.resources[pos])
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Position of the resource in build order.
    pub fn position(&self, id: &ResourceId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn digest(&self) -> GraphDigest {
        GraphDigest::of(self)
    }

    /// Debug-only validation of the build-order invariant.
    pub fn assert_invariants(&self) {
        if !cfg!(debug_assertions) {
            return;
        }

        for (pos, resource) in self.resources.iter().enumerate() {
            debug_assert_eq!(self.index.get(&resource.id), Some(&pos), "stale index");
            for dependency in &resource.depends_on {
                let dep_pos = self.index.get(dependency).copied();
                debug_assert!(
                    dep_pos.is_some_and(|p| p < pos),
                    "dependency declared after its dependent"
                );
            }
        }
    }
}

impl<'a> IntoIterator for &'a ResourceGraph {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.iter()
    }
}
