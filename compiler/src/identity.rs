use std::{collections::BTreeSet, fmt};

use cairn_graph::{AttrRef, AttrValue, Resource, ResourceGraph, ResourceId, ResourceKind};

use crate::{Error, image::ImageRef, names, secrets::SecretSet};

/// Principal allowed to assume both service roles.
pub const TASK_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GrantAction {
    ImagePull,
    LogWrite,
    SecretRead,
    KeyDecrypt,
}

impl GrantAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImagePull => "imagePull",
            Self::LogWrite => "logWrite",
            Self::SecretRead => "secretRead",
            Self::KeyDecrypt => "keyDecrypt",
        }
    }
}

impl fmt::Display for GrantAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GrantScope {
    Resource(ResourceId),
    /// `registry/repository` of an image.
    Image(String),
    /// Every resource. Only produced through the legacy opt-in.
    Wildcard,
}

impl GrantScope {
    fn to_attr(&self) -> AttrValue {
        match self {
            Self::Resource(id) => AttrRef::new(id, "arn").into(),
            Self::Image(location) => location.as_str().into(),
            Self::Wildcard => "*".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Grant {
    pub action: GrantAction,
    pub scope: GrantScope,
}

impl Grant {
    pub fn new(action: GrantAction, scope: GrantScope) -> Self {
        Self { action, scope }
    }

    fn to_attr(&self) -> AttrValue {
        AttrValue::Map(
            [
                ("action".to_string(), AttrValue::from(self.action.as_str())),
                ("scope".to_string(), self.scope.to_attr()),
            ]
            .into(),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityRole {
    pub id: ResourceId,
    pub trusted_principal: &'static str,
    pub grants: BTreeSet<Grant>,
}

impl IdentityRole {
    /// True if the role may perform `action` on `resource`.
    pub fn allows(&self, action: GrantAction, resource: &ResourceId) -> bool {
        self.grants.iter().any(|grant| {
            grant.action == action
                && match &grant.scope {
                    GrantScope::Resource(id) => id == resource,
                    GrantScope::Wildcard => true,
                    GrantScope::Image(_) => false,
                }
        })
    }

    pub fn has_wildcard(&self) -> bool {
        self.grants
            .iter()
            .any(|grant| grant.scope == GrantScope::Wildcard)
    }

    fn to_resource(&self, purpose: &str) -> Resource {
        let grants: Vec<AttrValue> = self.grants.iter().map(Grant::to_attr).collect();
        Resource::new(self.id.clone(), ResourceKind::Role)
            .attr("purpose", purpose)
            .attr("trustedPrincipal", self.trusted_principal)
            .attr("grants", AttrValue::List(grants))
    }
}

/// The two service roles. The execution role is used by the platform to start
/// replicas; the task role is what the running application holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityRoles {
    pub execution: IdentityRole,
    pub task: IdentityRole,
}

/// Declare the execution role (`imagePull` on the image, `logWrite` on the log
/// group) and the task role (`secretRead` and `keyDecrypt` on each declared
/// secret).
///
/// `allow_wildcard_scope` replaces the per-secret task grants with grants on
/// every secret.
pub fn compose(
    graph: &mut ResourceGraph,
    image: &ImageRef,
    log_group: &ResourceId,
    secrets: &SecretSet,
    allow_wildcard_scope: bool,
) -> Result<IdentityRoles, Error> {
    let execution = IdentityRole {
        id: names::id(names::EXECUTION_ROLE),
        trusted_principal: TASK_PRINCIPAL,
        grants: BTreeSet::from([
            Grant::new(GrantAction::ImagePull, GrantScope::Image(image.location())),
            Grant::new(GrantAction::LogWrite, GrantScope::Resource(log_group.clone())),
        ]),
    };

    let grants = if allow_wildcard_scope {
        tracing::warn!(
            "task role is granted secret reads on every secret; \
             scope it to the declared secrets instead"
        );
        BTreeSet::from([
            Grant::new(GrantAction::SecretRead, GrantScope::Wildcard),
            Grant::new(GrantAction::KeyDecrypt, GrantScope::Wildcard),
        ])
    } else {
        secrets
            .iter()
            .flat_map(|secret| {
                [GrantAction::SecretRead, GrantAction::KeyDecrypt]
                    .map(|action| Grant::new(action, GrantScope::Resource(secret.resource.clone())))
            })
            .collect()
    };
    let task = IdentityRole {
        id: names::id(names::TASK_ROLE),
        trusted_principal: TASK_PRINCIPAL,
        grants,
    };

    graph.insert(execution.to_resource("execution"))?;
    let mut task_resource = task.to_resource("task");
    if allow_wildcard_scope {
        // Keep the ordering edge to the secrets even without per-secret refs.
        for secret in secrets.iter() {
            task_resource = task_resource.depends_on(&secret.resource);
        }
    }
    graph.insert(task_resource)?;

    Ok(IdentityRoles { execution, task })
}
