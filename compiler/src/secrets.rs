use cairn_graph::{Resource, ResourceGraph, ResourceId, ResourceKind, SecretRef};

use crate::{
    ConfigurationError, Error,
    compute::{ComputeService, EnvValue},
    names,
};

const MAX_SECRET_ID_LEN: usize = 2048;

/// An external secret bound to one environment variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclaredSecret {
    pub env_name: String,
    pub external_id: String,
    pub resource: ResourceId,
}

impl DeclaredSecret {
    pub fn reference(&self) -> SecretRef {
        SecretRef::whole(&self.resource)
    }
}

/// The secrets a service reads at runtime. The same set drives both the env
/// bindings and the task role grants.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecretSet {
    entries: Vec<DeclaredSecret>,
}

impl SecretSet {
    pub fn iter(&self) -> impl Iterator<Item = &DeclaredSecret> {
        self.entries.iter()
    }

    pub fn get(&self, env_name: &str) -> Option<&DeclaredSecret> {
        self.entries.iter().find(|entry| entry.env_name == env_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Declare one `SecretRef` resource per `(env name, external id)` binding.
///
/// Ids are validated for format only; whether they exist is checked by the
/// secret store when the graph is realized.
pub fn declare(
    graph: &mut ResourceGraph,
    bindings: &[(String, String)],
) -> Result<SecretSet, Error> {
    let mut entries: Vec<DeclaredSecret> = Vec::with_capacity(bindings.len());
    for (env_name, external_id) in bindings {
        if !is_env_name(env_name) {
            return Err(ConfigurationError::InvalidEnvName {
                name: env_name.clone(),
            }
            .into());
        }
        if entries.iter().any(|entry| &entry.env_name == env_name) {
            return Err(ConfigurationError::DuplicateSecretBinding {
                name: env_name.clone(),
            }
            .into());
        }
        if !is_secret_id(external_id) {
            return Err(ConfigurationError::InvalidSecretId {
                name: env_name.clone(),
                id: external_id.clone(),
            }
            .into());
        }
    }

    for (env_name, external_id) in bindings {
        let id = unused_id(graph, env_name);
        let resource = graph.insert(
            Resource::new(id, ResourceKind::SecretRef)
                .attr("secretId", external_id.as_str())
                .attr("source", "external"),
        )?;
        entries.push(DeclaredSecret {
            env_name: env_name.clone(),
            external_id: external_id.clone(),
            resource,
        });
    }

    Ok(SecretSet { entries })
}

/// Rewrite the service environment so every declared secret is injected as a
/// reference. A secret may not shadow a literal entry.
pub fn bind(service: &mut ComputeService, secrets: &SecretSet) -> Result<(), ConfigurationError> {
    for entry in secrets.iter() {
        let reference = entry.reference();
        match service.env.get(&entry.env_name) {
            Some(EnvValue::Literal(_)) => {
                return Err(ConfigurationError::EnvCollision {
                    name: entry.env_name.clone(),
                });
            }
            Some(EnvValue::Secret(existing)) if existing != &reference => {
                return Err(ConfigurationError::DuplicateSecretBinding {
                    name: entry.env_name.clone(),
                });
            }
            Some(EnvValue::Secret(_)) => {}
            None => {
                service
                    .env
                    .insert(entry.env_name.clone(), EnvValue::Secret(reference));
            }
        }
    }
    Ok(())
}

/// `[A-Z_][A-Z0-9_]*`
pub fn is_env_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    bytes
        .next()
        .is_some_and(|b| b.is_ascii_uppercase() || b == b'_')
        && bytes.all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

/// Secret names or ARNs: letters, digits and `/_+=.@:-`.
fn is_secret_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SECRET_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"/_+=.@:-".contains(&b))
}

/// `secret-<env name>`, suffixed when two env names sanitize to the same id.
/// The suffix replaces the tail of an id already at the length limit.
fn unused_id(graph: &ResourceGraph, env_name: &str) -> ResourceId {
    let base = names::id(&format!("{}-{}", names::SECRET, env_name));
    if !graph.contains(&base) {
        return base;
    }
    // At most `graph.len()` candidates are taken, so one of these is free.
    (2..=graph.len() + 2)
        .map(|n| names::suffixed(&base, n))
        .find(|candidate| !graph.contains(candidate))
        .unwrap_or(base)
}
