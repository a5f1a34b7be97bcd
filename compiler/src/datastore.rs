use cairn_config::DatabaseOptions;
use cairn_graph::{
    AttrRef, Resource, ResourceGraph, ResourceId, ResourceKind, Retention, SecretRef,
};

use crate::{ConfigurationError, Error, names, network::NetworkTopology};

pub const ENGINE: &str = "postgres";
pub const MIN_STORAGE_GIB: u32 = 20;
pub const MAX_BACKUP_RETENTION_DAYS: u32 = 35;
pub const PASSWORD_LENGTH: u32 = 30;
/// Characters the generated password must not contain.
pub const PASSWORD_EXCLUDED_CHARS: &str = "\" @/\\'";
const MAX_IDENTIFIER_LEN: usize = 63;

/// Handles to the managed database and the secret holding its credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataStore {
    pub database: ResourceId,
    pub credentials: ResourceId,
    pub port: u16,
}

impl DataStore {
    /// Hostname the database is reachable at once realized.
    pub fn endpoint(&self) -> AttrRef {
        AttrRef::new(&self.database, "endpointAddress")
    }
}

/// Declare a credentials generation request and a database placed only in
/// the private subnets.
///
/// The database gets no inbound rule here; it stays unreachable until a
/// security rule names it as destination.
pub fn provision(
    graph: &mut ResourceGraph,
    topology: &NetworkTopology,
    options: &DatabaseOptions,
) -> Result<DataStore, Error> {
    validate(topology, options)?;

    let database_id = names::id(names::DATABASE);
    let credentials = graph.insert(
        Resource::new(
            names::id(names::DATABASE_CREDENTIALS),
            ResourceKind::GeneratedSecret,
        )
        .attr("owner", database_id.as_str())
        .attr("username", options.username.as_str())
        .attr("generateField", "password")
        .attr("passwordLength", PASSWORD_LENGTH)
        .attr("excludeCharacters", PASSWORD_EXCLUDED_CHARS)
        .attr("rotatable", true),
    )?;

    let database = graph.insert(
        Resource::new(database_id, ResourceKind::Database)
            .attr("engine", ENGINE)
            .attr("engineVersion", options.engine_version.as_str())
            .attr("instanceClass", options.instance_class.as_str())
            .attr("allocatedStorageGiB", options.storage_gib)
            .attr("databaseName", options.database_name.as_str())
            .attr("port", options.port)
            .attr("multiAz", options.multi_az)
            .attr("publiclyAccessible", false)
            .attr("backupRetentionDays", options.backup_retention_days)
            .attr("subnets", NetworkTopology::subnet_refs(&topology.private_subnets))
            .attr("username", SecretRef::field(&credentials, "username"))
            .attr("password", SecretRef::field(&credentials, "password"))
            .retention(Retention::Snapshot),
    )?;

    Ok(DataStore {
        database,
        credentials,
        port: options.port,
    })
}

fn validate(topology: &NetworkTopology, options: &DatabaseOptions) -> Result<(), Error> {
    if topology.private_subnets.is_empty() {
        return Err(ConfigurationError::MissingPrivateZone.into());
    }
    if options.storage_gib < MIN_STORAGE_GIB {
        return Err(ConfigurationError::StorageTooSmall {
            gib: options.storage_gib,
            min: MIN_STORAGE_GIB,
        }
        .into());
    }
    if options.backup_retention_days > MAX_BACKUP_RETENTION_DAYS {
        return Err(ConfigurationError::BackupRetention {
            days: options.backup_retention_days,
            max: MAX_BACKUP_RETENTION_DAYS,
        }
        .into());
    }
    if !is_engine_version(&options.engine_version) {
        return Err(ConfigurationError::InvalidEngineVersion {
            version: options.engine_version.clone(),
        }
        .into());
    }
    for (what, value) in [
        ("name", &options.database_name),
        ("username", &options.username),
    ] {
        if !is_identifier(value) {
            return Err(ConfigurationError::InvalidDatabaseIdentifier {
                what,
                value: value.clone(),
            }
            .into());
        }
    }
    if options.port == 0 {
        return Err(ConfigurationError::WildcardPort {
            what: "database",
            port: options.port,
        }
        .into());
    }
    Ok(())
}

fn is_engine_version(version: &str) -> bool {
    !version.is_empty()
        && version
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

fn is_identifier(value: &str) -> bool {
    value.len() <= MAX_IDENTIFIER_LEN
        && value.bytes().next().is_some_and(|b| b.is_ascii_alphabetic())
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
