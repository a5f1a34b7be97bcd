use cairn_config::ConfigError;
use cairn_graph::{GraphError, ResourceId};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    IncompleteGraph(#[from] IncompleteGraphError),
}

impl From<GraphError> for Error {
    fn from(err: GraphError) -> Self {
        Self::IncompleteGraph(IncompleteGraphError::Graph(err))
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(ConfigurationError::Input(err))
    }
}

/// Invalid or missing build-time input. The build is aborted and no graph is
/// produced.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum ConfigurationError {
    #[error("{0}")]
    #[diagnostic(code(compose::config::input))]
    Input(ConfigError),

    #[error("missing image reference")]
    #[diagnostic(
        code(compose::config::missing_image),
        help("Pass a registry-qualified reference such as `registry.example/app:1.0`.")
    )]
    MissingImage,

    #[error("invalid image reference `{image}`: {reason}")]
    #[diagnostic(code(compose::config::invalid_image))]
    InvalidImage { image: String, reason: String },

    #[error("invalid callback URL `{url}`: {reason}")]
    #[diagnostic(code(compose::config::invalid_callback_url))]
    InvalidCallbackUrl { url: String, reason: String },

    #[error("zone count must be at least 1, got {zones}")]
    #[diagnostic(code(compose::config::zone_count))]
    ZoneCount { zones: u32 },

    #[error("zone count {zones} exceeds the address plan limit of {max}")]
    #[diagnostic(code(compose::config::too_many_zones))]
    TooManyZones { zones: u32, max: u32 },

    #[error("network topology has no private zone to place the database in")]
    #[diagnostic(code(compose::config::missing_private_zone))]
    MissingPrivateZone,

    #[error("database storage must be at least {min} GiB, got {gib}")]
    #[diagnostic(code(compose::config::storage_too_small))]
    StorageTooSmall { gib: u32, min: u32 },

    #[error("backup retention of {days} days exceeds the maximum of {max}")]
    #[diagnostic(code(compose::config::backup_retention))]
    BackupRetention { days: u32, max: u32 },

    #[error("invalid database engine version `{version}`")]
    #[diagnostic(
        code(compose::config::engine_version),
        help("Use a dotted numeric version such as `16` or `16.4`.")
    )]
    InvalidEngineVersion { version: String },

    #[error("invalid database {what} `{value}`")]
    #[diagnostic(
        code(compose::config::database_identifier),
        help("Start with a letter; use letters, digits and `_`; at most 63 characters.")
    )]
    InvalidDatabaseIdentifier { what: &'static str, value: String },

    #[error("{what} port must be a concrete port, got {port}")]
    #[diagnostic(
        code(compose::config::wildcard_port),
        help("Port 0 would match any port; name the exact port instead.")
    )]
    WildcardPort { what: &'static str, port: u16 },

    #[error("desired replica count must be at least 1, got {replicas}")]
    #[diagnostic(code(compose::config::replica_count))]
    ReplicaCount { replicas: u32 },

    #[error("desired replica count {desired} is outside the scaling bounds [{min}, {max}]")]
    #[diagnostic(code(compose::config::replicas_out_of_bounds))]
    ReplicasOutOfBounds { desired: u32, min: u32, max: u32 },

    #[error("unsupported task size: {cpu} CPU units with {memory_mib} MiB")]
    #[diagnostic(
        code(compose::config::task_size),
        help("512 CPU units support 1024-4096 MiB in 1024 MiB steps, for example.")
    )]
    TaskSize { cpu: u32, memory_mib: u32 },

    #[error("log retention must be at least 1 day, got {days}")]
    #[diagnostic(code(compose::config::log_retention))]
    LogRetention { days: u32 },

    #[error("invalid log stream prefix `{prefix}`")]
    #[diagnostic(code(compose::config::log_stream_prefix))]
    LogStreamPrefix { prefix: String },

    #[error("invalid environment variable name `{name}`")]
    #[diagnostic(
        code(compose::config::env_name),
        help("Environment variable names match `[A-Z_][A-Z0-9_]*`.")
    )]
    InvalidEnvName { name: String },

    #[error("environment variable `{name}` is bound to a secret and also set to a literal")]
    #[diagnostic(code(compose::config::env_collision))]
    EnvCollision { name: String },

    #[error("environment variable `{name}` is bound to more than one secret")]
    #[diagnostic(code(compose::config::duplicate_secret_binding))]
    DuplicateSecretBinding { name: String },

    #[error("invalid secret identifier `{id}` for `{name}`")]
    #[diagnostic(
        code(compose::config::secret_id),
        help("Secret identifiers use letters, digits and `/_+=.@:-`, at most 2048 characters.")
    )]
    InvalidSecretId { name: String, id: String },

    #[error("invalid health check path `{path}`")]
    #[diagnostic(
        code(compose::config::probe_path),
        help("The probe path must be absolute, for example `/api/health`.")
    )]
    ProbePath { path: String },

    #[error("{which} threshold must be at least 1, got {value}")]
    #[diagnostic(code(compose::config::probe_threshold))]
    ProbeThreshold { which: &'static str, value: u32 },

    #[error(
        "probe timeout ({timeout_seconds}s) must be at least 1s and shorter than the probe \
         interval ({interval_seconds}s)"
    )]
    #[diagnostic(code(compose::config::probe_timing))]
    ProbeTiming {
        timeout_seconds: u32,
        interval_seconds: u32,
    },

    #[error("minimum replica count must be at least 1, got {min}")]
    #[diagnostic(code(compose::config::scaling_min))]
    ScalingMin { min: u32 },

    #[error("maximum replica count {max} is below the minimum {min}")]
    #[diagnostic(code(compose::config::scaling_bounds))]
    ScalingBounds { min: u32, max: u32 },

    #[error("invalid scaling target {target}: {reason}")]
    #[diagnostic(code(compose::config::scaling_target))]
    ScalingTarget { target: f64, reason: &'static str },

    #[error("invalid custom scaling metric name `{name}`")]
    #[diagnostic(code(compose::config::scaling_metric))]
    ScalingMetric { name: String },
}

/// Internal invariant violation detected while assembling or emitting the
/// graph. Indicates a composer defect rather than a user error.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum IncompleteGraphError {
    #[error("internal error: {0}")]
    #[diagnostic(code(compose::incomplete_graph::graph))]
    Graph(GraphError),

    #[error("output `{key}` is missing")]
    #[diagnostic(code(compose::incomplete_graph::missing_output))]
    MissingOutput { key: &'static str },

    #[error("output `{key}` is not part of the output contract")]
    #[diagnostic(code(compose::incomplete_graph::unexpected_output))]
    UnexpectedOutput { key: String },

    #[error("output `{key}` is empty")]
    #[diagnostic(code(compose::incomplete_graph::empty_output))]
    EmptyOutput { key: String },

    #[error("output `{key}` references resource `{resource}`, which is not in the graph")]
    #[diagnostic(code(compose::incomplete_graph::dangling_output))]
    DanglingOutput { key: String, resource: ResourceId },

    #[error("invariant violated: {message}")]
    #[diagnostic(code(compose::incomplete_graph::invariant))]
    Invariant { message: String },
}

impl IncompleteGraphError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }
}
