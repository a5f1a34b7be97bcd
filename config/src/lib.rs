//! Build-time inputs for the topology composer.
//!
//! Inputs are plain data: this crate parses and layers them, while range and
//! format checks belong to the composer so that every rejection surfaces as a
//! configuration error of the build itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

mod context;
mod error;

pub use context::{
    CONTEXT_ENV_PREFIX, CONTEXT_KEYS, Context, ContextKey, ValueKind, env_var_for_key,
};
pub use error::{ConfigError, Result};

/// Environment variable names the application reads its bound secrets from.
pub const APP_SECRET_ENV: &str = "NEXTAUTH_SECRET";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const CALLBACK_URL_ENV: &str = "NEXTAUTH_URL";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bon::Builder)]
#[builder(on(String, into))]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[non_exhaustive]
pub struct StackInputs {
    /// Registry-qualified container image reference.
    pub image: String,
    /// External callback URL exposed to the application when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub secrets: SecretInputs,
    #[serde(default)]
    #[builder(default)]
    pub network: NetworkOptions,
    #[serde(default)]
    #[builder(default)]
    pub database: DatabaseOptions,
    #[serde(default)]
    #[builder(default)]
    pub service: ServiceOptions,
    #[serde(default)]
    #[builder(default)]
    pub health_check: HealthCheckOptions,
    #[serde(default)]
    #[builder(default)]
    pub scaling: ScalingOptions,
}

/// External secret identifiers, resolved by the secret store at realization
/// time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[builder(on(String, into))]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[non_exhaustive]
pub struct SecretInputs {
    pub app_secret: String,
    pub api_key: String,
    pub database_url: String,
    /// Additional `ENV_NAME -> secret id` bindings.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[builder(default)]
    pub extra: BTreeMap<String, String>,
    /// Grant secret reads on every secret instead of the declared ones.
    /// Legacy behaviour, discouraged.
    #[serde(default)]
    #[builder(default)]
    pub allow_wildcard_scope: bool,
}

impl SecretInputs {
    /// Every `ENV_NAME -> secret id` binding, named ones first.
    pub fn bindings(&self) -> Vec<(String, String)> {
        let mut out = vec![
            (APP_SECRET_ENV.to_string(), self.app_secret.clone()),
            (API_KEY_ENV.to_string(), self.api_key.clone()),
            (DATABASE_URL_ENV.to_string(), self.database_url.clone()),
        ];
        out.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
#[non_exhaustive]
pub struct NetworkOptions {
    #[builder(default = 2)]
    pub zones: u32,
    #[builder(default = 1)]
    pub nat_gateways: u32,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[builder(on(String, into))]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
#[non_exhaustive]
pub struct DatabaseOptions {
    #[builder(default = "16".to_string())]
    pub engine_version: String,
    #[builder(default = "db.t3.micro".to_string())]
    pub instance_class: String,
    #[builder(default = 20)]
    pub storage_gib: u32,
    #[builder(default = 7)]
    pub backup_retention_days: u32,
    #[builder(default = "appdb".to_string())]
    pub database_name: String,
    #[builder(default = "postgres".to_string())]
    pub username: String,
    #[builder(default = 5432)]
    pub port: u16,
    #[builder(default)]
    pub multi_az: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[builder(on(String, into))]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
#[non_exhaustive]
pub struct ServiceOptions {
    #[builder(default = 512)]
    pub cpu: u32,
    #[builder(default = 1024)]
    pub memory_mib: u32,
    #[builder(default = 3000)]
    pub container_port: u16,
    /// Initial replica count; the scaling minimum when absent.
    pub desired_replicas: Option<u32>,
    /// Literal environment entries.
    #[builder(default = default_environment())]
    pub environment: BTreeMap<String, String>,
    #[builder(default = 30)]
    pub log_retention_days: u32,
    #[builder(default = "app".to_string())]
    pub log_stream_prefix: String,
    #[builder(default = 60)]
    pub health_check_grace_seconds: u32,
}

fn default_environment() -> BTreeMap<String, String> {
    BTreeMap::from([("NODE_ENV".to_string(), "production".to_string())])
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[builder(on(String, into))]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
#[non_exhaustive]
pub struct HealthCheckOptions {
    #[builder(default = "/api/health".to_string())]
    pub path: String,
    #[builder(default = 2)]
    pub healthy_threshold: u32,
    #[builder(default = 3)]
    pub unhealthy_threshold: u32,
    #[builder(default = 30)]
    pub interval_seconds: u32,
    #[builder(default = 5)]
    pub timeout_seconds: u32,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ScalingMetric {
    /// Average CPU utilization across replicas, in percent.
    #[default]
    CpuUtilization,
    /// Requests per replica, as counted by the load balancer.
    RequestCount,
    Custom { name: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
#[non_exhaustive]
pub struct ScalingOptions {
    #[builder(default = 2)]
    pub min_replicas: u32,
    #[builder(default = 6)]
    pub max_replicas: u32,
    #[builder(default)]
    pub metric: ScalingMetric,
    #[builder(default = 50.0)]
    pub target: f64,
    #[builder(default = 60)]
    pub scale_in_cooldown_seconds: u32,
    #[builder(default = 60)]
    pub scale_out_cooldown_seconds: u32,
}

impl Default for ScalingOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}
