use serde_json::{Map, Value};

use crate::{ConfigError, Result, StackInputs};

pub const CONTEXT_ENV_PREFIX: &str = "CAIRN_CONTEXT_";

/// Prefix for context keys that add an extra secret binding, as in
/// `secret:SENTRY_DSN=app/sentry-dsn`.
const SECRET_KEY_PREFIX: &str = "secret:";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Integer,
    Number,
    Bool,
}

/// A flat context key and the inputs-document path it sets.
#[derive(Clone, Copy, Debug)]
pub struct ContextKey {
    pub name: &'static str,
    pub path: &'static str,
    pub kind: ValueKind,
    pub required: bool,
}

const fn key(name: &'static str, path: &'static str, kind: ValueKind) -> ContextKey {
    ContextKey {
        name,
        path,
        kind,
        required: false,
    }
}

const fn required(name: &'static str, path: &'static str) -> ContextKey {
    ContextKey {
        name,
        path,
        kind: ValueKind::String,
        required: true,
    }
}

pub const CONTEXT_KEYS: &[ContextKey] = &[
    required("imageUri", "image"),
    required("appSecretId", "secrets.appSecret"),
    required("apiKeySecretId", "secrets.apiKey"),
    required("databaseUrlSecretId", "secrets.databaseUrl"),
    key("callbackUrl", "callbackUrl", ValueKind::String),
    key("zones", "network.zones", ValueKind::Integer),
    key("natGateways", "network.natGateways", ValueKind::Integer),
    key("minReplicas", "scaling.minReplicas", ValueKind::Integer),
    key("maxReplicas", "scaling.maxReplicas", ValueKind::Integer),
    key("cpuTarget", "scaling.target", ValueKind::Number),
    key("desiredReplicas", "service.desiredReplicas", ValueKind::Integer),
    key("cpu", "service.cpu", ValueKind::Integer),
    key("memory", "service.memoryMib", ValueKind::Integer),
    key("containerPort", "service.containerPort", ValueKind::Integer),
    key("healthPath", "healthCheck.path", ValueKind::String),
    key("dbEngineVersion", "database.engineVersion", ValueKind::String),
    key("dbStorage", "database.storageGib", ValueKind::Integer),
    key("backupRetentionDays", "database.backupRetentionDays", ValueKind::Integer),
    key(
        "allowWildcardSecretScope",
        "secrets.allowWildcardScope",
        ValueKind::Bool,
    ),
];

/// `imageUri` -> `CAIRN_CONTEXT_IMAGE_URI`.
pub fn env_var_for_key(key: &str) -> String {
    let mut out = String::from(CONTEXT_ENV_PREFIX);
    let mut prev_lower = false;
    for ch in key.chars() {
        if ch.is_ascii_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        out.push(ch.to_ascii_uppercase());
    }
    out
}

fn lookup(name: &str) -> Option<&'static ContextKey> {
    CONTEXT_KEYS.iter().find(|k| k.name == name)
}

/// Layered build inputs: an optional inputs document, overridden by
/// `CAIRN_CONTEXT_*` environment variables, overridden by explicit
/// `key=value` pairs. Later layers win.
#[derive(Clone, Debug, Default)]
pub struct Context {
    document: Map<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a JSON inputs document.
    pub fn from_json_str(input: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(input)
            .map_err(|e| ConfigError::parse(format!("invalid inputs document: {e}")))?;
        let Value::Object(document) = value else {
            return Err(ConfigError::parse(
                "inputs document must be a JSON object".to_string(),
            ));
        };
        Ok(Self { document })
    }

    /// Set one context key. Empty values leave the key unset.
    pub fn set(&mut self, name: &str, raw: &str) -> Result<()> {
        if raw.is_empty() {
            return Ok(());
        }

        if let Some(env_name) = name.strip_prefix(SECRET_KEY_PREFIX) {
            if env_name.is_empty() {
                return Err(ConfigError::parse(format!(
                    "context key {name:?} is missing the environment variable name"
                )));
            }
            let extra = self
                .document
                .entry("secrets".to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            let Value::Object(secrets) = extra else {
                return Err(ConfigError::parse(
                    "cannot add secret binding: `secrets` is not an object".to_string(),
                ));
            };
            let extra = secrets
                .entry("extra".to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            let Value::Object(extra) = extra else {
                return Err(ConfigError::parse(
                    "cannot add secret binding: `secrets.extra` is not an object".to_string(),
                ));
            };
            extra.insert(env_name.to_string(), Value::String(raw.to_string()));
            return Ok(());
        }

        let key = lookup(name).ok_or_else(|| {
            ConfigError::parse(format!(
                "unknown context key {name:?} (known keys: {})",
                CONTEXT_KEYS
                    .iter()
                    .map(|k| k.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;
        let value = parse_value(key, raw)?;
        insert_path(&mut self.document, key.path, value)
    }

    /// Parse and set a `key=value` pair.
    pub fn set_pair(&mut self, pair: &str) -> Result<()> {
        let Some((name, raw)) = pair.split_once('=') else {
            return Err(ConfigError::parse(format!(
                "invalid context pair {pair:?}: expected `key=value`"
            )));
        };
        self.set(name.trim(), raw)
    }

    /// Apply every `CAIRN_CONTEXT_*` variable among `vars`. Variables with the
    /// prefix that do not name a known key are rejected.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (var, raw) in vars {
            if !var.starts_with(CONTEXT_ENV_PREFIX) {
                continue;
            }
            let key = CONTEXT_KEYS
                .iter()
                .find(|k| env_var_for_key(k.name) == var)
                .ok_or_else(|| {
                    ConfigError::parse(format!("{var} does not correspond to a context key"))
                })?;
            self.set(key.name, &raw)?;
        }
        Ok(())
    }

    /// Resolve the layered document into typed inputs. Required inputs never
    /// fall back to a default.
    pub fn into_inputs(self) -> Result<StackInputs> {
        for key in CONTEXT_KEYS.iter().filter(|k| k.required) {
            if !has_path(&self.document, key.path) {
                return Err(ConfigError::missing(key.name));
            }
        }
        serde_json::from_value(Value::Object(self.document))
            .map_err(|e| ConfigError::validation(format!("invalid inputs: {e}")))
    }
}

fn parse_value(key: &ContextKey, raw: &str) -> Result<Value> {
    let raw = raw.trim();
    let invalid = |expected: &str| {
        ConfigError::parse(format!(
            "invalid value {raw:?} for context key `{}`: expected {expected}",
            key.name
        ))
    };
    match key.kind {
        ValueKind::String => Ok(Value::String(raw.to_string())),
        ValueKind::Integer => raw
            .parse::<u64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| invalid("a non-negative integer")),
        ValueKind::Number => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| invalid("a number")),
        ValueKind::Bool => match raw {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(invalid("`true` or `false`")),
        },
    }
}

fn has_path(root: &Map<String, Value>, path: &str) -> bool {
    let mut cur = root;
    let segs = path.split('.').collect::<Vec<_>>();
    for (idx, seg) in segs.iter().enumerate() {
        let Some(value) = cur.get(*seg) else {
            return false;
        };
        if idx == segs.len() - 1 {
            return !matches!(value, Value::Null)
                && value.as_str().is_none_or(|s| !s.is_empty());
        }
        let Value::Object(m) = value else {
            return false;
        };
        cur = m;
    }
    false
}

fn insert_path(root: &mut Map<String, Value>, path: &str, value: Value) -> Result<()> {
    let segs = path.split('.').collect::<Vec<_>>();
    let mut cur = root;
    for (idx, seg) in segs.iter().enumerate() {
        if idx == segs.len() - 1 {
            cur.insert(seg.to_string(), value);
            return Ok(());
        }

        let entry = cur
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        let Value::Object(m) = entry else {
            return Err(ConfigError::parse(format!(
                "cannot set {path:?}: parent segment {seg:?} is not an object"
            )));
        };
        cur = m;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Context {
        let mut ctx = Context::new();
        for pair in [
            "imageUri=registry.example/app:1.0",
            "appSecretId=app/newscurator/NEXTAUTH_SECRET",
            "apiKeySecretId=app/newscurator/OPENAI_API_KEY",
            "databaseUrlSecretId=app/newscurator/DATABASE_URL",
        ] {
            ctx.set_pair(pair).unwrap();
        }
        ctx
    }

    #[test]
    fn env_var_names() {
        assert_eq!(env_var_for_key("imageUri"), "CAIRN_CONTEXT_IMAGE_URI");
        assert_eq!(env_var_for_key("zones"), "CAIRN_CONTEXT_ZONES");
        assert_eq!(
            env_var_for_key("allowWildcardSecretScope"),
            "CAIRN_CONTEXT_ALLOW_WILDCARD_SECRET_SCOPE"
        );
    }

    #[test]
    fn pairs_set_typed_values() {
        let mut ctx = base();
        ctx.set_pair("zones=3").unwrap();
        ctx.set_pair("cpuTarget=65.5").unwrap();
        ctx.set_pair("allowWildcardSecretScope=true").unwrap();
        ctx.set_pair("secret:SENTRY_DSN=app/sentry").unwrap();
        let inputs = ctx.into_inputs().unwrap();
        assert_eq!(inputs.image, "registry.example/app:1.0");
        assert_eq!(inputs.network.zones, 3);
        assert_eq!(inputs.scaling.target, 65.5);
        assert!(inputs.secrets.allow_wildcard_scope);
        assert_eq!(inputs.secrets.extra["SENTRY_DSN"], "app/sentry");
    }

    #[test]
    fn missing_image_is_reported_not_defaulted() {
        let mut ctx = Context::new();
        ctx.set_pair("appSecretId=a").unwrap();
        ctx.set_pair("apiKeySecretId=b").unwrap();
        ctx.set_pair("databaseUrlSecretId=c").unwrap();
        ctx.set_pair("imageUri=").unwrap();
        let err = ctx.into_inputs().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
        assert!(err.to_string().contains("imageUri"));
        assert!(err.to_string().contains("CAIRN_CONTEXT_IMAGE_URI"));
    }

    #[test]
    fn bad_pairs_are_rejected() {
        let mut ctx = Context::new();
        assert!(ctx.set_pair("zones").is_err());
        assert!(ctx.set_pair("zone=2").is_err());
        assert!(ctx.set_pair("zones=-1").is_err());
        assert!(ctx.set_pair("zones=two").is_err());
        assert!(ctx.set_pair("allowWildcardSecretScope=yes").is_err());
        assert!(ctx.set_pair("secret:=x").is_err());
    }

    #[test]
    fn layers_override_in_order() {
        let mut ctx = Context::from_json_str(
            r#"{
                "image": "registry.example/app:0.9",
                "secrets": { "appSecret": "a", "apiKey": "b", "databaseUrl": "c" },
                "network": { "zones": 3, "natGateways": 2 }
            }"#,
        )
        .unwrap();
        ctx.apply_env(vec![
            ("CAIRN_CONTEXT_ZONES".to_string(), "4".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
        ])
        .unwrap();
        ctx.set_pair("imageUri=registry.example/app:1.0").unwrap();

        let inputs = ctx.into_inputs().unwrap();
        assert_eq!(inputs.image, "registry.example/app:1.0");
        assert_eq!(inputs.network.zones, 4);
        assert_eq!(inputs.network.nat_gateways, 2);
    }

    #[test]
    fn unknown_env_var_is_rejected() {
        let mut ctx = base();
        let err = ctx
            .apply_env(vec![("CAIRN_CONTEXT_ZONEZ".to_string(), "2".to_string())])
            .unwrap_err();
        assert!(err.to_string().contains("CAIRN_CONTEXT_ZONEZ"));
    }

    #[test]
    fn non_object_document_is_rejected() {
        assert!(Context::from_json_str("[1, 2]").is_err());
        assert!(Context::from_json_str("{").is_err());
    }
}
