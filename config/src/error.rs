use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{0}")]
    Missing(String),
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Validation(String),
}

impl ConfigError {
    /// A required input was not supplied by any source.
    pub fn missing(key: &str) -> Self {
        Self::Missing(format!(
            "missing required input `{key}`; pass it with `-c {key}=<value>`, the \
             {} environment variable, or the inputs file",
            crate::env_var_for_key(key)
        ))
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
