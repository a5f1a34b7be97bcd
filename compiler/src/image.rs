use std::{fmt, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};

const MAX_TAG_LEN: usize = 128;
const MIN_DIGEST_HEX: usize = 32;

/// A registry-qualified container image reference:
/// `registry/path[:tag][@algorithm:hex]`.
///
/// Only the format is checked. Whether the image exists is the registry's
/// concern at realization time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct ImageRef {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ImageRefError(String);

impl ImageRefError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn reason(&self) -> &str {
        &self.0
    }
}

impl ImageRef {
    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// `registry/repository`, the scope image pull permissions are granted on.
    pub fn location(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

impl FromStr for ImageRef {
    type Err = ImageRefError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.is_empty() {
            return Err(ImageRefError::new("reference is empty"));
        }
        if input.chars().any(char::is_whitespace) {
            return Err(ImageRefError::new("reference contains whitespace"));
        }

        let (name, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                validate_digest(digest)?;
                (name, Some(digest.to_string()))
            }
            None => (input, None),
        };

        let Some((registry, rest)) = name.split_once('/') else {
            return Err(ImageRefError::new(
                "reference is not registry-qualified (expected `registry/path`)",
            ));
        };
        validate_registry(registry)?;

        let (repository, tag) = match rest.rsplit_once(':') {
            Some((repository, tag)) => {
                validate_tag(tag)?;
                (repository, Some(tag.to_string()))
            }
            None => (rest, None),
        };
        validate_repository(repository)?;

        if tag.is_none() && digest.is_none() {
            return Err(ImageRefError::new(
                "reference has neither a tag nor a digest and would float on `latest`",
            ));
        }

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag,
            digest,
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

fn validate_registry(registry: &str) -> Result<(), ImageRefError> {
    let (host, port) = match registry.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (registry, None),
    };
    if let Some(port) = port
        && (port.is_empty() || port.parse::<u16>().is_err())
    {
        return Err(ImageRefError::new(format!(
            "registry `{registry}` has an invalid port"
        )));
    }

    let qualified = host == "localhost" || host.contains('.') || port.is_some();
    if !qualified {
        return Err(ImageRefError::new(format!(
            "`{registry}` is not a registry host (expected a domain, `host:port` or \
             `localhost`)"
        )));
    }

    let labels_ok = host.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    });
    if !labels_ok {
        return Err(ImageRefError::new(format!(
            "registry host `{host}` is malformed"
        )));
    }
    Ok(())
}

fn validate_repository(repository: &str) -> Result<(), ImageRefError> {
    if repository.is_empty() {
        return Err(ImageRefError::new("repository path is empty"));
    }
    for component in repository.split('/') {
        if !is_path_component(component) {
            return Err(ImageRefError::new(format!(
                "repository path component `{component}` is malformed"
            )));
        }
    }
    Ok(())
}

/// `[a-z0-9]+` separated by single `.`, `_`, `__` or runs of `-`.
fn is_path_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    if !is_lower_alnum(*first) || !is_lower_alnum(*last) {
        return false;
    }

    let mut separator = String::new();
    for &b in bytes {
        if is_lower_alnum(b) {
            if !matches!(separator.as_str(), "" | "." | "_" | "__") && !is_dashes(&separator) {
                return false;
            }
            separator.clear();
        } else if matches!(b, b'.' | b'_' | b'-') {
            separator.push(char::from(b));
        } else {
            return false;
        }
    }
    true
}

fn is_dashes(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b == b'-')
}

fn is_lower_alnum(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit()
}

fn validate_tag(tag: &str) -> Result<(), ImageRefError> {
    let valid = tag
        .bytes()
        .next()
        .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        && tag.len() <= MAX_TAG_LEN
        && tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(ImageRefError::new(format!("tag `{tag}` is malformed")))
    }
}

fn validate_digest(digest: &str) -> Result<(), ImageRefError> {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return Err(ImageRefError::new(format!(
            "digest `{digest}` is not of the form `algorithm:hex`"
        )));
    };
    let algorithm_ok = !algorithm.is_empty()
        && algorithm
            .split(['+', '.', '_', '-'])
            .all(|part| !part.is_empty() && part.bytes().all(is_lower_alnum));
    let hex_ok = hex.len() >= MIN_DIGEST_HEX
        && hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if algorithm_ok && hex_ok {
        Ok(())
    } else {
        Err(ImageRefError::new(format!("digest `{digest}` is malformed")))
    }
}
