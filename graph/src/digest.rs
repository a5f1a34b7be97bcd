use std::{
    fmt,
    io::{self, Write},
    str::FromStr,
};

use base64::Engine as _;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use sha2::Digest as _;

use super::ResourceGraph;

/// Content digest of a resource graph. Two graphs with equal digests are
/// structurally equal, so the provisioning engine has nothing to change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, DeserializeFromStr, SerializeDisplay)]
pub struct GraphDigest([u8; 32]);

#[derive(Debug, thiserror::Error)]
#[error("invalid graph digest `{0}`")]
pub struct InvalidDigest(String);

impl GraphDigest {
    pub const ALG: &'static str = "sha256";

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub(crate) fn of(graph: &ResourceGraph) -> Self {
        struct HashWriter<'a>(&'a mut sha2::Sha256);

        impl Write for HashWriter<'_> {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.update(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut hasher = sha2::Sha256::new();
        for resource in graph {
            // Plain data with string keys; serialization cannot fail.
            let _ = serde_json::to_writer(HashWriter(&mut hasher), resource);
            hasher.update(b"\n");
        }
        Self(hasher.finalize().into())
    }
}

impl AsRef<[u8]> for GraphDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for GraphDigest {
    type Err = InvalidDigest;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let Some((alg, hash_b64)) = input.split_once(':') else {
            return Err(InvalidDigest(input.to_string()));
        };

        if alg != Self::ALG {
            return Err(InvalidDigest(input.to_string()));
        }

        let hash = base64::engine::general_purpose::STANDARD
            .decode(hash_b64)
            .map_err(|_| InvalidDigest(input.to_string()))?;

        let Ok(bytes) = hash.as_slice().try_into() else {
            return Err(InvalidDigest(input.to_string()));
        };

        Ok(Self(bytes))
    }
}

impl fmt::Display for GraphDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::ALG)?;
        f.write_str(":")?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(self);
        f.write_str(&encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Resource, ResourceId, ResourceKind};

    #[test]
    fn digest_round_trips_through_display() {
        let digest = GraphDigest::new([7; 32]);
        let parsed: GraphDigest = digest.to_string().parse().unwrap();
        assert_eq!(parsed, digest);
        assert!("md5:AAAA".parse::<GraphDigest>().is_err());
        assert!("sha256:not-base64!".parse::<GraphDigest>().is_err());
    }

    #[test]
    fn digest_tracks_content() {
        let mut a = ResourceGraph::new();
        a.insert(Resource::new(ResourceId::new("vpc").unwrap(), ResourceKind::Network))
            .unwrap();
        let mut b = ResourceGraph::new();
        b.insert(
            Resource::new(ResourceId::new("vpc").unwrap(), ResourceKind::Network)
                .attr("cidr", "10.0.0.0/16"),
        )
        .unwrap();

        assert_eq!(a.digest(), a.clone().digest());
        assert_ne!(a.digest(), b.digest());
    }
}
