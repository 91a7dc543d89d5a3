//! Helpers for parsing and computing content digests

use sha2::Digest as _;

use crate::errors::{Result, TransportError};

/// Header carrying the canonical digest of a manifest in registry responses.
pub const DOCKER_DIGEST_HEADER: &str = "Docker-Content-Digest";

/// A digest value split into its algorithm and hex components.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Digest<'a> {
    /// The digest algorithm, e.g. `sha256`.
    pub algorithm: &'a str,
    /// The lowercase hex encoding of the digest.
    pub hex: &'a str,
}

impl<'a> Digest<'a> {
    /// Splits a `<algorithm>:<hex>` digest string. This isn't using `FromStr`
    /// because we can't use lifetimes properly when implementing the trait.
    pub fn new(digest: &'a str) -> Result<Self> {
        let (algorithm, hex) = digest
            .split_once(':')
            .ok_or_else(|| TransportError::InvalidDigest(digest.to_string()))?;
        if algorithm.is_empty() || hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TransportError::InvalidDigest(digest.to_string()));
        }
        Ok(Self { algorithm, hex })
    }
}

/// Helper wrapper around various digest algorithms to make it easier to use
/// them with our blob utils. This has to be an enum because the digest
/// algorithms aren't object safe so we can't box dyn them.
pub(crate) enum Digester {
    Sha256(sha2::Sha256),
    Sha384(sha2::Sha384),
    Sha512(sha2::Sha512),
}

impl Digester {
    pub fn new(algorithm: &str) -> Result<Self> {
        match algorithm {
            "sha256" => Ok(Digester::Sha256(sha2::Sha256::new())),
            "sha384" => Ok(Digester::Sha384(sha2::Sha384::new())),
            "sha512" => Ok(Digester::Sha512(sha2::Sha512::new())),
            other => Err(TransportError::InvalidDigest(format!(
                "unsupported digest algorithm: {other}"
            ))),
        }
    }

    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        match self {
            Self::Sha256(d) => d.update(data),
            Self::Sha384(d) => d.update(data),
            Self::Sha512(d) => d.update(data),
        }
    }

    pub fn finalize(&mut self) -> String {
        match self {
            Self::Sha256(d) => format!("sha256:{:x}", d.finalize_reset()),
            Self::Sha384(d) => format!("sha384:{:x}", d.finalize_reset()),
            Self::Sha512(d) => format!("sha512:{:x}", d.finalize_reset()),
        }
    }
}

/// Verifies that `content` hashes to `expected` under the algorithm the
/// digest names.
pub fn validate_digest(content: &[u8], expected: &str) -> Result<()> {
    let parsed = Digest::new(expected)?;
    let mut digester = Digester::new(parsed.algorithm)?;
    digester.update(content);
    let actual = digester.finalize();
    if actual != expected {
        return Err(TransportError::DigestMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_split() {
        let d = Digest::new("sha256:0123abcd").expect("valid digest");
        assert_eq!(d.algorithm, "sha256");
        assert_eq!(d.hex, "0123abcd");

        Digest::new("no-colon").expect_err("missing algorithm should fail");
        Digest::new("sha256:").expect_err("empty hex should fail");
        Digest::new("sha256:nothex!").expect_err("non-hex should fail");
    }

    #[test]
    fn test_validate_digest() {
        let body = b"hello world";
        let good = format!("sha256:{:x}", sha2::Sha256::digest(body));
        validate_digest(body, &good).expect("matching digest");

        let err = validate_digest(body, "sha256:deadbeef").expect_err("mismatch");
        assert!(matches!(err, TransportError::DigestMismatch { .. }));

        validate_digest(body, "md5:d41d8cd98f00b204e9800998ecf8427e")
            .expect_err("unsupported algorithm");
    }
}
