//! Parsed image references
//!
//! A reference names an image at a backend: `docker://` for a remote
//! registry, `dir:` for a raw directory, `oci:` for an OCI image layout. It
//! carries the user's intent, performs no I/O of its own, and knows how to
//! open a source or destination handle against its backend.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use regex::Regex;

use crate::dir::{DirDestination, DirSource};
use crate::errors::{Result, TransportError};
use crate::oci_layout::{OciLayoutDestination, OciLayoutSource};
use crate::regexp::{must_compile, REPOSITORY_REGEXP, TAG_REGEXP};
use crate::registry::{RegistryDestination, RegistrySource};
use crate::transport::{ImageDestination, ImageSource, TransportConfig};

const DEFAULT_TAG: &str = "latest";

lazy_static! {
    static ref REPOSITORY_RE: Regex = must_compile(REPOSITORY_REGEXP);
    static ref TAG_RE: Regex = must_compile(TAG_REGEXP);
}

/// A parsed, immutable image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// An image in a remote v2 registry: `docker://<host>[:<port>]/<repo>[:<tag>]`.
    Registry {
        /// Registry host, with optional port.
        registry: String,
        /// Repository path inside the registry.
        repository: String,
        /// Tag, `latest` when the reference named none.
        tag: String,
    },
    /// An image stored as loose files in a directory: `dir:<path>`.
    Directory {
        /// The directory holding `manifest.json` and the blobs.
        path: PathBuf,
    },
    /// An image in an OCI image layout: `oci:<dir>[:<tag>]`.
    OciLayout {
        /// The layout directory.
        dir: PathBuf,
        /// Tag inside the layout, `latest` when the reference named none.
        tag: String,
    },
}

impl Reference {
    /// Parses a `<kind>:<rest>` reference string.
    pub fn parse(reference: &str) -> Result<Reference> {
        if let Some(rest) = reference.strip_prefix("docker://") {
            return parse_registry(reference, rest);
        }
        if let Some(path) = reference.strip_prefix("dir:") {
            if path.is_empty() {
                return Err(invalid(reference, "empty directory path"));
            }
            return Ok(Reference::Directory {
                path: PathBuf::from(path),
            });
        }
        if let Some(rest) = reference.strip_prefix("oci:") {
            let (dir, tag) = match rest.rsplit_once(':') {
                // a colon inside the path (e.g. a Windows drive or a
                // relative segment) does not start a tag
                Some((dir, tag)) if TAG_RE.is_match(tag) => (dir, tag),
                _ => (rest, DEFAULT_TAG),
            };
            if dir.is_empty() {
                return Err(invalid(reference, "empty layout directory"));
            }
            return Ok(Reference::OciLayout {
                dir: PathBuf::from(dir),
                tag: tag.to_string(),
            });
        }
        Err(invalid(reference, "unknown transport prefix"))
    }

    /// Opens a source handle against this reference's backend.
    pub fn new_source(&self, config: &TransportConfig) -> Result<Box<dyn ImageSource>> {
        match self {
            Reference::Registry { .. } => {
                Ok(Box::new(RegistrySource::new(self.clone(), config)?))
            }
            Reference::Directory { path } => {
                Ok(Box::new(DirSource::new(self.clone(), path.clone())))
            }
            Reference::OciLayout { dir, tag } => Ok(Box::new(OciLayoutSource::new(
                self.clone(),
                dir.clone(),
                tag.clone(),
            ))),
        }
    }

    /// Opens a destination handle against this reference's backend.
    pub fn new_destination(&self, config: &TransportConfig) -> Result<Box<dyn ImageDestination>> {
        match self {
            Reference::Registry { .. } => {
                Ok(Box::new(RegistryDestination::new(self.clone(), config)?))
            }
            Reference::Directory { path } => {
                Ok(Box::new(DirDestination::new(self.clone(), path.clone())))
            }
            Reference::OciLayout { dir, tag } => Ok(Box::new(OciLayoutDestination::new(
                self.clone(),
                dir.clone(),
                tag.clone(),
            ))),
        }
    }
}

fn parse_registry(whole: &str, rest: &str) -> Result<Reference> {
    let (registry, remainder) = rest
        .split_once('/')
        .ok_or_else(|| invalid(whole, "a registry reference needs a repository"))?;
    if registry.is_empty() {
        return Err(invalid(whole, "empty registry host"));
    }
    let (repository, tag) = match remainder.rsplit_once(':') {
        Some((repository, tag)) if !tag.contains('/') => (repository, tag),
        _ => (remainder, DEFAULT_TAG),
    };
    if !REPOSITORY_RE.is_match(repository) {
        return Err(invalid(whole, "malformed repository"));
    }
    if !TAG_RE.is_match(tag) {
        return Err(invalid(whole, "malformed tag"));
    }
    Ok(Reference::Registry {
        registry: registry.to_string(),
        repository: repository.to_string(),
        tag: tag.to_string(),
    })
}

fn invalid(reference: &str, why: &str) -> TransportError {
    TransportError::InvalidReference(format!("{reference}: {why}"))
}

impl fmt::Display for Reference {
    /// Renders the canonical form of the reference, tag included.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Registry {
                registry,
                repository,
                tag,
            } => write!(f, "docker://{}/{}:{}", registry, repository, tag),
            Reference::Directory { path } => write!(f, "dir:{}", path.display()),
            Reference::OciLayout { dir, tag } => write!(f, "oci:{}:{}", dir.display(), tag),
        }
    }
}

impl FromStr for Reference {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Reference::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registry_references() {
        let cases: &[(&str, &str, &str, &str)] = &[
            (
                "docker://reg.example/library/busybox:1.36",
                "reg.example",
                "library/busybox",
                "1.36",
            ),
            (
                "docker://reg.example/library/busybox",
                "reg.example",
                "library/busybox",
                "latest",
            ),
            (
                "docker://localhost:5000/busybox",
                "localhost:5000",
                "busybox",
                "latest",
            ),
            (
                "docker://reg.example:443/a/b/c:v2",
                "reg.example:443",
                "a/b/c",
                "v2",
            ),
        ];
        for (input, registry, repository, tag) in cases {
            match Reference::parse(input).unwrap() {
                Reference::Registry {
                    registry: r,
                    repository: n,
                    tag: t,
                } => {
                    assert_eq!(r, *registry, "registry for {input}");
                    assert_eq!(n, *repository, "repository for {input}");
                    assert_eq!(t, *tag, "tag for {input}");
                }
                other => panic!("expected registry reference for {input}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_directory_and_layout_references() {
        assert_eq!(
            Reference::parse("dir:/tmp/img").unwrap(),
            Reference::Directory {
                path: PathBuf::from("/tmp/img")
            }
        );
        assert_eq!(
            Reference::parse("oci:/tmp/layout").unwrap(),
            Reference::OciLayout {
                dir: PathBuf::from("/tmp/layout"),
                tag: "latest".to_string()
            }
        );
        assert_eq!(
            Reference::parse("oci:/tmp/layout:v1").unwrap(),
            Reference::OciLayout {
                dir: PathBuf::from("/tmp/layout"),
                tag: "v1".to_string()
            }
        );
    }

    #[test]
    fn test_parse_invalid_references() {
        let invalid: &[&str] = &[
            "",
            "nocolon",
            "ftp:/somewhere",
            "docker://",
            "docker://hostonly",
            "docker://reg.example/UPPER/case",
            "docker://reg.example/repo:bad tag",
            "dir:",
            "oci:",
        ];
        for input in invalid {
            assert!(
                matches!(
                    Reference::parse(input),
                    Err(TransportError::InvalidReference(_))
                ),
                "should fail: {input}"
            );
        }
    }

    #[test]
    fn test_display_round_trip() {
        for input in [
            "docker://reg.example/library/busybox:latest",
            "dir:/tmp/img",
            "oci:/tmp/layout:v1",
        ] {
            let parsed = Reference::parse(input).unwrap();
            assert_eq!(parsed.to_string(), *input);
            assert_eq!(Reference::parse(&parsed.to_string()).unwrap(), parsed);
        }
        // the default tag becomes explicit in the canonical form
        assert_eq!(
            Reference::parse("docker://reg.example/busybox")
                .unwrap()
                .to_string(),
            "docker://reg.example/busybox:latest"
        );
    }
}
