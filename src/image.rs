//! The image façade
//!
//! Binds a source handle to a parsed manifest and exposes the pair as one
//! object: the manifest interface, a cached configuration blob, and merged
//! inspect metadata.

use futures_util::stream::StreamExt;
use tokio::sync::RwLock;

use crate::config::ConfigFile;
use crate::digest::validate_digest;
use crate::errors::Result;
use crate::manifest::{ImageInspect, Manifest, ManifestUpdate, DEFAULT_MANIFEST_ACCEPT};
use crate::transport::ImageSource;

/// A single image bound to the source it was read from.
///
/// Lives as long as the borrowed source handle; the configuration blob is
/// fetched at most once.
pub struct Image<'a> {
    source: &'a dyn ImageSource,
    manifest: Manifest,
    cached_config: RwLock<Option<Vec<u8>>>,
}

impl<'a> Image<'a> {
    /// Fetches and parses the manifest from `source`.
    pub async fn from_source(source: &'a dyn ImageSource) -> Result<Image<'a>> {
        let (bytes, media_type) = source.manifest(DEFAULT_MANIFEST_ACCEPT).await?;
        Ok(Self::new(source, Manifest::parse(&bytes, &media_type)?))
    }

    /// Binds an already parsed manifest to its source.
    pub fn new(source: &'a dyn ImageSource, manifest: Manifest) -> Image<'a> {
        Image {
            source,
            manifest,
            cached_config: RwLock::new(None),
        }
    }

    /// The manifest this image was constructed from.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The source handle, for fetching the blobs the manifest references.
    pub fn source(&self) -> &dyn ImageSource {
        self.source
    }

    /// The configuration blob, fetched from the source on first use and
    /// verified against the manifest's config digest. `None` for dialects
    /// without a separate configuration object.
    pub async fn config_blob(&self) -> Result<Option<Vec<u8>>> {
        let info = self.manifest.config_info();
        if info.digest.is_empty() {
            return Ok(None);
        }
        if let Some(cached) = self.cached_config.read().await.as_ref() {
            return Ok(Some(cached.clone()));
        }

        let mut stream = self.source.blob(&info.digest).await?;
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.stream.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        validate_digest(&bytes, &info.digest)?;
        *self.cached_config.write().await = Some(bytes.clone());
        Ok(Some(bytes))
    }

    /// Inspect metadata: manifest-declared fields merged with the resolved
    /// layer digest list, pulling in the configuration blob where the
    /// dialect keeps its metadata there.
    pub async fn inspect(&self) -> Result<ImageInspect> {
        let config = match self.config_blob().await? {
            Some(bytes) => Some(serde_json::from_slice::<ConfigFile>(&bytes)?),
            None => None,
        };
        self.manifest.inspect(config.as_ref())
    }

    /// Produces a manifest rewritten according to `update`; see
    /// [`Manifest::updated`]. The image itself is unchanged.
    pub fn updated(&self, update: &ManifestUpdate) -> Result<Manifest> {
        self.manifest.updated(update)
    }

    /// Whether fulfilling `update` requires per-layer diff-ids; see
    /// [`Manifest::needs_layer_diff_ids`].
    pub fn needs_layer_diff_ids(&self, update: &ManifestUpdate) -> bool {
        self.manifest.needs_layer_diff_ids(update)
    }
}
