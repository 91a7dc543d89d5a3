//! The OCI image-layout backend
//!
//! Stores an image in the directory structure of the OCI image spec:
//! an `oci-layout` version file, content-addressed blobs under
//! `blobs/<algorithm>/<hex>`, and one JSON descriptor per tag under
//! `refs/<tag>`. The descriptor is written last so a half-finished push
//! never exposes a tag.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::blob::{write_blob, write_file_atomic, SizedStream};
use crate::digest::Digest;
use crate::errors::{Result, TransportError};
use crate::manifest::{
    Manifest, ManifestUpdate, DOCKER_V2S2_MEDIA_TYPE, OCI_V1_MEDIA_TYPE,
};
use crate::reference::Reference;
use crate::transport::{ImageDestination, ImageSource};

const OCI_LAYOUT_FILE: &str = "oci-layout";
const OCI_LAYOUT_CONTENT: &[u8] = br#"{"imageLayoutVersion": "1.0.0"}"#;

const SUPPORTED_MANIFEST_TYPES: &[&str] = &[OCI_V1_MEDIA_TYPE, DOCKER_V2S2_MEDIA_TYPE];

/// The `refs/<tag>` descriptor pointing at a manifest blob.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
struct TagDescriptor {
    digest: String,
    media_type: String,
    size: i64,
}

fn blob_path(dir: &PathBuf, digest: &str) -> Result<PathBuf> {
    let parsed = Digest::new(digest)?;
    Ok(dir.join("blobs").join(parsed.algorithm).join(parsed.hex))
}

fn descriptor_path(dir: &PathBuf, tag: &str) -> PathBuf {
    dir.join("refs").join(tag)
}

/// An [`ImageSource`] reading from an OCI image layout.
pub struct OciLayoutSource {
    reference: Reference,
    dir: PathBuf,
    tag: String,
}

impl OciLayoutSource {
    /// Opens a source over the given layout directory and tag.
    pub fn new(reference: Reference, dir: PathBuf, tag: String) -> Self {
        Self {
            reference,
            dir,
            tag,
        }
    }
}

#[async_trait]
impl ImageSource for OciLayoutSource {
    fn reference(&self) -> &Reference {
        &self.reference
    }

    async fn manifest(&self, _accept: &[&str]) -> Result<(Vec<u8>, String)> {
        let descriptor_bytes = match tokio::fs::read(descriptor_path(&self.dir, &self.tag)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TransportError::ManifestUnknown {
                    reference: self.reference.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let descriptor: TagDescriptor = serde_json::from_slice(&descriptor_bytes)?;
        let bytes = tokio::fs::read(blob_path(&self.dir, &descriptor.digest)?).await?;
        Ok((bytes, descriptor.media_type))
    }

    async fn blob(&self, digest: &str) -> Result<SizedStream> {
        let file = tokio::fs::File::open(blob_path(&self.dir, digest)?).await?;
        let content_length = Some(file.metadata().await?.len());
        Ok(SizedStream {
            content_length,
            stream: ReaderStream::new(file).boxed(),
        })
    }

    async fn signatures(&self) -> Result<Vec<Vec<u8>>> {
        // The layout has no signature storage.
        Ok(Vec::new())
    }

    async fn delete_image(&self) -> Result<()> {
        Err(TransportError::DeleteUnsupported)
    }
}

/// An [`ImageDestination`] writing into an OCI image layout.
pub struct OciLayoutDestination {
    reference: Reference,
    dir: PathBuf,
    tag: String,
}

impl OciLayoutDestination {
    /// Opens a destination over the given layout directory and tag.
    pub fn new(reference: Reference, dir: PathBuf, tag: String) -> Self {
        Self {
            reference,
            dir,
            tag,
        }
    }
}

#[async_trait]
impl ImageDestination for OciLayoutDestination {
    fn reference(&self) -> &Reference {
        &self.reference
    }

    fn supported_manifest_types(&self) -> &[&str] {
        SUPPORTED_MANIFEST_TYPES
    }

    async fn put_manifest(&self, manifest: &[u8]) -> Result<()> {
        let media_type = Manifest::guess_mime_type(manifest)?;
        let (bytes, media_type) = match media_type.as_str() {
            OCI_V1_MEDIA_TYPE => (manifest.to_vec(), OCI_V1_MEDIA_TYPE.to_string()),
            // Schema 2 is close enough to rewrite on the way in. Schema 1 is
            // not, and the layout spec promises no compatibility with it.
            DOCKER_V2S2_MEDIA_TYPE => {
                warn!("rewriting schema 2 manifest to the OCI dialect; signatures over the original bytes no longer apply");
                let parsed = Manifest::parse(manifest, &media_type)?;
                let updated = parsed.updated(&ManifestUpdate {
                    media_type: Some(OCI_V1_MEDIA_TYPE.to_string()),
                    ..ManifestUpdate::default()
                })?;
                (updated.serialize()?, OCI_V1_MEDIA_TYPE.to_string())
            }
            other => return Err(TransportError::UnsupportedManifestFormat(other.to_string())),
        };

        let digest = crate::sha256_digest(&bytes);
        tokio::fs::create_dir_all(&self.dir).await?;
        write_file_atomic(
            &self.dir,
            &blob_path(&self.dir, &digest)?,
            "oci-put-blob",
            &bytes,
        )
        .await?;
        write_file_atomic(
            &self.dir,
            &self.dir.join(OCI_LAYOUT_FILE),
            "oci-put-layout",
            OCI_LAYOUT_CONTENT,
        )
        .await?;

        let descriptor = TagDescriptor {
            digest: digest.clone(),
            media_type,
            size: bytes.len() as i64,
        };
        debug!(%digest, tag = %self.tag, "committing tag descriptor");
        write_file_atomic(
            &self.dir,
            &descriptor_path(&self.dir, &self.tag),
            "oci-put-descriptor",
            &serde_json::to_vec(&descriptor)?,
        )
        .await
    }

    async fn put_blob(
        &self,
        stream: SizedStream,
        _expected_digest: Option<&str>,
    ) -> Result<(String, u64)> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let dir = self.dir.clone();
        let (digest, size) = write_blob(&self.dir, "oci-put-blob", stream, move |hex| {
            dir.join("blobs").join("sha256").join(hex)
        })
        .await?;
        debug!(%digest, size, "wrote blob");
        Ok((digest, size))
    }

    async fn put_signatures(&self, signatures: &[Vec<u8>]) -> Result<()> {
        if !signatures.is_empty() {
            return Err(TransportError::SignaturesUnsupported);
        }
        Ok(())
    }
}
