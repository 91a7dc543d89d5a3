//! The raw directory backend
//!
//! Stores an image as loose files: `manifest.json`, one bare-hex file per
//! blob, and `signature-<i>` files starting at 1.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use futures_util::stream::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::blob::{write_blob, write_file_atomic, SizedStream};
use crate::digest::Digest;
use crate::errors::{Result, TransportError};
use crate::manifest::Manifest;
use crate::reference::Reference;
use crate::transport::{ImageDestination, ImageSource};

const MANIFEST_FILE: &str = "manifest.json";

fn signature_file(index: usize) -> String {
    format!("signature-{index}")
}

/// An [`ImageSource`] reading loose files from a directory.
pub struct DirSource {
    reference: Reference,
    path: PathBuf,
}

impl DirSource {
    /// Opens a source over the given directory.
    pub fn new(reference: Reference, path: PathBuf) -> Self {
        Self { reference, path }
    }
}

#[async_trait]
impl ImageSource for DirSource {
    fn reference(&self) -> &Reference {
        &self.reference
    }

    async fn manifest(&self, _accept: &[&str]) -> Result<(Vec<u8>, String)> {
        // The directory records no media type, so it is recognized from the
        // bytes; the caller's accept list cannot be honored here.
        let path = self.path.join(MANIFEST_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TransportError::ManifestUnknown {
                    reference: self.reference.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let media_type = Manifest::guess_mime_type(&bytes)?;
        Ok((bytes, media_type))
    }

    async fn blob(&self, digest: &str) -> Result<SizedStream> {
        let parsed = Digest::new(digest)?;
        let path = self.path.join(parsed.hex);
        let file = tokio::fs::File::open(&path).await?;
        let content_length = Some(file.metadata().await?.len());
        Ok(SizedStream {
            content_length,
            stream: ReaderStream::new(file).boxed(),
        })
    }

    async fn signatures(&self) -> Result<Vec<Vec<u8>>> {
        let mut signatures = Vec::new();
        for index in 1.. {
            match tokio::fs::read(self.path.join(signature_file(index))).await {
                Ok(bytes) => signatures.push(bytes),
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(signatures)
    }

    async fn delete_image(&self) -> Result<()> {
        Err(TransportError::DeleteUnsupported)
    }
}

/// An [`ImageDestination`] writing loose files into a directory.
pub struct DirDestination {
    reference: Reference,
    path: PathBuf,
}

impl DirDestination {
    /// Opens a destination over the given directory, creating it if needed.
    pub fn new(reference: Reference, path: PathBuf) -> Self {
        Self { reference, path }
    }
}

#[async_trait]
impl ImageDestination for DirDestination {
    fn reference(&self) -> &Reference {
        &self.reference
    }

    fn supported_manifest_types(&self) -> &[&str] {
        // Any dialect; the bytes are persisted verbatim.
        &[]
    }

    async fn put_manifest(&self, manifest: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.path).await?;
        write_file_atomic(
            &self.path,
            &self.path.join(MANIFEST_FILE),
            "dir-put-manifest",
            manifest,
        )
        .await
    }

    async fn put_blob(
        &self,
        stream: SizedStream,
        _expected_digest: Option<&str>,
    ) -> Result<(String, u64)> {
        tokio::fs::create_dir_all(&self.path).await?;
        let dir = self.path.clone();
        let (digest, size) =
            write_blob(&self.path, "dir-put-blob", stream, move |hex| dir.join(hex)).await?;
        debug!(%digest, size, "wrote blob");
        Ok((digest, size))
    }

    async fn put_signatures(&self, signatures: &[Vec<u8>]) -> Result<()> {
        tokio::fs::create_dir_all(&self.path).await?;
        for (i, signature) in signatures.iter().enumerate() {
            write_file_atomic(
                &self.path,
                &self.path.join(signature_file(i + 1)),
                "dir-put-signature",
                signature,
            )
            .await?;
        }
        Ok(())
    }
}
