//! Blob streams and the content-addressed, atomic write path shared by the
//! filesystem backends

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use sha2::{Digest as _, Sha256};
use tokio::io::AsyncWriteExt;

use crate::errors::Result;

/// A stream of blob bytes with an optional length, if the backend was able
/// to report one.
pub struct SizedStream {
    /// The length of the stream, when known up front.
    pub content_length: Option<u64>,
    /// The stream of bytes. The consumer is responsible for driving it to
    /// completion or dropping it.
    pub stream: BoxStream<'static, io::Result<Bytes>>,
}

impl SizedStream {
    /// Wraps an in-memory buffer as a single-chunk stream.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let content_length = Some(data.len() as u64);
        let chunk: io::Result<Bytes> = Ok(Bytes::from(data));
        SizedStream {
            content_length,
            stream: stream::iter(std::iter::once(chunk)).boxed(),
        }
    }

    /// Reads the whole stream into memory.
    pub async fn collect(mut self) -> io::Result<Vec<u8>> {
        let mut data = match self.content_length {
            Some(len) => Vec::with_capacity(len as usize),
            None => Vec::new(),
        };
        while let Some(chunk) = self.stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }
}

/// Writes `stream` into `dir` under its computed sha256 content address.
///
/// The bytes are copied into a uniquely named temporary file (created with
/// `prefix` inside `dir`, so the final rename stays on one filesystem) while
/// being hashed, then fsynced, chmodded 0644 and atomically renamed to the
/// path `final_path` derives from the hex digest. If the stream errors at
/// any point the temporary file is removed and nothing becomes observable
/// under the final name.
///
/// Returns the computed `sha256:<hex>` digest and the byte count. Any digest
/// the caller expected is for it to check; the computed one is
/// authoritative.
pub(crate) async fn write_blob<F>(
    dir: &Path,
    prefix: &str,
    mut stream: SizedStream,
    final_path: F,
) -> Result<(String, u64)>
where
    F: FnOnce(&str) -> PathBuf,
{
    let tmp = tempfile::Builder::new().prefix(prefix).tempfile_in(dir)?;
    let mut file = tokio::fs::File::from_std(tmp.reopen()?);

    let mut hasher = Sha256::new();
    let mut size: u64 = 0;
    while let Some(chunk) = stream.stream.next().await {
        // An Err here drops `tmp`, which unlinks the partial file.
        let chunk = chunk?;
        hasher.update(&chunk);
        size += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    set_blob_permissions(tmp.as_file())?;

    let hex = format!("{:x}", hasher.finalize());
    let path = final_path(&hex);
    ensure_parent_directory_exists(&path)?;
    tmp.persist(&path).map_err(|e| e.error)?;
    Ok((format!("sha256:{hex}"), size))
}

/// Atomically replaces `path` with `data` via a temporary file in `dir`.
pub(crate) async fn write_file_atomic(
    dir: &Path,
    path: &Path,
    prefix: &str,
    data: &[u8],
) -> Result<()> {
    ensure_parent_directory_exists(path)?;
    let tmp = tempfile::Builder::new().prefix(prefix).tempfile_in(dir)?;
    let mut file = tokio::fs::File::from_std(tmp.reopen()?);
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await?;
    set_blob_permissions(tmp.as_file())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Ensures the parent of the supplied path exists, creating missing
/// directories with mode 0755.
fn ensure_parent_directory_exists(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            let mut builder = std::fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(0o755);
            }
            builder.create(parent)?;
        }
    }
    Ok(())
}

fn set_blob_permissions(file: &std::fs::File) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }
    #[cfg(not(unix))]
    let _ = file;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_blob_content_addressing() {
        let dir = tempfile::TempDir::new().unwrap();
        let stream = SizedStream::from_vec(b"hello".to_vec());
        let (digest, size) = write_blob(dir.path(), "test-put-blob", stream, |hex| {
            dir.path().join(hex)
        })
        .await
        .expect("write should succeed");

        assert_eq!(
            digest,
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(size, 5);
        let on_disk = std::fs::read(dir.path().join(
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
        ))
        .unwrap();
        assert_eq!(on_disk, b"hello");
    }

    #[tokio::test]
    async fn test_write_blob_stream_error_leaves_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(&[0u8; 100])),
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "boom")),
        ];
        let stream = SizedStream {
            content_length: None,
            stream: stream::iter(chunks).boxed(),
        };

        write_blob(dir.path(), "test-put-blob", stream, |hex| {
            dir.path().join(hex)
        })
        .await
        .expect_err("stream error must fail the write");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "no temp or blob files may remain");
    }
}
