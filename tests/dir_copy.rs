// Tests for the directory backend and the copy engine on top of it: blob
// round trips, atomicity under stream failure, manifest and signature
// persistence, and a full directory-to-directory copy.
use std::io;
use std::path::Path;

use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use tempfile::TempDir;

use oci_transport::blob::SizedStream;
use oci_transport::dir::{DirDestination, DirSource};
use oci_transport::manifest::{
    DOCKER_LAYER_GZIP_MEDIA_TYPE, DOCKER_V2S2_CONFIG_MEDIA_TYPE, DOCKER_V2S2_MEDIA_TYPE,
};
use oci_transport::{
    copy, sha256_digest, Image, ImageDestination, ImageSource, Reference, TransportError,
};

fn dir_reference(path: &Path) -> Reference {
    Reference::parse(&format!("dir:{}", path.display())).unwrap()
}

fn hex_of(digest: &str) -> &str {
    digest.strip_prefix("sha256:").unwrap()
}

#[tokio::test]
async fn test_blob_round_trip() {
    let dir = TempDir::new().unwrap();
    let destination = DirDestination::new(dir_reference(dir.path()), dir.path().to_path_buf());

    let (digest, size) = destination
        .put_blob(SizedStream::from_vec(b"hello".to_vec()), None)
        .await
        .expect("write should succeed");

    assert_eq!(
        digest,
        "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
    assert_eq!(size, 5);

    let blob_path = dir.path().join(hex_of(&digest));
    assert_eq!(std::fs::read(&blob_path).unwrap(), b"hello");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&blob_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    // and back out through the source
    let source = DirSource::new(dir_reference(dir.path()), dir.path().to_path_buf());
    let stream = source.blob(&digest).await.unwrap();
    assert_eq!(stream.content_length, Some(5));
    assert_eq!(stream.collect().await.unwrap(), b"hello");
}

#[tokio::test]
async fn test_manifest_persisted_verbatim() {
    let dir = TempDir::new().unwrap();
    let destination = DirDestination::new(dir_reference(dir.path()), dir.path().to_path_buf());

    let manifest = br#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json","config":{"mediaType":"application/vnd.docker.container.image.v1+json","size":2,"digest":"sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"},"layers":[]}"#;
    destination.put_manifest(manifest).await.unwrap();

    assert_eq!(
        std::fs::read(dir.path().join("manifest.json")).unwrap(),
        manifest
    );
}

#[tokio::test]
async fn test_interrupted_blob_write_leaves_no_trace() {
    let dir = TempDir::new().unwrap();
    let destination = DirDestination::new(dir_reference(dir.path()), dir.path().to_path_buf());

    let chunks: Vec<io::Result<Bytes>> = vec![
        Ok(Bytes::from(vec![7u8; 100])),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "mid-stream")),
    ];
    let broken = SizedStream {
        content_length: None,
        stream: stream::iter(chunks).boxed(),
    };

    destination
        .put_blob(broken, None)
        .await
        .expect_err("a failing stream must fail the write");

    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let name = entry.unwrap().file_name();
        let name = name.to_string_lossy();
        assert!(
            !(name.len() == 64 && name.chars().all(|c| c.is_ascii_hexdigit())),
            "no blob may appear under a content address: {name}"
        );
        assert!(
            !name.starts_with("dir-put-blob"),
            "no temporary file may remain: {name}"
        );
    }
}

#[tokio::test]
async fn test_signature_round_trip() {
    let dir = TempDir::new().unwrap();
    let destination = DirDestination::new(dir_reference(dir.path()), dir.path().to_path_buf());

    let signatures = vec![b"sig-one".to_vec(), b"sig-two".to_vec()];
    destination.put_signatures(&signatures).await.unwrap();

    assert_eq!(
        std::fs::read(dir.path().join("signature-1")).unwrap(),
        b"sig-one"
    );
    assert_eq!(
        std::fs::read(dir.path().join("signature-2")).unwrap(),
        b"sig-two"
    );

    let source = DirSource::new(dir_reference(dir.path()), dir.path().to_path_buf());
    assert_eq!(source.signatures().await.unwrap(), signatures);
}

#[tokio::test]
async fn test_delete_unsupported() {
    let dir = TempDir::new().unwrap();
    let source = DirSource::new(dir_reference(dir.path()), dir.path().to_path_buf());
    assert!(matches!(
        source.delete_image().await,
        Err(TransportError::DeleteUnsupported)
    ));
}

fn populate_source_image(dir: &Path, with_signature: bool) -> Vec<u8> {
    let config = br#"{"architecture":"amd64","os":"linux","config":{"Labels":{"maintainer":"nobody@example.com"}},"rootfs":{"type":"layers","diff_ids":[]}}"#.to_vec();
    let layer = b"layer-data".to_vec();
    let config_digest = sha256_digest(&config);
    let layer_digest = sha256_digest(&layer);

    let manifest = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": DOCKER_V2S2_MEDIA_TYPE,
        "config": {
            "mediaType": DOCKER_V2S2_CONFIG_MEDIA_TYPE,
            "size": config.len(),
            "digest": config_digest
        },
        "layers": [{
            "mediaType": DOCKER_LAYER_GZIP_MEDIA_TYPE,
            "size": layer.len(),
            "digest": layer_digest
        }]
    }))
    .unwrap();

    std::fs::write(dir.join("manifest.json"), &manifest).unwrap();
    std::fs::write(dir.join(hex_of(&config_digest)), &config).unwrap();
    std::fs::write(dir.join(hex_of(&layer_digest)), &layer).unwrap();
    if with_signature {
        std::fs::write(dir.join("signature-1"), b"opaque signature").unwrap();
    }
    manifest
}

#[tokio::test]
async fn test_copy_directory_to_directory() {
    let src_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    let manifest = populate_source_image(src_dir.path(), true);

    let source = DirSource::new(dir_reference(src_dir.path()), src_dir.path().to_path_buf());
    let destination = DirDestination::new(
        dir_reference(dest_dir.path()),
        dest_dir.path().to_path_buf(),
    );

    copy(&source, &destination).await.expect("copy should succeed");

    // the manifest travels byte-for-byte when no rewrite was needed
    assert_eq!(
        std::fs::read(dest_dir.path().join("manifest.json")).unwrap(),
        manifest
    );
    // both blobs landed under their content addresses
    for entry in std::fs::read_dir(src_dir.path()).unwrap() {
        let name = entry.unwrap().file_name();
        let name = name.to_string_lossy();
        if name.len() == 64 {
            assert!(
                dest_dir.path().join(name.as_ref()).exists(),
                "missing blob {name}"
            );
        }
    }
    // signatures survive an identity copy
    assert_eq!(
        std::fs::read(dest_dir.path().join("signature-1")).unwrap(),
        b"opaque signature"
    );
}

#[tokio::test]
async fn test_image_inspect_merges_config() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    populate_source_image(dir.path(), false);
    let source = DirSource::new(dir_reference(dir.path()), dir.path().to_path_buf());

    let image = Image::from_source(&source).await?;
    let inspect = image.inspect().await?;
    assert_eq!(inspect.architecture, "amd64");
    assert_eq!(inspect.os, "linux");
    assert_eq!(
        inspect.labels.get("maintainer").map(String::as_str),
        Some("nobody@example.com")
    );
    assert_eq!(inspect.layers, vec![sha256_digest(b"layer-data")]);

    // the config blob is fetched once and cached
    let first = image.config_blob().await?.expect("a config exists");
    let second = image.config_blob().await?.expect("a config exists");
    assert_eq!(first, second);
    assert_eq!(sha256_digest(&first), image.manifest().config_info().digest);
    Ok(())
}
