//! The copy engine
//!
//! Drives a source → destination transfer: negotiates a manifest dialect
//! the destination accepts, streams the config and layer blobs through the
//! destination's verifying write path, carries signatures where they
//! survive, and commits the manifest last so that a failure mid-copy never
//! leaves a dangling reference.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::errors::{Result, TransportError};
use crate::image::Image;
use crate::manifest::{Manifest, ManifestUpdate, DEFAULT_MANIFEST_ACCEPT};
use crate::reference::Reference;
use crate::transport::{ImageDestination, ImageSource, TransportConfig};

/// Options for [`copy_image`].
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Configuration used to open the source.
    pub source: TransportConfig,
    /// Configuration used to open the destination.
    pub destination: TransportConfig,
}

/// Opens both references and copies the image between them.
pub async fn copy_image(
    source: &Reference,
    destination: &Reference,
    options: &CopyOptions,
) -> Result<()> {
    let source = source.new_source(&options.source)?;
    let destination = destination.new_destination(&options.destination)?;
    copy(source.as_ref(), destination.as_ref()).await
}

/// Copies one image from an open source to an open destination.
pub async fn copy(source: &dyn ImageSource, destination: &dyn ImageDestination) -> Result<()> {
    let (manifest_bytes, media_type) = source.manifest(DEFAULT_MANIFEST_ACCEPT).await?;
    let image = Image::new(source, Manifest::parse(&manifest_bytes, &media_type)?);
    debug!(
        source = %source.reference(),
        destination = %destination.reference(),
        media_type = image.manifest().media_type(),
        "copying image"
    );

    let updated = negotiate_manifest(&image, destination.supported_manifest_types())?;
    // An untouched manifest is pushed byte-for-byte, keeping any signature
    // over those bytes valid.
    let manifest_for_push = match &updated {
        Some(updated) => updated.serialize()?,
        None => manifest_bytes,
    };
    let manifest_for_blobs = updated.as_ref().unwrap_or_else(|| image.manifest());

    let mut copied: HashSet<String> = HashSet::new();

    let config_info = manifest_for_blobs.config_info();
    if !config_info.digest.is_empty() {
        debug!(digest = %config_info.digest, "copying config");
        copy_blob(source, destination, &config_info.digest).await?;
        copied.insert(config_info.digest.clone());
    }

    for layer in manifest_for_blobs.layer_infos() {
        // Duplicate entries stay in the manifest but only travel once.
        if !copied.insert(layer.digest.clone()) {
            continue;
        }
        debug!(digest = %layer.digest, "copying layer");
        copy_blob(source, destination, &layer.digest).await?;
    }

    let mut signatures = source.signatures().await?;
    if updated.is_some() && !signatures.is_empty() {
        // The signatures covered the original serialization; after a rewrite
        // they would verify against bytes the destination never sees.
        warn!(
            count = signatures.len(),
            "dropping signatures invalidated by the manifest rewrite"
        );
        signatures.clear();
    }
    if !signatures.is_empty() {
        destination.put_signatures(&signatures).await?;
    }

    destination.put_manifest(&manifest_for_push).await
}

/// Picks the destination's first manifest dialect the source manifest can
/// become. An empty supported list, or one containing the current dialect,
/// means no rewrite at all.
fn negotiate_manifest(image: &Image<'_>, supported: &[&str]) -> Result<Option<Manifest>> {
    let current = image.manifest().media_type();
    if supported.is_empty() || supported.contains(&current) {
        return Ok(None);
    }

    let mut last_err: Option<TransportError> = None;
    for target in supported {
        let update = ManifestUpdate {
            media_type: Some(target.to_string()),
            ..ManifestUpdate::default()
        };
        if image.needs_layer_diff_ids(&update) {
            // Computing diff-ids means downloading and decompressing every
            // layer; that is the caller's call to make, not ours.
            last_err = Some(TransportError::InsufficientInformation(format!(
                "converting {current} to {target} requires layer diff-ids"
            )));
            continue;
        }
        match image.updated(&update) {
            Ok(updated) => return Ok(Some(updated)),
            Err(e @ TransportError::UnsupportedConversion { .. })
            | Err(e @ TransportError::UnsupportedManifestMime(_)) => {
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        TransportError::UnsupportedManifestFormat(current.to_string())
    }))
}

async fn copy_blob(
    source: &dyn ImageSource,
    destination: &dyn ImageDestination,
    digest: &str,
) -> Result<()> {
    let stream = source.blob(digest).await?;
    let (computed, _) = destination.put_blob(stream, Some(digest)).await?;
    // Legacy schema 1 digests may use other algorithms; the write path only
    // computes sha256, so only same-algorithm results are comparable.
    if digest.starts_with("sha256:") && computed != digest {
        return Err(TransportError::DigestMismatch {
            expected: digest.to_string(),
            actual: computed,
        });
    }
    Ok(())
}
