//! The manifest model
//!
//! One polymorphic [`Manifest`] covers every dialect this crate can move
//! between backends: the two legacy registry schemas (signed and unsigned
//! schema 1), registry schema 2, the OCI image manifest, and the two
//! multi-arch list formats. Each variant knows how to serialize itself,
//! enumerate the blobs it references, report inspect metadata and produce an
//! updated manifest of a requested dialect.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::config::{ConfigFile, V1Image};
use crate::errors::{Result, TransportError};

/// Media type of an unsigned registry schema 1 manifest.
pub const DOCKER_V2S1_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v1+json";
/// Media type of a JWS-signed registry schema 1 manifest.
pub const DOCKER_V2S1_SIGNED_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
/// Media type of a registry schema 2 manifest.
pub const DOCKER_V2S2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Media type of a registry schema 2 manifest list.
pub const DOCKER_V2_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// Media type of an OCI image manifest.
pub const OCI_V1_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
/// Media type of an OCI image index.
pub const OCI_V1_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.list.v1+json";

/// Media type of a schema 2 configuration blob.
pub const DOCKER_V2S2_CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";
/// Media type of a gzipped schema 2 layer.
pub const DOCKER_LAYER_GZIP_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
/// Media type of an uncompressed schema 2 layer.
pub const DOCKER_LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar";
/// Media type of an OCI configuration blob.
pub const OCI_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
/// Media type of a gzipped OCI layer.
pub const OCI_LAYER_GZIP_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
/// Media type of an uncompressed OCI layer.
pub const OCI_LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar";

/// The manifest media types a source is asked for when the caller has no
/// preference of its own.
pub const DEFAULT_MANIFEST_ACCEPT: &[&str] = &[
    DOCKER_V2S2_MEDIA_TYPE,
    DOCKER_V2S1_SIGNED_MEDIA_TYPE,
    DOCKER_V2S1_MEDIA_TYPE,
    OCI_V1_MEDIA_TYPE,
    DOCKER_V2_LIST_MEDIA_TYPE,
    OCI_V1_INDEX_MEDIA_TYPE,
];

/// What a manifest knows about one referenced blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// The blob's content address, `<algorithm>:<hex>`.
    pub digest: String,
    /// The blob's size in bytes, or -1 when the dialect does not record it.
    pub size: i64,
    /// The blob's media type, or empty when unknown.
    pub media_type: String,
}

/// A request to produce a rewritten manifest.
#[derive(Debug, Clone, Default)]
pub struct ManifestUpdate {
    /// The dialect the result should have. `None` keeps the current one.
    pub media_type: Option<String>,
    /// Replacement layer descriptors, root first, e.g. after recompressing
    /// layers on the way through.
    pub layer_infos: Option<Vec<BlobInfo>>,
    /// The uncompressed digest of every layer, root first. Only consulted by
    /// the schema 2 → schema 1 downgrade, which rebuilds the legacy layer id
    /// chain from them; expensive for callers to obtain, see
    /// [`Manifest::needs_layer_diff_ids`].
    pub layer_diff_ids: Option<Vec<String>>,
}

/// A blob descriptor as used by schema 2 and OCI manifests.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// The media type of the referenced content.
    pub media_type: String,
    /// The size of the referenced content in bytes.
    pub size: i64,
    /// The content address of the referenced content.
    pub digest: String,
    /// Additional download locations for the content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    /// Arbitrary descriptor metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

/// The body shared by registry schema 2 and OCI image manifests.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Always 2.
    pub schema_version: i32,
    /// The manifest's own media type. Optional on the wire for OCI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// The configuration blob descriptor.
    pub config: Descriptor,
    /// The layer descriptors, application order (root first).
    pub layers: Vec<Descriptor>,
    /// Arbitrary manifest metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

/// One `fsLayers` entry of a schema 1 manifest.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FsLayer {
    /// The compressed digest of the layer.
    pub blob_sum: String,
}

/// One `history` entry of a schema 1 manifest; the payload is a JSON string.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schema1History {
    /// The raw `v1Compatibility` JSON for this layer.
    pub v1_compatibility: String,
}

/// The body of a registry schema 1 manifest.
///
/// `fsLayers` and `history` are stored leaf first, the inverse of the order
/// every accessor on [`Manifest`] reports.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schema1Body {
    /// Always 1.
    pub schema_version: i32,
    /// Repository name the manifest was pulled from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tag the manifest was pulled from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Architecture recorded in the manifest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    /// Layer digests, leaf first.
    pub fs_layers: Vec<FsLayer>,
    /// Per-layer v1 compatibility payloads, leaf first.
    #[serde(default)]
    pub history: Vec<Schema1History>,
    /// JWS signatures, carried opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signatures: Option<serde_json::Value>,
}

/// A parsed schema 1 manifest together with its original bytes.
///
/// The original bytes are kept because a signed manifest must round-trip
/// byte-for-byte: the JWS covers the exact serialization it was attached to.
#[derive(Clone, Debug, PartialEq)]
pub struct Schema1Manifest {
    raw: Vec<u8>,
    /// The parsed manifest body.
    pub body: Schema1Body,
}

impl Schema1Manifest {
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let body: Schema1Body = serde_json::from_slice(bytes)?;
        Ok(Schema1Manifest {
            raw: bytes.to_vec(),
            body,
        })
    }

    fn from_body(body: Schema1Body) -> Result<Self> {
        let raw = serde_json::to_vec(&body)?;
        Ok(Schema1Manifest { raw, body })
    }

    fn signed(&self) -> bool {
        self.body.signatures.is_some()
    }
}

/// A platform entry of a manifest list or image index.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformDescriptor {
    /// The media type of the referenced per-architecture manifest.
    pub media_type: String,
    /// Its size in bytes.
    pub size: i64,
    /// Its content address.
    pub digest: String,
    /// The platform the referenced manifest is built for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

/// The platform a per-architecture manifest targets.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    /// CPU architecture, e.g. `amd64`.
    pub architecture: String,
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// Architecture variant, e.g. `v7`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// The body shared by schema 2 manifest lists and OCI indices.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    /// Always 2.
    pub schema_version: i32,
    /// The list's own media type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// The per-architecture manifests.
    pub manifests: Vec<PlatformDescriptor>,
}

/// The minimal shape used to recognize a manifest without a declared type.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Versioned {
    #[serde(default)]
    schema_version: i32,
    media_type: Option<String>,
    signatures: Option<serde_json::Value>,
}

/// A manifest of any supported dialect.
#[derive(Clone, Debug, PartialEq)]
pub enum Manifest {
    /// Registry schema 1, signed or unsigned.
    Schema1(Schema1Manifest),
    /// Registry schema 2.
    Schema2(ImageManifest),
    /// OCI image manifest.
    Oci1(ImageManifest),
    /// Registry schema 2 manifest list.
    Schema2List(ManifestList),
    /// OCI image index.
    OciIndex(ManifestList),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Schema1,
    Schema2,
    Oci1,
    Schema2List,
    OciIndex,
}

fn kind_of(media_type: &str) -> Option<Kind> {
    match media_type {
        // "application/json" is a valid schema 1 value; nothing else in the
        // wild reports it.
        DOCKER_V2S1_MEDIA_TYPE | DOCKER_V2S1_SIGNED_MEDIA_TYPE | "application/json" => {
            Some(Kind::Schema1)
        }
        DOCKER_V2S2_MEDIA_TYPE => Some(Kind::Schema2),
        OCI_V1_MEDIA_TYPE => Some(Kind::Oci1),
        DOCKER_V2_LIST_MEDIA_TYPE => Some(Kind::Schema2List),
        OCI_V1_INDEX_MEDIA_TYPE => Some(Kind::OciIndex),
        _ => None,
    }
}

fn layer_type_to_oci(media_type: &str) -> String {
    match media_type {
        DOCKER_LAYER_GZIP_MEDIA_TYPE => OCI_LAYER_GZIP_MEDIA_TYPE.to_string(),
        DOCKER_LAYER_MEDIA_TYPE => OCI_LAYER_MEDIA_TYPE.to_string(),
        other => other.to_string(),
    }
}

fn layer_type_to_docker(media_type: &str) -> String {
    match media_type {
        OCI_LAYER_GZIP_MEDIA_TYPE => DOCKER_LAYER_GZIP_MEDIA_TYPE.to_string(),
        OCI_LAYER_MEDIA_TYPE => DOCKER_LAYER_MEDIA_TYPE.to_string(),
        other => other.to_string(),
    }
}

fn config_type_to_oci(media_type: &str) -> String {
    match media_type {
        DOCKER_V2S2_CONFIG_MEDIA_TYPE => OCI_CONFIG_MEDIA_TYPE.to_string(),
        other => other.to_string(),
    }
}

fn config_type_to_docker(media_type: &str) -> String {
    match media_type {
        OCI_CONFIG_MEDIA_TYPE => DOCKER_V2S2_CONFIG_MEDIA_TYPE.to_string(),
        other => other.to_string(),
    }
}

impl Manifest {
    /// Parses manifest bytes according to their declared media type.
    ///
    /// An empty media type fails with
    /// [`TransportError::UnknownManifestMime`]; a type this crate does not
    /// implement fails with [`TransportError::UnsupportedManifestMime`].
    pub fn parse(bytes: &[u8], media_type: &str) -> Result<Manifest> {
        match media_type {
            "" => Err(TransportError::UnknownManifestMime),
            DOCKER_V2S1_MEDIA_TYPE | DOCKER_V2S1_SIGNED_MEDIA_TYPE | "application/json" => {
                Ok(Manifest::Schema1(Schema1Manifest::from_bytes(bytes)?))
            }
            DOCKER_V2S2_MEDIA_TYPE => {
                let mut body: ImageManifest = serde_json::from_slice(bytes)?;
                body.media_type = Some(DOCKER_V2S2_MEDIA_TYPE.to_string());
                Ok(Manifest::Schema2(body))
            }
            OCI_V1_MEDIA_TYPE => {
                let mut body: ImageManifest = serde_json::from_slice(bytes)?;
                body.media_type = Some(OCI_V1_MEDIA_TYPE.to_string());
                Ok(Manifest::Oci1(body))
            }
            DOCKER_V2_LIST_MEDIA_TYPE => {
                let mut body: ManifestList = serde_json::from_slice(bytes)?;
                body.media_type = Some(DOCKER_V2_LIST_MEDIA_TYPE.to_string());
                Ok(Manifest::Schema2List(body))
            }
            OCI_V1_INDEX_MEDIA_TYPE => {
                let mut body: ManifestList = serde_json::from_slice(bytes)?;
                body.media_type = Some(OCI_V1_INDEX_MEDIA_TYPE.to_string());
                Ok(Manifest::OciIndex(body))
            }
            other => Err(TransportError::UnsupportedManifestMime(other.to_string())),
        }
    }

    /// Recognizes the media type of manifest bytes that arrived without one,
    /// e.g. from a backend that stores bare `manifest.json` files.
    pub fn guess_mime_type(bytes: &[u8]) -> Result<String> {
        let versioned: Versioned = serde_json::from_slice(bytes)?;
        if let Some(media_type) = versioned.media_type {
            if !media_type.is_empty() {
                return Ok(media_type);
            }
        }
        match versioned.schema_version {
            1 => {
                if versioned.signatures.is_some() {
                    Ok(DOCKER_V2S1_SIGNED_MEDIA_TYPE.to_string())
                } else {
                    Ok(DOCKER_V2S1_MEDIA_TYPE.to_string())
                }
            }
            2 => Ok(DOCKER_V2S2_MEDIA_TYPE.to_string()),
            _ => Err(TransportError::UnknownManifestMime),
        }
    }

    /// Serializes the manifest.
    ///
    /// A schema 1 manifest returns its original bytes so that any attached
    /// JWS stays valid; every other variant reserializes its body.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        match self {
            Manifest::Schema1(m) => Ok(m.raw.clone()),
            Manifest::Schema2(m) | Manifest::Oci1(m) => Ok(serde_json::to_vec(m)?),
            Manifest::Schema2List(l) | Manifest::OciIndex(l) => Ok(serde_json::to_vec(l)?),
        }
    }

    /// The canonical media type of this manifest.
    pub fn media_type(&self) -> &'static str {
        match self {
            Manifest::Schema1(m) => {
                if m.signed() {
                    DOCKER_V2S1_SIGNED_MEDIA_TYPE
                } else {
                    DOCKER_V2S1_MEDIA_TYPE
                }
            }
            Manifest::Schema2(_) => DOCKER_V2S2_MEDIA_TYPE,
            Manifest::Oci1(_) => OCI_V1_MEDIA_TYPE,
            Manifest::Schema2List(_) => DOCKER_V2_LIST_MEDIA_TYPE,
            Manifest::OciIndex(_) => OCI_V1_INDEX_MEDIA_TYPE,
        }
    }

    /// The configuration blob descriptor, with an empty digest for dialects
    /// that have no separate configuration object.
    pub fn config_info(&self) -> BlobInfo {
        match self {
            Manifest::Schema2(m) | Manifest::Oci1(m) => BlobInfo {
                digest: m.config.digest.clone(),
                size: m.config.size,
                media_type: m.config.media_type.clone(),
            },
            Manifest::Schema1(_) | Manifest::Schema2List(_) | Manifest::OciIndex(_) => BlobInfo {
                digest: String::new(),
                size: -1,
                media_type: String::new(),
            },
        }
    }

    /// The referenced layers in application order, root first.
    ///
    /// Schema 1 stores layers leaf first and is reversed here. The list may
    /// contain duplicates; they are semantically relevant and preserved.
    pub fn layer_infos(&self) -> Vec<BlobInfo> {
        match self {
            Manifest::Schema1(m) => m
                .body
                .fs_layers
                .iter()
                .rev()
                .map(|layer| BlobInfo {
                    digest: layer.blob_sum.clone(),
                    size: -1,
                    media_type: String::new(),
                })
                .collect(),
            Manifest::Schema2(m) | Manifest::Oci1(m) => m
                .layers
                .iter()
                .map(|layer| BlobInfo {
                    digest: layer.digest.clone(),
                    size: layer.size,
                    media_type: layer.media_type.clone(),
                })
                .collect(),
            Manifest::Schema2List(_) | Manifest::OciIndex(_) => Vec::new(),
        }
    }

    /// Whether fulfilling `update` additionally requires the diff-id of
    /// every layer. Obtaining those forces a full layer download, so callers
    /// check this before committing to a conversion. Only the schema 2 →
    /// schema 1 downgrade needs them.
    pub fn needs_layer_diff_ids(&self, update: &ManifestUpdate) -> bool {
        let target = match update.media_type.as_deref() {
            Some(t) => t,
            None => return false,
        };
        match self {
            Manifest::Schema2(_) => {
                target == DOCKER_V2S1_MEDIA_TYPE || target == DOCKER_V2S1_SIGNED_MEDIA_TYPE
            }
            _ => false,
        }
    }

    /// Produces a manifest rewritten according to `update`, leaving `self`
    /// untouched.
    ///
    /// Same-dialect targets apply `layer_infos` and return. Schema 2 and OCI
    /// rewrite into each other by translating config and layer media types.
    /// Schema 2 → schema 1 requires `layer_diff_ids` and fails with
    /// [`TransportError::InsufficientInformation`] without them; the upgrade
    /// in the other direction is not offered (a schema 1 manifest carries
    /// nothing a schema 2 configuration could be trusted from), so it and
    /// every other combination fail with
    /// [`TransportError::UnsupportedConversion`].
    pub fn updated(&self, update: &ManifestUpdate) -> Result<Manifest> {
        let from = self.media_type();
        let target = update
            .media_type
            .clone()
            .unwrap_or_else(|| from.to_string());
        let target_kind = kind_of(&target)
            .ok_or_else(|| TransportError::UnsupportedManifestMime(target.clone()))?;

        match (self, target_kind) {
            (Manifest::Schema1(_), Kind::Schema1) => Ok(self.clone()),
            (Manifest::Schema2(m), Kind::Schema2) => Ok(Manifest::Schema2(applied_layer_infos(
                m,
                update,
                |mt| mt.to_string(),
            ))),
            (Manifest::Schema2(m), Kind::Oci1) => {
                let mut body = applied_layer_infos(m, update, layer_type_to_oci);
                body.media_type = Some(OCI_V1_MEDIA_TYPE.to_string());
                body.config.media_type = config_type_to_oci(&body.config.media_type);
                Ok(Manifest::Oci1(body))
            }
            (Manifest::Schema2(m), Kind::Schema1) => schema2_to_schema1(m, update),
            (Manifest::Oci1(m), Kind::Oci1) => Ok(Manifest::Oci1(applied_layer_infos(
                m,
                update,
                |mt| mt.to_string(),
            ))),
            (Manifest::Oci1(m), Kind::Schema2) => {
                let mut body = applied_layer_infos(m, update, layer_type_to_docker);
                body.media_type = Some(DOCKER_V2S2_MEDIA_TYPE.to_string());
                body.config.media_type = config_type_to_docker(&body.config.media_type);
                Ok(Manifest::Schema2(body))
            }
            (Manifest::Schema2List(_), Kind::Schema2List) => Ok(self.clone()),
            (Manifest::OciIndex(_), Kind::OciIndex) => Ok(self.clone()),
            _ => Err(TransportError::UnsupportedConversion {
                from: from.to_string(),
                to: target,
            }),
        }
    }

    /// Inspect metadata merged with the resolved layer digest list.
    ///
    /// Schema 1 derives everything from its embedded history; schema 2 and
    /// OCI need the parsed configuration blob. Lists have no single-image
    /// metadata to report.
    pub fn inspect(&self, config: Option<&ConfigFile>) -> Result<ImageInspect> {
        let mut info = match self {
            Manifest::Schema1(m) => {
                let leaf: V1Image = match m.body.history.first() {
                    Some(entry) => serde_json::from_str(&entry.v1_compatibility)?,
                    None => V1Image::default(),
                };
                ImageInspect {
                    tag: m.body.tag.clone().unwrap_or_default(),
                    created: leaf.created,
                    docker_version: leaf.docker_version.unwrap_or_default(),
                    labels: leaf
                        .config
                        .and_then(|c| c.labels)
                        .unwrap_or_default(),
                    architecture: leaf.architecture.unwrap_or_default(),
                    os: leaf.os.unwrap_or_default(),
                    layers: Vec::new(),
                }
            }
            Manifest::Schema2(_) | Manifest::Oci1(_) => {
                let config = config.ok_or_else(|| {
                    TransportError::InsufficientInformation(
                        "the configuration blob is required to inspect this manifest".to_string(),
                    )
                })?;
                ImageInspect {
                    tag: String::new(),
                    created: config.created,
                    docker_version: config.docker_version.clone().unwrap_or_default(),
                    labels: config
                        .config
                        .as_ref()
                        .and_then(|c| c.labels.clone())
                        .unwrap_or_default(),
                    architecture: config.architecture.clone(),
                    os: config.os.clone(),
                    layers: Vec::new(),
                }
            }
            Manifest::Schema2List(_) | Manifest::OciIndex(_) => {
                return Err(TransportError::UnsupportedManifestFormat(
                    self.media_type().to_string(),
                ))
            }
        };
        info.layers = self
            .layer_infos()
            .into_iter()
            .map(|layer| layer.digest)
            .collect();
        Ok(info)
    }
}

/// Inspect metadata for a single-architecture image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageInspect {
    /// Tag recorded in the manifest, where the dialect has one.
    pub tag: String,
    /// Creation timestamp.
    pub created: Option<DateTime<Utc>>,
    /// Builder version.
    pub docker_version: String,
    /// Image labels.
    pub labels: HashMap<String, String>,
    /// CPU architecture.
    pub architecture: String,
    /// Operating system.
    pub os: String,
    /// Layer digests in application order.
    pub layers: Vec<String>,
}

/// Clones `body` with `update.layer_infos` substituted (when given) and
/// every layer media type passed through `map_type`.
fn applied_layer_infos<F>(body: &ImageManifest, update: &ManifestUpdate, map_type: F) -> ImageManifest
where
    F: Fn(&str) -> String,
{
    let mut body = body.clone();
    if let Some(infos) = &update.layer_infos {
        body.layers = infos
            .iter()
            .map(|info| Descriptor {
                media_type: info.media_type.clone(),
                size: info.size,
                digest: info.digest.clone(),
                urls: None,
                annotations: None,
            })
            .collect();
    }
    for layer in &mut body.layers {
        layer.media_type = map_type(&layer.media_type);
    }
    body
}

fn required_diff_ids<'a>(
    update: &'a ManifestUpdate,
    layer_count: usize,
) -> Result<&'a [String]> {
    let diff_ids = update.layer_diff_ids.as_deref().ok_or_else(|| {
        TransportError::InsufficientInformation(
            "layer diff-ids are required for this conversion".to_string(),
        )
    })?;
    if diff_ids.len() != layer_count {
        return Err(TransportError::InsufficientInformation(format!(
            "{} diff-ids provided for {} layers",
            diff_ids.len(),
            layer_count
        )));
    }
    Ok(diff_ids)
}

/// Builds an unsigned schema 1 manifest out of a schema 2 manifest. The
/// fake layer id chain is derived from the diff-ids so that parent/child
/// links stay stable for identical inputs.
fn schema2_to_schema1(m: &ImageManifest, update: &ManifestUpdate) -> Result<Manifest> {
    let diff_ids = required_diff_ids(update, m.layers.len())?;

    let fs_layers: Vec<FsLayer> = m
        .layers
        .iter()
        .rev()
        .map(|layer| FsLayer {
            blob_sum: layer.digest.clone(),
        })
        .collect();

    let mut parent: Option<String> = None;
    let mut entries_root_first = Vec::with_capacity(diff_ids.len());
    for diff_id in diff_ids {
        let seed = format!("{} {}", diff_id, parent.as_deref().unwrap_or(""));
        let id = format!("{:x}", sha2::Sha256::digest(seed.as_bytes()));
        entries_root_first.push(V1Image {
            id: Some(id.clone()),
            parent: parent.take(),
            ..V1Image::default()
        });
        parent = Some(id);
    }
    let history = entries_root_first
        .iter()
        .rev()
        .map(|entry| {
            Ok(Schema1History {
                v1_compatibility: serde_json::to_string(entry)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let body = Schema1Body {
        schema_version: 1,
        name: None,
        tag: None,
        architecture: None,
        fs_layers,
        history,
        signatures: None,
    };
    Ok(Manifest::Schema1(Schema1Manifest::from_body(body)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema2_fixture() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_V2S2_MEDIA_TYPE,
            "config": {
                "mediaType": DOCKER_V2S2_CONFIG_MEDIA_TYPE,
                "size": 7023,
                "digest": "sha256:b5b2b2c507a0944348e0303114d8d93aaaa081732b86451d9bce1f432a537bc7"
            },
            "layers": [{
                "mediaType": DOCKER_LAYER_GZIP_MEDIA_TYPE,
                "size": 32654,
                "digest": "sha256:e692418e4cbaf90ca69d05a66403747baa33ee08806650b51fab815ad7fc331f"
            }]
        }))
        .unwrap()
    }

    fn schema1_fixture() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 1,
            "name": "library/busybox",
            "tag": "latest",
            "architecture": "amd64",
            "fsLayers": [
                {"blobSum": "sha256:cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc"},
                {"blobSum": "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"},
                {"blobSum": "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"},
                {"blobSum": "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"}
            ],
            "history": [
                {"v1Compatibility": "{\"id\":\"leaf\",\"created\":\"2016-03-04T18:40:00Z\",\"docker_version\":\"1.9.1\",\"architecture\":\"amd64\",\"os\":\"linux\"}"},
                {"v1Compatibility": "{\"id\":\"mid2\"}"},
                {"v1Compatibility": "{\"id\":\"mid1\"}"},
                {"v1Compatibility": "{\"id\":\"root\"}"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_dispatch() {
        assert!(matches!(
            Manifest::parse(&schema2_fixture(), DOCKER_V2S2_MEDIA_TYPE),
            Ok(Manifest::Schema2(_))
        ));
        assert!(matches!(
            Manifest::parse(&schema1_fixture(), DOCKER_V2S1_MEDIA_TYPE),
            Ok(Manifest::Schema1(_))
        ));
        assert!(matches!(
            Manifest::parse(&schema1_fixture(), "application/json"),
            Ok(Manifest::Schema1(_))
        ));
        assert!(matches!(
            Manifest::parse(&schema2_fixture(), ""),
            Err(TransportError::UnknownManifestMime)
        ));
        assert!(matches!(
            Manifest::parse(&schema2_fixture(), "application/x-unheard-of"),
            Err(TransportError::UnsupportedManifestMime(_))
        ));
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(
            Manifest::guess_mime_type(&schema2_fixture()).unwrap(),
            DOCKER_V2S2_MEDIA_TYPE
        );
        assert_eq!(
            Manifest::guess_mime_type(&schema1_fixture()).unwrap(),
            DOCKER_V2S1_MEDIA_TYPE
        );
        let signed = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 1,
            "fsLayers": [],
            "history": [],
            "signatures": [{"protected": "e30K"}]
        }))
        .unwrap();
        assert_eq!(
            Manifest::guess_mime_type(&signed).unwrap(),
            DOCKER_V2S1_SIGNED_MEDIA_TYPE
        );
        let unversioned = serde_json::to_vec(&serde_json::json!({"schemaVersion": 9})).unwrap();
        assert!(matches!(
            Manifest::guess_mime_type(&unversioned),
            Err(TransportError::UnknownManifestMime)
        ));
    }

    fn oci_fixture() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "config": {
                "mediaType": OCI_CONFIG_MEDIA_TYPE,
                "size": 100,
                "digest": "sha256:b5b2b2c507a0944348e0303114d8d93aaaa081732b86451d9bce1f432a537bc7"
            },
            "layers": [{
                "mediaType": OCI_LAYER_GZIP_MEDIA_TYPE,
                "size": 200,
                "digest": "sha256:e692418e4cbaf90ca69d05a66403747baa33ee08806650b51fab815ad7fc331f"
            }]
        }))
        .unwrap()
    }

    fn list_fixture() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_V2_LIST_MEDIA_TYPE,
            "manifests": [{
                "mediaType": DOCKER_V2S2_MEDIA_TYPE,
                "size": 7143,
                "digest": "sha256:e692418e4cbaf90ca69d05a66403747baa33ee08806650b51fab815ad7fc331f",
                "platform": {"architecture": "amd64", "os": "linux"}
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_serialize_round_trip() {
        for (bytes, media_type) in [
            (schema2_fixture(), DOCKER_V2S2_MEDIA_TYPE),
            (schema1_fixture(), DOCKER_V2S1_MEDIA_TYPE),
            (oci_fixture(), OCI_V1_MEDIA_TYPE),
            (list_fixture(), DOCKER_V2_LIST_MEDIA_TYPE),
            (list_fixture(), OCI_V1_INDEX_MEDIA_TYPE),
        ] {
            let manifest = Manifest::parse(&bytes, media_type).unwrap();
            let reparsed =
                Manifest::parse(&manifest.serialize().unwrap(), manifest.media_type()).unwrap();
            assert_eq!(reparsed.media_type(), manifest.media_type());
            assert_eq!(reparsed.config_info(), manifest.config_info());
            assert_eq!(reparsed.layer_infos(), manifest.layer_infos());
        }
    }

    #[test]
    fn test_schema1_layer_order_and_duplicates() {
        let manifest = Manifest::parse(&schema1_fixture(), DOCKER_V2S1_MEDIA_TYPE).unwrap();
        let layers = manifest.layer_infos();
        let digests: Vec<&str> = layers.iter().map(|l| l.digest.as_str()).collect();
        // storage order is leaf first; the accessor reports root first and
        // keeps the duplicate in place
        assert_eq!(
            digests,
            vec![
                "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                "sha256:cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc",
            ]
        );
        assert!(layers.iter().all(|l| l.size == -1));
        let config = manifest.config_info();
        assert!(config.digest.is_empty());
    }

    #[test]
    fn test_schema2_to_oci_rewrite() {
        let manifest = Manifest::parse(&schema2_fixture(), DOCKER_V2S2_MEDIA_TYPE).unwrap();
        let oci = manifest
            .updated(&ManifestUpdate {
                media_type: Some(OCI_V1_MEDIA_TYPE.to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(oci.media_type(), OCI_V1_MEDIA_TYPE);
        assert_eq!(oci.config_info().media_type, OCI_CONFIG_MEDIA_TYPE);
        assert_eq!(
            oci.layer_infos()[0].media_type,
            OCI_LAYER_GZIP_MEDIA_TYPE
        );
        // digests and sizes are untouched by a media type rewrite
        assert_eq!(
            oci.config_info().digest,
            "sha256:b5b2b2c507a0944348e0303114d8d93aaaa081732b86451d9bce1f432a537bc7"
        );
    }

    #[test]
    fn test_oci_to_schema2_rewrite() {
        let manifest = Manifest::parse(&oci_fixture(), OCI_V1_MEDIA_TYPE).unwrap();
        let updated = manifest
            .updated(&ManifestUpdate {
                media_type: Some(DOCKER_V2S2_MEDIA_TYPE.to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.media_type(), DOCKER_V2S2_MEDIA_TYPE);
        assert_eq!(
            updated.config_info().media_type,
            DOCKER_V2S2_CONFIG_MEDIA_TYPE
        );
        assert_eq!(
            updated.layer_infos()[0].media_type,
            DOCKER_LAYER_GZIP_MEDIA_TYPE
        );
    }

    #[test]
    fn test_schema1_to_schema2_is_unsupported() {
        let manifest = Manifest::parse(&schema1_fixture(), DOCKER_V2S1_MEDIA_TYPE).unwrap();
        let update = ManifestUpdate {
            media_type: Some(DOCKER_V2S2_MEDIA_TYPE.to_string()),
            ..Default::default()
        };
        // the upgrade is not offered at all, so no diff-ids are demanded
        assert!(!manifest.needs_layer_diff_ids(&update));
        assert!(matches!(
            manifest.updated(&update),
            Err(TransportError::UnsupportedConversion { .. })
        ));

        // supplying diff-ids does not unlock it either
        let diff_ids: Vec<String> = (0..4)
            .map(|i| format!("sha256:{}", format!("{:064}", i)))
            .collect();
        assert!(matches!(
            manifest.updated(&ManifestUpdate {
                media_type: Some(DOCKER_V2S2_MEDIA_TYPE.to_string()),
                layer_diff_ids: Some(diff_ids),
                ..Default::default()
            }),
            Err(TransportError::UnsupportedConversion { .. })
        ));
    }

    #[test]
    fn test_schema2_to_schema1() {
        let manifest = Manifest::parse(&schema2_fixture(), DOCKER_V2S2_MEDIA_TYPE).unwrap();
        let update_without = ManifestUpdate {
            media_type: Some(DOCKER_V2S1_MEDIA_TYPE.to_string()),
            ..Default::default()
        };
        assert!(manifest.needs_layer_diff_ids(&update_without));
        assert!(matches!(
            manifest.updated(&update_without),
            Err(TransportError::InsufficientInformation(_))
        ));

        let updated = manifest
            .updated(&ManifestUpdate {
                media_type: Some(DOCKER_V2S1_MEDIA_TYPE.to_string()),
                layer_diff_ids: Some(vec![format!("sha256:{:064}", 0)]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.media_type(), DOCKER_V2S1_MEDIA_TYPE);
        let layers = updated.layer_infos();
        assert_eq!(
            layers[0].digest,
            "sha256:e692418e4cbaf90ca69d05a66403747baa33ee08806650b51fab815ad7fc331f"
        );
    }

    #[test]
    fn test_unsupported_conversions() {
        let schema1 = Manifest::parse(&schema1_fixture(), DOCKER_V2S1_MEDIA_TYPE).unwrap();
        assert!(matches!(
            schema1.updated(&ManifestUpdate {
                media_type: Some(OCI_V1_MEDIA_TYPE.to_string()),
                ..Default::default()
            }),
            Err(TransportError::UnsupportedConversion { .. })
        ));

        let oci = Manifest::parse(&schema2_fixture(), DOCKER_V2S2_MEDIA_TYPE)
            .unwrap()
            .updated(&ManifestUpdate {
                media_type: Some(OCI_V1_MEDIA_TYPE.to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(matches!(
            oci.updated(&ManifestUpdate {
                media_type: Some(DOCKER_V2S1_MEDIA_TYPE.to_string()),
                ..Default::default()
            }),
            Err(TransportError::UnsupportedConversion { .. })
        ));

        let list = Manifest::parse(&list_fixture(), DOCKER_V2_LIST_MEDIA_TYPE).unwrap();
        for target in [
            DOCKER_V2S1_MEDIA_TYPE,
            DOCKER_V2S2_MEDIA_TYPE,
            OCI_V1_MEDIA_TYPE,
        ] {
            assert!(matches!(
                list.updated(&ManifestUpdate {
                    media_type: Some(target.to_string()),
                    ..Default::default()
                }),
                Err(TransportError::UnsupportedConversion { .. })
            ));
        }
    }

    #[test]
    fn test_inspect_schema1() {
        let manifest = Manifest::parse(&schema1_fixture(), DOCKER_V2S1_MEDIA_TYPE).unwrap();
        let inspect = manifest.inspect(None).unwrap();
        assert_eq!(inspect.tag, "latest");
        assert_eq!(inspect.docker_version, "1.9.1");
        assert_eq!(inspect.architecture, "amd64");
        assert_eq!(inspect.os, "linux");
        assert_eq!(inspect.layers.len(), 4);
        assert!(inspect.created.is_some());
    }

    #[test]
    fn test_inspect_schema2_needs_config() {
        let manifest = Manifest::parse(&schema2_fixture(), DOCKER_V2S2_MEDIA_TYPE).unwrap();
        assert!(matches!(
            manifest.inspect(None),
            Err(TransportError::InsufficientInformation(_))
        ));

        let config = ConfigFile {
            architecture: "arm64".to_string(),
            os: "linux".to_string(),
            ..ConfigFile::default()
        };
        let inspect = manifest.inspect(Some(&config)).unwrap();
        assert_eq!(inspect.architecture, "arm64");
        assert_eq!(
            inspect.layers,
            vec!["sha256:e692418e4cbaf90ca69d05a66403747baa33ee08806650b51fab815ad7fc331f"]
        );
    }
}
