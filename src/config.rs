//! Image configuration model
//!
//! The subset of the image configuration JSON that inspection and
//! schema interconversion need, following
//! <https://github.com/opencontainers/image-spec/blob/v1.0/config.md>.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An image configuration blob.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ConfigFile {
    /// A combined date and time at which the image was created, formatted as
    /// defined by RFC 3339, section 5.6.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// The name and/or email address of the person or entity which created
    /// and is responsible for maintaining the image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// The CPU architecture which the binaries in this image are built to
    /// run on. Kept as a free-form string so unknown values survive a
    /// round trip.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,

    /// The name of the operating system which the image is built to run on.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os: String,

    /// The version of the builder that produced the image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_version: Option<String>,

    /// The execution parameters which should be used as a base when running
    /// a container using the image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<RuntimeConfig>,

    /// The rootfs key references the layer content addresses used by the
    /// image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rootfs: Option<Rootfs>,

    /// Describes the history of each layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<History>>,
}

/// The execution parameters of an image. Only the fields inspection reports
/// are modeled; everything else in the blob is opaque to this crate.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RuntimeConfig {
    /// Arbitrary metadata for the container.
    #[serde(rename = "Labels", skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,

    /// Default arguments to the entrypoint of the container.
    #[serde(rename = "Cmd", skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,

    /// Default environment of the container.
    #[serde(rename = "Env", skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
}

/// The layer content addresses used by an image.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Rootfs {
    /// Must be `layers`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Digests of the uncompressed layers, root first.
    pub diff_ids: Vec<String>,
}

/// One history entry per layer-producing step, root first.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct History {
    /// When the step was run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// The author of the step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// The command which created the layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    /// A custom message set when creating the layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Marks steps that produced no filesystem change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_layer: Option<bool>,
}

/// One `v1Compatibility` entry of a schema 1 manifest.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct V1Image {
    /// Randomly generated layer id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Id of the parent layer, absent for the root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// When the layer was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// A custom message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// The author of the layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// The version of the builder that produced the layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_version: Option<String>,

    /// The execution parameters recorded with the layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<RuntimeConfig>,

    /// The CPU architecture the image runs on, present on the leaf entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,

    /// The operating system the image runs on, present on the leaf entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,

    /// Marks entries whose layer carries no filesystem change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throwaway: Option<bool>,
}
