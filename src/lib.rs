//! A uniform abstraction for reading, writing and copying container images
//! across heterogeneous backends: remote v2 registries (`docker://`), raw
//! directories (`dir:`) and OCI image layouts (`oci:`). Every backend
//! presents the same small source/destination contract, so the same copy
//! engine works across all of them, converting between manifest dialects
//! where source and destination disagree.
#![deny(missing_docs)]

pub mod blob;
pub mod config;
pub mod copy;
pub mod digest;
pub mod dir;
pub mod errors;
pub mod image;
pub mod manifest;
pub mod oci_layout;
pub mod reference;
pub mod registry;
mod regexp;
pub mod secrets;
mod token_cache;
pub mod transport;

#[doc(inline)]
pub use copy::{copy, copy_image, CopyOptions};
#[doc(inline)]
pub use errors::{Result, TransportError};
#[doc(inline)]
pub use image::Image;
#[doc(inline)]
pub use manifest::{BlobInfo, Manifest, ManifestUpdate};
#[doc(inline)]
pub use reference::Reference;
#[doc(inline)]
pub use secrets::RegistryAuth;
#[doc(inline)]
pub use transport::{ImageDestination, ImageSource, TransportConfig};

#[macro_use]
extern crate lazy_static;

use sha2::Digest as _;

/// Computes the `sha256:<hex>` digest of a byte slice.
pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{:x}", sha2::Sha256::digest(bytes))
}
