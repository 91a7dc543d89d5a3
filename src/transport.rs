//! The transport-agnostic source/destination contracts and the
//! configuration shared by the backends

use async_trait::async_trait;

use crate::blob::SizedStream;
use crate::errors::Result;
use crate::reference::Reference;
use crate::secrets::RegistryAuth;

/// A backend an image can be read from.
///
/// A handle is opened against one reference and is not required to be safe
/// for concurrent calls; distinct handles may be used concurrently.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// The reference this source was opened with. This directly corresponds
    /// to the user's intent (e.g. the public hostname rather than the result
    /// of resolving CNAMEs or following redirects), so it is usable for
    /// trust decisions.
    fn reference(&self) -> &Reference;

    /// Fetches the manifest, negotiated against `accept`, returning the
    /// bytes and the actual media type for the caller to dispatch on.
    async fn manifest(&self, accept: &[&str]) -> Result<(Vec<u8>, String)>;

    /// Opens a stream over the blob with the given digest. The caller owns
    /// the stream and must drive it to completion or drop it.
    async fn blob(&self, digest: &str) -> Result<SizedStream>;

    /// The signatures attached to the image, as opaque byte strings. Empty
    /// for backends without signature storage.
    async fn signatures(&self) -> Result<Vec<Vec<u8>>>;

    /// Removes the image from the backend, where the backend supports it.
    async fn delete_image(&self) -> Result<()>;
}

/// A backend an image can be written to.
#[async_trait]
pub trait ImageDestination: Send + Sync {
    /// The reference this destination was opened with; see
    /// [`ImageSource::reference`].
    fn reference(&self) -> &Reference;

    /// The manifest dialects this backend can persist. An empty slice means
    /// any dialect is accepted.
    fn supported_manifest_types(&self) -> &[&str];

    /// Persists the manifest atomically. Call this last, after every
    /// referenced blob has been committed, so that a manifest referencing
    /// missing blobs is never exposed.
    async fn put_manifest(&self, manifest: &[u8]) -> Result<()>;

    /// Writes the blob carried by `stream`, verifying it on the fly, and
    /// returns the computed digest and size. The stream is consumed but the
    /// underlying resource stays the caller's to close.
    ///
    /// The computed digest is authoritative; `expected_digest` is advisory
    /// and a backend is free to ignore it. On any stream error the write
    /// fails and no data remains observable under any digest.
    async fn put_blob(
        &self,
        stream: SizedStream,
        expected_digest: Option<&str>,
    ) -> Result<(String, u64)>;

    /// Persists the signatures, or fails with
    /// [`crate::TransportError::SignaturesUnsupported`] when the backend has
    /// nowhere to put a non-empty list.
    async fn put_signatures(&self, signatures: &[Vec<u8>]) -> Result<()>;
}

/// The protocol a registry client should use to connect.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClientProtocol {
    /// Plain HTTP everywhere.
    Http,
    /// HTTPS everywhere.
    #[default]
    Https,
    /// HTTPS except for the named registries.
    HttpsExcept(Vec<String>),
}

impl ClientProtocol {
    pub(crate) fn scheme_for(&self, registry: &str) -> &str {
        match self {
            ClientProtocol::Https => "https",
            ClientProtocol::Http => "http",
            ClientProtocol::HttpsExcept(exceptions) => {
                if exceptions.contains(&registry.to_owned()) {
                    "http"
                } else {
                    "https"
                }
            }
        }
    }
}

/// The encoding of a certificate.
#[derive(Debug, Clone)]
pub enum CertificateEncoding {
    #[allow(missing_docs)]
    Der,
    #[allow(missing_docs)]
    Pem,
}

/// An x509 certificate.
#[derive(Debug, Clone)]
pub struct Certificate {
    /// Which encoding is used by the certificate
    pub encoding: CertificateEncoding,

    /// Actual certificate
    pub data: Vec<u8>,
}

/// Configuration for opening sources and destinations.
///
/// The filesystem backends ignore everything here; the registry backend uses
/// all of it.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Which protocol the registry client should use.
    pub protocol: ClientProtocol,

    /// Accept invalid certificates. Defaults to false.
    pub accept_invalid_certificates: bool,

    /// A list of extra root certificates to trust, e.g. for registries using
    /// self-signed certificates.
    pub extra_root_certificates: Vec<Certificate>,

    /// Credentials presented during the registry's challenge exchange.
    pub auth: RegistryAuth,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            protocol: ClientProtocol::default(),
            accept_invalid_certificates: false,
            extra_root_certificates: Vec::new(),
            auth: RegistryAuth::Anonymous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_selection() {
        assert_eq!(ClientProtocol::Https.scheme_for("reg.example"), "https");
        assert_eq!(ClientProtocol::Http.scheme_for("reg.example"), "http");

        let except = ClientProtocol::HttpsExcept(vec!["localhost:5000".to_string()]);
        assert_eq!(except.scheme_for("localhost:5000"), "http");
        assert_eq!(except.scheme_for("reg.example"), "https");
    }
}
