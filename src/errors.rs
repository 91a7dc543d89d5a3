//! Errors returned by image transports, the manifest model and the copy engine

/// A `Result` alias where the `Err` case is [`TransportError`].
pub type Result<T> = std::result::Result<T, TransportError>;

/// The set of errors that can occur while reading, writing or converting
/// images.
///
/// Transport-layer failures (`reqwest`, filesystem I/O, JSON) are wrapped
/// verbatim; the remaining variants carry the protocol-level failure modes.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The reference string does not name a known backend or violates the
    /// backend's grammar.
    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    /// A digest string is not in `<algorithm>:<hex>` form.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// A manifest arrived without any media type and its shape could not be
    /// recognized either.
    #[error("could not guess manifest media type")]
    UnknownManifestMime,

    /// A manifest carried a media type this crate does not implement.
    #[error("unsupported manifest media type {0}")]
    UnsupportedManifestMime(String),

    /// The destination cannot persist manifests of the given dialect.
    #[error("destination does not support manifest type {0}")]
    UnsupportedManifestFormat(String),

    /// The requested cross-dialect rewrite is not available.
    #[error("cannot convert manifest from {from} to {to}")]
    UnsupportedConversion {
        /// Media type of the manifest being converted.
        from: String,
        /// Requested target media type.
        to: String,
    },

    /// A conversion was requested without the data it needs, most commonly
    /// the per-layer diff-ids.
    #[error("insufficient information to update manifest: {0}")]
    InsufficientInformation(String),

    /// The registry answered a manifest GET with a non-OK status.
    #[error("error fetching manifest: status code {status}, body: {body}")]
    FetchManifest {
        /// HTTP status code of the response.
        status: u16,
        /// Response body, lossily decoded.
        body: String,
    },

    /// The registry answered a manifest GET with 404.
    #[error("manifest unknown: {reference}")]
    ManifestUnknown {
        /// The repository and tag or digest that was requested.
        reference: String,
    },

    /// The registry answered a blob GET with a non-OK status.
    #[error("error fetching blob: status code {status}")]
    BlobFetchFailed {
        /// HTTP status code of the response.
        status: u16,
    },

    /// Credential exchange failed beyond recovery: the challenge could not
    /// be parsed, the token endpoint refused the credentials, or the retried
    /// request was rejected again.
    #[error("registry authentication failed: {0}")]
    AuthFailed(String),

    /// Content arrived under a digest it does not hash to.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The digest the content was requested under.
        expected: String,
        /// The digest the content actually hashes to.
        actual: String,
    },

    /// The destination cannot store signatures.
    #[error("pushing signatures is not supported by this image destination")]
    SignaturesUnsupported,

    /// The backend has no delete operation for images.
    #[error("deleting images is not supported by this transport")]
    DeleteUnsupported,

    /// The registry returned a response outside the protocol contract.
    #[error("unexpected registry response: status {status} from {url}: {message}")]
    Server {
        /// URL the request was sent to.
        url: String,
        /// HTTP status code of the response.
        status: u16,
        /// Response body or a description of what was malformed.
        message: String,
    },

    /// A local filesystem or stream error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A network transport error.
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    /// A JSON (de)serialization error.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}
