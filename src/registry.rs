//! The remote registry backend
//!
//! Talks to a v2 registry over HTTP(S): challenge-driven credential
//! exchange with a per-client token cache, manifest pull/push, blob pull,
//! two-phase blob upload, and image deletion by digest.

use async_trait::async_trait;
use futures_util::stream::{StreamExt, TryStreamExt};
use http::HeaderValue;
use http_auth::{parser::ChallengeParser, ChallengeRef};
use sha2::{Digest as _, Sha256};
use tracing::{debug, warn};

use crate::blob::SizedStream;
use crate::digest::DOCKER_DIGEST_HEADER;
use crate::errors::{Result, TransportError};
use crate::manifest::{Manifest, DOCKER_V2S2_MEDIA_TYPE};
use crate::reference::Reference;
use crate::secrets::{Authenticable, RegistryAuth};
use crate::token_cache::{RegistryToken, TokenCache, TokenKey};
use crate::transport::{
    CertificateEncoding, ClientProtocol, ImageDestination, ImageSource, TransportConfig,
};

/// A client for one registry host.
///
/// Clones share the token cache, which is safe under concurrent use; a
/// single clone's operations are meant to be called sequentially.
#[derive(Clone)]
pub struct RegistryClient {
    registry: String,
    client: reqwest::Client,
    protocol: ClientProtocol,
    auth: RegistryAuth,
    tokens: TokenCache,
}

impl RegistryClient {
    /// Builds a client for `registry` from the transport configuration.
    pub fn new(registry: &str, config: &TransportConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certificates);
        for c in &config.extra_root_certificates {
            let cert = match c.encoding {
                CertificateEncoding::Der => reqwest::Certificate::from_der(c.data.as_slice())?,
                CertificateEncoding::Pem => reqwest::Certificate::from_pem(c.data.as_slice())?,
            };
            builder = builder.add_root_certificate(cert);
        }
        Ok(Self {
            registry: registry.to_string(),
            client: builder.build()?,
            protocol: config.protocol.clone(),
            auth: config.auth.clone(),
            tokens: TokenCache::default(),
        })
    }

    fn base_url(&self, path: &str) -> String {
        format!(
            "{}://{}{}",
            self.protocol.scheme_for(&self.registry),
            self.registry,
            path
        )
    }

    /// Performs one request with the registry's challenge workflow: attach a
    /// cached token when one exists for `scope`, and on a 401 answer the
    /// `WWW-Authenticate` challenge, cache the fresh token, and retry the
    /// request exactly once. Any other status is the caller's to interpret.
    async fn execute<F>(&self, scope: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut request = build(&self.client);
        if let Some(token) = self.tokens.get_scope(scope).await {
            request = request.header(reqwest::header::AUTHORIZATION, token.bearer_token());
        }
        let response = request.send().await?;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = match response.headers().get(reqwest::header::WWW_AUTHENTICATE) {
            Some(header) => BearerChallenge::try_from(header).map_err(TransportError::AuthFailed)?,
            None => {
                return Err(TransportError::AuthFailed(format!(
                    "{} returned 401 without a WWW-Authenticate challenge",
                    self.registry
                )))
            }
        };
        let token = self.fetch_token(&challenge, scope).await?;
        self.tokens
            .insert(
                TokenKey {
                    realm: challenge.realm.clone(),
                    service: challenge.service.clone().unwrap_or_default(),
                    scope: challenge
                        .scope
                        .clone()
                        .unwrap_or_else(|| scope.to_string()),
                },
                token.clone(),
            )
            .await;

        let response = build(&self.client)
            .header(reqwest::header::AUTHORIZATION, token.bearer_token())
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(TransportError::AuthFailed(format!(
                "{} rejected the freshly acquired token",
                self.registry
            )));
        }
        Ok(response)
    }

    /// Acquires a bearer token from the challenge's realm, presenting the
    /// configured credentials via basic auth. The challenge's own scope
    /// directive wins over the scope we derived locally.
    async fn fetch_token(
        &self,
        challenge: &BearerChallenge,
        fallback_scope: &str,
    ) -> Result<RegistryToken> {
        let scope = challenge.scope.as_deref().unwrap_or(fallback_scope);
        let mut query: Vec<(&str, &str)> = vec![("scope", scope)];
        if let Some(service) = &challenge.service {
            query.push(("service", service));
        }
        debug!(realm = %challenge.realm, %scope, "acquiring bearer token");

        let response = self
            .client
            .get(&challenge.realm)
            .query(&query)
            .apply_authentication(&self.auth)
            .send()
            .await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(TransportError::AuthFailed(format!(
                "token endpoint {} returned status {}",
                challenge.realm,
                response.status()
            )));
        }
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| TransportError::AuthFailed(format!("malformed token response: {e}")))
    }

    /// Fetches a manifest by tag or digest; returns the bytes and the
    /// `Content-Type` the registry declared for them.
    pub async fn fetch_manifest(
        &self,
        repository: &str,
        reference: &str,
        accept: &[&str],
    ) -> Result<(Vec<u8>, String)> {
        let url = self.base_url(&format!("/v2/{}/manifests/{}", repository, reference));
        debug!(%url, "fetching manifest");
        let response = self
            .execute(&pull_scope(repository), |client| {
                client
                    .get(&url)
                    .header(reqwest::header::ACCEPT, accept.join(", "))
            })
            .await?;
        let status = response.status();
        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes().await?;
        match status {
            reqwest::StatusCode::OK => Ok((body.to_vec(), media_type)),
            reqwest::StatusCode::NOT_FOUND => Err(TransportError::ManifestUnknown {
                reference: format!("{}/{}:{}", self.registry, repository, reference),
            }),
            s => Err(TransportError::FetchManifest {
                status: s.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }),
        }
    }

    /// Opens a stream over a blob. The size comes from `Content-Length` when
    /// the registry sent one.
    pub async fn fetch_blob(&self, repository: &str, digest: &str) -> Result<SizedStream> {
        let url = self.base_url(&format!("/v2/{}/blobs/{}", repository, digest));
        debug!(%url, "fetching blob");
        let response = self
            .execute(&pull_scope(repository), |client| client.get(&url))
            .await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(TransportError::BlobFetchFailed {
                status: response.status().as_u16(),
            });
        }
        let content_length = response.content_length();
        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            .boxed();
        Ok(SizedStream {
            content_length,
            stream,
        })
    }

    /// Pushes manifest bytes under `reference` with the given content type.
    pub async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        media_type: &str,
        body: Vec<u8>,
    ) -> Result<()> {
        let url = self.base_url(&format!("/v2/{}/manifests/{}", repository, reference));
        debug!(%url, %media_type, "pushing manifest");
        let media_type = media_type.to_string();
        let response = self
            .execute(&push_scope(repository), |client| {
                client
                    .put(&url)
                    .header(reqwest::header::CONTENT_TYPE, media_type.clone())
                    .body(body.clone())
            })
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Server {
                url,
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    /// Uploads a blob through the two-phase protocol: open an upload
    /// session, send the bytes, finalize with the computed digest. A failure
    /// anywhere abandons the session; no digest appears in the registry.
    pub async fn put_blob(&self, repository: &str, stream: SizedStream) -> Result<(String, u64)> {
        let data = stream.collect().await?;
        let digest = format!("sha256:{:x}", Sha256::digest(&data));
        let size = data.len() as u64;
        let scope = push_scope(repository);

        let upload_url = self.base_url(&format!("/v2/{}/blobs/uploads/", repository));
        debug!(url = %upload_url, %digest, size, "starting blob upload session");
        let response = self
            .execute(&scope, |client| {
                client.post(&upload_url).header(reqwest::header::CONTENT_LENGTH, 0)
            })
            .await?;
        let session = self
            .location_of(response, reqwest::StatusCode::ACCEPTED)
            .await?;

        let response = self
            .execute(&scope, |client| {
                client
                    .patch(&session)
                    .header(reqwest::header::CONTENT_LENGTH, data.len())
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(data.clone())
            })
            .await?;
        let session = self
            .location_of(response, reqwest::StatusCode::ACCEPTED)
            .await?;

        let commit_url = if session.contains('?') {
            format!("{session}&digest={digest}")
        } else {
            format!("{session}?digest={digest}")
        };
        let response = self
            .execute(&scope, |client| {
                client
                    .put(&commit_url)
                    .header(reqwest::header::CONTENT_LENGTH, 0)
            })
            .await?;
        let status = response.status();
        if status != reqwest::StatusCode::CREATED {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Server {
                url: commit_url,
                status: status.as_u16(),
                message,
            });
        }
        Ok((digest, size))
    }

    /// Deletes the image behind `reference`: fetch the manifest's canonical
    /// digest from the `Docker-Content-Digest` header, then delete by
    /// digest. Registries without schema 2 storage answer the initial GET
    /// with 404, which surfaces as the delete operation being unsupported.
    pub async fn delete_image(&self, repository: &str, reference: &str) -> Result<()> {
        let url = self.base_url(&format!("/v2/{}/manifests/{}", repository, reference));
        let response = self
            .execute(&pull_scope(repository), |client| {
                client
                    .get(&url)
                    .header(reqwest::header::ACCEPT, DOCKER_V2S2_MEDIA_TYPE)
            })
            .await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TransportError::DeleteUnsupported);
        }
        if status != reqwest::StatusCode::OK {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Server {
                url,
                status: status.as_u16(),
                message,
            });
        }
        let digest = response
            .headers()
            .get(DOCKER_DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| TransportError::Server {
                url: url.clone(),
                status: status.as_u16(),
                message: format!("missing {DOCKER_DIGEST_HEADER} header"),
            })?;

        let delete_url = self.base_url(&format!("/v2/{}/manifests/{}", repository, digest));
        debug!(url = %delete_url, "deleting manifest");
        let response = self
            .execute(&push_scope(repository), |client| {
                client
                    .delete(&delete_url)
                    .header(reqwest::header::ACCEPT, DOCKER_V2S2_MEDIA_TYPE)
            })
            .await?;
        let status = response.status();
        if status != reqwest::StatusCode::ACCEPTED {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Server {
                url: delete_url,
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    /// Resolves the `Location` header of an upload-session response, which
    /// may be absolute or a `/v2/`-relative path.
    async fn location_of(
        &self,
        response: reqwest::Response,
        expected: reqwest::StatusCode,
    ) -> Result<String> {
        let status = response.status();
        let url = response.url().to_string();
        if status != expected {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Server {
                url,
                status: status.as_u16(),
                message,
            });
        }
        match response.headers().get(reqwest::header::LOCATION) {
            None => Err(TransportError::Server {
                url,
                status: status.as_u16(),
                message: "missing Location header".to_string(),
            }),
            Some(location) => {
                let location = location.to_str().map_err(|e| TransportError::Server {
                    url: url.clone(),
                    status: status.as_u16(),
                    message: e.to_string(),
                })?;
                if location.starts_with('/') {
                    Ok(self.base_url(location))
                } else {
                    Ok(location.to_string())
                }
            }
        }
    }
}

fn pull_scope(repository: &str) -> String {
    format!("repository:{}:pull", repository)
}

fn push_scope(repository: &str) -> String {
    format!("repository:{}:pull,push", repository)
}

#[derive(Clone, Debug)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

impl TryFrom<&HeaderValue> for BearerChallenge {
    type Error = String;

    fn try_from(value: &HeaderValue) -> std::result::Result<Self, Self::Error> {
        let parser = ChallengeParser::new(
            value
                .to_str()
                .map_err(|e| format!("cannot convert header value to string: {:?}", e))?,
        );
        parser
            .filter_map(|parser_res| {
                if let Ok(challenge_ref) = parser_res {
                    BearerChallenge::try_from(&challenge_ref).ok()
                } else {
                    None
                }
            })
            .next()
            .ok_or_else(|| "cannot find Bearer challenge".to_string())
    }
}

impl TryFrom<&ChallengeRef<'_>> for BearerChallenge {
    type Error = String;

    fn try_from(value: &ChallengeRef<'_>) -> std::result::Result<Self, Self::Error> {
        if !value.scheme.eq_ignore_ascii_case("Bearer") {
            return Err(format!(
                "unsupported challenge scheme {:?}",
                value.scheme
            ));
        }
        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for (k, v) in &value.params {
            if k.eq_ignore_ascii_case("realm") {
                realm = Some(v.to_unescaped());
            }
            if k.eq_ignore_ascii_case("service") {
                service = Some(v.to_unescaped());
            }
            if k.eq_ignore_ascii_case("scope") {
                scope = Some(v.to_unescaped());
            }
        }
        let realm = realm.ok_or("missing required parameter realm")?;
        Ok(BearerChallenge {
            realm,
            service,
            scope,
        })
    }
}

/// An [`ImageSource`] reading from a remote registry.
pub struct RegistrySource {
    reference: Reference,
    repository: String,
    tag: String,
    client: RegistryClient,
}

impl RegistrySource {
    /// Opens a source for a registry reference.
    pub fn new(reference: Reference, config: &TransportConfig) -> Result<Self> {
        let (registry, repository, tag) = registry_parts(&reference)?;
        Ok(Self {
            client: RegistryClient::new(&registry, config)?,
            repository,
            tag,
            reference,
        })
    }
}

#[async_trait]
impl ImageSource for RegistrySource {
    fn reference(&self) -> &Reference {
        &self.reference
    }

    async fn manifest(&self, accept: &[&str]) -> Result<(Vec<u8>, String)> {
        self.client
            .fetch_manifest(&self.repository, &self.tag, accept)
            .await
    }

    async fn blob(&self, digest: &str) -> Result<SizedStream> {
        self.client.fetch_blob(&self.repository, digest).await
    }

    async fn signatures(&self) -> Result<Vec<Vec<u8>>> {
        // The plain v2 protocol has no signature storage.
        Ok(Vec::new())
    }

    async fn delete_image(&self) -> Result<()> {
        self.client.delete_image(&self.repository, &self.tag).await
    }
}

/// An [`ImageDestination`] writing to a remote registry.
pub struct RegistryDestination {
    reference: Reference,
    repository: String,
    tag: String,
    client: RegistryClient,
}

impl RegistryDestination {
    /// Opens a destination for a registry reference.
    pub fn new(reference: Reference, config: &TransportConfig) -> Result<Self> {
        let (registry, repository, tag) = registry_parts(&reference)?;
        Ok(Self {
            client: RegistryClient::new(&registry, config)?,
            repository,
            tag,
            reference,
        })
    }
}

#[async_trait]
impl ImageDestination for RegistryDestination {
    fn reference(&self) -> &Reference {
        &self.reference
    }

    fn supported_manifest_types(&self) -> &[&str] {
        // Registries negotiate by Content-Type; any dialect can be pushed.
        &[]
    }

    async fn put_manifest(&self, manifest: &[u8]) -> Result<()> {
        let media_type = Manifest::guess_mime_type(manifest)?;
        self.client
            .put_manifest(&self.repository, &self.tag, &media_type, manifest.to_vec())
            .await
    }

    async fn put_blob(
        &self,
        stream: SizedStream,
        expected_digest: Option<&str>,
    ) -> Result<(String, u64)> {
        if let Some(expected) = expected_digest {
            debug!(%expected, "uploading blob; the computed digest is authoritative");
        }
        self.client.put_blob(&self.repository, stream).await
    }

    async fn put_signatures(&self, signatures: &[Vec<u8>]) -> Result<()> {
        if !signatures.is_empty() {
            warn!(count = signatures.len(), "registry destinations cannot store signatures");
            return Err(TransportError::SignaturesUnsupported);
        }
        Ok(())
    }
}

fn registry_parts(reference: &Reference) -> Result<(String, String, String)> {
    match reference {
        Reference::Registry {
            registry,
            repository,
            tag,
        } => Ok((registry.clone(), repository.clone(), tag.clone())),
        other => Err(TransportError::InvalidReference(format!(
            "{other}: not a registry reference"
        ))),
    }
}
