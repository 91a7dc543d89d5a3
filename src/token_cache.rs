use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A token granted during the OAuth2-like workflow for OCI registries.
#[derive(Deserialize, Clone)]
#[serde(untagged)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RegistryToken {
    Token { token: String },
    AccessToken { access_token: String },
}

impl fmt::Debug for RegistryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = String::from("<redacted>");
        match self {
            RegistryToken::Token { .. } => {
                f.debug_struct("Token").field("token", &redacted).finish()
            }
            RegistryToken::AccessToken { .. } => f
                .debug_struct("AccessToken")
                .field("access_token", &redacted)
                .finish(),
        }
    }
}

impl RegistryToken {
    pub fn bearer_token(&self) -> String {
        format!("Bearer {}", self.token())
    }

    pub fn token(&self) -> &str {
        match self {
            RegistryToken::Token { token } => token,
            RegistryToken::AccessToken { access_token } => access_token,
        }
    }
}

/// Cache key for bearer tokens.
///
/// Keyed by the full challenge triple so that concurrent fetches for
/// different scopes (or against different token services) never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TokenKey {
    pub realm: String,
    pub service: String,
    pub scope: String,
}

/// A token cache shared by all clones of a single registry client.
///
/// Safe for concurrent read/update; tokens live for the lifetime of the
/// client.
#[derive(Clone, Default)]
pub(crate) struct TokenCache {
    tokens: Arc<RwLock<HashMap<TokenKey, RegistryToken>>>,
}

impl TokenCache {
    pub(crate) async fn insert(&self, key: TokenKey, token: RegistryToken) {
        debug!(realm = %key.realm, service = %key.service, scope = %key.scope, "Inserting token");
        self.tokens.write().await.insert(key, token);
    }

    /// Looks up a cached token usable for `scope`, regardless of which realm
    /// and service issued it. A single client only ever talks to one
    /// registry, so at most one `{realm, service}` pair exists per scope.
    pub(crate) async fn get_scope(&self, scope: &str) -> Option<RegistryToken> {
        let tokens = self.tokens.read().await;
        let hit = tokens
            .iter()
            .find(|(key, _)| key.scope == scope)
            .map(|(_, token)| token.clone());
        debug!(%scope, miss = hit.is_none(), "Fetching token");
        hit
    }
}
