//! Types for working with registry access credentials

use std::fmt;

/// A method for authenticating to a registry.
///
/// Reading credentials out of Docker/Podman config files is deliberately not
/// handled here; callers that want it resolve the credentials themselves and
/// pass `Basic`.
#[derive(Clone)]
pub enum RegistryAuth {
    /// Access the registry anonymously
    Anonymous,

    /// Access the registry using HTTP Basic authentication
    Basic(String, String),
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryAuth::Anonymous => f.write_str("Anonymous"),
            RegistryAuth::Basic(username, _) => f
                .debug_tuple("Basic")
                .field(username)
                .field(&"<redacted>")
                .finish(),
        }
    }
}

pub(crate) trait Authenticable {
    fn apply_authentication(self, auth: &RegistryAuth) -> Self;
}

impl Authenticable for reqwest::RequestBuilder {
    fn apply_authentication(self, auth: &RegistryAuth) -> Self {
        match auth {
            RegistryAuth::Anonymous => self,
            RegistryAuth::Basic(username, password) => self.basic_auth(username, Some(password)),
        }
    }
}
