//! Session-scoped credentials.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Bearer credential plus the refresh token used to renew it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Bearer token sent to the REST API and the hub.
    #[serde(alias = "token")]
    pub access_token: String,
    /// Token accepted by the refresh endpoint, when the backend issued one.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl Credentials {
    /// Credential without a refresh token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }

    /// Attach the refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// A credential is usable when the bearer token is not blank.
    pub fn is_present(&self) -> bool {
        !self.access_token.trim().is_empty()
    }
}

/// Credentials shared between the REST client and the hub session.
///
/// Cloning is cheap; every clone sees refreshes made through any other.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    inner: Arc<RwLock<Option<Credentials>>>,
}

impl AuthContext {
    /// Blank credentials are dropped, leaving the context signed out.
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(credentials.filter(Credentials::is_present))),
        }
    }

    /// Current credential, if signed in.
    pub fn credentials(&self) -> Option<Credentials> {
        self.inner.read().clone()
    }

    /// Replace the credential; a blank one signs out.
    pub fn set(&self, credentials: Credentials) {
        *self.inner.write() = Some(credentials).filter(Credentials::is_present);
    }

    /// Forget the credential (logout or rejected refresh).
    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    /// True while a credential is held.
    pub fn is_authenticated(&self) -> bool {
        self.inner.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_tokens_are_not_credentials() {
        let context = AuthContext::new(Some(Credentials::new("   ")));
        assert!(!context.is_authenticated());

        context.set(Credentials::new("abc").with_refresh_token("r1"));
        let shared = context.clone();
        assert_eq!(
            shared.credentials().and_then(|c| c.refresh_token),
            Some("r1".to_string())
        );

        shared.clear();
        assert!(!context.is_authenticated());
    }

    #[test]
    fn accepts_backend_token_field_names() {
        let credentials: Credentials =
            serde_json::from_str(r#"{"token":"t","refreshToken":"r"}"#).expect("parses");
        assert_eq!(credentials, Credentials::new("t").with_refresh_token("r"));
    }
}
