//! Identity check consumed during the socket upgrade.
//!
//! Token issuance and verification live upstream; the hub only asks
//! whether a presented token maps to an identity.

/// Validates an identity token presented before or during the
/// handshake.
pub trait TokenValidator: Send + Sync + 'static {
    /// Returns the authenticated identity for `token`, or `None` to
    /// refuse the upgrade.
    fn validate(&self, token: &str) -> Option<String>;
}

/// Accepts exactly one pre-shared token. Useful for tests and
/// single-user deployments.
pub struct StaticTokenValidator {
    token: String,
    identity: String,
}

impl StaticTokenValidator {
    pub fn new(token: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            identity: identity.into(),
        }
    }
}

impl TokenValidator for StaticTokenValidator {
    fn validate(&self, token: &str) -> Option<String> {
        (token == self.token).then(|| self.identity.clone())
    }
}
