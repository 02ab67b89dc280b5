//! External identity providers.
//!
//! The authorization-code exchange itself is delegated to a standard OAuth2
//! client behind [`OAuthProvider`]; the core only consumes the resulting
//! [`UserInfo`].

use serde::{Deserialize, Serialize};

use crate::error::SentinelError;

/// Profile returned by a provider after a successful code exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Subject at the provider.
    pub subject: String,
    pub email: String,
    pub display_name: String,
    /// Provider name, e.g. "google".
    pub provider: String,
}

#[async_trait::async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Where to send the user to start the flow.
    fn authorize_url(&self, state: &str) -> String;

    /// Exchange an authorization code for the user's profile. A rejected
    /// code is `Unauthorized`; a provider outage is `Unavailable`.
    async fn exchange(&self, code: &str) -> Result<UserInfo, SentinelError>;
}
