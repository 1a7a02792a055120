//! Core identity records shared between the fleet engine, the transport seam,
//! and the directory seam.

use {
    secrecy::Secret,
    serde::Serialize,
    uuid::Uuid,
};

/// Normalize a platform room or account name for comparison.
///
/// The platform treats names case-insensitively and is sloppy about
/// surrounding whitespace, so every lookup key goes through here.
#[must_use]
pub fn channel_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A chat platform user as known to the directory.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    /// Stable platform-assigned ID, when the platform has told us one.
    pub platform_id: Option<String>,
    pub username: String,
    pub display_name: String,
}

impl UserRecord {
    #[must_use]
    pub fn new(
        platform_id: Option<String>,
        username: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            platform_id,
            username: username.into(),
            display_name: display_name.into(),
        }
    }

    /// True when the platform reports different identity fields than we have
    /// stored, meaning the record needs an update write.
    #[must_use]
    pub fn drifted_from(
        &self,
        platform_id: Option<&str>,
        username: &str,
        display_name: &str,
    ) -> bool {
        (platform_id.is_some() && self.platform_id.as_deref() != platform_id)
            || self.username != username
            || self.display_name != display_name
    }
}

/// A bot account: one authenticated identity that can connect to the platform.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BotRecord {
    pub id: Uuid,
    pub user: UserRecord,
}

impl BotRecord {
    #[must_use]
    pub fn new(user: UserRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            user,
        }
    }
}

/// A chat room, keyed case-insensitively by its platform name.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChannelRecord {
    pub id: Uuid,
    pub name: String,
}

impl ChannelRecord {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// Login material for one bot connection.
///
/// The OAuth token never appears in `Debug` output or serialized state; it is
/// exposed only at the connect call.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub oauth_token: Secret<String>,
    pub client_id: String,
}

impl Credentials {
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        oauth_token: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            oauth_token: Secret::new(oauth_token.into()),
            client_id: client_id.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("oauth_token", &"<redacted>")
            .field("client_id", &self.client_id)
            .finish()
    }
}
