//! Seam to persistent storage of users, bots, channels, and per-channel
//! presence. The engine only ever talks to this trait; what backs it is the
//! embedder's choice.

use {anyhow::Result, async_trait::async_trait, uuid::Uuid};

use shoal_common::{BotRecord, ChannelRecord, UserRecord};

/// User/bot/channel repository.
///
/// All name lookups take the normalized form produced by
/// [`shoal_common::channel_key`].
#[async_trait]
pub trait Directory: Send + Sync {
    async fn user_by_id(&self, id: Uuid) -> Result<Option<UserRecord>>;
    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>>;
    async fn user_by_platform_id(&self, platform_id: &str) -> Result<Option<UserRecord>>;
    async fn create_user(&self, user: UserRecord) -> Result<UserRecord>;
    /// Replace the stored record carrying the same id. Fails if it is not
    /// already stored.
    async fn update_user(&self, user: UserRecord) -> Result<UserRecord>;

    async fn bot_for_user(&self, user: &UserRecord) -> Result<Option<BotRecord>>;
    async fn create_bot(&self, bot: BotRecord) -> Result<BotRecord>;

    /// Fetch the channel record for a name, creating it on first sight.
    async fn channel_by_name(&self, name: &str) -> Result<ChannelRecord>;

    /// The set of users currently seen in the channel.
    async fn users_present(&self, channel: &ChannelRecord) -> Result<Vec<UserRecord>>;
    /// Replace the channel's presence set wholesale.
    async fn replace_users_present(
        &self,
        channel: &ChannelRecord,
        users: Vec<UserRecord>,
    ) -> Result<()>;
}
