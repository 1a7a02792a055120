//! In-memory directory for tests and single-process embeddings.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    uuid::Uuid,
};

use shoal_common::{BotRecord, ChannelRecord, UserRecord, channel_key};

use crate::directory::Directory;

/// Directory backed by `HashMap`s. No persistence.
pub struct MemoryDirectory {
    users: Mutex<HashMap<Uuid, UserRecord>>,
    bots: Mutex<HashMap<Uuid, BotRecord>>,
    channels: Mutex<HashMap<String, ChannelRecord>>,
    presence: Mutex<HashMap<Uuid, Vec<UserRecord>>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            bots: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            presence: Mutex::new(HashMap::new()),
        }
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn user_by_id(&self, id: Uuid) -> Result<Option<UserRecord>> {
        Ok(Self::lock(&self.users).get(&id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let key = channel_key(username);
        Ok(Self::lock(&self.users)
            .values()
            .find(|u| channel_key(&u.username) == key)
            .cloned())
    }

    async fn user_by_platform_id(&self, platform_id: &str) -> Result<Option<UserRecord>> {
        Ok(Self::lock(&self.users)
            .values()
            .find(|u| u.platform_id.as_deref() == Some(platform_id))
            .cloned())
    }

    async fn create_user(&self, user: UserRecord) -> Result<UserRecord> {
        Self::lock(&self.users).insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, user: UserRecord) -> Result<UserRecord> {
        let mut users = Self::lock(&self.users);
        if !users.contains_key(&user.id) {
            bail!("user not found: {}", user.id);
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn bot_for_user(&self, user: &UserRecord) -> Result<Option<BotRecord>> {
        Ok(Self::lock(&self.bots)
            .values()
            .find(|b| b.user.id == user.id)
            .cloned())
    }

    async fn create_bot(&self, bot: BotRecord) -> Result<BotRecord> {
        Self::lock(&self.bots).insert(bot.id, bot.clone());
        Ok(bot)
    }

    async fn channel_by_name(&self, name: &str) -> Result<ChannelRecord> {
        let key = channel_key(name);
        Ok(Self::lock(&self.channels)
            .entry(key.clone())
            .or_insert_with(|| ChannelRecord::new(key))
            .clone())
    }

    async fn users_present(&self, channel: &ChannelRecord) -> Result<Vec<UserRecord>> {
        Ok(Self::lock(&self.presence)
            .get(&channel.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_users_present(
        &self,
        channel: &ChannelRecord,
        users: Vec<UserRecord>,
    ) -> Result<()> {
        Self::lock(&self.presence).insert(channel.id, users);
        Ok(())
    }
}
