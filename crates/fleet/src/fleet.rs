//! Top-level façade: the keyed set of live bots and the fleet-wide event
//! stream.

use std::{collections::HashMap, sync::Arc};

use {tokio_util::sync::CancellationToken, tracing::info, uuid::Uuid};

use {
    shoal_common::{BotRecord, ChannelRecord, ChatColor, ColorParseError, Credentials, UserRecord, channel_key},
    shoal_transport::{Connector, Directory},
};

use crate::{
    bot::BotSession,
    channel::ChannelSession,
    config::BotConfig,
    error::{Error, Result},
    events::{ErrorEvent, ErrorKind, EventBus, FleetEvent, forward_events},
};

struct BotHandle {
    session: Arc<BotSession>,
    forwarder: CancellationToken,
}

/// Owns every live [`BotSession`] and re-publishes each bot's events on one
/// fleet-wide bus, exactly once per event.
pub struct FleetSupervisor {
    connector: Arc<dyn Connector>,
    directory: Arc<dyn Directory>,
    bus: EventBus,
    bots: tokio::sync::Mutex<HashMap<Uuid, BotHandle>>,
}

impl FleetSupervisor {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, directory: Arc<dyn Directory>) -> Self {
        Self {
            connector,
            directory,
            bus: EventBus::default(),
            bots: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Events from every bot, channel, and this façade.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<FleetEvent> {
        self.bus.subscribe()
    }

    /// Resolve (or create) the bot's directory records, register the
    /// session, and open its connection.
    ///
    /// A failed connection attempt is reported on the event stream; the
    /// returned session stays registered and can be connected again.
    pub async fn connect_bot(
        &self,
        credentials: Credentials,
        config: BotConfig,
    ) -> Result<Arc<BotSession>> {
        let record = self.resolve_bot_record(&credentials).await?;
        let session = BotSession::new(
            record.clone(),
            credentials,
            config,
            Arc::clone(&self.connector),
            Arc::clone(&self.directory),
        );
        let forwarder = CancellationToken::new();
        forward_events(session.bus(), &self.bus, forwarder.clone());
        let replaced = {
            let mut bots = self.bots.lock().await;
            bots.insert(record.id, BotHandle {
                session: Arc::clone(&session),
                forwarder,
            })
        };
        if let Some(old) = replaced {
            // Connecting an identity that is already registered supersedes
            // its previous session entirely.
            old.session.dispose().await;
            old.forwarder.cancel();
        }
        info!(bot = %record.user.username, "bot registered");
        session.connect().await;
        Ok(session)
    }

    /// Dispose a bot and detach it from the fleet bus. Disposal cascades
    /// through its supervisor and channel sessions before the listener is
    /// detached. Returns whether the bot was registered.
    pub async fn disconnect_bot(&self, bot: &Arc<BotSession>) -> bool {
        let handle = { self.bots.lock().await.remove(&bot.record().id) };
        let Some(handle) = handle else {
            return false;
        };
        handle.session.dispose().await;
        handle.forwarder.cancel();
        info!(bot = %bot.record().user.username, "bot removed");
        true
    }

    pub async fn bots(&self) -> Vec<Arc<BotSession>> {
        let bots = self.bots.lock().await;
        bots.values().map(|h| Arc::clone(&h.session)).collect()
    }

    // ── Channel operations ──────────────────────────────────────────────

    /// Join `name` on `bot` (idempotent per channel name).
    pub async fn join_channel(
        &self,
        bot: &Arc<BotSession>,
        name: &str,
    ) -> Result<Arc<ChannelSession>> {
        bot.join_channel(name).await
    }

    /// Leave a channel. Returns whether it was joined.
    pub async fn leave_channel(
        &self,
        bot: &Arc<BotSession>,
        channel: &Arc<ChannelSession>,
    ) -> bool {
        bot.leave_channel(channel.key()).await
    }

    // ── Sending ─────────────────────────────────────────────────────────

    /// Queue a chat message for rate-limited delivery in `color`.
    pub fn send_message(&self, channel: &ChannelSession, text: &str, color: ChatColor) {
        channel.enqueue_chat(text, color);
    }

    /// [`Self::send_message`] taking an arbitrary hex color, mapped to the
    /// nearest platform preset.
    pub fn send_message_hex(
        &self,
        channel: &ChannelSession,
        text: &str,
        hex: &str,
    ) -> std::result::Result<(), ColorParseError> {
        channel.enqueue_chat(text, ChatColor::nearest(hex)?);
        Ok(())
    }

    /// Queue a command (action-prefixed) message.
    pub fn send_command(&self, channel: &ChannelSession, text: &str, color: ChatColor) {
        channel.enqueue_command(text, color);
    }

    pub fn send_command_hex(
        &self,
        channel: &ChannelSession,
        text: &str,
        hex: &str,
    ) -> std::result::Result<(), ColorParseError> {
        channel.enqueue_command(text, ChatColor::nearest(hex)?);
        Ok(())
    }

    /// Send immediately, bypassing the queue. Refused when the channel is
    /// not joined.
    pub async fn send_message_immediate(&self, channel: &ChannelSession, text: &str) -> bool {
        channel.send_immediate(text).await
    }

    pub async fn send_command_immediate(&self, channel: &ChannelSession, text: &str) -> bool {
        channel.send_command_immediate(text).await
    }

    /// Queue a whisper for rate-limited delivery.
    pub fn send_whisper(&self, bot: &BotSession, to: UserRecord, text: &str) {
        bot.send_whisper(to, text);
    }

    /// Send a whisper immediately, bypassing the queue. Refused when the
    /// bot is not connected.
    pub async fn send_whisper_immediate(
        &self,
        bot: &BotSession,
        to: &UserRecord,
        text: &str,
    ) -> bool {
        bot.send_whisper_immediate(to, text).await
    }

    // ── Directory passthroughs ──────────────────────────────────────────

    pub async fn user(&self, id: Uuid) -> Option<UserRecord> {
        match self.directory.user_by_id(id).await {
            Ok(user) => user,
            Err(e) => {
                self.emit_directory_error(format!("get user {id}: {e:#}"));
                None
            }
        }
    }

    pub async fn user_by_username(&self, username: &str) -> Option<UserRecord> {
        match self.directory.user_by_username(&channel_key(username)).await {
            Ok(user) => user,
            Err(e) => {
                self.emit_directory_error(format!("get user {username:?}: {e:#}"));
                None
            }
        }
    }

    pub async fn create_user(&self, user: UserRecord) -> Option<UserRecord> {
        match self.directory.create_user(user).await {
            Ok(user) => Some(user),
            Err(e) => {
                self.emit_directory_error(format!("create user: {e:#}"));
                None
            }
        }
    }

    pub async fn update_user(&self, user: UserRecord) -> Option<UserRecord> {
        match self.directory.update_user(user).await {
            Ok(user) => Some(user),
            Err(e) => {
                self.emit_directory_error(format!("update user: {e:#}"));
                None
            }
        }
    }

    pub async fn channel_by_name(&self, name: &str) -> Option<ChannelRecord> {
        match self.directory.channel_by_name(&channel_key(name)).await {
            Ok(channel) => Some(channel),
            Err(e) => {
                self.emit_directory_error(format!("get channel {name:?}: {e:#}"));
                None
            }
        }
    }

    /// Dispose every bot. Safe to call more than once.
    pub async fn dispose(&self) {
        let handles: Vec<BotHandle> = {
            let mut bots = self.bots.lock().await;
            bots.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.session.dispose().await;
            handle.forwarder.cancel();
        }
    }

    async fn resolve_bot_record(&self, credentials: &Credentials) -> Result<BotRecord> {
        let key = channel_key(&credentials.username);
        let user = match self
            .directory
            .user_by_username(&key)
            .await
            .map_err(|e| Error::directory("bot user lookup", e))?
        {
            Some(user) => user,
            None => self
                .directory
                .create_user(UserRecord::new(
                    None,
                    credentials.username.as_str(),
                    credentials.username.as_str(),
                ))
                .await
                .map_err(|e| Error::directory("bot user create", e))?,
        };
        match self
            .directory
            .bot_for_user(&user)
            .await
            .map_err(|e| Error::directory("bot lookup", e))?
        {
            Some(bot) => Ok(bot),
            None => self
                .directory
                .create_bot(BotRecord::new(user))
                .await
                .map_err(|e| Error::directory("bot create", e)),
        }
    }

    fn emit_directory_error(&self, detail: String) {
        self.bus.publish(FleetEvent::Error {
            error: ErrorEvent {
                kind: ErrorKind::Directory,
                bot: None,
                channel: None,
                detail,
            },
        });
    }
}
