//! One joined channel: its outbound queue, color gate, immediate sends, and
//! inbound-event handlers.

use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};

use {
    chrono::{DateTime, Utc},
    tracing::debug,
    uuid::Uuid,
};

use {
    shoal_common::{BotRecord, ChannelRecord, ChatColor, UserRecord, channel_key},
    shoal_transport::{ChatTransport, Directory},
};

use crate::{
    config::BotConfig,
    events::{
        ChatMessage, ColorChangePhase, Direction, ErrorEvent, ErrorKind, EventBus, FleetEvent,
    },
    gate::ColorSyncGate,
    queue::BoundedQueue,
};

/// How a queued entry is rendered on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    Chat,
    /// Sent with the platform's action prefix; otherwise identical to chat.
    Command,
}

/// One pending outbound entry.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub kind: OutboundKind,
    pub text: String,
    /// Name color the message wants to be rendered in.
    pub color: ChatColor,
    pub sender: UserRecord,
    pub at: DateTime<Utc>,
}

/// A channel the bot has joined.
///
/// Producers append to the queue from any task; the owning supervisor's
/// `tick` is the only consumer. Inbound handlers run as independent spawned
/// tasks and must never hold the gate lock across an await.
pub struct ChannelSession {
    record: ChannelRecord,
    key: String,
    bot: BotRecord,
    transport: Arc<dyn ChatTransport>,
    directory: Arc<dyn Directory>,
    queue: BoundedQueue<OutboundMessage>,
    gate: Mutex<ColorSyncGate>,
    bus: EventBus,
    left: AtomicBool,
}

impl ChannelSession {
    #[must_use]
    pub fn new(
        record: ChannelRecord,
        bot: BotRecord,
        transport: Arc<dyn ChatTransport>,
        directory: Arc<dyn Directory>,
        config: &BotConfig,
    ) -> Self {
        let key = channel_key(&record.name);
        Self {
            record,
            key,
            bot,
            transport,
            directory,
            queue: BoundedQueue::new(config.max_queue_len),
            gate: Mutex::new(ColorSyncGate::new(
                ChatColor::default(),
                config.color_confirm_timeout,
            )),
            bus: EventBus::default(),
            left: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn record(&self) -> &ChannelRecord {
        &self.record
    }

    /// Normalized channel name, the identity within one bot.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub(crate) fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Entries waiting in the outbound queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// The bot's last platform-confirmed name color in this channel.
    #[must_use]
    pub fn confirmed_color(&self) -> ChatColor {
        self.gate_lock().confirmed()
    }

    /// Whether the transport currently reports this channel as joined.
    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.transport.is_connected()
            && self
                .transport
                .joined_channels()
                .iter()
                .any(|c| channel_key(c) == self.key)
    }

    pub fn enqueue_chat(&self, text: impl Into<String>, color: ChatColor) {
        self.enqueue(OutboundKind::Chat, text.into(), color);
    }

    pub fn enqueue_command(&self, text: impl Into<String>, color: ChatColor) {
        self.enqueue(OutboundKind::Command, text.into(), color);
    }

    fn enqueue(&self, kind: OutboundKind, text: String, color: ChatColor) {
        self.queue.push(OutboundMessage {
            id: Uuid::new_v4(),
            kind,
            text,
            color,
            sender: self.bot.user.clone(),
            at: Utc::now(),
        });
    }

    /// Send right now, skipping the queue and the rate budget.
    ///
    /// Refused (returns `false`) unless the channel is currently joined;
    /// never falls back to queuing.
    pub async fn send_immediate(&self, text: &str) -> bool {
        self.transmit_immediate(OutboundKind::Chat, text).await
    }

    /// [`Self::send_immediate`] with the command action prefix.
    pub async fn send_command_immediate(&self, text: &str) -> bool {
        self.transmit_immediate(OutboundKind::Command, text).await
    }

    async fn transmit_immediate(&self, kind: OutboundKind, text: &str) -> bool {
        if !self.is_joined() {
            debug!(channel = %self.key, "immediate send refused; channel not joined");
            return false;
        }
        let message = OutboundMessage {
            id: Uuid::new_v4(),
            kind,
            text: text.to_owned(),
            color: self.confirmed_color(),
            sender: self.bot.user.clone(),
            at: Utc::now(),
        };
        self.transmit(message).await
    }

    /// Serve this channel's share of one scheduler tick: at most one unit of
    /// work, which is either initiating a color change or delivering the
    /// head message.
    pub async fn tick(&self) {
        // An overdue color wait unblocks the queue before anything else.
        let expired = self.gate_lock().expire_overdue();
        if let Some(color) = expired {
            self.emit_error(
                ErrorKind::ColorChange,
                format!("no confirmation for {color} within the configured wait; adopting it"),
            );
        }
        if self.gate_lock().is_awaiting() {
            return;
        }

        let Some(head) = self.queue.peek() else {
            return;
        };

        let confirmed = self.gate_lock().confirmed();
        if head.color != confirmed {
            // The change must land before the message that asked for it, so
            // nothing is dequeued on this tick.
            self.gate_lock().begin(head.color);
            match self.transport.set_color(&self.key, head.color).await {
                Ok(()) => self.bus.publish(FleetEvent::ColorChange {
                    bot: self.bot.clone(),
                    channel: self.record.clone(),
                    color: head.color,
                    phase: ColorChangePhase::Initiated,
                }),
                Err(e) => {
                    // Reopen the gate so the next tick retries the change.
                    self.gate_lock().abort();
                    self.emit_error(ErrorKind::ColorChange, format!("{e:#}"));
                }
            }
            return;
        }

        // The head may have been evicted by a producer overflow since the
        // peek; matching on identity keeps us from delivering a different
        // message than the one examined.
        let Some(message) = self.queue.pop_if(|m| m.id == head.id) else {
            return;
        };
        self.transmit(message).await;
    }

    /// Put one message on the wire. The message is consumed either way; a
    /// failure is reported once and not retried.
    async fn transmit(&self, message: OutboundMessage) -> bool {
        let (error_kind, wire_text) = match message.kind {
            OutboundKind::Chat => (ErrorKind::SendChat, message.text.clone()),
            OutboundKind::Command => (ErrorKind::SendCommand, format!("/me {}", message.text)),
        };
        match self.transport.send(&self.key, &wire_text).await {
            Ok(()) => {
                self.bus.publish(self.sent_event(message));
                true
            }
            Err(e) => {
                self.emit_error(error_kind, format!("{e:#}"));
                false
            }
        }
    }

    fn sent_event(&self, message: OutboundMessage) -> FleetEvent {
        let chat = ChatMessage {
            id: message.id,
            channel: self.record.clone(),
            sender: message.sender,
            text: message.text,
            color: Some(message.color.hex().to_owned()),
            direction: Direction::Sent,
            at: Utc::now(),
        };
        match message.kind {
            OutboundKind::Chat => FleetEvent::ChatMessage { message: chat },
            OutboundKind::Command => FleetEvent::CommandMessage { message: chat },
        }
    }

    /// Leave the channel. Idempotent; transport failures during teardown are
    /// logged rather than reported, since the connection may already be gone.
    pub async fn leave(&self) {
        if self.left.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.transport.leave(&self.key).await {
            debug!(channel = %self.key, error = %e, "leave failed; transport already gone");
        }
    }

    // ── Inbound handlers ────────────────────────────────────────────────

    pub(crate) async fn on_message(
        &self,
        platform_id: Option<String>,
        username: String,
        display_name: String,
        text: String,
        color: Option<String>,
    ) {
        match self
            .resolve_present_user(platform_id.as_deref(), &username, &display_name)
            .await
        {
            Ok(sender) => self.bus.publish(FleetEvent::ChatMessage {
                message: ChatMessage {
                    id: Uuid::new_v4(),
                    channel: self.record.clone(),
                    sender,
                    text,
                    color,
                    direction: Direction::Received,
                    at: Utc::now(),
                },
            }),
            Err(e) => self.emit_error(ErrorKind::ReceiveChat, format!("{e:#}")),
        }
    }

    pub(crate) async fn on_user_joined(&self, username: &str) {
        match self.resolve_present_user(None, username, username).await {
            Ok(user) => self.bus.publish(FleetEvent::ChannelPresence {
                channel: self.record.clone(),
                user,
                present: true,
            }),
            Err(e) => self.emit_error(ErrorKind::Directory, format!("{e:#}")),
        }
    }

    pub(crate) async fn on_user_left(&self, username: &str) {
        let key = channel_key(username);
        let result: anyhow::Result<Option<UserRecord>> = async {
            let mut present = self.directory.users_present(&self.record).await?;
            let Some(pos) = present.iter().position(|u| channel_key(&u.username) == key) else {
                return Ok(None);
            };
            let user = present.remove(pos);
            self.directory
                .replace_users_present(&self.record, present)
                .await?;
            Ok(Some(user))
        }
        .await;
        match result {
            Ok(Some(user)) => self.bus.publish(FleetEvent::ChannelPresence {
                channel: self.record.clone(),
                user,
                present: false,
            }),
            // Leaving without ever having been seen is not an event.
            Ok(None) => {}
            Err(e) => self.emit_error(ErrorKind::Directory, format!("{e:#}")),
        }
    }

    pub(crate) fn on_joined(&self) {
        self.bus.publish(FleetEvent::ChannelConnection {
            bot: self.bot.clone(),
            channel: self.record.clone(),
            connected: true,
        });
    }

    pub(crate) fn on_left(&self) {
        self.bus.publish(FleetEvent::ChannelConnection {
            bot: self.bot.clone(),
            channel: self.record.clone(),
            connected: false,
        });
    }

    pub(crate) fn on_color_confirmed(&self) {
        let confirmed = self.gate_lock().confirm();
        if let Some(color) = confirmed {
            self.bus.publish(FleetEvent::ColorChange {
                bot: self.bot.clone(),
                channel: self.record.clone(),
                color,
                phase: ColorChangePhase::Confirmed,
            });
        }
    }

    /// Report newly detected followers. Fetching them is the embedder's
    /// concern; this only publishes the event.
    pub fn follows_received(&self, followers: Vec<UserRecord>) {
        self.bus.publish(FleetEvent::Follow {
            channel: self.record.clone(),
            followers,
        });
    }

    /// Find the acting user in the channel's presence set, falling back to a
    /// directory lookup and finally to creating the record, keeping both the
    /// stored record and the presence set in step with what the platform
    /// reported.
    async fn resolve_present_user(
        &self,
        platform_id: Option<&str>,
        username: &str,
        display_name: &str,
    ) -> anyhow::Result<UserRecord> {
        let key = channel_key(username);
        let mut present = self.directory.users_present(&self.record).await?;

        if let Some(pos) = present.iter().position(|u| channel_key(&u.username) == key) {
            let user = present[pos].clone();
            if !user.drifted_from(platform_id, username, display_name) {
                return Ok(user);
            }
            let user = self
                .directory
                .update_user(refreshed(user, platform_id, username, display_name))
                .await?;
            present[pos] = user.clone();
            self.directory
                .replace_users_present(&self.record, present)
                .await?;
            return Ok(user);
        }

        let looked_up = match platform_id {
            Some(id) => self.directory.user_by_platform_id(id).await?,
            None => self.directory.user_by_username(&key).await?,
        };
        let user = match looked_up {
            Some(user) if user.drifted_from(platform_id, username, display_name) => {
                self.directory
                    .update_user(refreshed(user, platform_id, username, display_name))
                    .await?
            }
            Some(user) => user,
            None => {
                self.directory
                    .create_user(UserRecord::new(
                        platform_id.map(str::to_owned),
                        username,
                        display_name,
                    ))
                    .await?
            }
        };
        present.push(user.clone());
        self.directory
            .replace_users_present(&self.record, present)
            .await?;
        Ok(user)
    }

    fn emit_error(&self, kind: ErrorKind, detail: impl Into<String>) {
        self.bus.publish(FleetEvent::Error {
            error: ErrorEvent {
                kind,
                bot: Some(self.bot.clone()),
                channel: Some(self.record.clone()),
                detail: detail.into(),
            },
        });
    }

    fn gate_lock(&self) -> MutexGuard<'_, ColorSyncGate> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn refreshed(
    mut user: UserRecord,
    platform_id: Option<&str>,
    username: &str,
    display_name: &str,
) -> UserRecord {
    if let Some(id) = platform_id {
        user.platform_id = Some(id.to_owned());
    }
    user.username = username.to_owned();
    user.display_name = display_name.to_owned();
    user
}
