//! Typed event catalogue and the per-layer publish/subscribe bus.
//!
//! Every layer (channel session, channel supervisor, bot session, fleet)
//! owns one [`EventBus`]. A parent wires exactly one forwarder per child it
//! creates and cancels it on teardown, so subscription bookkeeping stays
//! deterministic all the way up.

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    tokio::sync::broadcast,
    tokio_util::sync::CancellationToken,
    tracing::{trace, warn},
    uuid::Uuid,
};

use shoal_common::{BotRecord, ChannelRecord, ChatColor, UserRecord};

/// Whether a message travelled out of or into the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
}

/// Which half of the color handshake an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorChangePhase {
    Initiated,
    Confirmed,
}

/// A chat or command message as observed on the fleet bus.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub channel: ChannelRecord,
    pub sender: UserRecord,
    pub text: String,
    /// Hex name color: the sender's reported color for received traffic,
    /// the bot's confirmed color for sent traffic.
    pub color: Option<String>,
    pub direction: Direction,
    pub at: DateTime<Utc>,
}

/// A whisper as observed on the fleet bus.
#[derive(Debug, Clone, Serialize)]
pub struct Whisper {
    pub id: Uuid,
    /// Recipient for sent whispers, sender for received ones.
    pub user: UserRecord,
    pub text: String,
    pub direction: Direction,
    pub at: DateTime<Utc>,
}

/// Operation tag carried by every error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectBot,
    DisconnectBot,
    JoinChannel,
    LeaveChannel,
    SendChat,
    SendCommand,
    SendWhisper,
    ReceiveChat,
    ReceiveWhisper,
    Directory,
    ColorChange,
    Follow,
}

/// A caught failure, scoped to the bot/channel it happened in.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub bot: Option<BotRecord>,
    pub channel: Option<ChannelRecord>,
    pub detail: String,
}

/// Everything the fleet reports to its subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FleetEvent {
    BotConnection {
        bot: BotRecord,
        connected: bool,
    },
    ChannelConnection {
        bot: BotRecord,
        channel: ChannelRecord,
        connected: bool,
    },
    ChannelPresence {
        channel: ChannelRecord,
        user: UserRecord,
        present: bool,
    },
    ChatMessage {
        message: ChatMessage,
    },
    CommandMessage {
        message: ChatMessage,
    },
    Whisper {
        whisper: Whisper,
    },
    ColorChange {
        bot: BotRecord,
        channel: ChannelRecord,
        color: ChatColor,
        phase: ColorChangePhase,
    },
    Follow {
        channel: ChannelRecord,
        followers: Vec<UserRecord>,
    },
    Error {
        error: ErrorEvent,
    },
}

impl FleetEvent {
    /// Stable tag for logging and routing.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BotConnection { .. } => "bot_connection",
            Self::ChannelConnection { .. } => "channel_connection",
            Self::ChannelPresence { .. } => "channel_presence",
            Self::ChatMessage { .. } => "chat_message",
            Self::CommandMessage { .. } => "command_message",
            Self::Whisper { .. } => "whisper",
            Self::ColorChange { .. } => "color_change",
            Self::Follow { .. } => "follow",
            Self::Error { .. } => "error",
        }
    }
}

/// Broadcast bus carrying [`FleetEvent`]s for one layer.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }

    /// Publish to whoever is listening. Publishing with no subscribers is
    /// not an error; the event is simply dropped.
    pub fn publish(&self, event: FleetEvent) {
        trace!(kind = event.kind(), "fleet event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Re-publish everything `from` emits onto `to` until `cancel` fires.
///
/// One forwarder pairs with one child bus; cancelling the token is the
/// unsubscribe. Events already published when the cancel lands are drained
/// first, so teardown does not drop a disconnect notice in flight.
pub fn forward_events(from: &EventBus, to: &EventBus, cancel: CancellationToken) {
    let mut rx = from.subscribe();
    let to = to.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Ok(event) => to.publish(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "event forwarder lagged; dropping events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                () = cancel.cancelled() => {
                    while let Ok(event) = rx.try_recv() {
                        to.publish(event);
                    }
                    break;
                }
            }
        }
    });
}
