//! Seam to the real-time chat wire client.
//!
//! The engine never speaks the wire protocol itself; it drives a
//! [`ChatTransport`] handed out by a [`Connector`] and reacts to the
//! [`TransportEvent`] stream returned alongside it.

use std::sync::Arc;

use {anyhow::Result, async_trait::async_trait, tokio::sync::mpsc};

use shoal_common::{ChatColor, Credentials};

/// Inbound platform callbacks, in arrival order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The wire session is up and authenticated.
    Connected,
    /// The wire session dropped. The stream usually closes right after.
    Disconnected,
    /// The platform acknowledged a channel join.
    JoinedChannel { channel: String },
    /// The platform acknowledged a channel part.
    LeftChannel { channel: String },
    MessageReceived {
        channel: String,
        /// Stable platform-assigned sender ID, when the platform sends one.
        platform_id: Option<String>,
        username: String,
        display_name: String,
        text: String,
        /// Hex name color the platform reported for the sender, if any.
        color: Option<String>,
    },
    WhisperReceived {
        platform_id: Option<String>,
        username: String,
        display_name: String,
        text: String,
    },
    UserJoined { channel: String, username: String },
    UserLeft { channel: String, username: String },
    /// The platform acknowledged a requested name-color change.
    ChatColorChanged { channel: String },
}

impl TransportEvent {
    /// The channel this event is scoped to, for channel-scoped events.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::JoinedChannel { channel }
            | Self::LeftChannel { channel }
            | Self::MessageReceived { channel, .. }
            | Self::UserJoined { channel, .. }
            | Self::UserLeft { channel, .. }
            | Self::ChatColorChanged { channel } => Some(channel),
            Self::Connected | Self::Disconnected | Self::WhisperReceived { .. } => None,
        }
    }
}

/// Receiving half of a connection's inbound event stream.
pub type TransportEventReceiver = mpsc::Receiver<TransportEvent>;

/// One live wire connection.
///
/// Operations are fire-and-forget with a synchronous outcome; asynchronous
/// effects (joins completing, color changes taking hold) come back through
/// the event stream.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn join(&self, channel: &str) -> Result<()>;
    async fn leave(&self, channel: &str) -> Result<()>;
    async fn send(&self, channel: &str, text: &str) -> Result<()>;
    async fn send_whisper(&self, username: &str, text: &str) -> Result<()>;
    async fn set_color(&self, channel: &str, color: ChatColor) -> Result<()>;
    fn is_connected(&self) -> bool;
    fn joined_channels(&self) -> Vec<String>;
}

/// Opens wire connections for a set of credentials.
///
/// Each call yields a fresh transport plus the event stream tied to its
/// lifetime; the stream closing means the connection is gone for good.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<(Arc<dyn ChatTransport>, TransportEventReceiver)>;
}
