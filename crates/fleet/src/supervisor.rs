//! Round-robin scheduling and event routing across one bot's channels.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use {tokio::sync::Mutex, tokio_util::sync::CancellationToken, tracing::debug};

use {
    shoal_common::{BotRecord, channel_key},
    shoal_transport::{ChatTransport, Directory, TransportEvent},
};

use crate::{
    channel::ChannelSession,
    config::BotConfig,
    error::{Error, Result},
    events::{EventBus, forward_events},
};

struct RingEntry {
    session: Arc<ChannelSession>,
    forwarder: CancellationToken,
}

#[derive(Default)]
struct Ring {
    entries: Vec<RingEntry>,
    /// Key of the channel the last tick served; the next scan starts just
    /// after it.
    last_served: Option<String>,
}

/// Owns every [`ChannelSession`] of one bot connection and spreads the
/// shared rate budget across them.
///
/// Each `tick` serves at most one channel, so aggregate cross-channel
/// throughput equals the single-channel budget.
pub struct ChannelSupervisor {
    bot: BotRecord,
    config: BotConfig,
    transport: Arc<dyn ChatTransport>,
    directory: Arc<dyn Directory>,
    ring: Mutex<Ring>,
    ticking: AtomicBool,
    bus: EventBus,
    cancel: CancellationToken,
}

impl ChannelSupervisor {
    #[must_use]
    pub fn new(
        bot: BotRecord,
        config: BotConfig,
        transport: Arc<dyn ChatTransport>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            bot,
            config,
            transport,
            directory,
            ring: Mutex::new(Ring::default()),
            ticking: AtomicBool::new(false),
            bus: EventBus::default(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Join a channel, reusing the existing session for a name already in
    /// the ring. Re-joining a session whose channel dropped re-issues the
    /// wire join.
    pub async fn join(&self, name: &str) -> Result<Arc<ChannelSession>> {
        let key = channel_key(name);
        let mut ring = self.ring.lock().await;

        if let Some(entry) = ring.entries.iter().find(|e| e.session.key() == key) {
            let session = Arc::clone(&entry.session);
            if !session.is_joined() {
                self.transport
                    .join(&key)
                    .await
                    .map_err(|e| Error::transport("join", e))?;
            }
            return Ok(session);
        }

        let record = self
            .directory
            .channel_by_name(&key)
            .await
            .map_err(|e| Error::directory("channel lookup", e))?;
        self.transport
            .join(&key)
            .await
            .map_err(|e| Error::transport("join", e))?;

        let session = Arc::new(ChannelSession::new(
            record,
            self.bot.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.directory),
            &self.config,
        ));
        let forwarder = self.cancel.child_token();
        forward_events(session.bus(), &self.bus, forwarder.clone());
        ring.entries.push(RingEntry {
            session: Arc::clone(&session),
            forwarder,
        });
        Ok(session)
    }

    /// Remove a channel from the ring and dispose it. Returns whether it was
    /// present.
    pub async fn leave(&self, name: &str) -> bool {
        let key = channel_key(name);
        let entry = {
            let mut ring = self.ring.lock().await;
            let Some(pos) = ring.entries.iter().position(|e| e.session.key() == key) else {
                return false;
            };
            ring.entries.remove(pos)
        };
        entry.session.leave().await;
        entry.forwarder.cancel();
        true
    }

    /// Serve at most one channel: the first one past the last-served
    /// position with pending work. Returns whether any channel was served.
    ///
    /// An invocation that starts while a prior one is still executing is
    /// dropped, not queued.
    pub async fn tick(&self) -> bool {
        if self
            .ticking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let served = self.tick_once().await;
        self.ticking.store(false, Ordering::Release);
        served
    }

    async fn tick_once(&self) -> bool {
        // Work on an Arc snapshot: a join or leave landing mid-tick cannot
        // disturb this scan.
        let (sessions, start) = {
            let ring = self.ring.lock().await;
            let start = ring
                .last_served
                .as_ref()
                .and_then(|served| {
                    ring.entries
                        .iter()
                        .position(|e| e.session.key() == served.as_str())
                })
                .map_or(0, |pos| pos + 1);
            let sessions: Vec<Arc<ChannelSession>> = ring
                .entries
                .iter()
                .map(|e| Arc::clone(&e.session))
                .collect();
            (sessions, start)
        };
        if sessions.is_empty() {
            return false;
        }
        for offset in 0..sessions.len() {
            let session = &sessions[(start + offset) % sessions.len()];
            if session.pending() > 0 {
                session.tick().await;
                self.ring.lock().await.last_served = Some(session.key().to_owned());
                return true;
            }
        }
        false
    }

    /// Hand a channel-scoped transport event to the owning session. Handlers
    /// run as independent tasks so a slow directory call cannot stall the
    /// event pump.
    pub async fn route(&self, event: TransportEvent) {
        let Some(channel) = event.channel() else {
            return;
        };
        let Some(session) = self.find(channel).await else {
            debug!(channel, "transport event for unknown channel dropped");
            return;
        };
        tokio::spawn(async move {
            match event {
                TransportEvent::MessageReceived {
                    platform_id,
                    username,
                    display_name,
                    text,
                    color,
                    ..
                } => {
                    session
                        .on_message(platform_id, username, display_name, text, color)
                        .await;
                }
                TransportEvent::UserJoined { username, .. } => {
                    session.on_user_joined(&username).await;
                }
                TransportEvent::UserLeft { username, .. } => {
                    session.on_user_left(&username).await;
                }
                TransportEvent::JoinedChannel { .. } => session.on_joined(),
                TransportEvent::LeftChannel { .. } => session.on_left(),
                TransportEvent::ChatColorChanged { .. } => session.on_color_confirmed(),
                TransportEvent::Connected
                | TransportEvent::Disconnected
                | TransportEvent::WhisperReceived { .. } => {}
            }
        });
    }

    /// Look up a session by (normalized) channel name.
    pub async fn find(&self, name: &str) -> Option<Arc<ChannelSession>> {
        let key = channel_key(name);
        let ring = self.ring.lock().await;
        ring.entries
            .iter()
            .find(|e| e.session.key() == key)
            .map(|e| Arc::clone(&e.session))
    }

    pub async fn channels(&self) -> Vec<Arc<ChannelSession>> {
        let ring = self.ring.lock().await;
        ring.entries
            .iter()
            .map(|e| Arc::clone(&e.session))
            .collect()
    }

    pub async fn channel_count(&self) -> usize {
        self.ring.lock().await.entries.len()
    }

    /// Leave every channel and cancel every forwarder. Safe to call more
    /// than once.
    pub async fn dispose(&self) {
        let entries = {
            let mut ring = self.ring.lock().await;
            ring.last_served = None;
            std::mem::take(&mut ring.entries)
        };
        for entry in entries {
            entry.session.leave().await;
            entry.forwarder.cancel();
        }
        self.cancel.cancel();
    }
}
