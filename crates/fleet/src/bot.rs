//! One bot connection: the periodic scheduler that spends the rate budget,
//! the whisper queue, and the connect/reconnect lifecycle.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    chrono::{DateTime, Utc},
    tokio::time::MissedTickBehavior,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use {
    shoal_common::{BotRecord, Credentials, UserRecord, channel_key},
    shoal_transport::{ChatTransport, Connector, Directory, TransportEvent, TransportEventReceiver},
};

use crate::{
    channel::ChannelSession,
    config::BotConfig,
    error::{Error, Result},
    events::{Direction, ErrorEvent, ErrorKind, EventBus, FleetEvent, Whisper, forward_events},
    queue::BoundedQueue,
    supervisor::ChannelSupervisor,
};

/// One pending outbound whisper.
#[derive(Debug, Clone)]
pub struct WhisperEntry {
    pub id: Uuid,
    pub to: UserRecord,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Everything tied to one live wire connection. Replaced wholesale on each
/// (re)connect.
struct Runtime {
    transport: Arc<dyn ChatTransport>,
    supervisor: Arc<ChannelSupervisor>,
    /// Parent token of the pump, the scheduler, and the bus forwarder.
    cancel: CancellationToken,
}

/// Which side of the shared budget a scheduler firing serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Service {
    Whisper,
    Channels,
}

/// Strict whisper/channel alternation: a firing that follows a channel pass
/// goes to whispers when any are pending, and every channel pass counts
/// whether or not it delivered, so neither side can starve the other.
fn next_service(previous_served_channels: bool, whispers_pending: bool) -> Service {
    if previous_served_channels && whispers_pending {
        Service::Whisper
    } else {
        Service::Channels
    }
}

/// One authenticated bot identity and its connection lifecycle.
pub struct BotSession {
    record: BotRecord,
    credentials: Credentials,
    config: BotConfig,
    connector: Arc<dyn Connector>,
    directory: Arc<dyn Directory>,
    bus: EventBus,
    whispers: BoundedQueue<WhisperEntry>,
    runtime: tokio::sync::Mutex<Option<Runtime>>,
    /// Token the pending-reconnect task watches; replaced on every explicit
    /// connect/disconnect so stale tasks die.
    reconnect: std::sync::Mutex<CancellationToken>,
    /// Cleared by an explicit disconnect; an unsolicited drop only schedules
    /// a reconnect while this is set.
    reconnect_armed: AtomicBool,
}

impl BotSession {
    #[must_use]
    pub fn new(
        record: BotRecord,
        credentials: Credentials,
        config: BotConfig,
        connector: Arc<dyn Connector>,
        directory: Arc<dyn Directory>,
    ) -> Arc<Self> {
        let max_queue_len = config.max_queue_len;
        Arc::new(Self {
            record,
            credentials,
            config,
            connector,
            directory,
            bus: EventBus::default(),
            whispers: BoundedQueue::new(max_queue_len),
            runtime: tokio::sync::Mutex::new(None),
            reconnect: std::sync::Mutex::new(CancellationToken::new()),
            reconnect_armed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn record(&self) -> &BotRecord {
        &self.record
    }

    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<FleetEvent> {
        self.bus.subscribe()
    }

    #[must_use]
    pub(crate) fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub async fn is_connected(&self) -> bool {
        self.runtime
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| r.transport.is_connected())
    }

    /// Open a fresh connection, replacing whatever was live. Idempotent; a
    /// failed attempt tears nothing new down and surfaces as an error event.
    pub async fn connect(self: &Arc<Self>) {
        self.reconnect_armed.store(true, Ordering::Release);
        self.replace_reconnect_token();
        self.attempt_connect().await;
    }

    /// Close the connection and stop any pending reconnect. Idempotent.
    pub async fn disconnect(&self) {
        self.reconnect_armed.store(false, Ordering::Release);
        self.replace_reconnect_token();
        self.teardown(true).await;
    }

    /// Full teardown: [`Self::disconnect`] plus cascading channel disposal
    /// (which `disconnect` already performs). Safe to call more than once.
    pub async fn dispose(&self) {
        self.disconnect().await;
    }

    // ── Channels ────────────────────────────────────────────────────────

    /// Join a channel on the live connection (idempotent per channel name).
    pub async fn join_channel(&self, name: &str) -> Result<Arc<ChannelSession>> {
        let Some(supervisor) = self.supervisor().await else {
            self.emit_error(ErrorKind::JoinChannel, "bot is not connected");
            return Err(Error::NotConnected);
        };
        match supervisor.join(name).await {
            Ok(session) => Ok(session),
            Err(e) => {
                self.emit_error(ErrorKind::JoinChannel, e.to_string());
                Err(e)
            }
        }
    }

    /// Leave a channel. Returns whether it was joined.
    pub async fn leave_channel(&self, name: &str) -> bool {
        let Some(supervisor) = self.supervisor().await else {
            return false;
        };
        supervisor.leave(name).await
    }

    pub async fn channels(&self) -> Vec<Arc<ChannelSession>> {
        match self.supervisor().await {
            Some(supervisor) => supervisor.channels().await,
            None => Vec::new(),
        }
    }

    pub async fn channel_count(&self) -> usize {
        match self.supervisor().await {
            Some(supervisor) => supervisor.channel_count().await,
            None => 0,
        }
    }

    // ── Whispers ────────────────────────────────────────────────────────

    /// Queue a whisper for rate-limited delivery.
    pub fn send_whisper(&self, to: UserRecord, text: impl Into<String>) {
        self.whispers.push(WhisperEntry {
            id: Uuid::new_v4(),
            to,
            text: text.into(),
            at: Utc::now(),
        });
    }

    /// Entries waiting in the whisper queue.
    #[must_use]
    pub fn pending_whispers(&self) -> usize {
        self.whispers.len()
    }

    /// Send a whisper right now, skipping the queue and the rate budget.
    /// Refused (returns `false`) unless connected; never falls back to
    /// queuing.
    pub async fn send_whisper_immediate(&self, to: &UserRecord, text: &str) -> bool {
        let transport = {
            self.runtime
                .lock()
                .await
                .as_ref()
                .map(|r| Arc::clone(&r.transport))
        };
        let Some(transport) = transport.filter(|t| t.is_connected()) else {
            debug!(bot = %self.record.user.username, "immediate whisper refused; not connected");
            return false;
        };
        match transport
            .send_whisper(&channel_key(&to.username), text)
            .await
        {
            Ok(()) => {
                self.bus.publish(FleetEvent::Whisper {
                    whisper: Whisper {
                        id: Uuid::new_v4(),
                        user: to.clone(),
                        text: text.to_owned(),
                        direction: Direction::Sent,
                        at: Utc::now(),
                    },
                });
                true
            }
            Err(e) => {
                self.emit_error(ErrorKind::SendWhisper, format!("{e:#}"));
                false
            }
        }
    }

    // ── Connection internals ────────────────────────────────────────────

    fn attempt_connect_boxed(self: &Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.attempt_connect())
    }

    async fn attempt_connect(self: &Arc<Self>) {
        self.teardown(false).await;
        match self.connector.connect(&self.credentials).await {
            Ok((transport, events)) => {
                self.install_runtime(transport, events).await;
                info!(bot = %self.record.user.username, "transport session opened");
            }
            Err(e) => {
                warn!(bot = %self.record.user.username, error = %format!("{e:#}"), "connect attempt failed");
                self.emit_error(ErrorKind::ConnectBot, format!("{e:#}"));
            }
        }
    }

    async fn install_runtime(
        self: &Arc<Self>,
        transport: Arc<dyn ChatTransport>,
        events: TransportEventReceiver,
    ) {
        let cancel = CancellationToken::new();
        let supervisor = Arc::new(ChannelSupervisor::new(
            self.record.clone(),
            self.config.clone(),
            Arc::clone(&transport),
            Arc::clone(&self.directory),
        ));
        forward_events(supervisor.bus(), &self.bus, cancel.child_token());

        let pump_cancel = cancel.child_token();
        {
            let mut runtime = self.runtime.lock().await;
            *runtime = Some(Runtime {
                transport: Arc::clone(&transport),
                supervisor: Arc::clone(&supervisor),
                cancel,
            });
        }

        let bot = Arc::clone(self);
        tokio::spawn(async move {
            bot.pump(events, transport, supervisor, pump_cancel).await;
        });
    }

    /// Read the transport's inbound stream for one connection's lifetime.
    /// Each event is handled off this task so nothing here blocks the
    /// stream.
    async fn pump(
        self: Arc<Self>,
        mut events: TransportEventReceiver,
        transport: Arc<dyn ChatTransport>,
        supervisor: Arc<ChannelSupervisor>,
        cancel: CancellationToken,
    ) {
        let mut scheduler_started = false;
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                // The transport dropped its stream without saying goodbye.
                self.unsolicited_disconnect().await;
                break;
            };
            match event {
                TransportEvent::Connected => {
                    if !scheduler_started {
                        scheduler_started = true;
                        self.start_scheduler(
                            Arc::clone(&transport),
                            Arc::clone(&supervisor),
                            cancel.child_token(),
                        );
                    }
                    self.bus.publish(FleetEvent::BotConnection {
                        bot: self.record.clone(),
                        connected: true,
                    });
                }
                TransportEvent::Disconnected => {
                    self.unsolicited_disconnect().await;
                    break;
                }
                TransportEvent::WhisperReceived {
                    platform_id,
                    username,
                    display_name,
                    text,
                } => {
                    let bot = Arc::clone(&self);
                    tokio::spawn(async move {
                        bot.on_whisper_received(platform_id, username, display_name, text)
                            .await;
                    });
                }
                other => supervisor.route(other).await,
            }
        }
        debug!(bot = %self.record.user.username, "event pump stopped");
    }

    fn start_scheduler(
        self: &Arc<Self>,
        transport: Arc<dyn ChatTransport>,
        supervisor: Arc<ChannelSupervisor>,
        cancel: CancellationToken,
    ) {
        let bot = Arc::clone(self);
        let period = self.config.rate.tick_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The whisper side goes first: the flag starts as if a channel
            // pass just happened.
            let mut served_channels = true;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match next_service(served_channels, !bot.whispers.is_empty()) {
                    Service::Whisper => {
                        served_channels = false;
                        bot.deliver_whisper(&transport).await;
                    }
                    Service::Channels => {
                        served_channels = true;
                        supervisor.tick().await;
                    }
                }
            }
            debug!(bot = %bot.record.user.username, "scheduler stopped");
        });
    }

    /// Put one queued whisper on the wire. The entry is consumed either way;
    /// a failure is reported once and not retried.
    async fn deliver_whisper(&self, transport: &Arc<dyn ChatTransport>) {
        let Some(entry) = self.whispers.pop() else {
            return;
        };
        match transport
            .send_whisper(&channel_key(&entry.to.username), &entry.text)
            .await
        {
            Ok(()) => self.bus.publish(FleetEvent::Whisper {
                whisper: Whisper {
                    id: entry.id,
                    user: entry.to,
                    text: entry.text,
                    direction: Direction::Sent,
                    at: Utc::now(),
                },
            }),
            Err(e) => self.emit_error(ErrorKind::SendWhisper, format!("{e:#}")),
        }
    }

    async fn on_whisper_received(
        &self,
        platform_id: Option<String>,
        username: String,
        display_name: String,
        text: String,
    ) {
        match self
            .resolve_user(platform_id.as_deref(), &username, &display_name)
            .await
        {
            Ok(user) => self.bus.publish(FleetEvent::Whisper {
                whisper: Whisper {
                    id: Uuid::new_v4(),
                    user,
                    text,
                    direction: Direction::Received,
                    at: Utc::now(),
                },
            }),
            Err(e) => self.emit_error(ErrorKind::ReceiveWhisper, format!("{e:#}")),
        }
    }

    async fn resolve_user(
        &self,
        platform_id: Option<&str>,
        username: &str,
        display_name: &str,
    ) -> anyhow::Result<UserRecord> {
        let found = self
            .directory
            .user_by_username(&channel_key(username))
            .await?;
        match found {
            Some(mut user) => {
                if user.drifted_from(platform_id, username, display_name) {
                    if let Some(id) = platform_id {
                        user.platform_id = Some(id.to_owned());
                    }
                    user.username = username.to_owned();
                    user.display_name = display_name.to_owned();
                    user = self.directory.update_user(user).await?;
                }
                Ok(user)
            }
            None => {
                self.directory
                    .create_user(UserRecord::new(
                        platform_id.map(str::to_owned),
                        username,
                        display_name,
                    ))
                    .await
            }
        }
    }

    /// React to the connection dropping out from under us: tear down, tell
    /// subscribers, and schedule reconnect attempts at a fixed interval
    /// until one sticks or an explicit disconnect lands.
    async fn unsolicited_disconnect(self: &Arc<Self>) {
        info!(bot = %self.record.user.username, "transport disconnected");
        self.teardown(true).await;

        let Some(delay) = self.config.reconnect_interval.filter(|d| !d.is_zero()) else {
            return;
        };
        // Capture the token before checking the flag: if a disconnect raced
        // in, either the flag is already cleared or this token is already
        // cancelled, and either way no reconnect survives.
        let guard = self.current_reconnect_token();
        if !self.reconnect_armed.load(Ordering::Acquire) {
            return;
        }
        let bot = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = guard.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
                info!(bot = %bot.record.user.username, "reconnecting");
                bot.attempt_connect_boxed().await;
                if bot.runtime.lock().await.is_some() {
                    return;
                }
            }
        });
    }

    /// Drop the live runtime, stopping the scheduler, the pump, and every
    /// channel session. Emits the disconnect event only when something was
    /// actually live, so repeated calls stay quiet.
    async fn teardown(&self, emit: bool) {
        let Some(runtime) = self.runtime.lock().await.take() else {
            return;
        };
        runtime.cancel.cancel();
        runtime.supervisor.dispose().await;
        if emit {
            self.bus.publish(FleetEvent::BotConnection {
                bot: self.record.clone(),
                connected: false,
            });
        }
    }

    async fn supervisor(&self) -> Option<Arc<ChannelSupervisor>> {
        self.runtime
            .lock()
            .await
            .as_ref()
            .map(|r| Arc::clone(&r.supervisor))
    }

    fn current_reconnect_token(&self) -> CancellationToken {
        self.reconnect
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn replace_reconnect_token(&self) {
        let mut token = self.reconnect.lock().unwrap_or_else(|e| e.into_inner());
        token.cancel();
        *token = CancellationToken::new();
    }

    fn emit_error(&self, kind: ErrorKind, detail: impl Into<String>) {
        self.bus.publish(FleetEvent::Error {
            error: ErrorEvent {
                kind,
                bot: Some(self.record.clone()),
                channel: None,
                detail: detail.into(),
            },
        });
    }
}
