//! Integration tests for the shoal-fleet crate, driven through a scripted
//! mock transport.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    tokio::sync::{broadcast, mpsc},
};

use {
    shoal_common::{BotRecord, ChatColor, Credentials, UserRecord},
    shoal_fleet::{
        BotConfig, BotSession, ChannelSupervisor, ColorChangePhase, Direction, ErrorKind,
        FleetEvent, FleetSupervisor, RateBudget,
    },
    shoal_transport::{
        ChatTransport, Connector, Directory, MemoryDirectory, TransportEvent,
        TransportEventReceiver,
    },
};

// ── Mock transport ──────────────────────────────────────────────────────────

/// One recorded wire operation, in global order.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    Send { channel: String, text: String },
    Whisper { to: String, text: String },
}

/// Scripted wire connection: records everything, acks joins, and lets tests
/// inject inbound events.
struct MockTransport {
    connected: AtomicBool,
    fail_sends: AtomicBool,
    send_delay: Mutex<Option<Duration>>,
    joined: Mutex<Vec<String>>,
    join_calls: Mutex<Vec<String>>,
    colors: Mutex<Vec<(String, ChatColor)>>,
    ops: Mutex<Vec<Op>>,
    events: mpsc::Sender<TransportEvent>,
}

impl MockTransport {
    fn new(events: mpsc::Sender<TransportEvent>) -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            send_delay: Mutex::new(None),
            joined: Mutex::new(Vec::new()),
            join_calls: Mutex::new(Vec::new()),
            colors: Mutex::new(Vec::new()),
            ops: Mutex::new(Vec::new()),
            events,
        })
    }

    async fn inject(&self, event: TransportEvent) {
        let _ = self.events.send(event).await;
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    fn set_send_delay(&self, delay: Option<Duration>) {
        *self.send_delay.lock().unwrap() = delay;
    }

    /// Simulate the platform silently dropping a channel.
    fn drop_channel(&self, channel: &str) {
        self.joined.lock().unwrap().retain(|c| c != channel);
    }

    fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    fn sends(&self, channel: &str) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Send { channel: c, text } if c == channel => Some(text),
                _ => None,
            })
            .collect()
    }

    fn join_calls(&self) -> Vec<String> {
        self.join_calls.lock().unwrap().clone()
    }

    fn colors(&self) -> Vec<(String, ChatColor)> {
        self.colors.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn join(&self, channel: &str) -> Result<()> {
        self.join_calls.lock().unwrap().push(channel.to_owned());
        {
            let mut joined = self.joined.lock().unwrap();
            if !joined.iter().any(|c| c == channel) {
                joined.push(channel.to_owned());
            }
        }
        self.inject(TransportEvent::JoinedChannel {
            channel: channel.to_owned(),
        })
        .await;
        Ok(())
    }

    async fn leave(&self, channel: &str) -> Result<()> {
        self.drop_channel(channel);
        self.inject(TransportEvent::LeftChannel {
            channel: channel.to_owned(),
        })
        .await;
        Ok(())
    }

    async fn send(&self, channel: &str, text: &str) -> Result<()> {
        let delay = *self.send_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            bail!("wire dropped");
        }
        self.ops.lock().unwrap().push(Op::Send {
            channel: channel.to_owned(),
            text: text.to_owned(),
        });
        Ok(())
    }

    async fn send_whisper(&self, username: &str, text: &str) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            bail!("wire dropped");
        }
        self.ops.lock().unwrap().push(Op::Whisper {
            to: username.to_owned(),
            text: text.to_owned(),
        });
        Ok(())
    }

    async fn set_color(&self, channel: &str, color: ChatColor) -> Result<()> {
        self.colors
            .lock()
            .unwrap()
            .push((channel.to_owned(), color));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn joined_channels(&self) -> Vec<String> {
        self.joined.lock().unwrap().clone()
    }
}

// ── Mock connector ──────────────────────────────────────────────────────────

struct MockConnector {
    fail_connects: AtomicBool,
    attempts: Mutex<Vec<(String, Instant)>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockConnector {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_connects: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
            transports: Mutex::new(Vec::new()),
        })
    }

    fn set_fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }

    fn attempts(&self) -> Vec<(String, Instant)> {
        self.attempts.lock().unwrap().clone()
    }

    fn latest_transport(&self) -> Arc<MockTransport> {
        Arc::clone(self.transports.lock().unwrap().last().expect("no connection made"))
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<(Arc<dyn ChatTransport>, TransportEventReceiver)> {
        self.attempts
            .lock()
            .unwrap()
            .push((credentials.username.clone(), Instant::now()));
        if self.fail_connects.load(Ordering::SeqCst) {
            bail!("platform refused the login");
        }
        let (tx, rx) = mpsc::channel(64);
        let transport = MockTransport::new(tx);
        transport.inject(TransportEvent::Connected).await;
        self.transports.lock().unwrap().push(Arc::clone(&transport));
        Ok((transport, rx))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Budget tuned for tests: one tick every 25ms.
fn fast_config() -> BotConfig {
    BotConfig {
        max_queue_len: 8,
        rate: RateBudget {
            messages_per_window: 10,
            window: Duration::from_millis(250),
            safety_factor: 1.0,
        },
        reconnect_interval: None,
        color_confirm_timeout: None,
    }
}

fn creds() -> Credentials {
    Credentials::new("BotAcct", "oauth:token", "client-1")
}

fn bot_record() -> BotRecord {
    BotRecord::new(UserRecord::new(None, "botacct", "botacct"))
}

async fn fleet_with_bot(
    config: BotConfig,
) -> (FleetSupervisor, Arc<MockConnector>, Arc<BotSession>) {
    let connector = MockConnector::new();
    let directory = Arc::new(MemoryDirectory::new());
    let fleet = FleetSupervisor::new(
        Arc::clone(&connector) as Arc<dyn Connector>,
        directory as Arc<dyn Directory>,
    );
    let bot = fleet.connect_bot(creds(), config).await.unwrap();
    (fleet, connector, bot)
}

/// Transport for driving a `ChannelSupervisor` by hand. The receiver must
/// stay alive so injected acks have somewhere to go.
fn standalone_transport() -> (Arc<MockTransport>, TransportEventReceiver) {
    let (tx, rx) = mpsc::channel(64);
    (MockTransport::new(tx), rx)
}

fn standalone_supervisor(
    config: BotConfig,
) -> (ChannelSupervisor, Arc<MockTransport>, TransportEventReceiver) {
    let (transport, rx) = standalone_transport();
    let directory = Arc::new(MemoryDirectory::new());
    let supervisor = ChannelSupervisor::new(
        bot_record(),
        config,
        Arc::clone(&transport) as Arc<dyn ChatTransport>,
        directory as Arc<dyn Directory>,
    );
    (supervisor, transport, rx)
}

/// Collect fleet events into a shared vec for later assertions.
fn spawn_collector(mut rx: broadcast::Receiver<FleetEvent>) -> Arc<Mutex<Vec<FleetEvent>>> {
    let store = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&store);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => sink.lock().unwrap().push(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    store
}

fn count_events(
    events: &Arc<Mutex<Vec<FleetEvent>>>,
    predicate: impl Fn(&FleetEvent) -> bool,
) -> usize {
    events.lock().unwrap().iter().filter(|e| predicate(e)).count()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

// ── Queued delivery ─────────────────────────────────────────────────────────

#[tokio::test]
async fn queued_messages_drain_in_fifo_order() {
    let (fleet, connector, bot) = fleet_with_bot(fast_config()).await;
    let channel = fleet.join_channel(&bot, "StreamerOne").await.unwrap();
    let transport = connector.latest_transport();

    fleet.send_message(&channel, "one", ChatColor::Blue);
    fleet.send_message(&channel, "two", ChatColor::Blue);
    fleet.send_command(&channel, "waves", ChatColor::Blue);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(transport.sends("streamerone"), vec!["one", "two", "/me waves"]);
    assert_eq!(channel.pending(), 0);

    // The façade resolved the bot's own records on the way in.
    assert!(fleet.user_by_username("BotAcct").await.is_some());

    fleet.dispose().await;
}

#[tokio::test]
async fn queue_overflow_drops_the_oldest_messages() {
    let mut config = fast_config();
    config.max_queue_len = 2;
    // Slow the scheduler right down so nothing drains mid-test.
    config.rate.window = Duration::from_secs(250);
    let (fleet, _connector, bot) = fleet_with_bot(config).await;
    let channel = fleet.join_channel(&bot, "StreamerOne").await.unwrap();

    fleet.send_message(&channel, "one", ChatColor::Blue);
    fleet.send_message(&channel, "two", ChatColor::Blue);
    fleet.send_message(&channel, "three", ChatColor::Blue);
    assert_eq!(channel.pending(), 2);

    fleet.dispose().await;
}

#[tokio::test]
async fn failed_queued_send_is_reported_once_and_dropped() {
    let (fleet, connector, bot) = fleet_with_bot(fast_config()).await;
    let events = spawn_collector(fleet.subscribe());
    let channel = fleet.join_channel(&bot, "StreamerOne").await.unwrap();
    let transport = connector.latest_transport();

    transport.set_fail_sends(true);
    fleet.send_message(&channel, "doomed", ChatColor::Blue);
    settle().await;

    assert!(transport.sends("streamerone").is_empty());
    assert_eq!(channel.pending(), 0, "a failed send is consumed, not retried");
    assert_eq!(
        count_events(&events, |e| matches!(
            e,
            FleetEvent::Error { error } if error.kind == ErrorKind::SendChat
        )),
        1
    );

    // The scheduler survives the failure.
    transport.set_fail_sends(false);
    fleet.send_message(&channel, "alive", ChatColor::Blue);
    settle().await;
    assert_eq!(transport.sends("streamerone"), vec!["alive"]);

    fleet.dispose().await;
}

// ── Color gate ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn color_change_gates_delivery_until_confirmed() {
    let (fleet, connector, bot) = fleet_with_bot(fast_config()).await;
    let events = spawn_collector(fleet.subscribe());
    let channel = fleet.join_channel(&bot, "StreamerOne").await.unwrap();
    let transport = connector.latest_transport();

    fleet.send_message(&channel, "pink!", ChatColor::HotPink);
    settle().await;

    // The change was requested exactly once and nothing was delivered.
    assert_eq!(transport.colors(), vec![("streamerone".into(), ChatColor::HotPink)]);
    assert!(transport.sends("streamerone").is_empty());
    assert_eq!(channel.pending(), 1);
    assert_eq!(
        count_events(&events, |e| matches!(
            e,
            FleetEvent::ColorChange { phase: ColorChangePhase::Initiated, .. }
        )),
        1
    );

    transport
        .inject(TransportEvent::ChatColorChanged {
            channel: "streamerone".into(),
        })
        .await;
    settle().await;

    assert_eq!(transport.sends("streamerone"), vec!["pink!"]);
    assert_eq!(channel.confirmed_color(), ChatColor::HotPink);
    assert_eq!(
        count_events(&events, |e| matches!(
            e,
            FleetEvent::ColorChange { phase: ColorChangePhase::Confirmed, .. }
        )),
        1
    );

    fleet.dispose().await;
}

#[tokio::test]
async fn overdue_color_confirmation_is_adopted_and_delivery_resumes() {
    let mut config = fast_config();
    config.color_confirm_timeout = Some(Duration::from_millis(30));
    let (supervisor, transport, _rx) = standalone_supervisor(config);
    let events = spawn_collector(supervisor.bus().subscribe());

    let channel = supervisor.join("StreamerOne").await.unwrap();
    channel.enqueue_chat("pink!", ChatColor::HotPink);

    assert!(supervisor.tick().await);
    assert_eq!(transport.colors().len(), 1);
    assert!(transport.sends("streamerone").is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(supervisor.tick().await);

    assert_eq!(transport.sends("streamerone"), vec!["pink!"]);
    assert_eq!(channel.confirmed_color(), ChatColor::HotPink);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        count_events(&events, |e| matches!(
            e,
            FleetEvent::Error { error } if error.kind == ErrorKind::ColorChange
        )),
        1
    );

    supervisor.dispose().await;
}

// ── Fairness and reentrancy ─────────────────────────────────────────────────

#[tokio::test]
async fn round_robin_serves_every_pending_channel_before_repeats() {
    let (supervisor, transport, _rx) = standalone_supervisor(fast_config());

    supervisor.join("alpha").await.unwrap();
    let bravo = supervisor.join("bravo").await.unwrap();
    let charlie = supervisor.join("charlie").await.unwrap();

    bravo.enqueue_chat("b1", ChatColor::Blue);
    bravo.enqueue_chat("b2", ChatColor::Blue);
    charlie.enqueue_chat("c1", ChatColor::Blue);
    charlie.enqueue_chat("c2", ChatColor::Blue);

    for _ in 0..4 {
        assert!(supervisor.tick().await);
    }
    assert!(!supervisor.tick().await, "no pending work left");

    let served: Vec<String> = transport
        .ops()
        .into_iter()
        .map(|op| match op {
            Op::Send { channel, .. } => channel,
            Op::Whisper { .. } => panic!("no whispers expected"),
        })
        .collect();
    // Each pending channel is served once before either repeats; the empty
    // channel is never served.
    assert_eq!(served, vec!["bravo", "charlie", "bravo", "charlie"]);

    supervisor.dispose().await;
}

#[tokio::test]
async fn overlapping_supervisor_ticks_are_dropped() {
    let (supervisor, transport, _rx) = standalone_supervisor(fast_config());
    transport.set_send_delay(Some(Duration::from_millis(50)));

    let channel = supervisor.join("alpha").await.unwrap();
    channel.enqueue_chat("one", ChatColor::Blue);
    channel.enqueue_chat("two", ChatColor::Blue);

    let (first, second) = tokio::join!(supervisor.tick(), supervisor.tick());
    assert!(first);
    assert!(!second, "the overlapping invocation is dropped");
    assert_eq!(transport.sends("alpha"), vec!["one"]);

    supervisor.dispose().await;
}

// ── Whisper/channel alternation ─────────────────────────────────────────────

#[tokio::test]
async fn whispers_and_channel_messages_strictly_alternate() {
    let (fleet, connector, bot) = fleet_with_bot(fast_config()).await;
    let channel = fleet.join_channel(&bot, "StreamerOne").await.unwrap();
    let transport = connector.latest_transport();
    let friend = UserRecord::new(None, "friend", "Friend");

    // All four entries land between two scheduler firings (no await points
    // between these calls on a current-thread runtime).
    let mark = transport.ops().len();
    fleet.send_whisper(&bot, friend.clone(), "w1");
    fleet.send_whisper(&bot, friend, "w2");
    fleet.send_message(&channel, "m1", ChatColor::Blue);
    fleet.send_message(&channel, "m2", ChatColor::Blue);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let ops = transport.ops()[mark..].to_vec();
    assert_eq!(ops.len(), 4, "everything queued was delivered: {ops:?}");

    // FIFO within each lane.
    let whispers: Vec<&str> = ops
        .iter()
        .filter_map(|op| match op {
            Op::Whisper { text, .. } => Some(text.as_str()),
            Op::Send { .. } => None,
        })
        .collect();
    let sends: Vec<&str> = ops
        .iter()
        .filter_map(|op| match op {
            Op::Send { text, .. } => Some(text.as_str()),
            Op::Whisper { .. } => None,
        })
        .collect();
    assert_eq!(whispers, vec!["w1", "w2"]);
    assert_eq!(sends, vec!["m1", "m2"]);

    // Never two of the same lane in a row while both have work.
    let lanes: Vec<bool> = ops
        .iter()
        .map(|op| matches!(op, Op::Whisper { .. }))
        .collect();
    assert!(
        lanes.windows(2).all(|pair| pair[0] != pair[1]),
        "whisper and channel service strictly alternate: {ops:?}"
    );

    fleet.dispose().await;
}

// ── Join/leave lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn join_is_idempotent_while_connected() {
    let (fleet, connector, bot) = fleet_with_bot(fast_config()).await;
    let transport = connector.latest_transport();

    let first = fleet.join_channel(&bot, "StreamerOne").await.unwrap();
    let second = fleet.join_channel(&bot, "  streamerONE ").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(transport.join_calls(), vec!["streamerone"]);
    assert_eq!(bot.channel_count().await, 1);

    fleet.dispose().await;
}

#[tokio::test]
async fn rejoining_a_dropped_channel_reissues_the_join() {
    let (fleet, connector, bot) = fleet_with_bot(fast_config()).await;
    let transport = connector.latest_transport();

    let first = fleet.join_channel(&bot, "StreamerOne").await.unwrap();
    transport.drop_channel("streamerone");
    let second = fleet.join_channel(&bot, "StreamerOne").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(transport.join_calls().len(), 2);

    fleet.dispose().await;
}

#[tokio::test]
async fn leaving_a_channel_removes_it_from_scheduling() {
    let (supervisor, transport, _rx) = standalone_supervisor(fast_config());

    let channel = supervisor.join("StreamerOne").await.unwrap();
    channel.enqueue_chat("late", ChatColor::Blue);

    assert!(supervisor.leave("StreamerOne").await);
    assert_eq!(supervisor.channel_count().await, 0);
    assert!(!supervisor.leave("StreamerOne").await, "second leave is a no-op");

    assert!(!supervisor.tick().await, "a left channel is never served");
    assert!(transport.sends("streamerone").is_empty());

    supervisor.dispose().await;
}

// ── Immediate sends ─────────────────────────────────────────────────────────

#[tokio::test]
async fn immediate_sends_require_a_live_connection() {
    let (fleet, connector, bot) = fleet_with_bot(fast_config()).await;
    let channel = fleet.join_channel(&bot, "StreamerOne").await.unwrap();
    let transport = connector.latest_transport();
    let friend = UserRecord::new(None, "friend", "Friend");

    transport.set_connected(false);
    assert!(!fleet.send_message_immediate(&channel, "nope").await);
    assert!(!fleet.send_whisper_immediate(&bot, &friend, "nope").await);
    assert!(transport.ops().is_empty());
    assert_eq!(channel.pending(), 0, "immediate sends never fall back to the queue");

    transport.set_connected(true);
    assert!(fleet.send_message_immediate(&channel, "hi").await);
    assert!(fleet.send_command_immediate(&channel, "waves").await);
    assert!(fleet.send_whisper_immediate(&bot, &friend, "psst").await);
    assert_eq!(transport.ops(), vec![
        Op::Send { channel: "streamerone".into(), text: "hi".into() },
        Op::Send { channel: "streamerone".into(), text: "/me waves".into() },
        Op::Whisper { to: "friend".into(), text: "psst".into() },
    ]);

    fleet.dispose().await;
}

// ── Reconnection ────────────────────────────────────────────────────────────

#[tokio::test]
async fn unsolicited_disconnect_reconnects_with_the_same_credentials() {
    let mut config = fast_config();
    config.reconnect_interval = Some(Duration::from_millis(80));
    let (fleet, connector, bot) = fleet_with_bot(config).await;
    let events = spawn_collector(fleet.subscribe());
    let transport = connector.latest_transport();

    let before_drop = Instant::now();
    transport.inject(TransportEvent::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let attempts = connector.attempts();
    assert_eq!(attempts.len(), 2, "exactly one reconnect attempt");
    assert!(attempts.iter().all(|(username, _)| username == "BotAcct"));
    assert!(
        attempts[1].1.duration_since(before_drop) >= Duration::from_millis(80),
        "reconnect respects the configured interval"
    );
    assert!(bot.is_connected().await);
    assert!(
        count_events(&events, |e| matches!(
            e,
            FleetEvent::BotConnection { connected: false, .. }
        )) >= 1
    );

    // An explicit disconnect ends the retry loop for good.
    assert!(fleet.disconnect_bot(&bot).await);
    let settled = connector.attempts().len();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(connector.attempts().len(), settled);
}

#[tokio::test]
async fn reconnect_retries_at_a_fixed_interval_until_it_sticks() {
    let mut config = fast_config();
    config.reconnect_interval = Some(Duration::from_millis(50));
    let (fleet, connector, bot) = fleet_with_bot(config).await;
    let transport = connector.latest_transport();

    connector.set_fail_connects(true);
    transport.inject(TransportEvent::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(connector.attempts().len() >= 3, "retries keep coming while connects fail");
    assert!(!bot.is_connected().await);

    connector.set_fail_connects(false);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(bot.is_connected().await);

    fleet.dispose().await;
}

#[tokio::test]
async fn failed_connect_surfaces_an_error_and_does_not_retry() {
    let connector = MockConnector::new();
    let directory = Arc::new(MemoryDirectory::new());
    let fleet = FleetSupervisor::new(
        Arc::clone(&connector) as Arc<dyn Connector>,
        directory as Arc<dyn Directory>,
    );
    let events = spawn_collector(fleet.subscribe());

    connector.set_fail_connects(true);
    let mut config = fast_config();
    config.reconnect_interval = Some(Duration::from_millis(50));
    let bot = fleet.connect_bot(creds(), config).await.unwrap();
    settle().await;

    assert!(!bot.is_connected().await);
    assert_eq!(
        count_events(&events, |e| matches!(
            e,
            FleetEvent::Error { error } if error.kind == ErrorKind::ConnectBot
        )),
        1
    );
    // A failed attempt aborts only that attempt; no retry loop starts.
    assert_eq!(connector.attempts().len(), 1);

    // The registered session can be connected again later.
    connector.set_fail_connects(false);
    bot.connect().await;
    assert!(bot.is_connected().await);

    fleet.dispose().await;
}

// ── Disposal ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn disposal_cascades_and_is_safe_to_repeat() {
    let (fleet, connector, bot) = fleet_with_bot(fast_config()).await;
    let events = spawn_collector(fleet.subscribe());
    let channel = fleet.join_channel(&bot, "StreamerOne").await.unwrap();
    fleet.join_channel(&bot, "StreamerTwo").await.unwrap();
    let transport = connector.latest_transport();

    fleet.send_message(&channel, "never sent", ChatColor::Blue);
    assert!(fleet.disconnect_bot(&bot).await);

    assert_eq!(bot.channel_count().await, 0);
    assert!(!bot.is_connected().await);

    // The scheduler is gone: queued work stays where it is.
    let frozen = transport.ops().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.ops().len(), frozen);

    assert_eq!(
        count_events(&events, |e| matches!(
            e,
            FleetEvent::BotConnection { connected: false, .. }
        )),
        1,
        "one disconnect event per live connection"
    );

    // Repeat disposal is a quiet no-op.
    assert!(!fleet.disconnect_bot(&bot).await);
    bot.dispose().await;
}

// ── Inbound traffic ─────────────────────────────────────────────────────────

#[tokio::test]
async fn received_messages_resolve_the_sender_and_reach_the_bus() {
    let (fleet, connector, bot) = fleet_with_bot(fast_config()).await;
    let events = spawn_collector(fleet.subscribe());
    fleet.join_channel(&bot, "StreamerOne").await.unwrap();
    let transport = connector.latest_transport();

    transport
        .inject(TransportEvent::MessageReceived {
            channel: "streamerone".into(),
            platform_id: Some("42".into()),
            username: "viewer".into(),
            display_name: "Viewer".into(),
            text: "hello bot".into(),
            color: Some("FF0000".into()),
        })
        .await;
    settle().await;

    assert_eq!(
        count_events(&events, |e| matches!(
            e,
            FleetEvent::ChatMessage { message }
                if message.direction == Direction::Received
                    && message.sender.username == "viewer"
                    && message.text == "hello bot"
        )),
        1
    );
    assert!(fleet.user_by_username("viewer").await.is_some());

    fleet.dispose().await;
}

#[tokio::test]
async fn presence_follows_user_joins_and_leaves() {
    let (fleet, connector, bot) = fleet_with_bot(fast_config()).await;
    let events = spawn_collector(fleet.subscribe());
    fleet.join_channel(&bot, "StreamerOne").await.unwrap();
    let transport = connector.latest_transport();

    transport
        .inject(TransportEvent::UserJoined {
            channel: "streamerone".into(),
            username: "viewer".into(),
        })
        .await;
    settle().await;
    assert_eq!(
        count_events(&events, |e| matches!(
            e,
            FleetEvent::ChannelPresence { present: true, user, .. } if user.username == "viewer"
        )),
        1
    );

    transport
        .inject(TransportEvent::UserLeft {
            channel: "streamerone".into(),
            username: "viewer".into(),
        })
        .await;
    settle().await;
    assert_eq!(
        count_events(&events, |e| matches!(
            e,
            FleetEvent::ChannelPresence { present: false, user, .. } if user.username == "viewer"
        )),
        1
    );

    // A leave for someone never seen stays silent.
    transport
        .inject(TransportEvent::UserLeft {
            channel: "streamerone".into(),
            username: "stranger".into(),
        })
        .await;
    settle().await;
    assert_eq!(
        count_events(&events, |e| matches!(e, FleetEvent::ChannelPresence { .. })),
        2
    );

    fleet.dispose().await;
}

#[tokio::test]
async fn received_whispers_resolve_the_sender_through_the_directory() {
    let (fleet, connector, bot) = fleet_with_bot(fast_config()).await;
    let events = spawn_collector(fleet.subscribe());
    let transport = connector.latest_transport();

    transport
        .inject(TransportEvent::WhisperReceived {
            platform_id: Some("77".into()),
            username: "friend".into(),
            display_name: "Friend".into(),
            text: "psst".into(),
        })
        .await;
    settle().await;

    assert_eq!(
        count_events(&events, |e| matches!(
            e,
            FleetEvent::Whisper { whisper }
                if whisper.direction == Direction::Received && whisper.user.username == "friend"
        )),
        1
    );
    assert!(fleet.user_by_username("friend").await.is_some());

    fleet.dispose().await;
}

#[tokio::test]
async fn follow_notifications_reach_the_fleet_bus() {
    let (fleet, _connector, bot) = fleet_with_bot(fast_config()).await;
    let events = spawn_collector(fleet.subscribe());
    let channel = fleet.join_channel(&bot, "StreamerOne").await.unwrap();

    channel.follows_received(vec![UserRecord::new(None, "fan", "Fan")]);
    settle().await;

    assert_eq!(
        count_events(&events, |e| matches!(
            e,
            FleetEvent::Follow { followers, .. } if followers.len() == 1
        )),
        1
    );

    fleet.dispose().await;
}
