//! Outbound dispatch engine for a fleet of chat bots.
//!
//! Each bot holds one wire connection, joins any number of channels, and
//! spends a single shared rate budget across channel messages and whispers.
//! Per-channel bounded queues absorb producers without blocking them, a
//! timer-driven scheduler releases one unit of work per tick, a per-channel
//! gate serializes name-color changes against delivery, and every layer
//! republishes its children's events on a typed bus.
//!
//! The wire protocol and storage live behind the seams in
//! [`shoal_transport`]; this crate only coordinates.

pub mod bot;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod fleet;
pub mod gate;
pub mod queue;
pub mod supervisor;

pub use {
    bot::{BotSession, WhisperEntry},
    channel::{ChannelSession, OutboundKind, OutboundMessage},
    config::{BotConfig, RateBudget},
    error::{Error, Result},
    events::{
        ChatMessage, ColorChangePhase, Direction, ErrorEvent, ErrorKind, EventBus, FleetEvent,
        Whisper, forward_events,
    },
    fleet::FleetSupervisor,
    gate::ColorSyncGate,
    queue::BoundedQueue,
    supervisor::ChannelSupervisor,
};
