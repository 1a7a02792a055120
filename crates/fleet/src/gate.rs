//! Per-channel gate serializing name-color changes against message delivery.

use std::time::{Duration, Instant};

use shoal_common::ChatColor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Idle,
    Awaiting { target: ChatColor, since: Instant },
}

/// Tracks the bot's confirmed name color in one channel and whether a
/// requested change is still unacknowledged.
///
/// Delivery never runs while a change is outstanding, so a message is always
/// rendered in the color it asked for.
#[derive(Debug)]
pub struct ColorSyncGate {
    confirmed: ChatColor,
    state: GateState,
    confirm_timeout: Option<Duration>,
}

impl ColorSyncGate {
    #[must_use]
    pub fn new(confirmed: ChatColor, confirm_timeout: Option<Duration>) -> Self {
        Self {
            confirmed,
            state: GateState::Idle,
            confirm_timeout,
        }
    }

    #[must_use]
    pub fn confirmed(&self) -> ChatColor {
        self.confirmed
    }

    #[must_use]
    pub fn is_awaiting(&self) -> bool {
        matches!(self.state, GateState::Awaiting { .. })
    }

    /// Record that a change to `target` was requested from the platform.
    pub fn begin(&mut self, target: ChatColor) {
        self.state = GateState::Awaiting {
            target,
            since: Instant::now(),
        };
    }

    /// Roll back an initiated change whose side effect failed, so the next
    /// tick can retry it.
    pub fn abort(&mut self) {
        self.state = GateState::Idle;
    }

    /// Platform acknowledgment. Returns the newly confirmed color, or `None`
    /// for an unsolicited acknowledgment, which is ignored.
    pub fn confirm(&mut self) -> Option<ChatColor> {
        match self.state {
            GateState::Awaiting { target, .. } => {
                self.confirmed = target;
                self.state = GateState::Idle;
                Some(target)
            }
            GateState::Idle => None,
        }
    }

    /// Adopt the pending target if the acknowledgment is overdue, so a
    /// silent platform cannot stall the channel forever. Returns the adopted
    /// color when the wait expired.
    pub fn expire_overdue(&mut self) -> Option<ChatColor> {
        let timeout = self.confirm_timeout?;
        match self.state {
            GateState::Awaiting { target, since } if since.elapsed() >= timeout => {
                self.confirmed = target;
                self.state = GateState::Idle;
                Some(target)
            }
            _ => None,
        }
    }
}
