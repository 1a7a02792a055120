//! Per-bot tuning: the outbound rate budget and lifecycle knobs.

use std::time::Duration;

/// Outbound rate budget for one bot connection.
///
/// The platform allows `messages_per_window` sends per `window`; the
/// scheduler spaces ticks so that only `safety_factor` of that allowance is
/// ever used, leaving headroom against clock skew between this process and
/// the platform's own counter.
#[derive(Debug, Clone, Copy)]
pub struct RateBudget {
    pub messages_per_window: u32,
    pub window: Duration,
    pub safety_factor: f64,
}

impl Default for RateBudget {
    fn default() -> Self {
        Self {
            messages_per_window: 20,
            window: Duration::from_secs(30),
            safety_factor: 0.8,
        }
    }
}

impl RateBudget {
    /// Scheduler period. One unit of work is released per tick, so the
    /// interval is the window spread over the usable allowance.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        let usable =
            f64::from(self.messages_per_window.max(1)) * self.safety_factor.clamp(0.05, 1.0);
        self.window.div_f64(usable)
    }
}

/// Per-bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Maximum entries per outbound queue (channel queues and the whisper
    /// queue alike). Overflow evicts the oldest entry.
    pub max_queue_len: usize,
    pub rate: RateBudget,
    /// Delay before re-connecting after an unsolicited disconnect.
    /// `None` disables automatic reconnection.
    pub reconnect_interval: Option<Duration>,
    /// How long to wait for the platform to acknowledge a color change
    /// before adopting the requested color and resuming delivery.
    /// `None` waits indefinitely.
    pub color_confirm_timeout: Option<Duration>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            max_queue_len: 100,
            rate: RateBudget::default(),
            reconnect_interval: None,
            color_confirm_timeout: None,
        }
    }
}
