//! Live Feed State Machine
//!
//! Pure transition logic for one order-book subscription. The controller in
//! the application layer owns the timers and sockets; this module only
//! decides which state follows which event and what the poll loop must do.
//!
//! ```text
//!            Subscribe              PushOpened
//! Idle ─────────────────► Connecting ──────────► LivePush
//!                             │                     │
//!                             │ PushLost            │ PushLost
//!                             ▼                     │
//!                          LivePoll ◄───────────────┘
//!
//! any ── Unsubscribe ──► Closed        any ── Subscribe ──► Connecting
//! ```

use std::fmt;

// =============================================================================
// State Machine
// =============================================================================

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FeedState {
    /// No subscription has been started.
    #[default]
    Idle,
    /// Polling has started and the push channel is being opened.
    Connecting,
    /// The push channel is open and authoritative; polling is stopped.
    LivePush,
    /// The push channel failed or closed; polling is the only source.
    LivePoll,
    /// The subscription was torn down.
    Closed,
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEvent {
    /// A symbol was subscribed.
    Subscribe,
    /// The push channel completed its handshake.
    PushOpened,
    /// The push channel errored, closed or timed out.
    PushLost,
    /// The consumer unsubscribed.
    Unsubscribe,
}

/// What the controller must do with the poll timer after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollCommand {
    /// Ensure a poll loop is running. `immediate` fetches before the first
    /// interval elapses. An already running loop is kept as is.
    Start {
        /// Fetch once right away.
        immediate: bool,
    },
    /// Cancel the poll loop if one is running.
    Stop,
    /// Leave the poll loop untouched.
    Keep,
}

impl FeedState {
    /// Apply an event, returning the next state and the poll command.
    ///
    /// Events that do not apply to the current state (a late push open after
    /// the channel was declared lost, a loss after close) leave the state
    /// unchanged.
    #[must_use]
    pub const fn on(self, event: FeedEvent) -> (Self, PollCommand) {
        match (self, event) {
            (_, FeedEvent::Subscribe) => (Self::Connecting, PollCommand::Start { immediate: true }),
            (_, FeedEvent::Unsubscribe) => (Self::Closed, PollCommand::Stop),
            (Self::Connecting, FeedEvent::PushOpened) => (Self::LivePush, PollCommand::Stop),
            (Self::Connecting | Self::LivePush, FeedEvent::PushLost) => {
                (Self::LivePoll, PollCommand::Start { immediate: false })
            }
            (state, _) => (state, PollCommand::Keep),
        }
    }

    /// Whether this state belongs to an active subscription.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::LivePush | Self::LivePoll)
    }

    /// Stable name for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::LivePush => "live_push",
            Self::LivePoll => "live_poll",
            Self::Closed => "closed",
        }
    }

    /// Numeric code exported on the feed state gauge.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::LivePush => 2,
            Self::LivePoll => 3,
            Self::Closed => 4,
        }
    }
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Consumer-visible Status
// =============================================================================

/// Transport that delivered the current data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// WebSocket push channel.
    Push,
    /// HTTP poll loop.
    Poll,
}

impl Transport {
    /// Stable name for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Poll => "poll",
        }
    }
}

/// Status shown to feed consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    /// Waiting for the first snapshot.
    Connecting,
    /// Receiving fresh data.
    Live(Transport),
    /// A transport failed; the last good snapshot may be stale.
    Degraded,
    /// No data could be obtained.
    Error(String),
}

impl FeedStatus {
    /// Whether data is currently flowing.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Live(transport) => write!(f, "live ({})", transport.as_str()),
            Self::Degraded => f.write_str("degraded"),
            Self::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Failure of either feed transport. Never fatal; the controller degrades.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The poll request failed.
    #[error("poll failed: {0}")]
    Poll(String),

    /// The push channel could not be opened or failed while open.
    #[error("push channel failed: {0}")]
    Push(String),

    /// The push handshake did not complete in time.
    #[error("push channel connect timed out")]
    ConnectTimeout,
}
