//! Live Order Book Feed
//!
//! Owns one order book subscription at a time. Polling starts immediately so
//! the first snapshot arrives quickly, while the push channel is opened in
//! parallel. Once the push channel opens it becomes authoritative and the
//! poll loop is cancelled; if it fails or closes, polling resumes for the
//! rest of the subscription.
//!
//! Every spawned task carries the generation it was started for. Results are
//! applied only while that generation is current, so a late poll response or
//! push frame from a torn-down subscription never reaches the next one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{OrderBookSource, PushConnector, PushFrame};
use crate::domain::feed::{FeedEvent, FeedState, FeedStatus, PollCommand, Transport, TransportError};
use crate::domain::order_book::OrderBookSnapshot;
use crate::infrastructure::metrics;

// =============================================================================
// Settings and View
// =============================================================================

/// Timing settings for the feed transports.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Interval between poll fetches.
    pub poll_interval: Duration,
    /// Deadline for the push channel handshake. Expiry counts as push loss.
    pub push_connect_timeout: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            push_connect_timeout: Duration::from_secs(10),
        }
    }
}

/// What feed consumers observe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedView {
    /// Subscribed symbol, if any.
    pub symbol: Option<String>,
    /// Last good snapshot for the symbol.
    pub snapshot: OrderBookSnapshot,
    /// Consumer-visible status; `None` without a subscription.
    pub status: Option<FeedStatus>,
    /// State machine position.
    pub state: FeedState,
    /// True until the first snapshot or error of the subscription.
    pub loading: bool,
    /// When the current snapshot was received.
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Controller
// =============================================================================

/// Dual-transport live order book feed.
///
/// `subscribe` and `unsubscribe` must be called from within a Tokio runtime.
/// Dropping the controller tears down the active subscription.
pub struct LiveFeedController {
    shared: Arc<Shared>,
}

struct Shared {
    source: Arc<dyn OrderBookSource>,
    push: Arc<dyn PushConnector>,
    settings: FeedSettings,
    inner: Mutex<Inner>,
    view: watch::Sender<FeedView>,
}

#[derive(Default)]
struct Inner {
    generation: u64,
    state: FeedState,
    symbol: Option<String>,
    subscription: Option<CancellationToken>,
    poll: Option<CancellationToken>,
}

impl LiveFeedController {
    /// Create an idle controller.
    #[must_use]
    pub fn new(
        source: Arc<dyn OrderBookSource>,
        push: Arc<dyn PushConnector>,
        settings: FeedSettings,
    ) -> Self {
        let (view, _) = watch::channel(FeedView::default());
        Self {
            shared: Arc::new(Shared {
                source,
                push,
                settings,
                inner: Mutex::new(Inner::default()),
                view,
            }),
        }
    }

    /// Switch the feed to `symbol`.
    ///
    /// The previous subscription is fully torn down before anything for the
    /// new one starts. A blank symbol only tears down.
    pub fn subscribe(&self, symbol: &str) {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            self.unsubscribe();
            return;
        }

        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        shared.teardown(&mut inner);

        let generation = inner.generation;
        let (state, command) = inner.state.on(FeedEvent::Subscribe);
        inner.state = state;
        inner.symbol = Some(symbol.to_string());

        let subscription = CancellationToken::new();
        inner.subscription = Some(subscription.clone());

        tracing::info!(symbol, generation, "Subscribing to order book");

        shared.publish(&inner, |view| {
            *view = FeedView {
                symbol: Some(symbol.to_string()),
                snapshot: OrderBookSnapshot::empty(),
                status: Some(FeedStatus::Connecting),
                state,
                loading: true,
                updated_at: None,
            };
        });

        shared.apply_poll_command(&mut inner, command);

        tokio::spawn(Arc::clone(shared).run_push_channel(
            generation,
            symbol.to_string(),
            subscription.child_token(),
        ));
    }

    /// Tear down the active subscription and move to `Closed`.
    pub fn unsubscribe(&self) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        let had_subscription = inner.subscription.is_some();
        shared.teardown(&mut inner);

        let (state, _) = inner.state.on(FeedEvent::Unsubscribe);
        inner.state = state;
        inner.symbol = None;

        if had_subscription {
            tracing::info!(generation = inner.generation, "Unsubscribed from order book");
        }

        shared.publish(&inner, |view| {
            *view = FeedView {
                state,
                ..FeedView::default()
            };
        });
    }

    /// Current view.
    #[must_use]
    pub fn view(&self) -> FeedView {
        self.shared.view.borrow().clone()
    }

    /// Receiver notified on every view change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<FeedView> {
        self.shared.view.subscribe()
    }

    /// Current state machine position.
    #[must_use]
    pub fn state(&self) -> FeedState {
        self.shared.inner.lock().state
    }

    /// Current consumer-visible status.
    #[must_use]
    pub fn status(&self) -> Option<FeedStatus> {
        self.shared.view.borrow().status.clone()
    }

    /// Last good snapshot.
    #[must_use]
    pub fn snapshot(&self) -> OrderBookSnapshot {
        self.shared.view.borrow().snapshot.clone()
    }

    /// Subscribed symbol.
    #[must_use]
    pub fn symbol(&self) -> Option<String> {
        self.shared.inner.lock().symbol.clone()
    }

    /// Whether a poll loop is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.shared.inner.lock().poll.is_some()
    }

    /// Subscription generation; bumped on every subscribe and unsubscribe.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.inner.lock().generation
    }
}

impl Drop for LiveFeedController {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        self.shared.teardown(&mut inner);
    }
}

// =============================================================================
// Transitions
// =============================================================================

impl Shared {
    /// Invalidate every task of the current subscription.
    fn teardown(&self, inner: &mut Inner) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.poll = None;
        if let Some(token) = inner.subscription.take() {
            token.cancel();
        }
    }

    fn publish(&self, inner: &Inner, update: impl FnOnce(&mut FeedView)) {
        let state = inner.state;
        self.view.send_modify(|view| {
            update(view);
            view.state = state;
        });
        metrics::set_feed_state(state);
    }

    fn apply_poll_command(self: &Arc<Self>, inner: &mut Inner, command: PollCommand) {
        match command {
            PollCommand::Start { immediate } => {
                if inner.poll.is_some() {
                    return;
                }
                let (Some(subscription), Some(symbol)) = (&inner.subscription, &inner.symbol)
                else {
                    return;
                };
                let token = subscription.child_token();
                inner.poll = Some(token.clone());
                tracing::debug!(symbol = %symbol, immediate, "Starting poll loop");
                tokio::spawn(Arc::clone(self).run_poll_loop(
                    inner.generation,
                    symbol.clone(),
                    immediate,
                    token,
                ));
            }
            PollCommand::Stop => {
                if let Some(token) = inner.poll.take() {
                    tracing::debug!("Stopping poll loop");
                    token.cancel();
                }
            }
            PollCommand::Keep => {}
        }
    }

    fn apply_poll_result(
        &self,
        generation: u64,
        symbol: &str,
        result: Result<OrderBookSnapshot, TransportError>,
    ) {
        let inner = self.inner.lock();
        if inner.generation != generation {
            tracing::debug!(symbol, generation, "Discarding stale poll result");
            return;
        }

        match result {
            Ok(snapshot) => {
                if inner.state == FeedState::LivePush {
                    tracing::debug!(symbol, "Discarding poll result while push is live");
                    return;
                }
                metrics::record_feed_snapshot(Transport::Poll);
                self.publish(&inner, |view| {
                    view.snapshot = snapshot.normalized();
                    view.status = Some(FeedStatus::Live(Transport::Poll));
                    view.loading = false;
                    view.updated_at = Some(Utc::now());
                });
            }
            Err(e) => {
                tracing::warn!(symbol, error = %e, "Order book poll failed");
                self.publish(&inner, |view| {
                    view.status = Some(if view.updated_at.is_some() {
                        FeedStatus::Degraded
                    } else {
                        FeedStatus::Error(e.to_string())
                    });
                    view.loading = false;
                });
            }
        }
    }

    /// Returns false when the subscription is no longer current.
    fn apply_push_opened(self: &Arc<Self>, generation: u64, symbol: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }

        let (state, command) = inner.state.on(FeedEvent::PushOpened);
        inner.state = state;
        self.apply_poll_command(&mut inner, command);

        tracing::info!(symbol, generation, "Push channel open");
        self.publish(&inner, |view| {
            view.status = Some(FeedStatus::Live(Transport::Push));
        });
        true
    }

    fn apply_push_frame(&self, generation: u64, symbol: &str, frame: PushFrame) {
        let inner = self.inner.lock();
        if inner.generation != generation || inner.state != FeedState::LivePush {
            tracing::debug!(symbol, generation, "Discarding stale push frame");
            return;
        }
        if let Some(frame_symbol) = frame.symbol.as_deref()
            && !frame_symbol.eq_ignore_ascii_case(symbol)
        {
            tracing::debug!(symbol, frame_symbol, "Discarding push frame for another symbol");
            return;
        }

        metrics::record_feed_snapshot(Transport::Push);
        self.publish(&inner, |view| {
            view.snapshot = frame.snapshot.normalized();
            view.status = Some(FeedStatus::Live(Transport::Push));
            view.loading = false;
            view.updated_at = Some(Utc::now());
        });
    }

    fn apply_push_lost(self: &Arc<Self>, generation: u64, symbol: &str, error: &TransportError) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }

        let (state, command) = inner.state.on(FeedEvent::PushLost);
        if state == inner.state {
            return;
        }
        inner.state = state;

        tracing::warn!(symbol, generation, error = %error, "Push channel lost, falling back to polling");
        metrics::record_push_channel_lost();

        self.apply_poll_command(&mut inner, command);
        self.publish(&inner, |view| {
            view.status = Some(FeedStatus::Degraded);
        });
    }

    // =========================================================================
    // Transport Tasks
    // =========================================================================

    async fn run_poll_loop(
        self: Arc<Self>,
        generation: u64,
        symbol: String,
        immediate: bool,
        cancel: CancellationToken,
    ) {
        let period = self.settings.poll_interval;
        let start = if immediate {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                () = cancel.cancelled() => break,
                result = self.source.fetch_order_book(&symbol) => result,
            };
            self.apply_poll_result(generation, &symbol, result);
        }

        tracing::debug!(symbol = %symbol, generation, "Poll loop stopped");
    }

    async fn run_push_channel(
        self: Arc<Self>,
        generation: u64,
        symbol: String,
        cancel: CancellationToken,
    ) {
        let opened = tokio::select! {
            () = cancel.cancelled() => return,
            opened = tokio::time::timeout(
                self.settings.push_connect_timeout,
                self.push.open(&symbol),
            ) => opened,
        };

        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.apply_push_lost(generation, &symbol, &e);
                return;
            }
            Err(_) => {
                self.apply_push_lost(generation, &symbol, &TransportError::ConnectTimeout);
                return;
            }
        };

        if !self.apply_push_opened(generation, &symbol) {
            return;
        }

        loop {
            let item = tokio::select! {
                () = cancel.cancelled() => return,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(frame)) => self.apply_push_frame(generation, &symbol, frame),
                Some(Err(e)) => {
                    self.apply_push_lost(generation, &symbol, &e);
                    return;
                }
                None => {
                    let closed = TransportError::Push("channel closed".to_string());
                    self.apply_push_lost(generation, &symbol, &closed);
                    return;
                }
            }
        }
    }
}
