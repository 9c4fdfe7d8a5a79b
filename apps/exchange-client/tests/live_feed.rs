//! Integration tests for the live order book feed.
//!
//! Both transports are replaced by scripted fakes and the clock is paused,
//! so poll intervals and connect timeouts elapse instantly and in order.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use exchange_client::{
    FeedSettings, FeedState, FeedStatus, FeedView, LiveFeedController, OrderBookSnapshot,
    OrderBookSource, PriceLevel, PushConnector, PushFrame, PushStream, Transport, TransportError,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct ScriptedSource {
    books: Mutex<HashMap<String, OrderBookSnapshot>>,
    delays: Mutex<HashMap<String, Duration>>,
    failing: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSource {
    fn with_book(self, symbol: &str, book: OrderBookSnapshot) -> Self {
        self.books.lock().insert(symbol.to_string(), book);
        self
    }

    fn with_delay(self, symbol: &str, delay: Duration) -> Self {
        self.delays.lock().insert(symbol.to_string(), delay);
        self
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl OrderBookSource for ScriptedSource {
    async fn fetch_order_book(&self, symbol: &str) -> Result<OrderBookSnapshot, TransportError> {
        self.calls.lock().push(symbol.to_string());

        let delay = self.delays.lock().get(symbol).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Poll("backend unavailable".to_string()));
        }
        Ok(self.books.lock().get(symbol).cloned().unwrap_or_default())
    }
}

#[derive(Clone, Copy)]
enum PushBehavior {
    Open,
    OpenWhenReleased,
    Refuse,
    Hang,
}

type FrameSender = mpsc::Sender<Result<PushFrame, TransportError>>;

struct ManualPush {
    behavior: PushBehavior,
    release: Notify,
    channels: Mutex<Vec<(String, FrameSender)>>,
}

impl ManualPush {
    fn new(behavior: PushBehavior) -> Self {
        Self {
            behavior,
            release: Notify::new(),
            channels: Mutex::new(Vec::new()),
        }
    }

    fn release(&self) {
        self.release.notify_one();
    }

    fn sender(&self, symbol: &str) -> FrameSender {
        self.channels
            .lock()
            .iter()
            .rev()
            .find(|(s, _)| s == symbol)
            .map(|(_, tx)| tx.clone())
            .expect("no channel opened for symbol")
    }

    fn drop_channels(&self) {
        self.channels.lock().clear();
    }

    fn opened(&self) -> usize {
        self.channels.lock().len()
    }
}

#[async_trait]
impl PushConnector for ManualPush {
    async fn open(&self, symbol: &str) -> Result<PushStream, TransportError> {
        match self.behavior {
            PushBehavior::Open => {}
            PushBehavior::OpenWhenReleased => self.release.notified().await,
            PushBehavior::Refuse => return Err(TransportError::Push("refused".to_string())),
            PushBehavior::Hang => std::future::pending::<()>().await,
        }

        let (tx, rx) = mpsc::channel(16);
        self.channels.lock().push((symbol.to_string(), tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn book(bid: Decimal, ask: Decimal) -> OrderBookSnapshot {
    OrderBookSnapshot::from_levels(
        vec![PriceLevel::new(bid, dec!(1))],
        vec![PriceLevel::new(ask, dec!(1))],
    )
}

fn frame(symbol: Option<&str>, snapshot: OrderBookSnapshot) -> Result<PushFrame, TransportError> {
    Ok(PushFrame {
        symbol: symbol.map(ToString::to_string),
        snapshot,
    })
}

fn feed(source: &Arc<ScriptedSource>, push: &Arc<ManualPush>) -> LiveFeedController {
    LiveFeedController::new(
        Arc::clone(source) as Arc<dyn OrderBookSource>,
        Arc::clone(push) as Arc<dyn PushConnector>,
        FeedSettings::default(),
    )
}

async fn wait_for(
    feed: &LiveFeedController,
    what: &str,
    condition: impl Fn(&FeedView) -> bool,
) -> FeedView {
    let mut views = feed.watch();
    let view = tokio::time::timeout(Duration::from_secs(60), views.wait_for(|v| condition(v)))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .expect("feed dropped");
    view.clone()
}

fn is_live(transport: Transport) -> impl Fn(&FeedView) -> bool {
    move |view| view.status == Some(FeedStatus::Live(transport))
}

// =============================================================================
// Transport Handover
// =============================================================================

#[tokio::test(start_paused = true)]
async fn poll_serves_first_snapshot_then_push_takes_over() {
    let s1 = book(dec!(100), dec!(101));
    let s2 = book(dec!(102), dec!(103));
    let source = Arc::new(ScriptedSource::default().with_book("AAPL", s1.clone()));
    let push = Arc::new(ManualPush::new(PushBehavior::OpenWhenReleased));
    let feed = feed(&source, &push);

    feed.subscribe("AAPL");
    assert_eq!(feed.state(), FeedState::Connecting);
    assert_eq!(feed.status(), Some(FeedStatus::Connecting));
    assert!(feed.view().loading);

    let view = wait_for(&feed, "first poll", is_live(Transport::Poll)).await;
    assert_eq!(view.snapshot, s1);
    assert!(!view.loading);
    assert_eq!(view.state, FeedState::Connecting);

    push.release();
    wait_for(&feed, "push open", is_live(Transport::Push)).await;
    assert_eq!(feed.state(), FeedState::LivePush);
    assert!(!feed.is_polling());
    // The push channel is open but has not delivered yet.
    assert_eq!(feed.snapshot(), s1);

    push.sender("AAPL").send(frame(Some("AAPL"), s2.clone())).await.unwrap();
    let view = wait_for(&feed, "push snapshot", |v| v.snapshot == s2).await;
    assert_eq!(view.status, Some(FeedStatus::Live(Transport::Push)));

    let calls = source.calls();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(source.calls(), calls, "poll loop must stay stopped while push is live");
    assert_eq!(feed.snapshot(), s2);
}

#[tokio::test(start_paused = true)]
async fn refused_push_keeps_polling_for_whole_subscription() {
    let s1 = book(dec!(10), dec!(11));
    let source = Arc::new(ScriptedSource::default().with_book("AAPL", s1.clone()));
    let push = Arc::new(ManualPush::new(PushBehavior::Refuse));
    let feed = feed(&source, &push);

    feed.subscribe("AAPL");
    let view = wait_for(&feed, "poll after refusal", |v| {
        v.state == FeedState::LivePoll && v.status == Some(FeedStatus::Live(Transport::Poll))
    })
    .await;
    assert_eq!(view.snapshot, s1);

    let calls = source.calls();
    tokio::time::sleep(Duration::from_millis(6_500)).await;
    assert!(source.calls() >= calls + 3, "poll loop keeps running");
    assert_eq!(feed.state(), FeedState::LivePoll);
    assert_ne!(feed.status(), Some(FeedStatus::Live(Transport::Push)));
    assert_eq!(push.opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn push_loss_resumes_polling() {
    let s1 = book(dec!(1), dec!(2));
    let s2 = book(dec!(3), dec!(4));
    let source = Arc::new(ScriptedSource::default().with_book("AAPL", s1.clone()));
    let push = Arc::new(ManualPush::new(PushBehavior::Open));
    let feed = feed(&source, &push);

    feed.subscribe("AAPL");
    wait_for(&feed, "push open", |v| v.state == FeedState::LivePush).await;
    push.sender("AAPL").send(frame(None, s2.clone())).await.unwrap();
    wait_for(&feed, "push snapshot", |v| v.snapshot == s2).await;

    push.drop_channels();
    let view = wait_for(&feed, "degraded", |v| v.state == FeedState::LivePoll).await;
    assert_eq!(view.status, Some(FeedStatus::Degraded));
    assert_eq!(view.snapshot, s2, "last good snapshot is kept");
    assert!(feed.is_polling());

    let view = wait_for(&feed, "poll resumes", is_live(Transport::Poll)).await;
    assert_eq!(view.snapshot, s1);
}

#[tokio::test(start_paused = true)]
async fn push_connect_timeout_falls_back_to_polling() {
    let source = Arc::new(ScriptedSource::default().with_book("AAPL", book(dec!(5), dec!(6))));
    let push = Arc::new(ManualPush::new(PushBehavior::Hang));
    let feed = feed(&source, &push);
    let started = Instant::now();

    feed.subscribe("AAPL");
    wait_for(&feed, "first poll", is_live(Transport::Poll)).await;
    assert_eq!(feed.state(), FeedState::Connecting);

    wait_for(&feed, "timeout", |v| v.state == FeedState::LivePoll).await;
    assert!(started.elapsed() >= FeedSettings::default().push_connect_timeout);
    assert!(feed.is_polling());
}

// =============================================================================
// Subscription Isolation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn late_fetch_for_previous_symbol_never_reaches_new_subscription() {
    let aapl = book(dec!(100), dec!(101));
    let goog = book(dec!(200), dec!(201));
    let source = Arc::new(
        ScriptedSource::default()
            .with_book("AAPL", aapl.clone())
            .with_book("GOOG", goog.clone())
            .with_delay("AAPL", Duration::from_secs(5)),
    );
    let push = Arc::new(ManualPush::new(PushBehavior::Hang));
    let feed = feed(&source, &push);

    feed.subscribe("AAPL");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(source.calls.lock().as_slice(), ["AAPL"]);

    feed.unsubscribe();
    let view = feed.view();
    assert_eq!(view.state, FeedState::Closed);
    assert_eq!(view.symbol, None);
    assert_eq!(view.status, None);
    assert!(view.snapshot.is_empty());

    feed.subscribe("GOOG");
    let view = wait_for(&feed, "GOOG snapshot", |v| v.snapshot == goog).await;
    assert_eq!(view.symbol.as_deref(), Some("GOOG"));

    tokio::time::sleep(Duration::from_secs(12)).await;
    let view = feed.view();
    assert_eq!(view.symbol.as_deref(), Some("GOOG"));
    assert_eq!(view.snapshot, goog);
    assert_eq!(
        source.calls.lock().iter().filter(|s| *s == "AAPL").count(),
        1,
        "no further AAPL fetches after unsubscribe"
    );
}

#[tokio::test(start_paused = true)]
async fn resubscribe_closes_previous_push_channel() {
    let source = Arc::new(ScriptedSource::default());
    let push = Arc::new(ManualPush::new(PushBehavior::Open));
    let feed = feed(&source, &push);

    feed.subscribe("AAPL");
    wait_for(&feed, "AAPL push", |v| v.state == FeedState::LivePush).await;
    let aapl = push.sender("AAPL");
    let generation = feed.generation();

    feed.subscribe("GOOG");
    assert!(feed.generation() > generation);
    assert_eq!(feed.symbol().as_deref(), Some("GOOG"));

    tokio::time::timeout(Duration::from_secs(1), aapl.closed())
        .await
        .expect("AAPL push channel closed");

    // A frame pushed on the old channel has nowhere to go.
    assert!(aapl.send(frame(Some("AAPL"), book(dec!(1), dec!(2)))).await.is_err());
    wait_for(&feed, "GOOG push", |v| v.state == FeedState::LivePush).await;
    assert_eq!(feed.view().symbol.as_deref(), Some("GOOG"));
}

#[tokio::test(start_paused = true)]
async fn frame_for_other_symbol_is_discarded() {
    let mine = book(dec!(10), dec!(11));
    let other = book(dec!(90), dec!(91));
    let source = Arc::new(ScriptedSource::default());
    let push = Arc::new(ManualPush::new(PushBehavior::Open));
    let feed = feed(&source, &push);

    feed.subscribe("AAPL");
    wait_for(&feed, "push open", |v| v.state == FeedState::LivePush).await;

    let tx = push.sender("AAPL");
    tx.send(frame(Some("GOOG"), other)).await.unwrap();
    tx.send(frame(Some("aapl"), mine.clone())).await.unwrap();

    let view = wait_for(&feed, "own frame", |v| !v.snapshot.is_empty()).await;
    assert_eq!(view.snapshot, mine);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_closes_push_channel() {
    let source = Arc::new(ScriptedSource::default());
    let push = Arc::new(ManualPush::new(PushBehavior::Open));
    let feed = feed(&source, &push);

    feed.subscribe("AAPL");
    wait_for(&feed, "push open", |v| v.state == FeedState::LivePush).await;
    let tx = push.sender("AAPL");

    feed.unsubscribe();

    tokio::time::timeout(Duration::from_secs(1), tx.closed())
        .await
        .expect("push channel closed");
    assert_eq!(feed.state(), FeedState::Closed);
    assert!(!feed.is_polling());
}

#[tokio::test(start_paused = true)]
async fn dropping_controller_closes_push_channel() {
    let source = Arc::new(ScriptedSource::default());
    let push = Arc::new(ManualPush::new(PushBehavior::Open));
    let feed = feed(&source, &push);

    feed.subscribe("AAPL");
    wait_for(&feed, "push open", |v| v.state == FeedState::LivePush).await;
    let tx = push.sender("AAPL");

    drop(feed);

    tokio::time::timeout(Duration::from_secs(1), tx.closed())
        .await
        .expect("push channel closed");
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test(start_paused = true)]
async fn poll_error_keeps_last_good_snapshot() {
    let s1 = book(dec!(7), dec!(8));
    let source = Arc::new(ScriptedSource::default().with_book("AAPL", s1.clone()));
    let push = Arc::new(ManualPush::new(PushBehavior::Refuse));
    let feed = feed(&source, &push);

    feed.subscribe("AAPL");
    wait_for(&feed, "polling", |v| {
        v.state == FeedState::LivePoll && v.status == Some(FeedStatus::Live(Transport::Poll))
    })
    .await;

    source.set_failing(true);
    let view = wait_for(&feed, "degraded", |v| v.status == Some(FeedStatus::Degraded)).await;
    assert_eq!(view.snapshot, s1);
    assert!(view.updated_at.is_some());

    source.set_failing(false);
    let view = wait_for(&feed, "recovered", is_live(Transport::Poll)).await;
    assert_eq!(view.snapshot, s1);
}

#[tokio::test(start_paused = true)]
async fn error_before_first_snapshot_is_reported() {
    let source = Arc::new(ScriptedSource::default());
    source.set_failing(true);
    let push = Arc::new(ManualPush::new(PushBehavior::Hang));
    let feed = feed(&source, &push);

    feed.subscribe("AAPL");
    let view = wait_for(&feed, "error", |v| matches!(v.status, Some(FeedStatus::Error(_)))).await;

    assert_eq!(
        view.status,
        Some(FeedStatus::Error("poll failed: backend unavailable".to_string()))
    );
    assert!(!view.loading);
    assert!(view.snapshot.is_empty());
}

#[tokio::test(start_paused = true)]
async fn blank_symbol_unsubscribes() {
    let source = Arc::new(ScriptedSource::default());
    let push = Arc::new(ManualPush::new(PushBehavior::Hang));
    let feed = feed(&source, &push);

    feed.subscribe("AAPL");
    feed.subscribe("   ");

    assert_eq!(feed.state(), FeedState::Closed);
    assert_eq!(feed.symbol(), None);
    assert!(!feed.is_polling());
}
