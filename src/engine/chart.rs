use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::buffer::{SeriesBuffer, SeriesOrigin};
use super::placeholder::placeholder_series;
use crate::config::ChartConfig;
use crate::error::ChartError;
use crate::exchange::{CandleSource, FeedCallback, FeedEvent, LiveFeed, SubscriptionHandle};
use crate::overlay::OverlayDecorator;
use crate::render::{LogicalRange, PreparedSurface, RenderingSurface, SeriesId, SeriesPoint};
use crate::types::{Candle, Interval, OrderRecord, Symbol};

/// Identifies one load. Every async completion carries the context it was
/// started under and is dropped if the engine has moved on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartContext {
    pub symbol: Symbol,
    pub interval: Interval,
    pub generation: u64,
}

impl fmt::Display for ChartContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} #{}", self.symbol, self.interval.as_str(), self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadKind {
    Initial,
    Backfill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Idle,
    Loading(LoadKind),
    Live,
    Closed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "Idle"),
            EngineState::Loading(LoadKind::Initial) => write!(f, "Loading"),
            EngineState::Loading(LoadKind::Backfill) => write!(f, "Backfilling"),
            EngineState::Live => write!(f, "Live"),
            EngineState::Closed => write!(f, "Closed"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum EngineCommand {
    ChangeSymbol(Symbol),
    ChangeInterval(Interval),
    Refresh,
    SetOrders(Arc<Vec<OrderRecord>>),
    SetVisible(bool),
    VisibleRangeChanged(LogicalRange),
    Teardown,
}

#[derive(Debug)]
pub enum EngineEvent {
    HistoryLoaded {
        context: ChartContext,
        result: Result<Vec<Candle>, ChartError>,
    },
    BackfillLoaded {
        context: ChartContext,
        result: Result<Vec<Candle>, ChartError>,
    },
    Feed {
        context: ChartContext,
        event: FeedEvent,
    },
    Command(EngineCommand),
}

/// Snapshot for the inline status indicator.
#[derive(Debug, Clone, Serialize)]
pub struct ChartStatus {
    pub symbol: Symbol,
    pub interval: Interval,
    pub state: EngineState,
    pub candles: usize,
    pub earliest_time: Option<i64>,
    pub last_close: Option<f64>,
    pub origin: SeriesOrigin,
    pub subscribed: bool,
    pub error: Option<String>,
}

impl ChartStatus {
    /// No real data to show: either nothing loaded or only the placeholder.
    pub fn is_unavailable(&self) -> bool {
        self.candles == 0 || self.origin == SeriesOrigin::Placeholder
    }
}

/// Cloneable command sender for a running engine. Sends return `false`
/// once the engine has been dropped.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) -> bool {
        self.tx.send(EngineEvent::Command(command)).is_ok()
    }

    pub fn change_symbol(&self, symbol: Symbol) -> bool {
        self.send(EngineCommand::ChangeSymbol(symbol))
    }

    pub fn change_interval(&self, interval: Interval) -> bool {
        self.send(EngineCommand::ChangeInterval(interval))
    }

    pub fn refresh(&self) -> bool {
        self.send(EngineCommand::Refresh)
    }

    pub fn set_orders(&self, orders: Vec<OrderRecord>) -> bool {
        self.send(EngineCommand::SetOrders(Arc::new(orders)))
    }

    pub fn set_visible(&self, visible: bool) -> bool {
        self.send(EngineCommand::SetVisible(visible))
    }

    pub fn teardown(&self) -> bool {
        self.send(EngineCommand::Teardown)
    }
}

/// Owns the candle buffer, the live subscription and the chart surface for
/// one symbol/interval at a time. All mutation happens in
/// [`handle_event`](Self::handle_event); fetches and the live feed only post
/// events back to the engine's channel.
pub struct ChartEngine<S: RenderingSurface> {
    source: Arc<dyn CandleSource>,
    feed: Arc<dyn LiveFeed>,
    surface: PreparedSurface<S>,
    config: ChartConfig,
    context: ChartContext,
    state: EngineState,
    buffer: SeriesBuffer,
    subscription: Option<SubscriptionHandle>,
    decorator: OverlayDecorator,
    orders: Arc<Vec<OrderRecord>>,
    visible: bool,
    last_error: Option<ChartError>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl<S: RenderingSurface> ChartEngine<S> {
    pub fn new(
        source: Arc<dyn CandleSource>,
        feed: Arc<dyn LiveFeed>,
        mut surface: PreparedSurface<S>,
        config: ChartConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let range_tx = events_tx.clone();
        surface.surface.subscribe_visible_range(Box::new(move |range| {
            let _ = range_tx.send(EngineEvent::Command(EngineCommand::VisibleRangeChanged(range)));
        }));

        let context = ChartContext {
            symbol: config.defaults.symbol.clone(),
            interval: config.defaults.interval,
            generation: 0,
        };

        Self {
            source,
            feed,
            surface,
            decorator: OverlayDecorator::from_settings(&config.render),
            config,
            context,
            state: EngineState::Idle,
            buffer: SeriesBuffer::new(),
            subscription: None,
            orders: Arc::new(Vec::new()),
            visible: true,
            last_error: None,
            events_tx,
            events_rx,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.events_tx.clone(),
        }
    }

    pub fn context(&self) -> &ChartContext {
        &self.context
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn buffer(&self) -> &SeriesBuffer {
        &self.buffer
    }

    pub fn last_error(&self) -> Option<&ChartError> {
        self.last_error.as_ref()
    }

    pub fn surface(&self) -> &S {
        &self.surface.surface
    }

    pub fn primary_series(&self) -> SeriesId {
        self.surface.primary
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.as_ref().is_some_and(|s| !s.is_closed())
    }

    pub fn status(&self) -> ChartStatus {
        ChartStatus {
            symbol: self.context.symbol.clone(),
            interval: self.context.interval,
            state: self.state,
            candles: self.buffer.len(),
            earliest_time: self.buffer.earliest_time(),
            last_close: self.buffer.last().map(|c| c.close),
            origin: self.buffer.origin(),
            subscribed: self.is_subscribed(),
            error: self.last_error.as_ref().map(|e| e.to_string()),
        }
    }

    /// Loads the configured default symbol and interval.
    pub fn start(&mut self) {
        let symbol = self.context.symbol.clone();
        let interval = self.context.interval;
        self.initialize(symbol, interval);
    }

    /// Starts a history load for `symbol`/`interval`. The live subscription
    /// opens once the load has completed, successfully or not.
    pub fn initialize(&mut self, symbol: Symbol, interval: Interval) {
        if self.state == EngineState::Closed {
            warn!("initialize called on a closed chart");
            return;
        }

        self.close_subscription();
        self.context = ChartContext {
            symbol,
            interval,
            generation: self.context.generation + 1,
        };
        self.state = EngineState::Loading(LoadKind::Initial);
        info!("Loading {} history", self.context);

        let source = Arc::clone(&self.source);
        let tx = self.events_tx.clone();
        let context = self.context.clone();
        tokio::spawn(async move {
            let result = source
                .fetch_history(&context.symbol, context.interval, None)
                .await;
            let _ = tx.send(EngineEvent::HistoryLoaded { context, result });
        });
    }

    pub fn change_symbol(&mut self, symbol: Symbol) {
        let interval = self.context.interval;
        self.switch_to(symbol, interval);
    }

    pub fn change_interval(&mut self, interval: Interval) {
        let symbol = self.context.symbol.clone();
        self.switch_to(symbol, interval);
    }

    /// Always reloads, even for the current pair, so it doubles as an
    /// explicit resubscribe after a stream failure.
    fn switch_to(&mut self, symbol: Symbol, interval: Interval) {
        if self.state == EngineState::Closed {
            return;
        }
        self.close_subscription();
        self.buffer.clear();
        self.surface.surface.set_data(self.surface.primary, Vec::new());
        self.initialize(symbol, interval);
    }

    /// Reloads the current pair without clearing what is on screen. A
    /// failed reload keeps the existing candles.
    pub fn refresh(&mut self) {
        let symbol = self.context.symbol.clone();
        let interval = self.context.interval;
        self.initialize(symbol, interval);
    }

    /// Fetches the page before the earliest loaded candle. Returns whether a
    /// request was started; at most one is in flight at a time.
    pub fn request_backfill(&mut self) -> bool {
        if self.state != EngineState::Live {
            trace!("Backfill skipped in state {}", self.state);
            return false;
        }
        if self.buffer.is_placeholder() {
            return false;
        }
        let Some(earliest) = self.buffer.earliest_time() else {
            return false;
        };

        let end_time_ms = earliest * 1000 - 1;
        self.state = EngineState::Loading(LoadKind::Backfill);
        debug!("Backfilling {} before {}", self.context, end_time_ms);

        let source = Arc::clone(&self.source);
        let tx = self.events_tx.clone();
        let context = self.context.clone();
        tokio::spawn(async move {
            let result = source
                .fetch_history(&context.symbol, context.interval, Some(end_time_ms))
                .await;
            let _ = tx.send(EngineEvent::BackfillLoaded { context, result });
        });
        true
    }

    pub fn on_visible_range_change(&mut self, range: LogicalRange) {
        if range.from < self.config.history.backfill_threshold_bars {
            self.request_backfill();
        }
    }

    pub fn set_orders(&mut self, orders: Arc<Vec<OrderRecord>>) {
        self.orders = orders;
        if self.visible {
            self.redraw_overlays(false);
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        let became_visible = visible && !self.visible;
        self.visible = visible;
        if became_visible {
            self.redraw_overlays(true);
        }
    }

    /// Closes the subscription, removes overlays and releases the surface.
    /// Later calls do nothing.
    pub fn teardown(&mut self) {
        if self.state == EngineState::Closed {
            return;
        }
        self.close_subscription();

        let surface = &mut self.surface.surface;
        self.decorator.clear(surface, self.surface.primary);
        surface.unsubscribe_visible_range();
        surface.release();

        // Invalidate in-flight completions.
        self.context.generation += 1;
        self.state = EngineState::Closed;
        info!("Chart for {} {} closed", self.context.symbol, self.context.interval.as_str());
    }

    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.events_rx.recv().await
    }

    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::HistoryLoaded { context, result } => self.on_history_loaded(context, result),
            EngineEvent::BackfillLoaded { context, result } => self.on_backfill_loaded(context, result),
            EngineEvent::Feed { context, event } => self.on_feed_event(context, event),
            EngineEvent::Command(command) => self.handle_command(command),
        }
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::ChangeSymbol(symbol) => self.change_symbol(symbol),
            EngineCommand::ChangeInterval(interval) => self.change_interval(interval),
            EngineCommand::Refresh => self.refresh(),
            EngineCommand::SetOrders(orders) => self.set_orders(orders),
            EngineCommand::SetVisible(visible) => self.set_visible(visible),
            EngineCommand::VisibleRangeChanged(range) => self.on_visible_range_change(range),
            EngineCommand::Teardown => self.teardown(),
        }
    }

    /// Processes events until the chart is torn down.
    pub async fn run(&mut self) {
        while self.state != EngineState::Closed {
            match self.next_event().await {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }
    }

    fn is_current(&self, context: &ChartContext) -> bool {
        *context == self.context && self.state != EngineState::Closed
    }

    fn on_history_loaded(&mut self, context: ChartContext, result: Result<Vec<Candle>, ChartError>) {
        if !self.is_current(&context) || self.state != EngineState::Loading(LoadKind::Initial) {
            debug!("Dropping stale history for {}", context);
            return;
        }

        match result {
            Ok(candles) => {
                self.buffer.replace(candles, SeriesOrigin::Exchange);
                self.push_full_series();
                self.last_error = None;
                info!("{}: {} candles loaded", self.context, self.buffer.len());
            }
            Err(e) => {
                warn!("Failed to load history for {}: {}", self.context, e);
                if !self.record_error(e) {
                    return;
                }
                if self.buffer.is_empty() {
                    self.seed_fallback();
                }
            }
        }

        if self.visible {
            self.redraw_overlays(true);
        }
        self.open_subscription();
        self.state = EngineState::Live;
    }

    /// Keeps `e` for the status indicator. A terminal error closes the
    /// chart; returns whether the chart is still running.
    fn record_error(&mut self, e: ChartError) -> bool {
        let recoverable = e.is_recoverable();
        self.last_error = Some(e);
        if !recoverable {
            error!("{}: unrecoverable error, closing chart", self.context);
            self.teardown();
        }
        recoverable
    }

    fn seed_fallback(&mut self) {
        if !self.config.fallback.placeholder_on_failure {
            info!("{}: no data available", self.context);
            return;
        }
        let candles = placeholder_series(&self.config.fallback, self.context.interval);
        self.buffer.replace(candles, SeriesOrigin::Placeholder);
        self.push_full_series();
        warn!("{}: showing {} placeholder candles", self.context, self.buffer.len());
    }

    fn on_backfill_loaded(&mut self, context: ChartContext, result: Result<Vec<Candle>, ChartError>) {
        if !self.is_current(&context) || self.state != EngineState::Loading(LoadKind::Backfill) {
            debug!("Dropping stale backfill for {}", context);
            return;
        }
        self.state = EngineState::Live;

        match result {
            Ok(candles) => {
                let added = self.buffer.prepend_older(candles);
                if added > 0 {
                    self.push_full_series();
                    info!("{}: backfilled {} candles", self.context, added);
                } else {
                    debug!("{}: no older candles", self.context);
                }
            }
            Err(e) => {
                warn!("Backfill failed for {}: {}", self.context, e);
                self.record_error(e);
            }
        }
    }

    fn on_feed_event(&mut self, context: ChartContext, event: FeedEvent) {
        if !self.is_current(&context) {
            trace!("Dropping feed event for {}", context);
            return;
        }

        match event {
            FeedEvent::Tick(candle) => {
                if !matches!(self.state, EngineState::Live | EngineState::Loading(LoadKind::Backfill)) {
                    return;
                }
                match self.buffer.upsert(candle).changed() {
                    Some(changed) => {
                        let point = SeriesPoint::for_kind(self.surface.kind, &changed);
                        self.surface.surface.update_point(self.surface.primary, point);
                    }
                    None => trace!("Discarding stale tick at {}", candle.time),
                }
            }
            FeedEvent::Error(message) => {
                warn!("Live feed error for {}: {}", self.context, message);
                self.close_subscription();
                self.record_error(ChartError::Stream(message));
            }
            FeedEvent::Closed => {
                warn!("Live feed for {} closed by server", self.context);
                self.close_subscription();
                self.record_error(ChartError::Stream("stream closed".to_string()));
            }
        }
    }

    fn open_subscription(&mut self) {
        self.close_subscription();

        let tx = self.events_tx.clone();
        let context = self.context.clone();
        let callback: FeedCallback = Box::new(move |event| {
            let _ = tx.send(EngineEvent::Feed {
                context: context.clone(),
                event,
            });
        });

        let handle = self
            .feed
            .subscribe(&self.context.symbol, self.context.interval, callback);
        debug!("Subscribed to {}", handle.stream());
        self.subscription = Some(handle);
    }

    fn close_subscription(&mut self) {
        if let Some(mut handle) = self.subscription.take() {
            handle.unsubscribe();
        }
    }

    fn push_full_series(&mut self) {
        let kind = self.surface.kind;
        let points = self
            .buffer
            .candles()
            .iter()
            .map(|c| SeriesPoint::for_kind(kind, c))
            .collect();
        self.surface.surface.set_data(self.surface.primary, points);
    }

    fn redraw_overlays(&mut self, force: bool) {
        self.decorator.sync(
            &mut self.surface.surface,
            self.surface.primary,
            &self.orders,
            force,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{kline_stream_name, parse_kline_message, parse_klines, FeedEmitter, MockCandleSource};
    use crate::render::{initialize_surface, HeadlessFactory, HeadlessSurface, RetryPolicy};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct PendingFetch {
        symbol: Symbol,
        interval: Interval,
        end_time_ms: Option<i64>,
        reply: oneshot::Sender<Result<Vec<Candle>, ChartError>>,
    }

    /// Source whose fetches complete only when the test says so.
    #[derive(Default)]
    struct ManualSource {
        pending: Mutex<Vec<PendingFetch>>,
        total: Mutex<usize>,
    }

    impl ManualSource {
        fn total(&self) -> usize {
            *self.total.lock().unwrap()
        }

        fn take(&self, index: usize) -> PendingFetch {
            self.pending.lock().unwrap().remove(index)
        }

        fn take_where(&self, matches: impl Fn(&PendingFetch) -> bool) -> PendingFetch {
            let mut pending = self.pending.lock().unwrap();
            let index = pending.iter().position(|p| matches(p)).unwrap();
            pending.remove(index)
        }

        fn pending_len(&self) -> usize {
            self.pending.lock().unwrap().len()
        }

        async fn wait_for(&self, total: usize) {
            for _ in 0..100 {
                if self.total() >= total {
                    return;
                }
                tokio::task::yield_now().await;
            }
            panic!("expected {} requests, saw {}", total, self.total());
        }
    }

    #[async_trait::async_trait]
    impl CandleSource for ManualSource {
        async fn fetch_history(
            &self,
            symbol: &Symbol,
            interval: Interval,
            end_time_ms: Option<i64>,
        ) -> Result<Vec<Candle>, ChartError> {
            let (reply, rx) = oneshot::channel();
            self.pending.lock().unwrap().push(PendingFetch {
                symbol: symbol.clone(),
                interval,
                end_time_ms,
                reply,
            });
            *self.total.lock().unwrap() += 1;
            rx.await
                .unwrap_or_else(|_| Err(ChartError::fetch(None, "request dropped")))
        }
    }

    struct ManualSubscription {
        stream: String,
        emitter: FeedEmitter,
    }

    #[derive(Default)]
    struct ManualFeed {
        subscriptions: Mutex<Vec<ManualSubscription>>,
    }

    impl ManualFeed {
        fn active(&self) -> Vec<String> {
            self.subscriptions
                .lock()
                .unwrap()
                .iter()
                .filter(|s| !s.emitter.is_closed())
                .map(|s| s.stream.clone())
                .collect()
        }

        fn opened(&self) -> usize {
            self.subscriptions.lock().unwrap().len()
        }

        fn emit_latest(&self, event: FeedEvent) -> bool {
            let subs = self.subscriptions.lock().unwrap();
            subs.last().is_some_and(|s| s.emitter.emit(event))
        }
    }

    impl LiveFeed for ManualFeed {
        fn subscribe(&self, symbol: &Symbol, interval: Interval, on_event: FeedCallback) -> SubscriptionHandle {
            let stream = kline_stream_name(symbol, interval);
            let (handle, emitter) = SubscriptionHandle::open(stream.clone(), on_event);
            self.subscriptions
                .lock()
                .unwrap()
                .push(ManualSubscription { stream, emitter });
            handle
        }
    }

    fn bar(time: i64, close: f64) -> Candle {
        Candle::new(time, close, close + 0.5, close - 0.5, close)
    }

    async fn build(
        source: Arc<dyn CandleSource>,
        feed: Arc<ManualFeed>,
        config: ChartConfig,
    ) -> ChartEngine<HeadlessSurface> {
        let mut factory = HeadlessFactory::new();
        let policy = RetryPolicy {
            retries: 0,
            backoff: Duration::ZERO,
        };
        let prepared = initialize_surface(&mut factory, policy).await.unwrap();
        ChartEngine::new(source, feed, prepared, config)
    }

    async fn pump(engine: &mut ChartEngine<HeadlessSurface>) {
        let event = engine.next_event().await.unwrap();
        engine.handle_event(event);
    }

    async fn live_engine(
        source: &Arc<ManualSource>,
        feed: &Arc<ManualFeed>,
        history: Vec<Candle>,
    ) -> ChartEngine<HeadlessSurface> {
        let mut engine = build(source.clone(), feed.clone(), ChartConfig::default()).await;
        engine.start();
        source.wait_for(source.total() + 1).await;
        let _ = source.take(0).reply.send(Ok(history));
        pump(&mut engine).await;
        assert_eq!(engine.state(), EngineState::Live);
        engine
    }

    #[tokio::test]
    async fn test_history_then_live_ticks() {
        let mut source = MockCandleSource::new();
        source
            .expect_fetch_history()
            .times(1)
            .returning(|_, _, end| {
                assert_eq!(end, None);
                Ok(parse_klines(&json!([[1000000, 100, 101, 99, 100.5]])))
            });
        let feed = Arc::new(ManualFeed::default());
        let mut engine = build(Arc::new(source), feed.clone(), ChartConfig::default()).await;

        engine.start();
        assert_eq!(engine.state(), EngineState::Loading(LoadKind::Initial));
        pump(&mut engine).await;

        let primary = engine.primary_series();
        assert_eq!(engine.buffer().candles(), &[Candle::new(1000, 100.0, 101.0, 99.0, 100.5)]);
        assert_eq!(engine.surface().set_data_count(primary), 1);
        assert_eq!(feed.active(), vec!["xrpusdt@kline_1m".to_string()]);

        let tick = parse_kline_message(r#"{"k":{"t":1000000,"o":100,"h":102,"l":99,"c":101}}"#).unwrap();
        assert!(feed.emit_latest(FeedEvent::Tick(tick)));
        pump(&mut engine).await;
        assert_eq!(engine.buffer().len(), 1);
        assert_eq!(engine.buffer().last().unwrap().close, 101.0);
        assert_eq!(engine.buffer().last().unwrap().high, 102.0);

        let tick = parse_kline_message(r#"{"k":{"t":1060000,"o":101,"h":101.5,"l":100.5,"c":101.2}}"#).unwrap();
        feed.emit_latest(FeedEvent::Tick(tick));
        pump(&mut engine).await;
        assert_eq!(engine.buffer().len(), 2);
        assert_eq!(engine.buffer().last().unwrap().time, 1060);

        // ticks only push the changed point
        assert_eq!(engine.surface().set_data_count(primary), 1);
        assert_eq!(engine.surface().update_count(primary), 2);
        assert_eq!(engine.surface().data(primary).len(), 2);
    }

    #[tokio::test]
    async fn test_subscription_waits_for_history() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = build(source.clone(), feed.clone(), ChartConfig::default()).await;

        engine.start();
        source.wait_for(1).await;
        assert_eq!(feed.opened(), 0);

        let _ = source.take(0).reply.send(Ok(vec![bar(60, 1.0)]));
        pump(&mut engine).await;
        assert_eq!(feed.opened(), 1);
        assert!(engine.is_subscribed());
    }

    #[tokio::test]
    async fn test_stale_tick_leaves_buffer() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = live_engine(&source, &feed, vec![bar(60, 1.0), bar(120, 1.2)]).await;
        let before = engine.buffer().candles().to_vec();

        feed.emit_latest(FeedEvent::Tick(bar(60, 9.0)));
        pump(&mut engine).await;
        assert_eq!(engine.buffer().candles(), before.as_slice());
        assert_eq!(engine.surface().update_count(engine.primary_series()), 0);
    }

    #[tokio::test]
    async fn test_failed_history_seeds_placeholder() {
        let mut source = MockCandleSource::new();
        source
            .expect_fetch_history()
            .returning(|_, _, _| Err(ChartError::fetch(Some(418), "teapot")));
        let feed = Arc::new(ManualFeed::default());
        let mut engine = build(Arc::new(source), feed.clone(), ChartConfig::default()).await;

        engine.start();
        pump(&mut engine).await;

        assert_eq!(engine.state(), EngineState::Live);
        assert!(engine.buffer().is_placeholder());
        assert_eq!(engine.buffer().len(), 60);
        assert!(engine.is_subscribed());

        let status = engine.status();
        assert!(status.is_unavailable());
        assert_eq!(status.error.as_deref(), Some("Fetch failed (418): teapot"));

        // synthetic data is never backfilled
        assert!(!engine.request_backfill());
    }

    #[tokio::test]
    async fn test_failed_history_without_placeholder() {
        let mut source = MockCandleSource::new();
        source
            .expect_fetch_history()
            .returning(|_, _, _| Err(ChartError::fetch(None, "offline")));
        let feed = Arc::new(ManualFeed::default());
        let mut config = ChartConfig::default();
        config.fallback.placeholder_on_failure = false;
        let mut engine = build(Arc::new(source), feed.clone(), config).await;

        engine.start();
        pump(&mut engine).await;

        assert!(engine.buffer().is_empty());
        assert!(engine.status().is_unavailable());
        assert!(engine.is_subscribed());
        assert!(!engine.request_backfill());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_buffer() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = live_engine(&source, &feed, vec![bar(60, 1.0), bar(120, 1.2)]).await;

        engine.refresh();
        assert!(!engine.is_subscribed());
        source.wait_for(2).await;
        let _ = source.take(0).reply.send(Err(ChartError::fetch(Some(500), "boom")));
        pump(&mut engine).await;

        assert_eq!(engine.buffer().len(), 2);
        assert_eq!(engine.buffer().origin(), SeriesOrigin::Exchange);
        assert!(engine.last_error().is_some());
        assert_eq!(feed.active().len(), 1);
    }

    #[tokio::test]
    async fn test_late_history_for_previous_symbol_is_dropped() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = build(source.clone(), feed.clone(), ChartConfig::default()).await;

        engine.start();
        source.wait_for(1).await;
        engine.change_symbol(Symbol::new("SOLUSDT").unwrap());
        source.wait_for(2).await;

        let old = source.take(0);
        assert_eq!(old.symbol.as_str(), "XRPUSDT");
        let _ = old.reply.send(Ok(vec![bar(60, 0.5)]));
        pump(&mut engine).await;
        assert!(engine.buffer().is_empty());
        assert_eq!(engine.state(), EngineState::Loading(LoadKind::Initial));
        assert_eq!(feed.opened(), 0);

        let new = source.take(0);
        assert_eq!(new.symbol.as_str(), "SOLUSDT");
        let _ = new.reply.send(Ok(vec![bar(60, 150.0)]));
        pump(&mut engine).await;
        assert_eq!(engine.buffer().last().unwrap().close, 150.0);
        assert_eq!(feed.active(), vec!["solusdt@kline_1m".to_string()]);
    }

    #[tokio::test]
    async fn test_late_history_after_switch_back_resolves_out_of_order() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = build(source.clone(), feed.clone(), ChartConfig::default()).await;

        engine.start();
        engine.change_interval(Interval::M5);
        source.wait_for(2).await;

        // newer request completes first, then the stale one arrives
        let newer = source.take_where(|p| p.interval == Interval::M5);
        let _ = newer.reply.send(Ok(vec![bar(300, 5.0)]));
        pump(&mut engine).await;

        let _ = source.take(0).reply.send(Ok(vec![bar(60, 1.0), bar(120, 1.0)]));
        pump(&mut engine).await;

        assert_eq!(engine.buffer().candles(), &[bar(300, 5.0)]);
        assert_eq!(engine.context().interval, Interval::M5);
    }

    #[tokio::test]
    async fn test_change_interval_replaces_subscription() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = live_engine(&source, &feed, vec![bar(60, 1.0)]).await;
        let primary = engine.primary_series();

        engine.change_interval(Interval::M15);
        assert!(feed.active().is_empty());
        assert!(engine.buffer().is_empty());
        assert!(engine.surface().data(primary).is_empty());

        source.wait_for(2).await;
        let _ = source.take(0).reply.send(Ok(vec![bar(900, 2.0)]));
        pump(&mut engine).await;
        assert_eq!(feed.active(), vec!["xrpusdt@kline_15m".to_string()]);
        assert_eq!(feed.opened(), 2);
    }

    #[tokio::test]
    async fn test_same_symbol_change_resubscribes() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = live_engine(&source, &feed, vec![bar(60, 1.0)]).await;

        engine.change_symbol(Symbol::new("xrpusdt").unwrap());
        source.wait_for(2).await;
        let _ = source.take(0).reply.send(Ok(vec![bar(60, 1.0)]));
        pump(&mut engine).await;
        assert_eq!(feed.opened(), 2);
        assert_eq!(feed.active().len(), 1);
    }

    #[tokio::test]
    async fn test_backfill_prepends_older_page() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = live_engine(&source, &feed, vec![bar(300, 3.0), bar(360, 3.6)]).await;

        assert!(engine.request_backfill());
        source.wait_for(2).await;
        let request = source.take(0);
        assert_eq!(request.end_time_ms, Some(299_999));

        let _ = request
            .reply
            .send(Ok(vec![bar(180, 1.8), bar(240, 2.4), bar(300, 9.9)]));
        pump(&mut engine).await;

        let times: Vec<i64> = engine.buffer().candles().iter().map(|c| c.time).collect();
        assert_eq!(times, vec![180, 240, 300, 360]);
        assert_eq!(engine.buffer().earliest_time(), Some(180));
        assert_eq!(engine.buffer().candles()[2].close, 3.0);
        assert_eq!(engine.state(), EngineState::Live);
        assert_eq!(engine.surface().data(engine.primary_series()).len(), 4);
    }

    #[tokio::test]
    async fn test_backfill_is_single_flight() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = live_engine(&source, &feed, vec![bar(300, 3.0)]).await;

        engine.surface().emit_visible_range(LogicalRange { from: 1.0, to: 50.0 });
        engine.surface().emit_visible_range(LogicalRange { from: -2.0, to: 50.0 });
        pump(&mut engine).await;
        pump(&mut engine).await;
        assert_eq!(engine.state(), EngineState::Loading(LoadKind::Backfill));
        assert!(!engine.request_backfill());

        source.wait_for(2).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(source.total(), 2);
        assert_eq!(source.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_range_far_from_edge_does_not_backfill() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = live_engine(&source, &feed, vec![bar(300, 3.0)]).await;

        engine.on_visible_range_change(LogicalRange { from: 5.0, to: 80.0 });
        assert_eq!(engine.state(), EngineState::Live);
    }

    #[tokio::test]
    async fn test_failed_backfill_allows_retry() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = live_engine(&source, &feed, vec![bar(300, 3.0)]).await;

        assert!(engine.request_backfill());
        source.wait_for(2).await;
        let _ = source.take(0).reply.send(Err(ChartError::fetch(Some(429), "slow down")));
        pump(&mut engine).await;

        assert_eq!(engine.state(), EngineState::Live);
        assert_eq!(engine.buffer().len(), 1);
        assert!(matches!(engine.last_error(), Some(ChartError::Fetch { status: Some(429), .. })));
        assert!(engine.request_backfill());
    }

    #[tokio::test]
    async fn test_backfill_result_after_switch_is_dropped() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = live_engine(&source, &feed, vec![bar(300, 3.0)]).await;

        engine.request_backfill();
        source.wait_for(2).await;
        engine.change_symbol(Symbol::new("ETHUSDT").unwrap());
        source.wait_for(3).await;

        let _ = source.take(0).reply.send(Ok(vec![bar(60, 1.0)]));
        pump(&mut engine).await;
        assert!(engine.buffer().is_empty());
        assert_eq!(engine.state(), EngineState::Loading(LoadKind::Initial));
    }

    #[tokio::test]
    async fn test_feed_event_from_old_context_is_dropped() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = live_engine(&source, &feed, vec![bar(60, 1.0)]).await;
        let old = engine.context().clone();

        engine.refresh();
        source.wait_for(2).await;
        let _ = source.take(0).reply.send(Ok(vec![bar(60, 1.0)]));
        pump(&mut engine).await;

        engine.handle_event(EngineEvent::Feed {
            context: old,
            event: FeedEvent::Tick(bar(120, 5.0)),
        });
        assert_eq!(engine.buffer().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_error_is_recorded() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = live_engine(&source, &feed, vec![bar(60, 1.0)]).await;

        feed.emit_latest(FeedEvent::Error("connection reset".to_string()));
        pump(&mut engine).await;
        assert_eq!(
            engine.last_error(),
            Some(&ChartError::Stream("connection reset".to_string()))
        );
        assert_eq!(engine.buffer().len(), 1);
        assert_eq!(engine.state(), EngineState::Live);
        assert!(!engine.status().subscribed);
        assert!(feed.active().is_empty());
    }

    #[tokio::test]
    async fn test_server_close_marks_feed_down() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = live_engine(&source, &feed, vec![bar(60, 1.0)]).await;

        feed.emit_latest(FeedEvent::Closed);
        pump(&mut engine).await;

        let status = engine.status();
        assert!(!status.subscribed);
        assert_eq!(status.error.as_deref(), Some("Stream: stream closed"));
        assert_eq!(status.candles, 1);

        // a refresh brings the stream back
        engine.refresh();
        source.wait_for(2).await;
        let _ = source.take(0).reply.send(Ok(vec![bar(60, 1.0)]));
        pump(&mut engine).await;
        assert!(engine.status().subscribed);
        assert_eq!(engine.last_error(), None);
    }

    #[tokio::test]
    async fn test_terminal_error_closes_chart() {
        let mut source = MockCandleSource::new();
        source
            .expect_fetch_history()
            .returning(|_, _, _| Err(ChartError::RenderInit { attempts: 1 }));
        let feed = Arc::new(ManualFeed::default());
        let mut engine = build(Arc::new(source), feed.clone(), ChartConfig::default()).await;

        engine.start();
        pump(&mut engine).await;

        assert_eq!(engine.state(), EngineState::Closed);
        assert!(engine.buffer().is_empty());
        assert!(engine.surface().is_released());
        assert_eq!(feed.opened(), 0);
        assert!(matches!(engine.last_error(), Some(ChartError::RenderInit { .. })));
    }

    #[tokio::test]
    async fn test_reload_redraws_overlays() {
        use crate::render::RenderingSurface;

        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = live_engine(&source, &feed, vec![bar(60, 1.0)]).await;
        let primary = engine.primary_series();

        let orders: Vec<OrderRecord> = serde_json::from_value(json!([
            {"side": "BUY", "priceBuy": 1.0, "dateBuy": 60_000}
        ]))
        .unwrap();
        engine.set_orders(Arc::new(orders));
        assert_eq!(engine.surface().markers(primary).len(), 1);

        engine.surface.surface.set_markers(primary, Vec::new());
        engine.refresh();
        source.wait_for(2).await;
        let _ = source.take(0).reply.send(Ok(vec![bar(60, 1.0), bar(120, 1.1)]));
        pump(&mut engine).await;

        assert_eq!(engine.surface().markers(primary).len(), 1);
    }

    #[tokio::test]
    async fn test_handle_switches_interval_while_running() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = build(source.clone(), feed.clone(), ChartConfig::default()).await;
        let handle = engine.handle();
        engine.start();

        let driver = async {
            source.wait_for(1).await;
            let _ = source.take(0).reply.send(Ok(vec![bar(60, 1.0)]));
            while feed.opened() < 1 {
                tokio::task::yield_now().await;
            }

            assert!(handle.change_interval(Interval::M5));
            source.wait_for(2).await;
            let request = source.take(0);
            assert_eq!(request.interval, Interval::M5);
            let _ = request.reply.send(Ok(vec![bar(300, 5.0)]));
            while feed.opened() < 2 {
                tokio::task::yield_now().await;
            }
            assert_eq!(feed.active(), vec!["xrpusdt@kline_5m".to_string()]);

            assert!(handle.change_symbol(Symbol::new("ETHUSDT").unwrap()));
            source.wait_for(3).await;
            let request = source.take(0);
            assert_eq!(request.symbol.as_str(), "ETHUSDT");
            assert_eq!(request.interval, Interval::M5);
            let _ = request.reply.send(Ok(vec![bar(600, 2000.0)]));
            while feed.opened() < 3 {
                tokio::task::yield_now().await;
            }

            assert!(handle.refresh());
            source.wait_for(4).await;
            let _ = source.take(0).reply.send(Ok(vec![bar(600, 2001.0)]));
            while feed.opened() < 4 {
                tokio::task::yield_now().await;
            }
            handle.teardown();
        };
        tokio::join!(engine.run(), driver);

        assert_eq!(engine.state(), EngineState::Closed);
        assert_eq!(engine.context().symbol.as_str(), "ETHUSDT");
        assert_eq!(engine.context().interval, Interval::M5);
        assert_eq!(engine.buffer().candles(), &[bar(600, 2001.0)]);
        assert!(feed.active().is_empty());
    }

    #[tokio::test]
    async fn test_orders_are_drawn_through_handle() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = live_engine(&source, &feed, vec![bar(60, 1.0)]).await;
        let handle = engine.handle();

        let orders: Vec<OrderRecord> = serde_json::from_value(json!([
            {"priceBuy": 50, "priceWaitSell": 55, "status": "WAITING_SELL", "dateBuy": 1_700_000_000_000i64}
        ]))
        .unwrap();
        assert!(handle.set_orders(orders));
        pump(&mut engine).await;

        let primary = engine.primary_series();
        assert_eq!(engine.surface().markers(primary).len(), 1);
        assert_eq!(engine.surface().line_series().len(), 1);

        handle.set_visible(false);
        pump(&mut engine).await;
        handle.set_orders(Vec::new());
        pump(&mut engine).await;
        // hidden charts are not redrawn
        assert_eq!(engine.surface().markers(primary).len(), 1);

        handle.set_visible(true);
        pump(&mut engine).await;
        assert!(engine.surface().markers(primary).is_empty());
        assert!(engine.surface().line_series().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let source = Arc::new(ManualSource::default());
        let feed = Arc::new(ManualFeed::default());
        let mut engine = live_engine(&source, &feed, vec![bar(60, 1.0)]).await;

        engine.refresh();
        source.wait_for(2).await;
        engine.teardown();
        engine.teardown();

        assert_eq!(engine.state(), EngineState::Closed);
        assert!(feed.active().is_empty());
        assert!(engine.surface().is_released());
        assert!(!engine.surface().has_range_listener());

        let _ = source.take(0).reply.send(Ok(vec![bar(60, 2.0)]));
        pump(&mut engine).await;
        assert_eq!(engine.state(), EngineState::Closed);
        assert_eq!(feed.opened(), 1);

        engine.change_symbol(Symbol::new("BTCUSDT").unwrap());
        assert_eq!(engine.context().symbol.as_str(), "XRPUSDT");
    }

    #[tokio::test]
    async fn test_run_stops_on_teardown() {
        let mut source = MockCandleSource::new();
        source.expect_fetch_history().returning(|_, _, _| Ok(vec![]));
        let feed = Arc::new(ManualFeed::default());
        let mut engine = build(Arc::new(source), feed.clone(), ChartConfig::default()).await;

        let handle = engine.handle();
        engine.start();
        handle.teardown();
        engine.run().await;

        assert_eq!(engine.state(), EngineState::Closed);
        assert_eq!(feed.opened(), 0);
    }
}
