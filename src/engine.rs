//! Event Plumbing
//!
//! One logical event loop owns every piece of mutable state: normalizers,
//! quote cache, risk, positions, executor, mapping store. Feeds, the interval
//! scheduler, and periodic timers are producers into a single queue; the loop
//! consumes events strictly in arrival order. A book update triggers a scan
//! only when nothing else is in flight — opportunities are never queued,
//! because a stale opportunity is worthless.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::book::{Normalizer, QuoteCache};
use crate::clock::{current_key, now_ms, IntervalKey, IntervalScheduler};
use crate::config::EngineConfig;
use crate::discovery::DiscoveryClient;
use crate::error::EngineError;
use crate::executor::{ExecDeps, Executor};
use crate::guards::{self, GuardReason, GuardVerdict};
use crate::journal::{EventJournal, EventKind};
use crate::mapping::{verify_equivalence, IntervalMapping, MappingStore};
use crate::position::{reconcile, OutcomePosition, PositionTracker, ReconcileOutcome};
use crate::risk::RiskState;
use crate::rollover::{RolloverDeps, RolloverOrchestrator};
use crate::scanner::{scan, ScanOutcome, ScanParams};
use crate::settlement::SettlementObserver;
use crate::venue::feed::{spawn_feed, FeedEvent, FeedSpec};
use crate::venue::wire;
use crate::venue::{BookEvent, Outcome, VenueClient, VenueId};

/// Everything the loop consumes. Producers: book feeds, the interval
/// scheduler, the reconcile ticker, one-shot settlement timers, and the
/// shutdown hook.
#[derive(Debug)]
pub enum EngineEvent {
    Book { venue: VenueId, event: BookEvent },
    FeedReconnected(VenueId),
    Prepare(IntervalKey),
    Rollover(IntervalKey),
    ReconcileTick,
    SettleCheck(IntervalKey),
    Shutdown,
}

pub struct Engine {
    cfg: EngineConfig,
    polymarket: Arc<dyn VenueClient>,
    kalshi: Arc<dyn VenueClient>,
    discovery: Arc<dyn DiscoveryClient>,
    journal: EventJournal,

    mapping_store: MappingStore,
    quotes: QuoteCache,
    norm_polymarket: Normalizer,
    norm_kalshi: Normalizer,
    risk: RiskState,
    positions: PositionTracker,
    executor: Executor,
    orchestrator: RolloverOrchestrator,
    settlement: SettlementObserver,

    active: IntervalKey,
    tradable: bool,
    /// Mappings kept past rollover until their settlement check runs.
    settling: HashMap<IntervalKey, IntervalMapping>,

    feed_tasks: Vec<JoinHandle<()>>,
    feed_shutdown: Option<watch::Sender<bool>>,

    tx: mpsc::Sender<EngineEvent>,
    rx: mpsc::Receiver<EngineEvent>,
}

impl Engine {
    pub fn new(
        cfg: EngineConfig,
        polymarket: Arc<dyn VenueClient>,
        kalshi: Arc<dyn VenueClient>,
        discovery: Arc<dyn DiscoveryClient>,
    ) -> anyhow::Result<Self> {
        let journal = EventJournal::new(cfg.journal_dir.clone())?;
        let (tx, rx) = mpsc::channel(4096);
        let now = now_ms();
        Ok(Self {
            executor: Executor::new(cfg.clone()),
            journal,
            polymarket,
            kalshi,
            discovery,
            mapping_store: MappingStore::new(),
            quotes: QuoteCache::new(),
            norm_polymarket: Normalizer::explicit(VenueId::Polymarket),
            norm_kalshi: Normalizer::bid_only(VenueId::Kalshi),
            risk: RiskState::new(now),
            positions: PositionTracker::new(),
            orchestrator: RolloverOrchestrator::new(),
            settlement: SettlementObserver::new(),
            active: current_key(now),
            tradable: false,
            settling: HashMap::new(),
            feed_tasks: Vec::new(),
            feed_shutdown: None,
            cfg,
            tx,
            rx,
        })
    }

    /// Handle for producers outside the loop (shutdown hooks, tests).
    pub fn sender(&self) -> mpsc::Sender<EngineEvent> {
        self.tx.clone()
    }

    pub fn risk(&self) -> &RiskState {
        &self.risk
    }

    pub fn positions(&self) -> &PositionTracker {
        &self.positions
    }

    pub fn settlement(&self) -> &SettlementObserver {
        &self.settlement
    }

    /// Run the loop until `Shutdown` or all producers hang up.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            dry_run = self.cfg.dry_run,
            interval = %self.active,
            "🚀 engine starting"
        );
        self.journal.record(
            EventKind::State,
            json!({ "event": "startup", "dry_run": self.cfg.dry_run, "interval": self.active }),
        );
        self.orchestrator.set_active(self.active);

        // Trade the interval we started inside of, if it can be verified.
        match self.prepare_interval(self.active).await {
            Ok(()) => {
                if let Some(mapping) = self.mapping_store.get(&self.active).cloned() {
                    self.tradable = true;
                    self.spawn_book_feeds(&mapping).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "startup interval not tradable");
            }
        }

        let scheduler = IntervalScheduler::new(self.cfg.prepare_lead_ms, self.tx.clone());
        let scheduler_task = tokio::spawn(scheduler.run());
        let reconcile_task = {
            let tx = self.tx.clone();
            let every = Duration::from_millis(self.cfg.reconcile_interval_ms);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(every);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tick.tick().await;
                    if tx.send(EngineEvent::ReconcileTick).await.is_err() {
                        return;
                    }
                }
            })
        };

        while let Some(event) = self.rx.recv().await {
            match event {
                EngineEvent::Book { venue, event } => self.handle_book(venue, event).await,
                EngineEvent::FeedReconnected(venue) => {
                    debug!(%venue, "feed resubscribed; voiding its book state");
                    self.quotes.clear(venue);
                    match venue {
                        VenueId::Polymarket => self.norm_polymarket.flush(),
                        VenueId::Kalshi => self.norm_kalshi.flush(),
                    }
                }
                EngineEvent::Prepare(key) => {
                    if let Err(e) = self.prepare_interval(key).await {
                        warn!(interval = %key, error = %e, "prepare failed; interval will not trade");
                        self.journal.record(
                            EventKind::Error,
                            json!({ "error": e.to_string(), "interval": key }),
                        );
                    }
                }
                EngineEvent::Rollover(new_key) => self.handle_rollover(new_key).await,
                EngineEvent::ReconcileTick => self.handle_reconcile().await,
                EngineEvent::SettleCheck(key) => self.handle_settle_check(key).await,
                EngineEvent::Shutdown => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        scheduler_task.abort();
        reconcile_task.abort();
        self.stop_feeds();
        self.journal
            .record(EventKind::State, json!({ "event": "shutdown" }));
        Ok(())
    }

    // ---- interval preparation -------------------------------------------

    /// Discover and verify one interval's market pair. Fail-closed: any
    /// error leaves the interval untradable.
    async fn prepare_interval(&mut self, key: IntervalKey) -> Result<(), EngineError> {
        if self.mapping_store.get(&key).is_some() {
            return Ok(());
        }
        let discovery = self
            .discovery
            .discover(key)
            .await
            .map_err(|e| EngineError::TransientNetwork(e.to_string()))?;
        if !verify_equivalence(
            key,
            &discovery.mapping,
            &discovery.meta_polymarket,
            &discovery.meta_kalshi,
        ) {
            return Err(EngineError::EquivalenceNotVerified(key.start_ts));
        }
        info!(
            interval = %key,
            poly_up = %discovery.mapping.polymarket.up_token,
            kalshi = %discovery.mapping.kalshi.ticker,
            "interval pair verified"
        );
        self.mapping_store.set(discovery.mapping);
        Ok(())
    }

    // ---- book feeds ------------------------------------------------------

    fn stop_feeds(&mut self) {
        if let Some(shutdown) = self.feed_shutdown.take() {
            let _ = shutdown.send(true);
        }
        for task in self.feed_tasks.drain(..) {
            task.abort();
        }
    }

    /// (Re)subscribe both venues' books for an interval. With WS URLs
    /// configured the reconnecting feed supervisor owns the transport;
    /// otherwise the venue adapters' own streams are pumped.
    async fn spawn_book_feeds(&mut self, mapping: &IntervalMapping) {
        self.stop_feeds();

        if let (Some(poly_url), Some(kalshi_url)) = (
            self.cfg.polymarket_ws_url.clone(),
            self.cfg.kalshi_ws_url.clone(),
        ) {
            let (ftx, mut frx) = mpsc::channel::<FeedEvent>(1024);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            let up = mapping.polymarket.up_token.clone();
            let down = mapping.polymarket.down_token.clone();
            let poly_spec = FeedSpec {
                venue: VenueId::Polymarket,
                ws_url: poly_url,
                subscribe_payload: json!({
                    "type": "market",
                    "assets_ids": [up, down],
                })
                .to_string(),
                decode: {
                    let (up, down) = (
                        mapping.polymarket.up_token.clone(),
                        mapping.polymarket.down_token.clone(),
                    );
                    Box::new(move |text| {
                        wire::decode_polymarket(text, |id| {
                            if id == up {
                                Some(Outcome::Yes)
                            } else if id == down {
                                Some(Outcome::No)
                            } else {
                                None
                            }
                        })
                    })
                },
            };
            let ticker = mapping.kalshi.ticker.clone();
            let kalshi_spec = FeedSpec {
                venue: VenueId::Kalshi,
                ws_url: kalshi_url,
                subscribe_payload: json!({
                    "id": 1,
                    "cmd": "subscribe",
                    "params": {
                        "channels": ["orderbook_delta"],
                        "market_tickers": [ticker],
                    },
                })
                .to_string(),
                decode: {
                    let ticker = mapping.kalshi.ticker.clone();
                    Box::new(move |text| wire::decode_kalshi(text, &ticker))
                },
            };

            self.feed_tasks
                .push(spawn_feed(poly_spec, ftx.clone(), shutdown_rx.clone()));
            self.feed_tasks
                .push(spawn_feed(kalshi_spec, ftx, shutdown_rx));

            let tx = self.tx.clone();
            self.feed_tasks.push(tokio::spawn(async move {
                while let Some(event) = frx.recv().await {
                    let mapped = match event {
                        FeedEvent::Book { venue, event } => EngineEvent::Book { venue, event },
                        FeedEvent::Resubscribed { venue } => EngineEvent::FeedReconnected(venue),
                    };
                    if tx.send(mapped).await.is_err() {
                        return;
                    }
                }
            }));
            self.feed_shutdown = Some(shutdown_tx);
            return;
        }

        // Adapter-stream path (sim venues, tests).
        for (venue, market_id) in mapping.subscriptions() {
            let client = match venue {
                VenueId::Polymarket => Arc::clone(&self.polymarket),
                VenueId::Kalshi => Arc::clone(&self.kalshi),
            };
            let tx = self.tx.clone();
            self.feed_tasks.push(tokio::spawn(async move {
                use futures_util::StreamExt;
                let mut stream = match client.subscribe_book(&market_id).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!(%venue, market_id, error = %e, "book subscription failed");
                        return;
                    }
                };
                while let Some(event) = stream.next().await {
                    if tx.send(EngineEvent::Book { venue, event }).await.is_err() {
                        return;
                    }
                }
            }));
        }
    }

    // ---- event handlers --------------------------------------------------

    async fn handle_book(&mut self, venue: VenueId, event: BookEvent) {
        let normalizer = match venue {
            VenueId::Polymarket => &mut self.norm_polymarket,
            VenueId::Kalshi => &mut self.norm_kalshi,
        };
        match normalizer.apply(event, now_ms()) {
            Ok(Some(quote)) => {
                self.quotes.set(venue, quote);
                self.maybe_trade().await;
            }
            Ok(None) => {}
            Err(reject) => {
                // Silent skip on the trading path; the book will right itself
                // with the next snapshot.
                debug!(%venue, %reject, "book update rejected");
            }
        }
    }

    /// Scan on the freshest books and execute if every gate opens.
    async fn maybe_trade(&mut self) {
        if !self.tradable || self.risk.kill_tripped() || self.risk.is_busy() {
            return;
        }
        let Some(mapping) = self.mapping_store.get(&self.active).cloned() else {
            return;
        };

        let params = ScanParams {
            stale_ms: self.cfg.stale_quote_ms,
            min_edge_net: self.cfg.min_edge_net,
            slippage_buffer_per_leg: self.cfg.slippage_buffer_per_leg,
            book_depth_fraction: self.cfg.book_depth_fraction,
            max_qty_per_trade: self.cfg.max_qty_per_trade,
            min_order_size_polymarket: self.cfg.min_order_size_a,
            min_order_size_kalshi: self.cfg.min_order_size_b,
            fee_polymarket: self.cfg.fee_a,
            fee_kalshi: self.cfg.fee_b,
            preferred_venue: self.executor.preferred_venue(),
        };
        let now = now_ms();
        let opp = match scan(
            self.quotes.get(VenueId::Polymarket),
            self.quotes.get(VenueId::Kalshi),
            &mapping,
            &params,
            now,
        ) {
            ScanOutcome::Opportunity(opp) => opp,
            ScanOutcome::Rejected(reject) => {
                debug!(%reject, "scan rejected");
                return;
            }
        };
        self.journal.record_obj(EventKind::Opportunity, &opp);

        match guards::evaluate(&opp, &self.risk, &self.positions, &self.cfg, now) {
            GuardVerdict::Pass => {}
            GuardVerdict::Fail(GuardReason::DailyLossExceeded { daily_pnl }) => {
                self.risk.trip_kill(format!(
                    "daily loss limit reached ({daily_pnl:.2})"
                ));
                self.journal.record(
                    EventKind::Kill,
                    json!({ "reason": "daily_loss", "daily_pnl": daily_pnl }),
                );
                return;
            }
            GuardVerdict::Fail(reason) => {
                debug!(%reason, "guard rejected opportunity");
                return;
            }
        }

        if !self.risk.try_acquire_busy() {
            return;
        }
        let mut deps = ExecDeps {
            polymarket: &self.polymarket,
            kalshi: &self.kalshi,
            mapping: &mapping,
            quotes: &self.quotes,
            risk: &mut self.risk,
            positions: &mut self.positions,
            journal: &self.journal,
            interval_end_ms: self.active.end_ms(),
        };
        let record = self.executor.execute(&opp, &mut deps).await;
        self.risk.release_busy();
        debug!(exec_id = %record.id, status = ?record.status, "execution finished");
    }

    async fn handle_rollover(&mut self, new_key: IntervalKey) {
        // Keep the retiring mapping around for its settlement check.
        let prior = self.active;
        let prior_mapping = self.mapping_store.get(&prior).cloned();

        let mut deps = RolloverDeps {
            polymarket: &self.polymarket,
            kalshi: &self.kalshi,
            mapping_store: &mut self.mapping_store,
            quotes: &mut self.quotes,
            normalizer_polymarket: &mut self.norm_polymarket,
            normalizer_kalshi: &mut self.norm_kalshi,
            risk: &mut self.risk,
            positions: &mut self.positions,
            journal: &self.journal,
        };
        let outcome = self.orchestrator.on_rollover(new_key, &mut deps).await;
        if !outcome.rolled {
            return;
        }
        self.active = new_key;
        self.tradable = outcome.tradable;

        if let Some(mapping) = prior_mapping {
            let key = mapping.key;
            self.settling.insert(key, mapping);
            let tx = self.tx.clone();
            let delay = Duration::from_millis(self.cfg.settle_delay_ms);
            // Deliberately untracked: a one-shot timer that outlives feed
            // teardown and dies harmlessly if the loop is gone.
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(EngineEvent::SettleCheck(key)).await;
            });
        }

        match self.mapping_store.get(&new_key).cloned() {
            Some(mapping) if outcome.tradable => self.spawn_book_feeds(&mapping).await,
            _ => self.stop_feeds(),
        }
    }

    async fn handle_reconcile(&mut self) {
        let mut reports = HashMap::new();
        for (venue, client) in [
            (VenueId::Polymarket, &self.polymarket),
            (VenueId::Kalshi, &self.kalshi),
        ] {
            match client.get_positions().await {
                Ok(map) => {
                    reports.insert(
                        venue,
                        OutcomePosition {
                            yes: map.get(&Outcome::Yes).copied().unwrap_or(0),
                            no: map.get(&Outcome::No).copied().unwrap_or(0),
                        },
                    );
                }
                Err(e) => {
                    // A reconcile pass with half the picture proves nothing.
                    self.journal.record(
                        EventKind::Error,
                        json!({
                            "error": EngineError::TransientNetwork(e.to_string()).to_string(),
                            "during": "reconcile",
                            "venue": venue,
                        }),
                    );
                    return;
                }
            }
        }

        match reconcile(&self.positions, &reports) {
            ReconcileOutcome::Clean | ReconcileOutcome::Drift { .. } => {}
            ReconcileOutcome::DirectionalExposure { net, details } => {
                let err = EngineError::StateInvariantViolation(format!(
                    "position drift with net exposure {net}"
                ));
                self.risk.trip_kill(err.to_string());
                self.journal.record(
                    EventKind::Kill,
                    json!({ "reason": "position_drift", "net": net, "details": details }),
                );
            }
        }
    }

    async fn handle_settle_check(&mut self, key: IntervalKey) {
        let Some(mapping) = self.settling.remove(&key) else {
            return;
        };
        match self.discovery.settlement_refs(key).await {
            Ok(refs) => {
                self.settlement
                    .observe(&mapping, refs, self.cfg.settle_delay_ms, &self.journal);
            }
            Err(e) => {
                self.journal.record(
                    EventKind::Error,
                    json!({
                        "error": EngineError::TransientNetwork(e.to_string()).to_string(),
                        "during": "settlement_check",
                        "interval": key,
                    }),
                );
            }
        }
    }
}
