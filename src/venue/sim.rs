//! Simulated Venue
//!
//! In-process venue adapter for dry-run mode and tests. Book updates come
//! from a script; order submissions consume scripted outcomes in order, or
//! fall back to filling at the requested price when no script is loaded.
//! Optional latency and jitter make dry-run timings honest.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::sleep;
use tracing::debug;

use crate::clock::now_ms;
use crate::venue::{
    BookEvent, BookStream, Outcome, OrderOutcome, OrderRequest, VenueClient, VenueId,
};

#[derive(Debug, Clone, Default)]
pub struct SimLatency {
    pub base_ms: u64,
    pub jitter_ms: u64,
}

#[derive(Default)]
struct SimState {
    /// Book events per market id, drained by `subscribe_book`.
    book_scripts: HashMap<String, Vec<BookEvent>>,
    /// Scripted order outcomes, consumed FIFO.
    order_script: VecDeque<OrderOutcome>,
    /// Every request the engine submitted, for assertions.
    placed: Vec<OrderRequest>,
    positions: HashMap<Outcome, i64>,
    cancel_calls: Vec<Option<String>>,
    order_seq: u64,
}

/// Scripted venue double. Cloning shares the underlying state so tests can
/// keep a handle while the engine owns another.
#[derive(Clone)]
pub struct SimVenue {
    id: VenueId,
    latency: SimLatency,
    /// Delay between scripted book events; zero streams them all at once.
    book_pace: Duration,
    state: Arc<Mutex<SimState>>,
}

impl SimVenue {
    pub fn new(id: VenueId) -> Self {
        Self {
            id,
            latency: SimLatency::default(),
            book_pace: Duration::ZERO,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    pub fn with_latency(mut self, latency: SimLatency) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_book_pace(mut self, pace: Duration) -> Self {
        self.book_pace = pace;
        self
    }

    // ---- scripting ------------------------------------------------------

    pub fn load_book_script(&self, market_id: &str, events: Vec<BookEvent>) {
        self.state
            .lock()
            .book_scripts
            .insert(market_id.to_string(), events);
    }

    pub fn push_order_outcome(&self, outcome: OrderOutcome) {
        self.state.lock().order_script.push_back(outcome);
    }

    pub fn set_position(&self, side: Outcome, qty: i64) {
        self.state.lock().positions.insert(side, qty);
    }

    // ---- inspection -----------------------------------------------------

    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.state.lock().placed.clone()
    }

    pub fn cancel_calls(&self) -> usize {
        self.state.lock().cancel_calls.len()
    }

    async fn simulate_latency(&self) {
        if self.latency.base_ms == 0 && self.latency.jitter_ms == 0 {
            return;
        }
        let jitter = if self.latency.jitter_ms > 0 {
            StdRng::from_entropy().gen_range(0..=self.latency.jitter_ms)
        } else {
            0
        };
        sleep(Duration::from_millis(self.latency.base_ms + jitter)).await;
    }

    fn apply_fill(&self, req: &OrderRequest, outcome: &OrderOutcome) {
        let qty = outcome.filled_qty();
        if qty == 0 {
            return;
        }
        let signed = match req.action {
            crate::venue::OrderAction::Buy => qty,
            crate::venue::OrderAction::Sell => -qty,
        };
        let mut state = self.state.lock();
        *state.positions.entry(req.side).or_insert(0) += signed;
    }
}

#[async_trait]
impl VenueClient for SimVenue {
    fn id(&self) -> VenueId {
        self.id
    }

    async fn subscribe_book(&self, market_id: &str) -> anyhow::Result<BookStream> {
        let events = self
            .state
            .lock()
            .book_scripts
            .remove(market_id)
            .unwrap_or_default();
        debug!(venue = %self.id, market_id, n = events.len(), "sim book subscription");
        let pace = self.book_pace;
        if pace.is_zero() {
            return Ok(Box::pin(stream::iter(events)));
        }
        Ok(Box::pin(futures_util::StreamExt::then(
            stream::iter(events),
            move |event| async move {
                sleep(pace).await;
                event
            },
        )))
    }

    async fn place_order(&self, req: OrderRequest) -> OrderOutcome {
        self.simulate_latency().await;

        let scripted = {
            let mut state = self.state.lock();
            state.placed.push(req.clone());
            state.order_seq += 1;
            state.order_script.pop_front()
        };

        let outcome = scripted.unwrap_or_else(|| {
            // No script: fill fully at the requested price.
            let seq = self.state.lock().order_seq;
            OrderOutcome::Filled {
                fill_price: req.price,
                fill_qty: req.qty,
                venue_order_id: format!("sim-{}-{}", self.id, seq),
            }
        });

        self.apply_fill(&req, &outcome);
        outcome
    }

    async fn cancel_all(&self, market_id: Option<&str>) {
        self.state
            .lock()
            .cancel_calls
            .push(market_id.map(str::to_string));
    }

    async fn get_positions(&self) -> anyhow::Result<HashMap<Outcome, i64>> {
        Ok(self.state.lock().positions.clone())
    }

    fn now_ms(&self) -> i64 {
        now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::{OrderAction, TimeInForce};
    use futures_util::StreamExt;

    fn request(qty: i64) -> OrderRequest {
        OrderRequest {
            client_order_id: "c1".into(),
            market_id: "KXBTC".into(),
            side: Outcome::No,
            action: OrderAction::Buy,
            price: 0.46,
            qty,
            tif: TimeInForce::Fok,
        }
    }

    #[tokio::test]
    async fn unscripted_orders_fill_at_the_requested_price() {
        let venue = SimVenue::new(VenueId::Kalshi);
        let outcome = venue.place_order(request(2)).await;
        assert!(outcome.is_full_fill());
        assert_eq!(outcome.fill_price(), Some(0.46));
        assert_eq!(venue.placed_orders().len(), 1);
        let positions = venue.get_positions().await.unwrap();
        assert_eq!(positions.get(&Outcome::No), Some(&2));
    }

    #[tokio::test]
    async fn scripted_outcomes_are_consumed_in_order() {
        let venue = SimVenue::new(VenueId::Kalshi);
        venue.push_order_outcome(OrderOutcome::NotFilled {
            reason: "fok missed".into(),
        });
        venue.push_order_outcome(OrderOutcome::Filled {
            fill_price: 0.44,
            fill_qty: 1,
            venue_order_id: "v2".into(),
        });

        let first = venue.place_order(request(1)).await;
        assert!(matches!(first, OrderOutcome::NotFilled { .. }));
        let second = venue.place_order(request(1)).await;
        assert_eq!(second.fill_price(), Some(0.44));
    }

    #[tokio::test]
    async fn sells_reduce_positions() {
        let venue = SimVenue::new(VenueId::Polymarket);
        venue.set_position(Outcome::Yes, 3);
        let mut req = request(2);
        req.side = Outcome::Yes;
        req.action = OrderAction::Sell;
        venue.place_order(req).await;
        let positions = venue.get_positions().await.unwrap();
        assert_eq!(positions.get(&Outcome::Yes), Some(&1));
    }

    #[tokio::test]
    async fn book_script_drains_through_subscription() {
        let venue = SimVenue::new(VenueId::Kalshi);
        venue.load_book_script(
            "KXBTC",
            vec![BookEvent::LadderSnapshot {
                side: Outcome::Yes,
                levels: vec![(45, 10)],
                ts_exchange: 1,
            }],
        );
        let mut stream = venue.subscribe_book("KXBTC").await.unwrap();
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }
}
