//! Rollover Orchestrator
//!
//! At each quarter-hour boundary the previous interval's markets die and the
//! prepared pair becomes current. Rollover is fail-closed: without a mapping
//! verified during PREPARE the new interval simply is not traded. Cooldown
//! and daily P&L survive the boundary; the busy lock and all book state do
//! not.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::book::{Normalizer, QuoteCache};
use crate::clock::IntervalKey;
use crate::journal::{EventJournal, EventKind};
use crate::mapping::MappingStore;
use crate::position::PositionTracker;
use crate::risk::RiskState;
use crate::venue::VenueClient;

pub struct RolloverDeps<'a> {
    pub polymarket: &'a Arc<dyn VenueClient>,
    pub kalshi: &'a Arc<dyn VenueClient>,
    pub mapping_store: &'a mut MappingStore,
    pub quotes: &'a mut QuoteCache,
    pub normalizer_polymarket: &'a mut Normalizer,
    pub normalizer_kalshi: &'a mut Normalizer,
    pub risk: &'a mut RiskState,
    pub positions: &'a mut PositionTracker,
    pub journal: &'a EventJournal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloverOutcome {
    /// The boundary was actually processed (false = duplicate invocation).
    pub rolled: bool,
    /// A verified mapping is installed for the new interval.
    pub tradable: bool,
}

#[derive(Debug, Default)]
pub struct RolloverOrchestrator {
    last_rolled: Option<IntervalKey>,
    prior: Option<IntervalKey>,
}

impl RolloverOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the orchestrator with the interval active at startup.
    pub fn set_active(&mut self, key: IntervalKey) {
        self.prior = Some(key);
    }

    /// Process one boundary. Invoking twice for the same key is equivalent
    /// to invoking once.
    pub async fn on_rollover(
        &mut self,
        new_key: IntervalKey,
        deps: &mut RolloverDeps<'_>,
    ) -> RolloverOutcome {
        if self.last_rolled == Some(new_key) {
            return RolloverOutcome {
                rolled: false,
                tradable: deps.mapping_store.get(&new_key).is_some(),
            };
        }
        self.last_rolled = Some(new_key);
        let prior = self.prior.replace(new_key);
        info!(prior = ?prior, new = %new_key, "🔄 interval rollover");

        // The busy lock never survives a boundary. In the serialized loop an
        // execution cannot still be in flight here; a held lock means the
        // executor already terminated through its rollover deadline.
        if deps.risk.is_busy() {
            warn!("busy lock held across rollover; releasing");
            deps.risk.release_busy();
        }

        // Best-effort cancel of anything resting on the retired markets.
        if let Some(prior_key) = prior {
            if let Some(mapping) = deps.mapping_store.get(&prior_key) {
                for (venue, market_id) in mapping.subscriptions() {
                    let client = match venue {
                        crate::venue::VenueId::Polymarket => deps.polymarket,
                        crate::venue::VenueId::Kalshi => deps.kalshi,
                    };
                    client.cancel_all(Some(&market_id)).await;
                }
            } else {
                deps.polymarket.cancel_all(None).await;
                deps.kalshi.cancel_all(None).await;
            }
        }
        deps.positions.clear_open_orders();

        // Stale books from the old interval must never feed a scan.
        deps.quotes.flush();
        deps.normalizer_polymarket.flush();
        deps.normalizer_kalshi.flush();

        // Install the prepared mapping, or refuse to trade the interval.
        let tradable = deps.mapping_store.get(&new_key).is_some();
        if !tradable {
            warn!(interval = %new_key, "no verified mapping; interval will not be traded");
        }
        deps.mapping_store.clear_before(&new_key);

        deps.journal.record(
            EventKind::State,
            json!({
                "event": "rollover",
                "interval": new_key,
                "tradable": tradable,
                "risk": deps.risk.snapshot(),
            }),
        );

        RolloverOutcome {
            rolled: true,
            tradable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::now_ms;
    use crate::discovery::{DiscoveryClient, SimDiscovery};
    use crate::venue::sim::SimVenue;
    use crate::venue::VenueId;

    struct Fixture {
        poly: SimVenue,
        kalshi: SimVenue,
        poly_arc: Arc<dyn VenueClient>,
        kalshi_arc: Arc<dyn VenueClient>,
        store: MappingStore,
        quotes: QuoteCache,
        norm_poly: Normalizer,
        norm_kalshi: Normalizer,
        risk: RiskState,
        positions: PositionTracker,
        journal: EventJournal,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let poly = SimVenue::new(VenueId::Polymarket);
            let kalshi = SimVenue::new(VenueId::Kalshi);
            Self {
                poly_arc: Arc::new(poly.clone()),
                kalshi_arc: Arc::new(kalshi.clone()),
                poly,
                kalshi,
                store: MappingStore::new(),
                quotes: QuoteCache::new(),
                norm_poly: Normalizer::explicit(VenueId::Polymarket),
                norm_kalshi: Normalizer::bid_only(VenueId::Kalshi),
                risk: RiskState::new(now_ms()),
                positions: PositionTracker::new(),
                journal: EventJournal::new(dir.path()).unwrap(),
                _dir: dir,
            }
        }

        fn deps(&mut self) -> RolloverDeps<'_> {
            RolloverDeps {
                polymarket: &self.poly_arc,
                kalshi: &self.kalshi_arc,
                mapping_store: &mut self.store,
                quotes: &mut self.quotes,
                normalizer_polymarket: &mut self.norm_poly,
                normalizer_kalshi: &mut self.norm_kalshi,
                risk: &mut self.risk,
                positions: &mut self.positions,
                journal: &self.journal,
            }
        }
    }

    #[tokio::test]
    async fn rollover_installs_prepared_mapping_and_cancels_prior_markets() {
        let mut fx = Fixture::new();
        let disco = SimDiscovery::new("BTCUSDT");
        let prior = IntervalKey::containing(1_700_000_123);
        let next = prior.next();
        fx.store.set(disco.discover(prior).await.unwrap().mapping);
        fx.store.set(disco.discover(next).await.unwrap().mapping);

        let mut orch = RolloverOrchestrator::new();
        orch.set_active(prior);
        let outcome = orch.on_rollover(next, &mut fx.deps()).await;

        assert!(outcome.rolled);
        assert!(outcome.tradable);
        // prior markets cancelled: two poly tokens + one kalshi ticker
        assert_eq!(fx.poly.cancel_calls(), 2);
        assert_eq!(fx.kalshi.cancel_calls(), 1);
        // prior mapping retired, new one kept
        assert!(fx.store.get(&prior).is_none());
        assert!(fx.store.get(&next).is_some());
    }

    #[tokio::test]
    async fn rollover_without_mapping_fails_closed() {
        let mut fx = Fixture::new();
        let next = IntervalKey::containing(1_700_000_123).next();
        let mut orch = RolloverOrchestrator::new();
        let outcome = orch.on_rollover(next, &mut fx.deps()).await;
        assert!(outcome.rolled);
        assert!(!outcome.tradable);
    }

    #[tokio::test]
    async fn rollover_is_idempotent_per_boundary() {
        let mut fx = Fixture::new();
        let disco = SimDiscovery::new("BTCUSDT");
        let prior = IntervalKey::containing(1_700_000_123);
        let next = prior.next();
        fx.store.set(disco.discover(prior).await.unwrap().mapping);
        fx.store.set(disco.discover(next).await.unwrap().mapping);

        let mut orch = RolloverOrchestrator::new();
        orch.set_active(prior);
        let first = orch.on_rollover(next, &mut fx.deps()).await;
        let cancels_after_first = fx.poly.cancel_calls() + fx.kalshi.cancel_calls();
        let second = orch.on_rollover(next, &mut fx.deps()).await;

        assert!(first.rolled);
        assert!(!second.rolled);
        assert!(second.tradable);
        assert_eq!(
            fx.poly.cancel_calls() + fx.kalshi.cancel_calls(),
            cancels_after_first,
            "second invocation must not repeat venue calls"
        );
    }

    #[tokio::test]
    async fn busy_lock_does_not_survive_rollover_but_cooldown_does() {
        let mut fx = Fixture::new();
        let next = IntervalKey::containing(1_700_000_123).next();
        assert!(fx.risk.try_acquire_busy());
        fx.risk.start_cooldown(now_ms(), 60_000);
        let mut orch = RolloverOrchestrator::new();
        orch.on_rollover(next, &mut fx.deps()).await;
        assert!(!fx.risk.is_busy());
        assert!(fx.risk.in_cooldown(now_ms()));
    }
}
