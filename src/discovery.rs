//! Interval Discovery Collaborator
//!
//! Given an interval key, something outside this crate locates the venue
//! listings and attests their settlement metadata. The engine only depends
//! on this trait; a failed discovery means the interval is not traded.

use async_trait::async_trait;

use crate::clock::IntervalKey;
use crate::mapping::{
    IntervalMapping, KalshiMarket, MarketMeta, PolymarketPair, SettlementRule, SideMapping,
};
use crate::venue::VenueId;

/// Everything needed to verify and trade one interval.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub mapping: IntervalMapping,
    pub meta_polymarket: MarketMeta,
    pub meta_kalshi: MarketMeta,
}

/// Reference prints used by the settlement observer. Each carries the
/// venue's own publish timestamp; the observer decides whether the pair is
/// comparable.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettlementRefs {
    pub polymarket: Option<(f64, i64)>,
    pub kalshi: Option<(f64, i64)>,
}

#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Locate both listings for the interval. Errors make the interval
    /// untradable; the engine never guesses identifiers.
    async fn discover(&self, key: IntervalKey) -> anyhow::Result<Discovery>;

    /// Authoritative settlement prints, queried after the close.
    async fn settlement_refs(&self, key: IntervalKey) -> anyhow::Result<SettlementRefs>;
}

/// Deterministic discovery for dry-run and tests: identifiers derived from
/// the interval key, strictly-above settlement on both venues.
pub struct SimDiscovery {
    pub underlying: String,
    pub side_mapping: SideMapping,
    pub reference_price: f64,
    pub refs: parking_lot::Mutex<SettlementRefs>,
    /// When set, `discover` fails — exercises the fail-closed path.
    pub fail: std::sync::atomic::AtomicBool,
}

impl SimDiscovery {
    pub fn new(underlying: impl Into<String>) -> Self {
        Self {
            underlying: underlying.into(),
            side_mapping: SideMapping::Direct,
            reference_price: 64_250.0,
            refs: parking_lot::Mutex::new(SettlementRefs::default()),
            fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_refs(&self, refs: SettlementRefs) {
        *self.refs.lock() = refs;
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl DiscoveryClient for SimDiscovery {
    async fn discover(&self, key: IntervalKey) -> anyhow::Result<Discovery> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("discovery unavailable for {key}");
        }
        let mapping = IntervalMapping {
            key,
            polymarket: PolymarketPair {
                up_token: format!("sim-up-{}", key.start_ts),
                down_token: format!("sim-down-{}", key.start_ts),
                close_ts: key.end_ts,
                reference_price: Some(self.reference_price),
            },
            kalshi: KalshiMarket {
                ticker: format!("SIM-UPDOWN-{}", key.start_ts),
                side_mapping: self.side_mapping,
                close_ts: key.end_ts,
                reference_price: Some(self.reference_price),
            },
            discovered_at: key.start_ms(),
        };
        let meta = |venue| MarketMeta {
            venue,
            underlying: self.underlying.clone(),
            close_ts: key.end_ts,
            rule: SettlementRule::StrictlyAboveReference,
        };
        Ok(Discovery {
            mapping,
            meta_polymarket: meta(VenueId::Polymarket),
            meta_kalshi: meta(VenueId::Kalshi),
        })
    }

    async fn settlement_refs(&self, _key: IntervalKey) -> anyhow::Result<SettlementRefs> {
        Ok(*self.refs.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::verify_equivalence;

    #[tokio::test]
    async fn sim_discovery_is_self_consistent() {
        let disco = SimDiscovery::new("BTCUSDT");
        let key = IntervalKey::containing(1_700_000_123);
        let d = disco.discover(key).await.unwrap();
        assert!(verify_equivalence(
            key,
            &d.mapping,
            &d.meta_polymarket,
            &d.meta_kalshi
        ));
        assert_eq!(d.mapping.subscriptions().len(), 3);
    }

    #[tokio::test]
    async fn forced_failure_propagates() {
        let disco = SimDiscovery::new("BTCUSDT");
        disco.set_fail(true);
        let key = IntervalKey::containing(1_700_000_123);
        assert!(disco.discover(key).await.is_err());
    }
}
