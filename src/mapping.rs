//! Interval Mapping Store & Equivalence Verification
//!
//! Each interval trades as a token pair on Polymarket and a single ticker on
//! Kalshi. Discovery hands us both plus settlement metadata; before the
//! scanner may use a pair we prove the two listings settle identically.
//! Verification is rule-based only: any unknown answer fails closed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::IntervalKey;
use crate::venue::VenueId;

/// Which Kalshi side corresponds to Polymarket "Up".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideMapping {
    /// Kalshi Yes == Polymarket Up
    Direct,
    /// Kalshi Yes == Polymarket Down
    Inverted,
}

/// Polymarket leg of an interval: one CLOB token per outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolymarketPair {
    pub up_token: String,
    pub down_token: String,
    pub close_ts: i64,
    pub reference_price: Option<f64>,
}

/// Kalshi leg of an interval: one market ticker, sides share the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KalshiMarket {
    pub ticker: String,
    pub side_mapping: SideMapping,
    pub close_ts: i64,
    pub reference_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalMapping {
    pub key: IntervalKey,
    pub polymarket: PolymarketPair,
    pub kalshi: KalshiMarket,
    pub discovered_at: i64,
}

impl IntervalMapping {
    /// Venue-native order book identifiers to subscribe for this interval.
    pub fn subscriptions(&self) -> Vec<(VenueId, String)> {
        vec![
            (VenueId::Polymarket, self.polymarket.up_token.clone()),
            (VenueId::Polymarket, self.polymarket.down_token.clone()),
            (VenueId::Kalshi, self.kalshi.ticker.clone()),
        ]
    }
}

/// How a venue resolves the contract at close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementRule {
    /// Up wins iff the settlement print is strictly above the reference.
    StrictlyAboveReference,
    /// Anything we could not positively classify.
    Unknown,
}

/// Metadata the discovery collaborator attests per venue listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMeta {
    pub venue: VenueId,
    pub underlying: String,
    pub close_ts: i64,
    pub rule: SettlementRule,
}

/// Deterministic equivalence check. No heuristics: the pair is tradable only
/// when every check answers yes.
pub fn verify_equivalence(
    key: IntervalKey,
    mapping: &IntervalMapping,
    meta_a: &MarketMeta,
    meta_b: &MarketMeta,
) -> bool {
    if mapping.polymarket.close_ts != key.end_ts || mapping.kalshi.close_ts != key.end_ts {
        warn!(
            interval = %key,
            poly_close = mapping.polymarket.close_ts,
            kalshi_close = mapping.kalshi.close_ts,
            "equivalence failed: close timestamps do not match the interval"
        );
        return false;
    }
    if meta_a.close_ts != key.end_ts || meta_b.close_ts != key.end_ts {
        warn!(interval = %key, "equivalence failed: attested close differs from listing");
        return false;
    }
    if !meta_a.underlying.eq_ignore_ascii_case(&meta_b.underlying) {
        warn!(
            a = %meta_a.underlying,
            b = %meta_b.underlying,
            "equivalence failed: underlying symbols differ"
        );
        return false;
    }
    if meta_a.rule != SettlementRule::StrictlyAboveReference
        || meta_b.rule != SettlementRule::StrictlyAboveReference
    {
        warn!(
            a = ?meta_a.rule,
            b = ?meta_b.rule,
            "equivalence failed: settlement rules incompatible or unknown"
        );
        return false;
    }
    debug!(interval = %key, underlying = %meta_a.underlying, "equivalence verified");
    true
}

/// Per-interval mapping storage. Written during PREPARE, read-only until the
/// rollover that retires the interval.
#[derive(Debug, Default)]
pub struct MappingStore {
    map: HashMap<IntervalKey, IntervalMapping>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, mapping: IntervalMapping) {
        self.map.insert(mapping.key, mapping);
    }

    pub fn get(&self, key: &IntervalKey) -> Option<&IntervalMapping> {
        self.map.get(key)
    }

    pub fn remove(&mut self, key: &IntervalKey) -> Option<IntervalMapping> {
        self.map.remove(key)
    }

    /// Drop mappings for intervals that ended before `key`.
    pub fn clear_before(&mut self, key: &IntervalKey) {
        self.map.retain(|k, _| k.end_ts > key.start_ts);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> IntervalKey {
        IntervalKey::containing(1_700_000_123)
    }

    fn mapping() -> IntervalMapping {
        let k = key();
        IntervalMapping {
            key: k,
            polymarket: PolymarketPair {
                up_token: "tok-up".into(),
                down_token: "tok-down".into(),
                close_ts: k.end_ts,
                reference_price: Some(64_250.0),
            },
            kalshi: KalshiMarket {
                ticker: "KXBTC-UPDOWN".into(),
                side_mapping: SideMapping::Direct,
                close_ts: k.end_ts,
                reference_price: Some(64_250.0),
            },
            discovered_at: k.start_ms(),
        }
    }

    fn meta(venue: VenueId, rule: SettlementRule) -> MarketMeta {
        MarketMeta {
            venue,
            underlying: "BTCUSDT".into(),
            close_ts: key().end_ts,
            rule,
        }
    }

    #[test]
    fn verified_when_all_checks_pass() {
        assert!(verify_equivalence(
            key(),
            &mapping(),
            &meta(VenueId::Polymarket, SettlementRule::StrictlyAboveReference),
            &meta(VenueId::Kalshi, SettlementRule::StrictlyAboveReference),
        ));
    }

    #[test]
    fn close_ts_mismatch_fails() {
        let mut m = mapping();
        m.kalshi.close_ts += 60;
        assert!(!verify_equivalence(
            key(),
            &m,
            &meta(VenueId::Polymarket, SettlementRule::StrictlyAboveReference),
            &meta(VenueId::Kalshi, SettlementRule::StrictlyAboveReference),
        ));
    }

    #[test]
    fn unknown_settlement_rule_fails_closed() {
        assert!(!verify_equivalence(
            key(),
            &mapping(),
            &meta(VenueId::Polymarket, SettlementRule::StrictlyAboveReference),
            &meta(VenueId::Kalshi, SettlementRule::Unknown),
        ));
    }

    #[test]
    fn underlying_mismatch_fails() {
        let mut b = meta(VenueId::Kalshi, SettlementRule::StrictlyAboveReference);
        b.underlying = "ETHUSDT".into();
        assert!(!verify_equivalence(
            key(),
            &mapping(),
            &meta(VenueId::Polymarket, SettlementRule::StrictlyAboveReference),
            &b,
        ));
    }

    #[test]
    fn store_clears_retired_intervals() {
        let mut store = MappingStore::new();
        let m = mapping();
        let later = m.key.next();
        store.set(m.clone());
        store.set(IntervalMapping {
            key: later,
            ..m.clone()
        });
        assert_eq!(store.len(), 2);
        store.clear_before(&later);
        assert!(store.get(&m.key).is_none());
        assert!(store.get(&later).is_some());
    }
}
