//! Settlement Observer
//!
//! After each close, freeze both venues' authoritative reference prints and
//! check that they resolve the interval the same way. A disagreement (the
//! "dead zone") cannot change P&L — the markets already settled — but it is
//! the strongest signal we have that tight edges near the reference carry
//! basis risk, so every one is recorded for post-mortem.

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::clock::IntervalKey;
use crate::discovery::SettlementRefs;
use crate::journal::{EventJournal, EventKind};
use crate::mapping::IntervalMapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Up,
    Down,
}

/// Up wins iff the settlement print is strictly above the reference.
pub fn verdict(settle_price: f64, reference_price: f64) -> Verdict {
    if settle_price > reference_price {
        Verdict::Up
    } else {
        Verdict::Down
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementCheck {
    pub interval: IntervalKey,
    pub verdict_polymarket: Option<Verdict>,
    pub verdict_kalshi: Option<Verdict>,
    /// `None` when either venue published nothing to compare.
    pub agree: Option<bool>,
    /// Publish timestamps differ by more than the settle delay: a
    /// disagreement may be clock skew rather than a real dead zone.
    pub clock_suspect: bool,
    pub ref_polymarket: Option<(f64, i64)>,
    pub ref_kalshi: Option<(f64, i64)>,
}

#[derive(Debug, Default)]
pub struct SettlementObserver {
    checks: Vec<SettlementCheck>,
    dead_zone_count: u32,
}

impl SettlementObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare both venues' verdicts for a closed interval.
    pub fn observe(
        &mut self,
        mapping: &IntervalMapping,
        refs: SettlementRefs,
        settle_delay_ms: u64,
        journal: &EventJournal,
    ) -> &SettlementCheck {
        let key = mapping.key;
        let verdict_polymarket = match (refs.polymarket, mapping.polymarket.reference_price) {
            (Some((price, _)), Some(reference)) => Some(verdict(price, reference)),
            _ => None,
        };
        let verdict_kalshi = match (refs.kalshi, mapping.kalshi.reference_price) {
            (Some((price, _)), Some(reference)) => Some(verdict(price, reference)),
            _ => None,
        };

        let agree = match (verdict_polymarket, verdict_kalshi) {
            (Some(a), Some(b)) => Some(a == b),
            _ => None,
        };
        let clock_suspect = match (refs.polymarket, refs.kalshi) {
            (Some((_, ts_a)), Some((_, ts_b))) => {
                (ts_a - ts_b).unsigned_abs() > settle_delay_ms as u64
            }
            _ => false,
        };

        match agree {
            Some(true) => info!(interval = %key, verdict = ?verdict_polymarket, "settlement verdicts agree"),
            Some(false) if clock_suspect => warn!(
                interval = %key,
                "settlement verdicts differ but reference clocks are suspect"
            ),
            Some(false) => {
                self.dead_zone_count += 1;
                warn!(
                    interval = %key,
                    poly = ?verdict_polymarket,
                    kalshi = ?verdict_kalshi,
                    "💀 dead-zone disagreement recorded"
                );
            }
            None => warn!(interval = %key, "settlement references incomplete; nothing to assert"),
        }

        let check = SettlementCheck {
            interval: key,
            verdict_polymarket,
            verdict_kalshi,
            agree,
            clock_suspect,
            ref_polymarket: refs.polymarket,
            ref_kalshi: refs.kalshi,
        };
        journal.record(EventKind::State, json!({ "event": "settlement", "check": check }));
        self.checks.push(check);
        self.checks.last().expect("just pushed")
    }

    pub fn dead_zone_count(&self) -> u32 {
        self.dead_zone_count
    }

    pub fn checks(&self) -> &[SettlementCheck] {
        &self.checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoveryClient, SimDiscovery};

    async fn mapping() -> IntervalMapping {
        SimDiscovery::new("BTCUSDT")
            .discover(IntervalKey::containing(1_700_000_123))
            .await
            .unwrap()
            .mapping
    }

    fn journal() -> (EventJournal, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (EventJournal::new(dir.path()).unwrap(), dir)
    }

    #[test]
    fn verdict_is_strictly_above() {
        assert_eq!(verdict(64_251.0, 64_250.0), Verdict::Up);
        assert_eq!(verdict(64_250.0, 64_250.0), Verdict::Down); // equality is Down
        assert_eq!(verdict(64_249.0, 64_250.0), Verdict::Down);
    }

    #[tokio::test]
    async fn agreeing_prints_record_no_dead_zone() {
        let mapping = mapping().await;
        let (journal, _dir) = journal();
        let mut observer = SettlementObserver::new();
        let check = observer.observe(
            &mapping,
            SettlementRefs {
                polymarket: Some((64_300.0, 1_000)),
                kalshi: Some((64_299.0, 1_500)),
            },
            5_000,
            &journal,
        );
        assert_eq!(check.agree, Some(true));
        assert!(!check.clock_suspect);
        assert_eq!(observer.dead_zone_count(), 0);
    }

    #[tokio::test]
    async fn opposite_verdicts_count_as_dead_zone() {
        let mapping = mapping().await;
        let (journal, _dir) = journal();
        let mut observer = SettlementObserver::new();
        // Prints straddle the reference: the oracle window bit us.
        let check = observer.observe(
            &mapping,
            SettlementRefs {
                polymarket: Some((64_250.5, 1_000)),
                kalshi: Some((64_249.5, 1_200)),
            },
            5_000,
            &journal,
        );
        assert_eq!(check.agree, Some(false));
        assert_eq!(observer.dead_zone_count(), 1);
    }

    #[tokio::test]
    async fn skewed_clocks_mark_the_check_suspect_instead() {
        let mapping = mapping().await;
        let (journal, _dir) = journal();
        let mut observer = SettlementObserver::new();
        let check = observer.observe(
            &mapping,
            SettlementRefs {
                polymarket: Some((64_250.5, 1_000)),
                kalshi: Some((64_249.5, 50_000)),
            },
            5_000,
            &journal,
        );
        assert_eq!(check.agree, Some(false));
        assert!(check.clock_suspect);
        // not counted as a dead zone
        assert_eq!(observer.dead_zone_count(), 0);
    }

    #[tokio::test]
    async fn missing_reference_asserts_nothing() {
        let mapping = mapping().await;
        let (journal, _dir) = journal();
        let mut observer = SettlementObserver::new();
        let check = observer.observe(
            &mapping,
            SettlementRefs {
                polymarket: Some((64_300.0, 1_000)),
                kalshi: None,
            },
            5_000,
            &journal,
        );
        assert_eq!(check.agree, None);
        assert_eq!(observer.dead_zone_count(), 0);
    }
}
