//! Position Tracker & Reconciler
//!
//! Authoritative view of per-venue outcome holdings and resting orders,
//! updated on every fill. The reconciler periodically compares this view
//! against what each venue reports and escalates drift: log on any mismatch
//! beyond one contract, kill switch when the drift is directional.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::venue::{Outcome, VenueId};

/// Drift beyond this many contracts is treated as real, not rounding.
pub const RECONCILE_TOLERANCE: i64 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomePosition {
    pub yes: i64,
    pub no: i64,
}

impl OutcomePosition {
    pub fn get(&self, side: Outcome) -> i64 {
        match side {
            Outcome::Yes => self.yes,
            Outcome::No => self.no,
        }
    }

    fn add(&mut self, side: Outcome, qty: i64) {
        match side {
            Outcome::Yes => self.yes += qty,
            Outcome::No => self.no += qty,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenOrder {
    pub venue: VenueId,
    pub client_order_id: String,
    pub market_id: String,
    pub side: Outcome,
    pub qty: i64,
    pub submitted_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionSnapshot {
    pub per_venue: HashMap<VenueId, OutcomePosition>,
    pub realized_pnl: f64,
    pub open_orders: Vec<OpenOrder>,
}

#[derive(Debug, Default)]
pub struct PositionTracker {
    per_venue: HashMap<VenueId, OutcomePosition>,
    open_orders: Vec<OpenOrder>,
    realized_pnl: f64,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fill(&mut self, venue: VenueId, side: Outcome, qty: i64) {
        self.per_venue.entry(venue).or_default().add(side, qty);
    }

    pub fn record_realized_pnl(&mut self, pnl: f64) {
        self.realized_pnl += pnl;
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn position(&self, venue: VenueId) -> OutcomePosition {
        self.per_venue.get(&venue).copied().unwrap_or_default()
    }

    // ---- open orders ----------------------------------------------------

    pub fn order_submitted(&mut self, order: OpenOrder) {
        self.open_orders.push(order);
    }

    pub fn order_closed(&mut self, client_order_id: &str) {
        self.open_orders
            .retain(|o| o.client_order_id != client_order_id);
    }

    pub fn open_orders_on(&self, venue: VenueId) -> usize {
        self.open_orders.iter().filter(|o| o.venue == venue).count()
    }

    /// Resting orders are gone after a venue-wide cancel.
    pub fn clear_open_orders(&mut self) {
        self.open_orders.clear();
    }

    // ---- invariants -----------------------------------------------------

    pub fn total(&self, side: Outcome) -> i64 {
        self.per_venue.values().map(|p| p.get(side)).sum()
    }

    /// `Σ yes == Σ no` across venues whenever no execution is in flight.
    pub fn is_balanced(&self) -> bool {
        self.total(Outcome::Yes) == self.total(Outcome::No)
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            per_venue: self.per_venue.clone(),
            realized_pnl: self.realized_pnl,
            open_orders: self.open_orders.clone(),
        }
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ReconcileOutcome {
    Clean,
    /// Mismatch within tolerance or non-directional: logged, trading goes on.
    Drift { details: Vec<String> },
    /// The venue-reported book leaves net exposure: halt.
    DirectionalExposure { net: i64, details: Vec<String> },
}

/// Compare the local view against venue-reported positions.
pub fn reconcile(
    tracker: &PositionTracker,
    reports: &HashMap<VenueId, OutcomePosition>,
) -> ReconcileOutcome {
    let mut details = Vec::new();

    for (&venue, reported) in reports {
        let local = tracker.position(venue);
        for side in [Outcome::Yes, Outcome::No] {
            let diff = (local.get(side) - reported.get(side)).abs();
            if diff > RECONCILE_TOLERANCE {
                details.push(format!(
                    "{venue} {}: local {} vs venue {}",
                    side.as_str(),
                    local.get(side),
                    reported.get(side)
                ));
            }
        }
    }

    // Directionality is judged on the venue-reported truth: if adopting the
    // venues' numbers leaves net exposure, the hedge is broken.
    let reported_yes: i64 = reports.values().map(|p| p.yes).sum();
    let reported_no: i64 = reports.values().map(|p| p.no).sum();
    let net = reported_yes - reported_no;

    if net.abs() > RECONCILE_TOLERANCE {
        warn!(net, ?details, "reconciler found directional exposure");
        return ReconcileOutcome::DirectionalExposure { net, details };
    }
    if !details.is_empty() {
        warn!(?details, "reconciler found balanced drift");
        return ReconcileOutcome::Drift { details };
    }
    debug!("reconcile clean");
    ReconcileOutcome::Clean
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_accumulate_per_venue_and_side() {
        let mut tracker = PositionTracker::new();
        tracker.record_fill(VenueId::Polymarket, Outcome::Yes, 2);
        tracker.record_fill(VenueId::Kalshi, Outcome::No, 2);
        tracker.record_fill(VenueId::Polymarket, Outcome::Yes, 1);
        assert_eq!(tracker.position(VenueId::Polymarket).yes, 3);
        assert_eq!(tracker.position(VenueId::Kalshi).no, 2);
        assert_eq!(tracker.total(Outcome::Yes), 3);
    }

    #[test]
    fn balance_holds_across_venues_not_within_one() {
        let mut tracker = PositionTracker::new();
        tracker.record_fill(VenueId::Polymarket, Outcome::Yes, 2);
        assert!(!tracker.is_balanced());
        tracker.record_fill(VenueId::Kalshi, Outcome::No, 2);
        assert!(tracker.is_balanced());
    }

    #[test]
    fn open_orders_are_tracked_and_cleared() {
        let mut tracker = PositionTracker::new();
        tracker.order_submitted(OpenOrder {
            venue: VenueId::Kalshi,
            client_order_id: "c1".into(),
            market_id: "KXBTC".into(),
            side: Outcome::No,
            qty: 1,
            submitted_at: 0,
        });
        assert_eq!(tracker.open_orders_on(VenueId::Kalshi), 1);
        assert_eq!(tracker.open_orders_on(VenueId::Polymarket), 0);
        tracker.order_closed("c1");
        assert_eq!(tracker.open_orders_on(VenueId::Kalshi), 0);
    }

    #[test]
    fn reconcile_clean_when_reports_match() {
        let mut tracker = PositionTracker::new();
        tracker.record_fill(VenueId::Polymarket, Outcome::Yes, 1);
        tracker.record_fill(VenueId::Kalshi, Outcome::No, 1);
        let mut reports = HashMap::new();
        reports.insert(VenueId::Polymarket, OutcomePosition { yes: 1, no: 0 });
        reports.insert(VenueId::Kalshi, OutcomePosition { yes: 0, no: 1 });
        assert_eq!(reconcile(&tracker, &reports), ReconcileOutcome::Clean);
    }

    #[test]
    fn one_contract_drift_is_tolerated() {
        let mut tracker = PositionTracker::new();
        tracker.record_fill(VenueId::Polymarket, Outcome::Yes, 1);
        tracker.record_fill(VenueId::Kalshi, Outcome::No, 1);
        let mut reports = HashMap::new();
        // Venue reports one extra yes contract: inside tolerance.
        reports.insert(VenueId::Polymarket, OutcomePosition { yes: 2, no: 0 });
        reports.insert(VenueId::Kalshi, OutcomePosition { yes: 0, no: 1 });
        assert_eq!(reconcile(&tracker, &reports), ReconcileOutcome::Clean);
    }

    #[test]
    fn directional_exposure_escalates() {
        let mut tracker = PositionTracker::new();
        tracker.record_fill(VenueId::Polymarket, Outcome::Yes, 3);
        tracker.record_fill(VenueId::Kalshi, Outcome::No, 3);
        let mut reports = HashMap::new();
        // Venue says the hedge leg is missing entirely.
        reports.insert(VenueId::Polymarket, OutcomePosition { yes: 3, no: 0 });
        reports.insert(VenueId::Kalshi, OutcomePosition { yes: 0, no: 0 });
        match reconcile(&tracker, &reports) {
            ReconcileOutcome::DirectionalExposure { net, .. } => assert_eq!(net, 3),
            other => panic!("expected directional exposure, got {other:?}"),
        }
    }

    #[test]
    fn balanced_drift_logs_without_halting() {
        let tracker = PositionTracker::new();
        let mut reports = HashMap::new();
        // Both sides off by the same amount: drift, but hedged.
        reports.insert(VenueId::Polymarket, OutcomePosition { yes: 5, no: 0 });
        reports.insert(VenueId::Kalshi, OutcomePosition { yes: 0, no: 5 });
        match reconcile(&tracker, &reports) {
            ReconcileOutcome::Drift { details } => assert_eq!(details.len(), 2),
            other => panic!("expected drift, got {other:?}"),
        }
    }
}
