//! Guard Suite
//!
//! Pure pre-trade predicates evaluated in a fixed order; the first failure
//! wins. Guards never mutate state — the engine reacts to the returned
//! reason (a daily-loss failure is what trips the kill switch upstream).

use serde::Serialize;

use crate::config::EngineConfig;
use crate::position::PositionTracker;
use crate::risk::RiskState;
use crate::scanner::{Opportunity, PRICE_BOUND_HI, PRICE_BOUND_LO};
use crate::venue::VenueId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GuardReason {
    DailyLossExceeded { daily_pnl: f64 },
    InCooldown { until_ms: i64 },
    EdgeBelowMinimum { edge_net: f64 },
    InsufficientDepth { venue: VenueId, available: i64 },
    NotionalCapExceeded { would_be: f64 },
    OpenOrderCap { venue: VenueId, open: usize },
    PositionImbalance { yes: i64, no: i64 },
    PriceOutOfBounds { venue: VenueId, price: f64 },
}

impl std::fmt::Display for GuardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardReason::DailyLossExceeded { daily_pnl } => {
                write!(f, "daily loss limit reached ({daily_pnl:.2})")
            }
            GuardReason::InCooldown { until_ms } => write!(f, "cooling down until {until_ms}"),
            GuardReason::EdgeBelowMinimum { edge_net } => {
                write!(f, "edge {edge_net:.4} below minimum")
            }
            GuardReason::InsufficientDepth { venue, available } => {
                write!(f, "only {available} contracts displayed on {venue}")
            }
            GuardReason::NotionalCapExceeded { would_be } => {
                write!(f, "notional would reach {would_be:.2}")
            }
            GuardReason::OpenOrderCap { venue, open } => {
                write!(f, "{open} open orders already resting on {venue}")
            }
            GuardReason::PositionImbalance { yes, no } => {
                write!(f, "positions unbalanced ({yes} yes vs {no} no)")
            }
            GuardReason::PriceOutOfBounds { venue, price } => {
                write!(f, "price {price:.2} outside venue bounds on {venue}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardVerdict {
    Pass,
    Fail(GuardReason),
}

impl GuardVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, GuardVerdict::Pass)
    }
}

/// Evaluate every pre-trade guard against an opportunity. Order is fixed:
/// daily loss, cooldown, edge, depth, notional, open orders, balance,
/// price bounds.
pub fn evaluate(
    opp: &Opportunity,
    risk: &RiskState,
    positions: &PositionTracker,
    cfg: &EngineConfig,
    now_ms: i64,
) -> GuardVerdict {
    // 1. Daily loss (strict: equality already trips)
    if risk.daily_loss_breached(cfg.max_daily_loss) {
        return GuardVerdict::Fail(GuardReason::DailyLossExceeded {
            daily_pnl: risk.daily_pnl(),
        });
    }

    // 2. Cooldown
    if risk.in_cooldown(now_ms) {
        return GuardVerdict::Fail(GuardReason::InCooldown {
            until_ms: risk.cooldown_until_ms().unwrap_or(now_ms),
        });
    }

    // 3. Minimum net edge
    if opp.edge_net < cfg.min_edge_net {
        return GuardVerdict::Fail(GuardReason::EdgeBelowMinimum {
            edge_net: opp.edge_net,
        });
    }

    // 4. Per-leg displayed depth
    for leg in &opp.legs {
        if leg.available < opp.qty {
            return GuardVerdict::Fail(GuardReason::InsufficientDepth {
                venue: leg.venue,
                available: leg.available,
            });
        }
    }

    // 5. Notional cap
    let would_be = risk.total_notional() + opp.est_cost();
    if would_be > cfg.max_notional {
        return GuardVerdict::Fail(GuardReason::NotionalCapExceeded { would_be });
    }

    // 6. Per-venue open-order cap
    for leg in &opp.legs {
        let open = positions.open_orders_on(leg.venue);
        if open >= cfg.max_open_orders_per_venue {
            return GuardVerdict::Fail(GuardReason::OpenOrderCap {
                venue: leg.venue,
                open,
            });
        }
    }

    // 7. Position balance across venues
    if !positions.is_balanced() {
        return GuardVerdict::Fail(GuardReason::PositionImbalance {
            yes: positions.total(crate::venue::Outcome::Yes),
            no: positions.total(crate::venue::Outcome::No),
        });
    }

    // 8. Per-venue price bounds
    for leg in &opp.legs {
        if leg.price < PRICE_BOUND_LO || leg.price > PRICE_BOUND_HI {
            return GuardVerdict::Fail(GuardReason::PriceOutOfBounds {
                venue: leg.venue,
                price: leg.price,
            });
        }
    }

    GuardVerdict::Pass
}
