//! Arb Scanner
//!
//! Pure detection: given the freshest normalized quote from each venue and a
//! verified mapping, find the cheaper of the two cross-venue boxes and decide
//! whether it clears the net-edge bar. No side effects, no clocks — callers
//! pass `now_ms` in so every path is replayable in tests.

use serde::{Deserialize, Serialize};

use crate::book::NormalizedQuote;
use crate::clock::IntervalKey;
use crate::fees::{compute_edge, fee_buffer, FeeSchedule};
use crate::mapping::{IntervalMapping, SideMapping};
use crate::venue::{Outcome, VenueId};

/// Venue price bounds: both venues reject orders outside one-cent ticks.
pub const PRICE_BOUND_LO: f64 = 0.01;
pub const PRICE_BOUND_HI: f64 = 0.99;

#[derive(Debug, Clone)]
pub struct ScanParams {
    pub stale_ms: i64,
    pub min_edge_net: f64,
    pub slippage_buffer_per_leg: f64,
    pub book_depth_fraction: f64,
    pub max_qty_per_trade: i64,
    pub min_order_size_polymarket: i64,
    pub min_order_size_kalshi: i64,
    pub fee_polymarket: FeeSchedule,
    pub fee_kalshi: FeeSchedule,
    /// Venue ranked more likely to fill, for cost ties (§ planning score).
    pub preferred_venue: VenueId,
}

/// One leg of a detected box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArbLeg {
    pub venue: VenueId,
    pub side: Outcome,
    pub price: f64,
    pub available: i64,
}

/// A detected, sized box. `reason` is for humans and logs only; nothing
/// branches on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub interval: IntervalKey,
    pub legs: [ArbLeg; 2],
    pub cost: f64,
    pub edge_gross: f64,
    pub edge_net: f64,
    pub qty: i64,
    pub created_at: i64,
    pub reason: String,
}

impl Opportunity {
    pub fn leg_on(&self, venue: VenueId) -> Option<&ArbLeg> {
        self.legs.iter().find(|l| l.venue == venue)
    }

    /// Estimated outlay if both legs fill at their quoted prices.
    pub fn est_cost(&self) -> f64 {
        self.cost * self.qty as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScanReject {
    MissingQuote(VenueId),
    StaleQuote(VenueId),
    CrossedQuote(VenueId),
    PriceOutOfBounds { venue: VenueId, price: f64 },
    NotProfitable { edge_net: f64 },
    EdgeBelowMinimum { edge_net: f64 },
    InsufficientLiquidity { qty: i64 },
}

impl std::fmt::Display for ScanReject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanReject::MissingQuote(v) => write!(f, "no quote from {v}"),
            ScanReject::StaleQuote(v) => write!(f, "stale quote from {v}"),
            ScanReject::CrossedQuote(v) => write!(f, "crossed quote from {v}"),
            ScanReject::PriceOutOfBounds { venue, price } => {
                write!(f, "leg price {price:.2} outside bounds on {venue}")
            }
            ScanReject::NotProfitable { edge_net } => {
                write!(f, "net edge {edge_net:.4} not positive")
            }
            ScanReject::EdgeBelowMinimum { edge_net } => {
                write!(f, "net edge {edge_net:.4} below minimum")
            }
            ScanReject::InsufficientLiquidity { qty } => {
                write!(f, "clamped qty {qty} below venue minimum")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Opportunity(Opportunity),
    Rejected(ScanReject),
}

struct BoxCandidate {
    yes_leg: ArbLeg,
    no_leg: ArbLeg,
}

impl BoxCandidate {
    fn cost(&self) -> f64 {
        self.yes_leg.price + self.no_leg.price
    }

    /// The leg with more displayed size; ties go to the yes leg.
    fn larger_leg(&self) -> &ArbLeg {
        if self.no_leg.available > self.yes_leg.available {
            &self.no_leg
        } else {
            &self.yes_leg
        }
    }
}

/// Scan the pair of quotes for the cheaper viable box.
///
/// `quote_kalshi` arrives in Kalshi's own frame; the mapping's side
/// declaration aligns it to the Polymarket Up/Down frame here, so everything
/// downstream speaks one orientation.
pub fn scan(
    quote_polymarket: Option<&NormalizedQuote>,
    quote_kalshi: Option<&NormalizedQuote>,
    mapping: &IntervalMapping,
    params: &ScanParams,
    now_ms: i64,
) -> ScanOutcome {
    let poly = match quote_polymarket {
        Some(q) => q,
        None => return ScanOutcome::Rejected(ScanReject::MissingQuote(VenueId::Polymarket)),
    };
    let kalshi_raw = match quote_kalshi {
        Some(q) => q,
        None => return ScanOutcome::Rejected(ScanReject::MissingQuote(VenueId::Kalshi)),
    };

    for (venue, quote) in [(VenueId::Polymarket, poly), (VenueId::Kalshi, kalshi_raw)] {
        if quote.is_stale(now_ms, params.stale_ms) {
            return ScanOutcome::Rejected(ScanReject::StaleQuote(venue));
        }
        if quote.is_crossed() {
            return ScanOutcome::Rejected(ScanReject::CrossedQuote(venue));
        }
    }

    let kalshi = match mapping.kalshi.side_mapping {
        SideMapping::Direct => *kalshi_raw,
        SideMapping::Inverted => kalshi_raw.flipped(),
    };

    // The two viable cross-venue boxes.
    let (p_yes_ask, p_yes_size) = poly.ask(Outcome::Yes);
    let (p_no_ask, p_no_size) = poly.ask(Outcome::No);
    let (k_yes_ask, k_yes_size) = kalshi.ask(Outcome::Yes);
    let (k_no_ask, k_no_size) = kalshi.ask(Outcome::No);

    let box_a = BoxCandidate {
        yes_leg: ArbLeg {
            venue: VenueId::Polymarket,
            side: Outcome::Yes,
            price: p_yes_ask,
            available: p_yes_size,
        },
        no_leg: ArbLeg {
            venue: VenueId::Kalshi,
            side: Outcome::No,
            price: k_no_ask,
            available: k_no_size,
        },
    };
    let box_b = BoxCandidate {
        yes_leg: ArbLeg {
            venue: VenueId::Kalshi,
            side: Outcome::Yes,
            price: k_yes_ask,
            available: k_yes_size,
        },
        no_leg: ArbLeg {
            venue: VenueId::Polymarket,
            side: Outcome::No,
            price: p_no_ask,
            available: p_no_size,
        },
    };

    let chosen = pick_box(box_a, box_b, params);

    for leg in [&chosen.yes_leg, &chosen.no_leg] {
        if leg.price < PRICE_BOUND_LO || leg.price > PRICE_BOUND_HI {
            return ScanOutcome::Rejected(ScanReject::PriceOutOfBounds {
                venue: leg.venue,
                price: leg.price,
            });
        }
    }

    let (poly_leg, kalshi_leg) = match chosen.yes_leg.venue {
        VenueId::Polymarket => (&chosen.yes_leg, &chosen.no_leg),
        VenueId::Kalshi => (&chosen.no_leg, &chosen.yes_leg),
    };
    // Per-unit conservative buffer; ceilings at qty 1 are the upper bound.
    let fee_buf = fee_buffer(
        &params.fee_polymarket,
        &params.fee_kalshi,
        poly_leg.price,
        kalshi_leg.price,
        1,
    );
    let slip_buf = 2.0 * params.slippage_buffer_per_leg;

    let edge = compute_edge(chosen.yes_leg.price, chosen.no_leg.price, fee_buf, slip_buf);
    if !edge.profitable {
        return ScanOutcome::Rejected(ScanReject::NotProfitable {
            edge_net: edge.edge_net,
        });
    }
    if edge.edge_net < params.min_edge_net {
        return ScanOutcome::Rejected(ScanReject::EdgeBelowMinimum {
            edge_net: edge.edge_net,
        });
    }

    let min_leg_size = chosen.yes_leg.available.min(chosen.no_leg.available);
    let qty = ((params.book_depth_fraction * min_leg_size as f64).floor() as i64)
        .min(params.max_qty_per_trade);
    // A box always spans both venues, so the binding minimum is the larger.
    let min_required = params
        .min_order_size_polymarket
        .max(params.min_order_size_kalshi);
    if qty < min_required.max(1) {
        return ScanOutcome::Rejected(ScanReject::InsufficientLiquidity { qty });
    }

    let reason = format!(
        "box {}:{} + {}:{} cost {:.3} edge_net {:.4} qty {}",
        chosen.yes_leg.venue,
        chosen.yes_leg.side.as_str(),
        chosen.no_leg.venue,
        chosen.no_leg.side.as_str(),
        edge.cost,
        edge.edge_net,
        qty
    );

    ScanOutcome::Opportunity(Opportunity {
        interval: mapping.key,
        legs: [chosen.yes_leg, chosen.no_leg],
        cost: edge.cost,
        edge_gross: edge.edge_gross,
        edge_net: edge.edge_net,
        qty,
        created_at: now_ms,
        reason,
    })
}

/// Cheaper box wins; exact ties prefer the box whose larger leg sits on the
/// higher-fill-probability venue, then lexical venue order of the yes leg.
fn pick_box(box_a: BoxCandidate, box_b: BoxCandidate, params: &ScanParams) -> BoxCandidate {
    let (ca, cb) = (box_a.cost(), box_b.cost());
    if ca < cb {
        return box_a;
    }
    if cb < ca {
        return box_b;
    }
    let a_preferred = box_a.larger_leg().venue == params.preferred_venue;
    let b_preferred = box_b.larger_leg().venue == params.preferred_venue;
    match (a_preferred, b_preferred) {
        (true, false) => box_a,
        (false, true) => box_b,
        _ => {
            if box_a.yes_leg.venue.as_str() <= box_b.yes_leg.venue.as_str() {
                box_a
            } else {
                box_b
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::IntervalKey;
    use crate::fees::FeeModel;
    use crate::mapping::{KalshiMarket, PolymarketPair};

    fn mapping(side_mapping: SideMapping) -> IntervalMapping {
        let key = IntervalKey::containing(1_700_000_123);
        IntervalMapping {
            key,
            polymarket: PolymarketPair {
                up_token: "tok-up".into(),
                down_token: "tok-down".into(),
                close_ts: key.end_ts,
                reference_price: None,
            },
            kalshi: KalshiMarket {
                ticker: "KXBTC".into(),
                side_mapping,
                close_ts: key.end_ts,
                reference_price: None,
            },
            discovered_at: 0,
        }
    }

    fn params() -> ScanParams {
        ScanParams {
            stale_ms: 2_000,
            min_edge_net: 0.04,
            slippage_buffer_per_leg: 0.005,
            book_depth_fraction: 0.8,
            max_qty_per_trade: 1,
            min_order_size_polymarket: 1,
            min_order_size_kalshi: 1,
            fee_polymarket: FeeSchedule::new(FeeModel::FlatPerContract { cents: 1 }),
            fee_kalshi: FeeSchedule::new(FeeModel::FlatPerContract { cents: 1 }),
            preferred_venue: VenueId::Kalshi,
        }
    }

    fn quote(
        yes_bid: f64,
        yes_ask: f64,
        no_bid: f64,
        no_ask: f64,
        size: i64,
        ts: i64,
    ) -> NormalizedQuote {
        NormalizedQuote {
            yes_bid,
            yes_ask,
            no_bid,
            no_ask,
            yes_bid_size: size,
            yes_ask_size: size,
            no_bid_size: size,
            no_ask_size: size,
            ts_exchange: ts,
            ts_local: ts,
        }
    }

    #[test]
    fn thin_edge_is_rejected_below_minimum() {
        // yesAsk 0.48 on Polymarket, noAsk 0.46 on Kalshi, flat 1c fees per
        // leg and 0.5c slippage per leg: edge_net 0.03 < 0.04.
        let poly = quote(0.44, 0.48, 0.50, 0.54, 5, 1_000);
        let kalshi = quote(0.50, 0.56, 0.44, 0.46, 5, 1_000);
        let out = scan(Some(&poly), Some(&kalshi), &mapping(SideMapping::Direct), &params(), 1_500);
        match out {
            ScanOutcome::Rejected(ScanReject::EdgeBelowMinimum { edge_net }) => {
                assert!((edge_net - 0.03).abs() < 1e-9);
            }
            other => panic!("expected edge rejection, got {other:?}"),
        }
    }

    #[test]
    fn viable_box_is_emitted_with_exact_identities() {
        // yesAsk 0.46 + noAsk 0.46 = 0.92 → gross 0.08, net 0.05.
        let poly = quote(0.44, 0.46, 0.50, 0.56, 5, 1_000);
        let kalshi = quote(0.50, 0.58, 0.44, 0.46, 5, 1_000);
        let out = scan(Some(&poly), Some(&kalshi), &mapping(SideMapping::Direct), &params(), 1_500);
        let opp = match out {
            ScanOutcome::Opportunity(o) => o,
            other => panic!("expected opportunity, got {other:?}"),
        };
        assert!((opp.cost - 0.92).abs() < 1e-9);
        assert!((opp.edge_gross - 0.08).abs() < 1e-9);
        assert!((opp.edge_net - 0.05).abs() < 1e-9);
        assert!((opp.edge_gross - (1.0 - opp.cost)).abs() < 1e-12);
        assert_eq!(opp.qty, 1);
        assert_eq!(opp.legs[0].venue, VenueId::Polymarket);
        assert_eq!(opp.legs[0].side, Outcome::Yes);
        assert_eq!(opp.legs[1].venue, VenueId::Kalshi);
        assert_eq!(opp.legs[1].side, Outcome::No);
        // legs sit on different venues and opposite sides
        assert_ne!(opp.legs[0].venue, opp.legs[1].venue);
        assert_ne!(opp.legs[0].side, opp.legs[1].side);
    }

    #[test]
    fn stale_or_missing_quotes_reject() {
        let poly = quote(0.44, 0.46, 0.50, 0.56, 5, 1_000);
        let kalshi = quote(0.50, 0.58, 0.44, 0.46, 5, 1_000);
        let m = mapping(SideMapping::Direct);
        let p = params();

        assert_eq!(
            scan(None, Some(&kalshi), &m, &p, 1_500),
            ScanOutcome::Rejected(ScanReject::MissingQuote(VenueId::Polymarket))
        );
        // poly quote is 4s old
        assert_eq!(
            scan(Some(&poly), Some(&kalshi), &m, &p, 5_000),
            ScanOutcome::Rejected(ScanReject::StaleQuote(VenueId::Polymarket))
        );
    }

    #[test]
    fn inverted_side_mapping_aligns_kalshi_frame() {
        let poly = quote(0.44, 0.46, 0.50, 0.56, 5, 1_000);
        // In Kalshi's own frame the cheap side is YES at 0.46; inverted
        // mapping makes that the Polymarket-frame NO.
        let kalshi = quote(0.44, 0.46, 0.50, 0.58, 5, 1_000);
        let out = scan(
            Some(&poly),
            Some(&kalshi),
            &mapping(SideMapping::Inverted),
            &params(),
            1_500,
        );
        let opp = match out {
            ScanOutcome::Opportunity(o) => o,
            other => panic!("expected opportunity, got {other:?}"),
        };
        assert!((opp.cost - 0.92).abs() < 1e-9);
        assert_eq!(opp.legs[1].venue, VenueId::Kalshi);
        assert_eq!(opp.legs[1].side, Outcome::No);
    }

    #[test]
    fn depth_clamp_rejects_when_below_venue_minimum() {
        // Only 1 contract displayed; 0.8 × 1 floors to 0.
        let poly = quote(0.44, 0.46, 0.50, 0.56, 1, 1_000);
        let kalshi = quote(0.50, 0.58, 0.44, 0.46, 1, 1_000);
        let out = scan(Some(&poly), Some(&kalshi), &mapping(SideMapping::Direct), &params(), 1_500);
        assert_eq!(
            out,
            ScanOutcome::Rejected(ScanReject::InsufficientLiquidity { qty: 0 })
        );
    }

    #[test]
    fn depth_clamp_caps_at_max_qty() {
        let mut p = params();
        p.max_qty_per_trade = 3;
        let poly = quote(0.44, 0.46, 0.50, 0.56, 10, 1_000);
        let kalshi = quote(0.50, 0.58, 0.44, 0.46, 10, 1_000);
        match scan(Some(&poly), Some(&kalshi), &mapping(SideMapping::Direct), &p, 1_500) {
            ScanOutcome::Opportunity(opp) => assert_eq!(opp.qty, 3),
            other => panic!("expected opportunity, got {other:?}"),
        }
    }

    #[test]
    fn out_of_bounds_leg_price_rejects() {
        // A half-cent ask is below the venue's one-cent floor.
        let poly = quote(0.0, 0.005, 0.50, 0.56, 5, 1_000);
        let kalshi = quote(0.50, 0.58, 0.44, 0.46, 5, 1_000);
        let out = scan(Some(&poly), Some(&kalshi), &mapping(SideMapping::Direct), &params(), 1_500);
        assert!(matches!(
            out,
            ScanOutcome::Rejected(ScanReject::PriceOutOfBounds { .. })
        ));
    }

    #[test]
    fn cost_tie_prefers_larger_leg_on_preferred_venue() {
        // Both boxes cost 0.92. Box A's larger leg is the Kalshi NO leg
        // (size 9 vs 5); box B's larger leg is the Polymarket NO leg.
        let mut poly = quote(0.44, 0.46, 0.42, 0.46, 5, 1_000);
        poly.no_ask_size = 9;
        let mut kalshi = quote(0.42, 0.46, 0.44, 0.46, 5, 1_000);
        kalshi.no_ask_size = 9;
        let mut p = params();
        p.preferred_venue = VenueId::Kalshi;
        match scan(Some(&poly), Some(&kalshi), &mapping(SideMapping::Direct), &p, 1_500) {
            ScanOutcome::Opportunity(opp) => {
                // chosen box carries its larger leg on Kalshi
                let kalshi_leg = opp.leg_on(VenueId::Kalshi).unwrap();
                assert_eq!(kalshi_leg.available, 9);
            }
            other => panic!("expected opportunity, got {other:?}"),
        }
    }
}
