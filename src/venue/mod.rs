//! Venue Adapters
//!
//! The engine sees venues only through the `VenueClient` capability set:
//! subscribe to a book, place an order, cancel, report positions. Transport
//! failures never cross this boundary as errors; order placement returns a
//! tagged outcome the executor's state machine consumes directly.

pub mod feed;
pub mod sim;
pub mod wire;

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

/// The two venues this engine trades across.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum VenueId {
    Polymarket,
    Kalshi,
}

impl VenueId {
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueId::Polymarket => "polymarket",
            VenueId::Kalshi => "kalshi",
        }
    }

    pub fn other(&self) -> VenueId {
        match self {
            VenueId::Polymarket => VenueId::Kalshi,
            VenueId::Kalshi => VenueId::Polymarket,
        }
    }
}

impl std::fmt::Display for VenueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary outcome in the engine's normalized frame (Polymarket Up == Yes).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn opposite(&self) -> Outcome {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "yes",
            Outcome::No => "no",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Immediate full fill or nothing.
    Fok,
    /// Immediate fill of whatever crosses, cancel the rest.
    Ioc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Dedup cookie; venues that support it must reject replays.
    pub client_order_id: String,
    /// Venue-native book id: CLOB token id or market ticker.
    pub market_id: String,
    pub side: Outcome,
    pub action: OrderAction,
    /// Limit price in unit-interval decimals, clamped to [0.01, 0.99].
    pub price: f64,
    /// Contracts.
    pub qty: i64,
    pub tif: TimeInForce,
}

/// Tagged order outcome. Every transport or venue failure maps onto one of
/// these; nothing else crosses the executor boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderOutcome {
    Filled {
        fill_price: f64,
        fill_qty: i64,
        venue_order_id: String,
    },
    /// IOC orders may take part of the book and cancel the remainder.
    PartialFill {
        fill_price: f64,
        fill_qty: i64,
        venue_order_id: String,
    },
    NotFilled {
        reason: String,
    },
    Rejected {
        reason: String,
    },
    Timeout,
}

impl OrderOutcome {
    pub fn filled_qty(&self) -> i64 {
        match self {
            OrderOutcome::Filled { fill_qty, .. }
            | OrderOutcome::PartialFill { fill_qty, .. } => *fill_qty,
            _ => 0,
        }
    }

    pub fn fill_price(&self) -> Option<f64> {
        match self {
            OrderOutcome::Filled { fill_price, .. }
            | OrderOutcome::PartialFill { fill_price, .. } => Some(*fill_price),
            _ => None,
        }
    }

    pub fn is_full_fill(&self) -> bool {
        matches!(self, OrderOutcome::Filled { .. })
    }
}

/// Decoded order-book update, venue-local frame.
///
/// Explicit-book venues publish both sides per outcome token; bid-only venues
/// publish a bid ladder per side (prices in integer cents) from which asks
/// are implied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BookEvent {
    ExplicitBook {
        outcome: Outcome,
        /// (price, size) best-first
        bids: Vec<(f64, i64)>,
        asks: Vec<(f64, i64)>,
        ts_exchange: i64,
    },
    LadderSnapshot {
        side: Outcome,
        /// (price in cents, contracts)
        levels: Vec<(u32, i64)>,
        ts_exchange: i64,
    },
    LadderDelta {
        side: Outcome,
        price_c: u32,
        delta: i64,
        ts_exchange: i64,
    },
}

pub type BookStream = Pin<Box<dyn Stream<Item = BookEvent> + Send>>;

/// Capability set each venue adapter provides to the engine.
#[async_trait]
pub trait VenueClient: Send + Sync {
    fn id(&self) -> VenueId;

    /// Order-book event stream for one venue-native market id. The stream
    /// delivers a snapshot before any delta; ending the stream signals the
    /// subscription died and the caller decides whether to resubscribe.
    async fn subscribe_book(&self, market_id: &str) -> anyhow::Result<BookStream>;

    /// Submit an order. Never errors: transport failures arrive as
    /// `Rejected` or `Timeout` outcomes.
    async fn place_order(&self, req: OrderRequest) -> OrderOutcome;

    /// Best-effort cancel of resting orders, optionally scoped to a market.
    async fn cancel_all(&self, market_id: Option<&str>);

    /// Authoritative outcome positions as the venue sees them.
    async fn get_positions(&self) -> anyhow::Result<HashMap<Outcome, i64>>;

    /// Venue clock, for drift detection only.
    fn now_ms(&self) -> i64;
}

/// Contract surface for the external order-routing collaborator (signing,
/// credentials, REST marshalling live outside this crate). A live venue
/// composes a WS book feed with one of these.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, req: OrderRequest) -> OrderOutcome;
    async fn cancel_all(&self, market_id: Option<&str>);
    async fn get_positions(&self) -> anyhow::Result<HashMap<Outcome, i64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_opposite_is_involutive() {
        assert_eq!(Outcome::Yes.opposite(), Outcome::No);
        assert_eq!(Outcome::No.opposite().opposite(), Outcome::No);
    }

    #[test]
    fn order_outcome_accessors() {
        let filled = OrderOutcome::Filled {
            fill_price: 0.46,
            fill_qty: 3,
            venue_order_id: "v1".into(),
        };
        assert!(filled.is_full_fill());
        assert_eq!(filled.filled_qty(), 3);
        assert_eq!(filled.fill_price(), Some(0.46));

        let timeout = OrderOutcome::Timeout;
        assert!(!timeout.is_full_fill());
        assert_eq!(timeout.filled_qty(), 0);
        assert_eq!(timeout.fill_price(), None);
    }

    #[test]
    fn venue_names_are_lexically_ordered() {
        // Deterministic tie-breaks rely on the name ordering
        assert!(VenueId::Kalshi.as_str() < VenueId::Polymarket.as_str());
    }
}
