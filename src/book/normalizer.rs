//! Quote Normalizer
//!
//! Converts per-venue book updates into one `NormalizedQuote` shape so the
//! scanner never sees venue-specific books. Two paths share the output:
//! explicit-book venues hand us both sides per outcome and we lift the top of
//! book; bid-only venues hand us bid ladders and we imply the asks from the
//! opposite side's best bid (`ask = 1 − bestBid(opposite)`).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::book::ladder::{cents_to_price, price_to_cents, BidLadder};
use crate::venue::{BookEvent, Outcome, VenueId};

/// Implied-ask consistency tolerance. Exceeding it is logged, never blocking:
/// a violation is either stale data or a genuine opportunity, and the scanner
/// tolerates both.
const CONSISTENCY_TOLERANCE: f64 = 0.05;

/// Top-of-book for both outcomes of one venue, unit-interval prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedQuote {
    pub yes_bid: f64,
    pub yes_ask: f64,
    pub no_bid: f64,
    pub no_ask: f64,
    pub yes_bid_size: i64,
    pub yes_ask_size: i64,
    pub no_bid_size: i64,
    pub no_ask_size: i64,
    pub ts_exchange: i64,
    pub ts_local: i64,
}

impl NormalizedQuote {
    pub fn is_stale(&self, now_ms: i64, stale_ms: i64) -> bool {
        now_ms - self.ts_local > stale_ms
    }

    pub fn is_crossed(&self) -> bool {
        self.yes_bid > self.yes_ask || self.no_bid > self.no_ask
    }

    /// Signed gap of `yes_ask + no_ask` from the one-unit payoff.
    pub fn consistency_gap(&self) -> f64 {
        self.yes_ask + self.no_ask - 1.0
    }

    pub fn ask(&self, side: Outcome) -> (f64, i64) {
        match side {
            Outcome::Yes => (self.yes_ask, self.yes_ask_size),
            Outcome::No => (self.no_ask, self.no_ask_size),
        }
    }

    pub fn bid(&self, side: Outcome) -> (f64, i64) {
        match side {
            Outcome::Yes => (self.yes_bid, self.yes_bid_size),
            Outcome::No => (self.no_bid, self.no_bid_size),
        }
    }

    /// The same quote with Yes/No swapped, for inverted side mappings.
    pub fn flipped(&self) -> NormalizedQuote {
        NormalizedQuote {
            yes_bid: self.no_bid,
            yes_ask: self.no_ask,
            no_bid: self.yes_bid,
            no_ask: self.yes_ask,
            yes_bid_size: self.no_bid_size,
            yes_ask_size: self.no_ask_size,
            no_bid_size: self.yes_bid_size,
            no_ask_size: self.yes_ask_size,
            ..*self
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeReject {
    #[error("{side:?} book is crossed: bid {bid} > ask {ask}")]
    Crossed { side: Outcome, bid: f64, ask: f64 },
    #[error("{side:?} book has an empty side")]
    EmptySide { side: Outcome },
    #[error("price {0} outside the unit interval")]
    BadPrice(f64),
    #[error("ladder update wrong for an explicit-book venue (or vice versa)")]
    WrongPath,
}

#[derive(Debug, Clone, Copy)]
struct TopOfBook {
    bid: f64,
    bid_size: i64,
    ask: f64,
    ask_size: i64,
    ts_exchange: i64,
}

#[derive(Debug, Default)]
struct ExplicitBooks {
    yes: Option<TopOfBook>,
    no: Option<TopOfBook>,
}

#[derive(Debug, Default)]
struct BidOnlyBooks {
    yes: BidLadder,
    no: BidLadder,
    ts_exchange: i64,
}

#[derive(Debug)]
enum VenueBook {
    Explicit(ExplicitBooks),
    BidOnly(BidOnlyBooks),
}

/// Per-venue normalizer state.
#[derive(Debug)]
pub struct Normalizer {
    venue: VenueId,
    book: VenueBook,
}

impl Normalizer {
    pub fn explicit(venue: VenueId) -> Self {
        Self {
            venue,
            book: VenueBook::Explicit(ExplicitBooks::default()),
        }
    }

    pub fn bid_only(venue: VenueId) -> Self {
        Self {
            venue,
            book: VenueBook::BidOnly(BidOnlyBooks::default()),
        }
    }

    pub fn venue(&self) -> VenueId {
        self.venue
    }

    /// Drop all book state (rollover, feed reconnect).
    pub fn flush(&mut self) {
        match &mut self.book {
            VenueBook::Explicit(books) => {
                books.yes = None;
                books.no = None;
            }
            VenueBook::BidOnly(books) => {
                books.yes.clear();
                books.no.clear();
                books.ts_exchange = 0;
            }
        }
    }

    /// Apply one decoded book event. Returns the refreshed quote once both
    /// sides are known, `None` while the picture is still partial.
    pub fn apply(
        &mut self,
        event: BookEvent,
        ts_local: i64,
    ) -> Result<Option<NormalizedQuote>, NormalizeReject> {
        match (&mut self.book, event) {
            (
                VenueBook::Explicit(books),
                BookEvent::ExplicitBook {
                    outcome,
                    bids,
                    asks,
                    ts_exchange,
                },
            ) => {
                let top = extract_top(outcome, &bids, &asks)?;
                let slot = match outcome {
                    Outcome::Yes => &mut books.yes,
                    Outcome::No => &mut books.no,
                };
                *slot = Some(TopOfBook { ts_exchange, ..top });
                Ok(explicit_quote(books, ts_local))
            }
            (
                VenueBook::BidOnly(books),
                BookEvent::LadderSnapshot {
                    side,
                    levels,
                    ts_exchange,
                },
            ) => {
                match side {
                    Outcome::Yes => books.yes.replace(levels),
                    Outcome::No => books.no.replace(levels),
                }
                books.ts_exchange = books.ts_exchange.max(ts_exchange);
                Ok(Some(implied_quote(self.venue, books, ts_local)))
            }
            (
                VenueBook::BidOnly(books),
                BookEvent::LadderDelta {
                    side,
                    price_c,
                    delta,
                    ts_exchange,
                },
            ) => {
                match side {
                    Outcome::Yes => books.yes.apply_delta(price_c, delta),
                    Outcome::No => books.no.apply_delta(price_c, delta),
                }
                books.ts_exchange = books.ts_exchange.max(ts_exchange);
                Ok(Some(implied_quote(self.venue, books, ts_local)))
            }
            _ => Err(NormalizeReject::WrongPath),
        }
    }
}

/// Implied quote for the bid-only path. A missing side implies
/// `ask = 1.0, size = 0` on the opposite outcome.
fn implied_quote(venue: VenueId, books: &BidOnlyBooks, ts_local: i64) -> NormalizedQuote {
    let yes_best = books.yes.best();
    let no_best = books.no.best();

    let (yes_bid, yes_bid_size) = yes_best
        .map(|l| (cents_to_price(l.price_c), l.qty))
        .unwrap_or((0.0, 0));
    let (no_bid, no_bid_size) = no_best
        .map(|l| (cents_to_price(l.price_c), l.qty))
        .unwrap_or((0.0, 0));

    // ask(side) = 1 − bestBid(opposite side); its size is the size of
    // the opposite-side best bid.
    let (yes_ask, yes_ask_size) = no_best
        .map(|l| (1.0 - cents_to_price(l.price_c), l.qty))
        .unwrap_or((1.0, 0));
    let (no_ask, no_ask_size) = yes_best
        .map(|l| (1.0 - cents_to_price(l.price_c), l.qty))
        .unwrap_or((1.0, 0));

    let quote = NormalizedQuote {
        yes_bid,
        yes_ask,
        no_bid,
        no_ask,
        yes_bid_size,
        yes_ask_size,
        no_bid_size,
        no_ask_size,
        ts_exchange: books.ts_exchange,
        ts_local,
    };

    let gap = quote.consistency_gap();
    if gap.abs() > CONSISTENCY_TOLERANCE {
        debug!(
            %venue,
            gap = format!("{gap:+.3}"),
            "implied asks drifted from one-unit payoff"
        );
    }

    quote
}

fn extract_top(
    outcome: Outcome,
    bids: &[(f64, i64)],
    asks: &[(f64, i64)],
) -> Result<TopOfBook, NormalizeReject> {
    let (bid, bid_size) = best_level(bids, true).ok_or(NormalizeReject::EmptySide {
        side: outcome,
    })?;
    let (ask, ask_size) = best_level(asks, false).ok_or(NormalizeReject::EmptySide {
        side: outcome,
    })?;
    for price in [bid, ask] {
        if price_to_cents(price).is_none() {
            return Err(NormalizeReject::BadPrice(price));
        }
    }
    if bid > ask {
        return Err(NormalizeReject::Crossed {
            side: outcome,
            bid,
            ask,
        });
    }
    Ok(TopOfBook {
        bid,
        bid_size,
        ask,
        ask_size,
        ts_exchange: 0,
    })
}

fn best_level(levels: &[(f64, i64)], highest: bool) -> Option<(f64, i64)> {
    levels
        .iter()
        .filter(|&&(_, size)| size > 0)
        .fold(None, |acc: Option<(f64, i64)>, &(price, size)| match acc {
            Some((best, _)) if (highest && best >= price) || (!highest && best <= price) => acc,
            _ => Some((price, size)),
        })
}

fn explicit_quote(books: &ExplicitBooks, ts_local: i64) -> Option<NormalizedQuote> {
    let yes = books.yes?;
    let no = books.no?;
    Some(NormalizedQuote {
        yes_bid: yes.bid,
        yes_ask: yes.ask,
        no_bid: no.bid,
        no_ask: no.ask,
        yes_bid_size: yes.bid_size,
        yes_ask_size: yes.ask_size,
        no_bid_size: no.bid_size,
        no_ask_size: no.ask_size,
        ts_exchange: yes.ts_exchange.max(no.ts_exchange),
        ts_local,
    })
}

/// Latest quote per venue. Single-writer (normalizer), single-reader
/// (scanner), both inside the event loop, so no synchronization is needed.
#[derive(Debug, Default)]
pub struct QuoteCache {
    polymarket: Option<NormalizedQuote>,
    kalshi: Option<NormalizedQuote>,
}

impl QuoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, venue: VenueId, quote: NormalizedQuote) {
        match venue {
            VenueId::Polymarket => self.polymarket = Some(quote),
            VenueId::Kalshi => self.kalshi = Some(quote),
        }
    }

    pub fn get(&self, venue: VenueId) -> Option<&NormalizedQuote> {
        match venue {
            VenueId::Polymarket => self.polymarket.as_ref(),
            VenueId::Kalshi => self.kalshi.as_ref(),
        }
    }

    pub fn fresh(&self, venue: VenueId, now_ms: i64, stale_ms: i64) -> Option<&NormalizedQuote> {
        self.get(venue).filter(|q| !q.is_stale(now_ms, stale_ms))
    }

    pub fn flush(&mut self) {
        self.polymarket = None;
        self.kalshi = None;
    }

    /// Drop one venue's quote (feed reconnect voids its book state).
    pub fn clear(&mut self, venue: VenueId) {
        match venue {
            VenueId::Polymarket => self.polymarket = None,
            VenueId::Kalshi => self.kalshi = None,
        }
    }
}
