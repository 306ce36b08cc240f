//! Order-book normalization: bid ladders and the unified quote model.

pub mod ladder;
pub mod normalizer;

pub use ladder::{cents_to_price, price_to_cents, BidLadder, LadderLevel};
pub use normalizer::{NormalizeReject, NormalizedQuote, Normalizer, QuoteCache};
