//! Venue Wire Formats
//!
//! Serde shapes for the two book feeds plus decoders into `BookEvent`.
//! Polymarket's CLOB market channel publishes full books per token with
//! decimal-string prices; Kalshi's market channel publishes bid ladders in
//! integer cents as snapshot + delta messages. Unknown message types decode
//! to nothing — feeds carry plenty of traffic we do not care about.

use serde::Deserialize;
use tracing::trace;

use crate::book::price_to_cents;
use crate::venue::{BookEvent, Outcome};

// ============================================================================
// Polymarket CLOB market channel
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PolyLevel {
    pub price: String,
    pub size: String,
}

#[derive(Debug, Deserialize)]
pub struct PolyBookMsg {
    pub event_type: String,
    pub asset_id: String,
    #[serde(default)]
    pub bids: Vec<PolyLevel>,
    #[serde(default)]
    pub asks: Vec<PolyLevel>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

fn poly_levels(levels: &[PolyLevel]) -> Vec<(f64, i64)> {
    levels
        .iter()
        .filter_map(|l| {
            let price = l.price.parse::<f64>().ok()?;
            let size = l.size.parse::<f64>().ok()?;
            Some((price, size.floor() as i64))
        })
        .collect()
}

/// Decode one Polymarket market-channel frame. `outcome_of` maps a CLOB
/// token id onto the normalized outcome; frames for unknown tokens (or
/// non-book events such as trades) produce nothing.
pub fn decode_polymarket(
    text: &str,
    outcome_of: impl Fn(&str) -> Option<Outcome>,
) -> Vec<BookEvent> {
    // The channel batches frames as either a single object or an array.
    let msgs: Vec<PolyBookMsg> = match serde_json::from_str::<Vec<PolyBookMsg>>(text) {
        Ok(batch) => batch,
        Err(_) => match serde_json::from_str::<PolyBookMsg>(text) {
            Ok(single) => vec![single],
            Err(_) => {
                trace!("undecodable polymarket frame");
                return Vec::new();
            }
        },
    };

    msgs.into_iter()
        .filter(|m| m.event_type == "book")
        .filter_map(|m| {
            let outcome = outcome_of(&m.asset_id)?;
            let ts_exchange = m
                .timestamp
                .as_deref()
                .and_then(|t| t.parse::<i64>().ok())
                .unwrap_or(0);
            Some(BookEvent::ExplicitBook {
                outcome,
                bids: poly_levels(&m.bids),
                asks: poly_levels(&m.asks),
                ts_exchange,
            })
        })
        .collect()
}

// ============================================================================
// Kalshi market channel
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct KalshiFrame {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub msg: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct KalshiSnapshotMsg {
    pub market_ticker: String,
    #[serde(default)]
    pub yes: Vec<(u32, i64)>,
    #[serde(default)]
    pub no: Vec<(u32, i64)>,
    #[serde(default)]
    pub ts: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct KalshiDeltaMsg {
    pub market_ticker: String,
    pub price: u32,
    pub delta: i64,
    pub side: String,
    #[serde(default)]
    pub ts: Option<i64>,
}

fn kalshi_side(side: &str) -> Option<Outcome> {
    match side {
        "yes" => Some(Outcome::Yes),
        "no" => Some(Outcome::No),
        _ => None,
    }
}

/// Decode one Kalshi market-channel frame for `ticker`. Prices arrive in
/// integer cents already, matching the ladder keys exactly.
pub fn decode_kalshi(text: &str, ticker: &str) -> Vec<BookEvent> {
    let frame: KalshiFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(_) => {
            trace!("undecodable kalshi frame");
            return Vec::new();
        }
    };
    let Some(msg) = frame.msg else {
        return Vec::new();
    };

    match frame.msg_type.as_str() {
        "orderbook_snapshot" => {
            let Ok(snap) = serde_json::from_value::<KalshiSnapshotMsg>(msg) else {
                return Vec::new();
            };
            if snap.market_ticker != ticker {
                return Vec::new();
            }
            let ts_exchange = snap.ts.unwrap_or(0);
            vec![
                BookEvent::LadderSnapshot {
                    side: Outcome::Yes,
                    levels: snap.yes,
                    ts_exchange,
                },
                BookEvent::LadderSnapshot {
                    side: Outcome::No,
                    levels: snap.no,
                    ts_exchange,
                },
            ]
        }
        "orderbook_delta" => {
            let Ok(delta) = serde_json::from_value::<KalshiDeltaMsg>(msg) else {
                return Vec::new();
            };
            if delta.market_ticker != ticker {
                return Vec::new();
            }
            let Some(side) = kalshi_side(&delta.side) else {
                return Vec::new();
            };
            vec![BookEvent::LadderDelta {
                side,
                price_c: delta.price,
                delta: delta.delta,
                ts_exchange: delta.ts.unwrap_or(0),
            }]
        }
        _ => Vec::new(),
    }
}

/// Validate that a price string is represented on a one-cent grid; trading
/// paths require it even though feeds may print sub-cent quotes.
pub fn on_cent_grid(price: f64) -> bool {
    price_to_cents(price)
        .map(|c| (price - c as f64 / 100.0).abs() < 1e-9)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polymarket_book_frame_decodes_to_explicit_event() {
        let text = r#"{
            "event_type": "book",
            "asset_id": "tok-up",
            "bids": [{"price": "0.44", "size": "10"}, {"price": "0.42", "size": "5"}],
            "asks": [{"price": "0.46", "size": "8"}],
            "timestamp": "1700000123000"
        }"#;
        let events = decode_polymarket(text, |id| {
            (id == "tok-up").then_some(Outcome::Yes)
        });
        assert_eq!(events.len(), 1);
        match &events[0] {
            BookEvent::ExplicitBook {
                outcome,
                bids,
                asks,
                ts_exchange,
            } => {
                assert_eq!(*outcome, Outcome::Yes);
                assert_eq!(bids[0], (0.44, 10));
                assert_eq!(asks[0], (0.46, 8));
                assert_eq!(*ts_exchange, 1_700_000_123_000);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn unknown_tokens_and_event_types_decode_to_nothing() {
        let trade = r#"{"event_type": "last_trade_price", "asset_id": "tok-up"}"#;
        assert!(decode_polymarket(trade, |_| Some(Outcome::Yes)).is_empty());

        let foreign = r#"{"event_type": "book", "asset_id": "other", "bids": [], "asks": []}"#;
        assert!(decode_polymarket(foreign, |id| (id == "tok-up").then_some(Outcome::Yes))
            .is_empty());
    }

    #[test]
    fn kalshi_snapshot_yields_both_ladders() {
        let text = r#"{
            "type": "orderbook_snapshot",
            "msg": {"market_ticker": "KXBTC", "yes": [[45, 100], [44, 50]], "no": [[52, 30]], "ts": 7}
        }"#;
        let events = decode_kalshi(text, "KXBTC");
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            BookEvent::LadderSnapshot {
                side: Outcome::Yes,
                levels: vec![(45, 100), (44, 50)],
                ts_exchange: 7,
            }
        );
    }

    #[test]
    fn kalshi_delta_decodes_with_side() {
        let text = r#"{
            "type": "orderbook_delta",
            "msg": {"market_ticker": "KXBTC", "price": 45, "delta": -5, "side": "yes"}
        }"#;
        let events = decode_kalshi(text, "KXBTC");
        assert_eq!(
            events,
            vec![BookEvent::LadderDelta {
                side: Outcome::Yes,
                price_c: 45,
                delta: -5,
                ts_exchange: 0,
            }]
        );
        // a different ticker on the same channel is ignored
        assert!(decode_kalshi(text, "KXETH").is_empty());
    }

    #[test]
    fn cent_grid_check() {
        assert!(on_cent_grid(0.46));
        assert!(!on_cent_grid(0.465));
        assert!(!on_cent_grid(f64::NAN));
    }
}
