//! Engine Configuration
//!
//! All knobs carry safe defaults and can be overridden from the environment.
//! Parsing is defensive: malformed values keep the default rather than abort.

use std::path::PathBuf;

use crate::fees::{FeeModel, FeeSchedule};

/// Runtime configuration for the arbitrage engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum cumulative notional committed to open boxes (USD)
    pub max_notional: f64,
    /// Maximum contracts per box
    pub max_qty_per_trade: i64,
    /// Minimum net edge per unit box to trade
    pub min_edge_net: f64,
    /// Slippage buffer reserved per leg
    pub slippage_buffer_per_leg: f64,
    /// Leg B must be submitted within this many ms of the Leg A fill
    pub max_leg_delay_ms: u64,
    /// Fill-or-kill wait for Leg A
    pub leg_a_fill_timeout_ms: u64,
    /// Fill-or-kill wait for Leg B
    pub leg_b_fill_timeout_ms: u64,
    /// Hard cap on single-leg exposure time before unwinding
    pub max_unhedged_time_ms: u64,
    /// Capped wait for the unwind order
    pub unwind_timeout_ms: u64,
    /// Cooldown engaged after any non-success execution
    pub cooldown_ms_after_failure: u64,
    /// Daily realized loss that trips the kill switch
    pub max_daily_loss: f64,
    /// Resting-order cap per venue
    pub max_open_orders_per_venue: usize,
    /// Fraction of displayed depth the scanner is allowed to take
    pub book_depth_fraction: f64,
    /// Quotes older than this are rejected by the scanner
    pub stale_quote_ms: i64,
    /// PREPARE fires this many ms before the interval boundary
    pub prepare_lead_ms: u64,
    /// Reconciler cadence
    pub reconcile_interval_ms: u64,
    /// Settlement check fires this long after the close
    pub settle_delay_ms: u64,
    /// Venue minimum order sizes (contracts)
    pub min_order_size_a: i64,
    pub min_order_size_b: i64,
    /// Taker fee schedules per venue
    pub fee_a: FeeSchedule,
    pub fee_b: FeeSchedule,
    /// Directory for the structured event journal
    pub journal_dir: PathBuf,
    /// Underlying symbol both venues must settle on
    pub underlying: String,
    /// Live WebSocket book feeds; unset means books come from the venue
    /// adapters directly (sim venues in dry-run)
    pub polymarket_ws_url: Option<String>,
    pub kalshi_ws_url: Option<String>,
    /// Simulate every submission instead of routing it
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_notional: 10.00,
            max_qty_per_trade: 1,
            min_edge_net: 0.04,
            slippage_buffer_per_leg: 0.005,
            max_leg_delay_ms: 500,
            leg_a_fill_timeout_ms: 500, // matches max_leg_delay_ms
            leg_b_fill_timeout_ms: 500,
            max_unhedged_time_ms: 1500,
            unwind_timeout_ms: 2000,
            cooldown_ms_after_failure: 3000,
            max_daily_loss: 0.50,
            max_open_orders_per_venue: 2,
            book_depth_fraction: 0.8,
            stale_quote_ms: 2000,
            prepare_lead_ms: 60_000,
            reconcile_interval_ms: 10_000,
            settle_delay_ms: 5_000,
            min_order_size_a: 1,
            min_order_size_b: 1,
            fee_a: FeeSchedule::new(FeeModel::NotionalRate { rate: 0.02 }),
            fee_b: FeeSchedule::new(FeeModel::Quadratic { rate: 0.07 }),
            journal_dir: PathBuf::from("logs"),
            underlying: "BTCUSDT".to_string(),
            polymarket_ws_url: None,
            kalshi_ws_url: None,
            dry_run: true, // safe default
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("BOXBOT_MAX_NOTIONAL") {
            if let Ok(n) = v.parse::<f64>() {
                if n.is_finite() && n > 0.0 {
                    cfg.max_notional = n;
                }
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_MAX_QTY_PER_TRADE") {
            if let Ok(q) = v.parse::<i64>() {
                if q > 0 {
                    cfg.max_qty_per_trade = q;
                }
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_MIN_EDGE_NET") {
            if let Ok(e) = v.parse::<f64>() {
                if e.is_finite() && e > 0.0 {
                    cfg.min_edge_net = e;
                }
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_SLIPPAGE_BUFFER_PER_LEG") {
            if let Ok(s) = v.parse::<f64>() {
                if s.is_finite() && s >= 0.0 {
                    cfg.slippage_buffer_per_leg = s;
                }
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_MAX_LEG_DELAY_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                if ms >= 50 {
                    cfg.max_leg_delay_ms = ms;
                    cfg.leg_a_fill_timeout_ms = ms;
                    cfg.leg_b_fill_timeout_ms = ms;
                }
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_MAX_UNHEDGED_TIME_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                if ms >= 100 {
                    cfg.max_unhedged_time_ms = ms;
                }
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_UNWIND_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                if ms >= 100 {
                    cfg.unwind_timeout_ms = ms;
                }
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_COOLDOWN_MS_AFTER_FAILURE") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.cooldown_ms_after_failure = ms;
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_MAX_DAILY_LOSS") {
            if let Ok(l) = v.parse::<f64>() {
                if l.is_finite() && l > 0.0 {
                    cfg.max_daily_loss = l;
                }
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_MAX_OPEN_ORDERS_PER_VENUE") {
            if let Ok(n) = v.parse::<usize>() {
                if n > 0 {
                    cfg.max_open_orders_per_venue = n;
                }
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_BOOK_DEPTH_FRACTION") {
            if let Ok(f) = v.parse::<f64>() {
                if f > 0.0 && f <= 1.0 {
                    cfg.book_depth_fraction = f;
                }
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_STALE_QUOTE_MS") {
            if let Ok(ms) = v.parse::<i64>() {
                if ms > 0 {
                    cfg.stale_quote_ms = ms;
                }
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_PREPARE_LEAD_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                if ms >= 1_000 {
                    cfg.prepare_lead_ms = ms;
                }
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_RECONCILE_INTERVAL_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                if ms >= 1_000 {
                    cfg.reconcile_interval_ms = ms;
                }
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_SETTLE_DELAY_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.settle_delay_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_JOURNAL_DIR") {
            if !v.trim().is_empty() {
                cfg.journal_dir = PathBuf::from(v);
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_UNDERLYING") {
            if !v.trim().is_empty() {
                cfg.underlying = v;
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_POLYMARKET_WS_URL") {
            if !v.trim().is_empty() {
                cfg.polymarket_ws_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_KALSHI_WS_URL") {
            if !v.trim().is_empty() {
                cfg.kalshi_ws_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("BOXBOT_DRY_RUN") {
            cfg.dry_run = matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON");
        }

        cfg
    }

    /// Cooldown and timing knobs compressed for tests.
    pub fn fast_for_tests() -> Self {
        Self {
            max_leg_delay_ms: 50,
            leg_a_fill_timeout_ms: 50,
            leg_b_fill_timeout_ms: 50,
            max_unhedged_time_ms: 150,
            unwind_timeout_ms: 100,
            cooldown_ms_after_failure: 100,
            reconcile_interval_ms: 1_000,
            settle_delay_ms: 50,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_notional, 10.00);
        assert_eq!(cfg.max_qty_per_trade, 1);
        assert_eq!(cfg.min_edge_net, 0.04);
        assert_eq!(cfg.max_leg_delay_ms, 500);
        assert_eq!(cfg.max_unhedged_time_ms, 1500);
        assert_eq!(cfg.cooldown_ms_after_failure, 3000);
        assert_eq!(cfg.max_daily_loss, 0.50);
        assert_eq!(cfg.max_open_orders_per_venue, 2);
        assert_eq!(cfg.stale_quote_ms, 2000);
        assert_eq!(cfg.prepare_lead_ms, 60_000);
        assert_eq!(cfg.reconcile_interval_ms, 10_000);
        assert!(cfg.dry_run, "dry-run must be the default");
    }

    #[test]
    fn malformed_env_values_keep_defaults() {
        std::env::set_var("BOXBOT_MAX_NOTIONAL", "not-a-number");
        std::env::set_var("BOXBOT_BOOK_DEPTH_FRACTION", "7.5");
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.max_notional, 10.00);
        assert_eq!(cfg.book_depth_fraction, 0.8);
        std::env::remove_var("BOXBOT_MAX_NOTIONAL");
        std::env::remove_var("BOXBOT_BOOK_DEPTH_FRACTION");
    }
}
