//! Fee & Edge Engine
//!
//! Conservative cost accounting for two-leg boxes. Per-leg taker fees are
//! rounded up to the next cent so the buffer is always an upper bound; a
//! profitable trade on paper must be profitable in reality.

use serde::{Deserialize, Serialize};

/// How a venue charges takers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FeeModel {
    /// Fee = rate × price × qty (Polymarket-style notional fee).
    NotionalRate { rate: f64 },
    /// Fee = rate × price × (1 − price) × qty (Kalshi-style schedule).
    Quadratic { rate: f64 },
    /// Flat per-contract fee in cents, for controlled test setups.
    FlatPerContract { cents: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub model: FeeModel,
}

impl FeeSchedule {
    pub fn new(model: FeeModel) -> Self {
        Self { model }
    }

    /// Taker fee for `qty` contracts at `price`, rounded up to the cent.
    pub fn taker_fee(&self, price: f64, qty: i64) -> f64 {
        let qty = qty.max(0) as f64;
        let raw = match self.model {
            FeeModel::NotionalRate { rate } => rate * price * qty,
            FeeModel::Quadratic { rate } => rate * price * (1.0 - price) * qty,
            FeeModel::FlatPerContract { cents } => return cents as f64 / 100.0 * qty,
        };
        ceil_to_cent(raw)
    }
}

fn ceil_to_cent(x: f64) -> f64 {
    // Guard against 0.07*0.5*0.5 style representation error pushing an exact
    // cent boundary up an extra cent.
    (x * 100.0 - 1e-9).ceil().max(0.0) / 100.0
}

/// Combined conservative fee buffer for one box (both legs).
pub fn fee_buffer(
    sched_a: &FeeSchedule,
    sched_b: &FeeSchedule,
    price_a: f64,
    price_b: f64,
    qty: i64,
) -> f64 {
    sched_a.taker_fee(price_a, qty) + sched_b.taker_fee(price_b, qty)
}

/// Pure edge arithmetic for one unit box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeBreakdown {
    pub cost: f64,
    pub edge_gross: f64,
    pub edge_net: f64,
    pub profitable: bool,
}

pub fn compute_edge(ask_a: f64, ask_b: f64, fee_buf: f64, slip_buf: f64) -> EdgeBreakdown {
    let cost = ask_a + ask_b;
    let edge_gross = 1.0 - cost;
    let edge_net = edge_gross - fee_buf - slip_buf;
    EdgeBreakdown {
        cost,
        edge_gross,
        edge_net,
        profitable: edge_net > 0.0,
    }
}
