//! BoxBot - Cross-Venue Binary Options Box Arbitrage
//! Mission: Buy Up on one venue, Down on the other, under a dollar
//! Philosophy: Cheap to miss an opportunity, expensive to carry a naked leg

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dotenv::dotenv;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use boxbot_engine::clock::{current_key, now_ms};
use boxbot_engine::discovery::{DiscoveryClient, SimDiscovery};
use boxbot_engine::engine::{Engine, EngineEvent};
use boxbot_engine::venue::sim::{SimLatency, SimVenue};
use boxbot_engine::venue::{BookEvent, Outcome, VenueClient, VenueId};
use boxbot_engine::EngineConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("info,boxbot_engine=debug")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = EngineConfig::from_env();
    if !cfg.dry_run {
        // Live order routing needs the external signing gateways provisioned
        // alongside this process; without them we refuse to pretend.
        anyhow::bail!(
            "live mode requires venue order gateways; run with BOXBOT_DRY_RUN=1 (default) \
             or wire gateways into Engine::new"
        );
    }

    info!("starting in dry-run mode with simulated venues");

    let discovery = Arc::new(SimDiscovery::new(cfg.underlying.clone()));
    let polymarket = SimVenue::new(VenueId::Polymarket).with_latency(SimLatency {
        base_ms: 40,
        jitter_ms: 60,
    });
    let kalshi = SimVenue::new(VenueId::Kalshi)
        .with_latency(SimLatency {
            base_ms: 60,
            jitter_ms: 90,
        })
        .with_book_pace(Duration::from_millis(250));
    let polymarket = polymarket.with_book_pace(Duration::from_millis(250));

    // Seed both venues with a synthetic book tape for the current interval so
    // the whole loop — normalize, scan, guard, execute — runs end to end.
    if cfg.polymarket_ws_url.is_none() || cfg.kalshi_ws_url.is_none() {
        seed_demo_books(&discovery, &polymarket, &kalshi).await?;
    } else {
        info!("live WS book feeds configured; skipping demo tape");
    }

    let poly_arc: Arc<dyn VenueClient> = Arc::new(polymarket);
    let kalshi_arc: Arc<dyn VenueClient> = Arc::new(kalshi);
    let engine = Engine::new(cfg, poly_arc, kalshi_arc, discovery)?;
    let shutdown_tx = engine.sender();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("ctrl-c received; draining");
            let _ = shutdown_tx.send(EngineEvent::Shutdown).await;
        }
    });

    engine.run().await
}

/// Random-walk book tape around the interval reference. Most ticks price the
/// box fairly; every so often the Kalshi ladder lags enough to open one.
async fn seed_demo_books(
    discovery: &Arc<SimDiscovery>,
    polymarket: &SimVenue,
    kalshi: &SimVenue,
) -> Result<()> {
    let key = current_key(now_ms());
    let mapping = discovery.discover(key).await?.mapping;
    let mut rng = StdRng::seed_from_u64(key.start_ts as u64);

    let mut up_prob: f64 = 0.50;
    // Kalshi re-quotes a few ticks behind Polymarket; after a jump in the
    // underlying the stale ladder briefly prices a box under a dollar.
    let mut lagged: std::collections::VecDeque<f64> = std::collections::VecDeque::new();
    let mut poly_up = Vec::new();
    let mut poly_down = Vec::new();
    let mut kalshi_tape = Vec::new();

    for tick in 0..2_000u32 {
        let step = if rng.gen_bool(0.03) {
            // jump: the moments the arb actually exists
            rng.gen_range(0.10..0.14) * if rng.gen_bool(0.5) { 1.0 } else { -1.0 }
        } else {
            rng.gen_range(-0.01..0.01)
        };
        up_prob = (up_prob + step).clamp(0.10, 0.90);
        lagged.push_back(up_prob);
        let kalshi_prob = if lagged.len() > 3 {
            lagged.pop_front().unwrap_or(up_prob)
        } else {
            up_prob
        };

        let up_cents = (up_prob * 100.0).round() as u32;
        let down_cents = 100 - up_cents;
        let spread = 1 + rng.gen_range(0..2u32);
        let ts = now_ms() + tick as i64 * 250;
        poly_up.push(BookEvent::ExplicitBook {
            outcome: Outcome::Yes,
            bids: vec![(cents(up_cents.saturating_sub(spread)), 30)],
            asks: vec![(cents(up_cents + spread), 30)],
            ts_exchange: ts,
        });
        poly_down.push(BookEvent::ExplicitBook {
            outcome: Outcome::No,
            bids: vec![(cents(down_cents.saturating_sub(spread)), 30)],
            asks: vec![(cents(down_cents + spread), 30)],
            ts_exchange: ts,
        });

        let k_up = (kalshi_prob * 100.0).round() as i64;
        let k_yes = (k_up - 2).clamp(2, 97) as u32;
        let k_no = (100 - k_up - 2).clamp(2, 97) as u32;
        kalshi_tape.push(BookEvent::LadderSnapshot {
            side: Outcome::Yes,
            levels: vec![(k_yes, 25), (k_yes.saturating_sub(1), 50)],
            ts_exchange: ts,
        });
        kalshi_tape.push(BookEvent::LadderSnapshot {
            side: Outcome::No,
            levels: vec![(k_no, 25), (k_no.saturating_sub(1), 50)],
            ts_exchange: ts,
        });
    }

    polymarket.load_book_script(&mapping.polymarket.up_token, poly_up);
    polymarket.load_book_script(&mapping.polymarket.down_token, poly_down);
    kalshi.load_book_script(&mapping.kalshi.ticker, kalshi_tape);
    info!(interval = %key, "demo book tape loaded");
    Ok(())
}

fn cents(c: u32) -> f64 {
    c.clamp(1, 99) as f64 / 100.0
}
