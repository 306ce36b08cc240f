//! Two-Phase Executor & Unwind
//!
//! Both legs of a box are fill-or-kill. Leg A goes to the venue more likely
//! to fill; only after its confirmed fill does Leg B go out, and if Leg B
//! cannot be completed inside the unhedged-time budget the Leg A position is
//! market-unwound immediately. Cheap to miss an opportunity, expensive to
//! carry a naked leg.
//!
//! No errors cross this module's boundary: every venue interaction resolves
//! to a tagged `OrderOutcome` and every execution resolves to a terminal
//! `ExecutionRecord`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::book::{NormalizedQuote, QuoteCache};
use crate::clock::now_ms;
use crate::config::EngineConfig;
use crate::journal::{EventJournal, EventKind};
use crate::mapping::{IntervalMapping, SideMapping};
use crate::position::{OpenOrder, PositionTracker};
use crate::risk::RiskState;
use crate::scanner::{ArbLeg, Opportunity};
use crate::venue::{
    OrderAction, OrderOutcome, OrderRequest, Outcome, TimeInForce, VenueClient, VenueId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Pending,
    LegAFilled,
    BothFilled,
    Unwinding,
    Success,
    Aborted,
    Failed,
}

impl ExecStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecStatus::Success | ExecStatus::Aborted | ExecStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LegState {
    pub venue: VenueId,
    pub request: OrderRequest,
    pub submit_ts: i64,
    pub fill_ts: Option<i64>,
    pub outcome: OrderOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnwindRecord {
    pub requested_qty: i64,
    pub filled_qty: i64,
    pub price: Option<f64>,
    pub residual_qty: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub opportunity: Opportunity,
    pub status: ExecStatus,
    pub leg_a: Option<LegState>,
    pub leg_b: Option<LegState>,
    pub unwind: Option<UnwindRecord>,
    pub realized_pnl: f64,
    pub abort_reason: Option<String>,
    pub start_ts: i64,
    pub end_ts: Option<i64>,
}

/// Rolling per-venue fill quality, feeding the planning score.
#[derive(Debug, Clone, Copy)]
pub struct FillStats {
    pub attempts: u64,
    pub fills: u64,
    pub latency_ewma_ms: f64,
}

const LATENCY_EWMA_ALPHA: f64 = 0.2;

impl Default for FillStats {
    fn default() -> Self {
        Self {
            attempts: 0,
            fills: 0,
            latency_ewma_ms: 250.0,
        }
    }
}

impl FillStats {
    pub fn fill_ratio(&self) -> f64 {
        if self.attempts == 0 {
            return 0.5; // neutral prior before any evidence
        }
        self.fills as f64 / self.attempts as f64
    }

    fn observe(&mut self, filled: bool, latency_ms: f64) {
        self.attempts += 1;
        if filled {
            self.fills += 1;
            self.latency_ewma_ms =
                (1.0 - LATENCY_EWMA_ALPHA) * self.latency_ewma_ms + LATENCY_EWMA_ALPHA * latency_ms;
        }
    }
}

/// Everything an execution touches, borrowed from the event loop for the
/// duration of one run. The loop holds the busy lock around the call.
pub struct ExecDeps<'a> {
    pub polymarket: &'a Arc<dyn VenueClient>,
    pub kalshi: &'a Arc<dyn VenueClient>,
    pub mapping: &'a IntervalMapping,
    pub quotes: &'a QuoteCache,
    pub risk: &'a mut RiskState,
    pub positions: &'a mut PositionTracker,
    pub journal: &'a EventJournal,
    /// Executions never cross this boundary; reaching it forces the unwind.
    pub interval_end_ms: i64,
}

impl<'a> ExecDeps<'a> {
    fn client_for(&self, venue: VenueId) -> &'a Arc<dyn VenueClient> {
        match venue {
            VenueId::Polymarket => self.polymarket,
            VenueId::Kalshi => self.kalshi,
        }
    }

    /// Latest quote for `venue`, aligned to the normalized Up/Down frame.
    fn aligned_quote(&self, venue: VenueId) -> Option<NormalizedQuote> {
        let quote = self.quotes.get(venue)?;
        Some(match venue {
            VenueId::Kalshi if self.mapping.kalshi.side_mapping == SideMapping::Inverted => {
                quote.flipped()
            }
            _ => *quote,
        })
    }
}

pub struct Executor {
    cfg: EngineConfig,
    stats: HashMap<VenueId, FillStats>,
}

impl Executor {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            stats: HashMap::new(),
        }
    }

    pub fn stats(&self, venue: VenueId) -> FillStats {
        self.stats.get(&venue).copied().unwrap_or_default()
    }

    /// Venue ranked more likely to fill right now; feeds scanner tie-breaks
    /// and Leg A planning. Deterministic: lexical venue order breaks ties.
    pub fn preferred_venue(&self) -> VenueId {
        let k = self.venue_score(VenueId::Kalshi, None);
        let p = self.venue_score(VenueId::Polymarket, None);
        if (k - p).abs() < f64::EPSILON {
            // kalshi < polymarket lexically
            VenueId::Kalshi
        } else if k > p {
            VenueId::Kalshi
        } else {
            VenueId::Polymarket
        }
    }

    /// Planning score: displayed depth relative to the target quantity,
    /// recent fill-success ratio, and submit-to-fill latency.
    fn venue_score(&self, venue: VenueId, depth: Option<(i64, i64)>) -> f64 {
        let stats = self.stats(venue);
        let depth_score = match depth {
            Some((available, qty)) if qty > 0 => {
                ((available as f64 / qty as f64).min(4.0)) / 4.0
            }
            _ => 0.5,
        };
        let latency_score = 1.0 / (1.0 + stats.latency_ewma_ms / 250.0);
        0.5 * depth_score + 0.3 * stats.fill_ratio() + 0.2 * latency_score
    }

    /// Order the two legs: Leg A is the leg we are most confident fills.
    fn plan(&self, opp: &Opportunity) -> (ArbLeg, ArbLeg) {
        let [first, second] = opp.legs;
        let score_first = self.venue_score(first.venue, Some((first.available, opp.qty)));
        let score_second = self.venue_score(second.venue, Some((second.available, opp.qty)));
        if score_second > score_first
            || ((score_second - score_first).abs() < f64::EPSILON
                && second.venue.as_str() < first.venue.as_str())
        {
            (second, first)
        } else {
            (first, second)
        }
    }

    /// Venue-native order request for one leg.
    fn leg_request(
        &self,
        mapping: &IntervalMapping,
        leg: &ArbLeg,
        qty: i64,
        action: OrderAction,
        tif: TimeInForce,
        price: f64,
    ) -> OrderRequest {
        let (market_id, side) = match leg.venue {
            VenueId::Polymarket => {
                let token = match leg.side {
                    Outcome::Yes => mapping.polymarket.up_token.clone(),
                    Outcome::No => mapping.polymarket.down_token.clone(),
                };
                (token, leg.side)
            }
            VenueId::Kalshi => {
                let side = match mapping.kalshi.side_mapping {
                    SideMapping::Direct => leg.side,
                    SideMapping::Inverted => leg.side.opposite(),
                };
                (mapping.kalshi.ticker.clone(), side)
            }
        };
        OrderRequest {
            client_order_id: Uuid::new_v4().to_string(),
            market_id,
            side,
            action,
            price: price.clamp(0.01, 0.99),
            qty,
            tif,
        }
    }

    async fn submit(
        &self,
        client: &Arc<dyn VenueClient>,
        req: OrderRequest,
        wait_ms: u64,
    ) -> OrderOutcome {
        if self.cfg.dry_run {
            // Simulated success at the target price; the state machine
            // proceeds identically so every path stays exercised.
            return OrderOutcome::Filled {
                fill_price: req.price,
                fill_qty: req.qty,
                venue_order_id: format!("dry-{}", req.client_order_id),
            };
        }
        match timeout(Duration::from_millis(wait_ms), client.place_order(req)).await {
            Ok(outcome) => outcome,
            Err(_) => OrderOutcome::Timeout,
        }
    }

    /// Run one execution to a terminal state.
    pub async fn execute(
        &mut self,
        opp: &Opportunity,
        deps: &mut ExecDeps<'_>,
    ) -> ExecutionRecord {
        let start_ts = now_ms();
        let mut record = ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            opportunity: opp.clone(),
            status: ExecStatus::Pending,
            leg_a: None,
            leg_b: None,
            unwind: None,
            realized_pnl: 0.0,
            abort_reason: None,
            start_ts,
            end_ts: None,
        };
        deps.journal.record(
            EventKind::ExecStart,
            json!({ "exec_id": record.id, "opportunity": opp }),
        );

        let (leg_a, leg_b) = self.plan(opp);
        let qty = opp.qty;

        // Notional committed at Leg A submission.
        deps.risk.roll_date_if_needed(start_ts);
        deps.risk.add_notional(opp.est_cost());

        // ---- Leg A -------------------------------------------------------
        let req_a = self.leg_request(
            deps.mapping,
            &leg_a,
            qty,
            OrderAction::Buy,
            TimeInForce::Fok,
            leg_a.price,
        );
        let outcome_a = self
            .submit_leg(&mut record, deps, &leg_a, req_a, self.cfg.leg_a_fill_timeout_ms, false)
            .await;

        let (fill_a_price, fill_a_ts) = match &outcome_a {
            OrderOutcome::Filled { fill_price, .. } => {
                deps.positions.record_fill(leg_a.venue, leg_a.side, qty);
                record.status = ExecStatus::LegAFilled;
                (*fill_price, now_ms())
            }
            _ => {
                // Fill-or-kill missed: zero position, zero P&L, cooldown.
                deps.risk.release_notional(opp.est_cost());
                record.abort_reason = Some(format!("leg A not filled: {outcome_a:?}"));
                return self.finalize(record, ExecStatus::Aborted, 0.0, deps);
            }
        };

        // ---- pre-Leg-B gates --------------------------------------------
        let gate_now = now_ms();
        let unwind_reason = if gate_now >= deps.interval_end_ms {
            Some("rollover".to_string())
        } else if gate_now - fill_a_ts > self.cfg.max_leg_delay_ms as i64 {
            Some("leg B submission window expired".to_string())
        } else if gate_now - fill_a_ts > self.cfg.max_unhedged_time_ms as i64 {
            Some("unhedged time exceeded before leg B".to_string())
        } else {
            deps.aligned_quote(leg_b.venue).and_then(|quote| {
                let (current_ask, _) = quote.ask(leg_b.side);
                (current_ask > leg_b.price + self.cfg.slippage_buffer_per_leg).then(|| {
                    format!(
                        "leg B moved adversely: {current_ask:.3} vs planned {:.3}",
                        leg_b.price
                    )
                })
            })
        };

        if let Some(reason) = unwind_reason {
            warn!(%reason, "skipping leg B");
            return self
                .unwind_leg_a(record, deps, &leg_a, fill_a_price, qty, reason)
                .await;
        }

        // ---- Leg B -------------------------------------------------------
        let req_b = self.leg_request(
            deps.mapping,
            &leg_b,
            qty,
            OrderAction::Buy,
            TimeInForce::Fok,
            leg_b.price,
        );
        let outcome_b = self
            .submit_leg(&mut record, deps, &leg_b, req_b, self.cfg.leg_b_fill_timeout_ms, true)
            .await;

        match &outcome_b {
            OrderOutcome::Filled { fill_price, .. } => {
                deps.positions.record_fill(leg_b.venue, leg_b.side, qty);
                record.status = ExecStatus::BothFilled;
                let fees = self.box_fees(&leg_a, fill_a_price, &leg_b, *fill_price, qty);
                let pnl = (1.0 - fill_a_price - fill_price) * qty as f64 - fees;
                info!(
                    exec_id = %record.id,
                    fill_a = fill_a_price,
                    fill_b = fill_price,
                    pnl,
                    "✅ box completed"
                );
                self.finalize(record, ExecStatus::Success, pnl, deps)
            }
            _ => {
                let reason = format!("leg B not filled: {outcome_b:?}");
                self.unwind_leg_a(record, deps, &leg_a, fill_a_price, qty, reason)
                    .await
            }
        }
    }

    /// Submit one leg FOK, journal it, track open orders and fill stats.
    async fn submit_leg(
        &mut self,
        record: &mut ExecutionRecord,
        deps: &mut ExecDeps<'_>,
        leg: &ArbLeg,
        req: OrderRequest,
        wait_ms: u64,
        is_leg_b: bool,
    ) -> OrderOutcome {
        let submit_ts = now_ms();
        deps.positions.order_submitted(OpenOrder {
            venue: leg.venue,
            client_order_id: req.client_order_id.clone(),
            market_id: req.market_id.clone(),
            side: req.side,
            qty: req.qty,
            submitted_at: submit_ts,
        });
        deps.journal.record(
            EventKind::LegSubmit,
            json!({
                "exec_id": record.id,
                "leg": if is_leg_b { "B" } else { "A" },
                "venue": leg.venue,
                "request": req,
            }),
        );

        let outcome = self
            .submit(deps.client_for(leg.venue), req.clone(), wait_ms)
            .await;
        let done_ts = now_ms();
        deps.positions.order_closed(&req.client_order_id);

        let filled = outcome.is_full_fill();
        self.stats
            .entry(leg.venue)
            .or_default()
            .observe(filled, (done_ts - submit_ts) as f64);

        let state = LegState {
            venue: leg.venue,
            request: req,
            submit_ts,
            fill_ts: filled.then_some(done_ts),
            outcome: outcome.clone(),
        };
        deps.journal.record(
            if filled {
                EventKind::LegFill
            } else {
                EventKind::LegFail
            },
            json!({
                "exec_id": record.id,
                "leg": if is_leg_b { "B" } else { "A" },
                "outcome": outcome,
            }),
        );
        if is_leg_b {
            record.leg_b = Some(state);
        } else {
            record.leg_a = Some(state);
        }
        outcome
    }

    /// Market-unwind the Leg A position: IOC sell at the venue's best bid.
    async fn unwind_leg_a(
        &mut self,
        mut record: ExecutionRecord,
        deps: &mut ExecDeps<'_>,
        leg_a: &ArbLeg,
        fill_a_price: f64,
        qty: i64,
        reason: String,
    ) -> ExecutionRecord {
        record.status = ExecStatus::Unwinding;
        record.abort_reason = Some(reason.clone());
        deps.journal.record(
            EventKind::UnwindStart,
            json!({ "exec_id": record.id, "reason": reason, "qty": qty }),
        );

        let best_bid = deps
            .aligned_quote(leg_a.venue)
            .map(|q| q.bid(leg_a.side).0)
            .filter(|bid| *bid > 0.0)
            .unwrap_or(fill_a_price);

        let req = self.leg_request(
            deps.mapping,
            leg_a,
            qty,
            OrderAction::Sell,
            TimeInForce::Ioc,
            best_bid,
        );
        let outcome = self
            .submit(deps.client_for(leg_a.venue), req, self.cfg.unwind_timeout_ms)
            .await;

        let filled_qty = outcome.filled_qty().min(qty);
        let unwind_price = outcome.fill_price();
        let residual = qty - filled_qty;
        record.unwind = Some(UnwindRecord {
            requested_qty: qty,
            filled_qty,
            price: unwind_price,
            residual_qty: residual,
        });
        deps.journal.record(
            EventKind::UnwindResult,
            json!({
                "exec_id": record.id,
                "outcome": outcome,
                "residual_qty": residual,
            }),
        );

        if filled_qty > 0 {
            deps.positions.record_fill(leg_a.venue, leg_a.side, -filled_qty);
        }

        if residual == 0 {
            // Fully flat again: realized loss is the round trip plus fees.
            let exit = unwind_price.unwrap_or(best_bid);
            let sched = match leg_a.venue {
                VenueId::Polymarket => &self.cfg.fee_a,
                VenueId::Kalshi => &self.cfg.fee_b,
            };
            let fees = sched.taker_fee(fill_a_price, qty) + sched.taker_fee(exit, qty);
            let pnl = (exit - fill_a_price) * qty as f64 - fees;
            deps.risk.release_notional(record.opportunity.est_cost());
            self.finalize(record, ExecStatus::Aborted, pnl, deps)
        } else {
            // Residual exposure: halt and wait for human reconciliation.
            warn!(
                exec_id = %record.id,
                residual,
                "unwind left residual exposure"
            );
            deps.risk
                .trip_kill(format!("residual exposure of {residual} after failed unwind"));
            deps.journal.record(
                EventKind::Kill,
                json!({ "exec_id": record.id, "residual_qty": residual }),
            );
            let exit = unwind_price.unwrap_or(fill_a_price);
            let pnl = if filled_qty > 0 {
                (exit - fill_a_price) * filled_qty as f64
            } else {
                0.0
            };
            self.finalize(record, ExecStatus::Failed, pnl, deps)
        }
    }

    fn box_fees(
        &self,
        leg_a: &ArbLeg,
        fill_a: f64,
        leg_b: &ArbLeg,
        fill_b: f64,
        qty: i64,
    ) -> f64 {
        let sched = |venue: VenueId| match venue {
            VenueId::Polymarket => &self.cfg.fee_a,
            VenueId::Kalshi => &self.cfg.fee_b,
        };
        sched(leg_a.venue).taker_fee(fill_a, qty) + sched(leg_b.venue).taker_fee(fill_b, qty)
    }

    fn finalize(
        &mut self,
        mut record: ExecutionRecord,
        status: ExecStatus,
        pnl: f64,
        deps: &mut ExecDeps<'_>,
    ) -> ExecutionRecord {
        let now = now_ms();
        record.status = status;
        record.realized_pnl = pnl;
        record.end_ts = Some(now);

        deps.risk.record_pnl(now, pnl);
        deps.positions.record_realized_pnl(pnl);

        if status != ExecStatus::Success {
            deps.risk
                .start_cooldown(now, self.cfg.cooldown_ms_after_failure);
            deps.journal.record(
                EventKind::Cooldown,
                json!({
                    "exec_id": record.id,
                    "until_ms": now + self.cfg.cooldown_ms_after_failure as i64,
                }),
            );
        }
        deps.journal.record(
            EventKind::ExecComplete,
            json!({
                "exec_id": record.id,
                "status": record.status,
                "realized_pnl": record.realized_pnl,
                "abort_reason": record.abort_reason,
            }),
        );
        record
    }
}
