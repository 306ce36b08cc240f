//! Execution State
//!
//! Busy lock, cooldown, daily P&L, notional accumulator, and the sticky kill
//! switch. The event loop is the only owner; every mutation happens from
//! inside it, so there are no locks and no atomics here.

use chrono::{Local, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Process-wide risk state.
#[derive(Debug)]
pub struct RiskState {
    busy: bool,
    cooldown_until_ms: Option<i64>,
    daily_pnl: f64,
    daily_date: NaiveDate,
    total_notional: f64,
    kill_reason: Option<String>,
}

/// Snapshot for journaling and status logs.
#[derive(Debug, Clone, Serialize)]
pub struct RiskSnapshot {
    pub busy: bool,
    pub cooldown_until_ms: Option<i64>,
    pub daily_pnl: f64,
    pub daily_date: NaiveDate,
    pub total_notional: f64,
    pub kill_switch_triggered: bool,
}

impl RiskState {
    pub fn new(now_ms: i64) -> Self {
        Self {
            busy: false,
            cooldown_until_ms: None,
            daily_pnl: 0.0,
            daily_date: local_date(now_ms),
            total_notional: 0.0,
            kill_reason: None,
        }
    }

    // ---- busy lock ------------------------------------------------------

    /// Non-blocking acquisition. Scanners must yield on `false`; the engine
    /// never queues opportunities behind a running execution.
    pub fn try_acquire_busy(&mut self) -> bool {
        if self.busy {
            return false;
        }
        self.busy = true;
        true
    }

    pub fn release_busy(&mut self) {
        self.busy = false;
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    // ---- cooldown -------------------------------------------------------

    pub fn start_cooldown(&mut self, now_ms: i64, cooldown_ms: u64) {
        let until = now_ms + cooldown_ms as i64;
        self.cooldown_until_ms = Some(until);
        info!(until_ms = until, "🧊 cooldown engaged");
    }

    pub fn in_cooldown(&self, now_ms: i64) -> bool {
        matches!(self.cooldown_until_ms, Some(until) if now_ms < until)
    }

    pub fn cooldown_until_ms(&self) -> Option<i64> {
        self.cooldown_until_ms
    }

    // ---- daily P&L ------------------------------------------------------

    /// Reset counters when the local calendar date has advanced. Called
    /// before any accounting on a new trade.
    pub fn roll_date_if_needed(&mut self, now_ms: i64) {
        let today = local_date(now_ms);
        if today != self.daily_date {
            info!(
                from = %self.daily_date,
                to = %today,
                carried_pnl = self.daily_pnl,
                "new trading date, daily counters reset"
            );
            self.daily_date = today;
            self.daily_pnl = 0.0;
            self.total_notional = 0.0;
        }
    }

    pub fn record_pnl(&mut self, now_ms: i64, pnl: f64) {
        self.roll_date_if_needed(now_ms);
        self.daily_pnl += pnl;
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    /// Strict limit: reaching it exactly already counts as breached.
    pub fn daily_loss_breached(&self, max_daily_loss: f64) -> bool {
        self.daily_pnl <= -max_daily_loss
    }

    // ---- notional -------------------------------------------------------

    /// Added at Leg A submission.
    pub fn add_notional(&mut self, amount: f64) {
        self.total_notional += amount;
    }

    /// Subtracted on Leg A cancellation or a full exit. Unwound positions
    /// leave realized loss only.
    pub fn release_notional(&mut self, amount: f64) {
        self.total_notional = (self.total_notional - amount).max(0.0);
    }

    pub fn total_notional(&self) -> f64 {
        self.total_notional
    }

    // ---- kill switch ----------------------------------------------------

    /// Sticky until an explicit external reset.
    pub fn trip_kill(&mut self, reason: impl Into<String>) {
        if self.kill_reason.is_none() {
            let reason = reason.into();
            warn!(%reason, "🛑 kill switch tripped; trading halted");
            self.kill_reason = Some(reason);
        }
    }

    pub fn kill_tripped(&self) -> bool {
        self.kill_reason.is_some()
    }

    pub fn kill_reason(&self) -> Option<&str> {
        self.kill_reason.as_deref()
    }

    /// External reset only; nothing inside the engine calls this.
    pub fn reset_kill(&mut self) {
        if let Some(reason) = self.kill_reason.take() {
            info!(%reason, "kill switch reset externally");
        }
    }

    pub fn snapshot(&self) -> RiskSnapshot {
        RiskSnapshot {
            busy: self.busy,
            cooldown_until_ms: self.cooldown_until_ms,
            daily_pnl: self.daily_pnl,
            daily_date: self.daily_date,
            total_notional: self.total_notional,
            kill_switch_triggered: self.kill_reason.is_some(),
        }
    }
}

fn local_date(now_ms: i64) -> NaiveDate {
    let utc = Utc
        .timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now);
    utc.with_timezone(&Local).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: i64 = 86_400_000;

    #[test]
    fn busy_lock_is_nonblocking_and_exclusive() {
        let mut risk = RiskState::new(0);
        assert!(risk.try_acquire_busy());
        assert!(!risk.try_acquire_busy());
        risk.release_busy();
        assert!(risk.try_acquire_busy());
    }

    #[test]
    fn cooldown_expires_on_the_deadline() {
        let mut risk = RiskState::new(0);
        risk.start_cooldown(10_000, 3_000);
        assert!(risk.in_cooldown(12_999));
        assert!(!risk.in_cooldown(13_000));
    }

    #[test]
    fn daily_loss_trips_on_equality() {
        let mut risk = RiskState::new(0);
        risk.record_pnl(1_000, -0.49);
        assert!(!risk.daily_loss_breached(0.50));
        risk.record_pnl(2_000, -0.01);
        assert!(risk.daily_loss_breached(0.50));
    }

    #[test]
    fn new_date_resets_counters_before_accounting() {
        let mut risk = RiskState::new(0);
        risk.record_pnl(1_000, -0.30);
        risk.add_notional(5.0);
        // Two days later (avoids local-timezone edges around one midnight)
        risk.record_pnl(2 * DAY_MS, -0.10);
        assert!((risk.daily_pnl() + 0.10).abs() < 1e-12);
        assert_eq!(risk.total_notional(), 0.0);
    }

    #[test]
    fn kill_switch_is_sticky_until_external_reset() {
        let mut risk = RiskState::new(0);
        risk.trip_kill("daily loss limit");
        risk.trip_kill("second trip keeps the first reason");
        assert!(risk.kill_tripped());
        assert_eq!(risk.kill_reason(), Some("daily loss limit"));
        risk.reset_kill();
        assert!(!risk.kill_tripped());
    }

    #[test]
    fn notional_never_goes_negative() {
        let mut risk = RiskState::new(0);
        risk.add_notional(1.0);
        risk.release_notional(2.0);
        assert_eq!(risk.total_notional(), 0.0);
    }
}
