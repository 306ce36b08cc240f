//! Interval Clock & Scheduler
//!
//! Both venues list a fresh Up/Down contract every quarter hour; the engine's
//! notion of "now" is the 15-minute interval containing the wall clock. The
//! scheduler emits PREPARE ahead of each boundary and ROLLOVER at it.
//!
//! The scheduler reads the real clock (never a process-elapsed counter) on
//! every pass, so NTP steps in either direction are absorbed: a backward step
//! reschedules from the new now, a forward step past a boundary fires the
//! missed ROLLOVER exactly once.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::engine::EngineEvent;

/// Length of one trading interval in seconds.
pub const INTERVAL_SECS: i64 = 900;

/// One quarter-hour trading window, in whole unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntervalKey {
    pub start_ts: i64,
    pub end_ts: i64,
}

impl IntervalKey {
    /// The interval containing `ts_s`.
    pub fn containing(ts_s: i64) -> Self {
        let start_ts = ts_s - ts_s.rem_euclid(INTERVAL_SECS);
        Self {
            start_ts,
            end_ts: start_ts + INTERVAL_SECS,
        }
    }

    pub fn next(&self) -> Self {
        Self {
            start_ts: self.end_ts,
            end_ts: self.end_ts + INTERVAL_SECS,
        }
    }

    pub fn start_ms(&self) -> i64 {
        self.start_ts * 1000
    }

    pub fn end_ms(&self) -> i64 {
        self.end_ts * 1000
    }
}

impl std::fmt::Display for IntervalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}..{})", self.start_ts, self.end_ts)
    }
}

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Interval containing `now_ms`.
pub fn current_key(now_ms: i64) -> IntervalKey {
    IntervalKey::containing(now_ms.div_euclid(1000))
}

/// Interval after the one containing `now_ms`.
pub fn next_key(now_ms: i64) -> IntervalKey {
    current_key(now_ms).next()
}

/// Milliseconds until the next boundary.
pub fn ms_until_rollover(now_ms: i64) -> i64 {
    current_key(now_ms).end_ms() - now_ms
}

/// Emits PREPARE and ROLLOVER into the engine queue.
pub struct IntervalScheduler {
    prepare_lead_ms: u64,
    tx: mpsc::Sender<EngineEvent>,
}

impl IntervalScheduler {
    pub fn new(prepare_lead_ms: u64, tx: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            prepare_lead_ms,
            tx,
        }
    }

    /// Run until the engine queue closes. Sleeps are bounded to one second so
    /// the wall clock is re-read frequently enough to notice NTP steps.
    pub async fn run(self) {
        let mut active = current_key(now_ms());
        let mut prepared_for: Option<IntervalKey> = None;
        info!(interval = %active, "⏱️ interval scheduler started");

        loop {
            let now = now_ms();
            let here = current_key(now);

            if here != active {
                // One or more boundaries passed (sleep wakeup or forward
                // clock jump). The missed ROLLOVER fires exactly once.
                if here.start_ts > active.end_ts {
                    warn!(
                        from = %active,
                        to = %here,
                        "clock jumped past a boundary; coalescing missed rollovers"
                    );
                }
                active = here;
                if self
                    .tx
                    .send(EngineEvent::Rollover(active))
                    .await
                    .is_err()
                {
                    return;
                }
            }

            let prepare_at = active.end_ms() - self.prepare_lead_ms as i64;
            if now >= prepare_at && prepared_for != Some(active) {
                prepared_for = Some(active);
                debug!(upcoming = %active.next(), "prepare window opened");
                if self
                    .tx
                    .send(EngineEvent::Prepare(active.next()))
                    .await
                    .is_err()
                {
                    return;
                }
            }

            let next_deadline = if prepared_for == Some(active) {
                active.end_ms()
            } else {
                prepare_at.min(active.end_ms())
            };
            let wait = (next_deadline - now).clamp(10, 1_000);
            sleep(Duration::from_millis(wait as u64)).await;
        }
    }
}
