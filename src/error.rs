//! Engine Error Taxonomy
//!
//! Typed failure kinds that cross the executor and orchestration boundaries.
//! Transport-level failures stay inside the venue adapters and surface here
//! only as tagged order outcomes; these variants cover everything else.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Recoverable network failure on a feed or collaborator call.
    /// Subscriptions reconnect with backoff; order placement does not retry.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Venue returned an order-level failure.
    #[error("remote rejection: {0}")]
    RemoteRejection(String),

    /// A deadline elapsed on an outstanding network operation.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// Internal state no longer satisfies a documented invariant.
    #[error("state invariant violation: {0}")]
    StateInvariantViolation(String),

    /// The two venues' markets could not be proven equivalent for the
    /// interval; the scanner is inhibited until the next rollover.
    #[error("equivalence not verified for interval starting at {0}")]
    EquivalenceNotVerified(i64),

    /// The sticky kill switch is engaged; no executions are accepted.
    #[error("kill switch tripped: {0}")]
    KillSwitchTripped(String),

    /// A rollover boundary interrupted an in-flight execution.
    #[error("execution interrupted by rollover")]
    RolloverInterrupted,
}
