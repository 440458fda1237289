//! Per-step error handling policy for a poll cycle
//!
//! Every fallible step of a cycle either aborts the cycle (the error is
//! returned to the poll loop, which logs it and retries on the next tick) or
//! is logged where it happened and the cycle carries on. The table lives in
//! [`CycleStep::policy`] so the decision is made in one place.

use std::fmt;

/// What to do when a cycle step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Abort the cycle and surface the error to the poll loop
    Propagate,
    /// Log the error and keep going
    LogAndContinue,
}

/// A fallible step of a poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStep {
    /// Building, sending or decoding the status request
    Fetch,
    /// Decoding and decrypting tunnel credentials
    Credentials,
    /// Opening the reverse tunnel
    TunnelOpen,
    /// Closing the reverse tunnel, from a status or the reaper
    TunnelClose,
    /// Handing schedules to the scheduler
    Schedule,
    /// Rebuilding the HTTP transport for a new cadence
    Cadence,
    /// Handing target stack versions to the reconciler
    StackReconcile,
}

impl CycleStep {
    /// The error policy for this step
    pub const fn policy(self) -> ErrorPolicy {
        match self {
            CycleStep::Fetch => ErrorPolicy::Propagate,
            CycleStep::Credentials => ErrorPolicy::Propagate,
            CycleStep::TunnelOpen => ErrorPolicy::Propagate,
            CycleStep::TunnelClose => ErrorPolicy::LogAndContinue,
            CycleStep::Schedule => ErrorPolicy::LogAndContinue,
            // A failed rebuild keeps the old cadence; the mismatch is seen again next cycle
            CycleStep::Cadence => ErrorPolicy::LogAndContinue,
            CycleStep::StackReconcile => ErrorPolicy::Propagate,
        }
    }

    /// Apply this step's policy to a result.
    ///
    /// Returns `Ok(None)` when the error was logged and swallowed.
    pub fn handle<T, E>(self, result: Result<T, E>) -> Result<Option<T>, E>
    where
        E: fmt::Display,
    {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) => match self.policy() {
                ErrorPolicy::Propagate => Err(e),
                ErrorPolicy::LogAndContinue => {
                    tracing::error!(step = %self, error = %e, "Cycle step failed, continuing");
                    Ok(None)
                }
            },
        }
    }
}

impl fmt::Display for CycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleStep::Fetch => write!(f, "fetch"),
            CycleStep::Credentials => write!(f, "credentials"),
            CycleStep::TunnelOpen => write!(f, "tunnel_open"),
            CycleStep::TunnelClose => write!(f, "tunnel_close"),
            CycleStep::Schedule => write!(f, "schedule"),
            CycleStep::Cadence => write!(f, "cadence"),
            CycleStep::StackReconcile => write!(f, "stack_reconcile"),
        }
    }
}
