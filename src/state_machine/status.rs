//! Pure runtime-status transitions
//!
//! The per-step status machine is flat:
//!
//! ```text
//! idle ⇄ loading
//! idle | loading         → error
//! idle | loading | error → terminated        (terminal)
//! idle                   → skipped
//! ```
//!
//! Setting a status to its current value is always accepted. Nothing leaves
//! `terminated`. A step leaves `error` only when the engine clears its error
//! (committed data or an explicit clear), which resets it to `idle` without
//! going through this table.

use super::RuntimeStatus;

/// Rejected status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransitionError {
    pub from: RuntimeStatus,
    pub to: RuntimeStatus,
}

/// Compute the status after requesting `to` from `from`.
pub fn transition_status(
    from: RuntimeStatus,
    to: RuntimeStatus,
) -> Result<RuntimeStatus, StatusTransitionError> {
    use RuntimeStatus::{Error, Idle, Loading, Skipped, Terminated};

    let allowed = match (from, to) {
        (Terminated, _) => to == Terminated,
        (a, b) if a == b => true,

        (Idle, Loading) | (Loading, Idle) => true,
        (Idle | Loading, Error) => true,
        (Idle | Loading | Error, Terminated) => true,
        (Idle, Skipped) => true,

        _ => false,
    };

    if allowed {
        Ok(to)
    } else {
        Err(StatusTransitionError { from, to })
    }
}

/// Whether the status change is permitted
pub fn can_transition(from: RuntimeStatus, to: RuntimeStatus) -> bool {
    transition_status(from, to).is_ok()
}
