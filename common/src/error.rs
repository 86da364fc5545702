use crate::types::SignalState;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the state machine and event log.
///
/// `InvalidTransition` is recoverable: the signal is untouched and the
/// caller decides whether to retry, log or surface it. `Append` is fatal to
/// the operation that hit it; losing a transition would corrupt the audit
/// trail, so it is never swallowed.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid transition for signal {signal_id}: {from} -> {to}")]
    InvalidTransition {
        signal_id: Uuid,
        from: SignalState,
        to: SignalState,
    },

    #[error("unknown signal {0}")]
    UnknownSignal(Uuid),

    #[error("signal {0} already admitted")]
    DuplicateSignal(Uuid),

    #[error("event log append failed: {0}")]
    Append(anyhow::Error),
}
