// Transition table
// The single source of truth for which state changes are legal. Expiry is
// reachable from every pre-execution state; an in-flight order must always
// resolve to Executed, so Executing has exactly one way out.

use common::SignalState;

/// Allowed target states from `from`
pub fn allowed_transitions(from: SignalState) -> &'static [SignalState] {
    use SignalState::*;
    match from {
        Generated => &[Evaluating, Expired],
        Evaluating => &[Approved, Blocked, Expired],
        Approved => &[Executing, Expired],
        Executing => &[Executed],
        Blocked => &[Expired],
        Executed | Expired => &[],
    }
}

/// Whether `from -> to` appears in the transition table
pub fn is_allowed(from: SignalState, to: SignalState) -> bool {
    allowed_transitions(from).contains(&to)
}

/// Whether a state can be force-expired
pub fn can_expire(state: SignalState) -> bool {
    is_allowed(state, SignalState::Expired)
}
