// Signal Lifecycle (Layer 2)
// Validated state machine over the event bus, external gate evaluation,
// decision audit tracking, and the live trading path orchestration.

pub mod gates;
pub mod machine;
pub mod pipeline;
pub mod states;
pub mod tracker;

pub use gates::{evaluate_with_timeout, BlockingGate, GateVerdict, VolatilityGuard};
pub use machine::SignalStateMachine;
pub use pipeline::{ExecutionBackend, FillResult, LivePipeline, PipelineOutcome};
pub use states::{allowed_transitions, can_expire, is_allowed};
pub use tracker::{DecisionLog, DecisionTracker};
