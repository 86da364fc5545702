// Shared domain model for the signal lifecycle pipeline
// Types, errors and configuration used by every other crate

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    DecisionConfig, ExpiryConfig, GateConfig, MonitorConfig, PipelineConfig, ShadowConfig,
    StorageConfig,
};
pub use error::LifecycleError;
pub use types::{
    ComponentScore, CreatedPayload, Decision, EventType, LifecycleEvent, MarketSnapshot,
    ScorePayload, ShadowOutcome, Signal, SignalDirection, SignalRecord, SignalState,
    TransitionPayload, Verdict, WeightSnapshot,
};
