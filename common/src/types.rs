use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Trade direction of a signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Long,
    Short,
}

/// Lifecycle state of a signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalState {
    Generated,
    Evaluating,
    Approved,
    Blocked,
    Executing,
    Executed,
    Expired,
}

impl SignalState {
    /// States with no outgoing transitions at all.
    pub fn is_terminal(self) -> bool {
        matches!(self, SignalState::Executed | SignalState::Expired)
    }

    /// States where the trading outcome is decided. Blocked signals are
    /// settled for trading purposes even though bookkeeping may still
    /// move them to Expired.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            SignalState::Executed | SignalState::Expired | SignalState::Blocked
        )
    }
}

impl std::fmt::Display for SignalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SignalState::Generated => "GENERATED",
            SignalState::Evaluating => "EVALUATING",
            SignalState::Approved => "APPROVED",
            SignalState::Blocked => "BLOCKED",
            SignalState::Executing => "EXECUTING",
            SignalState::Executed => "EXECUTED",
            SignalState::Expired => "EXPIRED",
        };
        f.write_str(name)
    }
}

/// Per-indicator contribution to a signal.
///
/// `confidence` is the indicator's own certainty in [0, 1]; `alignment` is
/// how strongly the indicator agrees with the signal direction in [-1, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ComponentScore {
    pub confidence: f64,
    pub alignment: f64,
}

/// A candidate trade proposal produced by an external signal generator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub direction: SignalDirection,
    pub strategy_name: String,
    /// Indicator name -> component score. BTreeMap so the serialized
    /// order is stable regardless of insertion order.
    pub component_scores: BTreeMap<String, ComponentScore>,
    pub created_at: DateTime<Utc>,
}

/// Immutable weight vector used for conviction scoring.
///
/// Captured on each scored signal so historical scores stay reproducible
/// after the tuning process publishes new weights.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightSnapshot {
    pub version: u64,
    pub weights: BTreeMap<String, f64>,
    pub loaded_at: DateTime<Utc>,
}

/// Current view of a signal, derived from the event log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalRecord {
    pub signal: Signal,
    pub current_state: SignalState,
    pub last_transition_at: DateTime<Utc>,
    pub composite_score: Option<f64>,
    pub sizing_multiplier: Option<f64>,
    pub weights_snapshot: Option<WeightSnapshot>,
}

impl SignalRecord {
    pub fn new(signal: Signal, admitted_at: DateTime<Utc>) -> Self {
        Self {
            signal,
            current_state: SignalState::Generated,
            last_transition_at: admitted_at,
            composite_score: None,
            sizing_multiplier: None,
            weights_snapshot: None,
        }
    }
}

/// Kind of record on the event log
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SignalCreated,
    StateChanged,
    SignalScored,
}

/// One immutable line on the event log.
///
/// For `state_changed` events the ordered sequence per signal is its state
/// history. `signal_scored` events carry scoring results and leave
/// `from_state == to_state`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleEvent {
    pub seq: u64,
    pub signal_id: Uuid,
    pub event_type: EventType,
    pub from_state: Option<SignalState>,
    pub to_state: SignalState,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Payload of a `signal_created` event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatedPayload {
    pub signal: Signal,
    pub actor: String,
}

/// Payload of a `state_changed` event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionPayload {
    pub actor: String,
}

/// Payload of a `signal_scored` event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScorePayload {
    pub composite_score: f64,
    pub sizing_multiplier: f64,
    pub weights: WeightSnapshot,
}

/// Gate verdict on a signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approve,
    Block,
}

/// Market conditions captured alongside a blocking decision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    pub price: Decimal,
    pub volatility: f64,
    pub spread: Decimal,
    pub captured_at: DateTime<Utc>,
}

/// Audit record of a gate decision. Created once per blocking evaluation,
/// never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub signal_id: Uuid,
    pub verdict: Verdict,
    pub blocker_component: Option<String>,
    pub blocker_reason: Option<String>,
    pub market_snapshot: MarketSnapshot,
    pub timestamp: DateTime<Utc>,
}

/// Counterfactual outcome of a signal tracked by the shadow engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShadowOutcome {
    pub signal_id: Uuid,
    pub symbol: String,
    pub direction: SignalDirection,
    pub hypothetical_entry: Decimal,
    pub hypothetical_exit: Option<Decimal>,
    pub pnl: Decimal,
    pub closed: bool,
    pub sizing_multiplier: f64,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub exit_reason: Option<String>,
    /// Checkpoint: highest event sequence folded into this outcome
    pub last_processed_seq: u64,
}
