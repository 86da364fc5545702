// Live trading path
// Orchestrates one signal from admission through scoring, gate review and
// execution. Synchronous per signal: each step must commit to the bus
// before the next runs, and a failed append is a hard stop for the signal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Decision, MarketSnapshot, Signal, SignalRecord, SignalState, Verdict};
use conviction::{ConvictionScorer, WeightStore};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::gates::{evaluate_with_timeout, BlockingGate, GateVerdict};
use crate::machine::SignalStateMachine;
use crate::tracker::DecisionTracker;

const ACTOR: &str = "live-pipeline";

/// Fill report from the execution collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct FillResult {
    pub fill_price: Decimal,
    pub filled_at: DateTime<Utc>,
}

/// External order-placement backend
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(&self, signal: &SignalRecord) -> Result<FillResult>;
}

/// What happened to a signal on the live path
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Executed {
        signal_id: Uuid,
        sizing_multiplier: f64,
        fill: FillResult,
    },
    Blocked {
        signal_id: Uuid,
        component: String,
        reason: String,
    },
}

pub struct LivePipeline {
    machine: Arc<SignalStateMachine>,
    scorer: ConvictionScorer,
    weights: Arc<WeightStore>,
    gates: Vec<Box<dyn BlockingGate>>,
    gate_timeout: Duration,
    tracker: Option<Arc<DecisionTracker>>,
    execution: Box<dyn ExecutionBackend>,
}

impl LivePipeline {
    pub fn new(
        machine: Arc<SignalStateMachine>,
        scorer: ConvictionScorer,
        weights: Arc<WeightStore>,
        execution: Box<dyn ExecutionBackend>,
        gate_timeout: Duration,
    ) -> Self {
        Self {
            machine,
            scorer,
            weights,
            gates: Vec::new(),
            gate_timeout,
            tracker: None,
            execution,
        }
    }

    /// Add a blocking gate. Gates run in insertion order; the first block
    /// wins.
    pub fn add_gate(mut self, gate: Box<dyn BlockingGate>) -> Self {
        self.gates.push(gate);
        self
    }

    /// Attach the decision audit tracker
    pub fn with_tracker(mut self, tracker: Arc<DecisionTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Run one signal through the full live path.
    ///
    /// Bus and transition failures propagate: losing an event would
    /// corrupt the audit trail, so the signal fails hard instead. Tracker
    /// failures never propagate. If the execution backend errors the
    /// signal stays EXECUTING (an in-flight order must resolve, this core
    /// never cancels it) and the error is returned.
    pub async fn process(
        &self,
        signal: Signal,
        market: &MarketSnapshot,
    ) -> Result<PipelineOutcome> {
        let signal_id = signal.id;
        self.machine.admit(signal, "signal-generator").await?;
        self.machine
            .transition(signal_id, SignalState::Evaluating, ACTOR)
            .await?;

        let weights = self.weights.snapshot().await;
        let record = self
            .machine
            .record(signal_id)
            .context("signal vanished from index mid-pipeline")?;
        let conviction = self
            .scorer
            .score(&record.signal.component_scores, &weights);
        self.machine
            .record_score(
                signal_id,
                conviction.composite_score,
                conviction.sizing_multiplier,
                (*weights).clone(),
            )
            .await?;

        let record = self
            .machine
            .record(signal_id)
            .context("signal vanished from index mid-pipeline")?;

        for gate in &self.gates {
            let verdict =
                evaluate_with_timeout(gate.as_ref(), &record, market, self.gate_timeout).await;
            if let GateVerdict::Block { component, reason } = verdict {
                self.machine
                    .transition(signal_id, SignalState::Blocked, ACTOR)
                    .await?;
                self.track_block(signal_id, &component, &reason, market);
                info!(
                    "signal {} blocked by {}: {}",
                    signal_id, component, reason
                );
                return Ok(PipelineOutcome::Blocked {
                    signal_id,
                    component,
                    reason,
                });
            }
        }

        self.machine
            .transition(signal_id, SignalState::Approved, ACTOR)
            .await?;
        self.machine
            .transition(signal_id, SignalState::Executing, ACTOR)
            .await?;

        let fill = match self.execution.execute(&record).await {
            Ok(fill) => fill,
            Err(e) => {
                warn!(
                    "execution backend failed for signal {}; order remains in flight: {:#}",
                    signal_id, e
                );
                return Err(e.context("execution backend"));
            }
        };

        self.machine
            .transition(signal_id, SignalState::Executed, ACTOR)
            .await?;

        info!(
            "signal {} executed at {} (sizing x{})",
            signal_id, fill.fill_price, conviction.sizing_multiplier
        );
        Ok(PipelineOutcome::Executed {
            signal_id,
            sizing_multiplier: conviction.sizing_multiplier,
            fill,
        })
    }

    fn track_block(&self, signal_id: Uuid, component: &str, reason: &str, market: &MarketSnapshot) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        tracker.track(Decision {
            signal_id,
            verdict: Verdict::Block,
            blocker_component: Some(component.to_string()),
            blocker_reason: Some(reason.to_string()),
            market_snapshot: market.clone(),
            timestamp: Utc::now(),
        });
    }
}
