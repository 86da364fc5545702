// External blocking gates
// Gates may veto a signal between evaluation and approval. They are
// collaborators reached over the network, so every call is bounded by a
// timeout; a gate that does not answer in time blocks the signal with
// reason "gate_timeout" rather than stalling the live path.

use anyhow::Result;
use async_trait::async_trait;
use common::{MarketSnapshot, SignalRecord};
use std::time::Duration;
use tracing::warn;

/// Outcome of one gate evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    Allow,
    Block { component: String, reason: String },
}

/// A gate that may veto a signal before approval
#[async_trait]
pub trait BlockingGate: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(
        &self,
        signal: &SignalRecord,
        market: &MarketSnapshot,
    ) -> Result<GateVerdict>;
}

/// Evaluate a gate with a hard deadline.
///
/// Timeouts and gate errors both resolve to Block: failing safe here means
/// not trading, never trading unguarded.
pub async fn evaluate_with_timeout(
    gate: &dyn BlockingGate,
    signal: &SignalRecord,
    market: &MarketSnapshot,
    timeout: Duration,
) -> GateVerdict {
    match tokio::time::timeout(timeout, gate.evaluate(signal, market)).await {
        Ok(Ok(verdict)) => verdict,
        Ok(Err(e)) => {
            warn!("gate {} failed for signal {}: {}", gate.name(), signal.signal.id, e);
            GateVerdict::Block {
                component: gate.name().to_string(),
                reason: format!("gate_error: {}", e),
            }
        }
        Err(_) => {
            warn!(
                "gate {} timed out after {:?} for signal {}",
                gate.name(),
                timeout,
                signal.signal.id
            );
            GateVerdict::Block {
                component: gate.name().to_string(),
                reason: "gate_timeout".to_string(),
            }
        }
    }
}

/// Blocks signals when snapshot volatility exceeds a ceiling.
///
/// The production gate set lives with the risk collaborators; this one is
/// kept in-core as the reference implementation and for the test rig.
pub struct VolatilityGuard {
    pub max_volatility: f64,
}

#[async_trait]
impl BlockingGate for VolatilityGuard {
    fn name(&self) -> &str {
        "VolatilityGuard"
    }

    async fn evaluate(
        &self,
        _signal: &SignalRecord,
        market: &MarketSnapshot,
    ) -> Result<GateVerdict> {
        if market.volatility > self.max_volatility {
            return Ok(GateVerdict::Block {
                component: self.name().to_string(),
                reason: format!(
                    "vol {} > max {}",
                    market.volatility, self.max_volatility
                ),
            });
        }
        Ok(GateVerdict::Allow)
    }
}
