// Signal state machine
// Atomic check-and-set transitions on top of the event bus. The machine
// holds its own lock spanning read-validate-publish so two callers racing
// to move the same signal cannot both pass validation.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{LifecycleError, Signal, SignalRecord, SignalState, WeightSnapshot};
use event_log::{EventBus, EventDraft};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::states;

pub struct SignalStateMachine {
    bus: Arc<EventBus>,
    // Serializes check-and-set across all signals. Transition volume is
    // bounded by the append critical section anyway, so one lock is enough.
    cas: Mutex<()>,
}

impl SignalStateMachine {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            cas: Mutex::new(()),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Indexed record for a signal
    pub fn record(&self, signal_id: Uuid) -> Option<SignalRecord> {
        self.bus.get(signal_id)
    }

    /// Admit a newly generated signal into the pipeline as GENERATED.
    pub async fn admit(&self, signal: Signal, actor: &str) -> Result<u64, LifecycleError> {
        let _guard = self.cas.lock().await;
        if self.bus.get(signal.id).is_some() {
            return Err(LifecycleError::DuplicateSignal(signal.id));
        }
        let signal_id = signal.id;
        let seq = self
            .bus
            .publish(EventDraft::created(signal, actor))
            .await
            .map_err(LifecycleError::Append)?;
        debug!("signal {} admitted at seq {}", signal_id, seq);
        Ok(seq)
    }

    /// Atomically move a signal to `to`.
    ///
    /// Reads the current state, verifies the transition table permits the
    /// move, and only then appends the event. On violation the signal is
    /// untouched and the caller gets `InvalidTransition`.
    pub async fn transition(
        &self,
        signal_id: Uuid,
        to: SignalState,
        actor: &str,
    ) -> Result<u64, LifecycleError> {
        let _guard = self.cas.lock().await;
        let from = self
            .bus
            .current_state(signal_id)
            .ok_or(LifecycleError::UnknownSignal(signal_id))?;

        if !states::is_allowed(from, to) {
            return Err(LifecycleError::InvalidTransition {
                signal_id,
                from,
                to,
            });
        }

        let seq = self
            .bus
            .publish(EventDraft::transition(signal_id, from, to, actor))
            .await
            .map_err(LifecycleError::Append)?;
        debug!("signal {} {} -> {} at seq {}", signal_id, from, to, seq);
        Ok(seq)
    }

    /// Record a conviction score against a signal without changing state.
    pub async fn record_score(
        &self,
        signal_id: Uuid,
        composite_score: f64,
        sizing_multiplier: f64,
        weights: WeightSnapshot,
    ) -> Result<u64, LifecycleError> {
        let _guard = self.cas.lock().await;
        let state = self
            .bus
            .current_state(signal_id)
            .ok_or(LifecycleError::UnknownSignal(signal_id))?;

        self.bus
            .publish(EventDraft::scored(
                signal_id,
                state,
                composite_score,
                sizing_multiplier,
                weights,
            ))
            .await
            .map_err(LifecycleError::Append)
    }

    /// Force-expire stale signals.
    ///
    /// Scans the index for signals in an expirable state whose last
    /// transition is older than `max_age` and moves each to EXPIRED
    /// through the same check-and-set path. A signal already settled by
    /// the time its turn comes is skipped, so each signal is expired at
    /// most once however often the sweep runs.
    pub async fn auto_expire(&self, max_age: Duration) -> Result<Vec<Uuid>, LifecycleError> {
        let cutoff = Utc::now() - max_age;
        let stale: Vec<Uuid> = self
            .bus
            .signals()
            .into_iter()
            .filter(|r| states::can_expire(r.current_state) && r.last_transition_at < cutoff)
            .map(|r| r.signal.id)
            .collect();

        let mut expired = Vec::new();
        for signal_id in stale {
            match self.transition(signal_id, SignalState::Expired, "auto-expire").await {
                Ok(_) => {
                    info!("signal {} auto-expired (stale beyond {})", signal_id, max_age);
                    expired.push(signal_id);
                }
                // Lost the race to a concurrent transition; nothing to do.
                Err(LifecycleError::InvalidTransition { .. }) => {
                    debug!("signal {} moved before expiry sweep reached it", signal_id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SignalDirection;
    use std::collections::BTreeMap;

    fn signal() -> Signal {
        Signal {
            id: Uuid::new_v4(),
            symbol: "BTC-USD".to_string(),
            direction: SignalDirection::Long,
            strategy_name: "momentum-v1".to_string(),
            component_scores: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    async fn machine(dir: &tempfile::TempDir) -> SignalStateMachine {
        let bus = Arc::new(EventBus::open(dir.path().join("events.jsonl")).await.unwrap());
        SignalStateMachine::new(bus)
    }

    #[tokio::test]
    async fn happy_path_reaches_executed() {
        let dir = tempfile::tempdir().unwrap();
        let m = machine(&dir).await;

        let s = signal();
        let id = s.id;
        m.admit(s, "generator").await.unwrap();

        for to in [
            SignalState::Evaluating,
            SignalState::Approved,
            SignalState::Executing,
            SignalState::Executed,
        ] {
            m.transition(id, to, "live-pipeline").await.unwrap();
        }

        assert_eq!(m.bus().current_state(id), Some(SignalState::Executed));
    }

    #[tokio::test]
    async fn invalid_transition_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let m = machine(&dir).await;

        let s = signal();
        let id = s.id;
        m.admit(s, "generator").await.unwrap();

        let err = m
            .transition(id, SignalState::Executed, "live-pipeline")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                from: SignalState::Generated,
                to: SignalState::Executed,
                ..
            }
        ));
        assert_eq!(m.bus().current_state(id), Some(SignalState::Generated));
        // No partial effect: nothing was appended.
        assert_eq!(m.bus().last_seq(), 1);
    }

    #[tokio::test]
    async fn unknown_signal_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let m = machine(&dir).await;

        let err = m
            .transition(Uuid::new_v4(), SignalState::Evaluating, "live-pipeline")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::UnknownSignal(_)));
    }

    #[tokio::test]
    async fn duplicate_admit_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let m = machine(&dir).await;

        let s = signal();
        m.admit(s.clone(), "generator").await.unwrap();
        let err = m.admit(s, "generator").await.unwrap_err();
        assert!(matches!(err, LifecycleError::DuplicateSignal(_)));
    }

    #[tokio::test]
    async fn auto_expire_is_once_only() {
        let dir = tempfile::tempdir().unwrap();
        let m = machine(&dir).await;

        let s = signal();
        let id = s.id;
        m.admit(s, "generator").await.unwrap();

        // Zero max-age makes the freshly admitted signal already stale.
        let expired = m.auto_expire(Duration::zero()).await.unwrap();
        assert_eq!(expired, vec![id]);
        assert_eq!(m.bus().current_state(id), Some(SignalState::Expired));

        // Second sweep finds it terminal and skips it.
        let expired = m.auto_expire(Duration::zero()).await.unwrap();
        assert!(expired.is_empty());
    }

    #[tokio::test]
    async fn executing_is_exempt_from_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let m = machine(&dir).await;

        let s = signal();
        let id = s.id;
        m.admit(s, "generator").await.unwrap();
        for to in [
            SignalState::Evaluating,
            SignalState::Approved,
            SignalState::Executing,
        ] {
            m.transition(id, to, "live-pipeline").await.unwrap();
        }

        let expired = m.auto_expire(Duration::zero()).await.unwrap();
        assert!(expired.is_empty());
        assert_eq!(m.bus().current_state(id), Some(SignalState::Executing));
    }

    #[tokio::test]
    async fn blocked_can_expire_but_stays_queryable() {
        let dir = tempfile::tempdir().unwrap();
        let m = machine(&dir).await;

        let s = signal();
        let id = s.id;
        m.admit(s, "generator").await.unwrap();
        m.transition(id, SignalState::Evaluating, "live-pipeline")
            .await
            .unwrap();
        m.transition(id, SignalState::Blocked, "live-pipeline")
            .await
            .unwrap();

        let expired = m.auto_expire(Duration::zero()).await.unwrap();
        assert_eq!(expired, vec![id]);
        assert!(m.record(id).is_some());
    }

    #[tokio::test]
    async fn racing_transitions_cannot_both_win() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::open(dir.path().join("events.jsonl")).await.unwrap());
        let m = Arc::new(SignalStateMachine::new(bus));

        let s = signal();
        let id = s.id;
        m.admit(s, "generator").await.unwrap();
        m.transition(id, SignalState::Evaluating, "live-pipeline")
            .await
            .unwrap();

        // Two tasks race EVALUATING -> APPROVED; exactly one succeeds.
        let m1 = m.clone();
        let m2 = m.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { m1.transition(id, SignalState::Approved, "a").await }),
            tokio::spawn(async move { m2.transition(id, SignalState::Approved, "b").await }),
        );
        let results = [r1.unwrap(), r2.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
        assert_eq!(m.bus().current_state(id), Some(SignalState::Approved));
    }
}
