// Startup replay
// Rebuilds the in-memory index by applying every committed event in
// sequence order. Replay is idempotent: the same committed log always
// produces the same index.

use std::path::Path;

use anyhow::Result;
use common::{CreatedPayload, EventType, LifecycleEvent, ScorePayload, SignalRecord};
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of replaying an event log
pub(crate) struct Replayed {
    pub index: DashMap<Uuid, SignalRecord>,
    pub last_seq: u64,
    pub applied: u64,
}

pub(crate) async fn replay(path: &Path) -> Result<Replayed> {
    let events = crate::store::read_events(path).await?;

    let index = DashMap::new();
    let mut last_seq = 0u64;
    let mut applied = 0u64;

    for event in &events {
        // Already-applied sequence numbers are skipped so replaying a log
        // with duplicated tails stays idempotent.
        if event.seq <= last_seq {
            warn!(
                "event log {}: out-of-order seq {} after {}, skipping",
                path.display(),
                event.seq,
                last_seq
            );
            continue;
        }
        apply_event(&index, event);
        last_seq = event.seq;
        applied += 1;
    }

    debug!(
        "replayed {} events from {} ({} signals indexed)",
        applied,
        path.display(),
        index.len()
    );

    Ok(Replayed {
        index,
        last_seq,
        applied,
    })
}

/// Fold one event into the index. Shared by replay and the live publish
/// path so both produce bit-identical state.
pub(crate) fn apply_event(index: &DashMap<Uuid, SignalRecord>, event: &LifecycleEvent) {
    match event.event_type {
        EventType::SignalCreated => {
            let payload: CreatedPayload = match serde_json::from_value(event.payload.clone()) {
                Ok(p) => p,
                Err(e) => {
                    warn!("seq {}: undecodable signal_created payload: {}", event.seq, e);
                    return;
                }
            };
            if index.contains_key(&event.signal_id) {
                warn!("seq {}: duplicate signal_created for {}", event.seq, event.signal_id);
                return;
            }
            index.insert(
                event.signal_id,
                SignalRecord::new(payload.signal, event.timestamp),
            );
        }
        EventType::StateChanged => {
            let Some(mut record) = index.get_mut(&event.signal_id) else {
                warn!(
                    "seq {}: state change for unknown signal {}, skipping",
                    event.seq, event.signal_id
                );
                return;
            };
            record.current_state = event.to_state;
            record.last_transition_at = event.timestamp;
        }
        EventType::SignalScored => {
            let payload: ScorePayload = match serde_json::from_value(event.payload.clone()) {
                Ok(p) => p,
                Err(e) => {
                    warn!("seq {}: undecodable signal_scored payload: {}", event.seq, e);
                    return;
                }
            };
            let Some(mut record) = index.get_mut(&event.signal_id) else {
                warn!(
                    "seq {}: score for unknown signal {}, skipping",
                    event.seq, event.signal_id
                );
                return;
            };
            record.composite_score = Some(payload.composite_score);
            record.sizing_multiplier = Some(payload.sizing_multiplier);
            record.weights_snapshot = Some(payload.weights);
        }
    }
}
