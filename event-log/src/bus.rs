// Event bus
// Serializes appends through a single writer critical section so sequence
// ids form a total order equal to commit order. Index reads go through a
// sharded map and never touch the writer lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use common::{
    CreatedPayload, EventType, LifecycleEvent, ScorePayload, Signal, SignalRecord, SignalState,
    TransitionPayload, WeightSnapshot,
};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::replay;
use crate::store::EventWriter;

/// An event as submitted by a producer, before the bus assigns its
/// sequence id and timestamp.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub signal_id: Uuid,
    pub event_type: EventType,
    pub from_state: Option<SignalState>,
    pub to_state: SignalState,
    pub payload: serde_json::Value,
}

impl EventDraft {
    /// Draft for a newly generated signal entering the pipeline
    pub fn created(signal: Signal, actor: &str) -> Self {
        let signal_id = signal.id;
        let payload = serde_json::to_value(CreatedPayload {
            signal,
            actor: actor.to_string(),
        })
        .expect("signal payload serializes");
        Self {
            signal_id,
            event_type: EventType::SignalCreated,
            from_state: None,
            to_state: SignalState::Generated,
            payload,
        }
    }

    /// Draft for a validated state transition
    pub fn transition(signal_id: Uuid, from: SignalState, to: SignalState, actor: &str) -> Self {
        Self {
            signal_id,
            event_type: EventType::StateChanged,
            from_state: Some(from),
            to_state: to,
            payload: serde_json::to_value(TransitionPayload {
                actor: actor.to_string(),
            })
            .expect("actor payload serializes"),
        }
    }

    /// Draft recording a conviction score against an evaluating signal
    pub fn scored(
        signal_id: Uuid,
        state: SignalState,
        composite_score: f64,
        sizing_multiplier: f64,
        weights: WeightSnapshot,
    ) -> Self {
        Self {
            signal_id,
            event_type: EventType::SignalScored,
            from_state: Some(state),
            to_state: state,
            payload: serde_json::to_value(ScorePayload {
                composite_score,
                sizing_multiplier,
                weights,
            })
            .expect("score payload serializes"),
        }
    }
}

struct WriterState {
    writer: EventWriter,
    next_seq: u64,
}

/// Durable, totally ordered, append-only event log with an in-memory index
pub struct EventBus {
    path: PathBuf,
    writer: Mutex<WriterState>,
    index: DashMap<Uuid, SignalRecord>,
    // Mirror of the committed high-water mark for lock-free reads
    last_seq: AtomicU64,
}

impl EventBus {
    /// Open the log at `path`, replaying it to rebuild the index.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let replayed = replay::replay(&path).await.context("replay event log")?;
        let writer = EventWriter::open(&path).await?;

        debug!(
            "event bus open at {} ({} events committed)",
            path.display(),
            replayed.last_seq
        );

        Ok(Self {
            path,
            writer: Mutex::new(WriterState {
                writer,
                next_seq: replayed.last_seq + 1,
            }),
            index: replayed.index,
            last_seq: AtomicU64::new(replayed.last_seq),
        })
    }

    /// Append an event durably and assign its sequence id.
    ///
    /// The write, the sequence assignment and the index update all happen
    /// under one critical section, so the index always reflects exactly the
    /// committed prefix of the log. Persistence failures propagate: a lost
    /// transition would corrupt the audit trail.
    pub async fn publish(&self, draft: EventDraft) -> Result<u64> {
        let mut state = self.writer.lock().await;
        let event = LifecycleEvent {
            seq: state.next_seq,
            signal_id: draft.signal_id,
            event_type: draft.event_type,
            from_state: draft.from_state,
            to_state: draft.to_state,
            timestamp: Utc::now(),
            payload: draft.payload,
        };

        state
            .writer
            .append(&event)
            .await
            .with_context(|| format!("publish seq {} to {}", event.seq, self.path.display()))?;

        replay::apply_event(&self.index, &event);
        state.next_seq += 1;
        self.last_seq.store(event.seq, Ordering::Release);
        Ok(event.seq)
    }

    /// Current state of a signal, or None if it was never admitted
    pub fn current_state(&self, signal_id: Uuid) -> Option<SignalState> {
        self.index.get(&signal_id).map(|r| r.current_state)
    }

    /// Full indexed record for a signal
    pub fn get(&self, signal_id: Uuid) -> Option<SignalRecord> {
        self.index.get(&signal_id).map(|r| r.value().clone())
    }

    /// Point-in-time snapshot of every indexed signal
    pub fn signals(&self) -> Vec<SignalRecord> {
        self.index.iter().map(|r| r.value().clone()).collect()
    }

    /// Number of signals in the index
    pub fn signal_count(&self) -> usize {
        self.index.len()
    }

    /// Highest committed sequence id (0 when the log is empty)
    pub fn last_seq(&self) -> u64 {
        self.last_seq.load(Ordering::Acquire)
    }

    /// Committed events with seq greater than `after`, in sequence order.
    ///
    /// Reads the log file rather than the index so catch-up consumers see
    /// full history without holding any bus lock.
    pub async fn events_after(&self, after: u64) -> Result<Vec<LifecycleEvent>> {
        crate::store::read_events_after(&self.path, after).await
    }

    /// Path of the underlying log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
