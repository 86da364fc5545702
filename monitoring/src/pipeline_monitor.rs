// Pipeline monitor
// Aggregates state counts, throughput and stuck signals from the bus
// index. The stuck threshold sits below the auto-expire threshold so
// operators see a wedged signal before it is force-expired.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::SignalState;
use event_log::EventBus;
use uuid::Uuid;

/// Thresholds for stuck detection and health classification
#[derive(Debug, Clone)]
pub struct MonitorThresholds {
    /// Same non-settled state longer than this marks a signal stuck
    pub stuck_threshold: Duration,
    /// Stuck count beyond which health is CRITICAL rather than WARNING
    pub critical_stuck_count: usize,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            stuck_threshold: Duration::hours(1),
            critical_stuck_count: 10,
        }
    }
}

/// A signal that stopped progressing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckSignal {
    pub signal_id: Uuid,
    pub state: SignalState,
    pub stuck_for: Duration,
}

/// Point-in-time summary of pipeline state
#[derive(Debug, Clone)]
pub struct PipelineSnapshot {
    pub taken_at: DateTime<Utc>,
    pub counts_by_state: BTreeMap<SignalState, usize>,
    /// Signals that reached a settled state within the last hour
    pub throughput_per_hour: usize,
    /// Signals created within the last hour
    pub generated_last_hour: usize,
    pub stuck_signals: Vec<StuckSignal>,
}

/// Pipeline health, recomputed from a snapshot on every call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Warning,
    Critical,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Healthy => f.write_str("HEALTHY"),
            Health::Warning => f.write_str("WARNING"),
            Health::Critical => f.write_str("CRITICAL"),
        }
    }
}

/// Classify a snapshot. Pure function of its inputs, no hidden state.
pub fn classify(snapshot: &PipelineSnapshot, thresholds: &MonitorThresholds) -> Health {
    let stuck = snapshot.stuck_signals.len();
    if stuck > thresholds.critical_stuck_count {
        return Health::Critical;
    }
    if snapshot.generated_last_hour > 0 && snapshot.throughput_per_hour == 0 {
        return Health::Critical;
    }
    if stuck > 0 {
        return Health::Warning;
    }
    Health::Healthy
}

/// Read-only observer over the bus index
pub struct PipelineMonitor {
    bus: Arc<EventBus>,
    thresholds: MonitorThresholds,
}

impl PipelineMonitor {
    pub fn new(bus: Arc<EventBus>, thresholds: MonitorThresholds) -> Self {
        Self { bus, thresholds }
    }

    pub fn thresholds(&self) -> &MonitorThresholds {
        &self.thresholds
    }

    /// Take a snapshot of counts, throughput and stuck signals.
    pub fn snapshot(&self) -> PipelineSnapshot {
        let now = Utc::now();
        let hour_ago = now - Duration::hours(1);

        let mut counts_by_state: BTreeMap<SignalState, usize> = BTreeMap::new();
        let mut throughput_per_hour = 0usize;
        let mut generated_last_hour = 0usize;
        let mut stuck_signals = Vec::new();

        for record in self.bus.signals() {
            *counts_by_state.entry(record.current_state).or_insert(0) += 1;

            if record.signal.created_at >= hour_ago {
                generated_last_hour += 1;
            }
            if record.current_state.is_settled() && record.last_transition_at >= hour_ago {
                throughput_per_hour += 1;
            }

            if !record.current_state.is_settled() {
                let stuck_for = now - record.last_transition_at;
                if stuck_for > self.thresholds.stuck_threshold {
                    stuck_signals.push(StuckSignal {
                        signal_id: record.signal.id,
                        state: record.current_state,
                        stuck_for,
                    });
                }
            }
        }

        stuck_signals.sort_by_key(|s| std::cmp::Reverse(s.stuck_for));

        PipelineSnapshot {
            taken_at: now,
            counts_by_state,
            throughput_per_hour,
            generated_last_hour,
            stuck_signals,
        }
    }

    /// Snapshot and classify in one step
    pub fn health(&self) -> Health {
        classify(&self.snapshot(), &self.thresholds)
    }
}
