// Index queries
// Lazy, restartable, finite sequences over a point-in-time snapshot of the
// signal index.

use chrono::{DateTime, Utc};
use common::{SignalRecord, SignalState};

use crate::bus::EventBus;

/// Filter over indexed signals. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub state: Option<SignalState>,
    pub symbol: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl SignalFilter {
    pub fn with_state(mut self, state: SignalState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn created_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_to = Some(to);
        self
    }

    pub fn matches(&self, record: &SignalRecord) -> bool {
        if let Some(state) = self.state {
            if record.current_state != state {
                return false;
            }
        }
        if let Some(symbol) = &self.symbol {
            if &record.signal.symbol != symbol {
                return false;
            }
        }
        if let Some(from) = self.created_from {
            if record.signal.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.created_to {
            if record.signal.created_at > to {
                return false;
            }
        }
        true
    }
}

impl EventBus {
    /// Lazily iterate signals matching `filter`.
    ///
    /// The iterator walks a snapshot taken when `query` is called, ordered
    /// by creation time, so it is unaffected by concurrent publishes and
    /// can be restarted by calling `query` again.
    pub fn query(&self, filter: SignalFilter) -> impl Iterator<Item = SignalRecord> {
        let mut snapshot = self.signals();
        snapshot.sort_by_key(|r| (r.signal.created_at, r.signal.id));
        snapshot.into_iter().filter(move |r| filter.matches(r))
    }
}
