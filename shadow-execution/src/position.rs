// Virtual positions
// One per signal, opened at the mark when the engine first sees the
// signal and closed by the pluggable exit rule. Entry and exit use the
// same rules for every signal so blocked and executed signals are
// directly comparable.

use chrono::{DateTime, Duration, Utc};
use common::SignalDirection;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct ShadowPosition {
    pub signal_id: Uuid,
    pub symbol: String,
    pub direction: SignalDirection,
    pub entry: Decimal,
    pub sizing_multiplier: f64,
    pub opened_at: DateTime<Utc>,
}

impl ShadowPosition {
    /// Mark-to-market P&L at `mark`, scaled by the sizing multiplier
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        let per_unit = match self.direction {
            SignalDirection::Long => mark - self.entry,
            SignalDirection::Short => self.entry - mark,
        };
        per_unit * Decimal::from_f64_retain(self.sizing_multiplier).unwrap_or(Decimal::ONE)
    }

    /// Direction-adjusted return at `mark`, as a fraction of entry
    pub fn return_pct(&self, mark: Decimal) -> f64 {
        if self.entry.is_zero() {
            return 0.0;
        }
        let per_unit = match self.direction {
            SignalDirection::Long => mark - self.entry,
            SignalDirection::Short => self.entry - mark,
        };
        (per_unit / self.entry).to_f64().unwrap_or(0.0)
    }
}

/// Exit condition for shadow positions.
///
/// The production rule set lives with the exit-rule collaborator; the
/// engine only asks "should this close now, and why".
pub trait ExitRule: Send + Sync {
    /// Returns the exit reason when the position should close at `mark`
    fn should_exit(
        &self,
        position: &ShadowPosition,
        mark: Decimal,
        elapsed: Duration,
    ) -> Option<String>;
}

/// Reference exit rule: close on target, stop or age, whichever first.
#[derive(Debug, Clone)]
pub struct TimeAndTargetExit {
    pub max_hold: Duration,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
}

impl Default for TimeAndTargetExit {
    fn default() -> Self {
        Self {
            max_hold: Duration::hours(24),
            take_profit_pct: 0.05,
            stop_loss_pct: 0.03,
        }
    }
}

impl ExitRule for TimeAndTargetExit {
    fn should_exit(
        &self,
        position: &ShadowPosition,
        mark: Decimal,
        elapsed: Duration,
    ) -> Option<String> {
        if elapsed >= self.max_hold {
            return Some("max_hold".to_string());
        }
        let ret = position.return_pct(mark);
        if ret >= self.take_profit_pct {
            return Some("take_profit".to_string());
        }
        if ret <= -self.stop_loss_pct {
            return Some("stop_loss".to_string());
        }
        None
    }
}
