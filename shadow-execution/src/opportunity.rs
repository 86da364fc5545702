// Opportunity cost
// What did blocking actually cost? Net opportunity cost is the plain sum
// of shadow P&L over blocked signals: avoided losses offset missed
// profits. The per-component split keeps both sides visible so a gate's
// value can be judged on its own.

use std::collections::{BTreeMap, HashSet};

use common::{Decision, ShadowOutcome, SignalRecord, SignalState, Verdict};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Aggregate for one blocking component
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentOpportunity {
    pub component: String,
    pub blocked_count: usize,
    pub closed_count: usize,
    /// Sum of positive shadow P&L the gate prevented
    pub missed_profit: Decimal,
    /// Sum of |negative shadow P&L| the gate saved
    pub avoided_loss: Decimal,
    /// missed_profit - avoided_loss
    pub net_opportunity_cost: Decimal,
}

/// Opportunity cost across every blocked signal
#[derive(Debug, Clone, PartialEq)]
pub struct OpportunityReport {
    pub blocked_signals: usize,
    pub outcomes_available: usize,
    pub net_opportunity_cost: Decimal,
    pub by_component: BTreeMap<String, ComponentOpportunity>,
}

impl OpportunityReport {
    /// Build the report from the three owned logs.
    ///
    /// A signal counts as blocked if it currently sits in BLOCKED or has a
    /// block decision on record (blocked signals later expire but keep
    /// their decision). Signals whose decision was lost are attributed to
    /// "unknown" per the tracker's best-effort contract.
    pub fn compute(
        records: &[SignalRecord],
        decisions: &[Decision],
        outcomes: &[ShadowOutcome],
    ) -> Self {
        let decision_by_signal: BTreeMap<Uuid, &Decision> = decisions
            .iter()
            .filter(|d| d.verdict == Verdict::Block)
            .map(|d| (d.signal_id, d))
            .collect();

        let mut blocked_ids: HashSet<Uuid> = records
            .iter()
            .filter(|r| r.current_state == SignalState::Blocked)
            .map(|r| r.signal.id)
            .collect();
        blocked_ids.extend(decision_by_signal.keys().copied());

        let outcome_by_signal: BTreeMap<Uuid, &ShadowOutcome> =
            outcomes.iter().map(|o| (o.signal_id, o)).collect();

        let mut by_component: BTreeMap<String, ComponentOpportunity> = BTreeMap::new();
        let mut net = Decimal::ZERO;
        let mut outcomes_available = 0usize;

        for signal_id in &blocked_ids {
            let component = decision_by_signal
                .get(signal_id)
                .and_then(|d| d.blocker_component.clone())
                .unwrap_or_else(|| "unknown".to_string());

            let entry = by_component
                .entry(component.clone())
                .or_insert_with(|| ComponentOpportunity {
                    component,
                    blocked_count: 0,
                    closed_count: 0,
                    missed_profit: Decimal::ZERO,
                    avoided_loss: Decimal::ZERO,
                    net_opportunity_cost: Decimal::ZERO,
                });
            entry.blocked_count += 1;

            let Some(outcome) = outcome_by_signal.get(signal_id) else {
                continue;
            };
            outcomes_available += 1;
            if outcome.closed {
                entry.closed_count += 1;
            }

            net += outcome.pnl;
            entry.net_opportunity_cost += outcome.pnl;
            if outcome.pnl > Decimal::ZERO {
                entry.missed_profit += outcome.pnl;
            } else {
                entry.avoided_loss += -outcome.pnl;
            }
        }

        Self {
            blocked_signals: blocked_ids.len(),
            outcomes_available,
            net_opportunity_cost: net,
            by_component,
        }
    }
}
