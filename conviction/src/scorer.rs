// Weighted conviction scoring
// composite = sum(weight_i * confidence_i * alignment_i) over the components
// present; a threshold ladder maps the composite to a sizing multiplier.

use anyhow::{bail, Result};
use common::{ComponentScore, WeightSnapshot};
use std::collections::BTreeMap;

/// Result of scoring a signal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conviction {
    pub composite_score: f64,
    pub sizing_multiplier: f64,
}

/// Ordered, non-overlapping threshold ladder mapping a composite score to
/// a sizing multiplier. Thresholds are inclusive lower bounds, so a score
/// exactly on a boundary takes the higher tier.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingLadder {
    /// (threshold, multiplier) pairs, strictly descending by threshold
    tiers: Vec<(f64, f64)>,
    /// Multiplier for scores below the lowest threshold
    floor: f64,
}

impl Default for SizingLadder {
    fn default() -> Self {
        Self {
            tiers: vec![
                (0.50, 2.0),
                (0.35, 1.5),
                (0.25, 1.2),
                (0.15, 1.0),
                (0.05, 0.6),
            ],
            floor: 0.4,
        }
    }
}

impl SizingLadder {
    pub fn new(tiers: Vec<(f64, f64)>, floor: f64) -> Result<Self> {
        if tiers.is_empty() {
            bail!("sizing ladder needs at least one tier");
        }
        for pair in tiers.windows(2) {
            if pair[1].0 >= pair[0].0 {
                bail!(
                    "sizing ladder thresholds must be strictly descending: {} then {}",
                    pair[0].0,
                    pair[1].0
                );
            }
        }
        Ok(Self { tiers, floor })
    }

    /// Multiplier for a composite score
    pub fn multiplier(&self, score: f64) -> f64 {
        for &(threshold, multiplier) in &self.tiers {
            if score >= threshold {
                return multiplier;
            }
        }
        self.floor
    }
}

/// Deterministic scorer: identical component scores and weights always
/// produce the identical conviction, which is what makes shadow replay and
/// historical re-scoring possible.
#[derive(Debug, Clone, Default)]
pub struct ConvictionScorer {
    ladder: SizingLadder,
}

impl ConvictionScorer {
    pub fn new(ladder: SizingLadder) -> Self {
        Self { ladder }
    }

    /// Score a signal's components against a weight snapshot.
    ///
    /// Components missing from the weight vector contribute zero, as do
    /// weighted indicators absent from the signal. There is no reject
    /// outcome here by design of the pipeline: low conviction only shrinks
    /// the position.
    pub fn score(
        &self,
        components: &BTreeMap<String, ComponentScore>,
        weights: &WeightSnapshot,
    ) -> Conviction {
        let mut composite = 0.0;
        for (name, component) in components {
            let Some(weight) = weights.weights.get(name) else {
                continue;
            };
            composite += weight * component.confidence * component.alignment;
        }

        Conviction {
            composite_score: composite,
            sizing_multiplier: self.ladder.multiplier(composite),
        }
    }
}
