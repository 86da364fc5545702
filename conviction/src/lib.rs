// Conviction Scoring (sizing, never rejection)
// Converts noisy per-indicator scores into a position-size multiplier.
// Rejection is the job of external gates; the scorer only sizes.

pub mod scorer;
pub mod weights;

pub use scorer::{Conviction, ConvictionScorer, SizingLadder};
pub use weights::WeightStore;
