// Shadow Execution Engine
// Simulates every signal observed on the bus, approved or blocked alike,
// to measure what blocking actually cost. Runs on its own schedule with
// its own checkpoint so backlog never touches the live path.

pub mod engine;
pub mod opportunity;
pub mod outcomes;
pub mod position;

pub use engine::{load_checkpoint, store_checkpoint, PriceSource, ShadowEngine, StaticPrices};
pub use opportunity::{ComponentOpportunity, OpportunityReport};
pub use outcomes::ShadowLedger;
pub use position::{ExitRule, ShadowPosition, TimeAndTargetExit};
