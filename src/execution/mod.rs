//! Execution plan construction
//!
//! Turns a trading intent plus live market features into a concrete
//! split-order plan:
//!
//! ```text
//! ExecutionDecider
//! ├── TuningSource (ParameterOptimizer: tuned split/gap/pacing knobs)
//! ├── InsightSource (LearningEngine: recent win rate)
//! └── distribution (exact-sum child-order quantity splitting)
//! ```
//!
//! The decision is the engine's only externally-consumed output; the
//! order-placement collaborator translates it into timed submissions.

pub mod decider;
pub mod distribution;

pub use decider::{
    ExecutionDecider, InsightSource, SplitOrder, SplitOrderDecision, Strategy, TuningSource,
};
pub use distribution::{distribute, Distribution};
