//! Adaptive Execution Decision Engine
//!
//! Decides *how* to execute a trading intent and improves those
//! decisions from realized outcomes:
//!
//! - `ParameterOptimizer`: epsilon-greedy bandit over the numeric
//!   execution tunables (split counts, price gaps, pacing, sizing)
//! - `LearningEngine`: tabular Q-learning over discretized market
//!   states, with shaped rewards, experience replay and pattern mining
//! - `ExecutionDecider`: fuses both into a bounded split-order plan
//!   with quantities, price offsets, delays, confidence and rationale
//!
//! Construct one instance of each per process and inject them into the
//! decider; load state at startup, flush periodically and at shutdown.
//! Order placement, market data and brokerage wiring live outside this
//! crate.

pub mod config;
pub mod core;
pub mod execution;
pub mod persist;

pub use config::EngineConfig;
pub use core::{
    ActionParams, LearnedInsights, LearningEngine, MarketCondition, MarketSnapshot, ParamValue,
    ParameterOptimizer, RecentPerformance, Side, TradeResult,
};
pub use execution::{ExecutionDecider, SplitOrderDecision, Strategy};
