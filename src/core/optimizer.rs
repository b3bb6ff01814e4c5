//! Online parameter optimization
//!
//! A per-parameter epsilon-greedy bandit over the engine's numeric
//! tunables (split counts, price gaps, pacing intervals, sizing and risk
//! thresholds). Each call scores the value that was just used, folds it
//! into the parameter's history, and proposes the next value to try:
//! usually a Gaussian perturbation of the best known value, sometimes a
//! uniform draw from the declared range.
//!
//! The optimizer knows nothing about market semantics beyond the labels
//! it stores with each trial; the interpretation of a parameter belongs
//! to the caller.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{OptimizerConfig, PersistenceConfig};
use crate::core::types::{MarketCondition, ParamValue, RecentPerformance};
use crate::persist::FlushTracker;

/// Declared numeric range for one tunable parameter. Fixed at
/// construction; the optimizer never proposes outside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterRange {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub is_integer: bool,
}

impl ParameterRange {
    pub fn new(name: &str, min: f64, max: f64, is_integer: bool) -> Self {
        Self {
            name: name.to_string(),
            min,
            max,
            is_integer,
        }
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Clip into range, rounding integer parameters to the nearest step
    pub fn quantize(&self, value: f64) -> ParamValue {
        let clipped = value.clamp(self.min, self.max);
        if self.is_integer {
            ParamValue::Integer(clipped.round() as i64)
        } else {
            ParamValue::Float(clipped)
        }
    }

    /// Uniform draw from the range (integer-uniform for integer params)
    fn sample<R: Rng>(&self, rng: &mut R) -> ParamValue {
        if self.is_integer {
            let lo = self.min.ceil() as i64;
            let hi = self.max.floor() as i64;
            ParamValue::Integer(rng.gen_range(lo..=hi))
        } else {
            ParamValue::Float(rng.gen_range(self.min..=self.max))
        }
    }
}

/// One observation of a parameter value in live or virtual trading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterTrial {
    pub parameter: String,
    pub value: ParamValue,
    /// Derived performance score in [0, 1]
    pub score: f64,
    pub win_rate: f64,
    pub avg_profit: f64,
    pub trade_count: u32,
    pub market_condition: MarketCondition,
    pub timestamp: DateTime<Utc>,
}

/// Exploration history of one parameter. Created on the first trial;
/// grows monotonically, only the persisted file bounds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterHistory {
    pub tested_values: Vec<f64>,
    pub scores: Vec<f64>,
    pub best_value: f64,
    pub best_score: f64,
    pub last_updated: DateTime<Utc>,
}

impl ParameterHistory {
    fn first(value: f64, score: f64) -> Self {
        Self {
            tested_values: vec![value],
            scores: vec![score],
            best_value: value,
            best_score: score,
            last_updated: Utc::now(),
        }
    }

    fn record(&mut self, value: f64, score: f64) {
        self.tested_values.push(value);
        self.scores.push(score);
        // Strict improvement only: ties keep the earlier best
        if score > self.best_score {
            self.best_score = score;
            self.best_value = value;
        }
        self.last_updated = Utc::now();
    }

    pub fn len(&self) -> usize {
        self.tested_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tested_values.is_empty()
    }

    /// Expected score for a candidate value: score of the nearest tried
    /// value, falling back to the mean score below two trials.
    fn predict_score(&self, value: f64) -> f64 {
        if self.len() < 2 {
            if self.scores.is_empty() {
                return 0.5;
            }
            return self.scores.iter().sum::<f64>() / self.scores.len() as f64;
        }

        let mut best_idx = 0;
        let mut best_dist = f64::INFINITY;
        for (i, tested) in self.tested_values.iter().enumerate() {
            let dist = (tested - value).abs();
            if dist < best_dist {
                best_dist = dist;
                best_idx = i;
            }
        }
        self.scores[best_idx]
    }
}

/// Tuned split-order knobs for one order, heuristic baseline overridden
/// by learned values where the history has found something better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitOrderParams {
    pub split_count: u32,
    /// Gap between child orders in percent of price
    pub price_gap_pct: f64,
    /// Base pacing interval between child orders
    pub time_interval_secs: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OptimizerState {
    histories: HashMap<String, ParameterHistory>,
    #[serde(skip)]
    trials: Vec<ParameterTrial>,
}

/// Epsilon-greedy bandit over named numeric parameters.
///
/// All public methods take `&self`; an interior mutex serializes every
/// read-modify-write so concurrent strategy contexts can share one
/// instance.
pub struct ParameterOptimizer {
    cfg: OptimizerConfig,
    ranges: HashMap<String, ParameterRange>,
    state: Mutex<OptimizerState>,
    flush: Mutex<FlushTracker>,
}

impl ParameterOptimizer {
    /// Create with the standard tunable catalog
    pub fn new(cfg: OptimizerConfig, persistence: &PersistenceConfig) -> Self {
        Self::with_ranges(cfg, persistence, default_ranges())
    }

    pub fn with_ranges(
        cfg: OptimizerConfig,
        persistence: &PersistenceConfig,
        ranges: Vec<ParameterRange>,
    ) -> Self {
        let ranges = ranges
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();
        Self {
            cfg,
            ranges,
            state: Mutex::new(OptimizerState::default()),
            flush: Mutex::new(FlushTracker::new(persistence)),
        }
    }

    /// Weighted performance score in [0, 1].
    ///
    /// The weights encode the engine's risk/return policy: win rate and
    /// profit dominate, drawdown is penalized, sharpe and sample size
    /// round it out. Profit is scaled x10 (a 3% average trade saturates
    /// at 0.3 contribution) and trade count saturates at 100 trades.
    pub fn performance_score(perf: &RecentPerformance) -> f64 {
        let score = perf.win_rate * 0.30
            + (perf.avg_profit * 10.0) * 0.30
            + (1.0 - perf.max_drawdown.abs()) * 0.20
            + (perf.sharpe * 0.1) * 0.10
            + (perf.trade_count as f64 / 100.0).min(1.0) * 0.10;
        score.clamp(0.0, 1.0)
    }

    /// Score the value just used and propose the next value to try.
    ///
    /// Returns `None` for parameter names outside the declared catalog.
    /// The second element is the expected score of the proposal
    /// (nearest-neighbor estimate over tried values).
    pub fn optimize_parameter(
        &self,
        name: &str,
        current_value: f64,
        recent_performance: &RecentPerformance,
        market_condition: MarketCondition,
    ) -> Option<(ParamValue, f64)> {
        let range = match self.ranges.get(name) {
            Some(range) => range,
            None => {
                warn!("[OPTIMIZER] Unknown parameter '{}', skipping", name);
                return None;
            }
        };

        let score = Self::performance_score(recent_performance);
        let recorded = range.quantize(current_value);

        let mut state = self.state.lock().unwrap();
        state.trials.push(ParameterTrial {
            parameter: name.to_string(),
            value: recorded,
            score,
            win_rate: recent_performance.win_rate,
            avg_profit: recent_performance.avg_profit,
            trade_count: recent_performance.trade_count,
            market_condition,
            timestamp: Utc::now(),
        });

        state
            .histories
            .entry(name.to_string())
            .and_modify(|h| h.record(recorded.as_f64(), score))
            .or_insert_with(|| ParameterHistory::first(recorded.as_f64(), score));

        let history = &state.histories[name];
        let proposal = self.propose(range, history);
        let expected = history.predict_score(proposal.as_f64());

        debug!(
            "[OPTIMIZER] {} scored {:.3} at {} -> proposing {} (expected {:.3})",
            name, score, recorded, proposal, expected
        );

        drop(state);
        self.flush.lock().unwrap().record_update();

        Some((proposal, expected))
    }

    /// Epsilon-greedy proposal: explore uniformly with probability
    /// epsilon (always, below the minimum trial count), otherwise
    /// perturb the best known value with Gaussian noise sized to the
    /// range width.
    fn propose(&self, range: &ParameterRange, history: &ParameterHistory) -> ParamValue {
        let mut rng = rand::thread_rng();

        if history.len() < self.cfg.min_trials_for_exploitation
            || rng.gen::<f64>() < self.cfg.exploration_rate
        {
            return range.sample(&mut rng);
        }

        let sigma = self.cfg.perturbation_fraction * range.width();
        let perturbed = match Normal::new(history.best_value, sigma) {
            Ok(dist) => dist.sample(&mut rng),
            Err(_) => history.best_value,
        };
        range.quantize(perturbed)
    }

    /// Tuned split-order parameters for one order.
    ///
    /// Heuristic baseline: more child orders for larger notional and
    /// higher volatility; gaps widen with volatility; pacing halves in
    /// volatile markets and doubles in thin liquidity. Any parameter
    /// with a better-than-default learned value is overridden from
    /// history.
    pub fn get_optimal_split_order_params(
        &self,
        symbol: &str,
        order_amount: Decimal,
        volatility: f64,
        liquidity: f64,
        market_condition: MarketCondition,
    ) -> SplitOrderParams {
        let amount = order_amount.to_f64().unwrap_or(0.0);

        let mut split_count: u32 = 3;
        if amount > 10_000_000.0 {
            split_count += 2;
        }
        if amount > 50_000_000.0 {
            split_count += 2;
        }
        if volatility > 0.03 {
            split_count += 2;
        }
        split_count = split_count.clamp(2, 10);

        let mut price_gap_pct = (0.2 + volatility * 10.0).clamp(0.1, 2.0);

        let mut interval = 60.0_f64;
        if market_condition == MarketCondition::Volatile {
            interval *= 0.5;
        }
        if liquidity < 0.5 {
            interval *= 2.0;
        }
        let mut time_interval_secs = interval.clamp(10.0, 600.0) as u64;

        // Learned overrides beat the heuristic once a parameter has
        // found something better than a coin flip
        if let Some(best) = self.learned_override("split_order_count") {
            split_count = (best as i64).clamp(2, 10) as u32;
        }
        if let Some(best) = self.learned_override("price_gap_pct") {
            price_gap_pct = best.clamp(0.1, 2.0);
        }
        if let Some(best) = self.learned_override("time_interval_secs") {
            time_interval_secs = best.clamp(10.0, 600.0) as u64;
        }

        debug!(
            "[OPTIMIZER] {} split params: {} splits, {:.2}% gap, {}s interval ({})",
            symbol, split_count, price_gap_pct, time_interval_secs, market_condition
        );

        SplitOrderParams {
            split_count,
            price_gap_pct,
            time_interval_secs,
        }
    }

    /// Position size in capital units from a half-Kelly baseline.
    ///
    /// Kelly fraction with a 1.5 payoff ratio, halved, scaled by an AI
    /// confidence multiplier in [0.5, 1.0] and an inverse-volatility
    /// adjustment capped at 1.5x, then clamped to the declared sizing
    /// range. A learned position size overrides the baseline.
    pub fn get_optimal_position_size(
        &self,
        symbol: &str,
        ai_confidence: f64,
        volatility: f64,
        win_rate: f64,
        available_capital: Decimal,
    ) -> Decimal {
        let kelly = win_rate - (1.0 - win_rate) / 1.5;
        let half_kelly = kelly.max(0.0) * 0.5;

        let confidence_mult = 0.5 + 0.5 * ai_confidence.clamp(0.0, 1.0);
        let vol_adjust = (0.02 / volatility.max(1e-6)).min(1.5);

        let mut fraction = (half_kelly * confidence_mult * vol_adjust).clamp(0.0, 0.30);

        if let Some(best) = self.learned_override("position_size_pct") {
            fraction = best.clamp(0.0, 0.30);
        }

        let size = available_capital
            * Decimal::from_f64(fraction).unwrap_or(Decimal::ZERO);

        debug!(
            "[OPTIMIZER] {} position size: {:.1}% of capital ({})",
            symbol,
            fraction * 100.0,
            size.round_dp(0)
        );

        size.round_dp(0)
    }

    /// Decision confidence from history depth: a fixed bonus per
    /// sufficiently-sampled parameter on a 0.5 base, capped.
    pub fn estimate_confidence(&self, parameters: &[&str]) -> f64 {
        let state = self.state.lock().unwrap();
        let mut confidence = 0.5;
        for name in parameters {
            if let Some(history) = state.histories.get(*name) {
                if history.len() >= self.cfg.min_trials_for_confidence {
                    confidence += self.cfg.confidence_bonus_per_param;
                }
            }
        }
        confidence.min(self.cfg.confidence_cap)
    }

    /// Best learned value for a parameter, if its best score beats the
    /// 0.5 neutral default
    fn learned_override(&self, name: &str) -> Option<f64> {
        let state = self.state.lock().unwrap();
        state
            .histories
            .get(name)
            .filter(|h| h.best_score > 0.5)
            .map(|h| h.best_value)
    }

    /// Best known value and score for a parameter
    pub fn best_value(&self, name: &str) -> Option<(ParamValue, f64)> {
        let state = self.state.lock().unwrap();
        let range = self.ranges.get(name)?;
        state
            .histories
            .get(name)
            .map(|h| (range.quantize(h.best_value), h.best_score))
    }

    /// Number of recorded trials for a parameter
    pub fn trial_count(&self, name: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.histories.get(name).map_or(0, |h| h.len())
    }

    /// Trial log for a parameter with its context labels, oldest first.
    /// In-memory only; the persisted state keeps the condensed
    /// histories.
    pub fn trials_for(&self, name: &str) -> Vec<ParameterTrial> {
        let state = self.state.lock().unwrap();
        state
            .trials
            .iter()
            .filter(|t| t.parameter == name)
            .cloned()
            .collect()
    }

    /// Save per-parameter histories to a JSON file
    pub fn save(&self, path: &str) -> Result<()> {
        let state = self.state.lock().unwrap();
        let json = serde_json::to_string_pretty(&*state)?;
        drop(state);
        fs::write(path, json)?;
        self.flush.lock().unwrap().mark_flushed();
        info!("[OPTIMIZER] Saved histories to {}", path);
        Ok(())
    }

    /// Load histories from a JSON file
    pub fn load<P: AsRef<Path>>(
        path: P,
        cfg: OptimizerConfig,
        persistence: &PersistenceConfig,
    ) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let state: OptimizerState = serde_json::from_str(&json)?;
        let optimizer = Self::new(cfg, persistence);
        *optimizer.state.lock().unwrap() = state;
        Ok(optimizer)
    }

    /// Load from file, or start empty if the file is missing or corrupt
    pub fn load_or_new<P: AsRef<Path>>(
        path: P,
        cfg: OptimizerConfig,
        persistence: &PersistenceConfig,
    ) -> Self {
        match Self::load(path, cfg.clone(), persistence) {
            Ok(optimizer) => optimizer,
            Err(e) => {
                warn!("[OPTIMIZER] Starting fresh, could not load state: {}", e);
                Self::new(cfg, persistence)
            }
        }
    }

    /// Save if a flush trigger has fired; log-and-swallow any I/O error
    /// so a failed save never blocks a live decision
    pub fn flush_if_due(&self, path: &str) {
        let due = self.flush.lock().unwrap().is_due();
        if due {
            if let Err(e) = self.save(path) {
                warn!("[OPTIMIZER] Flush to {} failed: {}", path, e);
            }
        }
    }
}

/// The standard tunable catalog. Fractions are stored as fractions
/// (position size 0.05-0.30), percents as percents (price gap 0.1-2.0).
pub fn default_ranges() -> Vec<ParameterRange> {
    vec![
        ParameterRange::new("split_order_count", 2.0, 10.0, true),
        ParameterRange::new("price_gap_pct", 0.1, 2.0, false),
        ParameterRange::new("time_interval_secs", 10.0, 600.0, true),
        ParameterRange::new("position_size_pct", 0.05, 0.30, false),
        ParameterRange::new("stop_loss_pct", 0.01, 0.10, false),
        ParameterRange::new("take_profit_pct", 0.02, 0.20, false),
        ParameterRange::new("momentum_threshold", 0.005, 0.05, false),
        ParameterRange::new("volume_threshold", 1.0, 5.0, false),
        ParameterRange::new("confidence_threshold", 0.5, 0.9, false),
    ]
}
