//! Execution plan decisions
//!
//! Fuses the parameter optimizer and the learning engine into a concrete
//! split-order plan: how many child orders, at which price offsets, how
//! far apart in time, with what quantities and confidence. Entry plans
//! ladder below the market; exit plans ladder profit targets above the
//! entry price.
//!
//! The emergency exit path is deliberately self-contained: when the loss
//! threshold is breached, the plan is built before any collaborator is
//! consulted, so a faulted optimizer or learner can never block loss
//! containment.

use anyhow::Result;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::learning::LearningEngine;
use crate::core::optimizer::{ParameterOptimizer, SplitOrderParams};
use crate::core::types::{MarketCondition, MarketSnapshot, Side, VolumeProfile};
use crate::execution::distribution::{distribute, Distribution};

/// Loss fraction below which the emergency exit short-circuits
const EMERGENCY_LOSS_THRESHOLD: f64 = -0.03;

/// Confidence reported on emergency exits
const EMERGENCY_CONFIDENCE: f64 = 0.95;

/// Volatility above which iceberg execution takes precedence
const ICEBERG_VOLATILITY: f64 = 0.03;

/// Parameters whose history depth feeds decision confidence
const CONFIDENCE_PARAMS: [&str; 3] =
    ["split_order_count", "price_gap_pct", "time_interval_secs"];

/// Execution strategy archetype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Hide size: even slices, wide spacing
    Iceberg,
    /// Take liquidity now while volume surges
    Immediate,
    /// Ladder into a rising market below the price
    GradualDown,
    /// Leave quickly on a modest profit
    QuickExit,
    /// Default paced participation
    Vwap,
    /// Scale out of a large profit in steps
    GradualProfit,
    /// Unwind with no urgency
    NormalExit,
    /// Dump everything immediately, loss containment
    EmergencyExit,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Iceberg => "ICEBERG",
            Strategy::Immediate => "IMMEDIATE",
            Strategy::GradualDown => "GRADUAL_DOWN",
            Strategy::QuickExit => "QUICK_EXIT",
            Strategy::Vwap => "VWAP",
            Strategy::GradualProfit => "GRADUAL_PROFIT",
            Strategy::NormalExit => "NORMAL_EXIT",
            Strategy::EmergencyExit => "EMERGENCY_EXIT",
        }
    }

    /// Quantity distribution policy for this archetype. Exit plans pick
    /// by realized profit instead (front-loaded in profit, else even).
    fn distribution(&self) -> Distribution {
        match self {
            Strategy::Immediate | Strategy::QuickExit => Distribution::FrontLoaded,
            Strategy::GradualDown => Distribution::Pyramid,
            _ => Distribution::Even,
        }
    }

    /// Fixed profit-target ladder for exit archetypes, in percent
    fn profit_ladder(&self) -> &'static [f64] {
        match self {
            Strategy::GradualProfit => &[2.0, 4.0, 7.0, 10.0],
            Strategy::QuickExit => &[1.0, 2.5],
            _ => &[1.5, 3.0],
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One child order of an execution plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitOrder {
    pub index: u32,
    pub quantity: u64,
    /// Signed offset from the reference price, in percent. Negative for
    /// buys (below market), positive for sells (above entry).
    pub price_offset_pct: f64,
    pub limit_price: Decimal,
    /// Delay from plan start; the first split is always immediate
    pub delay_secs: u64,
}

/// A fully-specified execution plan, the engine's sole output.
/// Recreated fresh on every decision; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitOrderDecision {
    pub symbol: String,
    pub side: Side,
    pub strategy: Strategy,
    pub splits: Vec<SplitOrder>,
    /// Decision confidence in [0, 1]
    pub confidence: f64,
    /// Advisory text describing what triggered the plan shape
    pub rationale: String,
}

impl SplitOrderDecision {
    pub fn split_count(&self) -> usize {
        self.splits.len()
    }

    pub fn total_quantity(&self) -> u64 {
        self.splits.iter().map(|s| s.quantity).sum()
    }
}

/// Tuned-parameter provider, implemented by [`ParameterOptimizer`].
///
/// Errors degrade the decision to heuristic defaults; they never fail
/// the call.
pub trait TuningSource: Send + Sync {
    fn split_order_params(
        &self,
        symbol: &str,
        order_amount: Decimal,
        volatility: f64,
        liquidity: f64,
        condition: MarketCondition,
    ) -> Result<SplitOrderParams>;

    fn decision_confidence(&self, parameters: &[&str]) -> Result<f64>;
}

impl TuningSource for ParameterOptimizer {
    fn split_order_params(
        &self,
        symbol: &str,
        order_amount: Decimal,
        volatility: f64,
        liquidity: f64,
        condition: MarketCondition,
    ) -> Result<SplitOrderParams> {
        Ok(self.get_optimal_split_order_params(symbol, order_amount, volatility, liquidity, condition))
    }

    fn decision_confidence(&self, parameters: &[&str]) -> Result<f64> {
        Ok(self.estimate_confidence(parameters))
    }
}

/// Learned-outcome provider, implemented by [`LearningEngine`]
pub trait InsightSource: Send + Sync {
    fn recent_win_rate(&self) -> Result<f64>;
}

impl InsightSource for LearningEngine {
    fn recent_win_rate(&self) -> Result<f64> {
        Ok(LearningEngine::recent_win_rate(self))
    }
}

/// Decides how to execute a trading intent.
///
/// One instance per process, collaborators injected at construction;
/// both are consulted through fallible seams so the decider keeps
/// producing plans when either is unavailable.
pub struct ExecutionDecider {
    optimizer: Arc<dyn TuningSource>,
    learner: Arc<dyn InsightSource>,
}

impl ExecutionDecider {
    pub fn new(optimizer: Arc<dyn TuningSource>, learner: Arc<dyn InsightSource>) -> Self {
        Self { optimizer, learner }
    }

    /// Build an entry (buy) plan for the given quantity at the current
    /// market.
    pub fn decide_entry_plan(
        &self,
        symbol: &str,
        total_quantity: u64,
        current_price: Decimal,
        market: &MarketSnapshot,
        ai_confidence: Option<f64>,
    ) -> SplitOrderDecision {
        let condition = MarketCondition::classify(market);
        let profile = market.volume_profile();
        let strategy = Self::entry_strategy(market, condition, profile);

        let notional = current_price * Decimal::from(total_quantity);
        let params = self.tuned_params(symbol, notional, market, condition);

        let splits = self.build_splits(
            Side::Buy,
            total_quantity,
            current_price,
            market,
            condition,
            profile,
            strategy,
            &params,
        );

        let confidence = self.fuse_confidence(ai_confidence);
        let rationale = Self::rationale(condition, market, profile, strategy, None);

        debug!(
            "[EXECUTION] {} entry: {} x{} splits, confidence {:.2} ({})",
            symbol,
            strategy,
            splits.len(),
            confidence,
            condition
        );

        SplitOrderDecision {
            symbol: symbol.to_string(),
            side: Side::Buy,
            strategy,
            splits,
            confidence,
            rationale,
        }
    }

    /// Build an exit (sell) plan for an open position.
    ///
    /// Losses beyond the emergency threshold short-circuit into a
    /// single immediate full-quantity order before any collaborator is
    /// consulted.
    pub fn decide_exit_plan(
        &self,
        symbol: &str,
        total_quantity: u64,
        current_price: Decimal,
        entry_price: Decimal,
        market: &MarketSnapshot,
        holding_hours: f64,
    ) -> SplitOrderDecision {
        let profit_pct = if entry_price.is_zero() {
            0.0
        } else {
            ((current_price - entry_price) / entry_price)
                .to_f64()
                .unwrap_or(0.0)
        };

        if profit_pct < EMERGENCY_LOSS_THRESHOLD {
            return Self::emergency_exit(symbol, total_quantity, current_price, profit_pct);
        }

        let condition = MarketCondition::classify(market);
        let profile = market.volume_profile();
        let strategy = if profit_pct >= 0.05 {
            Strategy::GradualProfit
        } else if profit_pct >= 0.02 {
            Strategy::QuickExit
        } else {
            Strategy::NormalExit
        };

        let notional = current_price * Decimal::from(total_quantity);
        let params = self.tuned_params(symbol, notional, market, condition);

        let n = params.split_count.max(1);
        let ladder = strategy.profit_ladder();
        let vol_scale = 1.0 + market.volatility * 5.0;
        let offsets: Vec<f64> = (0..n as usize)
            .map(|i| {
                let base = if i < ladder.len() {
                    ladder[i]
                } else {
                    // Extend geometrically past the declared ladder
                    ladder[ladder.len() - 1] * 1.3f64.powi((i - ladder.len() + 1) as i32)
                };
                base * vol_scale
            })
            .collect();

        let delays = Self::build_delays(n, params.time_interval_secs, profile, condition);

        let distribution = if profit_pct > 0.0 {
            Distribution::FrontLoaded
        } else {
            Distribution::Even
        };
        let quantities = distribute(total_quantity, n, distribution);

        let splits = offsets
            .iter()
            .zip(delays.iter())
            .zip(quantities.iter())
            .enumerate()
            .map(|(i, ((offset, delay), quantity))| SplitOrder {
                index: i as u32,
                quantity: *quantity,
                price_offset_pct: *offset,
                limit_price: apply_offset(entry_price, *offset),
                delay_secs: *delay,
            })
            .collect();

        let confidence = self.fuse_confidence(None);
        let rationale =
            Self::rationale(condition, market, profile, strategy, Some((profit_pct, holding_hours)));

        debug!(
            "[EXECUTION] {} exit: {} at {:+.1}% after {:.1}h, {} splits",
            symbol,
            strategy,
            profit_pct * 100.0,
            holding_hours,
            n
        );

        SplitOrderDecision {
            symbol: symbol.to_string(),
            side: Side::Sell,
            strategy,
            splits,
            confidence,
            rationale,
        }
    }

    /// Single immediate full-quantity sell; depends on nothing but the
    /// inputs
    fn emergency_exit(
        symbol: &str,
        total_quantity: u64,
        current_price: Decimal,
        profit_pct: f64,
    ) -> SplitOrderDecision {
        warn!(
            "[EXECUTION] {} emergency exit at {:+.1}%: full quantity, immediate",
            symbol,
            profit_pct * 100.0
        );
        SplitOrderDecision {
            symbol: symbol.to_string(),
            side: Side::Sell,
            strategy: Strategy::EmergencyExit,
            splits: vec![SplitOrder {
                index: 0,
                quantity: total_quantity,
                price_offset_pct: 0.0,
                limit_price: current_price,
                delay_secs: 0,
            }],
            confidence: EMERGENCY_CONFIDENCE,
            rationale: format!(
                "loss {:.1}% breached emergency threshold {:.0}%; liquidating immediately",
                profit_pct * 100.0,
                EMERGENCY_LOSS_THRESHOLD * 100.0
            ),
        }
    }

    /// Entry archetype precedence: extreme volatility first, then a
    /// volume surge, then market direction, else paced default
    fn entry_strategy(
        market: &MarketSnapshot,
        condition: MarketCondition,
        profile: VolumeProfile,
    ) -> Strategy {
        if market.volatility > ICEBERG_VOLATILITY {
            Strategy::Iceberg
        } else if profile == VolumeProfile::Surging {
            Strategy::Immediate
        } else if condition == MarketCondition::Bullish {
            Strategy::GradualDown
        } else {
            Strategy::Vwap
        }
    }

    /// Tuned knobs from the optimizer, or heuristic defaults when it is
    /// unavailable
    fn tuned_params(
        &self,
        symbol: &str,
        notional: Decimal,
        market: &MarketSnapshot,
        condition: MarketCondition,
    ) -> SplitOrderParams {
        self.optimizer
            .split_order_params(
                symbol,
                notional,
                market.volatility,
                market.volume_ratio,
                condition,
            )
            .unwrap_or_else(|e| {
                warn!("[EXECUTION] Optimizer unavailable, using defaults: {}", e);
                SplitOrderParams {
                    split_count: 3,
                    price_gap_pct: 0.5,
                    time_interval_secs: 60,
                }
            })
    }

    /// Per-split price offsets and quantities for an entry plan
    #[allow(clippy::too_many_arguments)]
    fn build_splits(
        &self,
        side: Side,
        total_quantity: u64,
        reference_price: Decimal,
        market: &MarketSnapshot,
        condition: MarketCondition,
        profile: VolumeProfile,
        strategy: Strategy,
        params: &SplitOrderParams,
    ) -> Vec<SplitOrder> {
        let n = params.split_count.max(1);
        let trend = market.price_change_pct;

        // Gap scaled by volatility, tilted by trend: uptrends narrow
        // buy ladders and widen sell ladders
        let vol_scaled = params.price_gap_pct * (1.0 + market.volatility * 10.0);
        let trend_factor = match side {
            Side::Buy => 1.0 - trend * 0.5,
            Side::Sell => 1.0 + trend * 0.5,
        };

        let delays = Self::build_delays(n, params.time_interval_secs, profile, condition);
        let quantities = distribute(total_quantity, n, strategy.distribution());

        (0..n as usize)
            .map(|i| {
                let gap = vol_scaled * trend_factor * (1.0 + 0.2 * i as f64);
                let offset = match side {
                    Side::Buy => -gap,
                    Side::Sell => gap,
                };
                SplitOrder {
                    index: i as u32,
                    quantity: quantities[i],
                    price_offset_pct: offset,
                    limit_price: apply_offset(reference_price, offset),
                    delay_secs: delays[i],
                }
            })
            .collect()
    }

    /// Pacing schedule: first split fires immediately, later splits
    /// stretch with the split index; surging volume halves the spacing,
    /// thin volume stretches it, volatile markets compress it
    fn build_delays(
        n: u32,
        base_interval_secs: u64,
        profile: VolumeProfile,
        condition: MarketCondition,
    ) -> Vec<u64> {
        let volume_multiplier = match profile {
            VolumeProfile::Surging => 0.5,
            VolumeProfile::Low => 1.5,
            _ => 1.0,
        };
        let market_multiplier = if condition == MarketCondition::Volatile {
            0.7
        } else {
            1.0
        };

        (0..n as usize)
            .map(|i| {
                if i == 0 {
                    0
                } else {
                    let delay = base_interval_secs as f64
                        * volume_multiplier
                        * market_multiplier
                        * (1.0 + 0.1 * i as f64);
                    delay.round() as u64
                }
            })
            .collect()
    }

    /// Optimizer confidence, averaged with external AI confidence when
    /// present, nudged by the learner's recent win rate
    fn fuse_confidence(&self, ai_confidence: Option<f64>) -> f64 {
        let mut confidence = self
            .optimizer
            .decision_confidence(&CONFIDENCE_PARAMS)
            .unwrap_or(0.5);

        if let Some(ai) = ai_confidence {
            confidence = (confidence + ai.clamp(0.0, 1.0)) / 2.0;
        }

        match self.learner.recent_win_rate() {
            Ok(win_rate) if win_rate > 0.6 => confidence = (confidence * 1.1).min(0.95),
            Ok(win_rate) if win_rate < 0.4 => confidence = (confidence * 0.9).max(0.5),
            Ok(_) => {}
            Err(e) => warn!("[EXECUTION] Learner unavailable, confidence unadjusted: {}", e),
        }

        confidence
    }

    /// Assemble the advisory rationale from the triggered condition
    /// labels. Not consumed by any downstream logic.
    fn rationale(
        condition: MarketCondition,
        market: &MarketSnapshot,
        profile: VolumeProfile,
        strategy: Strategy,
        exit_context: Option<(f64, f64)>,
    ) -> String {
        let mut parts = vec![format!("market {}", condition.as_str().to_lowercase())];

        if market.volatility > ICEBERG_VOLATILITY {
            parts.push(format!(
                "volatility {:.1}% extreme",
                market.volatility * 100.0
            ));
        }
        if profile != VolumeProfile::Normal {
            parts.push(format!("volume {}", profile.as_str().to_lowercase()));
        }
        if let Some((profit_pct, holding_hours)) = exit_context {
            parts.push(format!(
                "position {:+.1}% after {:.1}h",
                profit_pct * 100.0,
                holding_hours
            ));
        }
        parts.push(format!("strategy {}", strategy.as_str().to_lowercase()));

        parts.join("; ")
    }
}

/// Reference price shifted by a signed percent offset
fn apply_offset(reference: Decimal, offset_pct: f64) -> Decimal {
    let factor = Decimal::from_f64(1.0 + offset_pct / 100.0).unwrap_or(Decimal::ONE);
    (reference * factor).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use anyhow::anyhow;
    use rust_decimal_macros::dec;

    /// Stub collaborators that fail every call, for fault-path tests
    struct FailingTuner;

    impl TuningSource for FailingTuner {
        fn split_order_params(
            &self,
            _symbol: &str,
            _order_amount: Decimal,
            _volatility: f64,
            _liquidity: f64,
            _condition: MarketCondition,
        ) -> Result<SplitOrderParams> {
            Err(anyhow!("optimizer offline"))
        }

        fn decision_confidence(&self, _parameters: &[&str]) -> Result<f64> {
            Err(anyhow!("optimizer offline"))
        }
    }

    struct FailingInsight;

    impl InsightSource for FailingInsight {
        fn recent_win_rate(&self) -> Result<f64> {
            Err(anyhow!("learner offline"))
        }
    }

    /// Stub learner reporting a fixed win rate
    struct FixedWinRate(f64);

    impl InsightSource for FixedWinRate {
        fn recent_win_rate(&self) -> Result<f64> {
            Ok(self.0)
        }
    }

    fn real_decider() -> ExecutionDecider {
        let cfg = EngineConfig::default();
        let optimizer = Arc::new(ParameterOptimizer::new(
            cfg.optimizer.clone(),
            &cfg.persistence,
        ));
        let learner = Arc::new(LearningEngine::new(cfg.learning, &cfg.persistence));
        ExecutionDecider::new(optimizer, learner)
    }

    fn broken_decider() -> ExecutionDecider {
        ExecutionDecider::new(Arc::new(FailingTuner), Arc::new(FailingInsight))
    }

    fn calm_market() -> MarketSnapshot {
        MarketSnapshot {
            volatility: 0.012,
            volume_ratio: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_emergency_short_circuit_with_broken_collaborators() {
        let decider = broken_decider();
        // -5% loss: below the -3% threshold
        let decision = decider.decide_exit_plan(
            "005930",
            1000,
            dec!(95),
            dec!(100),
            &calm_market(),
            12.0,
        );

        assert_eq!(decision.strategy, Strategy::EmergencyExit);
        assert_eq!(decision.split_count(), 1);
        assert_eq!(decision.splits[0].delay_secs, 0);
        assert_eq!(decision.total_quantity(), 1000);
        assert_eq!(decision.confidence, 0.95);
        assert_eq!(decision.side, Side::Sell);
    }

    #[test]
    fn test_emergency_threshold_boundary() {
        let decider = real_decider();
        // -2%: not an emergency
        let decision =
            decider.decide_exit_plan("005930", 100, dec!(98), dec!(100), &calm_market(), 5.0);
        assert_eq!(decision.strategy, Strategy::NormalExit);

        // -4%: emergency
        let decision =
            decider.decide_exit_plan("005930", 100, dec!(96), dec!(100), &calm_market(), 5.0);
        assert_eq!(decision.strategy, Strategy::EmergencyExit);
    }

    #[test]
    fn test_non_emergency_exit_survives_broken_collaborators() {
        let decider = broken_decider();
        let decision =
            decider.decide_exit_plan("005930", 999, dec!(101), dec!(100), &calm_market(), 8.0);

        // Falls back to heuristic defaults, never fails
        assert_eq!(decision.strategy, Strategy::NormalExit);
        assert_eq!(decision.split_count(), 3);
        assert_eq!(decision.total_quantity(), 999);
        assert!(decision.confidence >= 0.0 && decision.confidence <= 1.0);
    }

    #[test]
    fn test_entry_iceberg_on_extreme_volatility() {
        let decider = real_decider();
        // Volatility above 0.03 selects iceberg regardless of condition
        for (kospi, kosdaq) in [(0.0, 0.0), (2.5, 2.5), (-2.5, -2.5), (1.8, 1.8)] {
            let market = MarketSnapshot {
                volatility: 0.035,
                kospi_change_pct: kospi,
                kosdaq_change_pct: kosdaq,
                volume_ratio: 2.5, // even a surge does not override
                ..Default::default()
            };
            let decision =
                decider.decide_entry_plan("005930", 1000, dec!(70000), &market, None);
            assert_eq!(decision.strategy, Strategy::Iceberg);
        }
    }

    #[test]
    fn test_entry_strategy_precedence() {
        let decider = real_decider();

        let surging = MarketSnapshot {
            volatility: 0.01,
            volume_ratio: 2.5,
            ..Default::default()
        };
        let decision = decider.decide_entry_plan("005930", 100, dec!(70000), &surging, None);
        assert_eq!(decision.strategy, Strategy::Immediate);

        let bullish = MarketSnapshot {
            volatility: 0.01,
            volume_ratio: 1.0,
            kospi_change_pct: 1.8,
            kosdaq_change_pct: 1.6,
            ..Default::default()
        };
        let decision = decider.decide_entry_plan("005930", 100, dec!(70000), &bullish, None);
        assert_eq!(decision.strategy, Strategy::GradualDown);

        let decision =
            decider.decide_entry_plan("005930", 100, dec!(70000), &calm_market(), None);
        assert_eq!(decision.strategy, Strategy::Vwap);
    }

    #[test]
    fn test_entry_quantities_conserved() {
        let decider = real_decider();
        for total in [1u64, 10, 997, 12_345] {
            let decision =
                decider.decide_entry_plan("005930", total, dec!(70000), &calm_market(), None);
            assert_eq!(decision.total_quantity(), total);
        }
    }

    #[test]
    fn test_entry_offsets_negative_and_widening() {
        let decider = real_decider();
        let decision =
            decider.decide_entry_plan("005930", 1000, dec!(70000), &calm_market(), None);

        for split in &decision.splits {
            assert!(split.price_offset_pct < 0.0);
            assert!(split.limit_price < dec!(70000));
        }
        for pair in decision.splits.windows(2) {
            assert!(pair[1].price_offset_pct < pair[0].price_offset_pct);
        }
    }

    #[test]
    fn test_entry_delays_start_at_zero_and_stretch() {
        let decider = real_decider();
        let decision =
            decider.decide_entry_plan("005930", 1000, dec!(70000), &calm_market(), None);

        assert_eq!(decision.splits[0].delay_secs, 0);
        for pair in decision.splits.windows(2) {
            assert!(pair[1].delay_secs >= pair[0].delay_secs);
        }
        if decision.split_count() > 1 {
            assert!(decision.splits[1].delay_secs > 0);
        }
    }

    #[test]
    fn test_surging_volume_halves_pacing() {
        let decider = real_decider();
        let surging = MarketSnapshot {
            volatility: 0.035, // iceberg either way, isolate volume effect
            volume_ratio: 2.5,
            ..Default::default()
        };
        let spiky = MarketSnapshot {
            volatility: 0.035,
            volume_ratio: 1.0,
            ..Default::default()
        };
        let fast = decider.decide_entry_plan("005930", 100, dec!(70000), &surging, None);
        let slow = decider.decide_entry_plan("005930", 100, dec!(70000), &spiky, None);
        assert!(fast.splits[1].delay_secs < slow.splits[1].delay_secs);
    }

    #[test]
    fn test_exit_profit_ladder() {
        let decider = real_decider();
        // +6% profit selects the gradual profit ladder
        let market = calm_market();
        let decision =
            decider.decide_exit_plan("005930", 1000, dec!(106), dec!(100), &market, 20.0);
        assert_eq!(decision.strategy, Strategy::GradualProfit);

        let vol_scale = 1.0 + market.volatility * 5.0;
        assert!((decision.splits[0].price_offset_pct - 2.0 * vol_scale).abs() < 1e-9);

        for split in &decision.splits {
            assert!(split.price_offset_pct > 0.0);
            assert!(split.limit_price > dec!(100));
        }
        assert_eq!(decision.total_quantity(), 1000);

        // In profit: front-loaded, first split carries the most
        assert!(decision.splits[0].quantity >= decision.splits[1].quantity);
    }

    #[test]
    fn test_exit_quick_band() {
        let decider = real_decider();
        let decision =
            decider.decide_exit_plan("005930", 500, dec!(103), dec!(100), &calm_market(), 6.0);
        assert_eq!(decision.strategy, Strategy::QuickExit);
        assert_eq!(decision.total_quantity(), 500);
    }

    #[test]
    fn test_exit_ladder_extends_geometrically() {
        let cfg = EngineConfig::default();
        let mut opt_cfg = cfg.optimizer.clone();
        opt_cfg.exploration_rate = 0.0;
        opt_cfg.perturbation_fraction = 0.0;
        let optimizer = Arc::new(ParameterOptimizer::new(opt_cfg, &cfg.persistence));

        // Teach a 6-way split so the 4-rung ladder must extend
        for _ in 0..3 {
            optimizer.optimize_parameter(
                "split_order_count",
                6.0,
                &crate::core::types::RecentPerformance {
                    win_rate: 0.9,
                    avg_profit: 0.03,
                    max_drawdown: 0.0,
                    sharpe: 1.0,
                    trade_count: 80,
                },
                MarketCondition::Neutral,
            );
        }
        let learner = Arc::new(LearningEngine::new(cfg.learning, &cfg.persistence));
        let decider = ExecutionDecider::new(optimizer, learner);

        let market = calm_market();
        let decision =
            decider.decide_exit_plan("005930", 600, dec!(108), dec!(100), &market, 30.0);
        assert_eq!(decision.split_count(), 6);

        let vol_scale = 1.0 + market.volatility * 5.0;
        // Rung 5 and 6 extend from the last declared rung by x1.3 steps
        assert!((decision.splits[4].price_offset_pct - 10.0 * 1.3 * vol_scale).abs() < 1e-9);
        assert!(
            (decision.splits[5].price_offset_pct - 10.0 * 1.3 * 1.3 * vol_scale).abs() < 1e-9
        );
    }

    #[test]
    fn test_confidence_win_rate_nudges() {
        let cfg = EngineConfig::default();
        let optimizer = Arc::new(ParameterOptimizer::new(
            cfg.optimizer.clone(),
            &cfg.persistence,
        ));

        let hot = ExecutionDecider::new(optimizer.clone(), Arc::new(FixedWinRate(0.8)));
        let cold = ExecutionDecider::new(optimizer.clone(), Arc::new(FixedWinRate(0.2)));
        let flat = ExecutionDecider::new(optimizer, Arc::new(FixedWinRate(0.5)));

        let market = calm_market();
        let base = flat
            .decide_entry_plan("005930", 100, dec!(70000), &market, None)
            .confidence;
        let boosted = hot
            .decide_entry_plan("005930", 100, dec!(70000), &market, None)
            .confidence;
        let damped = cold
            .decide_entry_plan("005930", 100, dec!(70000), &market, None)
            .confidence;

        assert!(boosted > base);
        assert!(boosted <= 0.95);
        // Fresh optimizer: base 0.5, damped floors right back at 0.5
        assert!(damped >= 0.5);
        assert!(damped <= base);
    }

    #[test]
    fn test_ai_confidence_averaged() {
        let decider = real_decider();
        let market = calm_market();
        let without = decider
            .decide_entry_plan("005930", 100, dec!(70000), &market, None)
            .confidence;
        let with_high = decider
            .decide_entry_plan("005930", 100, dec!(70000), &market, Some(0.9))
            .confidence;
        assert!(with_high > without);
    }

    #[test]
    fn test_rationale_mentions_triggers() {
        let decider = real_decider();
        let market = MarketSnapshot {
            volatility: 0.04,
            volume_ratio: 2.5,
            kospi_change_pct: 2.6,
            ..Default::default()
        };
        let decision = decider.decide_entry_plan("005930", 100, dec!(70000), &market, None);

        assert!(decision.rationale.contains("volatile"));
        assert!(decision.rationale.contains("extreme"));
        assert!(decision.rationale.contains("surging"));
        assert!(decision.rationale.contains("iceberg"));
    }

    #[test]
    fn test_zero_entry_price_is_not_emergency() {
        let decider = real_decider();
        let decision =
            decider.decide_exit_plan("005930", 100, dec!(100), dec!(0), &calm_market(), 1.0);
        // Degenerate entry price: treated as flat, normal exit
        assert_eq!(decision.strategy, Strategy::NormalExit);
        assert_eq!(decision.total_quantity(), 100);
    }
}
