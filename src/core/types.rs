//! Shared type definitions for the execution decision engine
//!
//! These types form the boundary with the surrounding bot: market
//! snapshots flow in from the data collaborator, trade results flow back
//! from position tracking, and tuned parameter values flow out to the
//! order placement layer.

use serde::{Deserialize, Serialize};

/// A tuned parameter value, tagged by numeric kind.
///
/// Integer parameters (split counts, interval seconds) stay integers all
/// the way through proposal, clipping and rounding; float parameters
/// (percentages, thresholds) stay floats. Downstream code never has to
/// guess which one it received.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Integer(i64),
    Float(f64),
}

impl ParamValue {
    /// Numeric view used for distance/score computations
    pub fn as_f64(&self) -> f64 {
        match self {
            ParamValue::Integer(v) => *v as f64,
            ParamValue::Float(v) => *v,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, ParamValue::Integer(_))
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Integer(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{:.4}", v),
        }
    }
}

fn default_volatility() -> f64 {
    0.02
}

fn default_volume_ratio() -> f64 {
    1.0
}

fn default_volatility_index() -> f64 {
    20.0
}

/// Market feature snapshot supplied by the market-data collaborator.
///
/// Missing fields deserialize to neutral values so a sparse upstream
/// payload never fails a decision. Changes and volatility are fractions
/// (0.02 = 2%); index changes are percentage points as reported by the
/// index feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Daily volatility of the instrument as a fraction
    #[serde(default = "default_volatility")]
    pub volatility: f64,
    /// Average traded volume (shares/contracts)
    #[serde(default)]
    pub avg_volume: u64,
    /// Current volume relative to average (1.0 = average)
    #[serde(default = "default_volume_ratio")]
    pub volume_ratio: f64,
    /// Instrument price change as a fraction (trend proxy)
    #[serde(default)]
    pub price_change_pct: f64,
    /// KOSPI index change in percentage points
    #[serde(default)]
    pub kospi_change_pct: f64,
    /// KOSDAQ index change in percentage points
    #[serde(default)]
    pub kosdaq_change_pct: f64,
    /// Market volatility index level
    #[serde(default = "default_volatility_index")]
    pub volatility_index: f64,
}

impl Default for MarketSnapshot {
    fn default() -> Self {
        Self {
            volatility: default_volatility(),
            avg_volume: 0,
            volume_ratio: default_volume_ratio(),
            price_change_pct: 0.0,
            kospi_change_pct: 0.0,
            kosdaq_change_pct: 0.0,
            volatility_index: default_volatility_index(),
        }
    }
}

impl MarketSnapshot {
    /// Classify current volume relative to its average
    pub fn volume_profile(&self) -> VolumeProfile {
        VolumeProfile::from_ratio(self.volume_ratio)
    }
}

/// Volume anomaly classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeProfile {
    /// More than 2x average volume
    Surging,
    /// More than 1.3x average volume
    High,
    /// Less than 0.7x average volume
    Low,
    Normal,
}

impl VolumeProfile {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > 2.0 {
            VolumeProfile::Surging
        } else if ratio > 1.3 {
            VolumeProfile::High
        } else if ratio < 0.7 {
            VolumeProfile::Low
        } else {
            VolumeProfile::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeProfile::Surging => "SURGING",
            VolumeProfile::High => "HIGH",
            VolumeProfile::Low => "LOW",
            VolumeProfile::Normal => "NORMAL",
        }
    }
}

/// Overall market condition derived from index moves and the volatility
/// index. Volatile takes priority over directional labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketCondition {
    Volatile,
    Bullish,
    Bearish,
    Neutral,
}

impl MarketCondition {
    /// Classify from a snapshot.
    ///
    /// Volatile: either index moved more than 2.0 percentage points in
    /// either direction, or the volatility index is above 25. Otherwise
    /// bullish/bearish when the mean index change crosses +/-1.5, else
    /// neutral.
    pub fn classify(snapshot: &MarketSnapshot) -> Self {
        let max_move = snapshot
            .kospi_change_pct
            .abs()
            .max(snapshot.kosdaq_change_pct.abs());
        if max_move > 2.0 || snapshot.volatility_index > 25.0 {
            return MarketCondition::Volatile;
        }

        let mean_change = (snapshot.kospi_change_pct + snapshot.kosdaq_change_pct) / 2.0;
        if mean_change >= 1.5 {
            MarketCondition::Bullish
        } else if mean_change <= -1.5 {
            MarketCondition::Bearish
        } else {
            MarketCondition::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCondition::Volatile => "VOLATILE",
            MarketCondition::Bullish => "BULLISH",
            MarketCondition::Bearish => "BEARISH",
            MarketCondition::Neutral => "NEUTRAL",
        }
    }
}

impl std::fmt::Display for MarketCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order side. Buy plans ladder below market; sell plans ladder above
/// the entry price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

fn default_win_rate() -> f64 {
    0.5
}

/// Rolling performance stats for a parameter, reported by the
/// backtest/virtual-trading collaborator. Missing fields default to
/// neutral values rather than failing the optimization call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentPerformance {
    #[serde(default = "default_win_rate")]
    pub win_rate: f64,
    /// Average profit per trade as a fraction
    #[serde(default)]
    pub avg_profit: f64,
    /// Worst peak-to-trough move as a (negative) fraction
    #[serde(default)]
    pub max_drawdown: f64,
    #[serde(default)]
    pub sharpe: f64,
    #[serde(default)]
    pub trade_count: u32,
}

impl Default for RecentPerformance {
    fn default() -> Self {
        Self {
            win_rate: default_win_rate(),
            avg_profit: 0.0,
            max_drawdown: 0.0,
            sharpe: 0.0,
            trade_count: 0,
        }
    }
}

/// Outcome of a closed trade, reported once by the position-tracking
/// collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    /// Realized profit as a fraction (0.03 = +3%)
    pub profit_pct: f64,
    /// Holding duration in hours
    pub duration_hours: f64,
    /// Maximum drawdown during the trade as a (negative) fraction
    #[serde(default)]
    pub max_drawdown: f64,
    /// Whether the trade was closed by a stop-loss
    #[serde(default)]
    pub is_stopped: bool,
    /// Market features at exit, when available
    #[serde(default)]
    pub exit_state: Option<MarketSnapshot>,
}
