//! Self-learning engine for trade execution
//!
//! Tabular Q-learning over discretized market states and action buckets.
//! Every closed trade becomes an experience: its outcome is shaped into a
//! bounded reward, the (state, action) cell is updated with a
//! temporal-difference step, and recurring win/loss patterns are mined
//! from the entry features. A bounded replay buffer decouples additional
//! learning passes from trade cadence.
//!
//! Reward shaping policy:
//! - fast profits beat slow profits (time bonus decays over one week)
//! - drawdown along the way is penalized at half its magnitude
//! - a stop-loss that fired on a losing trade shrinks the loss by 30%
//!   (disciplined exits are rewarded relative to unmanaged losses)
//! - tanh squashing bounds every reward to (-1, 1)

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{LearningConfig, PersistenceConfig};
use crate::core::types::{MarketSnapshot, TradeResult};
use crate::persist::FlushTracker;

/// Q-table entries below this absolute value are noise for reporting
const MATERIALITY_THRESHOLD: f64 = 0.1;

/// Reward horizon for the fast-profit bonus (one week)
const TIME_BONUS_HORIZON_HOURS: f64 = 168.0;

/// Volatility bucket for state discretization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityLevel {
    High,
    Medium,
    Low,
}

impl VolatilityLevel {
    pub fn from_value(volatility: f64) -> Self {
        if volatility > 0.03 {
            VolatilityLevel::High
        } else if volatility > 0.015 {
            VolatilityLevel::Medium
        } else {
            VolatilityLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VolatilityLevel::High => "high",
            VolatilityLevel::Medium => "medium",
            VolatilityLevel::Low => "low",
        }
    }
}

/// Trend bucket from the instrument price change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Up,
    Down,
    Neutral,
}

impl TrendDirection {
    pub fn from_change(change: f64) -> Self {
        if change > 0.02 {
            TrendDirection::Up
        } else if change < -0.02 {
            TrendDirection::Down
        } else {
            TrendDirection::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Up => "up",
            TrendDirection::Down => "down",
            TrendDirection::Neutral => "neutral",
        }
    }
}

/// Volume bucket relative to average
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeLevel {
    High,
    Normal,
    Low,
}

impl VolumeLevel {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > 1.5 {
            VolumeLevel::High
        } else if ratio > 0.8 {
            VolumeLevel::Normal
        } else {
            VolumeLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeLevel::High => "high",
            VolumeLevel::Normal => "normal",
            VolumeLevel::Low => "low",
        }
    }
}

/// Discretized market state. Deliberately lossy: many snapshots map to
/// one key, keeping the table small enough to learn from sparse trades.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(String);

impl StateKey {
    pub fn from_snapshot(snapshot: &MarketSnapshot) -> Self {
        let vol = VolatilityLevel::from_value(snapshot.volatility);
        let trend = TrendDirection::from_change(snapshot.price_change_pct);
        let volume = VolumeLevel::from_ratio(snapshot.volume_ratio);
        StateKey(format!(
            "vol_{}|trend_{}|volume_{}",
            vol.as_str(),
            trend.as_str(),
            volume.as_str()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Execution parameters actually used for a trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionParams {
    pub split_count: u32,
    /// Position size as a fraction of capital
    pub position_size_pct: f64,
    /// Stop-loss distance as a fraction
    pub stop_loss_pct: f64,
    /// Take-profit distance as a fraction
    pub take_profit_pct: f64,
}

/// Discretized action bucket: position-size level x stop tightness
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionKey(String);

impl ActionKey {
    pub fn from_action(action: &ActionParams) -> Self {
        let size = if action.position_size_pct > 0.2 {
            "large"
        } else if action.position_size_pct > 0.1 {
            "medium"
        } else {
            "small"
        };
        let stop = if action.stop_loss_pct < 0.02 {
            "tight"
        } else if action.stop_loss_pct < 0.05 {
            "normal"
        } else {
            "wide"
        };
        ActionKey(format!("size_{}|stop_{}", size, stop))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One completed trade, retained for replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeExperience {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub entry_state: MarketSnapshot,
    pub action: ActionParams,
    pub reward: f64,
    pub next_state: Option<MarketSnapshot>,
    pub duration_hours: f64,
    pub max_drawdown: f64,
    pub won: bool,
}

/// Running value estimate for one (state, action) cell
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QEntry {
    pub value: f64,
    pub visits: u64,
}

/// Coarse features shared by pattern-matched experiences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternFeatures {
    pub volatility: VolatilityLevel,
    pub trend: TrendDirection,
    pub volume: VolumeLevel,
}

impl PatternFeatures {
    pub fn from_snapshot(snapshot: &MarketSnapshot) -> Self {
        Self {
            volatility: VolatilityLevel::from_value(snapshot.volatility),
            trend: TrendDirection::from_change(snapshot.price_change_pct),
            volume: VolumeLevel::from_ratio(snapshot.volume_ratio),
        }
    }

    /// How many of the three coarse features agree
    pub fn match_count(&self, other: &PatternFeatures) -> u32 {
        let mut count = 0;
        if self.volatility == other.volatility {
            count += 1;
        }
        if self.trend == other.trend {
            count += 1;
        }
        if self.volume == other.volume {
            count += 1;
        }
        count
    }
}

/// A recurring market situation with its running outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub features: PatternFeatures,
    pub avg_reward: f64,
    pub occurrences: u32,
}

impl Pattern {
    fn new(features: PatternFeatures, reward: f64) -> Self {
        Self {
            features,
            avg_reward: reward,
            occurrences: 1,
        }
    }

    fn absorb(&mut self, reward: f64) {
        self.occurrences += 1;
        self.avg_reward += (reward - self.avg_reward) / self.occurrences as f64;
    }
}

/// Aggregate learning counters, recomputed incrementally
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningStats {
    pub experiences: u64,
    pub wins: u64,
    pub losses: u64,
    pub avg_reward: f64,
    pub best_reward: f64,
    pub worst_reward: f64,
    pub batch_episodes: u64,
    pub last_updated: DateTime<Utc>,
}

impl Default for LearningStats {
    fn default() -> Self {
        Self {
            experiences: 0,
            wins: 0,
            losses: 0,
            avg_reward: 0.0,
            best_reward: 0.0,
            worst_reward: 0.0,
            batch_episodes: 0,
            last_updated: Utc::now(),
        }
    }
}

impl LearningStats {
    fn record(&mut self, reward: f64, won: bool) {
        self.experiences += 1;
        if won {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        if self.experiences == 1 {
            self.avg_reward = reward;
            self.best_reward = reward;
            self.worst_reward = reward;
        } else {
            self.avg_reward += (reward - self.avg_reward) / self.experiences as f64;
            self.best_reward = self.best_reward.max(reward);
            self.worst_reward = self.worst_reward.min(reward);
        }
        self.last_updated = Utc::now();
    }
}

/// Read-only aggregate view of what has been learned
#[derive(Debug, Clone, Serialize)]
pub struct LearnedInsights {
    /// Top successful patterns by average reward (at most 5)
    pub top_successful_patterns: Vec<Pattern>,
    /// Worst failure patterns by average reward (at most 5)
    pub top_failure_patterns: Vec<Pattern>,
    /// Fraction of positive rewards in the recent window
    pub recent_win_rate: f64,
    /// Highest-value table cells above the materiality threshold
    pub top_q_entries: Vec<(StateKey, ActionKey, f64)>,
    pub epsilon: f64,
    pub q_table_size: usize,
    /// Replay buffer fill as a fraction of capacity
    pub memory_utilization: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LearnerState {
    stats: LearningStats,
    q_table: HashMap<StateKey, HashMap<ActionKey, QEntry>>,
    successful_patterns: Vec<Pattern>,
    failed_patterns: Vec<Pattern>,
    recent_rewards: VecDeque<f64>,
    epsilon: f64,
    learning_rate: f64,
    #[serde(skip)]
    replay: VecDeque<TradeExperience>,
}

impl LearnerState {
    fn new(cfg: &LearningConfig) -> Self {
        Self {
            stats: LearningStats::default(),
            q_table: HashMap::new(),
            successful_patterns: Vec::new(),
            failed_patterns: Vec::new(),
            recent_rewards: VecDeque::new(),
            epsilon: cfg.epsilon_initial,
            learning_rate: cfg.base_learning_rate,
            replay: VecDeque::new(),
        }
    }

    /// Explicit default-0.0 table lookup
    fn q_value(&self, state: &StateKey, action: &ActionKey) -> f64 {
        self.q_table
            .get(state)
            .and_then(|actions| actions.get(action))
            .map_or(0.0, |entry| entry.value)
    }

    /// Best estimated value over all known actions in a state
    fn max_q(&self, state: &StateKey) -> f64 {
        self.q_table
            .get(state)
            .map(|actions| {
                actions
                    .values()
                    .map(|entry| entry.value)
                    .fold(f64::NEG_INFINITY, f64::max)
            })
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }

    /// One TD step; returns (new value, td_error)
    fn apply_q_update(
        &mut self,
        state: &StateKey,
        action: &ActionKey,
        reward: f64,
        next_state: Option<&StateKey>,
        alpha: f64,
        gamma: f64,
    ) -> (f64, f64) {
        let future = next_state.map_or(0.0, |s| self.max_q(s));
        let current = self.q_value(state, action);
        let td_error = reward + gamma * future - current;
        let updated = current + alpha * td_error;

        let entry = self
            .q_table
            .entry(state.clone())
            .or_default()
            .entry(action.clone())
            .or_default();
        entry.value = updated;
        entry.visits += 1;

        (updated, td_error)
    }
}

/// Q-learning engine over discretized execution states.
///
/// All public methods take `&self`; an interior mutex serializes every
/// update so experiences apply to the table in call order even when
/// several strategy contexts share one instance.
pub struct LearningEngine {
    cfg: LearningConfig,
    state: Mutex<LearnerState>,
    flush: Mutex<FlushTracker>,
}

impl LearningEngine {
    pub fn new(cfg: LearningConfig, persistence: &PersistenceConfig) -> Self {
        let state = LearnerState::new(&cfg);
        Self {
            cfg,
            state: Mutex::new(state),
            flush: Mutex::new(FlushTracker::new(persistence)),
        }
    }

    /// Shape a raw trade outcome into a bounded reward in (-1, 1)
    pub fn shape_reward(result: &TradeResult) -> f64 {
        let mut reward = result.profit_pct;

        if reward > 0.0 {
            // Bonus for fast profits, shrinking linearly to nothing at
            // the one-week horizon
            let time_factor =
                1.0 - (result.duration_hours / TIME_BONUS_HORIZON_HOURS).clamp(0.0, 1.0);
            reward *= 1.0 + 0.5 * time_factor;
        }

        if result.max_drawdown < 0.0 {
            reward -= result.max_drawdown.abs() * 0.5;
        }

        // A stop-loss that fired on a loss kept the loss contained
        if result.is_stopped && reward < 0.0 {
            reward *= 0.7;
        }

        (reward * 5.0).tanh()
    }

    /// Record a closed trade and update the value table.
    ///
    /// Returns the updated Q value for the trade's (state, action) cell.
    pub fn record_trade_experience(
        &self,
        id: &str,
        symbol: &str,
        entry_state: &MarketSnapshot,
        action: &ActionParams,
        result: &TradeResult,
    ) -> f64 {
        let reward = Self::shape_reward(result);
        let state_key = StateKey::from_snapshot(entry_state);
        let action_key = ActionKey::from_action(action);
        let next_key = result.exit_state.as_ref().map(StateKey::from_snapshot);

        let mut state = self.state.lock().unwrap();

        let alpha = Self::adaptive_rate(&state, &self.cfg);
        state.learning_rate = alpha;

        let (learned, td_error) = state.apply_q_update(
            &state_key,
            &action_key,
            reward,
            next_key.as_ref(),
            alpha,
            self.cfg.discount_factor,
        );

        let won = result.profit_pct > 0.0;
        state.stats.record(reward, won);

        state.recent_rewards.push_back(reward);
        while state.recent_rewards.len() > self.cfg.reward_window {
            state.recent_rewards.pop_front();
        }

        // Pattern mining: fold this entry situation into the matching
        // outcome list
        let features = PatternFeatures::from_snapshot(entry_state);
        let cap = self.cfg.pattern_capacity;
        let list = if reward > 0.0 {
            &mut state.successful_patterns
        } else {
            &mut state.failed_patterns
        };
        match list
            .iter()
            .position(|p| p.features.match_count(&features) >= 2)
        {
            Some(i) => list[i].absorb(reward),
            None => {
                list.push(Pattern::new(features, reward));
                if list.len() > cap {
                    list.remove(0);
                }
            }
        }

        state.replay.push_back(TradeExperience {
            id: id.to_string(),
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            entry_state: entry_state.clone(),
            action: action.clone(),
            reward,
            next_state: result.exit_state.clone(),
            duration_hours: result.duration_hours,
            max_drawdown: result.max_drawdown,
            won,
        });
        while state.replay.len() > self.cfg.replay_capacity {
            state.replay.pop_front();
        }

        state.epsilon = (state.epsilon * self.cfg.epsilon_decay).max(self.cfg.epsilon_min);

        debug!(
            "[LEARNING] {} {}: reward {:.3}, td_error {:.3}, Q[{}][{}] -> {:.3}",
            symbol,
            id,
            reward,
            td_error,
            state_key.as_str(),
            action_key.as_str(),
            learned
        );

        drop(state);
        self.flush.lock().unwrap().record_update();

        learned
    }

    /// Epsilon-greedy choice among the supplied candidate actions.
    ///
    /// Returns `None` only for an empty candidate set. With no table
    /// entries for the state yet, the first candidate is returned with
    /// value 0.
    pub fn suggest_action(
        &self,
        current_state: &MarketSnapshot,
        available_actions: &[ActionParams],
    ) -> Option<(ActionParams, f64)> {
        if available_actions.is_empty() {
            return None;
        }

        let state_key = StateKey::from_snapshot(current_state);
        let state = self.state.lock().unwrap();
        let mut rng = rand::thread_rng();

        if rng.gen::<f64>() < state.epsilon {
            let choice = &available_actions[rng.gen_range(0..available_actions.len())];
            let value = state.q_value(&state_key, &ActionKey::from_action(choice));
            return Some((choice.clone(), value));
        }

        let mut best = &available_actions[0];
        let mut best_value = state.q_value(&state_key, &ActionKey::from_action(best));
        for candidate in &available_actions[1..] {
            let value = state.q_value(&state_key, &ActionKey::from_action(candidate));
            if value > best_value {
                best = candidate;
                best_value = value;
            }
        }
        Some((best.clone(), best_value))
    }

    /// Current self-tuned learning rate.
    ///
    /// Below 10 recorded rewards this is the configured base rate.
    /// Afterwards the recent half of the reward window is compared
    /// against the preceding half: improvement consolidates (-5%),
    /// stagnation or decline speeds learning up (+10%, capped).
    pub fn get_adaptive_learning_rate(&self) -> f64 {
        let state = self.state.lock().unwrap();
        Self::adaptive_rate(&state, &self.cfg)
    }

    fn adaptive_rate(state: &LearnerState, cfg: &LearningConfig) -> f64 {
        let rewards = &state.recent_rewards;
        if rewards.len() < 10 {
            return cfg.base_learning_rate;
        }

        let window: Vec<f64> = rewards
            .iter()
            .rev()
            .take(40)
            .copied()
            .collect();
        let mid = window.len() / 2;
        // window is newest-first: the first half is the recent one
        let recent = mean(&window[..mid]);
        let previous = mean(&window[mid..]);

        if recent > previous {
            state.learning_rate * 0.95
        } else {
            (state.learning_rate * 1.10).min(cfg.max_learning_rate)
        }
    }

    /// Replay a uniform sample of stored experiences through the
    /// Q-update, without replacement. Returns the mean absolute
    /// TD-error of the batch (0 when the buffer is empty).
    pub fn batch_learn_from_memory(&self, batch_size: usize) -> f64 {
        let mut state = self.state.lock().unwrap();
        if state.replay.is_empty() || batch_size == 0 {
            return 0.0;
        }

        let mut rng = rand::thread_rng();
        let indices: Vec<usize> = (0..state.replay.len()).collect();
        let sampled: Vec<usize> = indices
            .choose_multiple(&mut rng, batch_size.min(state.replay.len()))
            .copied()
            .collect();

        let alpha = state.learning_rate;
        let gamma = self.cfg.discount_factor;
        let mut total_error = 0.0;
        for idx in &sampled {
            let experience = state.replay[*idx].clone();
            let state_key = StateKey::from_snapshot(&experience.entry_state);
            let action_key = ActionKey::from_action(&experience.action);
            let next_key = experience.next_state.as_ref().map(StateKey::from_snapshot);
            let (_, td_error) = state.apply_q_update(
                &state_key,
                &action_key,
                experience.reward,
                next_key.as_ref(),
                alpha,
                gamma,
            );
            total_error += td_error.abs();
        }

        state.stats.batch_episodes += 1;
        let mean_error = total_error / sampled.len() as f64;

        info!(
            "[LEARNING] Replayed {} experiences, mean |TD| {:.4}",
            sampled.len(),
            mean_error
        );

        mean_error
    }

    /// Read-only aggregate view: strongest patterns, worst patterns,
    /// recent win rate and the most valuable table cells.
    pub fn get_learned_insights(&self) -> LearnedInsights {
        let state = self.state.lock().unwrap();

        let mut successful = state.successful_patterns.clone();
        successful.sort_by(|a, b| b.avg_reward.total_cmp(&a.avg_reward));
        successful.truncate(5);

        let mut failed = state.failed_patterns.clone();
        failed.sort_by(|a, b| a.avg_reward.total_cmp(&b.avg_reward));
        failed.truncate(5);

        let recent_win_rate = if state.recent_rewards.is_empty() {
            0.0
        } else {
            state.recent_rewards.iter().filter(|r| **r > 0.0).count() as f64
                / state.recent_rewards.len() as f64
        };

        let mut top_q: Vec<(StateKey, ActionKey, f64)> = state
            .q_table
            .iter()
            .flat_map(|(s, actions)| {
                actions
                    .iter()
                    .map(move |(a, entry)| (s.clone(), a.clone(), entry.value))
            })
            .filter(|(_, _, value)| *value > MATERIALITY_THRESHOLD)
            .collect();
        top_q.sort_by(|a, b| b.2.total_cmp(&a.2));
        top_q.truncate(10);

        let q_table_size = state.q_table.values().map(|a| a.len()).sum();

        LearnedInsights {
            top_successful_patterns: successful,
            top_failure_patterns: failed,
            recent_win_rate,
            top_q_entries: top_q,
            epsilon: state.epsilon,
            q_table_size,
            memory_utilization: state.replay.len() as f64 / self.cfg.replay_capacity as f64,
        }
    }

    /// Fraction of positive rewards in the recent window
    pub fn recent_win_rate(&self) -> f64 {
        let state = self.state.lock().unwrap();
        if state.recent_rewards.is_empty() {
            return 0.0;
        }
        state.recent_rewards.iter().filter(|r| **r > 0.0).count() as f64
            / state.recent_rewards.len() as f64
    }

    pub fn epsilon(&self) -> f64 {
        self.state.lock().unwrap().epsilon
    }

    pub fn stats(&self) -> LearningStats {
        self.state.lock().unwrap().stats.clone()
    }

    /// Current table value for a (state, action) pair, 0.0 on miss
    pub fn q_value(&self, state_key: &StateKey, action_key: &ActionKey) -> f64 {
        self.state.lock().unwrap().q_value(state_key, action_key)
    }

    /// Save learner state (table, patterns, stats, epsilon) to JSON.
    /// The replay buffer is deliberately not persisted.
    pub fn save(&self, path: &str) -> Result<()> {
        let state = self.state.lock().unwrap();
        let json = serde_json::to_string_pretty(&*state)?;
        drop(state);
        fs::write(path, json)?;
        self.flush.lock().unwrap().mark_flushed();
        info!("[LEARNING] Saved state to {}", path);
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(
        path: P,
        cfg: LearningConfig,
        persistence: &PersistenceConfig,
    ) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let mut loaded: LearnerState = serde_json::from_str(&json)?;
        if loaded.learning_rate <= 0.0 {
            loaded.learning_rate = cfg.base_learning_rate;
        }
        Ok(Self {
            cfg,
            state: Mutex::new(loaded),
            flush: Mutex::new(FlushTracker::new(persistence)),
        })
    }

    /// Load from file, or start empty if the file is missing or corrupt
    pub fn load_or_new<P: AsRef<Path>>(
        path: P,
        cfg: LearningConfig,
        persistence: &PersistenceConfig,
    ) -> Self {
        match Self::load(path, cfg.clone(), persistence) {
            Ok(engine) => engine,
            Err(e) => {
                warn!("[LEARNING] Starting fresh, could not load state: {}", e);
                Self::new(cfg, persistence)
            }
        }
    }

    /// Save if a flush trigger has fired; log-and-swallow any I/O error
    pub fn flush_if_due(&self, path: &str) {
        let due = self.flush.lock().unwrap().is_due();
        if due {
            if let Err(e) = self.save(path) {
                warn!("[LEARNING] Flush to {} failed: {}", path, e);
            }
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
