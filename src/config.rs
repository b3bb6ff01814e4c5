//! Configuration loader
//!
//! Every policy constant of the engine lives here: exploration rates,
//! Q-learning factors, confidence heuristics and persistence cadence.
//! All fields have defaults, so the engine runs unchanged with no config
//! file present; a TOML file overrides individual values.

use anyhow::Result;
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerConfig {
    /// Probability of exploring a uniformly random value
    #[serde(default = "default_exploration_rate")]
    pub exploration_rate: f64,
    /// Below this many trials the optimizer always explores
    #[serde(default = "default_min_trials_for_exploitation")]
    pub min_trials_for_exploitation: usize,
    /// Gaussian perturbation sigma as a fraction of the range width
    #[serde(default = "default_perturbation_fraction")]
    pub perturbation_fraction: f64,
    /// Trials needed before a parameter counts toward decision confidence
    #[serde(default = "default_min_trials_for_confidence")]
    pub min_trials_for_confidence: usize,
    /// Confidence added per sufficiently-sampled parameter
    #[serde(default = "default_confidence_bonus_per_param")]
    pub confidence_bonus_per_param: f64,
    #[serde(default = "default_confidence_cap")]
    pub confidence_cap: f64,
}

fn default_exploration_rate() -> f64 {
    0.2
}

fn default_min_trials_for_exploitation() -> usize {
    3
}

fn default_perturbation_fraction() -> f64 {
    0.10
}

fn default_min_trials_for_confidence() -> usize {
    5
}

fn default_confidence_bonus_per_param() -> f64 {
    0.15
}

fn default_confidence_cap() -> f64 {
    0.95
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            exploration_rate: default_exploration_rate(),
            min_trials_for_exploitation: default_min_trials_for_exploitation(),
            perturbation_fraction: default_perturbation_fraction(),
            min_trials_for_confidence: default_min_trials_for_confidence(),
            confidence_bonus_per_param: default_confidence_bonus_per_param(),
            confidence_cap: default_confidence_cap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_base_learning_rate")]
    pub base_learning_rate: f64,
    /// Upper bound for the adaptive learning rate
    #[serde(default = "default_max_learning_rate")]
    pub max_learning_rate: f64,
    #[serde(default = "default_discount_factor")]
    pub discount_factor: f64,
    #[serde(default = "default_epsilon_initial")]
    pub epsilon_initial: f64,
    /// Multiplicative epsilon decay applied after every experience
    #[serde(default = "default_epsilon_decay")]
    pub epsilon_decay: f64,
    #[serde(default = "default_epsilon_min")]
    pub epsilon_min: f64,
    /// Replay buffer capacity (oldest experiences evicted first)
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,
    /// Cap for each of the successful/failed pattern lists
    #[serde(default = "default_pattern_capacity")]
    pub pattern_capacity: usize,
    /// Size of the recent-rewards window
    #[serde(default = "default_reward_window")]
    pub reward_window: usize,
}

fn default_base_learning_rate() -> f64 {
    0.1
}

fn default_max_learning_rate() -> f64 {
    0.3
}

fn default_discount_factor() -> f64 {
    0.95
}

fn default_epsilon_initial() -> f64 {
    0.3
}

fn default_epsilon_decay() -> f64 {
    0.995
}

fn default_epsilon_min() -> f64 {
    0.05
}

fn default_replay_capacity() -> usize {
    1000
}

fn default_pattern_capacity() -> usize {
    100
}

fn default_reward_window() -> usize {
    100
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            base_learning_rate: default_base_learning_rate(),
            max_learning_rate: default_max_learning_rate(),
            discount_factor: default_discount_factor(),
            epsilon_initial: default_epsilon_initial(),
            epsilon_decay: default_epsilon_decay(),
            epsilon_min: default_epsilon_min(),
            replay_capacity: default_replay_capacity(),
            pattern_capacity: default_pattern_capacity(),
            reward_window: default_reward_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding the per-component state files
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    /// Flush when this much time has passed since the last save
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Flush when this many updates have accumulated
    #[serde(default = "default_flush_every_n_updates")]
    pub flush_every_n_updates: u64,
}

fn default_state_dir() -> String {
    "state".to_string()
}

fn default_flush_interval_secs() -> u64 {
    300
}

fn default_flush_every_n_updates() -> u64 {
    25
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            flush_interval_secs: default_flush_interval_secs(),
            flush_every_n_updates: default_flush_every_n_updates(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from file, or fall back to defaults when the file is missing
    /// or malformed. A broken config must never block trading decisions.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("[CONFIG] Using defaults, could not load {}: {}", path, e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.optimizer.exploration_rate, 0.2);
        assert_eq!(cfg.optimizer.min_trials_for_exploitation, 3);
        assert_eq!(cfg.learning.discount_factor, 0.95);
        assert_eq!(cfg.learning.epsilon_initial, 0.3);
        assert_eq!(cfg.learning.epsilon_min, 0.05);
        assert_eq!(cfg.persistence.flush_interval_secs, 300);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            [learning]
            epsilon_initial = 0.5

            [optimizer]
            exploration_rate = 0.1
            "#,
        )
        .unwrap();

        assert_eq!(cfg.learning.epsilon_initial, 0.5);
        assert_eq!(cfg.optimizer.exploration_rate, 0.1);
        // Untouched fields keep defaults
        assert_eq!(cfg.learning.epsilon_decay, 0.995);
        assert_eq!(cfg.persistence.state_dir, "state");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let cfg = EngineConfig::load_or_default("/tmp/nonexistent_engine_config_98765.toml");
        assert_eq!(cfg.optimizer.exploration_rate, 0.2);
    }
}
