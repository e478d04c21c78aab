use super::{argmax, load_weights, save_weights, softmax, Agent, Exploration, Shape};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

const STEP_SIZE: f64 = 0.1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Policy {
    preferences: Vec<f64>,
    baseline: f64,
    updates: u64,
}

/// `vpg`: gradient-bandit action preferences against a running reward
/// baseline. Confidence is the softmax probability of the chosen action.
#[derive(Debug, Clone)]
pub struct GradientAgent {
    shape: Shape,
    policy: Policy,
    rng: Exploration,
}

impl GradientAgent {
    pub const ALGORITHM: &'static str = "vpg";

    pub fn new(shape: Shape, action_count: usize) -> Self {
        Self {
            shape,
            policy: Policy {
                preferences: vec![0.0; action_count],
                baseline: 0.0,
                updates: 0,
            },
            rng: Exploration::seeded((shape.1 * 31 + shape.0) as u64 ^ 0x5eed),
        }
    }

    pub fn probabilities(&self) -> Vec<f64> {
        softmax(&self.policy.preferences)
    }

    fn action_count(&self) -> usize {
        self.policy.preferences.len()
    }
}

impl Agent for GradientAgent {
    fn algorithm(&self) -> &'static str {
        Self::ALGORITHM
    }

    fn act(&self, _window: &[Vec<f64>]) -> (usize, f64) {
        let probs = self.probabilities();
        let action = argmax(&probs);
        (action, probs.get(action).copied().unwrap_or(0.0))
    }

    fn explore(&mut self, _window: &[Vec<f64>], _step: u64) -> usize {
        let probs = self.probabilities();
        self.rng.sample(&probs)
    }

    fn learn(&mut self, action: usize, reward: f64) {
        if action >= self.action_count() {
            return;
        }
        let probs = self.probabilities();
        let advantage = reward - self.policy.baseline;
        for (idx, (pref, prob)) in self.policy.preferences.iter_mut().zip(&probs).enumerate() {
            if idx == action {
                *pref += STEP_SIZE * advantage * (1.0 - prob);
            } else {
                *pref -= STEP_SIZE * advantage * prob;
            }
        }
        self.policy.updates += 1;
        self.policy.baseline += (reward - self.policy.baseline) / self.policy.updates as f64;
    }

    fn save(&self, dir: &Path) -> Result<()> {
        save_weights(dir, Self::ALGORITHM, self.shape, self.action_count(), &self.policy)
    }

    fn load(&mut self, dir: &Path) -> bool {
        match load_weights::<Policy>(dir, Self::ALGORITHM, self.shape, self.action_count()) {
            Some(policy) if policy.preferences.len() == self.action_count() => {
                self.policy = policy;
                true
            }
            _ => false,
        }
    }
}
