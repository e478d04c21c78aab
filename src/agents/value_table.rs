use super::{argmax, load_weights, save_weights, softmax, Agent, Exploration, Shape};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

const EPSILON_START: f64 = 1.0;
const EPSILON_MIN: f64 = 0.05;
const EPSILON_DECAY: f64 = 0.995;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Table {
    values: Vec<f64>,
    counts: Vec<u64>,
}

/// `dql`: running mean reward per action, greedy at inference and
/// epsilon-greedy while training.
#[derive(Debug, Clone)]
pub struct ValueTableAgent {
    shape: Shape,
    table: Table,
    rng: Exploration,
}

impl ValueTableAgent {
    pub const ALGORITHM: &'static str = "dql";

    pub fn new(shape: Shape, action_count: usize) -> Self {
        Self {
            shape,
            table: Table {
                values: vec![0.0; action_count],
                counts: vec![0; action_count],
            },
            rng: Exploration::seeded((shape.0 * 31 + shape.1) as u64),
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.table.values
    }

    fn action_count(&self) -> usize {
        self.table.values.len()
    }
}

impl Agent for ValueTableAgent {
    fn algorithm(&self) -> &'static str {
        Self::ALGORITHM
    }

    fn act(&self, _window: &[Vec<f64>]) -> (usize, f64) {
        let action = argmax(&self.table.values);
        let confidence = softmax(&self.table.values)
            .get(action)
            .copied()
            .unwrap_or(0.0);
        (action, confidence)
    }

    fn explore(&mut self, window: &[Vec<f64>], step: u64) -> usize {
        let epsilon = (EPSILON_START * EPSILON_DECAY.powf(step as f64)).max(EPSILON_MIN);
        if self.rng.next_f64() < epsilon {
            self.rng.below(self.action_count())
        } else {
            self.act(window).0
        }
    }

    fn learn(&mut self, action: usize, reward: f64) {
        let (Some(value), Some(count)) = (
            self.table.values.get_mut(action),
            self.table.counts.get_mut(action),
        ) else {
            return;
        };
        *count += 1;
        *value += (reward - *value) / *count as f64;
    }

    fn save(&self, dir: &Path) -> Result<()> {
        save_weights(dir, Self::ALGORITHM, self.shape, self.action_count(), &self.table)
    }

    fn load(&mut self, dir: &Path) -> bool {
        match load_weights::<Table>(dir, Self::ALGORITHM, self.shape, self.action_count()) {
            Some(table) if table.values.len() == self.action_count() => {
                self.table = table;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_mean() {
        let mut agent = ValueTableAgent::new((3, 1), 2);
        agent.learn(0, 1.0);
        agent.learn(0, 3.0);
        agent.learn(1, 1.0);
        agent.learn(5, 100.0);
        assert_eq!(agent.values(), [2.0, 1.0]);
        assert_eq!(agent.act(&[]).0, 0);
    }

    #[test]
    fn test_exploration_decays_to_greedy() {
        let mut agent = ValueTableAgent::new((3, 1), 3);
        agent.learn(2, 10.0);
        let greedy = (0..200).filter(|_| agent.explore(&[], 10_000) == 2).count();
        assert!(greedy > 150);
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut trained = ValueTableAgent::new((3, 1), 2);
        trained.learn(1, 4.0);
        trained.save(dir.path()).unwrap();

        let mut loaded = ValueTableAgent::new((3, 1), 2);
        assert!(loaded.load(dir.path()));
        assert_eq!(loaded.values(), [0.0, 4.0]);
    }
}
