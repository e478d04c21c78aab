//! Learning agents and the on-disk artifact format.
//!
//! An artifact directory holds `meta.json` naming the algorithm plus the
//! agent's weight file `<algorithm>.json`. Weight files record the input
//! shape and action count they were trained for; loading into an agent of a
//! different shape fails.

mod gradient;
mod value_table;

pub use gradient::GradientAgent;
pub use value_table::ValueTableAgent;

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

pub const META_FILE: &str = "meta.json";

/// `(window_span, field_count)`
pub type Shape = (usize, usize);

pub trait Agent: Send {
    fn algorithm(&self) -> &'static str;

    /// Greedy action for `window` and the agent's confidence in it
    fn act(&self, window: &[Vec<f64>]) -> (usize, f64);

    /// Action to take during training at `step`
    fn explore(&mut self, window: &[Vec<f64>], step: u64) -> usize;

    fn learn(&mut self, action: usize, reward: f64);

    fn save(&self, dir: &Path) -> Result<()>;

    /// Replace the weights with the ones stored in `dir`. Returns `false` if
    /// they are missing, unreadable or sized for a different pod.
    fn load(&mut self, dir: &Path) -> bool;
}

pub const ALGORITHMS: [&str; 2] = [ValueTableAgent::ALGORITHM, GradientAgent::ALGORITHM];

/// Build an untrained agent
pub fn get_agent(algorithm: &str, shape: Shape, action_count: usize) -> Result<Box<dyn Agent>> {
    match algorithm {
        ValueTableAgent::ALGORITHM => Ok(Box::new(ValueTableAgent::new(shape, action_count))),
        GradientAgent::ALGORITHM => Ok(Box::new(GradientAgent::new(shape, action_count))),
        other => Err(Error::UnsupportedAlgorithm(other.to_string())),
    }
}

/// Contents of `meta.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub algorithm: String,
    #[serde(default)]
    pub pod: String,
    #[serde(default)]
    pub flight: String,
    #[serde(default)]
    pub episodes: u32,
    #[serde(default)]
    pub created_at: String,
}

impl ModelMetadata {
    pub fn new(algorithm: &str, pod: &str, flight: &str, episodes: u32) -> Self {
        Self {
            algorithm: algorithm.to_string(),
            pod: pod.to_string(),
            flight: flight.to_string(),
            episodes,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn exists(dir: &Path) -> bool {
        dir.join(META_FILE).is_file()
    }

    pub fn read(dir: &Path) -> Result<Self> {
        let bytes = fs::read(dir.join(META_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        fs::write(dir.join(META_FILE), serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct WeightsFile<T> {
    shape: Shape,
    action_count: usize,
    weights: T,
}

fn weights_path(dir: &Path, algorithm: &str) -> std::path::PathBuf {
    dir.join(format!("{}.json", algorithm))
}

pub(crate) fn save_weights<T: Serialize>(
    dir: &Path,
    algorithm: &str,
    shape: Shape,
    action_count: usize,
    weights: &T,
) -> Result<()> {
    let file = WeightsFile {
        shape,
        action_count,
        weights,
    };
    fs::write(weights_path(dir, algorithm), serde_json::to_vec(&file)?)?;
    Ok(())
}

pub(crate) fn load_weights<T: DeserializeOwned>(
    dir: &Path,
    algorithm: &str,
    shape: Shape,
    action_count: usize,
) -> Option<T> {
    let path = weights_path(dir, algorithm);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Unable to read weights");
            return None;
        }
    };
    let file: WeightsFile<T> = match serde_json::from_slice(&bytes) {
        Ok(file) => file,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Corrupt weights");
            return None;
        }
    };
    if file.shape != shape || file.action_count != action_count {
        debug!(
            path = %path.display(),
            expected = ?(shape, action_count),
            found = ?(file.shape, file.action_count),
            "Weights sized for a different pod"
        );
        return None;
    }
    Some(file.weights)
}

/// Softmax over `values`, shifted for numerical stability
pub(crate) fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value, first one on ties
pub(crate) fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_v), (idx, v)| {
            if *v > best_v {
                (idx, *v)
            } else {
                (best, best_v)
            }
        })
        .0
}

/// splitmix64; exploration only needs a cheap reproducible stream.
#[derive(Debug, Clone)]
pub(crate) struct Exploration {
    state: u64,
}

impl Exploration {
    pub(crate) fn seeded(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in `[0, 1)`
    pub(crate) fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    pub(crate) fn below(&mut self, n: usize) -> usize {
        (self.next_f64() * n as f64) as usize % n.max(1)
    }

    /// Draw an index with probability proportional to `probs`
    pub(crate) fn sample(&mut self, probs: &[f64]) -> usize {
        let mut target = self.next_f64();
        for (idx, p) in probs.iter().enumerate() {
            if target < *p {
                return idx;
            }
            target -= p;
        }
        probs.len().saturating_sub(1)
    }
}
