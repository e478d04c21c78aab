//! Per-pod training data: the epoch window, declared fields and actions, and
//! the time-indexed tables built from ingested CSV batches.
//!
//! Observations land in a sparse table keyed by timestamp. A dense "filled"
//! table holds one row per granularity step, each field forward-filled from
//! its latest observation. A merge only refills rows at or after the earliest
//! timestamp it touched. Training and inference read snapshots of the filled
//! table.

pub mod csv;

pub use self::csv::{read_observations, Observations, TIME_COLUMN};

use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;

/// Three days
pub const DEFAULT_PERIOD_SECS: i64 = 3 * 24 * 60 * 60;
pub const DEFAULT_INTERVAL_SECS: i64 = 60;
pub const DEFAULT_GRANULARITY_SECS: i64 = 10;

/// Upper bound on filled rows per pod unless configured otherwise
pub const DEFAULT_MAX_FILLED_ROWS: usize = 1_000_000;

/// A declared field and the value it takes before it is first observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub initializer: f64,
}

/// A labelled time range supplied by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    pub start: i64,
    pub end: i64,
    pub name: String,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Time parameters of a pod, all in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataParam {
    pub epoch_time: i64,
    pub end_time: i64,
    pub period: i64,
    pub interval: i64,
    pub granularity: i64,
}

impl DataParam {
    /// Zero durations fall back to the defaults; a zero epoch means one
    /// period before `now`.
    pub fn new(epoch_time: i64, period: i64, interval: i64, granularity: i64, now: i64) -> Self {
        let period = if period > 0 { period } else { DEFAULT_PERIOD_SECS };
        let interval = if interval > 0 { interval } else { DEFAULT_INTERVAL_SECS };
        let granularity = if granularity > 0 {
            granularity
        } else {
            DEFAULT_GRANULARITY_SECS
        };
        let epoch_time = if epoch_time != 0 { epoch_time } else { now - period };
        Self {
            epoch_time,
            end_time: epoch_time + period,
            period,
            interval,
            granularity,
        }
    }

    /// Rows one observation window spans
    pub fn window_span(&self) -> usize {
        (self.interval / self.granularity).max(1) as usize
    }
}

/// Outcome of [`DataManager::advance_epoch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochUpdate {
    Advanced,
    /// The requested epoch precedes the current one
    Rejected { minimum: i64 },
}

/// Filled rows from the epoch onward, in declared field order.
#[derive(Debug, Clone, Default)]
pub struct TrainingData {
    pub timestamps: Vec<i64>,
    pub rows: Vec<Vec<f64>>,
    pub window_span: usize,
}

impl TrainingData {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The most recent `window_span` filled rows.
#[derive(Debug, Clone)]
pub struct Window {
    pub start: i64,
    pub end: i64,
    pub rows: Vec<Vec<f64>>,
}

#[derive(Debug, Default)]
struct Tables {
    sparse: BTreeMap<i64, Vec<Option<f64>>>,
    filled_index: Vec<i64>,
    filled: Vec<Vec<f64>>,
}

#[derive(Debug)]
struct DataState {
    param: DataParam,
    tables: Tables,
    interpretations: Vec<Interpretation>,
}

/// Training data and configuration of one pod.
#[derive(Debug)]
pub struct DataManager {
    fields: Vec<FieldSpec>,
    action_names: Vec<String>,
    action_rewards: BTreeMap<String, String>,
    external_reward_funcs: BTreeMap<String, String>,
    laws: Vec<String>,
    max_filled_rows: usize,
    state: RwLock<DataState>,
}

impl DataManager {
    pub fn new(
        param: DataParam,
        fields: Vec<FieldSpec>,
        action_rewards: BTreeMap<String, String>,
        actions_order: &BTreeMap<String, i64>,
        external_reward_funcs: BTreeMap<String, String>,
        laws: Vec<String>,
    ) -> Self {
        let mut action_names: Vec<String> = action_rewards.keys().cloned().collect();
        action_names.sort_by_key(|name| (actions_order.get(name).copied().unwrap_or(i64::MAX), name.clone()));

        Self {
            fields,
            action_names,
            action_rewards,
            external_reward_funcs,
            laws,
            max_filled_rows: DEFAULT_MAX_FILLED_ROWS,
            state: RwLock::new(DataState {
                param,
                tables: Tables::default(),
                interpretations: Vec::new(),
            }),
        }
    }

    /// Reject merges that would grow the filled table past `rows`
    pub fn with_max_filled_rows(mut self, rows: usize) -> Self {
        self.max_filled_rows = rows;
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Actions ordered by their declared ordinal, then by name
    pub fn action_names(&self) -> &[String] {
        &self.action_names
    }

    pub fn action_rewards(&self) -> &BTreeMap<String, String> {
        &self.action_rewards
    }

    pub fn external_reward_funcs(&self) -> &BTreeMap<String, String> {
        &self.external_reward_funcs
    }

    pub fn laws(&self) -> &[String] {
        &self.laws
    }

    pub fn param(&self) -> DataParam {
        self.state.read().param
    }

    pub fn window_span(&self) -> usize {
        self.state.read().param.window_span()
    }

    /// `(window_span, field_count)`: the input shape agents are sized to
    pub fn shape(&self) -> (usize, usize) {
        (self.window_span(), self.fields.len())
    }

    /// Merge a decoded CSV batch. The whole batch is rejected if it carries
    /// a column that is not a declared field, or if the filled table would
    /// span more than the configured number of rows.
    pub fn merge(&self, observations: &Observations) -> Result<()> {
        let positions = observations
            .fields
            .iter()
            .map(|name| {
                self.fields
                    .iter()
                    .position(|f| &f.name == name)
                    .ok_or_else(|| Error::InvalidData(format!("Unexpected field: '{}'", name)))
            })
            .collect::<Result<Vec<_>>>()?;

        let Some(batch_first) = observations.rows.iter().map(|(time, _)| *time).min() else {
            return Ok(());
        };
        let batch_last = observations.rows.iter().map(|(time, _)| *time).max().unwrap_or(batch_first);

        let mut state = self.state.write();
        let granularity = state.param.granularity;
        let sparse = &state.tables.sparse;
        let first = sparse.keys().next().map_or(batch_first, |t| batch_first.min(*t));
        let last = sparse.keys().next_back().map_or(batch_last, |t| batch_last.max(*t));
        let rows = filled_row_count(first, last, granularity);
        if rows > self.max_filled_rows as u128 {
            return Err(Error::InvalidData(format!(
                "Data from {} to {} spans {} rows at granularity {}, limit is {}",
                first, last, rows, granularity, self.max_filled_rows
            )));
        }

        let field_count = self.fields.len();
        for (time, values) in &observations.rows {
            let row = state
                .tables
                .sparse
                .entry(*time)
                .or_insert_with(|| vec![None; field_count]);
            for (pos, value) in positions.iter().zip(values) {
                if value.is_some() {
                    row[*pos] = *value;
                }
            }
        }
        state.tables.refill_from(batch_first, &self.fields, granularity);
        Ok(())
    }

    /// Replace the epoch if `epoch_time` does not move it backward
    pub fn advance_epoch(&self, epoch_time: i64) -> EpochUpdate {
        let mut state = self.state.write();
        if epoch_time < state.param.epoch_time {
            return EpochUpdate::Rejected {
                minimum: state.param.epoch_time,
            };
        }
        state.param.epoch_time = epoch_time;
        state.param.end_time = epoch_time + state.param.period;
        EpochUpdate::Advanced
    }

    /// Filled rows available from the epoch onward
    pub fn rows_from_epoch(&self) -> usize {
        let state = self.state.read();
        let start = state.epoch_index();
        state.tables.filled.len() - start
    }

    pub fn filled_len(&self) -> usize {
        self.state.read().tables.filled.len()
    }

    pub fn training_rows(&self) -> TrainingData {
        let state = self.state.read();
        let start = state.epoch_index();
        TrainingData {
            timestamps: state.tables.filled_index[start..].to_vec(),
            rows: state.tables.filled[start..].to_vec(),
            window_span: state.param.window_span(),
        }
    }

    /// `None` until at least `window_span` rows exist
    pub fn latest_window(&self) -> Option<Window> {
        let state = self.state.read();
        let span = state.param.window_span();
        let len = state.tables.filled.len();
        if len < span {
            return None;
        }
        Some(Window {
            start: state.tables.filled_index[len - span],
            end: state.tables.filled_index[len - 1],
            rows: state.tables.filled[len - span..].to_vec(),
        })
    }

    pub fn add_interpretations(&self, interpretations: Vec<Interpretation>) {
        self.state.write().interpretations.extend(interpretations);
    }

    pub fn interpretations(&self) -> Vec<Interpretation> {
        self.state.read().interpretations.clone()
    }
}

impl DataState {
    /// Nearest filled index at or before the epoch, or the first row when the
    /// epoch precedes all data.
    fn epoch_index(&self) -> usize {
        let index = &self.tables.filled_index;
        match index.partition_point(|t| *t <= self.param.epoch_time) {
            0 => 0,
            n => n - 1,
        }
    }
}

/// Rows in a filled table running from `first` to `last`
fn filled_row_count(first: i64, last: i64, granularity: i64) -> u128 {
    let span = (last as i128 - first as i128).max(0) as u128;
    span / granularity.max(1) as u128 + 1
}

impl Tables {
    /// Recompute filled rows at or after `changed`. Rows before it only
    /// depend on older observations and are kept.
    fn refill_from(&mut self, changed: i64, fields: &[FieldSpec], granularity: i64) {
        let (first, last) = match (self.sparse.keys().next(), self.sparse.keys().next_back()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return,
        };

        // A new earliest timestamp moves the grid origin, so nothing is kept.
        let keep = self.filled_index.partition_point(|t| *t < changed);
        self.filled_index.truncate(keep);
        self.filled.truncate(keep);

        let (mut t, mut current, from) = match (self.filled_index.last(), self.filled.last()) {
            (Some(prev), Some(row)) => match prev.checked_add(granularity) {
                Some(next) => (next, row.clone(), Bound::Excluded(*prev)),
                None => return,
            },
            _ => (
                first,
                fields.iter().map(|f| f.initializer).collect(),
                Bound::Unbounded,
            ),
        };

        let mut observations = self.sparse.range((from, Bound::Unbounded)).peekable();
        while t <= last {
            while let Some((_, values)) = observations.next_if(|(time, _)| **time <= t) {
                for (slot, value) in current.iter_mut().zip(values) {
                    if let Some(v) = value {
                        *slot = *v;
                    }
                }
            }
            self.filled_index.push(t);
            self.filled.push(current.clone());
            t = match t.checked_add(granularity) {
                Some(next) => next,
                None => break,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(epoch: i64, interval: i64, granularity: i64) -> DataManager {
        let rewards: BTreeMap<String, String> = [("sell", "0"), ("buy", "0"), ("hold", "0")]
            .iter()
            .map(|(a, r)| (a.to_string(), r.to_string()))
            .collect();
        let order: BTreeMap<String, i64> = [("buy", 0), ("sell", 1)]
            .iter()
            .map(|(a, o)| (a.to_string(), *o))
            .collect();
        DataManager::new(
            DataParam::new(epoch, 1000, interval, granularity, 0),
            vec![
                FieldSpec { name: "price".into(), initializer: 0.0 },
                FieldSpec { name: "usd".into(), initializer: 100.0 },
            ],
            rewards,
            &order,
            BTreeMap::new(),
            Vec::new(),
        )
    }

    #[test]
    fn test_param_defaults() {
        let param = DataParam::new(0, 0, 0, 0, 1_000_000);
        assert_eq!(param.period, DEFAULT_PERIOD_SECS);
        assert_eq!(param.epoch_time, 1_000_000 - DEFAULT_PERIOD_SECS);
        assert_eq!(param.end_time, 1_000_000);
        assert_eq!(param.window_span(), 6);
        assert_eq!(DataParam::new(5, 10, 5, 10, 0).window_span(), 1);
    }

    #[test]
    fn test_action_order() {
        let dm = manager(100, 30, 10);
        assert_eq!(dm.action_names(), ["buy", "sell", "hold"]);
    }

    #[test]
    fn test_forward_fill() {
        let dm = manager(100, 30, 10);
        dm.merge(&read_observations("time,price\n100,1\n125,2\n140,3\n").unwrap())
            .unwrap();
        let data = dm.training_rows();
        assert_eq!(data.timestamps, vec![100, 110, 120, 130, 140]);
        let prices: Vec<f64> = data.rows.iter().map(|r| r[0]).collect();
        assert_eq!(prices, vec![1.0, 1.0, 1.0, 2.0, 3.0]);
        assert!(data.rows.iter().all(|r| r[1] == 100.0));
    }

    #[test]
    fn test_later_values_overwrite() {
        let dm = manager(100, 30, 10);
        dm.merge(&read_observations("time,price,usd\n100,1,5\n").unwrap())
            .unwrap();
        dm.merge(&read_observations("time,price\n100,7\n").unwrap())
            .unwrap();
        assert_eq!(dm.training_rows().rows, vec![vec![7.0, 5.0]]);
    }

    #[test]
    fn test_unexpected_field_rejected() {
        let dm = manager(100, 30, 10);
        let err = dm
            .merge(&read_observations("time,price,btc\n100,1,2\n").unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("btc"));
        assert_eq!(dm.filled_len(), 0);
    }

    #[test]
    fn test_rows_from_epoch() {
        let dm = manager(125, 30, 10);
        assert_eq!(dm.rows_from_epoch(), 0);
        dm.merge(&read_observations("time,price\n100,1\n150,2\n").unwrap())
            .unwrap();
        // 100..=150 is six rows; the nearest index at or before 125 is 120
        assert_eq!(dm.rows_from_epoch(), 4);

        let early = manager(10, 30, 10);
        early
            .merge(&read_observations("time,price\n100,1\n150,2\n").unwrap())
            .unwrap();
        assert_eq!(early.rows_from_epoch(), 6);
    }

    #[test]
    fn test_advance_epoch() {
        let dm = manager(100, 30, 10);
        assert_eq!(dm.advance_epoch(90), EpochUpdate::Rejected { minimum: 100 });
        assert_eq!(dm.param().epoch_time, 100);
        assert_eq!(dm.advance_epoch(100), EpochUpdate::Advanced);
        assert_eq!(dm.advance_epoch(200), EpochUpdate::Advanced);
        assert_eq!(dm.param().epoch_time, 200);
        assert_eq!(dm.param().end_time, 1200);
    }

    #[test]
    fn test_incremental_merge_matches_full_fill() {
        let batches = [
            "time,price\n100,1\n130,2\n",
            "time,usd\n160,50\n",
            "time,price\n115,9\n",
            "time,price\n60,4\n",
        ];
        let incremental = manager(0, 30, 10);
        for batch in batches {
            incremental.merge(&read_observations(batch).unwrap()).unwrap();
        }

        let at_once = manager(0, 30, 10);
        at_once
            .merge(&read_observations("time,price,usd\n60,4,\n100,1,\n115,9,\n130,2,\n160,,50\n").unwrap())
            .unwrap();

        let (a, b) = (incremental.training_rows(), at_once.training_rows());
        assert_eq!(a.timestamps, (60..=160).step_by(10).collect::<Vec<_>>());
        assert_eq!(a.timestamps, b.timestamps);
        assert_eq!(a.rows, b.rows);
    }

    #[test]
    fn test_span_over_row_limit_rejected() {
        let dm = manager(0, 30, 10).with_max_filled_rows(100);
        dm.merge(&read_observations("time,price\n0,1\n500,2\n").unwrap())
            .unwrap();
        assert_eq!(dm.filled_len(), 51);

        // Milliseconds mixed with seconds
        let err = dm
            .merge(&read_observations("time,price\n20000000,3\n").unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)), "{}", err);
        assert_eq!(dm.filled_len(), 51);
        assert_eq!(dm.training_rows().rows.last().unwrap()[0], 2.0);

        let default_limit = manager(0, 30, 10);
        assert!(default_limit
            .merge(&read_observations("time,price\n0,1\n20000000,2\n").unwrap())
            .is_err());
        assert_eq!(default_limit.filled_len(), 0);
    }

    #[test]
    fn test_fill_stops_at_time_limit() {
        let dm = manager(0, 30, 10);
        let last = i64::MAX - 5;
        dm.merge(&read_observations(&format!("time,price\n{},1\n{},2\n", last - 20, last)).unwrap())
            .unwrap();
        let data = dm.training_rows();
        assert_eq!(data.timestamps, vec![last - 20, last - 10, last]);
        assert_eq!(data.rows.last().unwrap()[0], 2.0);
    }

    #[test]
    fn test_laws_are_kept() {
        let dm = DataManager::new(
            DataParam::new(100, 1000, 30, 10, 0),
            Vec::new(),
            BTreeMap::new(),
            &BTreeMap::new(),
            BTreeMap::new(),
            vec!["usd >= 0".to_string()],
        );
        assert_eq!(dm.laws(), ["usd >= 0"]);
    }

    #[test]
    fn test_latest_window() {
        let dm = manager(100, 30, 10);
        dm.merge(&read_observations("time,price\n100,1\n110,2\n").unwrap())
            .unwrap();
        assert!(dm.latest_window().is_none());
        dm.merge(&read_observations("time,price\n120,3\n130,4\n").unwrap())
            .unwrap();
        let window = dm.latest_window().unwrap();
        assert_eq!((window.start, window.end), (110, 130));
        assert_eq!(window.rows.len(), 3);
    }
}
