//! Shared harness for the engine integration tests.
#![allow(dead_code)]

use aiengine_core::agents::{get_agent, ModelMetadata};
use aiengine_core::config::Settings;
use aiengine_core::connector::{ConnectorConfig, DataSource};
use aiengine_core::data::FieldSpec;
use aiengine_core::engine::Engine;
use aiengine_core::queue::CommandOutcome;
use aiengine_core::service::messages::{AddDataRequest, InitRequest};
use aiengine_core::service::AiEngine;
use aiengine_core::training::{
    EpisodeReport, EpisodeSink, Trainer, TrainingFailure, TrainingJob, TrainingReporter,
};
use anyhow::bail;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const EPOCH: i64 = 1_000;
pub const GRANULARITY: i64 = 10;

/// Upper bound on any wait in the tests
pub const WAIT: Duration = Duration::from_secs(10);

/// What the scripted trainer does once released
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    Fail(String),
    Panic(String),
}

/// Trainer whose runs block until released and then follow a script.
pub struct ScriptedTrainer {
    root: PathBuf,
    script: Mutex<Script>,
    open: Mutex<bool>,
    gate: Condvar,
    started: AtomicUsize,
}

impl ScriptedTrainer {
    pub fn new(root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            root: root.into(),
            script: Mutex::new(Script::Succeed),
            open: Mutex::new(true),
            gate: Condvar::new(),
            started: AtomicUsize::new(0),
        })
    }

    /// Make subsequent runs block until [`ScriptedTrainer::release`]
    pub fn hold(&self) {
        *self.open.lock().unwrap() = false;
    }

    pub fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.gate.notify_all();
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    fn wait_for_release(&self) {
        let open = self.open.lock().unwrap();
        // Bounded so a forgotten release cannot hang the runtime's shutdown.
        let _ = self.gate.wait_timeout_while(open, WAIT, |open| !*open).unwrap();
    }
}

impl Trainer for ScriptedTrainer {
    fn train(&self, job: &TrainingJob, episodes: &EpisodeSink) -> anyhow::Result<PathBuf> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.wait_for_release();

        episodes.send(EpisodeReport {
            episode: 1,
            start: EPOCH,
            end: EPOCH + GRANULARITY,
            score: 1.5,
            actions_taken: BTreeMap::from([("buy".to_string(), 1)]),
        });

        let script = self.script.lock().unwrap().clone();
        match script {
            Script::Succeed => {
                let dir = self.root.join(&job.pod).join(&job.flight);
                write_artifact(&dir, &job.algorithm, &job.pod, job.data.shape(), job.data.action_names().len())?;
                Ok(dir)
            }
            Script::Fail(msg) => bail!(msg),
            Script::Panic(msg) => panic!("{}", msg),
        }
    }
}

/// Write a loadable, untrained model artifact
pub fn write_artifact(
    dir: &Path,
    algorithm: &str,
    pod: &str,
    shape: (usize, usize),
    action_count: usize,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let agent = get_agent(algorithm, shape, action_count)?;
    agent.save(dir)?;
    ModelMetadata::new(algorithm, pod, "imported", 0).write(dir)?;
    Ok(())
}

/// Keeps every report it receives
#[derive(Default)]
pub struct RecordingReporter {
    pub episodes: Mutex<Vec<(String, String, EpisodeReport)>>,
    pub failures: Mutex<Vec<(String, String, TrainingFailure)>>,
}

impl RecordingReporter {
    pub fn failures(&self) -> Vec<(String, String, TrainingFailure)> {
        self.failures.lock().unwrap().clone()
    }

    pub fn episodes(&self) -> Vec<(String, String, EpisodeReport)> {
        self.episodes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrainingReporter for RecordingReporter {
    async fn report_episode(&self, pod: &str, flight: &str, report: &EpisodeReport) {
        self.episodes
            .lock()
            .unwrap()
            .push((pod.to_string(), flight.to_string(), report.clone()));
    }

    async fn report_failure(&self, pod: &str, flight: &str, failure: &TrainingFailure) {
        self.failures
            .lock()
            .unwrap()
            .push((pod.to_string(), flight.to_string(), failure.clone()));
    }
}

/// Settings for an isolated engine writing under `root`
pub fn test_settings(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.storage.models_root = root.to_path_buf();
    settings.reporting.enabled = false;
    settings.shutdown.watch_parent = false;
    settings.training.default_episodes = 3;
    settings.training.join_timeout_secs = 5;
    settings
}

/// A pod trading on `price` with a two-row window
pub fn init_request(pod: &str) -> InitRequest {
    InitRequest {
        pod: pod.to_string(),
        period: 10_000,
        interval: 2 * GRANULARITY,
        granularity: GRANULARITY,
        epoch_time: EPOCH,
        actions: BTreeMap::from([
            ("buy".to_string(), "reward = price - prev.price".to_string()),
            ("sell".to_string(), "reward = prev.price - price".to_string()),
            ("hold".to_string(), "reward = 0".to_string()),
        ]),
        actions_order: BTreeMap::from([("buy".to_string(), 0), ("sell".to_string(), 1)]),
        fields: vec![
            FieldSpec { name: "price".into(), initializer: 0.0 },
            FieldSpec { name: "usd".into(), initializer: 100.0 },
        ],
        datasources: vec![DataSource {
            connector: ConnectorConfig {
                name: "stateful".into(),
                params: BTreeMap::new(),
            },
            actions: BTreeMap::from([("buy".to_string(), "usd -= price".to_string())]),
        }],
        ..Default::default()
    }
}

/// `count` price rows one granularity apart starting at the epoch
pub fn price_csv(count: usize) -> String {
    let mut csv = String::from("time,price\n");
    for i in 0..count {
        csv.push_str(&format!("{},{}\n", EPOCH + i as i64 * GRANULARITY, 10 + (i % 4)));
    }
    csv
}

/// Poll `condition` until it holds or [`WAIT`] elapses
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// An engine with a scripted trainer and a recording reporter.
pub struct Harness {
    pub engine: Engine,
    pub trainer: Arc<ScriptedTrainer>,
    pub reporter: Arc<RecordingReporter>,
    pub outcomes: mpsc::UnboundedReceiver<CommandOutcome>,
    pub dir: TempDir,
}

impl Harness {
    pub fn start() -> Self {
        Self::start_with(|_| {})
    }

    pub fn start_with(configure: impl FnOnce(&mut Settings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(&dir.path().join("models"));
        configure(&mut settings);

        let trainer = ScriptedTrainer::new(&settings.storage.models_root);
        let reporter = Arc::new(RecordingReporter::default());
        let (tx, outcomes) = mpsc::unbounded_channel();
        let engine = Engine::builder(settings)
            .with_trainer(trainer.clone())
            .with_reporter(reporter.clone())
            .with_observer(tx)
            .start()
            .unwrap();

        Self {
            engine,
            trainer,
            reporter,
            outcomes,
            dir,
        }
    }

    pub fn gateway(&self) -> &Arc<AiEngine> {
        self.engine.gateway()
    }

    pub async fn next_outcome(&mut self) -> CommandOutcome {
        tokio::time::timeout(WAIT, self.outcomes.recv())
            .await
            .expect("timed out waiting for the event loop")
            .expect("event loop stopped")
    }

    /// Init `pod` and wait until the event loop has applied it
    pub async fn init_pod(&mut self, pod: &str) {
        let response = self.gateway().init(init_request(pod)).unwrap();
        assert!(!response.error, "init rejected: {:?}", response);
        let outcome = self.next_outcome().await;
        assert_eq!(outcome.pod, pod);
        assert!(outcome.result.is_ok(), "init failed: {:?}", outcome.result);
    }

    /// Add `rows` price rows to `pod` and wait until they are merged
    pub async fn add_rows(&mut self, pod: &str, rows: usize) {
        self.gateway()
            .add_data(AddDataRequest {
                pod: pod.to_string(),
                csv_data: price_csv(rows),
            })
            .unwrap();
        let outcome = self.next_outcome().await;
        assert!(outcome.result.is_ok(), "add_data failed: {:?}", outcome.result);
    }

    /// Initialized pod with enough data to train on
    pub async fn trainable_pod(&mut self, pod: &str) {
        self.init_pod(pod).await;
        self.add_rows(pod, 6).await;
    }

    pub async fn wait_idle(&self) {
        assert!(
            self.engine.dispatcher().wait_idle(WAIT).await,
            "training did not finish"
        );
    }
}
