use super::{EpisodeReport, EpisodeSink, Trainer, TrainingJob};
use crate::agents::{get_agent, ModelMetadata};
use crate::reward::{Expr, RewardProgram, Scope};
use anyhow::{bail, Context};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const PARTIAL_SUFFIX: &str = ".partial";

/// Trains in process against the pod's filled data.
///
/// Each step shows the agent the previous `window_span` rows, applies the
/// chosen action's connector effects to a copy of the next row and rewards
/// the agent for the transition. Artifacts are written to
/// `<models_root>/<pod>/<flight>.partial` and renamed into place once
/// complete.
#[derive(Debug, Clone)]
pub struct LocalTrainer {
    models_root: PathBuf,
}

impl LocalTrainer {
    pub fn new(models_root: impl Into<PathBuf>) -> Self {
        Self {
            models_root: models_root.into(),
        }
    }

    fn commit(&self, job: &TrainingJob, save: impl FnOnce(&Path) -> anyhow::Result<()>) -> anyhow::Result<PathBuf> {
        let pod_dir = self.models_root.join(path_component(&job.pod));
        let name = path_component(&job.flight);
        let partial = pod_dir.join(format!("{}{}", name, PARTIAL_SUFFIX));
        let target = pod_dir.join(name);

        if partial.exists() {
            fs::remove_dir_all(&partial)?;
        }
        fs::create_dir_all(&partial)
            .with_context(|| format!("creating {}", partial.display()))?;
        save(&partial)?;

        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        fs::rename(&partial, &target)
            .with_context(|| format!("committing {}", target.display()))?;
        Ok(target)
    }
}

struct GoalScope {
    score: f64,
    episode: u32,
}

impl Scope for GoalScope {
    fn var(&self, name: &str) -> Option<f64> {
        match name {
            "score" => Some(self.score),
            "episode" => Some(self.episode as f64),
            _ => None,
        }
    }
}

impl Trainer for LocalTrainer {
    fn train(&self, job: &TrainingJob, episodes: &EpisodeSink) -> anyhow::Result<PathBuf> {
        let data = job.data.training_rows();
        let span = data.window_span;
        if data.len() <= span {
            bail!(
                "{} rows from the epoch is not enough for a window of {}",
                data.len(),
                span
            );
        }

        let actions = job.data.action_names().to_vec();
        let program = RewardProgram::compile(
            job.data.action_rewards(),
            job.data.external_reward_funcs(),
            &job.data.field_names(),
        )
        .context("compiling rewards")?;
        let goal = match job.goal.trim() {
            "" => None,
            source => Some(Expr::parse(source).context("parsing training goal")?),
        };
        let mut agent = get_agent(&job.algorithm, job.data.shape(), actions.len())?;

        info!(
            pod = %job.pod,
            flight = %job.flight,
            algorithm = %job.algorithm,
            rows = data.len(),
            episodes = job.episodes,
            "Training started"
        );

        let mut step = 0u64;
        let mut completed = 0;
        for episode in 1..=job.episodes {
            let mut score = 0.0;
            let mut actions_taken: BTreeMap<String, u64> =
                actions.iter().map(|a| (a.clone(), 0)).collect();

            for i in span..data.len() {
                let action = agent.explore(&data.rows[i - span..i], step);
                step += 1;
                let name = &actions[action];

                let prev = &data.rows[i - 1];
                let mut current = data.rows[i].clone();
                job.connectors.apply_action(name, prev, &mut current)?;
                let reward = program.reward(name, prev, &current)?;

                agent.learn(action, reward);
                score += reward;
                *actions_taken.entry(name.clone()).or_default() += 1;
            }

            completed = episode;
            debug!(pod = %job.pod, episode, score, "Episode finished");
            episodes.send(EpisodeReport {
                episode,
                start: data.timestamps[span],
                end: data.timestamps[data.len() - 1],
                score,
                actions_taken,
            });

            if let Some(goal) = &goal {
                if goal.eval(&GoalScope { score, episode })? != 0.0 {
                    info!(pod = %job.pod, episode, score, "Training goal reached");
                    break;
                }
            }
        }

        let path = self.commit(job, |dir| {
            agent.save(dir)?;
            ModelMetadata::new(agent.algorithm(), &job.pod, &job.flight, completed).write(dir)?;
            Ok(())
        })?;
        info!(pod = %job.pod, flight = %job.flight, path = %path.display(), "Training finished");
        Ok(path)
    }
}

/// A single path component derived from a user-supplied name.
fn path_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    match cleaned.as_str() {
        "" => "default".to_string(),
        s if s.starts_with('.') => format!("_{}", s),
        _ => cleaned,
    }
}

/// Delete uncommitted artifact directories under `models_root`. Only safe
/// while no training job is running.
pub fn remove_partial_artifacts(models_root: &Path) -> io::Result<usize> {
    let pods = match fs::read_dir(models_root) {
        Ok(pods) => pods,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for pod in pods {
        let pod = pod?;
        if !pod.file_type()?.is_dir() {
            continue;
        }
        for entry in fs::read_dir(pod.path())? {
            let entry = entry?;
            if entry.file_type()?.is_dir() && entry.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX) {
                fs::remove_dir_all(entry.path())?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorConfig, ConnectorManager, DataSource};
    use crate::data::{read_observations, DataManager, DataParam, FieldSpec};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn job(episodes: u32, goal: &str, algorithm: &str) -> TrainingJob {
        let fields = vec![
            FieldSpec { name: "price".into(), initializer: 0.0 },
            FieldSpec { name: "usd".into(), initializer: 100.0 },
        ];
        let rewards: BTreeMap<String, String> = [("buy", "price - prev.price"), ("hold", "0")]
            .iter()
            .map(|(a, r)| (a.to_string(), r.to_string()))
            .collect();
        let data = DataManager::new(
            DataParam::new(100, 1000, 20, 10, 0),
            fields,
            rewards,
            &BTreeMap::new(),
            BTreeMap::new(),
            Vec::new(),
        );
        data.merge(&read_observations("time,price\n100,1\n110,2\n120,3\n130,4\n140,5\n").unwrap())
            .unwrap();

        let connectors = ConnectorManager::from_datasources(
            &[DataSource {
                connector: ConnectorConfig {
                    name: "stateful".into(),
                    params: BTreeMap::new(),
                },
                actions: [("buy".to_string(), "usd -= price".to_string())].into_iter().collect(),
            }],
            &data.field_names(),
        );

        TrainingJob {
            pod: "trader".into(),
            algorithm: algorithm.into(),
            episodes,
            flight: "f1".into(),
            goal: goal.into(),
            data: Arc::new(data),
            connectors: Arc::new(connectors),
        }
    }

    fn run(trainer: &LocalTrainer, job: &TrainingJob) -> (anyhow::Result<PathBuf>, Vec<EpisodeReport>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = trainer.train(job, &EpisodeSink::new(tx));
        let mut reports = Vec::new();
        while let Ok(report) = rx.try_recv() {
            reports.push(report);
        }
        (result, reports)
    }

    #[test]
    fn test_train_commits_artifact() {
        let root = tempfile::tempdir().unwrap();
        let trainer = LocalTrainer::new(root.path());
        let (result, reports) = run(&trainer, &job(3, "", "dql"));

        let path = result.unwrap();
        assert_eq!(path, root.path().join("trader").join("f1"));
        assert!(path.join("meta.json").is_file());
        assert!(path.join("dql.json").is_file());
        assert!(!root.path().join("trader").join("f1.partial").exists());

        assert_eq!(reports.len(), 3);
        assert_eq!((reports[0].start, reports[0].end), (120, 140));
        assert_eq!(reports[0].actions_taken.values().sum::<u64>(), 3);

        let meta = ModelMetadata::read(&path).unwrap();
        assert_eq!(meta.algorithm, "dql");
        assert_eq!(meta.episodes, 3);
    }

    #[test]
    fn test_goal_stops_early() {
        let root = tempfile::tempdir().unwrap();
        let trainer = LocalTrainer::new(root.path());
        let (result, reports) = run(&trainer, &job(10, "episode >= 2", "vpg"));
        assert!(result.is_ok());
        assert_eq!(reports.len(), 2);
    }

    #[test]
    fn test_unknown_algorithm_fails() {
        let root = tempfile::tempdir().unwrap();
        let trainer = LocalTrainer::new(root.path());
        let (result, reports) = run(&trainer, &job(1, "", "ppo"));
        assert!(result.unwrap_err().to_string().contains("ppo"));
        assert!(reports.is_empty());
    }

    #[test]
    fn test_remove_partial_artifacts() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("trader").join("f1.partial")).unwrap();
        fs::create_dir_all(root.path().join("trader").join("f0")).unwrap();
        assert_eq!(remove_partial_artifacts(root.path()).unwrap(), 1);
        assert!(root.path().join("trader").join("f0").exists());
        assert_eq!(remove_partial_artifacts(&root.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn test_path_component() {
        assert_eq!(path_component("f1"), "f1");
        assert_eq!(path_component("../etc"), "_.._etc");
        assert_eq!(path_component(""), "default");
    }
}
