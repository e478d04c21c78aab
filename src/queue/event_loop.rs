use super::{Command, CommandKind, CommandReceiver};
use crate::connector::ConnectorManager;
use crate::data::{read_observations, DataManager, DataParam, DEFAULT_MAX_FILLED_ROWS};
use crate::error::{panic_message, Result};
use crate::registry::{Pod, PodRegistry};
use crate::service::messages::{AddDataRequest, InitRequest};
use crate::shutdown::ShutdownListener;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What happened to one command, for observers.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub kind: CommandKind,
    pub pod: String,
    /// `Err` carries the logged failure
    pub result: std::result::Result<(), String>,
}

/// Sole consumer of the command queue.
///
/// Commands are applied one at a time in enqueue order. A failing or
/// panicking command is logged and the loop moves on.
pub struct EventLoop {
    receiver: CommandReceiver,
    pods: Arc<PodRegistry>,
    observer: Option<mpsc::UnboundedSender<CommandOutcome>>,
    max_filled_rows: usize,
}

impl EventLoop {
    pub fn new(receiver: CommandReceiver, pods: Arc<PodRegistry>) -> Self {
        Self {
            receiver,
            pods,
            observer: None,
            max_filled_rows: DEFAULT_MAX_FILLED_ROWS,
        }
    }

    /// Row limit given to every pod this loop initializes
    pub fn with_max_filled_rows(mut self, rows: usize) -> Self {
        self.max_filled_rows = rows;
        self
    }

    /// Report every processed command on `observer`
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<CommandOutcome>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Drain the queue until shutdown or until every sender is gone.
    pub async fn run(mut self, mut shutdown: ShutdownListener) {
        info!("Event loop started");
        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    debug!("Event loop received shutdown");
                    break;
                }
                command = self.receiver.recv() => match command {
                    Some(command) => self.process(command),
                    None => break,
                },
            }
        }
        self.receiver.close();
        info!("Event loop stopped");
    }

    fn process(&self, command: Command) {
        let kind = command.kind();
        let pod = command.pod().to_string();

        let result = match catch_unwind(AssertUnwindSafe(|| self.apply(command))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(command = %kind, pod = %pod, error = %e, "Command failed");
                Err(e.to_string())
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!(command = %kind, pod = %pod, panic = %msg, "Command panicked");
                Err(msg)
            }
        };

        if let Some(observer) = &self.observer {
            let _ = observer.send(CommandOutcome { kind, pod, result });
        }
    }

    fn apply(&self, command: Command) -> Result<()> {
        match command {
            Command::Init(req) => self.init(req),
            Command::AddData(req) => self.add_data(&req),
        }
    }

    fn init(&self, req: InitRequest) -> Result<()> {
        let param = DataParam::new(
            req.epoch_time,
            req.period,
            req.interval,
            req.granularity,
            chrono::Utc::now().timestamp(),
        );
        let field_names: Vec<String> = req.fields.iter().map(|f| f.name.clone()).collect();
        let connectors = ConnectorManager::from_datasources(&req.datasources, &field_names);
        let data = DataManager::new(
            param,
            req.fields,
            req.actions,
            &req.actions_order,
            req.external_reward_funcs,
            req.laws,
        )
        .with_max_filled_rows(self.max_filled_rows);

        info!(
            pod = %req.pod,
            fields = field_names.len(),
            actions = data.action_names().len(),
            laws = data.laws().len(),
            connectors = connectors.len(),
            epoch_time = param.epoch_time,
            "Initialized pod"
        );
        if self.pods.insert(Pod::new(req.pod.clone(), data, connectors)).is_some() {
            debug!(pod = %req.pod, "Replaced existing pod");
        }
        Ok(())
    }

    fn add_data(&self, req: &AddDataRequest) -> Result<()> {
        let pod = self.pods.get(&req.pod)?;
        let observations = read_observations(&req.csv_data)?;
        pod.data().merge(&observations)?;
        debug!(
            pod = %req.pod,
            rows = observations.rows.len(),
            filled = pod.data().filled_len(),
            "Merged data"
        );
        Ok(())
    }
}
