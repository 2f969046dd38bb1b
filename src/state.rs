use std::sync::Arc;

use crate::client::ChatClient;
use crate::error::AppError;
use crate::execution::ExecutionOptions;
use crate::log::{LogAggregator, LogLine};
use crate::results::{GeneratedArtifact, ResultChannel};
use crate::supervisor::TaskSupervisor;
use crate::tasks::types::TaskId;

/// Consumer side of the core: owns the queues and the supervisor.
///
/// Only one thread should call [`AppState::tick`]; producers live on the
/// task worker threads.
pub struct AppState {
    pub log: LogAggregator,
    pub results: ResultChannel,
    pub supervisor: TaskSupervisor,
}

#[derive(Debug, Default)]
pub struct Tick {
    pub lines: Vec<LogLine>,
    /// Code received this tick; the UI shows it in the editor.
    pub artifact: Option<GeneratedArtifact>,
    /// Execution started for that artifact.
    pub started: Option<TaskId>,
}

impl Tick {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.artifact.is_none()
    }
}

impl AppState {
    pub fn new(client: Arc<dyn ChatClient>, options: ExecutionOptions) -> Self {
        let log = LogAggregator::new();
        let results = ResultChannel::new();
        let supervisor = TaskSupervisor::new(client, options, &log, results.sender());
        Self {
            log,
            results,
            supervisor,
        }
    }

    /// One poll cycle: hand any finished artifact to the runner, then drain the log.
    pub fn tick(&self) -> Tick {
        let mut tick = Tick::default();
        if let Some(artifact) = self.results.poll() {
            match self.supervisor.run_execution(artifact.code.clone()) {
                Ok(id) => tick.started = Some(id),
                // Already reported as a warning line.
                Err(AppError::ExecutionInProgress(_)) => {}
                Err(err) => self.log.system(format!("could not start execution: {err}")),
            }
            tick.artifact = Some(artifact);
        }
        self.supervisor.reap_finished();
        tick.lines = self.log.drain();
        tick
    }
}
