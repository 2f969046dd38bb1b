use std::sync::Arc;

use parking_lot::Mutex;

use crate::client::ChatClient;
use crate::error::AppError;
use crate::execution::{ExecutionOptions, ExecutionTask};
use crate::generation::{GenerationRequest, GenerationTask};
use crate::log::LogAggregator;
use crate::results::ResultSender;
use crate::tasks::types::{TaskId, TaskState};

// At most one generation and one execution are current. A new generation
// replaces the current one; a new execution is refused while one is active.
pub struct TaskSupervisor {
    client: Arc<dyn ChatClient>,
    options: ExecutionOptions,
    log: LogAggregator,
    results: ResultSender,
    generation: Mutex<Option<GenerationTask>>,
    // Replaced generations, kept until they finish and get reaped.
    retired: Mutex<Vec<GenerationTask>>,
    execution: Mutex<Option<ExecutionTask>>,
}

impl TaskSupervisor {
    pub fn new(
        client: Arc<dyn ChatClient>,
        options: ExecutionOptions,
        log: &LogAggregator,
        results: ResultSender,
    ) -> Self {
        Self {
            client,
            options,
            log: log.handle(),
            results,
            generation: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
            execution: Mutex::new(None),
        }
    }

    /// Start a generation, canceling the active one first.
    pub fn submit_generation(&self, request: GenerationRequest) -> Result<TaskId, AppError> {
        let mut slot = self.generation.lock();
        if let Some(previous) = slot.take() {
            if previous.cancel() {
                tracing::info!(task = %previous.id(), "replacing active generation");
                self.log.system("previous generation canceled, starting a new one");
            }
            self.retired.lock().push(previous);
        }

        let task = GenerationTask::start(
            request,
            Arc::clone(&self.client),
            &self.log,
            self.results.clone(),
        )?;
        let id = task.id();
        *slot = Some(task);
        Ok(id)
    }

    /// Run `code` unless another execution is still active.
    pub fn run_execution(&self, code: String) -> Result<TaskId, AppError> {
        let mut slot = self.execution.lock();
        if let Some(active) = slot.as_ref().filter(|task| task.is_active()) {
            let id = active.id();
            self.log
                .warn("code is already running; stop it before starting another run");
            tracing::debug!(task = %id, "execution rejected");
            return Err(AppError::ExecutionInProgress(id));
        }

        let task = ExecutionTask::start(code, self.options.clone(), &self.log)?;
        let id = task.id();
        *slot = Some(task);
        Ok(id)
    }

    pub fn stop_generation(&self) -> bool {
        let stopped = self
            .generation
            .lock()
            .as_ref()
            .is_some_and(|task| task.cancel());
        if stopped {
            self.log.system("stopping generation");
        }
        stopped
    }

    pub fn stop_execution(&self) -> bool {
        self.execution
            .lock()
            .as_ref()
            .is_some_and(|task| task.terminate())
    }

    /// Cancel whatever is active. Returns false (and logs nothing) when idle.
    pub fn stop_all(&self) -> bool {
        let generation = self.stop_generation();
        let execution = self.stop_execution();
        generation || execution
    }

    pub fn generation_state(&self) -> Option<TaskState> {
        self.generation.lock().as_ref().map(|task| task.state())
    }

    pub fn execution_state(&self) -> Option<TaskState> {
        self.execution.lock().as_ref().map(|task| task.state())
    }

    /// State of the current task with `id`, or of a replaced generation that
    /// has not been reaped yet.
    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        if let Some(task) = self.generation.lock().as_ref().filter(|t| t.id() == id) {
            return Some(task.state());
        }
        if let Some(task) = self.execution.lock().as_ref().filter(|t| t.id() == id) {
            return Some(task.state());
        }
        self.retired
            .lock()
            .iter()
            .find(|task| task.id() == id)
            .map(|task| task.state())
    }

    pub fn is_busy(&self) -> bool {
        let generating = self
            .generation
            .lock()
            .as_ref()
            .is_some_and(|task| task.is_active());
        let executing = self
            .execution
            .lock()
            .as_ref()
            .is_some_and(|task| task.is_active());
        generating || executing
    }

    /// Drop references to tasks that reached a terminal state.
    pub fn reap_finished(&self) {
        let generation = take_finished(&self.generation, GenerationTask::is_active);
        if let Some(task) = generation {
            task.join();
        }
        let execution = take_finished(&self.execution, ExecutionTask::is_active);
        if let Some(task) = execution {
            task.join();
        }

        let finished: Vec<GenerationTask> = {
            let mut retired = self.retired.lock();
            let (finished, live): (Vec<_>, Vec<_>) = std::mem::take(&mut *retired)
                .into_iter()
                .partition(|task| !task.is_active());
            *retired = live;
            finished
        };
        for task in finished {
            task.join();
        }
    }
}

fn take_finished<T>(slot: &Mutex<Option<T>>, is_active: fn(&T) -> bool) -> Option<T> {
    let mut slot = slot.lock();
    if slot.as_ref().is_some_and(|task| !is_active(task)) {
        slot.take()
    } else {
        None
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.stop_all();
        // The runner kills and reaps the child within one read tick. Generation
        // workers are left detached: a remote call has no upper bound.
        if let Some(task) = self.execution.get_mut().take() {
            task.join();
        }
    }
}
