pub mod fence;
pub mod types;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::client::ChatClient;
use crate::error::AppError;
use crate::log::LogAggregator;
use crate::results::{GeneratedArtifact, ResultSender};
use crate::tasks::types::{TaskId, TaskKind, TaskState};
use crate::tasks::TaskHandle;
pub use fence::strip_code_fences;
pub use types::{GenerationPhase, GenerationRequest, CONNECTION_CHECK_QUERY};

/// One model call running on its own worker thread.
///
/// Cancellation is cooperative: the flag is checked before the call, after
/// it returns, and at publication. A canceled task publishes nothing.
pub struct GenerationTask {
    handle: TaskHandle,
    phase: Arc<Mutex<GenerationPhase>>,
    worker: Option<JoinHandle<()>>,
}

struct Worker {
    handle: TaskHandle,
    phase: Arc<Mutex<GenerationPhase>>,
    request: GenerationRequest,
    client: Arc<dyn ChatClient>,
    log: LogAggregator,
    results: ResultSender,
}

impl GenerationTask {
    pub fn start(
        request: GenerationRequest,
        client: Arc<dyn ChatClient>,
        log: &LogAggregator,
        results: ResultSender,
    ) -> Result<Self, AppError> {
        let handle = TaskHandle::new(TaskKind::Generation);
        let phase = Arc::new(Mutex::new(GenerationPhase::Created));
        let worker = Worker {
            handle: handle.clone(),
            phase: Arc::clone(&phase),
            request,
            client,
            log: log.handle(),
            results,
        };

        let worker = thread::Builder::new()
            .name(format!("generation-{}", handle.id()))
            .spawn(move || worker.run_guarded())?;

        tracing::info!(task = %handle.id(), "generation task started");
        Ok(Self {
            handle,
            phase,
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> TaskId {
        self.handle.id()
    }

    pub fn state(&self) -> TaskState {
        self.handle.state()
    }

    pub fn phase(&self) -> GenerationPhase {
        *self.phase.lock()
    }

    pub fn is_active(&self) -> bool {
        self.handle.state().is_active()
    }

    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    /// Block until the worker thread exits.
    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!(task = %self.handle.id(), "generation worker panicked");
            }
        }
    }
}

impl Worker {
    fn run_guarded(self) {
        let handle = self.handle.clone();
        let log = self.log.handle();
        if panic::catch_unwind(AssertUnwindSafe(|| self.run())).is_err() {
            log.system("generation aborted unexpectedly");
            handle.transition(TaskState::Failed);
        }
    }

    fn run(self) {
        if !self.handle.transition(TaskState::Running) || self.handle.is_cancelled() {
            self.finish_canceled();
            return;
        }
        self.set_phase(GenerationPhase::Calling);
        self.log.system(format!("calling model {}", self.request.model));

        let response = self.client.generate(&self.request, &self.log);

        if self.handle.is_cancelled() {
            self.finish_canceled();
            return;
        }
        let text = match response {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(task = %self.handle.id(), error = %err, "generation failed");
                self.log.system(format!("generation failed: {err}"));
                self.set_phase(GenerationPhase::Done);
                self.handle.transition(TaskState::Failed);
                return;
            }
        };

        self.set_phase(GenerationPhase::Cleaning);
        self.log.system("response received, extracting code");
        let artifact = GeneratedArtifact {
            task: self.handle.id(),
            code: strip_code_fences(&text),
        };

        let published = self.handle.complete_with(|| {
            self.results.publish(artifact);
            self.log.system("generated code handed to runner");
            self.set_phase(GenerationPhase::Done);
        });
        if !published {
            self.finish_canceled();
        }
    }

    // Log lines go out before the terminal state so a consumer that sees the
    // task finish has already been given its last line.
    fn finish_canceled(&self) {
        self.log.system("generation canceled");
        self.set_phase(GenerationPhase::Done);
        self.handle.transition(TaskState::Canceled);
        tracing::info!(task = %self.handle.id(), "generation canceled");
    }

    fn set_phase(&self, phase: GenerationPhase) {
        *self.phase.lock() = phase;
    }
}
