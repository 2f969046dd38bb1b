pub mod process;
pub mod types;

use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::process::ExitStatus;
use std::sync::mpsc::RecvTimeoutError;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tempfile::TempPath;

use crate::error::AppError;
use crate::log::{LogAggregator, LogSource};
use crate::tasks::types::{TaskId, TaskKind, TaskState};
use crate::tasks::TaskHandle;
pub use process::ProcessHandle;
pub use types::ExecutionOptions;

/// Upper bound on how long the worker goes without checking for cancellation.
const READ_TICK: Duration = Duration::from_millis(50);

pub struct ExecutionTask {
    handle: TaskHandle,
    worker: Option<JoinHandle<()>>,
}

struct Runner {
    handle: TaskHandle,
    code: String,
    options: ExecutionOptions,
    log: LogAggregator,
}

enum Outcome {
    Exited(ExitStatus),
    Stopped,
    TimedOut(Duration),
    Failed(AppError),
}

impl ExecutionTask {
    pub fn start(
        code: String,
        options: ExecutionOptions,
        log: &LogAggregator,
    ) -> Result<Self, AppError> {
        let handle = TaskHandle::new(TaskKind::Execution);
        let runner = Runner {
            handle: handle.clone(),
            code,
            options,
            log: log.handle(),
        };

        let worker = thread::Builder::new()
            .name(format!("execution-{}", handle.id()))
            .spawn(move || runner.run_guarded())?;

        tracing::info!(task = %handle.id(), "execution task started");
        Ok(Self {
            handle,
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> TaskId {
        self.handle.id()
    }

    pub fn state(&self) -> TaskState {
        self.handle.state()
    }

    pub fn is_active(&self) -> bool {
        self.handle.state().is_active()
    }

    /// Stop the run. The child is killed at the worker's next read tick.
    pub fn terminate(&self) -> bool {
        self.handle.cancel()
    }

    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!(task = %self.handle.id(), "execution worker panicked");
            }
        }
    }
}

impl Runner {
    fn run_guarded(self) {
        let handle = self.handle.clone();
        let log = self.log.handle();
        if panic::catch_unwind(AssertUnwindSafe(|| self.run())).is_err() {
            log.system("execution aborted unexpectedly");
            handle.transition(TaskState::Failed);
        }
    }

    fn run(self) {
        if !self.handle.transition(TaskState::Running) || self.handle.is_cancelled() {
            self.log.system("execution canceled");
            self.handle.transition(TaskState::Canceled);
            return;
        }
        self.run_script();
    }

    fn run_script(&self) {
        let script = match write_script(&self.code, &self.options.script_suffix) {
            Ok(script) => script,
            Err(err) => {
                self.log.system(format!("could not create script file: {err}"));
                self.handle.transition(TaskState::Failed);
                return;
            }
        };
        self.log
            .system(format!("script written to {}", script.display()));
        self.log.system(format!(
            "using interpreter {}",
            self.options.interpreter.display()
        ));

        let outcome = if self.handle.is_cancelled() {
            Outcome::Stopped
        } else {
            self.supervise(&script)
        };

        self.remove_script(script);
        self.report(outcome);
    }

    fn supervise(&self, script: &std::path::Path) -> Outcome {
        let mut process = match ProcessHandle::spawn(&self.options.interpreter, script) {
            Ok(process) => process,
            Err(err) => return Outcome::Failed(err),
        };
        self.log
            .system(format!("running in background (pid {})", process.pid()));
        let started = Instant::now();

        // Forward output until both streams hit EOF.
        loop {
            if let Some(outcome) = self.check_stop(&mut process, started) {
                return outcome;
            }
            match process.recv_output(READ_TICK) {
                Ok(chunk) => self.log.write(chunk.source, &chunk.text),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.log.flush(LogSource::Stdout);
        self.log.flush(LogSource::Stderr);

        // Streams are closed, but the process may still be running.
        loop {
            if let Some(outcome) = self.check_stop(&mut process, started) {
                return outcome;
            }
            match process.try_wait() {
                Ok(Some(status)) => return Outcome::Exited(status),
                Ok(None) => thread::sleep(READ_TICK),
                Err(err) => return Outcome::Failed(AppError::Io(err)),
            }
        }
    }

    fn check_stop(&self, process: &mut ProcessHandle, started: Instant) -> Option<Outcome> {
        if self.handle.is_cancelled() {
            process.terminate();
            return Some(Outcome::Stopped);
        }
        if let Some(limit) = self.options.timeout {
            if started.elapsed() >= limit {
                process.terminate();
                return Some(Outcome::TimedOut(limit));
            }
        }
        None
    }

    fn report(&self, outcome: Outcome) {
        match outcome {
            Outcome::Exited(status) if status.success() => {
                let completed = self
                    .handle
                    .complete_with(|| self.log.system("execution finished successfully"));
                if !completed {
                    self.finish_stopped();
                }
            }
            Outcome::Exited(status) => {
                match status.code() {
                    Some(code) => self
                        .log
                        .system(format!("execution failed with exit code {code}")),
                    None => self.log.system("execution ended by a signal"),
                }
                self.handle.transition(TaskState::Failed);
            }
            Outcome::Stopped => self.finish_stopped(),
            Outcome::TimedOut(limit) => {
                self.log.system(format!(
                    "execution exceeded the {}s time limit and was stopped",
                    limit.as_secs_f64()
                ));
                self.handle.transition(TaskState::Failed);
            }
            Outcome::Failed(err) => {
                tracing::warn!(task = %self.handle.id(), error = %err, "execution failed");
                self.log.system(format!("could not run script: {err}"));
                self.handle.transition(TaskState::Failed);
            }
        }
    }

    fn finish_stopped(&self) {
        self.log.system("execution stopped");
        self.handle.transition(TaskState::Canceled);
    }

    fn remove_script(&self, script: TempPath) {
        let path = script.to_path_buf();
        match script.close() {
            Ok(()) => tracing::debug!(path = %path.display(), "script removed"),
            Err(err) => self
                .log
                .warn(format!("could not remove {}: {err}", path.display())),
        }
    }
}

fn write_script(code: &str, suffix: &str) -> Result<TempPath, AppError> {
    let mut file = tempfile::Builder::new()
        .prefix("dumbydraw_")
        .suffix(suffix)
        .tempfile()
        .map_err(AppError::TempFile)?;
    file.write_all(code.as_bytes()).map_err(AppError::TempFile)?;
    file.flush().map_err(AppError::TempFile)?;
    Ok(file.into_temp_path())
}
