//! Shared fakes for the supervisor tests.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use dumbydraw_lib::client::ChatClient;
use dumbydraw_lib::error::AppError;
use dumbydraw_lib::execution::ExecutionOptions;
use dumbydraw_lib::generation::GenerationRequest;
use dumbydraw_lib::log::{LogAggregator, LogLine};
use dumbydraw_lib::state::AppState;

/// Client that answers every call with the same text, immediately.
pub struct CannedClient {
    response: Result<String, String>,
}

impl CannedClient {
    pub fn ok(text: &str) -> Self {
        Self {
            response: Ok(text.to_string()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
        }
    }
}

impl ChatClient for CannedClient {
    fn generate(
        &self,
        _request: &GenerationRequest,
        _log: &LogAggregator,
    ) -> Result<String, AppError> {
        self.response.clone().map_err(AppError::Network)
    }
}

/// Client whose calls block until the test releases them, one response per call.
pub struct GatedClient {
    entered: Mutex<Sender<String>>,
    release: Mutex<Receiver<String>>,
}

#[allow(dead_code)]
pub struct Gate {
    pub entered: Receiver<String>,
    pub release: Sender<String>,
}

impl GatedClient {
    #[allow(dead_code)]
    pub fn new() -> (Self, Gate) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let client = Self {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        (
            client,
            Gate {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }
}

impl ChatClient for GatedClient {
    fn generate(
        &self,
        request: &GenerationRequest,
        _log: &LogAggregator,
    ) -> Result<String, AppError> {
        let _ = self.entered.lock().send(request.query.clone());
        self.release
            .lock()
            .recv()
            .map_err(|_| AppError::Network("gate closed".into()))
    }
}

pub fn sh() -> ExecutionOptions {
    ExecutionOptions {
        interpreter: PathBuf::from("sh"),
        script_suffix: ".sh".into(),
        timeout: None,
    }
}

pub fn request(query: &str) -> GenerationRequest {
    GenerationRequest {
        query: query.into(),
        system_prompt: "reply with a shell script".into(),
        model: "test-model".into(),
    }
}

/// Tick like the UI timer does until nothing is running and nothing is left.
#[allow(dead_code)]
pub fn drive_until_idle(state: &AppState) -> Vec<LogLine> {
    let deadline = Instant::now() + Duration::from_secs(15);
    let mut lines = Vec::new();
    loop {
        assert!(Instant::now() < deadline, "core did not go idle: {lines:?}");
        let busy = state.supervisor.is_busy();
        let tick = state.tick();
        let empty = tick.is_empty();
        lines.extend(tick.lines);
        if !busy && empty && !state.supervisor.is_busy() {
            return lines;
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// Drain into `seen` until a line containing `needle` shows up.
#[allow(dead_code)]
pub fn wait_for_line(log: &LogAggregator, seen: &mut Vec<LogLine>, needle: &str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !seen.iter().any(|l| l.text.contains(needle)) {
        assert!(Instant::now() < deadline, "no line containing {needle:?} in {seen:?}");
        seen.extend(log.drain());
        thread::sleep(Duration::from_millis(10));
    }
}

#[allow(dead_code)]
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

/// Whether a process with `pid` still exists, via `kill -0`.
#[allow(dead_code)]
pub fn process_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}
