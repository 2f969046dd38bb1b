//! End-to-end behavior of the task core, driven the way the UI drives it:
//! submit through the supervisor, then tick until idle.

#![cfg(unix)]

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{
    drive_until_idle, process_alive, request, sh, wait_for_line, wait_until, CannedClient,
    GatedClient,
};
use dumbydraw_lib::error::AppError;
use dumbydraw_lib::generation::{GenerationRequest, CONNECTION_CHECK_QUERY};
use dumbydraw_lib::log::LogSource;
use dumbydraw_lib::state::AppState;
use dumbydraw_lib::tasks::types::TaskState;

const LONG_RUN: &str = "echo started\nexec sleep 30\n";

#[test]
fn generated_code_runs_to_success() {
    let state = AppState::new(Arc::new(CannedClient::ok("```sh\necho hi\n```")), sh());
    state.supervisor.submit_generation(request("say hi")).unwrap();

    let lines = drive_until_idle(&state);
    assert!(lines
        .iter()
        .any(|l| l.source == LogSource::Stdout && l.text == "hi"));
    assert_eq!(
        lines.last().map(|l| l.text.as_str()),
        Some("execution finished successfully")
    );
}

#[test]
fn generated_code_that_fails_reports_stderr_and_exit_code() {
    let code = "```sh\necho oops >&2\nexit 2\n```";
    let state = AppState::new(Arc::new(CannedClient::ok(code)), sh());
    state.supervisor.submit_generation(request("fail")).unwrap();

    let lines = drive_until_idle(&state);
    assert!(lines
        .iter()
        .any(|l| l.source == LogSource::Stderr && l.text == "oops"));
    assert!(lines
        .iter()
        .any(|l| l.text == "execution failed with exit code 2"));
}

#[test]
fn failed_generation_is_logged_and_runs_nothing() {
    let state = AppState::new(
        Arc::new(CannedClient::failing("connection refused")),
        sh(),
    );
    state.supervisor.submit_generation(request("anything")).unwrap();

    let lines = drive_until_idle(&state);
    assert!(lines
        .iter()
        .any(|l| l.text.contains("generation failed") && l.text.contains("connection refused")));
    assert!(!lines.iter().any(|l| l.text.starts_with("script written")));
}

#[test]
fn new_generation_replaces_active_one() {
    let (client, gate) = GatedClient::new();
    let state = AppState::new(Arc::new(client), sh());

    let first = state.supervisor.submit_generation(request("A")).unwrap();
    assert_eq!(gate.entered.recv_timeout(Duration::from_secs(5)).unwrap(), "A");
    let second = state.supervisor.submit_generation(request("B")).unwrap();
    assert_ne!(first, second);

    // Calls are answered in order: A gets the first response.
    gate.release.send("echo from-a".into()).unwrap();
    assert_eq!(gate.entered.recv_timeout(Duration::from_secs(5)).unwrap(), "B");
    gate.release.send("echo from-b".into()).unwrap();

    wait_until("replaced generation to finish", || {
        state.supervisor.task_state(first) == Some(TaskState::Canceled)
    });
    let lines = drive_until_idle(&state);
    assert_eq!(state.supervisor.task_state(first), None);

    let stdout: Vec<_> = lines
        .iter()
        .filter(|l| l.source == LogSource::Stdout)
        .map(|l| l.text.as_str())
        .collect();
    assert_eq!(stdout, ["from-b"]);
    assert_eq!(
        lines
            .iter()
            .filter(|l| l.text == "generation canceled")
            .count(),
        1
    );
}

#[test]
fn second_execution_is_rejected_while_first_runs() {
    let state = AppState::new(Arc::new(CannedClient::ok("")), sh());
    let first = state.supervisor.run_execution(LONG_RUN.into()).unwrap();
    let mut seen = Vec::new();
    wait_for_line(&state.log, &mut seen, "started");

    let err = state
        .supervisor
        .run_execution("echo second\n".into())
        .unwrap_err();
    assert!(matches!(err, AppError::ExecutionInProgress(id) if id == first));

    let warnings: Vec<_> = state
        .log
        .drain()
        .into_iter()
        .filter(|l| l.text.starts_with("warning:"))
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].source, LogSource::System);
    assert_eq!(state.supervisor.execution_state(), Some(TaskState::Running));

    assert!(state.supervisor.stop_all());
    wait_until("execution to stop", || {
        state.supervisor.execution_state() == Some(TaskState::Canceled)
    });
    let lines = drive_until_idle(&state);
    assert_eq!(lines.last().map(|l| l.text.as_str()), Some("execution stopped"));
    assert!(!lines.iter().any(|l| l.text == "second"));
}

#[test]
fn artifact_arriving_during_a_run_is_rejected() {
    let state = AppState::new(Arc::new(CannedClient::ok("echo late")), sh());
    state.supervisor.run_execution(LONG_RUN.into()).unwrap();
    let mut seen = Vec::new();
    wait_for_line(&state.log, &mut seen, "started");

    state.supervisor.submit_generation(request("late")).unwrap();
    let mut tick = state.tick();
    wait_until("artifact", || {
        if tick.artifact.is_none() {
            tick = state.tick();
        }
        tick.artifact.is_some()
    });
    assert!(tick.started.is_none());
    assert_eq!(tick.artifact.as_ref().map(|a| a.code.as_str()), Some("echo late"));

    state.supervisor.stop_all();
    let lines = drive_until_idle(&state);
    assert!(!lines.iter().any(|l| l.text == "late"));
}

#[test]
fn stop_all_cancels_generation_in_flight() {
    let (client, gate) = GatedClient::new();
    let state = AppState::new(Arc::new(client), sh());
    state.supervisor.submit_generation(request("slow")).unwrap();
    gate.entered.recv_timeout(Duration::from_secs(5)).unwrap();

    assert!(state.supervisor.stop_all());
    assert_eq!(state.supervisor.generation_state(), Some(TaskState::Canceling));
    gate.release.send("echo too-late".into()).unwrap();

    let lines = drive_until_idle(&state);
    assert!(lines.iter().any(|l| l.text == "stopping generation"));
    assert!(lines.iter().any(|l| l.text == "generation canceled"));
    assert!(!lines.iter().any(|l| l.text.starts_with("script written")));
}

#[test]
fn stop_all_when_idle_is_a_no_op() {
    let state = AppState::new(Arc::new(CannedClient::ok("")), sh());
    assert!(!state.supervisor.stop_all());
    assert!(!state.supervisor.stop_all());
    assert!(state.tick().is_empty());
}

#[test]
fn finished_tasks_are_released_after_a_tick() {
    let state = AppState::new(Arc::new(CannedClient::ok("")), sh());
    state.supervisor.run_execution("echo quick\n".into()).unwrap();
    wait_until("execution to finish", || {
        state
            .supervisor
            .execution_state()
            .is_some_and(|s| s.is_terminal())
    });
    state.tick();
    assert_eq!(state.supervisor.execution_state(), None);

    // The slot is free again.
    state.supervisor.run_execution("echo again\n".into()).unwrap();
    let lines = drive_until_idle(&state);
    assert!(lines.iter().any(|l| l.text == "again"));
}

#[test]
fn dropping_state_stops_child_and_removes_script() {
    let state = AppState::new(Arc::new(CannedClient::ok("")), sh());
    state.supervisor.run_execution(LONG_RUN.into()).unwrap();
    let mut seen = Vec::new();
    wait_for_line(&state.log, &mut seen, "started");

    let pid: u32 = seen
        .iter()
        .find_map(|l| l.text.strip_prefix("running in background (pid "))
        .and_then(|rest| rest.strip_suffix(')'))
        .and_then(|pid| pid.parse().ok())
        .unwrap();
    let script = seen
        .iter()
        .find_map(|l| l.text.strip_prefix("script written to "))
        .map(PathBuf::from)
        .unwrap();
    assert!(process_alive(pid));

    drop(state);

    assert!(!process_alive(pid), "child {pid} outlived the supervisor");
    assert!(!script.exists());
}

#[test]
fn connection_check_runs_through_the_pipeline() {
    let (client, gate) = GatedClient::new();
    let state = AppState::new(Arc::new(client), sh());
    state
        .supervisor
        .submit_generation(GenerationRequest::connection_check("test-model"))
        .unwrap();

    assert_eq!(
        gate.entered.recv_timeout(Duration::from_secs(5)).unwrap(),
        CONNECTION_CHECK_QUERY
    );
    gate.release.send("```sh\necho sine\n```".into()).unwrap();

    let lines = drive_until_idle(&state);
    assert!(lines.iter().any(|l| l.text == "sine"));
    assert_eq!(
        lines.last().map(|l| l.text.as_str()),
        Some("execution finished successfully")
    );
}
