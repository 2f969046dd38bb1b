use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};

use dumbydraw_lib::client::OpenAiClient;
use dumbydraw_lib::config::Config;
use dumbydraw_lib::error::AppError;
use dumbydraw_lib::execution::ExecutionOptions;
use dumbydraw_lib::generation::GenerationRequest;
use dumbydraw_lib::state::AppState;
use dumbydraw_lib::tasks::types::TaskState;

#[derive(Parser)]
#[command(name = "dumbydraw", version, about = "Generate plotting code with a model and run it")]
struct Cli {
    /// Config file (defaults to ~/.dumbydraw_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask the model for plotting code and run what it returns
    Generate {
        query: String,
        #[arg(long)]
        model: Option<String>,
    },
    /// Run an existing script with the configured interpreter
    Run { file: PathBuf },
    /// Check the model connection with a fixed plotting request
    Check,
    /// Print the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn main() -> ExitCode {
    dumbydraw_lib::init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool, AppError> {
    let path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };

    match cli.command {
        Command::Config { init } => {
            let config = if init {
                Config::load_or_init(&path)?
            } else if path.exists() {
                Config::load(&path)?
            } else {
                Config::default()
            };
            let shown = config.with_env_overrides().redacted();
            let json = serde_json::to_string_pretty(&shown)
                .map_err(|e| AppError::Config(e.to_string()))?;
            println!("{json}");
            Ok(true)
        }
        Command::Generate { query, model } => {
            let config = Config::load_or_init(&path)?.with_env_overrides();
            let state = build_state(&config)?;
            let request = GenerationRequest {
                query,
                system_prompt: config.system_prompt.clone(),
                model: model.unwrap_or_else(|| config.model.clone()),
            };
            state.supervisor.submit_generation(request)?;
            Ok(drive(&state, config.poll_interval()) == Some(TaskState::Completed))
        }
        Command::Check => {
            let config = Config::load_or_init(&path)?.with_env_overrides();
            let state = build_state(&config)?;
            state
                .supervisor
                .submit_generation(GenerationRequest::connection_check(config.model.clone()))?;
            Ok(drive(&state, config.poll_interval()) == Some(TaskState::Completed))
        }
        Command::Run { file } => {
            let config = Config::load_or_init(&path)?.with_env_overrides();
            let code = std::fs::read_to_string(&file)?;
            let state = build_state(&config)?;
            state.supervisor.run_execution(code)?;
            Ok(drive(&state, config.poll_interval()) == Some(TaskState::Completed))
        }
    }
}

fn build_state(config: &Config) -> Result<AppState, AppError> {
    let client = OpenAiClient::from_config(config)?;
    Ok(AppState::new(
        Arc::new(client),
        ExecutionOptions::from_config(config),
    ))
}

/// Poll until nothing is running and nothing is left to print. Returns the
/// last observed state of the execution task, if one ran.
fn drive(state: &AppState, interval: Duration) -> Option<TaskState> {
    let mut last_execution = None;
    loop {
        let busy = state.supervisor.is_busy();
        if let Some(execution) = state.supervisor.execution_state() {
            last_execution = Some(execution);
        }

        let tick = state.tick();
        for line in &tick.lines {
            println!("{line}");
        }
        if !busy && tick.is_empty() && !state.supervisor.is_busy() {
            return last_execution;
        }
        thread::sleep(interval);
    }
}
