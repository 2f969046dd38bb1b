use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub interpreter: PathBuf,
    pub script_suffix: String,
    /// Kill the process once it has run this long. `None` means no limit.
    pub timeout: Option<Duration>,
}

impl ExecutionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            script_suffix: config.script_suffix.clone(),
            timeout: config.execution_timeout(),
        }
    }
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
