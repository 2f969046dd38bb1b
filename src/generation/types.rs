use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_SYSTEM_PROMPT;

pub const CONNECTION_CHECK_QUERY: &str = "Plot a sine function";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub query: String,
    pub system_prompt: String,
    pub model: String,
}

impl GenerationRequest {
    /// Fixed request that exercises the endpoint and the runner end to end.
    /// Always uses the built-in prompt, whatever the config says.
    pub fn connection_check(model: impl Into<String>) -> Self {
        Self {
            query: CONNECTION_CHECK_QUERY.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    Created,
    /// Waiting on the remote model.
    Calling,
    /// Removing code fences from the response.
    Cleaning,
    Done,
}
