use serde::Serialize;

use crate::tasks::types::TaskId;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("failed to start {interpreter}: {source}")]
    ProcessSpawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("temporary file error: {0}")]
    TempFile(#[source] std::io::Error),

    #[error("execution {0} is still running")]
    ExecutionInProgress(TaskId),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Network(err.to_string())
    }
}

// Errors cross into the UI layer as plain messages.
impl Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
