pub mod openai;
pub mod types;

use crate::error::AppError;
use crate::generation::GenerationRequest;
use crate::log::LogAggregator;

pub use openai::OpenAiClient;

/// Remote model that turns a request into the full response text.
///
/// Called from a generation worker thread and allowed to block. `log` is the
/// calling task's handle; progress written there shows up in the live log.
pub trait ChatClient: Send + Sync {
    fn generate(&self, request: &GenerationRequest, log: &LogAggregator)
        -> Result<String, AppError>;
}
