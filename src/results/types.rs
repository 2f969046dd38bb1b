use serde::Serialize;

use crate::tasks::types::TaskId;

/// De-fenced code produced by one generation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedArtifact {
    pub task: TaskId,
    pub code: String,
}
