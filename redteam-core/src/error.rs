use thiserror::Error;

/// Error kinds for the attack-loop engine and its collaborators.
///
/// Most variants are recovered from locally (see each call site); only
/// `ProviderAbort` and `Configuration` are expected to unwind out of the
/// attack loop.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("attacker returned unparsable JSON: {0}")]
    AttackerParse(String),

    #[error("provider returned a transient error: {0}")]
    ProviderTransient(String),

    #[error("provider call aborted: {0}")]
    ProviderAbort(String),

    #[error("grader not found for plugin id: {0}")]
    GraderMissing(String),

    #[error("scorer returned unparsable JSON: {0}")]
    ScorerParse(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unblocking analyser unavailable, continuing without it")]
    UnblockingUnavailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
