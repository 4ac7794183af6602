use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors originating from the sandbox/container layer specifically.
///
/// Kept as its own enum (rather than flattened into [`EngineError`]) so
/// callers that only care about sandbox-layer failures can match on it
/// without enumerating the orchestrator-level cases too.
#[derive(Error, Debug)]
pub enum SandboxErr {
    /// The container runtime could not be reached at all (socket missing,
    /// daemon down, permission denied on the socket).
    #[error("container runtime unreachable: {0}")]
    RuntimeUnreachable(String),

    /// `bollard` returned an error while creating, starting, attaching to,
    /// or inspecting a container.
    #[error("container runtime error: {0}")]
    Runtime(#[from] bollard::errors::Error),

    /// The wall-clock deadline elapsed before the container exited.
    #[error("execution exceeded wall-clock timeout")]
    Timeout,

    /// The container's memory usage reached the configured cap.
    #[error("execution exceeded memory limit")]
    MemoryLimitExceeded,

    /// The container exited with a code produced by the given signal.
    #[error("container was killed by signal {0}")]
    Signal(i32),

    /// `codex-linux-sandbox`-equivalent: supervisor attempted to stop/remove
    /// a container that was never found in the live registry.
    #[error("no live sandbox found for execution id")]
    NotFound,
}

#[derive(Error, Debug)]
pub enum EngineError {
    /// Request failed static validation before the Screener even ran
    /// (size caps, NUL bytes, unknown language, out-of-range limits).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Source was rejected by the Screener. Carries the human-readable
    /// violation reasons surfaced to the caller.
    #[error("source rejected: {0:?}")]
    Rejected(Vec<String>),

    /// Workspace Manager failed to create or populate the per-execution
    /// directory.
    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    /// Sandbox-layer failure, see [`SandboxErr`].
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxErr),

    /// An output-reader task panicked or was cancelled.
    #[error(transparent)]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Caller-supplied cancellation fired before the internal deadline did.
    #[error("execution aborted externally: {0}")]
    Aborted(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// True when this error should be surfaced to the caller as
    /// `ExecutionStatus::Timeout` rather than `InternalError`.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Sandbox(SandboxErr::Timeout))
    }
}
