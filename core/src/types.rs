use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identifier for one execution, unique process-wide. Format:
/// `exec_<monotonic_ts>_<16 hex random>`. Appears in every log line and
/// event emitted about the execution it names.
pub type ExecutionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageId {
    Python,
    Javascript,
    Cpp,
    Java,
}

impl LanguageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageId::Python => "python",
            LanguageId::Javascript => "javascript",
            LanguageId::Cpp => "cpp",
            LanguageId::Java => "java",
        }
    }
}

impl std::fmt::Display for LanguageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller-supplied override of a subset of the resolved limits. Only
/// bounded overrides are honored; out-of-range values are clipped by the
/// orchestrator rather than rejected outright.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsOverride {
    pub wall_timeout_ms: Option<u64>,
    pub memory_bytes: Option<u64>,
    pub cpu_fraction: Option<f64>,
}

pub const MIN_WALL_TIMEOUT_MS: u64 = 1_000;
pub const MAX_WALL_TIMEOUT_MS: u64 = 60_000;

impl LimitsOverride {
    /// Clip `wall_timeout_ms` into the allowed [1s, 60s] range, if present.
    pub fn clipped_wall_timeout_ms(&self) -> Option<u64> {
        self.wall_timeout_ms
            .map(|ms| ms.clamp(MIN_WALL_TIMEOUT_MS, MAX_WALL_TIMEOUT_MS))
    }
}

/// Request to execute one source program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: LanguageId,
    pub source: String,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub limits: Option<LimitsOverride>,
}

pub const MAX_SOURCE_BYTES: usize = 50_000;
pub const MAX_STDIN_BYTES: usize = 10_000;
pub const OUTPUT_TRUNCATION_MARKER: &str = "\n... (output truncated)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    RuntimeError,
    CompilationError,
    Timeout,
    MemoryLimitExceeded,
    ValidationRejected,
    InternalError,
}

/// Final, caller-facing record of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub wall_time_ms: u64,
    pub peak_memory_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<String>>,
}

impl ExecutionResult {
    pub fn rejected(execution_id: ExecutionId, violations: Vec<String>) -> Self {
        Self {
            execution_id,
            status: ExecutionStatus::ValidationRejected,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            wall_time_ms: 0,
            peak_memory_bytes: None,
            violations: Some(violations),
        }
    }

    pub fn internal_error(execution_id: ExecutionId, wall_time_ms: u64, message: String) -> Self {
        Self {
            execution_id,
            status: ExecutionStatus::InternalError,
            stdout: String::new(),
            stderr: message,
            exit_code: -1,
            wall_time_ms,
            peak_memory_bytes: None,
            violations: None,
        }
    }
}

/// Per-execution host directory bind-mounted into the sandbox.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub id: ExecutionId,
    pub dir: PathBuf,
    pub source_path: PathBuf,
    pub stdin_path: Option<PathBuf>,
}

/// Resolved limits after merging caller overrides with the language
/// spec's defaults and clipping to the allowed ranges.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedLimits {
    pub wall_timeout_ms: u64,
    pub memory_bytes: u64,
    pub cpu_fraction: f64,
}

/// Environment variables forwarded into the sandboxed process. Kept as a
/// plain map rather than `Vec<String>` so callers building requests
/// programmatically don't need to hand-format `KEY=VALUE` pairs.
pub type EnvMap = HashMap<String, String>;
