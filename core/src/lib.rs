//! Core engine for running untrusted, short-lived programs inside
//! disposable, network-isolated containers and returning their
//! stdout/stderr/exit status under strict resource limits.

pub mod config;
pub mod error;
pub mod normalizer;
pub mod orchestrator;
pub mod registry;
pub mod sandbox;
pub mod screener;
pub mod types;
pub mod workspace;

pub use config::EngineConfig;
pub use error::{EngineError, Result, SandboxErr};
pub use orchestrator::{Health, InvocationContext, KillOutcome, MetadataSink, Orchestrator};
pub use registry::{LanguageRegistry, LanguageSpec};
pub use sandbox::SandboxSupervisor;
pub use types::{
    ExecutionId, ExecutionRequest, ExecutionResult, ExecutionStatus, LanguageId, LimitsOverride,
};
