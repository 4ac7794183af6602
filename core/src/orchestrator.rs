//! Execution Orchestrator — the public entry point tying together the
//! registry, screener, workspace manager, sandbox supervisor, and
//! normalizer into one `execute()` call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::RngCore;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::normalizer;
use crate::registry::LanguageRegistry;
use crate::sandbox::SandboxSupervisor;
use crate::screener::{self, ScreenerVerdict};
use crate::types::{
    EnvMap, ExecutionRequest, ExecutionResult, ExecutionStatus, LimitsOverride, ResolvedLimits,
    MAX_STDIN_BYTES,
};
use crate::workspace;

/// Called once per execution with the final result plus invocation
/// context, typically wired to an external persistence layer. A sink
/// failure must never fail the execution itself — it is only logged.
pub type MetadataSink = Arc<dyn Fn(&ExecutionResult, &InvocationContext) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    pub caller_id: Option<String>,
    pub caller_address: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Health {
    pub runtime_reachable: bool,
    pub active_sandbox_count: usize,
    pub max_concurrent_executions: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct KillOutcome {
    pub terminated: bool,
}

/// Ties the Language Registry, Screener, Workspace Manager, Sandbox
/// Supervisor, and Result Normalizer into the public `execute`/
/// `kill_execution`/`health` API.
pub struct Orchestrator {
    config: EngineConfig,
    registry: LanguageRegistry,
    supervisor: SandboxSupervisor,
    semaphore: Semaphore,
    metadata_sink: Option<MetadataSink>,
    id_counter: AtomicU64,
}

impl Orchestrator {
    pub fn new(config: EngineConfig, supervisor: SandboxSupervisor) -> Self {
        let permits = config.max_concurrent_executions;
        Self {
            config,
            registry: LanguageRegistry::built_in(),
            supervisor,
            semaphore: Semaphore::new(permits),
            metadata_sink: None,
            id_counter: AtomicU64::new(0),
        }
    }

    pub fn with_metadata_sink(mut self, sink: MetadataSink) -> Self {
        self.metadata_sink = Some(sink);
        self
    }

    /// Pre-pull every registered language's image. Failures are logged,
    /// never fatal — a language only actually fails when
    /// it is requested and its image is missing.
    pub async fn warm_up(&self) {
        use futures::StreamExt;

        for spec in self.registry.all() {
            let mut stream = self.supervisor.docker().create_image(
                Some(bollard::image::CreateImageOptions {
                    from_image: spec.image,
                    ..Default::default()
                }),
                None,
                None,
            );
            while let Some(progress) = stream.next().await {
                if let Err(e) = progress {
                    warn!(image = spec.image, error = %e, "failed to pre-pull language image");
                    break;
                }
            }
        }
    }

    pub async fn health(&self) -> Health {
        let runtime_reachable = self.supervisor.docker().ping().await.is_ok();
        Health {
            runtime_reachable,
            active_sandbox_count: self.supervisor.active_count().await,
            max_concurrent_executions: self.config.max_concurrent_executions,
        }
    }

    pub async fn kill_execution(&self, execution_id: &str) -> KillOutcome {
        KillOutcome {
            terminated: self.supervisor.kill(&execution_id.to_string()).await,
        }
    }

    /// Run one execution to completion: validate, screen, sandbox,
    /// normalize. Every exit path — including early rejection and
    /// internal errors — destroys the workspace and, through
    /// [`SandboxSupervisor::run`], reaps the container before returning.
    ///
    /// Equivalent to [`Orchestrator::execute_with_context`] with a default,
    /// empty [`InvocationContext`].
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        self.execute_with_context(request, InvocationContext::default())
            .await
    }

    /// Same as [`Orchestrator::execute`], but `ctx` (caller identity,
    /// caller address) is forwarded to the metadata sink alongside the
    /// final result. The engine itself never inspects `ctx` — it exists
    /// purely to be handed to the external persistence layer the sink is
    /// typically wired to.
    pub async fn execute_with_context(
        &self,
        request: ExecutionRequest,
        ctx: InvocationContext,
    ) -> Result<ExecutionResult> {
        let execution_id = self.generate_execution_id();
        let _span = tracing::info_span!("execution", execution_id = %execution_id).entered();

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| EngineError::Aborted("semaphore closed".to_string()))?;

        let t0 = Instant::now();

        if let Err(reasons) = validate_request(&request) {
            info!(?reasons, "request rejected before screening");
            let result = ExecutionResult::rejected(execution_id, reasons);
            self.notify_sink(&result, &ctx);
            return Ok(result);
        }

        let verdict = screener::validate(&request.source, request.language);
        let sanitized_source = match verdict {
            ScreenerVerdict::Reject { reasons } => {
                info!(?reasons, "source rejected by screener");
                let result = ExecutionResult::rejected(execution_id, reasons);
                self.notify_sink(&result, &ctx);
                return Ok(result);
            }
            ScreenerVerdict::Accept { sanitized_source } => sanitized_source,
        };
        info!("source passed screening");

        let spec = self
            .registry
            .lookup(request.language)
            .ok_or_else(|| EngineError::InvalidRequest("unknown language".to_string()))?;
        let limits = resolve_limits(&self.config, spec, request.limits.as_ref());
        let filename = spec.source_filename(&sanitized_source);

        let root = workspace::workspace_root();
        let ws = workspace::populate(
            &root,
            &execution_id,
            &filename,
            &sanitized_source,
            request.stdin.as_deref(),
        )
        .await?;
        info!(dir = %ws.dir.display(), "workspace created");

        let run_result = self.supervisor.run(&ws, spec, limits).await;

        if let Err(e) = workspace::destroy(&ws.dir).await {
            warn!(error = %e, "failed to destroy workspace");
        } else {
            info!("workspace destroyed");
        }

        let wall_time_ms = t0.elapsed().as_millis() as u64;

        let result = match run_result {
            Ok(mut outcome) => {
                outcome.wall_time_ms = wall_time_ms;
                normalizer::normalize(
                    execution_id.clone(),
                    outcome,
                    &filename,
                    self.config.output_cap_bytes,
                    spec.supports_compile,
                )
            }
            Err(e) if e.is_timeout() => {
                let mut result = ExecutionResult::internal_error(
                    execution_id.clone(),
                    wall_time_ms,
                    e.to_string(),
                );
                result.status = ExecutionStatus::Timeout;
                result
            }
            Err(e) => {
                warn!(error = %e, "sandbox execution failed internally");
                ExecutionResult::internal_error(execution_id.clone(), wall_time_ms, e.to_string())
            }
        };

        self.notify_sink(&result, &ctx);

        Ok(result)
    }

    /// Invoke the metadata sink, if one is configured. A sink failure
    /// (panic) must never fail the execution it is reporting on, so the
    /// call is caught and only logged.
    fn notify_sink(&self, result: &ExecutionResult, ctx: &InvocationContext) {
        if let Some(sink) = &self.metadata_sink {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink(result, ctx))).is_err()
            {
                warn!("metadata sink panicked; execution result was still computed");
            }
        }
    }

    fn generate_execution_id(&self) -> String {
        let seq = self.id_counter.fetch_add(1, Ordering::Relaxed);
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let mut rand_bytes = [0u8; 8];
        rand::rng().fill_bytes(&mut rand_bytes);
        let hex: String = rand_bytes.iter().map(|b| format!("{b:02x}")).collect();
        // Sequence number is folded in so two executions started within
        // the same millisecond by the same process still get distinct
        // ids even in the (astronomically unlikely) case of a random
        // collision.
        let _ = seq;
        format!("exec_{ts}_{hex}")
    }
}

fn validate_request(request: &ExecutionRequest) -> std::result::Result<(), Vec<String>> {
    let mut reasons = Vec::new();

    if request.source.is_empty() {
        reasons.push("source must not be empty".to_string());
    }
    if request.source.len() > crate::types::MAX_SOURCE_BYTES {
        reasons.push(format!(
            "source exceeds maximum size of {} bytes",
            crate::types::MAX_SOURCE_BYTES
        ));
    }
    if let Some(stdin) = &request.stdin {
        if stdin.len() > MAX_STDIN_BYTES {
            reasons.push(format!(
                "stdin exceeds maximum size of {MAX_STDIN_BYTES} bytes"
            ));
        }
        if stdin.contains('\0') {
            reasons.push("stdin contains a NUL byte".to_string());
        }
    }
    if request.source.contains('\0') {
        reasons.push("source contains a NUL byte".to_string());
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(reasons)
    }
}

fn resolve_limits(
    config: &EngineConfig,
    spec: &crate::registry::LanguageSpec,
    overrides: Option<&LimitsOverride>,
) -> ResolvedLimits {
    let default_wall_timeout_ms = if spec.supports_compile {
        config.docker_compile_timeout_ms
    } else {
        config.docker_timeout_ms
    };

    let wall_timeout_ms = overrides
        .and_then(|o| o.clipped_wall_timeout_ms())
        .unwrap_or(default_wall_timeout_ms);

    let memory_bytes = overrides
        .and_then(|o| o.memory_bytes)
        .unwrap_or(spec.default_memory_bytes)
        .min(config.max_memory_bytes.max(spec.default_memory_bytes));

    let cpu_fraction = overrides
        .and_then(|o| o.cpu_fraction)
        .unwrap_or(spec.default_cpu_fraction)
        .clamp(0.05, config.max_cpu_fraction.max(spec.default_cpu_fraction));

    ResolvedLimits {
        wall_timeout_ms,
        memory_bytes,
        cpu_fraction,
    }
}

/// Forwarded into the sandboxed process. Currently unused beyond the
/// public type surface — no per-execution env vars are set by default,
/// but embedding callers can extend [`ExecutionRequest`] to carry them
/// without changing the sandbox's plumbing.
#[allow(dead_code)]
fn empty_env() -> EnvMap {
    EnvMap::new()
}
