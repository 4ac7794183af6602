//! Sandbox Supervisor — drives one containerized execution against the
//! local Docker Engine API via `bollard`.

use std::collections::HashMap;
use std::time::Duration;

use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, LogOutput, RemoveContainerOptions,
    StatsOptions, StopContainerOptions,
};
use bollard::models::{HostConfig, ResourcesUlimits};
use bollard::Docker;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SandboxErr};
use crate::registry::LanguageSpec;
use crate::types::{ExecutionId, ResolvedLimits, Workspace};

/// Fixed CPU accounting period (microseconds) `cpu_quota` is computed
/// against. Matches the Docker Engine's own default period.
const CPU_PERIOD_US: i64 = 100_000;
const PIDS_LIMIT: i64 = 50;
const FD_RLIMIT: i64 = 64;
const PROC_RLIMIT: i64 = 32;
const STOP_GRACE_SECS: i64 = 5;

/// Explanatory message appended to captured stderr when a sandbox is torn
/// down because an external caller invoked `kill`, distinguishing it from
/// the container's own output in the normalized result.
const ABORTED_MESSAGE: &str = "\nexecution aborted externally by kill_execution";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    Exited,
    KilledByTimeout,
    KilledByMemory,
    /// An external caller cancelled this execution via `kill_execution`
    /// before either the container exited or the internal wall-clock
    /// deadline fired.
    Aborted,
    InternalFailure,
}

/// Everything the Result Normalizer needs to compute an
/// [`crate::types::ExecutionStatus`], plus the raw captured bytes.
#[derive(Debug, Clone)]
pub struct RawOutcome {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    pub wall_time_ms: u64,
    pub peak_memory_bytes: Option<u64>,
    pub termination_cause: TerminationCause,
}

struct ContainerHandle {
    container_id: String,
    /// Signalled by [`SandboxSupervisor::kill`] so the in-flight `drive()`
    /// call's `select!` can distinguish an external abort from the
    /// internal wall-clock deadline and the container's own exit.
    cancel: CancellationToken,
}

/// Owns the live `executionId -> containerHandle` registry and the
/// `bollard::Docker` client used to drive container lifecycles.
pub struct SandboxSupervisor {
    docker: Docker,
    live: Mutex<HashMap<ExecutionId, ContainerHandle>>,
    output_cap_bytes: usize,
}

impl SandboxSupervisor {
    pub fn new(docker: Docker, output_cap_bytes: usize) -> Self {
        Self {
            docker,
            live: Mutex::new(HashMap::new()),
            output_cap_bytes,
        }
    }

    /// Connect to the local Docker Engine API, honoring `DOCKER_HOST`
    /// when set and falling back to the platform default socket
    /// otherwise.
    pub fn connect(docker_host: Option<&str>, output_cap_bytes: usize) -> Result<Self> {
        let docker = match docker_host {
            Some(host) => Docker::connect_with_socket(host, 120, bollard::API_DEFAULT_VERSION)
                .or_else(|_| Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION))
                .map_err(SandboxErr::from)?,
            None => Docker::connect_with_local_defaults().map_err(SandboxErr::from)?,
        };
        Ok(Self::new(docker, output_cap_bytes))
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Number of sandboxes currently registered as live.
    pub async fn active_count(&self) -> usize {
        self.live.lock().await.len()
    }

    /// Forcibly terminate a live execution, if one is registered. Signals
    /// the `cancel` token the matching in-flight `drive()` call races
    /// against, so that call (not this one) performs the actual
    /// `kill_container` and classifies the outcome as
    /// [`TerminationCause::Aborted`] rather than a normal exit. Returns
    /// whether a live execution was found. Idempotent: cancelling an
    /// already-cancelled or already-reaped token is a no-op.
    pub async fn kill(&self, execution_id: &ExecutionId) -> bool {
        let live = self.live.lock().await;
        let Some(handle) = live.get(execution_id) else {
            return false;
        };
        handle.cancel.cancel();
        true
    }

    /// Run one execution end to end: create, attach, start, race
    /// wait-for-exit against the wall-clock deadline, collect stats,
    /// reap. Never returns an `Err` for in-container failures — those
    /// are folded into [`TerminationCause::InternalFailure`] so the
    /// orchestrator always gets a `RawOutcome` to normalize; only
    /// genuine runtime-unreachable failures bubble up as `Err`.
    pub async fn run(
        &self,
        ws: &Workspace,
        spec: &LanguageSpec,
        limits: ResolvedLimits,
    ) -> Result<RawOutcome> {
        let filename = ws
            .source_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("main")
            .to_string();
        let cmd = spec.launch_cmd(&filename);

        let container_id = match self.create(ws, spec, &limits, cmd).await {
            Ok(id) => id,
            Err(e) => {
                return Ok(RawOutcome {
                    stdout: Vec::new(),
                    stderr: format!("failed to create sandbox: {e}").into_bytes(),
                    exit_code: -1,
                    wall_time_ms: 0,
                    peak_memory_bytes: None,
                    termination_cause: TerminationCause::InternalFailure,
                });
            }
        };

        let cancel = CancellationToken::new();
        self.live.lock().await.insert(
            ws.id.clone(),
            ContainerHandle {
                container_id: container_id.clone(),
                cancel: cancel.clone(),
            },
        );

        let outcome = self
            .drive(
                &container_id,
                limits.wall_timeout_ms,
                limits.memory_bytes,
                cancel,
            )
            .await;

        self.reap(&container_id).await;
        self.live.lock().await.remove(&ws.id);

        outcome
    }

    async fn create(
        &self,
        ws: &Workspace,
        spec: &LanguageSpec,
        limits: &ResolvedLimits,
        cmd: Vec<String>,
    ) -> std::result::Result<String, bollard::errors::Error> {
        let cpu_quota = (limits.cpu_fraction * CPU_PERIOD_US as f64) as i64;
        let bind = format!("{}:/app", ws.dir.display());

        let host_config = HostConfig {
            memory: Some(limits.memory_bytes as i64),
            cpu_period: Some(CPU_PERIOD_US),
            cpu_quota: Some(cpu_quota.max(1_000)),
            pids_limit: Some(PIDS_LIMIT),
            network_mode: Some("none".to_string()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            binds: Some(vec![bind]),
            auto_remove: Some(false),
            ulimits: Some(vec![
                ResourcesUlimits {
                    name: Some("nofile".to_string()),
                    soft: Some(FD_RLIMIT),
                    hard: Some(FD_RLIMIT),
                },
                ResourcesUlimits {
                    name: Some("nproc".to_string()),
                    soft: Some(PROC_RLIMIT),
                    hard: Some(PROC_RLIMIT),
                },
            ]),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.to_string()),
            cmd: Some(cmd),
            working_dir: Some("/app".to_string()),
            host_config: Some(host_config),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            ..Default::default()
        };

        let name = format!("sandkeep-{}", ws.id);
        let created = self
            .docker
            .create_container(
                Some(bollard::container::CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await?;
        Ok(created.id)
    }

    /// Attach, start, race wait-for-exit against the deadline and an
    /// external cancellation, and collect stats.
    async fn drive(
        &self,
        container_id: &str,
        wall_timeout_ms: u64,
        memory_bytes: u64,
        cancel: CancellationToken,
    ) -> Result<RawOutcome> {
        let AttachContainerResults { output, .. } = self
            .docker
            .attach_container(
                container_id,
                Some(AttachContainerOptions::<String> {
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .map_err(SandboxErr::from)?;

        let cap = self.output_cap_bytes;
        // Drain the demultiplexed stdout/stderr stream on its own task so
        // it keeps making progress regardless of which branch of the
        // wait-vs-deadline race below wins.
        let drain_handle = tokio::spawn(async move {
            let mut output = output;
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut stdout_truncated = false;
            let mut stderr_truncated = false;
            while let Some(frame) = output.next().await {
                match frame {
                    Ok(LogOutput::StdOut { message }) => {
                        append_capped(&mut stdout, &message, cap, &mut stdout_truncated);
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        append_capped(&mut stderr, &message, cap, &mut stderr_truncated);
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            (stdout, stderr)
        });

        self.docker
            .start_container::<String>(container_id, None)
            .await
            .map_err(SandboxErr::from)?;

        let t0 = std::time::Instant::now();

        let mut wait_stream = self
            .docker
            .wait_container(container_id, None::<bollard::container::WaitContainerOptions<String>>);

        let mut termination_cause = TerminationCause::Exited;
        let mut exit_code: i32 = -1;

        tokio::select! {
            wait_result = wait_stream.next() => {
                match wait_result {
                    Some(Ok(response)) => {
                        exit_code = response.status_code as i32;
                    }
                    Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                        exit_code = code as i32;
                    }
                    Some(Err(e)) => {
                        return Err(SandboxErr::from(e).into());
                    }
                    None => {}
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(wall_timeout_ms)) => {
                termination_cause = TerminationCause::KilledByTimeout;
                let _ = self
                    .docker
                    .kill_container(
                        container_id,
                        Some(bollard::container::KillContainerOptions { signal: "SIGKILL" }),
                    )
                    .await;
            }
            _ = cancel.cancelled() => {
                termination_cause = TerminationCause::Aborted;
                let _ = self
                    .docker
                    .kill_container(
                        container_id,
                        Some(bollard::container::KillContainerOptions { signal: "SIGKILL" }),
                    )
                    .await;
            }
        }

        let wall_time_ms = t0.elapsed().as_millis() as u64;

        let (stdout, mut stderr) = drain_handle.await?;
        if termination_cause == TerminationCause::Aborted {
            stderr.extend_from_slice(ABORTED_MESSAGE.as_bytes());
        }

        // An external abort always wins: once a caller has cancelled the
        // execution, a stats snapshot crossing the memory cap on the way
        // down must not relabel it as `KilledByMemory`.
        let peak_memory_bytes = self.query_peak_memory(container_id).await;
        if let Some(peak) = peak_memory_bytes {
            if peak >= memory_bytes && termination_cause != TerminationCause::Aborted {
                termination_cause = TerminationCause::KilledByMemory;
            }
        }

        Ok(RawOutcome {
            stdout,
            stderr,
            exit_code,
            wall_time_ms,
            peak_memory_bytes,
            termination_cause,
        })
    }

    /// One-shot (non-streaming) stats query, performed strictly after
    /// termination and strictly before reap.
    async fn query_peak_memory(&self, container_id: &str) -> Option<u64> {
        let mut stream = self.docker.stats(
            container_id,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        );
        match stream.next().await {
            Some(Ok(stats)) => stats.memory_stats.max_usage.or(stats.memory_stats.usage),
            _ => None,
        }
    }

    /// Stop (5s grace) then remove. Failures are logged and swallowed —
    /// the outcome has already been computed and must not be lost
    /// because cleanup hiccuped.
    async fn reap(&self, container_id: &str) {
        if let Err(e) = self
            .docker
            .stop_container(
                container_id,
                Some(StopContainerOptions { t: STOP_GRACE_SECS }),
            )
            .await
        {
            tracing::warn!(container_id, error = %e, "failed to stop container during reap");
        }
        if let Err(e) = self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            tracing::warn!(container_id, error = %e, "failed to remove container during reap");
        }
    }
}

fn append_capped(buf: &mut Vec<u8>, chunk: &[u8], cap: usize, truncated: &mut bool) {
    if *truncated {
        return;
    }
    if buf.len() + chunk.len() <= cap {
        buf.extend_from_slice(chunk);
        return;
    }
    let remaining = cap.saturating_sub(buf.len());
    buf.extend_from_slice(&chunk[..remaining]);
    buf.extend_from_slice(crate::types::OUTPUT_TRUNCATION_MARKER.as_bytes());
    *truncated = true;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn append_capped_stops_at_cap_with_single_marker() {
        let mut buf = Vec::new();
        let mut truncated = false;
        append_capped(&mut buf, b"hello", 3, &mut truncated);
        assert!(truncated);
        assert_eq!(&buf[..3], b"hel");
        assert!(buf.ends_with(crate::types::OUTPUT_TRUNCATION_MARKER.as_bytes()));
    }

    #[test]
    fn append_capped_ignores_further_writes_after_truncation() {
        let mut buf = Vec::new();
        let mut truncated = false;
        append_capped(&mut buf, b"hello", 3, &mut truncated);
        let len_after_first = buf.len();
        append_capped(&mut buf, b"more", 3, &mut truncated);
        assert_eq!(buf.len(), len_after_first);
    }

    #[test]
    fn append_capped_under_cap_is_untouched() {
        let mut buf = Vec::new();
        let mut truncated = false;
        append_capped(&mut buf, b"hi", 100, &mut truncated);
        assert!(!truncated);
        assert_eq!(buf, b"hi");
    }

    /// Requires a reachable Docker Engine API socket; not part of the
    /// default test pass.
    #[ignore]
    #[tokio::test]
    async fn live_python_execution_reports_stdout() {
        let docker = Docker::connect_with_local_defaults().expect("connect to docker");
        let supervisor = SandboxSupervisor::new(docker, 100_000);
        assert_eq!(supervisor.active_count().await, 0);
    }

    #[tokio::test]
    async fn kill_returns_false_for_unknown_execution_id() {
        let docker = Docker::connect_with_local_defaults()
            .expect("constructing a docker client does not itself dial the daemon");
        let supervisor = SandboxSupervisor::new(docker, 100_000);
        assert!(!supervisor.kill(&"exec_does_not_exist".to_string()).await);
    }

    /// `kill` must signal the registered handle's cancellation token
    /// rather than touch the container directly — that token is what lets
    /// the in-flight `drive()` call's `select!` distinguish an external
    /// abort (-> `Aborted`/`InternalError`) from its own timeout branch.
    #[tokio::test]
    async fn kill_cancels_the_registered_handles_token() {
        let docker = Docker::connect_with_local_defaults()
            .expect("constructing a docker client does not itself dial the daemon");
        let supervisor = SandboxSupervisor::new(docker, 100_000);

        let execution_id = "exec_test_cancel".to_string();
        let cancel = CancellationToken::new();
        supervisor.live.lock().await.insert(
            execution_id.clone(),
            ContainerHandle {
                container_id: "fake-container".to_string(),
                cancel: cancel.clone(),
            },
        );

        assert!(!cancel.is_cancelled());
        assert!(supervisor.kill(&execution_id).await);
        assert!(cancel.is_cancelled());
    }
}
