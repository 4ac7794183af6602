mod cli;

pub use cli::Cli;

use sandkeep_core::{
    EngineConfig, ExecutionRequest, ExecutionResult, LimitsOverride, Orchestrator,
    SandboxSupervisor,
};
use tracing::info;

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        language,
        source_path,
        stdin_path,
        wall_timeout_ms,
        json,
    } = cli;

    let source = tokio::fs::read_to_string(&source_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", source_path.display()))?;

    let stdin = match stdin_path {
        Some(path) => Some(
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?,
        ),
        None => None,
    };

    let config = EngineConfig::from_env();
    let supervisor = SandboxSupervisor::connect(config.docker_host.as_deref(), config.output_cap_bytes)
        .map_err(|e| anyhow::anyhow!("failed to connect to container runtime: {e}"))?;
    let orchestrator = Orchestrator::new(config, supervisor);

    info!("pre-pulling language images");
    orchestrator.warm_up().await;

    let limits = wall_timeout_ms.map(|ms| LimitsOverride {
        wall_timeout_ms: Some(ms),
        memory_bytes: None,
        cpu_fraction: None,
    });

    let request = ExecutionRequest {
        language: language.into(),
        source,
        stdin,
        limits,
    };

    let result = orchestrator.execute(request).await?;
    print_result(&result, json)?;

    Ok(())
}

fn print_result(result: &ExecutionResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("status: {:?}", result.status);
    println!("exit_code: {}", result.exit_code);
    println!("wall_time_ms: {}", result.wall_time_ms);
    if let Some(peak) = result.peak_memory_bytes {
        println!("peak_memory_bytes: {peak}");
    }
    if let Some(violations) = &result.violations {
        println!("violations:");
        for v in violations {
            println!("  - {v}");
        }
    }
    if !result.stdout.is_empty() {
        println!("--- stdout ---\n{}", result.stdout);
    }
    if !result.stderr.is_empty() {
        println!("--- stderr ---\n{}", result.stderr);
    }

    Ok(())
}
