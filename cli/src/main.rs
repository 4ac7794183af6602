use clap::Parser;
use sandkeep_cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = sandkeep_cli::run_main(cli).await {
        eprintln!("sandkeep: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
