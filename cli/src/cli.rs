use std::path::PathBuf;

use clap::Parser;
use clap::ValueEnum;
use sandkeep_core::LanguageId;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LanguageArg {
    Python,
    Javascript,
    Cpp,
    Java,
}

impl From<LanguageArg> for LanguageId {
    fn from(value: LanguageArg) -> Self {
        match value {
            LanguageArg::Python => LanguageId::Python,
            LanguageArg::Javascript => LanguageId::Javascript,
            LanguageArg::Cpp => LanguageId::Cpp,
            LanguageArg::Java => LanguageId::Java,
        }
    }
}

/// Run one untrusted source file inside a disposable, network-isolated
/// container and print the result.
#[derive(Debug, Parser)]
#[command(name = "sandkeep", version)]
pub struct Cli {
    /// Language of the source file.
    #[arg(long, value_enum)]
    pub language: LanguageArg,

    /// Path to the source file to execute.
    pub source_path: PathBuf,

    /// Optional path to a file whose contents are piped to the
    /// program's stdin.
    #[arg(long)]
    pub stdin_path: Option<PathBuf>,

    /// Override the wall-clock timeout, in milliseconds.
    #[arg(long)]
    pub wall_timeout_ms: Option<u64>,

    /// Print the result as pretty JSON instead of a human-readable
    /// summary.
    #[arg(long)]
    pub json: bool,
}
