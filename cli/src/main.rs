mod session;

use std::fs;
use std::path::{Path, PathBuf};

use annotator::config::{ConfigError, EngineConfig};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::session::{ReplayError, Session};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid session file: {0}")]
    InvalidSession(#[source] serde_json::Error),
    #[error("invalid engine config: {0}")]
    Config(#[from] ConfigError),
    #[error("replay failed: {0}")]
    Replay(#[from] ReplayError),
    #[error("failed to encode output: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "annotator", about = "Replay and inspect annotation engine sessions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a recorded session and print the final image state.
    Replay {
        session: PathBuf,
        #[arg(long, default_value_t = false)]
        compact: bool,
    },
    /// Print the engine config resolved from the environment.
    Config,
}

fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;

    match cli.command {
        Command::Replay { session, compact } => run_replay(&session, config, compact),
        Command::Config => print_json(&config, false),
    }
}

fn run_replay(path: &Path, config: EngineConfig, compact: bool) -> Result<(), CliError> {
    let raw = fs::read_to_string(path).map_err(|source| CliError::Read { path: path.to_path_buf(), source })?;
    let session: Session = serde_json::from_str(&raw).map_err(CliError::InvalidSession)?;
    let report = session::replay(&session, config)?;
    print_json(&report, compact)
}

fn print_json<T: Serialize>(value: &T, compact: bool) -> Result<(), CliError> {
    let rendered = if compact { serde_json::to_string(value) } else { serde_json::to_string_pretty(value) };
    let rendered = rendered.map_err(CliError::Encode)?;
    println!("{rendered}");
    Ok(())
}
