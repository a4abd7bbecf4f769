use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use xivpov_lib::RunOptions;

#[derive(Debug, Parser)]
#[command(name = "xivpov", about = "Detects FFXIV encounters in ACT network logs")]
struct Cli {
    /// Settings file, created on first write.
    #[arg(long, global = true, default_value = "xivpov-settings.json")]
    settings: PathBuf,

    /// Directory for recordings and their metadata sidecars.
    #[arg(long, global = true, default_value = "recordings")]
    output: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Tail a directory of Network_*.log files.
    Watch { log_directory: PathBuf },
    /// Run a finished log file through the engine.
    Replay { log_file: PathBuf },
    /// Read overlay feed messages from stdin.
    Feed,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = RunOptions {
        settings_path: cli.settings,
        output_directory: cli.output,
    };

    let result = match cli.command {
        Command::Watch { log_directory } => xivpov_lib::watch(&log_directory, &options).await,
        Command::Replay { log_file } => xivpov_lib::replay(&log_file, &options).await,
        Command::Feed => xivpov_lib::feed(&options).await,
    };

    if let Err(error) = result {
        tracing::error!("xivpov stopped: {error}");
        std::process::exit(1);
    }
}
