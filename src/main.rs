use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use pagekit::cli::{
    cmd_bucket, cmd_evaluate, cmd_load, cmd_settings, BucketArgs, EvaluateArgs, LoadArgs,
    SettingsArgs,
};
use pagekit::init_tracing;
use pagekit_settings::load_settings;

#[derive(Parser, Debug)]
#[command(name = "pagekit", version, about = "Phased page loading with content experiments")]
struct Cli {
    /// Settings file (YAML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Settings override, e.g. page.delayed_duration_ms=0 (repeatable)
    #[arg(long = "set", value_name = "PATH=VALUE", global = true)]
    overrides: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full page load and print a JSON report
    Load(LoadArgs),
    /// Print the MurmurHash3 value and bucket of a key
    Bucket(BucketArgs),
    /// Validate a manifest and print the decision
    Evaluate(EvaluateArgs),
    /// Print the effective settings
    Settings(SettingsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings =
        load_settings(cli.config.as_deref(), &cli.overrides).context("Failed to load settings")?;
    init_tracing(&settings.logging.filter, settings.logging.json);
    info!("Starting pagekit v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Load(args) => cmd_load(args, &settings).await,
        Commands::Bucket(args) => cmd_bucket(args).await,
        Commands::Evaluate(args) => cmd_evaluate(args, &settings).await,
        Commands::Settings(args) => cmd_settings(args, &settings).await,
    };

    if let Err(err) = &result {
        error!(error = %err, "command failed");
    }
    result
}
