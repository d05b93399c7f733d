//! Darkroom CLI - image transformation cache over local storage.
//!
//! Darkroom stores source images, derives a deterministic cache key for each
//! transform request, and only runs the pipeline when no result is stored yet.
//!
//! # Usage
//!
//! ```bash
//! # Store a source image
//! darkroom upload photo.jpg --owner alice
//!
//! # Request a derived version (runs the in-process worker on a miss)
//! darkroom transform <image-id> --owner alice --spec '{"resize":{"width":500},"format":"webp"}'
//!
//! # Print the cache key a request maps to
//! darkroom key <image-id> --spec @spec.json
//!
//! # Run the pipeline on a local file without touching storage
//! darkroom execute photo.jpg --spec '{"rotate":90}' -o rotated.jpg
//! ```

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// Darkroom - image transformation cache and dispatch.
#[derive(Parser, Debug)]
#[command(name = "darkroom")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a source image and create its record
    Upload(cli::upload::UploadArgs),

    /// Request a transformation of a stored image
    Transform(cli::transform::TransformArgs),

    /// Print the cache key for a transform request
    Key(cli::key::KeyArgs),

    /// Run the pipeline on a local file
    Execute(cli::execute::ExecuteArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so use eprintln for config warnings.
    let config = match darkroom_core::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `darkroom config path`."
            );
            darkroom_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Darkroom v{}", darkroom_core::VERSION);

    match cli.command {
        Commands::Upload(args) => cli::upload::execute(args, config).await,
        Commands::Transform(args) => cli::transform::execute(args, config).await,
        Commands::Key(args) => cli::key::execute(args, config),
        Commands::Execute(args) => cli::execute::execute(args, config).await,
        Commands::Config(args) => cli::config::execute(args, config).await,
    }
}
