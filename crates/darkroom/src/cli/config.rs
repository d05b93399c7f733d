//! The `darkroom config` command.

use clap::{Args, Subcommand};
use darkroom_core::Config;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,

    /// Print the config file location
    Path,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Parse and validate a config file without using it
    Check {
        /// File to check (defaults to the config file location)
        file: Option<PathBuf>,
    },
}

/// Execute the config command.
pub async fn execute(args: ConfigArgs, config: Config) -> anyhow::Result<()> {
    match args.command {
        ConfigCommand::Show => {
            println!("{}", config.to_toml()?);
        }

        ConfigCommand::Path => {
            println!("{}", Config::default_path().display());
        }

        ConfigCommand::Init { force } => {
            let path = Config::default_path();
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at: {}\nUse --force to overwrite.",
                    path.display()
                );
            }
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, Config::default().to_toml()?).await?;

            tracing::info!(path = %path.display(), "Config file created");
            println!("Configuration initialized at: {}", path.display());
        }

        ConfigCommand::Check { file } => {
            let path = file.unwrap_or_else(Config::default_path);
            let checked = Config::load_from(&path)?;
            println!(
                "{} is valid (queue \"{}\", storage root {})",
                path.display(),
                checked.queue.name,
                checked.storage_root().display()
            );
        }
    }

    Ok(())
}
