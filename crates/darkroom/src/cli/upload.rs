//! The `darkroom upload` command.

use anyhow::Context;
use clap::Args;
use darkroom_core::{Config, Darkroom};
use std::path::PathBuf;

/// Arguments for the `upload` command.
#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Image file to store
    #[arg(required = true)]
    pub file: PathBuf,

    /// Owner of the new record
    #[arg(long, env = "DARKROOM_OWNER")]
    pub owner: String,
}

/// Execute the upload command.
pub async fn execute(args: UploadArgs, config: Config) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {:?}", args.file))?;
    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    let darkroom = Darkroom::open_local(config).await?;
    let record = darkroom.upload(&args.owner, bytes, &file_name).await?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
