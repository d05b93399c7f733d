//! The `darkroom execute` command: run the pipeline on a local file.

use anyhow::Context;
use clap::Args;
use darkroom_core::{Config, PipelineExecutor};
use std::path::PathBuf;

use super::read_spec;

#[derive(Args, Debug)]
pub struct ExecuteArgs {
    /// Input image file
    #[arg(required = true)]
    pub input: PathBuf,

    /// Transform spec as JSON, or @file
    #[arg(long, short)]
    pub spec: String,

    /// Where to write the result
    #[arg(short, long)]
    pub output: PathBuf,
}

/// Execute the pipeline command.
pub async fn execute(args: ExecuteArgs, config: Config) -> anyhow::Result<()> {
    let spec = read_spec(&args.spec)?;
    spec.validate()?;

    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {:?}", args.input))?;

    // No source record here, so the fallback format comes from the input itself.
    let source_format = darkroom_core::pipeline::codec::read_metadata(&bytes)?.format;
    let spec = spec.with_format_fallback(&source_format);

    let executor = PipelineExecutor::new(&config.pipeline, &config.watermark_path());
    let output = executor.execute(bytes, &spec).await?;

    tokio::fs::write(&args.output, &output.bytes)
        .await
        .with_context(|| format!("Failed to write {:?}", args.output))?;
    tracing::info!(
        output = %args.output.display(),
        bytes = output.bytes.len(),
        "Wrote transformed image"
    );

    println!("{}", serde_json::to_string_pretty(&output.metadata)?);
    Ok(())
}
