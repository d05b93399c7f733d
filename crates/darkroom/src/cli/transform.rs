//! The `darkroom transform` command.
//!
//! Dispatches like the request path would and prints the response. The queue
//! lives in this process, so on a miss the command then drains it with a
//! local worker and prints the record the worker produced.

use clap::Args;
use darkroom_core::{Config, Darkroom, DispatchOutcome};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use super::read_spec;

#[derive(Args, Debug)]
pub struct TransformArgs {
    /// Source image ID
    pub image_id: Uuid,

    /// Requesting owner
    #[arg(long, env = "DARKROOM_OWNER")]
    pub owner: String,

    /// Transform spec as JSON, or @file
    #[arg(long, short)]
    pub spec: String,

    /// Stop the local worker after this long without deliveries
    #[arg(long, default_value = "200")]
    pub idle_ms: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Response<'a> {
    status_code: u16,
    cache_status: &'static str,
    body: darkroom_core::dispatch::ResponseBody<'a>,
}

/// Execute the transform command.
pub async fn execute(args: TransformArgs, config: Config) -> anyhow::Result<()> {
    let spec = read_spec(&args.spec)?;
    let darkroom = Darkroom::open_local(config).await?;

    let outcome = darkroom
        .dispatch_by_id(args.image_id, spec.clone(), &args.owner)
        .await?;
    let response = Response {
        status_code: outcome.status_code(),
        cache_status: outcome.cache_status(),
        body: outcome.body(),
    };
    println!("{}", serde_json::to_string_pretty(&response)?);

    if let DispatchOutcome::Accepted { expected_key, .. } = &outcome {
        let stats = darkroom
            .worker()
            .run_until_idle(Duration::from_millis(args.idle_ms))
            .await?;
        tracing::info!(
            completed = stats.completed,
            dead_lettered = stats.dead_lettered,
            "Local worker drained the queue"
        );

        // A second dispatch is a plain cache lookup once the worker has stored the result.
        match darkroom.dispatch_by_id(args.image_id, spec, &args.owner).await? {
            DispatchOutcome::Hit(record) => {
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
            DispatchOutcome::Accepted { .. } => {
                darkroom.shutdown().await?;
                anyhow::bail!("Transformation did not produce {expected_key}");
            }
        }
    }

    darkroom.shutdown().await?;
    Ok(())
}
